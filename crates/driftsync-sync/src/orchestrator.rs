//! Sync orchestrator
//!
//! Owns the per-folder state machine, the cross-folder work queue, and the
//! bounded worker pool that executes upload/download/delete tasks through
//! the retrying wrapper, consulting the change scanner and the conflict
//! engine and persisting outcomes to the metadata store.
//!
//! ## Per-folder state machine
//!
//! ```text
//! idle ──► scanning ──► {uploading, downloading} ──► idle
//!
//! paused  - entered/exited explicitly; suspends scanning and the queue
//!           for that folder only
//! error   - entered after three consecutive failed cycles; exited
//!           automatically on the next successful cycle
//! ```
//!
//! Each folder's cycle runs on its own task and overlaps freely with other
//! folders' cycles; there is no global lock. Within one cycle the local
//! scan and the remote poll run concurrently. Transfer tasks from all
//! folders share one bounded semaphore so no folder can starve the others,
//! and two tasks touching the same path are serialized through a per-path
//! async mutex.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex as AsyncMutex, Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use driftsync_conflict::{decide, ConflictDetector, ConflictError, ConflictOutcome, Divergence, Side};
use driftsync_core::config::Config;
use driftsync_core::domain::conflict::ConflictStrategy;
use driftsync_core::domain::newtypes::{Checksum, FolderId, LocalPath, RelativePath, RemotePath};
use driftsync_core::domain::{Conflict, ConflictResolution, FileEntry, FileStatus, SyncFolder, SyncState};
use driftsync_core::ports::{ILocalFileSystem, IRemoteStore, IStateRepository};
use driftsync_ipc::{
    Command, CommandReply, ConflictSummary, Direction, EngineEndpoint, EngineEvent, FolderSummary,
    ManualResolution, SyncStateSummary,
};

use crate::resolver::ConflictResolver;
use crate::retry::{with_retry, RetryPolicy};
use crate::scanner::{ChangeKind, ChangeScanner, LocalChange, RemoteDelta};
use crate::scheduler::{CycleScheduler, CycleTrigger};
use crate::watcher::{FileEvent, FolderWatcher, WatchHandle};

// ============================================================================
// Runtime state
// ============================================================================

/// In-cycle state of an active folder (transient, not persisted)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleState {
    Idle,
    Scanning,
    Uploading,
    Downloading,
}

impl CycleState {
    fn name(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Scanning => "scanning",
            CycleState::Uploading => "uploading",
            CycleState::Downloading => "downloading",
        }
    }
}

/// Long-lived in-memory handle for one folder's watcher registration and
/// cycle loop
struct FolderRuntime {
    /// Wakes the folder's loop for an immediate cycle
    signal: Arc<Notify>,
    /// Cancels the folder's loop (child of the engine-wide token)
    cancel: CancellationToken,
    /// Transient cycle state for status reporting
    cycle_state: StdMutex<CycleState>,
    /// Consecutive failed cycles; three in a row degrade the folder
    consecutive_failures: AtomicU32,
    /// Active watch registration, if any
    watch: StdMutex<Option<WatchHandle>>,
    /// Local root, for dispatching watcher events to this folder
    local_root: LocalPath,
}

// ============================================================================
// Transfer tasks
// ============================================================================

/// One unit of work on the shared worker pool
#[derive(Debug, Clone)]
struct TransferTask {
    path: RelativePath,
    kind: TaskKind,
}

#[derive(Debug, Clone)]
enum TaskKind {
    /// Local → remote
    Upload,
    /// Remote → local, verifying against the expected checksum when known
    Download { expected: Option<Checksum> },
    /// Mirror a local deletion to the remote replica
    DeleteRemote,
    /// Mirror a remote deletion to the local replica
    DeleteLocal,
}

/// Result of one executed task
struct TaskOutcome {
    path: RelativePath,
    ok: bool,
}

// ============================================================================
// Engine internals
// ============================================================================

struct EngineInner {
    config: Config,
    store: Arc<dyn IStateRepository>,
    remote: Arc<dyn IRemoteStore>,
    local_fs: Arc<dyn ILocalFileSystem>,
    scanner: ChangeScanner,
    resolver: ConflictResolver,
    retry: RetryPolicy,
    events: broadcast::Sender<EngineEvent>,
    /// Bounded worker pool shared across all folders
    transfer_slots: Arc<Semaphore>,
    /// Per-path serialization: a path is never uploaded and downloaded
    /// concurrently
    path_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    runtimes: DashMap<FolderId, Arc<FolderRuntime>>,
    watcher: StdMutex<FolderWatcher>,
    shutdown: CancellationToken,
}

/// The sync engine's orchestrator
///
/// Construct with the configuration, the three ports, and the engine-side
/// half of the command boundary, then drive it with
/// [`run`](Orchestrator::run) until the shutdown token fires.
pub struct Orchestrator {
    inner: Arc<EngineInner>,
    endpoint: EngineEndpoint,
    watch_events: Option<tokio::sync::mpsc::Receiver<FileEvent>>,
}

impl Orchestrator {
    /// Creates the orchestrator and its platform watcher
    pub fn new(
        config: Config,
        store: Arc<dyn IStateRepository>,
        remote: Arc<dyn IRemoteStore>,
        local_fs: Arc<dyn ILocalFileSystem>,
        endpoint: EngineEndpoint,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let retry = RetryPolicy::from_config(&config.retry);
        let debounce = Duration::from_millis(config.sync.debounce_ms);

        let (watcher, watch_events) =
            FolderWatcher::new(debounce).context("Failed to create folder watcher")?;

        let scanner = ChangeScanner::new(store.clone(), local_fs.clone(), remote.clone(), retry);
        let resolver = ConflictResolver::new(store.clone(), remote.clone(), local_fs.clone(), retry);

        let inner = Arc::new(EngineInner {
            transfer_slots: Arc::new(Semaphore::new(config.sync.max_concurrent_transfers.max(1))),
            config,
            store,
            remote,
            local_fs,
            scanner,
            resolver,
            retry,
            events: endpoint.event_tx.clone(),
            path_locks: DashMap::new(),
            runtimes: DashMap::new(),
            watcher: StdMutex::new(watcher),
            shutdown,
        });

        Ok(Self {
            inner,
            endpoint,
            watch_events: Some(watch_events),
        })
    }

    /// Runs the engine until shutdown
    ///
    /// Spawns the cycle loop for every stored folder, the watcher dispatch
    /// task, and then serves the command channel. In-flight transfers are
    /// abandoned (not rolled back) at shutdown; restart resumes from the
    /// pending statuses in the store.
    pub async fn run(mut self) -> Result<()> {
        let inner = self.inner.clone();

        // Resume every configured folder from the store
        let folders = inner
            .store
            .list_folders()
            .await
            .context("Failed to load folders at startup")?;
        info!(folders = folders.len(), "Orchestrator starting");

        for folder in &folders {
            inner.spawn_folder(folder);
        }

        // Route debounced watcher events to the owning folder's scheduler
        if let Some(mut watch_events) = self.watch_events.take() {
            let dispatch_inner = inner.clone();
            tokio::spawn(async move {
                while let Some(event) = watch_events.recv().await {
                    dispatch_inner.dispatch_watch_event(&event);
                }
                debug!("Watcher event channel closed");
            });
        }

        // Serve the command boundary
        loop {
            tokio::select! {
                envelope = self.endpoint.cmd_rx.recv() => {
                    match envelope {
                        Some(envelope) => {
                            let reply = inner.handle_command(envelope.command).await;
                            let _ = envelope.reply_tx.send(reply);
                        }
                        None => {
                            info!("Command channel closed, orchestrator stopping");
                            break;
                        }
                    }
                }
                _ = inner.shutdown.cancelled() => {
                    info!("Shutdown signal received, orchestrator stopping");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Folder lifecycle
// ============================================================================

impl EngineInner {
    /// Creates the runtime for a folder and spawns its cycle loop
    fn spawn_folder(self: &Arc<Self>, folder: &SyncFolder) {
        let folder_id = folder.id();
        if self.runtimes.contains_key(&folder_id) {
            warn!(%folder_id, "Folder runtime already exists");
            return;
        }

        let runtime = Arc::new(FolderRuntime {
            signal: Arc::new(Notify::new()),
            cancel: self.shutdown.child_token(),
            cycle_state: StdMutex::new(CycleState::Idle),
            consecutive_failures: AtomicU32::new(0),
            watch: StdMutex::new(None),
            local_root: folder.local_root().clone(),
        });

        self.ensure_watch(folder, &runtime);
        self.runtimes.insert(folder_id, runtime.clone());

        let loop_inner = self.clone();
        tokio::spawn(async move {
            loop_inner.folder_loop(folder_id, runtime).await;
        });

        info!(%folder_id, root = %folder.local_root(), "Folder runtime started");
    }

    /// (Re-)registers the watcher for a folder's root
    ///
    /// A failed registration degrades gracefully: scanning still happens on
    /// the timer, and the next cycle retries the watch.
    fn ensure_watch(&self, folder: &SyncFolder, runtime: &FolderRuntime) {
        let mut watch_guard = match runtime.watch.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if watch_guard.is_some() {
            return;
        }

        let mut watcher = match self.watcher.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match watcher.watch(folder.local_root().as_path()) {
            Ok(handle) => {
                *watch_guard = Some(handle);
            }
            Err(err) => {
                warn!(
                    folder_id = %folder.id(),
                    root = %folder.local_root(),
                    error = %err,
                    "Watch registration failed; relying on timer until it recovers"
                );
            }
        }
    }

    /// Drops a folder's watch registration
    fn release_watch(&self, runtime: &FolderRuntime) {
        let handle = {
            let mut watch_guard = match runtime.watch.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            watch_guard.take()
        };

        if let Some(handle) = handle {
            let mut watcher = match self.watcher.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Err(err) = watcher.unwatch(handle) {
                warn!(error = %err, "Failed to unwatch folder root");
            }
        }
    }

    /// Routes a debounced watcher event to the folder that owns its path
    fn dispatch_watch_event(&self, event: &FileEvent) {
        for entry in self.runtimes.iter() {
            if event.path.starts_with(entry.value().local_root.as_path()) {
                debug!(
                    folder_id = %entry.key(),
                    path = %event.path.display(),
                    action = %event.action,
                    "Watcher event, signalling cycle"
                );
                entry.value().signal.notify_one();
                return;
            }
        }
        debug!(path = %event.path.display(), "Watcher event matched no folder");
    }

    /// One folder's cycle loop: wait for a trigger, run a cycle, repeat
    async fn folder_loop(self: Arc<Self>, folder_id: FolderId, runtime: Arc<FolderRuntime>) {
        let poll_interval = Duration::from_secs(self.config.sync.poll_interval_secs.max(1));
        let mut scheduler = CycleScheduler::new(
            poll_interval,
            runtime.signal.clone(),
            runtime.cancel.clone(),
        );

        loop {
            let trigger = scheduler.next_trigger().await;
            if trigger == CycleTrigger::Shutdown {
                break;
            }

            let folder = match self.store.get_folder(folder_id).await {
                Ok(Some(folder)) => folder,
                Ok(None) => {
                    debug!(%folder_id, "Folder removed, stopping loop");
                    break;
                }
                Err(err) => {
                    error!(%folder_id, error = %err, "Failed to load folder");
                    continue;
                }
            };

            // Paused folders skip cycles; resuming restarts from idle
            if matches!(folder.status(), driftsync_core::domain::FolderStatus::Paused) {
                continue;
            }

            self.ensure_watch(&folder, &runtime);

            match self.run_cycle(&folder, &runtime).await {
                Ok(()) => {
                    runtime.consecutive_failures.store(0, Ordering::Relaxed);
                }
                Err(err) => {
                    let failures = runtime.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        %folder_id,
                        failures,
                        error = %err,
                        "Sync cycle failed"
                    );

                    // A vanished root (e.g. unmounted volume) is a
                    // configuration failure: degrade immediately instead of
                    // waiting for three consecutive failures. Recovery
                    // happens on the next successful cycle.
                    let root_gone = !folder.local_root().as_path().exists();
                    if root_gone {
                        // Drop the stale registration; the next cycle
                        // re-issues watch() once the root returns
                        self.release_watch(&runtime);
                    }

                    if root_gone || failures >= self.config.sync.max_failed_cycles {
                        let mut degraded = folder.clone();
                        degraded.mark_error();
                        if let Err(save_err) = self.store.save_folder(&degraded).await {
                            error!(%folder_id, error = %save_err, "Failed to persist error status");
                        }
                        self.emit_state(&degraded, "error").await;
                    }
                }
            }
        }

        debug!(%folder_id, "Folder loop stopped");
    }
}

// ============================================================================
// The sync cycle
// ============================================================================

impl EngineInner {
    /// One scan/merge/transfer cycle for a folder
    #[instrument(skip(self, folder, runtime), fields(folder_id = %folder.id()))]
    async fn run_cycle(self: &Arc<Self>, folder: &SyncFolder, runtime: &FolderRuntime) -> Result<()> {
        self.set_cycle_state(runtime, CycleState::Scanning);
        self.emit_state(folder, "scanning").await;

        let mut sync_state = self
            .store
            .get_sync_state(folder.id())
            .await?
            .unwrap_or_else(|| SyncState::new(folder.id()));
        let since = sync_state.last_remote_poll;

        // Local scan and remote poll are independent; run them concurrently
        let (local_result, remote_result) = tokio::join!(
            self.scanner.scan_local(folder),
            self.scanner.fetch_remote(folder, since),
        );
        let local_changes = local_result.context("Local scan failed")?;
        let remote_changes = remote_result.context("Remote poll failed")?;

        let cycle_time = Utc::now();
        sync_state.record_local_scan(cycle_time);
        sync_state.record_remote_poll(cycle_time);

        info!(
            local = local_changes.len(),
            remote = remote_changes.len(),
            "Cycle deltas detected"
        );

        // Merge the deltas path-by-path into transfer tasks and conflicts
        let (mut tasks, conflict_failures) = self
            .merge_deltas(folder, local_changes, remote_changes)
            .await?;

        // Crash resume: stored pending entries not covered by this cycle's
        // deltas still owe a transfer
        let planned: HashSet<RelativePath> = tasks.iter().map(|t| t.path.clone()).collect();
        for entry in self
            .store
            .files_with_status(folder.id(), FileStatus::PendingUpload)
            .await?
        {
            if !planned.contains(entry.path()) {
                tasks.push(TransferTask {
                    path: entry.path().clone(),
                    kind: TaskKind::Upload,
                });
            }
        }
        for entry in self
            .store
            .files_with_status(folder.id(), FileStatus::PendingDownload)
            .await?
        {
            if !planned.contains(entry.path()) {
                tasks.push(TransferTask {
                    path: entry.path().clone(),
                    kind: TaskKind::Download { expected: None },
                });
            }
        }

        // Counters and state event before the transfer phase starts
        let (uploads, downloads) = self.store.count_pending(folder.id()).await?;
        sync_state.set_pending(uploads, downloads);
        self.store.save_sync_state(&sync_state).await?;

        let transfer_state = if uploads > 0 {
            CycleState::Uploading
        } else if downloads > 0 {
            CycleState::Downloading
        } else {
            CycleState::Idle
        };

        let mut failed_tasks = conflict_failures;

        if !tasks.is_empty() {
            self.set_cycle_state(runtime, transfer_state);
            self.emit_state(folder, transfer_state.name()).await;

            failed_tasks += self.execute_tasks(folder, tasks).await;
        }

        // Queue drained: back to idle, counters refreshed
        let (uploads, downloads) = self.store.count_pending(folder.id()).await?;
        sync_state.set_pending(uploads, downloads);
        self.store.save_sync_state(&sync_state).await?;

        self.set_cycle_state(runtime, CycleState::Idle);

        if failed_tasks > 0 {
            self.emit_state(folder, "idle").await;
            anyhow::bail!("{failed_tasks} transfer task(s) failed");
        }

        // A successful cycle clears error status and stamps last sync
        let mut synced = folder.clone();
        synced.record_sync(cycle_time);
        self.store.save_folder(&synced).await?;
        self.emit_state(&synced, "idle").await;

        Ok(())
    }

    /// Merges the two deltas path-by-path
    ///
    /// Matching paths with divergent checksums go to the conflict engine;
    /// one-sided changes become transfer tasks; a deletion on one side with
    /// no change on the other becomes a delete-mirroring task; a deletion
    /// opposing an edit loses to the edit.
    ///
    /// Returns the planned tasks plus the number of conflict resolutions
    /// that failed; a failed resolution never aborts work on other paths.
    async fn merge_deltas(
        self: &Arc<Self>,
        folder: &SyncFolder,
        local_changes: Vec<LocalChange>,
        remote_changes: Vec<RemoteDelta>,
    ) -> Result<(Vec<TransferTask>, u32)> {
        let mut local_map: HashMap<RelativePath, LocalChange> = local_changes
            .into_iter()
            .map(|c| (c.path.clone(), c))
            .collect();
        let mut remote_map: HashMap<RelativePath, RemoteDelta> = remote_changes
            .into_iter()
            .map(|c| (c.path.clone(), c))
            .collect();

        let mut paths: Vec<RelativePath> = local_map.keys().cloned().collect();
        paths.extend(remote_map.keys().cloned());
        paths.sort();
        paths.dedup();

        let mut tasks = Vec::new();
        let mut conflict_failures = 0u32;

        for path in paths {
            let local = local_map.remove(&path);
            let remote = remote_map.remove(&path);

            match (local, remote) {
                (Some(local), None) => {
                    self.plan_local_only(folder, &path, local, &mut tasks).await?;
                }
                (None, Some(remote)) => {
                    self.plan_remote_only(folder, &path, remote, &mut tasks).await?;
                }
                (Some(local), Some(remote)) => {
                    self.plan_both_sides(
                        folder,
                        &path,
                        local,
                        remote,
                        &mut tasks,
                        &mut conflict_failures,
                    )
                    .await?;
                }
                (None, None) => unreachable!("path came from one of the maps"),
            }
        }

        Ok((tasks, conflict_failures))
    }

    /// A change on the local side only
    async fn plan_local_only(
        &self,
        folder: &SyncFolder,
        path: &RelativePath,
        local: LocalChange,
        tasks: &mut Vec<TransferTask>,
    ) -> Result<()> {
        match local.kind {
            ChangeKind::Deleted => tasks.push(TransferTask {
                path: path.clone(),
                kind: TaskKind::DeleteRemote,
            }),
            _ if local.is_directory => {
                // Directories carry no content; record and move on. The
                // remote replica materializes them when files upload.
                let entry = FileEntry::new_directory(
                    folder.id(),
                    path.clone(),
                    local.modified,
                    FileStatus::Synced,
                );
                self.store.upsert_file(&entry).await?;
            }
            _ => tasks.push(TransferTask {
                path: path.clone(),
                kind: TaskKind::Upload,
            }),
        }
        Ok(())
    }

    /// A change on the remote side only
    async fn plan_remote_only(
        &self,
        folder: &SyncFolder,
        path: &RelativePath,
        remote: RemoteDelta,
        tasks: &mut Vec<TransferTask>,
    ) -> Result<()> {
        match remote.kind {
            ChangeKind::Deleted => tasks.push(TransferTask {
                path: path.clone(),
                kind: TaskKind::DeleteLocal,
            }),
            _ if remote.is_directory => {
                let local_dir = folder.local_root().join_relative(path);
                self.local_fs.create_directory(&local_dir).await?;

                let entry = FileEntry::new_directory(
                    folder.id(),
                    path.clone(),
                    remote.modified,
                    FileStatus::Synced,
                );
                self.store.upsert_file(&entry).await?;
            }
            _ => tasks.push(TransferTask {
                path: path.clone(),
                kind: TaskKind::Download {
                    expected: remote.checksum,
                },
            }),
        }
        Ok(())
    }

    /// The same path changed on both sides
    async fn plan_both_sides(
        self: &Arc<Self>,
        folder: &SyncFolder,
        path: &RelativePath,
        local: LocalChange,
        remote: RemoteDelta,
        tasks: &mut Vec<TransferTask>,
        conflict_failures: &mut u32,
    ) -> Result<()> {
        match (local.kind, remote.kind) {
            // Gone on both sides: nothing left to mirror
            (ChangeKind::Deleted, ChangeKind::Deleted) => {
                self.store.delete_file(folder.id(), path).await?;
            }
            // A deletion opposing an edit loses; the surviving content is
            // re-transferred
            (ChangeKind::Deleted, _) => {
                if let Ok(Some(mut entry)) = self.store.get_file(folder.id(), path).await {
                    entry.mark_pending_download();
                    self.store.upsert_file(&entry).await?;
                }
                tasks.push(TransferTask {
                    path: path.clone(),
                    kind: TaskKind::Download {
                        expected: remote.checksum,
                    },
                });
            }
            (_, ChangeKind::Deleted) => {
                if let Ok(Some(mut entry)) = self.store.get_file(folder.id(), path).await {
                    entry.mark_pending_upload();
                    self.store.upsert_file(&entry).await?;
                }
                tasks.push(TransferTask {
                    path: path.clone(),
                    kind: TaskKind::Upload,
                });
            }
            // Both sides hold content
            _ => {
                // Directory pairs have no content to reconcile
                if local.is_directory || remote.is_directory {
                    let entry = FileEntry::new_directory(
                        folder.id(),
                        path.clone(),
                        local.modified,
                        FileStatus::Synced,
                    );
                    self.store.upsert_file(&entry).await?;
                    return Ok(());
                }

                let (Some(local_checksum), Some(remote_checksum)) =
                    (local.checksum.clone(), remote.checksum.clone())
                else {
                    // Without both checksums divergence cannot be judged;
                    // prefer the remote copy, which a re-scan will verify
                    tasks.push(TransferTask {
                        path: path.clone(),
                        kind: TaskKind::Download {
                            expected: remote.checksum,
                        },
                    });
                    return Ok(());
                };

                let stored = self.store.get_file(folder.id(), path).await?;
                let baseline = stored.as_ref().and_then(|e| e.checksum());

                match ConflictDetector::classify(baseline, &local_checksum, &remote_checksum) {
                    Divergence::Convergent => {
                        // Same content on both sides: reconcile silently
                        debug!(path = %path, "Convergent edits, no conflict");
                        let mut entry = stored.unwrap_or_else(|| {
                            FileEntry::new_file(
                                folder.id(),
                                path.clone(),
                                local.size,
                                local.modified,
                                None,
                                FileStatus::Synced,
                            )
                        });
                        entry.set_observed(local.size, local.modified);
                        entry.mark_synced(Some(local_checksum));
                        self.store.upsert_file(&entry).await?;
                    }
                    Divergence::OneSided(Side::Local) => {
                        tasks.push(TransferTask {
                            path: path.clone(),
                            kind: TaskKind::Upload,
                        });
                    }
                    Divergence::OneSided(Side::Remote) => {
                        tasks.push(TransferTask {
                            path: path.clone(),
                            kind: TaskKind::Download {
                                expected: Some(remote_checksum),
                            },
                        });
                    }
                    Divergence::Diverged => {
                        let resolved = self
                            .handle_divergence(
                                folder,
                                path,
                                &local,
                                &remote,
                                local_checksum,
                                remote_checksum,
                            )
                            .await?;
                        if !resolved {
                            *conflict_failures += 1;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds the conflict record and runs the folder's strategy; returns
    /// whether the resolution (or manual recording) succeeded
    async fn handle_divergence(
        self: &Arc<Self>,
        folder: &SyncFolder,
        path: &RelativePath,
        local: &LocalChange,
        remote: &RemoteDelta,
        local_checksum: Checksum,
        remote_checksum: Checksum,
    ) -> Result<bool> {
        let conflict = Conflict::new(
            folder.id(),
            path.clone(),
            local.modified,
            remote.modified,
            local_checksum,
            remote_checksum,
        );

        let _ = self.events.send(EngineEvent::ConflictDetected {
            folder_id: folder.id(),
            path: path.as_str().to_string(),
            local_modified: local.modified,
            remote_modified: remote.modified,
        });

        let outcome = decide(*folder.conflict_strategy(), local.modified, remote.modified);

        match self.resolver.apply(folder, conflict, outcome).await {
            Ok(report) => {
                for transfer in report.transfers {
                    let _ = self.events.send(EngineEvent::FileTransferred {
                        folder_id: folder.id(),
                        path: transfer.path.as_str().to_string(),
                        direction: transfer.direction,
                        size: transfer.size,
                    });
                }
                Ok(true)
            }
            Err(err) => {
                warn!(path = %path, error = %err, "Conflict resolution failed");
                let _ = self.events.send(EngineEvent::OperationFailed {
                    folder_id: folder.id(),
                    path: Some(path.as_str().to_string()),
                    kind: "conflict_resolution".to_string(),
                });
                Ok(false)
            }
        }
    }

    /// Runs the cycle's tasks on the shared worker pool; returns the number
    /// of failures
    async fn execute_tasks(self: &Arc<Self>, folder: &SyncFolder, tasks: Vec<TransferTask>) -> u32 {
        let mut join_set: JoinSet<TaskOutcome> = JoinSet::new();

        for task in tasks {
            let inner = self.clone();
            let folder = folder.clone();

            join_set.spawn(async move {
                // Worker pool slot first, then the per-path lock
                let _slot = match inner.transfer_slots.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        // Semaphore closed only at teardown; report the task
                        // as failed rather than panicking mid-shutdown
                        return TaskOutcome {
                            path: task.path,
                            ok: false,
                        };
                    }
                };

                let lock_key = format!("{}:{}", folder.id(), task.path);
                let path_lock = inner
                    .path_locks
                    .entry(lock_key.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                    .clone();
                let _path_guard = path_lock.lock().await;

                let ok = inner.execute_task(&folder, &task).await;

                drop(_path_guard);
                inner
                    .path_locks
                    .remove_if(&lock_key, |_, lock| Arc::strong_count(lock) <= 2);

                TaskOutcome {
                    path: task.path,
                    ok,
                }
            });
        }

        let mut failures = 0;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(outcome) => {
                    if !outcome.ok {
                        debug!(path = %outcome.path, "Task reported failure");
                        failures += 1;
                    }
                }
                Err(err) => {
                    error!(error = %err, "Transfer task panicked");
                    failures += 1;
                }
            }
        }

        failures
    }

    /// Executes one task through the retrying wrapper and persists the
    /// outcome; returns success
    async fn execute_task(&self, folder: &SyncFolder, task: &TransferTask) -> bool {
        let result = match &task.kind {
            TaskKind::Upload => self.do_upload(folder, &task.path).await,
            TaskKind::Download { expected } => {
                self.do_download(folder, &task.path, expected.as_ref()).await
            }
            TaskKind::DeleteRemote => self.do_delete_remote(folder, &task.path).await,
            TaskKind::DeleteLocal => self.do_delete_local(folder, &task.path).await,
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    folder_id = %folder.id(),
                    path = %task.path,
                    error = %err,
                    "Transfer task failed"
                );
                let _ = self.events.send(EngineEvent::OperationFailed {
                    folder_id: folder.id(),
                    path: Some(task.path.as_str().to_string()),
                    kind: err.kind,
                });
                false
            }
        }
    }

    /// Uploads a local file, verifies the landed checksum, reconciles the row
    async fn do_upload(&self, folder: &SyncFolder, path: &RelativePath) -> TaskResult {
        let local = folder.local_root().join_relative(path);
        let remote_path = folder.remote_root().join_relative(path);

        let local_checksum = self
            .local_fs
            .compute_checksum(&local)
            .await
            .map_err(|e| TaskError::new("local_io", e.to_string()))?;

        let mut uploaded = with_retry("upload", self.retry, || {
            self.remote.upload(&local, &remote_path)
        })
        .await
        .map_err(|e| TaskError::new(e.kind(), e.to_string()))?;

        // Integrity: the remote-reported checksum must match what we read.
        // One extra attempt for a mismatch, then surface it.
        if uploaded.checksum.as_ref().is_some_and(|c| *c != local_checksum) {
            warn!(path = %path, "Checksum mismatch after upload, retrying once");
            uploaded = with_retry("upload_integrity_retry", self.retry, || {
                self.remote.upload(&local, &remote_path)
            })
            .await
            .map_err(|e| TaskError::new(e.kind(), e.to_string()))?;

            if uploaded.checksum.as_ref().is_some_and(|c| *c != local_checksum) {
                return Err(TaskError::new(
                    "checksum_mismatch",
                    format!("upload of {path} landed with a different checksum"),
                ));
            }
        }

        let state = self
            .local_fs
            .get_state(&local)
            .await
            .map_err(|e| TaskError::new("local_io", e.to_string()))?;

        let mut entry = self
            .store
            .get_file(folder.id(), path)
            .await
            .map_err(|e| TaskError::new("store", e.to_string()))?
            .unwrap_or_else(|| {
                FileEntry::new_file(
                    folder.id(),
                    path.clone(),
                    state.size,
                    state.modified.unwrap_or_else(Utc::now),
                    None,
                    FileStatus::PendingUpload,
                )
            });
        entry.set_observed(state.size, state.modified.unwrap_or_else(Utc::now));
        entry.mark_synced(Some(local_checksum));
        self.store
            .upsert_file(&entry)
            .await
            .map_err(|e| TaskError::new("store", e.to_string()))?;

        let _ = self.events.send(EngineEvent::FileTransferred {
            folder_id: folder.id(),
            path: path.as_str().to_string(),
            direction: Direction::Upload,
            size: entry.size(),
        });

        Ok(())
    }

    /// Downloads a remote file, verifies the landed checksum, reconciles the row
    async fn do_download(
        &self,
        folder: &SyncFolder,
        path: &RelativePath,
        expected: Option<&Checksum>,
    ) -> TaskResult {
        let local = folder.local_root().join_relative(path);
        let remote_path = folder.remote_root().join_relative(path);

        with_retry("download", self.retry, || {
            self.remote.download(&remote_path, &local)
        })
        .await
        .map_err(|e| TaskError::new(e.kind(), e.to_string()))?;

        let mut landed = self
            .local_fs
            .compute_checksum(&local)
            .await
            .map_err(|e| TaskError::new("local_io", e.to_string()))?;

        // Integrity: one extra attempt for a mismatch, then surface it
        if expected.is_some_and(|c| *c != landed) {
            warn!(path = %path, "Checksum mismatch after download, retrying once");
            with_retry("download_integrity_retry", self.retry, || {
                self.remote.download(&remote_path, &local)
            })
            .await
            .map_err(|e| TaskError::new(e.kind(), e.to_string()))?;

            landed = self
                .local_fs
                .compute_checksum(&local)
                .await
                .map_err(|e| TaskError::new("local_io", e.to_string()))?;

            if expected.is_some_and(|c| *c != landed) {
                return Err(TaskError::new(
                    "checksum_mismatch",
                    format!("download of {path} landed with a different checksum"),
                ));
            }
        }

        let state = self
            .local_fs
            .get_state(&local)
            .await
            .map_err(|e| TaskError::new("local_io", e.to_string()))?;

        let mut entry = self
            .store
            .get_file(folder.id(), path)
            .await
            .map_err(|e| TaskError::new("store", e.to_string()))?
            .unwrap_or_else(|| {
                FileEntry::new_file(
                    folder.id(),
                    path.clone(),
                    state.size,
                    state.modified.unwrap_or_else(Utc::now),
                    None,
                    FileStatus::PendingDownload,
                )
            });
        entry.set_observed(state.size, state.modified.unwrap_or_else(Utc::now));
        entry.mark_synced(Some(landed));
        self.store
            .upsert_file(&entry)
            .await
            .map_err(|e| TaskError::new("store", e.to_string()))?;

        let _ = self.events.send(EngineEvent::FileTransferred {
            folder_id: folder.id(),
            path: path.as_str().to_string(),
            direction: Direction::Download,
            size: entry.size(),
        });

        Ok(())
    }

    /// Mirrors a local deletion to the remote replica
    async fn do_delete_remote(&self, folder: &SyncFolder, path: &RelativePath) -> TaskResult {
        let remote_path = folder.remote_root().join_relative(path);

        match with_retry("delete_remote", self.retry, || {
            self.remote.delete(&remote_path)
        })
        .await
        {
            Ok(()) => {}
            // Already gone remotely: the mirror is complete
            Err(driftsync_core::ports::RemoteStoreError::NotFound(_)) => {}
            Err(e) => return Err(TaskError::new(e.kind(), e.to_string())),
        }

        self.store
            .delete_file(folder.id(), path)
            .await
            .map_err(|e| TaskError::new("store", e.to_string()))?;

        debug!(path = %path, "Local deletion mirrored to remote");
        Ok(())
    }

    /// Mirrors a remote deletion to the local replica
    async fn do_delete_local(&self, folder: &SyncFolder, path: &RelativePath) -> TaskResult {
        let local = folder.local_root().join_relative(path);

        let state = self
            .local_fs
            .get_state(&local)
            .await
            .map_err(|e| TaskError::new("local_io", e.to_string()))?;
        if state.exists {
            self.local_fs
                .delete(&local)
                .await
                .map_err(|e| TaskError::new("local_io", e.to_string()))?;
        }

        self.store
            .delete_file(folder.id(), path)
            .await
            .map_err(|e| TaskError::new("store", e.to_string()))?;

        debug!(path = %path, "Remote deletion mirrored locally");
        Ok(())
    }

    // --- status helpers ---

    fn set_cycle_state(&self, runtime: &FolderRuntime, state: CycleState) {
        let mut guard = match runtime.cycle_state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = state;
    }

    fn cycle_state_name(&self, folder_id: FolderId) -> &'static str {
        self.runtimes
            .get(&folder_id)
            .map(|runtime| {
                let guard = match runtime.cycle_state.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.name()
            })
            .unwrap_or("idle")
    }

    /// Emits a sync-state-changed event with fresh pending counters
    async fn emit_state(&self, folder: &SyncFolder, status: &str) {
        let (pending_uploads, pending_downloads) = self
            .store
            .count_pending(folder.id())
            .await
            .unwrap_or((0, 0));

        let _ = self.events.send(EngineEvent::SyncStateChanged {
            folder_id: folder.id(),
            status: status.to_string(),
            pending_uploads,
            pending_downloads,
        });
    }
}

/// Error kind + message for a failed transfer task
struct TaskError {
    kind: String,
    message: String,
}

impl TaskError {
    fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

type TaskResult = std::result::Result<(), TaskError>;

// ============================================================================
// Command handling
// ============================================================================

impl EngineInner {
    /// Dispatches one command from the shell boundary
    async fn handle_command(self: &Arc<Self>, command: Command) -> CommandReply {
        debug!(?command, "Handling command");

        let result = match command {
            Command::AddFolder {
                local_root,
                remote_root,
            } => self.cmd_add_folder(local_root, remote_root).await,
            Command::RemoveFolder { folder_id } => self.cmd_remove_folder(folder_id).await,
            Command::PauseFolder { folder_id } => self.cmd_pause_folder(folder_id).await,
            Command::ResumeFolder { folder_id } => self.cmd_resume_folder(folder_id).await,
            Command::SetConflictStrategy {
                folder_id,
                strategy,
            } => self.cmd_set_strategy(folder_id, strategy).await,
            Command::GetFolderList => self.cmd_folder_list().await,
            Command::GetSyncState { folder_id } => self.cmd_sync_state(folder_id).await,
            Command::GetPendingConflicts { folder_id } => {
                self.cmd_pending_conflicts(folder_id).await
            }
            Command::ResolveConflict {
                conflict_id,
                resolution,
            } => self.cmd_resolve_conflict(conflict_id, resolution).await,
        };

        result.unwrap_or_else(|err| CommandReply::Error {
            message: format!("{err:#}"),
        })
    }

    async fn cmd_add_folder(
        self: &Arc<Self>,
        local_root: std::path::PathBuf,
        remote_root: String,
    ) -> Result<CommandReply> {
        let local_root = LocalPath::new(local_root).context("Invalid local root")?;
        let remote_root = RemotePath::new(remote_root).context("Invalid remote root")?;

        let state = self
            .local_fs
            .get_state(&local_root)
            .await
            .context("Failed to inspect local root")?;
        if !state.is_directory() {
            anyhow::bail!("Local root is not an existing directory: {local_root}");
        }

        // Local roots are unique across folders
        if self
            .store
            .get_folder_by_root(&local_root)
            .await?
            .is_some()
        {
            anyhow::bail!("A sync folder already watches {local_root}");
        }

        let strategy: ConflictStrategy = self
            .config
            .conflicts
            .default_strategy
            .parse()
            .unwrap_or(ConflictStrategy::LastWriteWins);

        let folder = SyncFolder::new(local_root, remote_root, strategy);
        self.store.save_folder(&folder).await?;
        self.store
            .save_sync_state(&SyncState::new(folder.id()))
            .await?;

        self.spawn_folder(&folder);
        self.emit_state(&folder, "idle").await;

        info!(folder_id = %folder.id(), "Folder added");
        Ok(CommandReply::FolderAdded {
            folder_id: folder.id(),
        })
    }

    async fn cmd_remove_folder(self: &Arc<Self>, folder_id: FolderId) -> Result<CommandReply> {
        let folder = self
            .store
            .get_folder(folder_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No folder with id {folder_id}"))?;

        // Pause semantics plus watcher unregistration; in-flight transfers
        // complete or fail through the retry wrapper on their own
        if let Some((_, runtime)) = self.runtimes.remove(&folder_id) {
            runtime.cancel.cancel();
            self.release_watch(&runtime);
        }

        // Cascades to files, conflicts, and the sync-state row
        self.store.delete_folder(folder_id).await?;

        let _ = self.events.send(EngineEvent::SyncStateChanged {
            folder_id,
            status: "removed".to_string(),
            pending_uploads: 0,
            pending_downloads: 0,
        });

        info!(%folder_id, root = %folder.local_root(), "Folder removed");
        Ok(CommandReply::Ack)
    }

    async fn cmd_pause_folder(self: &Arc<Self>, folder_id: FolderId) -> Result<CommandReply> {
        let mut folder = self
            .store
            .get_folder(folder_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No folder with id {folder_id}"))?;

        folder.pause().context("Cannot pause folder")?;
        self.store.save_folder(&folder).await?;
        self.emit_state(&folder, "paused").await;

        info!(%folder_id, "Folder paused");
        Ok(CommandReply::Ack)
    }

    async fn cmd_resume_folder(self: &Arc<Self>, folder_id: FolderId) -> Result<CommandReply> {
        let mut folder = self
            .store
            .get_folder(folder_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No folder with id {folder_id}"))?;

        folder.resume().context("Cannot resume folder")?;
        self.store.save_folder(&folder).await?;

        // Restart the cycle immediately rather than waiting a full interval
        if let Some(runtime) = self.runtimes.get(&folder_id) {
            runtime.signal.notify_one();
        }
        self.emit_state(&folder, "idle").await;

        info!(%folder_id, "Folder resumed");
        Ok(CommandReply::Ack)
    }

    async fn cmd_set_strategy(
        self: &Arc<Self>,
        folder_id: FolderId,
        strategy: ConflictStrategy,
    ) -> Result<CommandReply> {
        let mut folder = self
            .store
            .get_folder(folder_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No folder with id {folder_id}"))?;

        folder.set_conflict_strategy(strategy);
        self.store.save_folder(&folder).await?;
        self.emit_state(&folder, folder.status().name()).await;

        info!(%folder_id, %strategy, "Conflict strategy updated");
        Ok(CommandReply::Ack)
    }

    async fn cmd_folder_list(self: &Arc<Self>) -> Result<CommandReply> {
        let folders = self.store.list_folders().await?;
        let summaries = folders
            .iter()
            .map(|f| FolderSummary {
                folder_id: f.id(),
                local_root: f.local_root().as_path().clone(),
                remote_root: f.remote_root().as_str().to_string(),
                status: f.status().name().to_string(),
                conflict_strategy: *f.conflict_strategy(),
                last_synced_at: f.last_synced_at(),
            })
            .collect();

        Ok(CommandReply::FolderList { folders: summaries })
    }

    async fn cmd_sync_state(self: &Arc<Self>, folder_id: FolderId) -> Result<CommandReply> {
        let folder = self
            .store
            .get_folder(folder_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No folder with id {folder_id}"))?;

        let (pending_uploads, pending_downloads) = self.store.count_pending(folder_id).await?;

        // Active folders report their in-cycle state; paused and error
        // folders report their lifecycle status
        let status = match folder.status() {
            driftsync_core::domain::FolderStatus::Active => {
                self.cycle_state_name(folder_id).to_string()
            }
            other => other.name().to_string(),
        };

        Ok(CommandReply::SyncState(SyncStateSummary {
            folder_id,
            status,
            pending_uploads,
            pending_downloads,
            last_synced_at: folder.last_synced_at(),
        }))
    }

    async fn cmd_pending_conflicts(self: &Arc<Self>, folder_id: FolderId) -> Result<CommandReply> {
        let conflicts = self.store.unresolved_conflicts(folder_id).await?;
        let summaries = conflicts
            .iter()
            .map(|c| ConflictSummary {
                conflict_id: c.id(),
                folder_id: c.folder_id(),
                path: c.path().as_str().to_string(),
                local_modified: c.local_modified(),
                remote_modified: c.remote_modified(),
                detected_at: c.detected_at(),
            })
            .collect();

        Ok(CommandReply::PendingConflicts {
            conflicts: summaries,
        })
    }

    async fn cmd_resolve_conflict(
        self: &Arc<Self>,
        conflict_id: driftsync_core::domain::newtypes::ConflictId,
        resolution: ManualResolution,
    ) -> Result<CommandReply> {
        // Only an unresolved conflict can accept a decision
        let conflict = match self.store.get_conflict(conflict_id).await? {
            Some(c) if !c.is_resolved() => c,
            _ => {
                return Err(ConflictError::NoSuchConflict(conflict_id.to_string()).into());
            }
        };

        let folder = self
            .store
            .get_folder(conflict.folder_id())
            .await?
            .ok_or_else(|| anyhow::anyhow!("Conflict {conflict_id} has no live folder"))?;

        let outcome = match resolution {
            ManualResolution::Local => {
                ConflictOutcome::UploadLocal(ConflictResolution::ManualLocal)
            }
            ManualResolution::Remote => {
                ConflictOutcome::DownloadRemote(ConflictResolution::ManualRemote)
            }
            ManualResolution::KeepBoth => ConflictOutcome::KeepBoth,
        };

        let report = self
            .resolver
            .apply(&folder, conflict, outcome)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        for transfer in report.transfers {
            let _ = self.events.send(EngineEvent::FileTransferred {
                folder_id: folder.id(),
                path: transfer.path.as_str().to_string(),
                direction: transfer.direction,
                size: transfer.size,
            });
        }
        self.emit_state(&folder, folder.status().name()).await;

        info!(%conflict_id, "Conflict resolved by user decision");
        Ok(CommandReply::Ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_state_names() {
        assert_eq!(CycleState::Idle.name(), "idle");
        assert_eq!(CycleState::Scanning.name(), "scanning");
        assert_eq!(CycleState::Uploading.name(), "uploading");
        assert_eq!(CycleState::Downloading.name(), "downloading");
    }

    #[test]
    fn test_task_error_display() {
        let err = TaskError::new("timeout", "remote took too long");
        assert_eq!(err.to_string(), "[timeout] remote took too long");
    }
}
