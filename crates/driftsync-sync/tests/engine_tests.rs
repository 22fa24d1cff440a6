//! End-to-end tests for the sync orchestrator
//!
//! Each test wires a real orchestrator over a temp directory, an in-memory
//! SQLite store, and the in-memory remote store, then drives it through the
//! command boundary exactly as a shell would. Cycles run on a short poll
//! interval; assertions poll for convergence instead of assuming timing.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use driftsync_core::config::Config;
use driftsync_core::domain::conflict::ConflictStrategy;
use driftsync_core::domain::newtypes::{FolderId, RelativePath, RemotePath};
use driftsync_core::domain::{ConflictResolution, FileStatus};
use driftsync_core::ports::{IRemoteStore, IStateRepository, RemoteStoreError};
use driftsync_ipc::{ClientError, Direction, EngineClient, EngineEvent, ManualResolution};
use driftsync_store::{DatabasePool, SqliteStateRepository};
use driftsync_sync::{InMemoryRemoteStore, LocalFileSystemAdapter, Orchestrator};

const CONVERGENCE_DEADLINE: Duration = Duration::from_secs(15);

struct Harness {
    dir: TempDir,
    store: Arc<dyn IStateRepository>,
    remote: Arc<InMemoryRemoteStore>,
    client: EngineClient,
    shutdown: CancellationToken,
}

impl Harness {
    async fn start(default_strategy: &str) -> Self {
        let dir = TempDir::new().unwrap();

        let mut config = Config::default();
        config.sync.poll_interval_secs = 1;
        config.sync.debounce_ms = 50;
        config.retry.initial_delay_ms = 5;
        config.conflicts.default_strategy = default_strategy.to_string();

        let pool = DatabasePool::in_memory().await.unwrap();
        let store: Arc<dyn IStateRepository> =
            Arc::new(SqliteStateRepository::new(pool.pool().clone()));
        let remote = Arc::new(InMemoryRemoteStore::new());
        let local_fs = Arc::new(LocalFileSystemAdapter::new());

        let (client, endpoint) = driftsync_ipc::client::channel();
        let shutdown = CancellationToken::new();

        let orchestrator = Orchestrator::new(
            config,
            store.clone(),
            remote.clone() as Arc<dyn IRemoteStore>,
            local_fs,
            endpoint,
            shutdown.clone(),
        )
        .unwrap();

        tokio::spawn(async move {
            let _ = orchestrator.run().await;
        });

        Self {
            dir,
            store,
            remote,
            client,
            shutdown,
        }
    }

    async fn add_folder(&self) -> FolderId {
        self.client
            .add_folder(PathBuf::from(self.dir.path()), "/backup".to_string())
            .await
            .expect("add_folder should succeed")
    }

    async fn write_local(&self, path: &str, content: &[u8]) {
        let full = self.dir.path().join(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(&full, content).await.unwrap();
    }

    fn remote_path(&self, path: &str) -> RemotePath {
        RemotePath::new(format!("/backup/{path}")).unwrap()
    }

    fn rel(path: &str) -> RelativePath {
        RelativePath::new(path.to_string()).unwrap()
    }

    /// Polls until `check` returns true or the deadline passes
    async fn wait_until<F, Fut>(&self, what: &str, check: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + CONVERGENCE_DEADLINE;
        loop {
            if check().await {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("Timed out waiting for: {what}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ----------------------------------------------------------------------
// Clean upload
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_clean_upload_of_new_local_file() {
    let h = Harness::start("last_write_wins").await;
    let mut events = h.client.subscribe();

    h.write_local("report.pdf", b"quarterly numbers").await;
    let folder_id = h.add_folder().await;

    // The file lands remotely and the entry ends up synced
    h.wait_until("report.pdf uploaded", || async {
        h.remote.has_file(&h.remote_path("report.pdf"))
    })
    .await;

    h.wait_until("entry synced", || async {
        matches!(
            h.store
                .get_file(folder_id, &Harness::rel("report.pdf"))
                .await
                .unwrap(),
            Some(entry) if entry.status() == FileStatus::Synced && entry.checksum().is_some()
        )
    })
    .await;

    assert_eq!(
        h.remote.file_data(&h.remote_path("report.pdf")).unwrap(),
        b"quarterly numbers"
    );

    // A file-transferred event with the upload direction was pushed
    let mut saw_upload = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::FileTransferred {
            path, direction, ..
        } = event
        {
            if path == "report.pdf" && direction == Direction::Upload {
                saw_upload = true;
            }
        }
    }
    assert!(saw_upload, "expected a file_transferred upload event");
}

// ----------------------------------------------------------------------
// Clean download and delete mirroring
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_file_downloaded_locally() {
    let h = Harness::start("last_write_wins").await;

    h.remote
        .put_file(&h.remote_path("docs/spec.txt"), b"from the remote", Utc::now());
    let folder_id = h.add_folder().await;

    h.wait_until("spec.txt downloaded", || async {
        tokio::fs::read(h.dir.path().join("docs/spec.txt"))
            .await
            .map(|data| data == b"from the remote")
            .unwrap_or(false)
    })
    .await;

    h.wait_until("entry synced", || async {
        matches!(
            h.store
                .get_file(folder_id, &Harness::rel("docs/spec.txt"))
                .await
                .unwrap(),
            Some(entry) if entry.status() == FileStatus::Synced
        )
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_local_deletion_mirrors_to_remote() {
    let h = Harness::start("last_write_wins").await;

    h.write_local("doomed.txt", b"temporary").await;
    let folder_id = h.add_folder().await;

    h.wait_until("doomed.txt uploaded", || async {
        h.remote.has_file(&h.remote_path("doomed.txt"))
    })
    .await;

    tokio::fs::remove_file(h.dir.path().join("doomed.txt"))
        .await
        .unwrap();

    h.wait_until("remote copy deleted", || async {
        !h.remote.has_file(&h.remote_path("doomed.txt"))
    })
    .await;

    h.wait_until("entry removed", || async {
        h.store
            .get_file(folder_id, &Harness::rel("doomed.txt"))
            .await
            .unwrap()
            .is_none()
    })
    .await;
}

// ----------------------------------------------------------------------
// Conflict via last_write_wins
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_conflict_last_write_wins_remote_newer() {
    let h = Harness::start("last_write_wins").await;
    let mut events = h.client.subscribe();

    // Reconcile a baseline first
    h.write_local("data.xlsx", b"baseline v1").await;
    let folder_id = h.add_folder().await;
    h.wait_until("baseline synced", || async {
        matches!(
            h.store
                .get_file(folder_id, &Harness::rel("data.xlsx"))
                .await
                .unwrap(),
            Some(entry) if entry.status() == FileStatus::Synced
        )
    })
    .await;

    // Diverge: local edit, then a later remote edit
    h.write_local("data.xlsx", b"local edit at T+2").await;
    h.remote.put_file(
        &h.remote_path("data.xlsx"),
        b"remote edit at T+5",
        Utc::now() + chrono::Duration::seconds(5),
    );

    // Remote is newer: resolution downloads the remote version
    h.wait_until("remote version wins locally", || async {
        tokio::fs::read(h.dir.path().join("data.xlsx"))
            .await
            .map(|data| data == b"remote edit at T+5")
            .unwrap_or(false)
    })
    .await;

    // The conflict record carries the last_write_wins resolution and is
    // retained as an audit record
    h.wait_until("conflict recorded as last_write_wins", || async {
        h.store
            .list_conflicts(folder_id)
            .await
            .unwrap()
            .iter()
            .any(|c| {
                c.path().as_str() == "data.xlsx"
                    && c.resolution() == ConflictResolution::LastWriteWins
                    && c.resolved_at().is_some()
            })
    })
    .await;

    let mut saw_conflict_event = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::ConflictDetected { path, .. } = &event {
            if path == "data.xlsx" {
                saw_conflict_event = true;
            }
        }
    }
    assert!(saw_conflict_event, "expected a conflict_detected event");

    // Nothing left unresolved
    let conflicts = h.client.pending_conflicts(folder_id).await.unwrap();
    assert!(conflicts.is_empty(), "no unresolved conflicts expected");

    // The baseline advanced to the winning (remote) side's checksum
    let entry = h
        .store
        .get_file(folder_id, &Harness::rel("data.xlsx"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status(), FileStatus::Synced);
}

// ----------------------------------------------------------------------
// Convergent edits are not conflicts
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_convergent_edits_produce_no_conflict() {
    let h = Harness::start("manual").await;

    h.write_local("same.txt", b"baseline").await;
    let folder_id = h.add_folder().await;
    h.wait_until("baseline synced", || async {
        matches!(
            h.store
                .get_file(folder_id, &Harness::rel("same.txt"))
                .await
                .unwrap(),
            Some(entry) if entry.status() == FileStatus::Synced
        )
    })
    .await;

    // Both sides change to identical content
    h.write_local("same.txt", b"identical edit").await;
    h.remote.put_file(
        &h.remote_path("same.txt"),
        b"identical edit",
        Utc::now() + chrono::Duration::seconds(3),
    );

    h.wait_until("entry reconciled", || async {
        matches!(
            h.store
                .get_file(folder_id, &Harness::rel("same.txt"))
                .await
                .unwrap(),
            Some(entry) if entry.status() == FileStatus::Synced
                && entry.checksum().is_some()
        )
    })
    .await;

    // Even under the manual strategy nothing was recorded: convergent
    // edits are not conflicts
    let conflicts = h.store.unresolved_conflicts(folder_id).await.unwrap();
    assert!(conflicts.is_empty());
}

// ----------------------------------------------------------------------
// Manual conflicts through the command boundary
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_manual_conflict_surfaced_and_resolved_by_user() {
    let h = Harness::start("manual").await;

    h.write_local("contested.txt", b"baseline").await;
    let folder_id = h.add_folder().await;
    h.wait_until("baseline synced", || async {
        matches!(
            h.store
                .get_file(folder_id, &Harness::rel("contested.txt"))
                .await
                .unwrap(),
            Some(entry) if entry.status() == FileStatus::Synced
        )
    })
    .await;

    h.write_local("contested.txt", b"local change").await;
    h.remote.put_file(
        &h.remote_path("contested.txt"),
        b"remote change",
        Utc::now() + chrono::Duration::seconds(3),
    );

    // The conflict surfaces as unresolved; the engine takes no transfer
    // action on its own
    h.wait_until("conflict surfaced", || async {
        !h.client
            .pending_conflicts(folder_id)
            .await
            .unwrap()
            .is_empty()
    })
    .await;

    let local_before = tokio::fs::read(h.dir.path().join("contested.txt"))
        .await
        .unwrap();
    assert_eq!(local_before, b"local change");

    // The user picks the local side
    let conflicts = h.client.pending_conflicts(folder_id).await.unwrap();
    h.client
        .resolve_conflict(conflicts[0].conflict_id, ManualResolution::Local)
        .await
        .unwrap();

    h.wait_until("remote converges to local", || async {
        h.remote
            .file_data(&h.remote_path("contested.txt"))
            .map(|data| data == b"local change")
            .unwrap_or(false)
    })
    .await;

    assert!(h
        .client
        .pending_conflicts(folder_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resolving_unknown_conflict_fails() {
    let h = Harness::start("manual").await;
    h.add_folder().await;

    let bogus = driftsync_core::domain::newtypes::ConflictId::new();
    let result = h
        .client
        .resolve_conflict(bogus, ManualResolution::Remote)
        .await;

    match result {
        Err(ClientError::Rejected(message)) => {
            assert!(message.contains("No unresolved conflict"), "message: {message}");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

// ----------------------------------------------------------------------
// Keep-both through the command boundary
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_keep_both_preserves_local_and_lands_remote_copy() {
    let h = Harness::start("keep_both").await;

    h.write_local("both.txt", b"baseline").await;
    let folder_id = h.add_folder().await;
    h.wait_until("baseline synced", || async {
        matches!(
            h.store
                .get_file(folder_id, &Harness::rel("both.txt"))
                .await
                .unwrap(),
            Some(entry) if entry.status() == FileStatus::Synced
        )
    })
    .await;

    h.write_local("both.txt", b"local fork").await;
    h.remote.put_file(
        &h.remote_path("both.txt"),
        b"remote fork",
        Utc::now() + chrono::Duration::seconds(3),
    );

    // The remote fork lands under a distinct conflict-copy path
    h.wait_until("conflict copy created", || async {
        h.store
            .list_files(folder_id)
            .await
            .unwrap()
            .iter()
            .any(|e| e.path().as_str().contains("remote copy"))
    })
    .await;

    // The local file was never deleted or overwritten
    let local = tokio::fs::read(h.dir.path().join("both.txt")).await.unwrap();
    assert_eq!(local, b"local fork");

    // The conflict resolved as keep_both
    let entries = h.store.list_files(folder_id).await.unwrap();
    let copy = entries
        .iter()
        .find(|e| e.path().as_str().contains("remote copy"))
        .unwrap();
    let copy_on_disk = tokio::fs::read(h.dir.path().join(copy.path().as_str()))
        .await
        .unwrap();
    assert_eq!(copy_on_disk, b"remote fork");
}

// ----------------------------------------------------------------------
// Exhausted retry
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_exhausted_download_retry_leaves_entry_pending() {
    let h = Harness::start("last_write_wins").await;
    let mut events = h.client.subscribe();

    // Every download attempt in the first task fails transiently
    h.remote
        .inject_download_failure(RemoteStoreError::Timeout("attempt 1".into()));
    h.remote
        .inject_download_failure(RemoteStoreError::Timeout("attempt 2".into()));
    h.remote
        .inject_download_failure(RemoteStoreError::Timeout("attempt 3".into()));

    h.remote
        .put_file(&h.remote_path("flaky.bin"), b"eventually arrives", Utc::now());
    let folder_id = h.add_folder().await;

    // The wrapper gives up after three attempts and surfaces the failure
    let mut saw_failure = false;
    let deadline = tokio::time::Instant::now() + CONVERGENCE_DEADLINE;
    while tokio::time::Instant::now() < deadline && !saw_failure {
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Ok(EngineEvent::OperationFailed { path, kind, .. })) => {
                if path.as_deref() == Some("flaky.bin") {
                    assert_eq!(kind, "timeout");
                    saw_failure = true;
                }
            }
            Ok(Ok(_)) => {}
            _ => {}
        }
    }
    assert!(saw_failure, "expected an operation_failed event");

    // Not synced after the exhausted attempt
    let entry = h
        .store
        .get_file(folder_id, &Harness::rel("flaky.bin"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status(), FileStatus::PendingDownload);

    // The failure queue is drained; a later cycle resumes from the stored
    // pending status and completes the download
    h.wait_until("download recovers", || async {
        matches!(
            h.store
                .get_file(folder_id, &Harness::rel("flaky.bin"))
                .await
                .unwrap(),
            Some(entry) if entry.status() == FileStatus::Synced
        )
    })
    .await;
}

// ----------------------------------------------------------------------
// Pause / resume
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_pause_stops_scans_resume_restarts() {
    let h = Harness::start("last_write_wins").await;
    let folder_id = h.add_folder().await;

    // Let the initial cycle finish, then pause
    h.wait_until("initial cycle done", || async {
        h.client
            .sync_state(folder_id)
            .await
            .map(|s| s.status == "idle")
            .unwrap_or(false)
    })
    .await;

    h.client.pause_folder(folder_id).await.unwrap();

    // Work created while paused is not picked up
    h.write_local("while-paused.txt", b"waiting").await;
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(!h.remote.has_file(&h.remote_path("while-paused.txt")));
    let state = h.client.sync_state(folder_id).await.unwrap();
    assert_eq!(state.status, "paused");

    // Resume restarts the timer-driven cycle from idle and catches up
    h.client.resume_folder(folder_id).await.unwrap();

    h.wait_until("paused work caught up", || async {
        h.remote.has_file(&h.remote_path("while-paused.txt"))
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_double_pause_is_rejected() {
    let h = Harness::start("last_write_wins").await;
    let folder_id = h.add_folder().await;

    h.client.pause_folder(folder_id).await.unwrap();
    let result = h.client.pause_folder(folder_id).await;
    assert!(matches!(result, Err(ClientError::Rejected(_))));
}

// ----------------------------------------------------------------------
// Folder lifecycle commands
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_add_folder_rejects_duplicate_root() {
    let h = Harness::start("last_write_wins").await;
    h.add_folder().await;

    let result = h
        .client
        .add_folder(PathBuf::from(h.dir.path()), "/other".to_string())
        .await;
    assert!(matches!(result, Err(ClientError::Rejected(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_add_folder_rejects_missing_root() {
    let h = Harness::start("last_write_wins").await;

    let result = h
        .client
        .add_folder(
            h.dir.path().join("does-not-exist"),
            "/backup".to_string(),
        )
        .await;
    assert!(matches!(result, Err(ClientError::Rejected(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remove_folder_cascades_metadata() {
    let h = Harness::start("last_write_wins").await;

    h.write_local("kept.txt", b"content").await;
    let folder_id = h.add_folder().await;
    h.wait_until("file synced", || async {
        matches!(
            h.store
                .get_file(folder_id, &Harness::rel("kept.txt"))
                .await
                .unwrap(),
            Some(entry) if entry.status() == FileStatus::Synced
        )
    })
    .await;

    h.client.remove_folder(folder_id).await.unwrap();

    let folders = h.client.folder_list().await.unwrap();
    assert!(folders.is_empty());
    assert!(h.store.list_files(folder_id).await.unwrap().is_empty());

    // Local and remote file content is untouched by removal
    assert!(h.dir.path().join("kept.txt").exists());
    assert!(h.remote.has_file(&h.remote_path("kept.txt")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_set_conflict_strategy_at_runtime() {
    let h = Harness::start("manual").await;
    let folder_id = h.add_folder().await;

    h.client
        .set_conflict_strategy(folder_id, ConflictStrategy::RemoteWins)
        .await
        .unwrap();

    let folders = h.client.folder_list().await.unwrap();
    assert_eq!(folders[0].conflict_strategy, ConflictStrategy::RemoteWins);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sync_state_reports_counters_and_last_sync() {
    let h = Harness::start("last_write_wins").await;

    h.write_local("a.txt", b"one").await;
    let folder_id = h.add_folder().await;

    h.wait_until("cycle completed", || async {
        h.client
            .sync_state(folder_id)
            .await
            .map(|s| s.last_synced_at.is_some() && s.pending_uploads == 0)
            .unwrap_or(false)
    })
    .await;

    let state = h.client.sync_state(folder_id).await.unwrap();
    assert_eq!(state.folder_id, folder_id);
    assert_eq!(state.pending_downloads, 0);
}
