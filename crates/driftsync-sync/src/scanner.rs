//! Change detection
//!
//! The [`ChangeScanner`] turns filesystem walks and remote "changes since"
//! responses into deltas against the metadata store:
//!
//! - [`scan_local`](ChangeScanner::scan_local) walks the folder's local
//!   root, compares each path against its stored entry, and returns the
//!   paths whose local state differs from the last known synced state.
//! - [`fetch_remote`](ChangeScanner::fetch_remote) queries the remote
//!   store through the retrying wrapper, filters to the folder's remote
//!   root, and returns the analogous remote delta.
//!
//! Both entry points mark the affected file rows with the appropriate
//! pending status before the orchestrator enqueues transfer work: the
//! store is the single source of truth for "what still needs
//! transferring", so a crash and restart resumes from stored pending state
//! rather than re-diffing from scratch. A full re-scan remains safe and
//! idempotent.
//!
//! The stored baseline checksum of an entry is never overwritten while a
//! transfer is pending; it is the reference the conflict engine diffs both
//! sides against.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use driftsync_core::domain::newtypes::{Checksum, LocalPath, RelativePath};
use driftsync_core::domain::{FileEntry, FileStatus, SyncFolder};
use driftsync_core::ports::{ILocalFileSystem, IRemoteStore, IStateRepository};

use crate::retry::{with_retry, RetryPolicy};

// ============================================================================
// Delta types
// ============================================================================

/// What happened to a path, relative to the stored metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The path exists but has no stored entry
    Created,
    /// The path's content differs from the stored baseline
    Modified,
    /// A stored entry's path no longer exists
    Deleted,
}

/// A detected change on the local replica
#[derive(Debug, Clone)]
pub struct LocalChange {
    /// Folder-relative path
    pub path: RelativePath,
    /// What happened
    pub kind: ChangeKind,
    /// Size in bytes (0 for directories and deletions)
    pub size: u64,
    /// Local modification time (deletion time is approximated by `now`)
    pub modified: DateTime<Utc>,
    /// Current local checksum (None for directories and deletions)
    pub checksum: Option<Checksum>,
    /// Whether the path is a directory
    pub is_directory: bool,
}

/// A detected change on the remote replica
#[derive(Debug, Clone)]
pub struct RemoteDelta {
    /// Folder-relative path
    pub path: RelativePath,
    /// What happened
    pub kind: ChangeKind,
    /// Size in bytes after the change
    pub size: u64,
    /// Remote modification time
    pub modified: DateTime<Utc>,
    /// Remote checksum after the change (None for directories/deletions)
    pub checksum: Option<Checksum>,
    /// Whether the path is a directory
    pub is_directory: bool,
}

// ============================================================================
// ChangeScanner
// ============================================================================

/// Local and remote change detection against the metadata store
pub struct ChangeScanner {
    store: Arc<dyn IStateRepository>,
    local_fs: Arc<dyn ILocalFileSystem>,
    remote: Arc<dyn IRemoteStore>,
    retry: RetryPolicy,
}

impl ChangeScanner {
    /// Creates a scanner over the given ports
    pub fn new(
        store: Arc<dyn IStateRepository>,
        local_fs: Arc<dyn ILocalFileSystem>,
        remote: Arc<dyn IRemoteStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            local_fs,
            remote,
            retry,
        }
    }

    // ========================================================================
    // Local scan
    // ========================================================================

    /// Walks the folder's local root and returns the local delta
    ///
    /// Unchanged files (same size and modification time as the stored
    /// entry) skip checksum computation entirely. A changed modification
    /// time with an identical checksum is recorded in the store without
    /// being reported as a change, so no transfer is triggered.
    #[instrument(skip(self, folder), fields(folder_id = %folder.id()))]
    pub async fn scan_local(&self, folder: &SyncFolder) -> Result<Vec<LocalChange>> {
        let root = folder.local_root();
        let mut changes = Vec::new();
        let mut seen: HashSet<RelativePath> = HashSet::new();

        // Iterative walk; directories found on disk are pushed and drained
        let mut pending_dirs = vec![root.as_path().clone()];

        while let Some(dir) = pending_dirs.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                let local_path = match LocalPath::new(entry_path.clone()) {
                    Ok(p) => p,
                    Err(err) => {
                        warn!(path = ?entry_path, %err, "Skipping invalid path");
                        continue;
                    }
                };
                let relative = match local_path.relative_to(root) {
                    Ok(r) => r,
                    Err(err) => {
                        warn!(path = ?entry_path, %err, "Skipping path outside root");
                        continue;
                    }
                };

                let metadata = entry.metadata().await?;

                if metadata.is_dir() {
                    pending_dirs.push(entry_path);
                    seen.insert(relative.clone());

                    let stored = self.store.get_file(folder.id(), &relative).await?;
                    if stored.is_none() {
                        changes.push(LocalChange {
                            path: relative,
                            kind: ChangeKind::Created,
                            size: 0,
                            modified: Utc::now(),
                            checksum: None,
                            is_directory: true,
                        });
                    }
                    continue;
                }

                if !metadata.is_file() {
                    debug!(path = %local_path, "Skipping special file");
                    continue;
                }

                seen.insert(relative.clone());

                let size = metadata.len();
                let modified: DateTime<Utc> = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());

                let stored = self.store.get_file(folder.id(), &relative).await?;

                match stored {
                    None => {
                        let checksum = self.local_fs.compute_checksum(&local_path).await?;

                        let entry = FileEntry::new_file(
                            folder.id(),
                            relative.clone(),
                            size,
                            modified,
                            None, // no baseline until first reconciliation
                            FileStatus::PendingUpload,
                        );
                        self.store.upsert_file(&entry).await?;

                        changes.push(LocalChange {
                            path: relative,
                            kind: ChangeKind::Created,
                            size,
                            modified,
                            checksum: Some(checksum),
                            is_directory: false,
                        });
                    }
                    Some(stored_entry) => {
                        // An unresolved conflict freezes the path: neither
                        // side moves until a resolution is applied
                        if stored_entry.status() == FileStatus::Conflict {
                            continue;
                        }

                        // Same size and mtime as the stored row: unchanged,
                        // skip the checksum entirely
                        if stored_entry.size() == size && stored_entry.modified_at() == modified {
                            continue;
                        }

                        let checksum = self.local_fs.compute_checksum(&local_path).await?;

                        if stored_entry.checksum() == Some(&checksum) {
                            // Touched but identical content: refresh the
                            // observed metadata, keep the status, no transfer
                            debug!(path = %relative, "Modified time changed, content identical");
                            let mut refreshed = stored_entry.clone();
                            refreshed.set_observed(size, modified);
                            self.store.upsert_file(&refreshed).await?;
                            continue;
                        }

                        let mut updated = stored_entry.clone();
                        updated.set_observed(size, modified);
                        updated.mark_pending_upload();
                        self.store.upsert_file(&updated).await?;

                        changes.push(LocalChange {
                            path: relative,
                            kind: ChangeKind::Modified,
                            size,
                            modified,
                            checksum: Some(checksum),
                            is_directory: false,
                        });
                    }
                }
            }
        }

        // Deletion sweep: stored entries whose path is gone from disk.
        // Entries pending download may not exist locally yet; their absence
        // is not a local deletion. Conflicted paths stay frozen.
        for stored in self.store.list_files(folder.id()).await? {
            if seen.contains(stored.path()) {
                continue;
            }
            if matches!(
                stored.status(),
                FileStatus::PendingDownload | FileStatus::Conflict
            ) {
                continue;
            }

            debug!(path = %stored.path(), "Local file deleted");
            changes.push(LocalChange {
                path: stored.path().clone(),
                kind: ChangeKind::Deleted,
                size: 0,
                modified: Utc::now(),
                checksum: None,
                is_directory: stored.is_directory(),
            });
        }

        debug!(changes = changes.len(), "Local scan complete");
        Ok(changes)
    }

    // ========================================================================
    // Remote poll
    // ========================================================================

    /// Queries remote changes since `since` and returns the remote delta
    ///
    /// The "changes since" call goes through the retrying wrapper. Results
    /// outside the folder's remote root are discarded; results whose
    /// checksum equals the stored baseline (our own uploads echoed back,
    /// or stale reports) are not changes.
    #[instrument(skip(self, folder), fields(folder_id = %folder.id()))]
    pub async fn fetch_remote(
        &self,
        folder: &SyncFolder,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteDelta>> {
        let raw = with_retry("changes_since", self.retry, || {
            self.remote.changes_since(since)
        })
        .await
        .context("Remote changes-since query failed")?;

        let mut deltas = Vec::new();

        for change in raw {
            let Some(relative) = folder.remote_root().relative_of(&change.path) else {
                continue; // outside this folder's remote root
            };

            let stored = self.store.get_file(folder.id(), &relative).await?;

            if change.is_deleted {
                let Some(stored_entry) = stored else {
                    continue; // deletion of a path we never tracked
                };
                deltas.push(RemoteDelta {
                    path: relative,
                    kind: ChangeKind::Deleted,
                    size: 0,
                    modified: change.modified,
                    checksum: None,
                    is_directory: stored_entry.is_directory(),
                });
                continue;
            }

            if change.is_directory {
                if stored.is_none() {
                    deltas.push(RemoteDelta {
                        path: relative,
                        kind: ChangeKind::Created,
                        size: 0,
                        modified: change.modified,
                        checksum: None,
                        is_directory: true,
                    });
                }
                continue;
            }

            match stored {
                None => {
                    let entry = FileEntry::new_file(
                        folder.id(),
                        relative.clone(),
                        change.size,
                        change.modified,
                        None, // no baseline until first reconciliation
                        FileStatus::PendingDownload,
                    );
                    self.store.upsert_file(&entry).await?;

                    deltas.push(RemoteDelta {
                        path: relative,
                        kind: ChangeKind::Created,
                        size: change.size,
                        modified: change.modified,
                        checksum: change.checksum,
                        is_directory: false,
                    });
                }
                Some(stored_entry) => {
                    // An unresolved conflict freezes the path
                    if stored_entry.status() == FileStatus::Conflict {
                        debug!(path = %relative, "Path frozen by unresolved conflict");
                        continue;
                    }

                    if change.checksum.is_some()
                        && change.checksum.as_ref() == stored_entry.checksum()
                    {
                        debug!(path = %relative, "Remote change matches baseline, skipping");
                        continue;
                    }

                    let mut updated = stored_entry.clone();
                    updated.mark_pending_download();
                    self.store.upsert_file(&updated).await?;

                    deltas.push(RemoteDelta {
                        path: relative,
                        kind: ChangeKind::Modified,
                        size: change.size,
                        modified: change.modified,
                        checksum: change.checksum,
                        is_directory: false,
                    });
                }
            }
        }

        debug!(changes = deltas.len(), "Remote poll complete");
        Ok(deltas)
    }
}

// ============================================================================
// Tests
// ============================================================================
