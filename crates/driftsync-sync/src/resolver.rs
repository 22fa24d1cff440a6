//! Conflict resolution execution
//!
//! Applies a [`ConflictOutcome`] decided by the conflict engine, performing
//! the actual transfers through the retrying wrapper:
//!
//! - `UploadLocal` - upload the local version over the remote one
//! - `DownloadRemote` - download the remote version over the local one
//! - `KeepBoth` - the remote version lands under a conflict-copy name next
//!   to the original; the local file is untouched and wins the original
//!   path on both replicas; both paths are tracked independently afterwards
//! - `Manual` - persist the conflict unresolved and mark the entry; no
//!   transfer until a decision arrives through the command boundary
//!
//! Every terminal resolution is stamped with a resolution time, and the
//! winning side's checksum becomes the entry's new reconciliation baseline
//! in the same store transaction.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use driftsync_conflict::{ConflictError, ConflictNamer, ConflictOutcome};
use driftsync_core::domain::newtypes::RelativePath;
use driftsync_core::domain::{Conflict, ConflictResolution, FileEntry, FileStatus, SyncFolder};
use driftsync_core::ports::{ILocalFileSystem, IRemoteStore, IStateRepository};
use driftsync_ipc::Direction;

use crate::retry::{with_retry, RetryPolicy};

/// A transfer performed while applying a resolution
#[derive(Debug, Clone)]
pub struct ResolutionTransfer {
    pub path: RelativePath,
    pub direction: Direction,
    pub size: u64,
}

/// What applying an outcome did
#[derive(Debug)]
pub struct ResolutionReport {
    /// The conflict record after applying the outcome; unresolved only for
    /// the manual outcome
    pub conflict: Conflict,
    /// Transfers performed, for event emission
    pub transfers: Vec<ResolutionTransfer>,
}

/// Executes conflict-engine outcomes with real transfers
pub struct ConflictResolver {
    store: Arc<dyn IStateRepository>,
    remote: Arc<dyn IRemoteStore>,
    local_fs: Arc<dyn ILocalFileSystem>,
    retry: RetryPolicy,
}

impl ConflictResolver {
    /// Creates a resolver over the given ports
    pub fn new(
        store: Arc<dyn IStateRepository>,
        remote: Arc<dyn IRemoteStore>,
        local_fs: Arc<dyn ILocalFileSystem>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            remote,
            local_fs,
            retry,
        }
    }

    /// Applies an outcome to a conflict
    ///
    /// # Errors
    /// Returns `ConflictError::AlreadyResolved` if the conflict has a
    /// terminal resolution, `ConflictError::ResolutionFailed` if a transfer
    /// or store write fails partway.
    pub async fn apply(
        &self,
        folder: &SyncFolder,
        mut conflict: Conflict,
        outcome: ConflictOutcome,
    ) -> Result<ResolutionReport, ConflictError> {
        if conflict.is_resolved() {
            return Err(ConflictError::AlreadyResolved(conflict.id().to_string()));
        }

        info!(
            conflict_id = %conflict.id(),
            folder_id = %conflict.folder_id(),
            path = %conflict.path(),
            ?outcome,
            "Applying conflict outcome"
        );

        match outcome {
            ConflictOutcome::Manual => self.record_manual(conflict).await,
            ConflictOutcome::UploadLocal(resolution) => {
                let transfer = self.upload_local(folder, &conflict).await?;

                let mut entry = self.entry_for(folder, conflict.path()).await?;
                entry.set_observed(transfer.size, conflict.local_modified());
                entry.mark_synced(Some(conflict.local_checksum().clone()));

                conflict.resolve(resolution);
                self.persist(&conflict, &entry).await?;

                Ok(ResolutionReport {
                    conflict,
                    transfers: vec![transfer],
                })
            }
            ConflictOutcome::DownloadRemote(resolution) => {
                let transfer = self.download_remote(folder, &conflict).await?;

                let mut entry = self.entry_for(folder, conflict.path()).await?;
                entry.set_observed(transfer.size, conflict.remote_modified());
                entry.mark_synced(Some(conflict.remote_checksum().clone()));

                conflict.resolve(resolution);
                self.persist(&conflict, &entry).await?;

                Ok(ResolutionReport {
                    conflict,
                    transfers: vec![transfer],
                })
            }
            ConflictOutcome::KeepBoth => self.keep_both(folder, conflict).await,
        }
    }

    // --- outcome bodies ---

    /// Records the conflict unresolved and marks the entry; the engine
    /// takes no transfer action until a decision is supplied
    async fn record_manual(
        &self,
        conflict: Conflict,
    ) -> Result<ResolutionReport, ConflictError> {
        self.store
            .save_conflict(&conflict)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("save conflict: {e}")))?;

        if let Ok(Some(mut entry)) = self
            .store
            .get_file(conflict.folder_id(), conflict.path())
            .await
        {
            entry.mark_conflict();
            self.store
                .upsert_file(&entry)
                .await
                .map_err(|e| ConflictError::ResolutionFailed(format!("mark entry: {e}")))?;
        }

        debug!(conflict_id = %conflict.id(), "Conflict recorded for manual resolution");

        Ok(ResolutionReport {
            conflict,
            transfers: Vec::new(),
        })
    }

    /// Uploads the local version over the remote one
    async fn upload_local(
        &self,
        folder: &SyncFolder,
        conflict: &Conflict,
    ) -> Result<ResolutionTransfer, ConflictError> {
        let local = folder.local_root().join_relative(conflict.path());
        let remote = folder.remote_root().join_relative(conflict.path());

        let uploaded = with_retry("resolve_upload", self.retry, || {
            self.remote.upload(&local, &remote)
        })
        .await
        .map_err(|e| ConflictError::ResolutionFailed(format!("upload: {e}")))?;

        Ok(ResolutionTransfer {
            path: conflict.path().clone(),
            direction: Direction::Upload,
            size: uploaded.size,
        })
    }

    /// Downloads the remote version over the local one
    async fn download_remote(
        &self,
        folder: &SyncFolder,
        conflict: &Conflict,
    ) -> Result<ResolutionTransfer, ConflictError> {
        let local = folder.local_root().join_relative(conflict.path());
        let remote = folder.remote_root().join_relative(conflict.path());

        with_retry("resolve_download", self.retry, || {
            self.remote.download(&remote, &local)
        })
        .await
        .map_err(|e| ConflictError::ResolutionFailed(format!("download: {e}")))?;

        let state = self
            .local_fs
            .get_state(&local)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("stat landed file: {e}")))?;

        Ok(ResolutionTransfer {
            path: conflict.path().clone(),
            direction: Direction::Download,
            size: state.size,
        })
    }

    /// Keep-both: download remote under a conflict-copy name, then converge
    /// both replicas
    ///
    /// The local file is never deleted or overwritten. The remote version
    /// lands under a distinct renamed path, which is then uploaded so both
    /// replicas hold both files; the local version wins the original path
    /// remotely.
    async fn keep_both(
        &self,
        folder: &SyncFolder,
        mut conflict: Conflict,
    ) -> Result<ResolutionReport, ConflictError> {
        let original = conflict.path().clone();
        let original_local = folder.local_root().join_relative(&original);

        // Name the copy next to the original, probing disk for collisions
        let parent_dir = original_local
            .as_path()
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| folder.local_root().as_path().clone());
        let copy_path =
            ConflictNamer::conflict_path(&original, |name| parent_dir.join(name).exists());

        let copy_local = folder.local_root().join_relative(&copy_path);
        let copy_remote = folder.remote_root().join_relative(&copy_path);
        let original_remote = folder.remote_root().join_relative(&original);

        // 1. Remote version lands under the renamed path locally
        with_retry("keep_both_download", self.retry, || {
            self.remote.download(&original_remote, &copy_local)
        })
        .await
        .map_err(|e| ConflictError::ResolutionFailed(format!("download remote copy: {e}")))?;

        // 2. Push the copy remotely so both replicas hold both files
        let copy_uploaded = with_retry("keep_both_upload_copy", self.retry, || {
            self.remote.upload(&copy_local, &copy_remote)
        })
        .await
        .map_err(|e| ConflictError::ResolutionFailed(format!("upload conflict copy: {e}")))?;

        // 3. The untouched local version wins the original path remotely
        let original_uploaded = with_retry("keep_both_upload_original", self.retry, || {
            self.remote.upload(&original_local, &original_remote)
        })
        .await
        .map_err(|e| ConflictError::ResolutionFailed(format!("upload local original: {e}")))?;

        // Both paths are independently tracked rows from here on
        let now = Utc::now();
        let copy_entry = FileEntry::new_file(
            folder.id(),
            copy_path.clone(),
            copy_uploaded.size,
            now,
            copy_uploaded.checksum.clone(),
            FileStatus::Synced,
        );
        self.store
            .upsert_file(&copy_entry)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("save copy entry: {e}")))?;

        let mut original_entry = self.entry_for(folder, &original).await?;
        original_entry.set_observed(original_uploaded.size, conflict.local_modified());
        original_entry.mark_synced(Some(conflict.local_checksum().clone()));

        conflict.resolve(ConflictResolution::KeepBoth);
        self.persist(&conflict, &original_entry).await?;

        info!(
            original = %original,
            conflict_copy = %copy_path,
            "Keep-both applied: local untouched, remote version copied aside"
        );

        Ok(ResolutionReport {
            conflict,
            transfers: vec![
                ResolutionTransfer {
                    path: copy_path.clone(),
                    direction: Direction::Download,
                    size: copy_uploaded.size,
                },
                ResolutionTransfer {
                    path: copy_path,
                    direction: Direction::Upload,
                    size: copy_uploaded.size,
                },
                ResolutionTransfer {
                    path: original,
                    direction: Direction::Upload,
                    size: original_uploaded.size,
                },
            ],
        })
    }

    // --- helpers ---

    /// Fetches the tracked entry for a path, or builds a fresh one
    async fn entry_for(
        &self,
        folder: &SyncFolder,
        path: &RelativePath,
    ) -> Result<FileEntry, ConflictError> {
        match self
            .store
            .get_file(folder.id(), path)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("load entry: {e}")))?
        {
            Some(entry) => Ok(entry),
            None => Ok(FileEntry::new_file(
                folder.id(),
                path.clone(),
                0,
                Utc::now(),
                None,
                FileStatus::Conflict,
            )),
        }
    }

    /// Persists the resolved conflict and the updated entry atomically
    async fn persist(&self, conflict: &Conflict, entry: &FileEntry) -> Result<(), ConflictError> {
        // Make sure the row exists for the UPDATE inside the transaction
        self.store.save_conflict(conflict).await.map_err(|e| {
            warn!(error = %e, "Failed to save conflict before resolution");
            ConflictError::ResolutionFailed(format!("save conflict: {e}"))
        })?;

        self.store
            .resolve_conflict(conflict, entry)
            .await
            .map_err(|e| ConflictError::ResolutionFailed(format!("persist resolution: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use tempfile::TempDir;

    use driftsync_core::domain::conflict::ConflictStrategy;
    use driftsync_core::domain::newtypes::{Checksum, LocalPath, RemotePath};
    use driftsync_store::{DatabasePool, SqliteStateRepository};

    use crate::filesystem::LocalFileSystemAdapter;
    use crate::memory_remote::InMemoryRemoteStore;

    struct Fixture {
        _dir: TempDir,
        folder: SyncFolder,
        store: Arc<dyn IStateRepository>,
        remote: Arc<InMemoryRemoteStore>,
        resolver: ConflictResolver,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = DatabasePool::in_memory().await.unwrap();
        let store: Arc<dyn IStateRepository> =
            Arc::new(SqliteStateRepository::new(pool.pool().clone()));
        let remote = Arc::new(InMemoryRemoteStore::new());
        let local_fs: Arc<dyn ILocalFileSystem> = Arc::new(LocalFileSystemAdapter::new());

        let folder = SyncFolder::new(
            LocalPath::new(PathBuf::from(dir.path())).unwrap(),
            RemotePath::new("/backup".to_string()).unwrap(),
            ConflictStrategy::KeepBoth,
        );
        store.save_folder(&folder).await.unwrap();

        let resolver = ConflictResolver::new(
            store.clone(),
            remote.clone(),
            local_fs,
            RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
            },
        );

        Fixture {
            _dir: dir,
            folder,
            store,
            remote,
            resolver,
        }
    }

    fn rel(path: &str) -> RelativePath {
        RelativePath::new(path.to_string()).unwrap()
    }

    fn checksum_of(data: &[u8]) -> Checksum {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest: [u8; 32] = hasher.finalize().into();
        Checksum::from_digest(&digest)
    }

    async fn diverged_conflict(fx: &Fixture, path: &str) -> Conflict {
        let local_content = b"local version";
        let remote_content = b"remote version";

        let local_path = fx.folder.local_root().as_path().join(path);
        tokio::fs::write(&local_path, local_content).await.unwrap();

        let remote_path = fx.folder.remote_root().join_relative(&rel(path));
        fx.remote.put_file(&remote_path, remote_content, Utc::now());

        Conflict::new(
            fx.folder.id(),
            rel(path),
            Utc::now(),
            Utc::now(),
            checksum_of(local_content),
            checksum_of(remote_content),
        )
    }

    #[tokio::test]
    async fn test_keep_both_never_touches_local_file() {
        let fx = fixture().await;
        let conflict = diverged_conflict(&fx, "notes.txt").await;

        let report = fx
            .resolver
            .apply(&fx.folder, conflict, ConflictOutcome::KeepBoth)
            .await
            .unwrap();

        // Local original untouched
        let local = tokio::fs::read(fx.folder.local_root().as_path().join("notes.txt"))
            .await
            .unwrap();
        assert_eq!(local, b"local version");

        // Remote version landed under a distinct renamed path
        let copy = report
            .transfers
            .iter()
            .find(|t| t.direction == Direction::Download)
            .unwrap();
        assert_ne!(copy.path.as_str(), "notes.txt");
        assert!(copy.path.as_str().contains("remote copy"));

        let copy_on_disk = tokio::fs::read(
            fx.folder.local_root().as_path().join(copy.path.as_str()),
        )
        .await
        .unwrap();
        assert_eq!(copy_on_disk, b"remote version");

        // Both paths tracked independently
        let original_entry = fx
            .store
            .get_file(fx.folder.id(), &rel("notes.txt"))
            .await
            .unwrap()
            .unwrap();
        let copy_entry = fx
            .store
            .get_file(fx.folder.id(), &copy.path)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(original_entry.status(), FileStatus::Synced);
        assert_eq!(copy_entry.status(), FileStatus::Synced);

        // Resolution recorded
        assert_eq!(report.conflict.resolution(), ConflictResolution::KeepBoth);
        assert!(report.conflict.resolved_at().is_some());
    }

    #[tokio::test]
    async fn test_keep_both_converges_both_replicas() {
        let fx = fixture().await;
        let conflict = diverged_conflict(&fx, "plan.txt").await;

        let report = fx
            .resolver
            .apply(&fx.folder, conflict, ConflictOutcome::KeepBoth)
            .await
            .unwrap();

        // Original path remotely now holds the local version
        let original_remote = fx.folder.remote_root().join_relative(&rel("plan.txt"));
        assert_eq!(
            fx.remote.file_data(&original_remote).unwrap(),
            b"local version"
        );

        // The copy exists remotely too
        let copy_path = &report
            .transfers
            .iter()
            .find(|t| t.direction == Direction::Download)
            .unwrap()
            .path;
        let copy_remote = fx.folder.remote_root().join_relative(copy_path);
        assert_eq!(
            fx.remote.file_data(&copy_remote).unwrap(),
            b"remote version"
        );
    }

    #[tokio::test]
    async fn test_download_remote_updates_baseline() {
        let fx = fixture().await;
        let conflict = diverged_conflict(&fx, "data.xlsx").await;
        let remote_checksum = conflict.remote_checksum().clone();

        let report = fx
            .resolver
            .apply(
                &fx.folder,
                conflict,
                ConflictOutcome::DownloadRemote(ConflictResolution::LastWriteWins),
            )
            .await
            .unwrap();

        // Local file now holds the remote content
        let local = tokio::fs::read(fx.folder.local_root().as_path().join("data.xlsx"))
            .await
            .unwrap();
        assert_eq!(local, b"remote version");

        // The winner's checksum is the new baseline
        let entry = fx
            .store
            .get_file(fx.folder.id(), &rel("data.xlsx"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status(), FileStatus::Synced);
        assert_eq!(entry.checksum(), Some(&remote_checksum));

        assert_eq!(
            report.conflict.resolution(),
            ConflictResolution::LastWriteWins
        );
    }

    #[tokio::test]
    async fn test_upload_local_updates_baseline() {
        let fx = fixture().await;
        let conflict = diverged_conflict(&fx, "doc.txt").await;
        let local_checksum = conflict.local_checksum().clone();

        fx.resolver
            .apply(
                &fx.folder,
                conflict,
                ConflictOutcome::UploadLocal(ConflictResolution::LocalWins),
            )
            .await
            .unwrap();

        // Remote now holds the local content
        let remote_path = fx.folder.remote_root().join_relative(&rel("doc.txt"));
        assert_eq!(fx.remote.file_data(&remote_path).unwrap(), b"local version");

        let entry = fx
            .store
            .get_file(fx.folder.id(), &rel("doc.txt"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.checksum(), Some(&local_checksum));
    }

    #[tokio::test]
    async fn test_manual_records_unresolved_and_transfers_nothing() {
        let fx = fixture().await;
        let conflict = diverged_conflict(&fx, "report.odt").await;
        let conflict_id = conflict.id();

        let report = fx
            .resolver
            .apply(&fx.folder, conflict, ConflictOutcome::Manual)
            .await
            .unwrap();

        assert!(report.transfers.is_empty());
        assert!(!report.conflict.is_resolved());

        // Persisted as unresolved and queryable
        let unresolved = fx.store.unresolved_conflicts(fx.folder.id()).await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].id(), conflict_id);

        // Local file untouched
        let local = tokio::fs::read(fx.folder.local_root().as_path().join("report.odt"))
            .await
            .unwrap();
        assert_eq!(local, b"local version");
    }

    #[tokio::test]
    async fn test_already_resolved_is_rejected() {
        let fx = fixture().await;
        let mut conflict = diverged_conflict(&fx, "done.txt").await;
        conflict.resolve(ConflictResolution::LocalWins);

        let result = fx
            .resolver
            .apply(&fx.folder, conflict, ConflictOutcome::KeepBoth)
            .await;
        assert!(matches!(result, Err(ConflictError::AlreadyResolved(_))));
    }
}
