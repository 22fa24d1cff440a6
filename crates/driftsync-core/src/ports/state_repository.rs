//! State repository port (driven/secondary port)
//!
//! This module defines the interface for persisting and querying
//! synchronization state: sync folders, per-file metadata, conflict
//! records, and per-folder sync counters. The metadata store is the single
//! source of truth for sync state; no component bypasses it.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, filesystem, in-memory) and don't need domain-level
//!   classification.
//! - All write operations take references to domain entities, allowing the
//!   caller to retain ownership.
//! - `resolve_conflict` pairs the conflict update with the corresponding
//!   file-entry update in a single transaction, so a crash mid-update never
//!   leaves a file row pointing at a resolution that wasn't applied.
//! - Implementations must support safe concurrent reads and serialize
//!   writes internally; the orchestrator never reasons about store-level
//!   races.

use chrono::{DateTime, Utc};

use crate::domain::{
    newtypes::{ConflictId, FolderId, LocalPath, RelativePath},
    Conflict, FileEntry, FileStatus, SyncFolder, SyncState,
};

/// Port trait for persistent state storage
///
/// Covers CRUD for the four persisted entities plus the composite queries
/// the change detector and the status-reporting boundary need.
#[async_trait::async_trait]
pub trait IStateRepository: Send + Sync {
    // --- SyncFolder operations ---

    /// Saves a sync folder (insert or update)
    ///
    /// Fails if another folder already claims the same local root.
    async fn save_folder(&self, folder: &SyncFolder) -> anyhow::Result<()>;

    /// Retrieves a folder by its identifier
    async fn get_folder(&self, id: FolderId) -> anyhow::Result<Option<SyncFolder>>;

    /// Retrieves a folder by its local root directory
    async fn get_folder_by_root(&self, root: &LocalPath) -> anyhow::Result<Option<SyncFolder>>;

    /// Lists all configured folders
    async fn list_folders(&self) -> anyhow::Result<Vec<SyncFolder>>;

    /// Lists folders with status `active`
    async fn active_folders(&self) -> anyhow::Result<Vec<SyncFolder>>;

    /// Removes a folder, cascading deletion of its file entries, conflicts,
    /// and sync-state row
    async fn delete_folder(&self, id: FolderId) -> anyhow::Result<()>;

    // --- FileEntry operations ---

    /// Inserts or updates the entry for (folder, path)
    async fn upsert_file(&self, entry: &FileEntry) -> anyhow::Result<()>;

    /// Retrieves the entry for (folder, path)
    async fn get_file(
        &self,
        folder_id: FolderId,
        path: &RelativePath,
    ) -> anyhow::Result<Option<FileEntry>>;

    /// Lists all entries tracked for a folder
    async fn list_files(&self, folder_id: FolderId) -> anyhow::Result<Vec<FileEntry>>;

    /// Lists entries whose modification time is after the given instant
    async fn files_modified_since(
        &self,
        folder_id: FolderId,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<FileEntry>>;

    /// Lists entries currently in the given status
    async fn files_with_status(
        &self,
        folder_id: FolderId,
        status: FileStatus,
    ) -> anyhow::Result<Vec<FileEntry>>;

    /// Deletes the entry for (folder, path)
    ///
    /// Called when the path is confirmed deleted on both sides.
    async fn delete_file(&self, folder_id: FolderId, path: &RelativePath) -> anyhow::Result<()>;

    /// Counts (pending_uploads, pending_downloads) for a folder
    async fn count_pending(&self, folder_id: FolderId) -> anyhow::Result<(u64, u64)>;

    // --- Conflict operations ---

    /// Saves a conflict record (insert or update)
    async fn save_conflict(&self, conflict: &Conflict) -> anyhow::Result<()>;

    /// Retrieves a conflict by its identifier
    async fn get_conflict(&self, id: ConflictId) -> anyhow::Result<Option<Conflict>>;

    /// Lists unresolved conflicts for a folder, newest first
    async fn unresolved_conflicts(&self, folder_id: FolderId) -> anyhow::Result<Vec<Conflict>>;

    /// Lists all conflicts for a folder, resolved ones included, newest
    /// first
    ///
    /// Resolved conflicts are retained as audit records.
    async fn list_conflicts(&self, folder_id: FolderId) -> anyhow::Result<Vec<Conflict>>;

    /// Persists a resolved conflict together with the updated file entry in
    /// one transaction
    async fn resolve_conflict(
        &self,
        conflict: &Conflict,
        entry: &FileEntry,
    ) -> anyhow::Result<()>;

    // --- SyncState operations ---

    /// Retrieves the counters row for a folder
    async fn get_sync_state(&self, folder_id: FolderId) -> anyhow::Result<Option<SyncState>>;

    /// Saves the counters row for a folder (insert or update)
    async fn save_sync_state(&self, state: &SyncState) -> anyhow::Result<()>;
}
