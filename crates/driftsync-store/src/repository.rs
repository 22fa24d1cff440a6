//! SQLite implementation of IStateRepository
//!
//! This module provides the concrete SQLite-based implementation of the
//! state repository port defined in driftsync-core. It handles all domain
//! type serialization/deserialization and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type          | SQL Type | Strategy                                   |
//! |----------------------|----------|--------------------------------------------|
//! | FolderId, ConflictId | TEXT     | UUID string via `.to_string()` / `FromStr` |
//! | LocalPath            | TEXT     | Path string via `.to_string()` / `LocalPath::new()` |
//! | RemotePath           | TEXT     | String via `.as_str()` / `RemotePath::new()` |
//! | RelativePath         | TEXT     | String via `.as_str()` / `RelativePath::new()` |
//! | Checksum             | TEXT     | Hex string via `.as_str()` / `Checksum::new()` |
//! | DateTime<Utc>        | TEXT     | ISO 8601 via `to_rfc3339()` / `DateTime::parse_from_rfc3339()` |
//! | Status enums         | TEXT     | stable `name()` strings / `FromStr`        |

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use driftsync_core::domain::{
    newtypes::{Checksum, ConflictId, FolderId, LocalPath, RelativePath, RemotePath},
    Conflict, ConflictResolution, FileEntry, FileStatus, FolderStatus, SyncFolder, SyncState,
};
use driftsync_core::domain::conflict::ConflictStrategy;
use driftsync_core::ports::IStateRepository;

use crate::StoreError;

/// SQLite-based implementation of the state repository port
///
/// Provides persistent storage for all domain entities using SQLite.
/// All operations are performed through a connection pool; SQLite's
/// single-writer discipline serializes writes internally while WAL mode
/// keeps concurrent reads safe.
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    /// Creates a new repository instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Parse a DateTime<Utc> from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Try parsing without timezone (SQLite default format)
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| {
            StoreError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Parse an optional DateTime<Utc> from an optional string
fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

/// Parse an optional Checksum from an optional string
fn parse_optional_checksum(s: Option<String>) -> Result<Option<Checksum>, StoreError> {
    match s {
        Some(val) if !val.is_empty() => Checksum::new(val)
            .map(Some)
            .map_err(|e| StoreError::SerializationError(format!("Invalid checksum: {}", e))),
        _ => Ok(None),
    }
}

// ============================================================================
// Row mapping functions
// ============================================================================

/// Reconstruct a SyncFolder from a database row
fn folder_from_row(row: &SqliteRow) -> Result<SyncFolder, StoreError> {
    let id_str: String = row.get("id");
    let local_root_str: String = row.get("local_root");
    let remote_root_str: String = row.get("remote_root");
    let status_str: String = row.get("status");
    let strategy_str: String = row.get("conflict_strategy");
    let created_at_str: String = row.get("created_at");
    let last_synced_at_str: Option<String> = row.get("last_synced_at");

    let id = FolderId::from_str(&id_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid FolderId '{}': {}", id_str, e))
    })?;

    let local_root = LocalPath::new(PathBuf::from(&local_root_str)).map_err(|e| {
        StoreError::SerializationError(format!("Invalid LocalPath '{}': {}", local_root_str, e))
    })?;

    let remote_root = RemotePath::new(remote_root_str.clone()).map_err(|e| {
        StoreError::SerializationError(format!("Invalid RemotePath '{}': {}", remote_root_str, e))
    })?;

    let status = FolderStatus::from_str(&status_str)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;

    let conflict_strategy = ConflictStrategy::from_str(&strategy_str)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;

    let created_at = parse_datetime(&created_at_str)?;
    let last_synced_at = parse_optional_datetime(last_synced_at_str)?;

    Ok(SyncFolder::restore(
        id,
        local_root,
        remote_root,
        status,
        conflict_strategy,
        created_at,
        last_synced_at,
    ))
}

/// Reconstruct a FileEntry from a database row
fn file_from_row(row: &SqliteRow) -> Result<FileEntry, StoreError> {
    let folder_id_str: String = row.get("folder_id");
    let path_str: String = row.get("path");
    let size: i64 = row.get("size");
    let modified_at_str: String = row.get("modified_at");
    let checksum_str: Option<String> = row.get("checksum");
    let is_directory: i64 = row.get("is_directory");
    let status_str: String = row.get("status");

    let folder_id = FolderId::from_str(&folder_id_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid FolderId '{}': {}", folder_id_str, e))
    })?;

    let path = RelativePath::new(path_str.clone()).map_err(|e| {
        StoreError::SerializationError(format!("Invalid RelativePath '{}': {}", path_str, e))
    })?;

    let modified_at = parse_datetime(&modified_at_str)?;
    let checksum = parse_optional_checksum(checksum_str)?;
    let status = FileStatus::from_str(&status_str)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;

    Ok(FileEntry::restore(
        folder_id,
        path,
        size as u64,
        modified_at,
        checksum,
        is_directory != 0,
        status,
    ))
}

/// Reconstruct a Conflict from a database row
fn conflict_from_row(row: &SqliteRow) -> Result<Conflict, StoreError> {
    let id_str: String = row.get("id");
    let folder_id_str: String = row.get("folder_id");
    let path_str: String = row.get("path");
    let local_modified_str: String = row.get("local_modified");
    let remote_modified_str: String = row.get("remote_modified");
    let local_checksum_str: String = row.get("local_checksum");
    let remote_checksum_str: String = row.get("remote_checksum");
    let resolution_str: String = row.get("resolution");
    let detected_at_str: String = row.get("detected_at");
    let resolved_at_str: Option<String> = row.get("resolved_at");

    let id = ConflictId::from_str(&id_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid ConflictId '{}': {}", id_str, e))
    })?;

    let folder_id = FolderId::from_str(&folder_id_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid FolderId '{}': {}", folder_id_str, e))
    })?;

    let path = RelativePath::new(path_str.clone()).map_err(|e| {
        StoreError::SerializationError(format!("Invalid RelativePath '{}': {}", path_str, e))
    })?;

    let local_checksum = Checksum::new(local_checksum_str)
        .map_err(|e| StoreError::SerializationError(format!("Invalid local checksum: {}", e)))?;
    let remote_checksum = Checksum::new(remote_checksum_str)
        .map_err(|e| StoreError::SerializationError(format!("Invalid remote checksum: {}", e)))?;

    let resolution = ConflictResolution::from_str(&resolution_str)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;

    Ok(Conflict::restore(
        id,
        folder_id,
        path,
        parse_datetime(&local_modified_str)?,
        parse_datetime(&remote_modified_str)?,
        local_checksum,
        remote_checksum,
        resolution,
        parse_datetime(&detected_at_str)?,
        parse_optional_datetime(resolved_at_str)?,
    ))
}

/// Reconstruct a SyncState from a database row
fn sync_state_from_row(row: &SqliteRow) -> Result<SyncState, StoreError> {
    let folder_id_str: String = row.get("folder_id");
    let last_local_scan_str: Option<String> = row.get("last_local_scan");
    let last_remote_poll_str: Option<String> = row.get("last_remote_poll");
    let pending_uploads: i64 = row.get("pending_uploads");
    let pending_downloads: i64 = row.get("pending_downloads");

    let folder_id = FolderId::from_str(&folder_id_str).map_err(|e| {
        StoreError::SerializationError(format!("Invalid FolderId '{}': {}", folder_id_str, e))
    })?;

    Ok(SyncState {
        folder_id: Some(folder_id),
        last_local_scan: parse_optional_datetime(last_local_scan_str)?,
        last_remote_poll: parse_optional_datetime(last_remote_poll_str)?,
        pending_uploads: pending_uploads as u64,
        pending_downloads: pending_downloads as u64,
    })
}

// ============================================================================
// IStateRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl IStateRepository for SqliteStateRepository {
    // --- SyncFolder operations ---

    async fn save_folder(&self, folder: &SyncFolder) -> anyhow::Result<()> {
        let id = folder.id().to_string();
        let local_root = folder.local_root().to_string();
        let remote_root = folder.remote_root().as_str().to_string();
        let status = folder.status().name();
        let strategy = folder.conflict_strategy().name();
        let created_at = folder.created_at().to_rfc3339();
        let last_synced_at = folder.last_synced_at().map(|dt| dt.to_rfc3339());

        sqlx::query(
            "INSERT INTO folders \
             (id, local_root, remote_root, status, conflict_strategy, created_at, last_synced_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               local_root = excluded.local_root, \
               remote_root = excluded.remote_root, \
               status = excluded.status, \
               conflict_strategy = excluded.conflict_strategy, \
               last_synced_at = excluded.last_synced_at",
        )
        .bind(&id)
        .bind(&local_root)
        .bind(&remote_root)
        .bind(status)
        .bind(strategy)
        .bind(&created_at)
        .bind(&last_synced_at)
        .execute(&self.pool)
        .await?;

        tracing::trace!(folder_id = %id, "Saved sync folder");
        Ok(())
    }

    async fn get_folder(&self, id: FolderId) -> anyhow::Result<Option<SyncFolder>> {
        let row = sqlx::query("SELECT * FROM folders WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(folder_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_folder_by_root(&self, root: &LocalPath) -> anyhow::Result<Option<SyncFolder>> {
        let row = sqlx::query("SELECT * FROM folders WHERE local_root = ?")
            .bind(root.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(folder_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_folders(&self) -> anyhow::Result<Vec<SyncFolder>> {
        let rows = sqlx::query("SELECT * FROM folders ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut folders = Vec::with_capacity(rows.len());
        for row in &rows {
            folders.push(folder_from_row(row)?);
        }

        Ok(folders)
    }

    async fn active_folders(&self) -> anyhow::Result<Vec<SyncFolder>> {
        let rows = sqlx::query("SELECT * FROM folders WHERE status = 'active' ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut folders = Vec::with_capacity(rows.len());
        for row in &rows {
            folders.push(folder_from_row(row)?);
        }

        Ok(folders)
    }

    async fn delete_folder(&self, id: FolderId) -> anyhow::Result<()> {
        let id_str = id.to_string();

        // Files, conflicts, and sync_state follow via ON DELETE CASCADE.
        sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(&id_str)
            .execute(&self.pool)
            .await?;

        tracing::trace!(folder_id = %id_str, "Deleted sync folder");
        Ok(())
    }

    // --- FileEntry operations ---

    async fn upsert_file(&self, entry: &FileEntry) -> anyhow::Result<()> {
        let folder_id = entry.folder_id().to_string();
        let path = entry.path().as_str().to_string();
        let size = entry.size() as i64;
        let modified_at = entry.modified_at().to_rfc3339();
        let checksum = entry.checksum().map(|c| c.as_str().to_string());
        let is_directory = entry.is_directory() as i64;
        let status = entry.status().name();

        sqlx::query(
            "INSERT INTO files \
             (folder_id, path, size, modified_at, checksum, is_directory, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(folder_id, path) DO UPDATE SET \
               size = excluded.size, \
               modified_at = excluded.modified_at, \
               checksum = excluded.checksum, \
               is_directory = excluded.is_directory, \
               status = excluded.status",
        )
        .bind(&folder_id)
        .bind(&path)
        .bind(size)
        .bind(&modified_at)
        .bind(&checksum)
        .bind(is_directory)
        .bind(status)
        .execute(&self.pool)
        .await?;

        tracing::trace!(folder_id = %folder_id, path = %path, status = %status, "Upserted file entry");
        Ok(())
    }

    async fn get_file(
        &self,
        folder_id: FolderId,
        path: &RelativePath,
    ) -> anyhow::Result<Option<FileEntry>> {
        let row = sqlx::query("SELECT * FROM files WHERE folder_id = ? AND path = ?")
            .bind(folder_id.to_string())
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(file_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_files(&self, folder_id: FolderId) -> anyhow::Result<Vec<FileEntry>> {
        let rows = sqlx::query("SELECT * FROM files WHERE folder_id = ? ORDER BY path ASC")
            .bind(folder_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(file_from_row(row)?);
        }

        Ok(entries)
    }

    async fn files_modified_since(
        &self,
        folder_id: FolderId,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<FileEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM files WHERE folder_id = ? AND modified_at > ? ORDER BY path ASC",
        )
        .bind(folder_id.to_string())
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(file_from_row(row)?);
        }

        Ok(entries)
    }

    async fn files_with_status(
        &self,
        folder_id: FolderId,
        status: FileStatus,
    ) -> anyhow::Result<Vec<FileEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM files WHERE folder_id = ? AND status = ? ORDER BY path ASC",
        )
        .bind(folder_id.to_string())
        .bind(status.name())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(file_from_row(row)?);
        }

        Ok(entries)
    }

    async fn delete_file(&self, folder_id: FolderId, path: &RelativePath) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM files WHERE folder_id = ? AND path = ?")
            .bind(folder_id.to_string())
            .bind(path.as_str())
            .execute(&self.pool)
            .await?;

        tracing::trace!(folder_id = %folder_id, path = %path, "Deleted file entry");
        Ok(())
    }

    async fn count_pending(&self, folder_id: FolderId) -> anyhow::Result<(u64, u64)> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) as count FROM files \
             WHERE folder_id = ? AND status IN ('pending_upload', 'pending_download') \
             GROUP BY status",
        )
        .bind(folder_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut uploads = 0u64;
        let mut downloads = 0u64;
        for row in &rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            match status.as_str() {
                "pending_upload" => uploads = count as u64,
                "pending_download" => downloads = count as u64,
                _ => {}
            }
        }

        Ok((uploads, downloads))
    }

    // --- Conflict operations ---

    async fn save_conflict(&self, conflict: &Conflict) -> anyhow::Result<()> {
        let id = conflict.id().to_string();
        let folder_id = conflict.folder_id().to_string();
        let path = conflict.path().as_str().to_string();
        let local_modified = conflict.local_modified().to_rfc3339();
        let remote_modified = conflict.remote_modified().to_rfc3339();
        let local_checksum = conflict.local_checksum().as_str().to_string();
        let remote_checksum = conflict.remote_checksum().as_str().to_string();
        let resolution = conflict.resolution().name();
        let detected_at = conflict.detected_at().to_rfc3339();
        let resolved_at = conflict.resolved_at().map(|dt| dt.to_rfc3339());

        sqlx::query(
            "INSERT OR REPLACE INTO conflicts \
             (id, folder_id, path, local_modified, remote_modified, \
              local_checksum, remote_checksum, resolution, detected_at, resolved_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&folder_id)
        .bind(&path)
        .bind(&local_modified)
        .bind(&remote_modified)
        .bind(&local_checksum)
        .bind(&remote_checksum)
        .bind(resolution)
        .bind(&detected_at)
        .bind(&resolved_at)
        .execute(&self.pool)
        .await?;

        tracing::trace!(conflict_id = %id, resolution = %resolution, "Saved conflict");
        Ok(())
    }

    async fn get_conflict(&self, id: ConflictId) -> anyhow::Result<Option<Conflict>> {
        let row = sqlx::query("SELECT * FROM conflicts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(conflict_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn unresolved_conflicts(&self, folder_id: FolderId) -> anyhow::Result<Vec<Conflict>> {
        let rows = sqlx::query(
            "SELECT * FROM conflicts \
             WHERE folder_id = ? AND resolution = 'unresolved' \
             ORDER BY detected_at DESC",
        )
        .bind(folder_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut conflicts = Vec::with_capacity(rows.len());
        for row in &rows {
            conflicts.push(conflict_from_row(row)?);
        }

        Ok(conflicts)
    }

    async fn list_conflicts(&self, folder_id: FolderId) -> anyhow::Result<Vec<Conflict>> {
        let rows = sqlx::query(
            "SELECT * FROM conflicts WHERE folder_id = ? ORDER BY detected_at DESC",
        )
        .bind(folder_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut conflicts = Vec::with_capacity(rows.len());
        for row in &rows {
            conflicts.push(conflict_from_row(row)?);
        }

        Ok(conflicts)
    }

    async fn resolve_conflict(
        &self,
        conflict: &Conflict,
        entry: &FileEntry,
    ) -> anyhow::Result<()> {
        // The resolved conflict and the file-entry baseline update must land
        // together; a crash between the two would leave the metadata pointing
        // at a resolution that was never applied.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE conflicts SET resolution = ?, resolved_at = ? WHERE id = ?",
        )
        .bind(conflict.resolution().name())
        .bind(conflict.resolved_at().map(|dt| dt.to_rfc3339()))
        .bind(conflict.id().to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO files \
             (folder_id, path, size, modified_at, checksum, is_directory, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(folder_id, path) DO UPDATE SET \
               size = excluded.size, \
               modified_at = excluded.modified_at, \
               checksum = excluded.checksum, \
               is_directory = excluded.is_directory, \
               status = excluded.status",
        )
        .bind(entry.folder_id().to_string())
        .bind(entry.path().as_str())
        .bind(entry.size() as i64)
        .bind(entry.modified_at().to_rfc3339())
        .bind(entry.checksum().map(|c| c.as_str().to_string()))
        .bind(entry.is_directory() as i64)
        .bind(entry.status().name())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            conflict_id = %conflict.id(),
            resolution = %conflict.resolution(),
            path = %conflict.path(),
            "Resolved conflict persisted"
        );
        Ok(())
    }

    // --- SyncState operations ---

    async fn get_sync_state(&self, folder_id: FolderId) -> anyhow::Result<Option<SyncState>> {
        let row = sqlx::query("SELECT * FROM sync_state WHERE folder_id = ?")
            .bind(folder_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(sync_state_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn save_sync_state(&self, state: &SyncState) -> anyhow::Result<()> {
        let folder_id = state
            .folder_id
            .ok_or_else(|| anyhow::anyhow!("SyncState has no folder id"))?
            .to_string();

        sqlx::query(
            "INSERT INTO sync_state \
             (folder_id, last_local_scan, last_remote_poll, pending_uploads, pending_downloads) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(folder_id) DO UPDATE SET \
               last_local_scan = excluded.last_local_scan, \
               last_remote_poll = excluded.last_remote_poll, \
               pending_uploads = excluded.pending_uploads, \
               pending_downloads = excluded.pending_downloads",
        )
        .bind(&folder_id)
        .bind(state.last_local_scan.map(|dt| dt.to_rfc3339()))
        .bind(state.last_remote_poll.map(|dt| dt.to_rfc3339()))
        .bind(state.pending_uploads as i64)
        .bind(state.pending_downloads as i64)
        .execute(&self.pool)
        .await?;

        tracing::trace!(folder_id = %folder_id, "Saved sync state");
        Ok(())
    }
}
