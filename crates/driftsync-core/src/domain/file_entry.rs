//! FileEntry domain entity
//!
//! One FileEntry exists per known path within a sync folder. The entry's
//! stored checksum, once the status is `Synced`, is the reconciliation
//! baseline: the hash both replicas agreed on the last time the file was
//! fully synchronized. The status field is the durable record of what still
//! needs transferring, so a crash and restart resumes from stored pending
//! state instead of re-diffing from scratch.
//!
//! ## Status machine
//!
//! ```text
//!             local change               upload done
//!   Synced ───────────────► PendingUpload ──────────► Synced
//!      │                                                ▲
//!      │      remote change              download done  │
//!      └────────────────► PendingDownload ──────────────┘
//!
//!   divergent change on both sides ──► Conflict ──(resolution)──► Synced
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::DomainError;
use super::newtypes::{Checksum, FolderId, RelativePath};

/// Synchronization status of a tracked path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Both replicas hold the content described by the stored checksum
    #[default]
    Synced,
    /// Local content changed; an upload is queued or in flight
    PendingUpload,
    /// Remote content changed; a download is queued or in flight
    PendingDownload,
    /// Divergent edits detected; waiting on the conflict engine
    Conflict,
}

impl FileStatus {
    /// Returns the status name as a stable string
    pub fn name(&self) -> &'static str {
        match self {
            FileStatus::Synced => "synced",
            FileStatus::PendingUpload => "pending_upload",
            FileStatus::PendingDownload => "pending_download",
            FileStatus::Conflict => "conflict",
        }
    }

    /// Returns true if a transfer is still owed for this entry
    pub fn is_pending(&self) -> bool {
        matches!(self, FileStatus::PendingUpload | FileStatus::PendingDownload)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for FileStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(FileStatus::Synced),
            "pending_upload" => Ok(FileStatus::PendingUpload),
            "pending_download" => Ok(FileStatus::PendingDownload),
            "conflict" => Ok(FileStatus::Conflict),
            other => Err(DomainError::ValidationFailed(format!(
                "Unknown file status: {other}"
            ))),
        }
    }
}

/// Metadata for one path tracked within a sync folder
///
/// Path is unique within a folder (enforced by the store schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// The folder that tracks this path
    folder_id: FolderId,
    /// Folder-relative path, identical on both replicas
    path: RelativePath,
    /// Size in bytes (0 for directories)
    size: u64,
    /// Last known modification time
    modified_at: DateTime<Utc>,
    /// Content checksum; None for directories and not-yet-hashed entries
    checksum: Option<Checksum>,
    /// Whether this entry is a directory
    is_directory: bool,
    /// Current synchronization status
    status: FileStatus,
}

impl FileEntry {
    /// Creates an entry for a file
    pub fn new_file(
        folder_id: FolderId,
        path: RelativePath,
        size: u64,
        modified_at: DateTime<Utc>,
        checksum: Option<Checksum>,
        status: FileStatus,
    ) -> Self {
        Self {
            folder_id,
            path,
            size,
            modified_at,
            checksum,
            is_directory: false,
            status,
        }
    }

    /// Creates an entry for a directory
    ///
    /// Directories carry no checksum and are mirrored by creation and
    /// deletion only.
    pub fn new_directory(
        folder_id: FolderId,
        path: RelativePath,
        modified_at: DateTime<Utc>,
        status: FileStatus,
    ) -> Self {
        Self {
            folder_id,
            path,
            size: 0,
            modified_at,
            checksum: None,
            is_directory: true,
            status,
        }
    }

    /// Restores an entry from persisted state
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        folder_id: FolderId,
        path: RelativePath,
        size: u64,
        modified_at: DateTime<Utc>,
        checksum: Option<Checksum>,
        is_directory: bool,
        status: FileStatus,
    ) -> Self {
        Self {
            folder_id,
            path,
            size,
            modified_at,
            checksum,
            is_directory,
            status,
        }
    }

    // --- Getters ---

    /// Returns the owning folder's identifier
    pub fn folder_id(&self) -> FolderId {
        self.folder_id
    }

    /// Returns the folder-relative path
    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    /// Returns the size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the last known modification time
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    /// Returns the stored checksum
    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    /// Returns true if this entry is a directory
    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// Returns the current synchronization status
    pub fn status(&self) -> FileStatus {
        self.status
    }

    // --- Mutations ---

    /// Updates the observed size and modification time
    pub fn set_observed(&mut self, size: u64, modified_at: DateTime<Utc>) {
        self.size = size;
        self.modified_at = modified_at;
    }

    /// Marks the entry pending upload
    pub fn mark_pending_upload(&mut self) {
        self.status = FileStatus::PendingUpload;
    }

    /// Marks the entry pending download
    pub fn mark_pending_download(&mut self) {
        self.status = FileStatus::PendingDownload;
    }

    /// Marks the entry conflicted
    pub fn mark_conflict(&mut self) {
        self.status = FileStatus::Conflict;
    }

    /// Records a completed reconciliation: the given checksum becomes the
    /// new baseline and the status returns to `Synced`
    pub fn mark_synced(&mut self, checksum: Option<Checksum>) {
        if checksum.is_some() {
            self.checksum = checksum;
        }
        self.status = FileStatus::Synced;
    }
}
