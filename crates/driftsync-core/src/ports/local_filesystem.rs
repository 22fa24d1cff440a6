//! Local filesystem port (driven/secondary port)
//!
//! This module defines the interface for inspecting and mutating the local
//! replica: metadata snapshots, checksum computation, directory creation,
//! and deletion. Directory walking lives in the change detector, which
//! drives `tokio::fs::read_dir` directly; this port covers the per-path
//! operations the detector and the task executors share.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - All paths are `LocalPath` instances, guaranteed absolute.

use chrono::{DateTime, Utc};

use crate::domain::newtypes::{Checksum, LocalPath};

/// Snapshot of a path's state on the local filesystem
#[derive(Debug, Clone)]
pub struct FileSystemState {
    /// Whether the path exists on disk
    pub exists: bool,
    /// Whether this is a regular file (false for directories)
    pub is_file: bool,
    /// Size in bytes (0 for directories or non-existent paths)
    pub size: u64,
    /// Last modification time (None if unavailable or path missing)
    pub modified: Option<DateTime<Utc>>,
}

impl FileSystemState {
    /// Returns a state representing a non-existent path
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_file: false,
            size: 0,
            modified: None,
        }
    }

    /// Returns true if the path exists and is a regular file
    pub fn is_regular_file(&self) -> bool {
        self.exists && self.is_file
    }

    /// Returns true if the path exists and is a directory
    pub fn is_directory(&self) -> bool {
        self.exists && !self.is_file
    }
}

/// Port trait for local filesystem operations
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Gets the current state of a file or directory
    ///
    /// Returns `FileSystemState::not_found()` for missing paths rather than
    /// an error.
    async fn get_state(&self, path: &LocalPath) -> anyhow::Result<FileSystemState>;

    /// Computes the SHA-256 checksum of a file's content
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be read
    async fn compute_checksum(&self, path: &LocalPath) -> anyhow::Result<Checksum>;

    /// Creates a directory and all parents as needed (`mkdir -p`)
    async fn create_directory(&self, path: &LocalPath) -> anyhow::Result<()>;

    /// Deletes a file, or a directory recursively
    ///
    /// # Errors
    /// Returns an error if the path doesn't exist or cannot be removed
    async fn delete(&self, path: &LocalPath) -> anyhow::Result<()>;
}
