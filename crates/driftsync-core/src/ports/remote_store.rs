//! Remote file-store port (driven/secondary port)
//!
//! This module defines the interface the engine consumes from the remote
//! replica. The wire protocol, authentication, and session handling behind
//! these five operations are the adapter's responsibility and are opaque to
//! the core beyond "this call failed transiently vs. permanently".
//!
//! ## Design Notes
//!
//! - Errors are a typed `RemoteStoreError` rather than `anyhow` so the
//!   retry wrapper can classify transient vs. permanent failures without
//!   inspecting error strings.
//! - `RemoteEntry` and `RemoteChange` are port-level DTOs, not domain
//!   entities; the change detector maps them to `FileEntry` state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::newtypes::{Checksum, LocalPath, RemotePath};

// ============================================================================
// Error taxonomy
// ============================================================================

/// Failure of a remote file-store operation
///
/// The transient variants are retried by the engine's retry wrapper with
/// bounded exponential backoff; the permanent variants are surfaced after a
/// single attempt.
#[derive(Debug, Error)]
pub enum RemoteStoreError {
    /// Network unreachable, connection refused, DNS failure
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    /// The operation timed out
    #[error("Remote operation timed out: {0}")]
    Timeout(String),

    /// The remote reported a temporary server-side failure (5xx-equivalent)
    #[error("Remote temporarily unavailable: {0}")]
    Unavailable(String),

    /// The remote path does not exist (4xx-equivalent)
    #[error("Remote path not found: {0}")]
    NotFound(String),

    /// The caller is not permitted to perform the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The request was malformed or rejected permanently
    #[error("Invalid remote request: {0}")]
    Invalid(String),

    /// Local I/O failed while staging an upload or landing a download
    #[error("Local I/O error during remote operation: {0}")]
    LocalIo(#[from] std::io::Error),
}

impl RemoteStoreError {
    /// Returns true if the failure is worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteStoreError::Unreachable(_)
                | RemoteStoreError::Timeout(_)
                | RemoteStoreError::Unavailable(_)
        )
    }

    /// Short machine-readable kind, used in operation-failed events
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteStoreError::Unreachable(_) => "unreachable",
            RemoteStoreError::Timeout(_) => "timeout",
            RemoteStoreError::Unavailable(_) => "unavailable",
            RemoteStoreError::NotFound(_) => "not_found",
            RemoteStoreError::PermissionDenied(_) => "permission_denied",
            RemoteStoreError::Invalid(_) => "invalid",
            RemoteStoreError::LocalIo(_) => "local_io",
        }
    }
}

// ============================================================================
// DTOs
// ============================================================================

/// A single entry returned by `list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Full remote path of the entry
    pub path: RemotePath,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Last modification time on the remote replica
    pub modified: DateTime<Utc>,
    /// Content checksum (None for directories)
    pub checksum: Option<Checksum>,
    /// Whether this entry is a directory
    pub is_directory: bool,
}

/// A single entry returned by `changes_since`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChange {
    /// Full remote path of the changed entry
    pub path: RemotePath,
    /// Size in bytes after the change (0 for directories and deletions)
    pub size: u64,
    /// When the change happened on the remote replica
    pub modified: DateTime<Utc>,
    /// Content checksum after the change (None for directories/deletions)
    pub checksum: Option<Checksum>,
    /// Whether the changed entry is a directory
    pub is_directory: bool,
    /// Whether the entry was deleted
    pub is_deleted: bool,
}

// ============================================================================
// IRemoteStore trait
// ============================================================================

/// Port trait for the remote file-store API
///
/// Exactly the four mutating/reading operations the engine calls, plus the
/// incremental "changes since" query. Every call the orchestrator makes
/// goes through the retrying operation wrapper.
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Lists the entries directly under a remote path
    async fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, RemoteStoreError>;

    /// Uploads a local file to the given remote path, replacing any
    /// existing content, and returns the resulting remote metadata
    async fn upload(
        &self,
        local: &LocalPath,
        remote: &RemotePath,
    ) -> Result<RemoteEntry, RemoteStoreError>;

    /// Downloads a remote file to the given local path, replacing any
    /// existing content
    async fn download(
        &self,
        remote: &RemotePath,
        local: &LocalPath,
    ) -> Result<(), RemoteStoreError>;

    /// Deletes a remote file or directory
    async fn delete(&self, remote: &RemotePath) -> Result<(), RemoteStoreError>;

    /// Returns all entries changed since the given timestamp
    ///
    /// `None` requests the full current listing (initial sync).
    async fn changes_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteChange>, RemoteStoreError>;
}
