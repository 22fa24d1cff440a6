//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures, invalid status transitions, and path errors.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid local path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid remote path format
    #[error("Invalid remote path: {0}")]
    InvalidRemotePath(String),

    /// Invalid folder-relative path format
    #[error("Invalid relative path: {0}")]
    InvalidRelativePath(String),

    /// Invalid checksum format (expected hex-encoded SHA-256)
    #[error("Invalid checksum: {0}")]
    InvalidChecksum(String),

    /// Invalid status transition attempt
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatus {
        /// The current status
        from: String,
        /// The attempted target status
        to: String,
    },

    /// Path is not within the folder's local root
    #[error("Path not within folder root: {0}")]
    PathNotInRoot(String),

    /// Unknown conflict strategy name
    #[error("Unknown conflict strategy: {0}")]
    UnknownStrategy(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
