//! Conflict engine error types

use thiserror::Error;

/// Errors from conflict detection and resolution
#[derive(Debug, Error)]
pub enum ConflictError {
    /// A resolution was supplied for a conflict id with no matching
    /// unresolved conflict
    #[error("No unresolved conflict with id {0}")]
    NoSuchConflict(String),

    /// The conflict was already resolved; the first resolution stands
    #[error("Conflict {0} is already resolved")]
    AlreadyResolved(String),

    /// Applying a resolution failed partway through
    #[error("Resolution failed: {0}")]
    ResolutionFailed(String),
}
