//! Conflict domain entities
//!
//! A conflict records a path whose local and remote states diverged
//! independently since the last reconciled checksum. Conflicts are
//! first-class outcomes, not errors: they are persisted, surfaced to the
//! shell, resolved by a strategy or a manual decision, and retained
//! afterwards as an audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::DomainError;
use super::newtypes::{Checksum, ConflictId, FolderId, RelativePath};

/// Per-folder strategy for resolving divergent edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The side with the newer modification timestamp wins; an exact tie
    /// favors the remote side
    LastWriteWins,
    /// Local version wins unconditionally
    LocalWins,
    /// Remote version wins unconditionally
    RemoteWins,
    /// Remote version is downloaded under a renamed path; the local file is
    /// left untouched and both are tracked independently afterwards
    KeepBoth,
    /// Record the conflict as unresolved and wait for an explicit decision
    Manual,
}

impl ConflictStrategy {
    /// Returns the strategy name as a stable string
    pub fn name(&self) -> &'static str {
        match self {
            ConflictStrategy::LastWriteWins => "last_write_wins",
            ConflictStrategy::LocalWins => "local_wins",
            ConflictStrategy::RemoteWins => "remote_wins",
            ConflictStrategy::KeepBoth => "keep_both",
            ConflictStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_write_wins" => Ok(ConflictStrategy::LastWriteWins),
            "local_wins" => Ok(ConflictStrategy::LocalWins),
            "remote_wins" => Ok(ConflictStrategy::RemoteWins),
            "keep_both" => Ok(ConflictStrategy::KeepBoth),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(DomainError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Terminal (or pending) resolution recorded on a conflict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Awaiting a decision (manual strategy, or not yet processed)
    #[default]
    Unresolved,
    /// Timestamps were compared; the newer side overwrote the other
    LastWriteWins,
    /// Local version kept unconditionally
    LocalWins,
    /// Remote version kept unconditionally
    RemoteWins,
    /// Both versions kept; remote landed under a renamed path
    KeepBoth,
    /// User explicitly chose the local version
    ManualLocal,
    /// User explicitly chose the remote version
    ManualRemote,
}

impl ConflictResolution {
    /// Returns the resolution name as a stable string
    pub fn name(&self) -> &'static str {
        match self {
            ConflictResolution::Unresolved => "unresolved",
            ConflictResolution::LastWriteWins => "last_write_wins",
            ConflictResolution::LocalWins => "local_wins",
            ConflictResolution::RemoteWins => "remote_wins",
            ConflictResolution::KeepBoth => "keep_both",
            ConflictResolution::ManualLocal => "manual_local",
            ConflictResolution::ManualRemote => "manual_remote",
        }
    }

    /// Returns true if this is a terminal resolution
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConflictResolution::Unresolved)
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ConflictResolution {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unresolved" => Ok(ConflictResolution::Unresolved),
            "last_write_wins" => Ok(ConflictResolution::LastWriteWins),
            "local_wins" => Ok(ConflictResolution::LocalWins),
            "remote_wins" => Ok(ConflictResolution::RemoteWins),
            "keep_both" => Ok(ConflictResolution::KeepBoth),
            "manual_local" => Ok(ConflictResolution::ManualLocal),
            "manual_remote" => Ok(ConflictResolution::ManualRemote),
            other => Err(DomainError::ValidationFailed(format!(
                "Unknown conflict resolution: {other}"
            ))),
        }
    }
}

/// A path whose local and remote versions diverged since the last sync
///
/// The owning folder id is always populated at creation time; a conflict
/// without an owner cannot be resolved or garbage-collected and is treated
/// as a construction bug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique identifier for this conflict
    id: ConflictId,
    /// The folder that owns the conflicted path
    folder_id: FolderId,
    /// The folder-relative path with divergent versions
    path: RelativePath,
    /// When the local version was last modified
    local_modified: DateTime<Utc>,
    /// When the remote version was last modified
    remote_modified: DateTime<Utc>,
    /// Checksum of the local version at detection time
    local_checksum: Checksum,
    /// Checksum of the remote version at detection time
    remote_checksum: Checksum,
    /// Resolution outcome; `Unresolved` until decided
    resolution: ConflictResolution,
    /// When the conflict was detected
    detected_at: DateTime<Utc>,
    /// When the conflict was resolved
    resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
    /// Creates a new unresolved conflict
    pub fn new(
        folder_id: FolderId,
        path: RelativePath,
        local_modified: DateTime<Utc>,
        remote_modified: DateTime<Utc>,
        local_checksum: Checksum,
        remote_checksum: Checksum,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            folder_id,
            path,
            local_modified,
            remote_modified,
            local_checksum,
            remote_checksum,
            resolution: ConflictResolution::Unresolved,
            detected_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Restores a conflict from persisted state
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: ConflictId,
        folder_id: FolderId,
        path: RelativePath,
        local_modified: DateTime<Utc>,
        remote_modified: DateTime<Utc>,
        local_checksum: Checksum,
        remote_checksum: Checksum,
        resolution: ConflictResolution,
        detected_at: DateTime<Utc>,
        resolved_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            folder_id,
            path,
            local_modified,
            remote_modified,
            local_checksum,
            remote_checksum,
            resolution,
            detected_at,
            resolved_at,
        }
    }

    // --- Getters ---

    /// Returns the conflict's unique identifier
    pub fn id(&self) -> ConflictId {
        self.id
    }

    /// Returns the owning folder's identifier
    pub fn folder_id(&self) -> FolderId {
        self.folder_id
    }

    /// Returns the conflicted path
    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    /// Returns when the local version was modified
    pub fn local_modified(&self) -> DateTime<Utc> {
        self.local_modified
    }

    /// Returns when the remote version was modified
    pub fn remote_modified(&self) -> DateTime<Utc> {
        self.remote_modified
    }

    /// Returns the local version's checksum at detection time
    pub fn local_checksum(&self) -> &Checksum {
        &self.local_checksum
    }

    /// Returns the remote version's checksum at detection time
    pub fn remote_checksum(&self) -> &Checksum {
        &self.remote_checksum
    }

    /// Returns the recorded resolution
    pub fn resolution(&self) -> ConflictResolution {
        self.resolution
    }

    /// Returns when the conflict was detected
    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    /// Returns when the conflict was resolved
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Returns true if a terminal resolution has been recorded
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_terminal()
    }

    // --- Transitions ---

    /// Records a terminal resolution with the current time
    ///
    /// Resolving an already-resolved conflict is a no-op: the first
    /// resolution stands as the audit record.
    pub fn resolve(&mut self, resolution: ConflictResolution) {
        if self.is_resolved() || !resolution.is_terminal() {
            return;
        }
        self.resolution = resolution;
        self.resolved_at = Some(Utc::now());
    }
}
