//! SyncFolder domain entity
//!
//! A SyncFolder pairs one local root directory with one remote root path.
//! Each folder has an independent lifecycle: it is created by an explicit
//! add operation, paused/resumed at runtime, and removed with cascading
//! deletion of its file metadata and conflict records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::conflict::ConflictStrategy;
use super::errors::DomainError;
use super::newtypes::{FolderId, LocalPath, RemotePath};

/// Lifecycle status of a sync folder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderStatus {
    /// Folder is actively scanned and synchronized
    #[default]
    Active,
    /// Scanning and the task queue are suspended for this folder
    Paused,
    /// Repeated cycle failures or an unrecoverable error; cleared by the
    /// next successful scan cycle
    Error,
}

impl FolderStatus {
    /// Returns the status name as a stable string
    pub fn name(&self) -> &'static str {
        match self {
            FolderStatus::Active => "active",
            FolderStatus::Paused => "paused",
            FolderStatus::Error => "error",
        }
    }
}

impl fmt::Display for FolderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for FolderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(FolderStatus::Active),
            "paused" => Ok(FolderStatus::Paused),
            "error" => Ok(FolderStatus::Error),
            other => Err(DomainError::ValidationFailed(format!(
                "Unknown folder status: {other}"
            ))),
        }
    }
}

/// A configured pairing of one local root directory with one remote root path
///
/// The local root is unique across all sync folders; no two folders may
/// watch the same directory. Enforced both here (orchestrator checks on add)
/// and by the metadata store schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFolder {
    /// Stable identifier, generated once at creation
    id: FolderId,
    /// Absolute local root directory
    local_root: LocalPath,
    /// Remote root path this folder mirrors
    remote_root: RemotePath,
    /// Current lifecycle status
    status: FolderStatus,
    /// Conflict strategy applied to divergent edits in this folder
    conflict_strategy: ConflictStrategy,
    /// When the folder pairing was created
    created_at: DateTime<Utc>,
    /// When the last sync cycle completed successfully
    last_synced_at: Option<DateTime<Utc>>,
}

impl SyncFolder {
    /// Creates a new active sync folder
    pub fn new(
        local_root: LocalPath,
        remote_root: RemotePath,
        conflict_strategy: ConflictStrategy,
    ) -> Self {
        Self {
            id: FolderId::new(),
            local_root,
            remote_root,
            status: FolderStatus::Active,
            conflict_strategy,
            created_at: Utc::now(),
            last_synced_at: None,
        }
    }

    /// Restores a folder from persisted state
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: FolderId,
        local_root: LocalPath,
        remote_root: RemotePath,
        status: FolderStatus,
        conflict_strategy: ConflictStrategy,
        created_at: DateTime<Utc>,
        last_synced_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            local_root,
            remote_root,
            status,
            conflict_strategy,
            created_at,
            last_synced_at,
        }
    }

    // --- Getters ---

    /// Returns the folder's stable identifier
    pub fn id(&self) -> FolderId {
        self.id
    }

    /// Returns the local root directory
    pub fn local_root(&self) -> &LocalPath {
        &self.local_root
    }

    /// Returns the remote root path
    pub fn remote_root(&self) -> &RemotePath {
        &self.remote_root
    }

    /// Returns the current status
    pub fn status(&self) -> &FolderStatus {
        &self.status
    }

    /// Returns the configured conflict strategy
    pub fn conflict_strategy(&self) -> &ConflictStrategy {
        &self.conflict_strategy
    }

    /// Returns when the folder was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the folder last completed a sync cycle
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    /// Returns true if the folder participates in scan cycles
    pub fn is_active(&self) -> bool {
        matches!(self.status, FolderStatus::Active)
    }

    // --- Transitions ---

    /// Suspends scanning and the task queue for this folder
    ///
    /// # Errors
    /// Returns `DomainError::InvalidStatus` if the folder is already paused.
    pub fn pause(&mut self) -> Result<(), DomainError> {
        if matches!(self.status, FolderStatus::Paused) {
            return Err(DomainError::InvalidStatus {
                from: self.status.name().to_string(),
                to: FolderStatus::Paused.name().to_string(),
            });
        }
        self.status = FolderStatus::Paused;
        Ok(())
    }

    /// Resumes a paused folder
    ///
    /// # Errors
    /// Returns `DomainError::InvalidStatus` if the folder is not paused.
    pub fn resume(&mut self) -> Result<(), DomainError> {
        if !matches!(self.status, FolderStatus::Paused) {
            return Err(DomainError::InvalidStatus {
                from: self.status.name().to_string(),
                to: FolderStatus::Active.name().to_string(),
            });
        }
        self.status = FolderStatus::Active;
        Ok(())
    }

    /// Degrades the folder to error status after repeated cycle failures
    ///
    /// A paused folder stays paused; error status never overrides an
    /// explicit user pause.
    pub fn mark_error(&mut self) {
        if !matches!(self.status, FolderStatus::Paused) {
            self.status = FolderStatus::Error;
        }
    }

    /// Records a successful sync cycle, clearing error status
    pub fn record_sync(&mut self, at: DateTime<Utc>) {
        self.last_synced_at = Some(at);
        if matches!(self.status, FolderStatus::Error) {
            self.status = FolderStatus::Active;
        }
    }

    /// Changes the conflict strategy applied to this folder
    pub fn set_conflict_strategy(&mut self, strategy: ConflictStrategy) {
        self.conflict_strategy = strategy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn create_test_folder() -> SyncFolder {
        SyncFolder::new(
            LocalPath::new(PathBuf::from("/home/user/Documents")).unwrap(),
            RemotePath::new("/Documents".to_string()).unwrap(),
            ConflictStrategy::LastWriteWins,
        )
    }

    #[test]
    fn test_new_folder_is_active() {
        let folder = create_test_folder();
        assert!(folder.is_active());
        assert!(folder.last_synced_at().is_none());
    }

    #[test]
    fn test_pause_resume() {
        let mut folder = create_test_folder();

        folder.pause().unwrap();
        assert_eq!(folder.status(), &FolderStatus::Paused);
        assert!(!folder.is_active());

        folder.resume().unwrap();
        assert_eq!(folder.status(), &FolderStatus::Active);
    }

    #[test]
    fn test_double_pause_fails() {
        let mut folder = create_test_folder();
        folder.pause().unwrap();
        assert!(folder.pause().is_err());
    }

    #[test]
    fn test_resume_active_fails() {
        let mut folder = create_test_folder();
        assert!(folder.resume().is_err());
    }

    #[test]
    fn test_mark_error_and_recovery() {
        let mut folder = create_test_folder();

        folder.mark_error();
        assert_eq!(folder.status(), &FolderStatus::Error);

        // A successful cycle clears the error automatically
        folder.record_sync(Utc::now());
        assert_eq!(folder.status(), &FolderStatus::Active);
        assert!(folder.last_synced_at().is_some());
    }

    #[test]
    fn test_mark_error_does_not_override_pause() {
        let mut folder = create_test_folder();
        folder.pause().unwrap();
        folder.mark_error();
        assert_eq!(folder.status(), &FolderStatus::Paused);
    }

    #[test]
    fn test_set_conflict_strategy() {
        let mut folder = create_test_folder();
        folder.set_conflict_strategy(ConflictStrategy::KeepBoth);
        assert_eq!(folder.conflict_strategy(), &ConflictStrategy::KeepBoth);
    }

    #[test]
    fn test_restore_preserves_fields() {
        let original = create_test_folder();
        let restored = SyncFolder::restore(
            original.id(),
            original.local_root().clone(),
            original.remote_root().clone(),
            FolderStatus::Paused,
            ConflictStrategy::Manual,
            original.created_at(),
            None,
        );

        assert_eq!(restored.id(), original.id());
        assert_eq!(restored.status(), &FolderStatus::Paused);
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("active".parse::<FolderStatus>().unwrap(), FolderStatus::Active);
        assert_eq!("paused".parse::<FolderStatus>().unwrap(), FolderStatus::Paused);
        assert_eq!("error".parse::<FolderStatus>().unwrap(), FolderStatus::Error);
        assert!("bogus".parse::<FolderStatus>().is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let folder = create_test_folder();
        let json = serde_json::to_string(&folder).unwrap();
        let deserialized: SyncFolder = serde_json::from_str(&json).unwrap();

        assert_eq!(folder.id(), deserialized.id());
        assert_eq!(folder.status(), deserialized.status());
    }
}
