//! Message shapes for the command/event boundary
//!
//! Commands flow shell → engine with a reply per command; events flow
//! engine → shell on a broadcast stream. All types serialize with an
//! internal tag so shells in any language can dispatch on a single field.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use driftsync_core::domain::conflict::ConflictStrategy;
use driftsync_core::domain::newtypes::{ConflictId, FolderId};

// ============================================================================
// Commands
// ============================================================================

/// The user's choice when resolving a manual conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualResolution {
    /// Keep the local version; upload it over the remote one
    Local,
    /// Keep the remote version; download it over the local one
    Remote,
    /// Keep both; the remote version lands under a conflict-copy name
    KeepBoth,
}

/// Commands the engine accepts from the shell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Pair a local root with a remote root and start syncing it
    AddFolder {
        local_root: PathBuf,
        remote_root: String,
    },
    /// Stop syncing a folder and delete its metadata
    RemoveFolder { folder_id: FolderId },
    /// Suspend scanning and queued work for a folder
    PauseFolder { folder_id: FolderId },
    /// Resume a paused folder
    ResumeFolder { folder_id: FolderId },
    /// Change the conflict strategy applied to a folder
    SetConflictStrategy {
        folder_id: FolderId,
        strategy: ConflictStrategy,
    },
    /// List all configured folders
    GetFolderList,
    /// Query a folder's status and pending counters
    GetSyncState { folder_id: FolderId },
    /// List a folder's unresolved conflicts
    GetPendingConflicts { folder_id: FolderId },
    /// Supply a decision for an unresolved conflict
    ResolveConflict {
        conflict_id: ConflictId,
        resolution: ManualResolution,
    },
}

// ============================================================================
// Replies
// ============================================================================

/// Summary of a configured folder, as reported to the shell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderSummary {
    pub folder_id: FolderId,
    pub local_root: PathBuf,
    pub remote_root: String,
    pub status: String,
    pub conflict_strategy: ConflictStrategy,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// A folder's sync status and pending counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStateSummary {
    pub folder_id: FolderId,
    pub status: String,
    pub pending_uploads: u64,
    pub pending_downloads: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// An unresolved conflict, as reported to the shell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSummary {
    pub conflict_id: ConflictId,
    pub folder_id: FolderId,
    pub path: String,
    pub local_modified: DateTime<Utc>,
    pub remote_modified: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

/// Reply to a single command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum CommandReply {
    /// AddFolder succeeded
    FolderAdded { folder_id: FolderId },
    /// The state-changing command was accepted
    Ack,
    /// Reply to GetFolderList
    FolderList { folders: Vec<FolderSummary> },
    /// Reply to GetSyncState
    SyncState(SyncStateSummary),
    /// Reply to GetPendingConflicts
    PendingConflicts { conflicts: Vec<ConflictSummary> },
    /// The command failed
    Error { message: String },
}

// ============================================================================
// Events
// ============================================================================

/// Transfer direction, as seen from the local replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Local → remote
    Upload,
    /// Remote → local
    Download,
}

/// Events the engine pushes to the shell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A folder's status or pending counters changed
    SyncStateChanged {
        folder_id: FolderId,
        status: String,
        pending_uploads: u64,
        pending_downloads: u64,
    },
    /// A file finished transferring in the given direction
    FileTransferred {
        folder_id: FolderId,
        path: String,
        direction: Direction,
        size: u64,
    },
    /// Divergent edits were detected on a path
    ConflictDetected {
        folder_id: FolderId,
        path: String,
        local_modified: DateTime<Utc>,
        remote_modified: DateTime<Utc>,
    },
    /// An operation failed (after retry exhaustion for transient failures)
    OperationFailed {
        folder_id: FolderId,
        path: Option<String>,
        kind: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization_is_tagged() {
        let cmd = Command::AddFolder {
            local_root: PathBuf::from("/home/user/Documents"),
            remote_root: "/Documents".to_string(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"command\":\"add_folder\""));

        let parsed: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn test_resolve_conflict_roundtrip() {
        let cmd = Command::ResolveConflict {
            conflict_id: ConflictId::new(),
            resolution: ManualResolution::KeepBoth,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"resolution\":\"keep_both\""));

        let parsed: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = EngineEvent::FileTransferred {
            folder_id: FolderId::new(),
            path: "docs/report.pdf".to_string(),
            direction: Direction::Upload,
            size: 2048,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"file_transferred\""));
        assert!(json.contains("\"direction\":\"upload\""));

        let parsed: EngineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_reply_error_roundtrip() {
        let reply = CommandReply::Error {
            message: "no such folder".to_string(),
        };
        let json = serde_json::to_string(&reply).unwrap();
        let parsed: CommandReply = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, reply);
    }

    #[test]
    fn test_operation_failed_without_path() {
        let event = EngineEvent::OperationFailed {
            folder_id: FolderId::new(),
            path: None,
            kind: "timeout".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: EngineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
