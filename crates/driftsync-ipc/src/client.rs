//! Engine client handle
//!
//! [`EngineClient`] is what a shell holds: it sends commands over an mpsc
//! channel (each with a oneshot reply) and subscribes to the engine's
//! broadcast event stream. [`EngineEndpoint`] is the engine-side half,
//! consumed by the orchestrator's command loop.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use driftsync_core::domain::conflict::ConflictStrategy;
use driftsync_core::domain::newtypes::{ConflictId, FolderId};

use crate::messages::{
    Command, CommandReply, ConflictSummary, EngineEvent, FolderSummary, ManualResolution,
    SyncStateSummary,
};

/// Default depth of the command channel
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Default depth of the event broadcast; slow subscribers that lag beyond
/// this lose the oldest events
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors surfaced to the shell by the client handle
#[derive(Debug, Error)]
pub enum ClientError {
    /// The engine's command loop has shut down
    #[error("Engine is not running")]
    EngineUnavailable,

    /// The engine rejected the command
    #[error("Command rejected: {0}")]
    Rejected(String),

    /// The engine replied with a shape the caller didn't expect
    #[error("Unexpected reply to command")]
    UnexpectedReply,
}

/// A command paired with its reply channel
#[derive(Debug)]
pub struct CommandEnvelope {
    /// The command to execute
    pub command: Command,
    /// Where the engine sends the reply
    pub reply_tx: oneshot::Sender<CommandReply>,
}

/// Shell-side handle to the engine
#[derive(Clone)]
pub struct EngineClient {
    cmd_tx: mpsc::Sender<CommandEnvelope>,
    event_tx: broadcast::Sender<EngineEvent>,
}

/// Engine-side half of the boundary
pub struct EngineEndpoint {
    /// Commands arriving from shells
    pub cmd_rx: mpsc::Receiver<CommandEnvelope>,
    /// Broadcast sender for engine events
    pub event_tx: broadcast::Sender<EngineEvent>,
}

/// Creates a connected client/endpoint pair
pub fn channel() -> (EngineClient, EngineEndpoint) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let client = EngineClient {
        cmd_tx,
        event_tx: event_tx.clone(),
    };
    let endpoint = EngineEndpoint { cmd_rx, event_tx };

    (client, endpoint)
}

impl EngineClient {
    /// Subscribes to the engine's event stream
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Sends a raw command and awaits its reply
    pub async fn send(&self, command: Command) -> Result<CommandReply, ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.cmd_tx
            .send(CommandEnvelope { command, reply_tx })
            .await
            .map_err(|_| ClientError::EngineUnavailable)?;

        reply_rx.await.map_err(|_| ClientError::EngineUnavailable)
    }

    /// Pairs a local root with a remote root; returns the new folder's id
    pub async fn add_folder(
        &self,
        local_root: std::path::PathBuf,
        remote_root: String,
    ) -> Result<FolderId, ClientError> {
        match self
            .send(Command::AddFolder {
                local_root,
                remote_root,
            })
            .await?
        {
            CommandReply::FolderAdded { folder_id } => Ok(folder_id),
            CommandReply::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Removes a folder and its metadata
    pub async fn remove_folder(&self, folder_id: FolderId) -> Result<(), ClientError> {
        self.expect_ack(Command::RemoveFolder { folder_id }).await
    }

    /// Pauses a folder
    pub async fn pause_folder(&self, folder_id: FolderId) -> Result<(), ClientError> {
        self.expect_ack(Command::PauseFolder { folder_id }).await
    }

    /// Resumes a paused folder
    pub async fn resume_folder(&self, folder_id: FolderId) -> Result<(), ClientError> {
        self.expect_ack(Command::ResumeFolder { folder_id }).await
    }

    /// Changes a folder's conflict strategy
    pub async fn set_conflict_strategy(
        &self,
        folder_id: FolderId,
        strategy: ConflictStrategy,
    ) -> Result<(), ClientError> {
        self.expect_ack(Command::SetConflictStrategy {
            folder_id,
            strategy,
        })
        .await
    }

    /// Lists all configured folders
    pub async fn folder_list(&self) -> Result<Vec<FolderSummary>, ClientError> {
        match self.send(Command::GetFolderList).await? {
            CommandReply::FolderList { folders } => Ok(folders),
            CommandReply::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Queries a folder's status and pending counters
    pub async fn sync_state(&self, folder_id: FolderId) -> Result<SyncStateSummary, ClientError> {
        match self.send(Command::GetSyncState { folder_id }).await? {
            CommandReply::SyncState(summary) => Ok(summary),
            CommandReply::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Lists a folder's unresolved conflicts
    pub async fn pending_conflicts(
        &self,
        folder_id: FolderId,
    ) -> Result<Vec<ConflictSummary>, ClientError> {
        match self.send(Command::GetPendingConflicts { folder_id }).await? {
            CommandReply::PendingConflicts { conflicts } => Ok(conflicts),
            CommandReply::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Supplies a decision for an unresolved conflict
    pub async fn resolve_conflict(
        &self,
        conflict_id: ConflictId,
        resolution: ManualResolution,
    ) -> Result<(), ClientError> {
        self.expect_ack(Command::ResolveConflict {
            conflict_id,
            resolution,
        })
        .await
    }

    async fn expect_ack(&self, command: Command) -> Result<(), ClientError> {
        match self.send(command).await? {
            CommandReply::Ack => Ok(()),
            CommandReply::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedReply),
        }
    }
}
