//! driftsync IPC - The command/event boundary toward the surrounding shell
//!
//! The engine core accepts structured commands and pushes structured events;
//! the exact transport and encoding (D-Bus, a socket, an in-process channel
//! in a GUI shell) is the shell's concern. This crate is the contract: the
//! serde-stable message shapes and an [`EngineClient`] handle that carries
//! them over tokio channels.
//!
//! Every state-changing command eventually produces a corresponding event
//! on the broadcast stream.

pub mod client;
pub mod messages;

pub use client::{ClientError, EngineClient, EngineEndpoint};
pub use messages::{
    Command, CommandReply, ConflictSummary, Direction, EngineEvent, FolderSummary,
    ManualResolution, SyncStateSummary,
};
