//! driftsync Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `SyncFolder`, `FileEntry`, `Conflict`, `SyncState`
//! - **Port definitions** - Traits for adapters: `IRemoteStore`, `IStateRepository`, `ILocalFileSystem`
//! - **Configuration** - Typed YAML configuration passed explicitly into the engine
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no external dependencies.
//! Ports define trait interfaces that adapter crates implement. The sync
//! orchestrator in `driftsync-sync` drives domain entities through the ports.

pub mod config;
pub mod domain;
pub mod ports;
