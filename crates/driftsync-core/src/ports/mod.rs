//! Port definitions (hexagonal architecture)
//!
//! Ports are trait interfaces that decouple the domain and the sync
//! orchestrator from concrete adapters:
//! - `IStateRepository` - persistent metadata storage
//! - `IRemoteStore` - the remote file-store API the engine consumes
//! - `ILocalFileSystem` - local filesystem inspection and mutation

pub mod local_filesystem;
pub mod remote_store;
pub mod state_repository;

pub use local_filesystem::{FileSystemState, ILocalFileSystem};
pub use remote_store::{IRemoteStore, RemoteChange, RemoteEntry, RemoteStoreError};
pub use state_repository::IStateRepository;
