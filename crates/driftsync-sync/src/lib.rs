//! driftsync Sync - The background synchronization engine
//!
//! This crate holds the moving parts of driftsync:
//! - [`watcher`] - filesystem watcher abstraction with per-(path, action)
//!   debouncing
//! - [`scanner`] - local/remote change detection against the metadata store
//! - [`retry`] - the bounded exponential-backoff operation wrapper
//! - [`resolver`] - execution of conflict-engine outcomes
//! - [`scheduler`] - per-folder cycle triggers (timer, watcher signal)
//! - [`orchestrator`] - the per-folder state machine, shared worker pool,
//!   and the command loop behind the shell boundary
//! - [`filesystem`] - the local filesystem adapter
//! - [`memory_remote`] - an in-process loopback remote store, used by the
//!   integration tests and the daemon's `memory` adapter
//!
//! ## Data flow
//!
//! ```text
//! FolderWatcher ──► debounced FileEvents ──► per-folder scheduler signal
//!                                                   │
//! timer tick ───────────────────────────────────────┤
//!                                                   ▼
//!                              scan_local ─┬─ fetch_remote   (concurrent)
//!                                          ▼
//!                                    delta merge ──► conflict engine
//!                                          │
//!                                          ▼
//!                          bounded worker pool ──► retrying wrapper
//!                                          │
//!                                          ▼
//!                          metadata store update ──► engine events
//! ```

pub mod filesystem;
pub mod memory_remote;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod scanner;
pub mod scheduler;
pub mod watcher;

pub use filesystem::LocalFileSystemAdapter;
pub use memory_remote::InMemoryRemoteStore;
pub use orchestrator::Orchestrator;
pub use retry::{with_retry, RetryPolicy, Retryable};
pub use watcher::{EventDebouncer, FileAction, FileEvent, FolderWatcher, WatchError, WatchHandle};
