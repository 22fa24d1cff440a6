//! File watching and debounced change notification
//!
//! Provides a [`FolderWatcher`] that wraps the `notify` crate to monitor
//! directory trees for changes, converting raw OS events into [`FileEvent`]
//! values. The platform backend (inotify, FSEvents, kqueue, ReadDirectoryChangesW)
//! is selected by `notify`'s `RecommendedWatcher`; callers never branch on
//! platform.
//!
//! The [`EventDebouncer`] suppresses duplicate notifications for the same
//! (path, action) pair within a configurable window, because editors emit
//! several events (write temp file, delete original, rename) for one
//! logical save.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue / FSEvents
//!       │
//!       ▼
//!  FolderWatcher ──► EventDebouncer ──► mpsc::channel ──► scheduler signal
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// ============================================================================
// FileEvent
// ============================================================================

/// The kind of change a [`FileEvent`] describes
///
/// A rename is modeled as a deletion of the old path plus a creation of the
/// new path; there is no rename action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileAction {
    /// A new file or directory appeared
    Created,
    /// An existing file's content or metadata changed
    Modified,
    /// A file or directory disappeared
    Deleted,
}

impl std::fmt::Display for FileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileAction::Created => write!(f, "created"),
            FileAction::Modified => write!(f, "modified"),
            FileAction::Deleted => write!(f, "deleted"),
        }
    }
}

/// A normalized filesystem change notification
///
/// Transient: consumed once by the change detector as a rescan signal and
/// discarded, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Absolute path the change happened at
    pub path: PathBuf,
    /// What happened
    pub action: FileAction,
    /// When the watcher saw it
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    /// Creates an event stamped with the current time
    pub fn new(path: PathBuf, action: FileAction) -> Self {
        Self {
            path,
            action,
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// WatchError
// ============================================================================

/// Failure to register or release a watch
#[derive(Debug, Error)]
pub enum WatchError {
    /// The requested root does not exist
    #[error("Watch root does not exist: {0}")]
    RootNotFound(PathBuf),

    /// The requested root is not a directory
    #[error("Watch root is not a directory: {0}")]
    RootNotADirectory(PathBuf),

    /// The requested root exists but cannot be accessed
    #[error("Watch root is not accessible: {path}: {source}")]
    RootNotAccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The platform backend failed
    #[error("Watch backend error: {0}")]
    Backend(#[from] notify::Error),
}

// ============================================================================
// EventDebouncer
// ============================================================================

/// Suppresses duplicate notifications per (path, action)
///
/// The first notification for a (path, action) pair is delivered and opens
/// a suppression window measured from that first notification; duplicates
/// arriving within the window are dropped. A *different* action for the
/// same path is always delivered and takes over the path's debounce slot,
/// so a delete following a debounced modify is never suppressed.
///
/// Bookkeeping is per-path; expired slots are pruned lazily on each call.
pub struct EventDebouncer {
    /// Suppression window, measured from the first notification
    window: Duration,
    /// Last delivered (action, time) per path
    seen: HashMap<PathBuf, (FileAction, Instant)>,
}

impl EventDebouncer {
    /// Creates a debouncer with the given suppression window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Decides whether an event should be delivered
    ///
    /// Returns `true` for the first (path, action) in a window and for any
    /// action change; `false` for duplicates within the window.
    pub fn accept(&mut self, path: &Path, action: FileAction) -> bool {
        let now = Instant::now();

        // Drop expired slots so the map doesn't grow with dead paths
        let window = self.window;
        self.seen
            .retain(|_, (_, first_seen)| now.duration_since(*first_seen) < window);

        match self.seen.get(path) {
            Some((seen_action, first_seen))
                if *seen_action == action && now.duration_since(*first_seen) < window =>
            {
                debug!(path = %path.display(), %action, "Debounced duplicate event");
                false
            }
            _ => {
                self.seen.insert(path.to_path_buf(), (action, now));
                true
            }
        }
    }

    /// Number of paths currently holding a debounce slot
    pub fn tracked_count(&self) -> usize {
        self.seen.len()
    }
}

// ============================================================================
// WatchHandle
// ============================================================================

/// Handle for an active recursive watch on one root
///
/// Pass it back to [`FolderWatcher::unwatch`] to stop delivery and release
/// the platform resources for that root.
#[derive(Debug)]
pub struct WatchHandle {
    root: PathBuf,
}

impl WatchHandle {
    /// Returns the watched root
    pub fn root(&self) -> &Path {
        &self.root
    }
}

// ============================================================================
// FolderWatcher
// ============================================================================

/// Watches directory trees for changes using the OS-native mechanism
///
/// Multiple roots may be watched concurrently, each independently
/// unwatchable. Raw OS events are mapped to [`FileEvent`] values, filtered
/// through the shared [`EventDebouncer`], and sent through an mpsc channel.
///
/// The debouncer lives behind a `std::sync::Mutex` because `notify`
/// delivers events on its own monitoring thread while the engine may
/// concurrently drain the channel.
pub struct FolderWatcher {
    /// The underlying notify watcher instance
    watcher: RecommendedWatcher,
}

impl FolderWatcher {
    /// Creates a new `FolderWatcher` with the given debounce window
    ///
    /// Returns the watcher and a receiver channel for consuming debounced
    /// change events.
    ///
    /// # Errors
    /// Returns an error if the underlying OS watcher cannot be created
    pub fn new(
        debounce_window: Duration,
    ) -> Result<(Self, mpsc::Receiver<FileEvent>), WatchError> {
        let (event_tx, event_rx) = mpsc::channel::<FileEvent>(1024);
        let debouncer = Arc::new(Mutex::new(EventDebouncer::new(debounce_window)));

        info!(
            debounce_ms = debounce_window.as_millis() as u64,
            "Initializing folder watcher"
        );

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for file_event in map_notify_event(&event) {
                        let delivered = match debouncer.lock() {
                            Ok(mut guard) => guard.accept(&file_event.path, file_event.action),
                            Err(poisoned) => poisoned
                                .into_inner()
                                .accept(&file_event.path, file_event.action),
                        };

                        if delivered {
                            if let Err(e) = event_tx.blocking_send(file_event) {
                                warn!(error = %e, "Failed to send change event (receiver dropped)");
                            }
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "Folder watcher error");
                }
            },
            notify::Config::default(),
        )?;

        Ok((Self { watcher }, event_rx))
    }

    /// Starts watching a directory tree recursively
    ///
    /// Fails immediately on a nonexistent or inaccessible root and
    /// registers nothing; recovery after a root disappears later is the
    /// orchestrator's job (it re-issues `watch` on the next scan cycle).
    ///
    /// # Errors
    /// Returns `WatchError::RootNotFound` / `RootNotADirectory` /
    /// `RootNotAccessible` for bad roots, `WatchError::Backend` if the
    /// platform watcher rejects the registration.
    pub fn watch(&mut self, root: &Path) -> Result<WatchHandle, WatchError> {
        let metadata = match std::fs::metadata(root) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WatchError::RootNotFound(root.to_path_buf()));
            }
            Err(e) => {
                return Err(WatchError::RootNotAccessible {
                    path: root.to_path_buf(),
                    source: e,
                });
            }
        };

        if !metadata.is_dir() {
            return Err(WatchError::RootNotADirectory(root.to_path_buf()));
        }

        info!(root = %root.display(), "Starting recursive watch");
        self.watcher.watch(root, RecursiveMode::Recursive)?;

        Ok(WatchHandle {
            root: root.to_path_buf(),
        })
    }

    /// Stops watching the handle's root and releases platform resources
    ///
    /// # Errors
    /// Returns an error if the root was not being watched
    pub fn unwatch(&mut self, handle: WatchHandle) -> Result<(), WatchError> {
        info!(root = %handle.root.display(), "Stopping watch");
        self.watcher.unwatch(&handle.root)?;
        Ok(())
    }
}

// ============================================================================
// Event mapping - notify::Event → FileEvent
// ============================================================================

/// Converts a `notify::Event` into zero or more [`FileEvent`]s
///
/// Mapping:
/// - `Create(*)` → `Created`
/// - `Modify(Data(*))` and other `Modify(*)` → `Modified`
/// - `Modify(Name(Both))` with 2 paths → `Deleted(old)` + `Created(new)`
/// - `Modify(Name(From))` → `Deleted`
/// - `Modify(Name(To))` → `Created`
/// - `Remove(*)` → `Deleted`
/// - Access and other events → nothing
fn map_notify_event(event: &notify::Event) -> Vec<FileEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => paths
            .first()
            .map(|p| vec![FileEvent::new(p.clone(), FileAction::Created)])
            .unwrap_or_default(),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if paths.len() >= 2 {
                debug!(
                    old = %paths[0].display(),
                    new = %paths[1].display(),
                    "Mapped rename as delete + create"
                );
                vec![
                    FileEvent::new(paths[0].clone(), FileAction::Deleted),
                    FileEvent::new(paths[1].clone(), FileAction::Created),
                ]
            } else {
                paths
                    .first()
                    .map(|p| vec![FileEvent::new(p.clone(), FileAction::Modified)])
                    .unwrap_or_default()
            }
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths
            .first()
            .map(|p| vec![FileEvent::new(p.clone(), FileAction::Deleted)])
            .unwrap_or_default(),

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
            .first()
            .map(|p| vec![FileEvent::new(p.clone(), FileAction::Created)])
            .unwrap_or_default(),

        EventKind::Modify(_) => paths
            .first()
            .map(|p| vec![FileEvent::new(p.clone(), FileAction::Modified)])
            .unwrap_or_default(),

        EventKind::Remove(_) => paths
            .first()
            .map(|p| vec![FileEvent::new(p.clone(), FileAction::Deleted)])
            .unwrap_or_default(),

        // Access events and everything else carry no sync-relevant change
        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            Vec::new()
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
