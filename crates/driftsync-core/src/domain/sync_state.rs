//! Per-folder sync counters
//!
//! One SyncState row exists per folder. It is written at the start and end
//! of each scan/poll cycle and read by status-reporting collaborators
//! through the command boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::FolderId;

/// Scan/poll bookkeeping and pending-transfer counters for one folder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// The folder these counters belong to
    pub folder_id: Option<FolderId>,
    /// When the last full local scan completed
    pub last_local_scan: Option<DateTime<Utc>>,
    /// When the last remote poll completed
    pub last_remote_poll: Option<DateTime<Utc>>,
    /// Number of entries currently pending upload
    pub pending_uploads: u64,
    /// Number of entries currently pending download
    pub pending_downloads: u64,
}

impl SyncState {
    /// Creates an empty state for a folder
    pub fn new(folder_id: FolderId) -> Self {
        Self {
            folder_id: Some(folder_id),
            ..Self::default()
        }
    }

    /// Records the completion of a local scan
    pub fn record_local_scan(&mut self, at: DateTime<Utc>) {
        self.last_local_scan = Some(at);
    }

    /// Records the completion of a remote poll
    pub fn record_remote_poll(&mut self, at: DateTime<Utc>) {
        self.last_remote_poll = Some(at);
    }

    /// Replaces the pending counters with freshly counted values
    pub fn set_pending(&mut self, uploads: u64, downloads: u64) {
        self.pending_uploads = uploads;
        self.pending_downloads = downloads;
    }

    /// Returns true if any transfers are still owed
    pub fn has_pending(&self) -> bool {
        self.pending_uploads > 0 || self.pending_downloads > 0
    }
}
