//! Strategy evaluation for diverged paths
//!
//! Maps a folder's configured [`ConflictStrategy`] and the two replicas'
//! modification timestamps to a concrete [`ConflictOutcome`]. The outcome
//! states which transfer the engine must perform and which resolution value
//! gets recorded on the conflict; execution happens in the sync engine.

use chrono::{DateTime, Utc};
use tracing::debug;

use driftsync_core::domain::conflict::{ConflictResolution, ConflictStrategy};

/// What the engine must do to resolve a diverged path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// Upload the local version, overwriting remote; record the given
    /// resolution
    UploadLocal(ConflictResolution),
    /// Download the remote version, overwriting local; record the given
    /// resolution
    DownloadRemote(ConflictResolution),
    /// Leave the local file untouched and download the remote version
    /// under a renamed conflict-copy path
    KeepBoth,
    /// Record the conflict as unresolved and wait for an explicit decision
    Manual,
}

/// Decides the outcome for a diverged path under the given strategy
///
/// For `last_write_wins` the newer modification timestamp wins; an exact
/// tie deterministically favors the remote side.
pub fn decide(
    strategy: ConflictStrategy,
    local_modified: DateTime<Utc>,
    remote_modified: DateTime<Utc>,
) -> ConflictOutcome {
    let outcome = match strategy {
        ConflictStrategy::LastWriteWins => {
            if local_modified > remote_modified {
                ConflictOutcome::UploadLocal(ConflictResolution::LastWriteWins)
            } else {
                // Tie favors remote
                ConflictOutcome::DownloadRemote(ConflictResolution::LastWriteWins)
            }
        }
        ConflictStrategy::LocalWins => {
            ConflictOutcome::UploadLocal(ConflictResolution::LocalWins)
        }
        ConflictStrategy::RemoteWins => {
            ConflictOutcome::DownloadRemote(ConflictResolution::RemoteWins)
        }
        ConflictStrategy::KeepBoth => ConflictOutcome::KeepBoth,
        ConflictStrategy::Manual => ConflictOutcome::Manual,
    };

    debug!(
        strategy = %strategy,
        local_modified = %local_modified,
        remote_modified = %remote_modified,
        ?outcome,
        "Conflict strategy decided"
    );

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_last_write_wins_local_newer() {
        let base = Utc::now();
        let outcome = decide(
            ConflictStrategy::LastWriteWins,
            base + Duration::seconds(5),
            base + Duration::seconds(2),
        );
        assert_eq!(
            outcome,
            ConflictOutcome::UploadLocal(ConflictResolution::LastWriteWins)
        );
    }

    #[test]
    fn test_last_write_wins_remote_newer() {
        // Locally modified at T+2, remotely at T+5: remote wins, download
        let base = Utc::now();
        let outcome = decide(
            ConflictStrategy::LastWriteWins,
            base + Duration::seconds(2),
            base + Duration::seconds(5),
        );
        assert_eq!(
            outcome,
            ConflictOutcome::DownloadRemote(ConflictResolution::LastWriteWins)
        );
    }

    #[test]
    fn test_last_write_wins_tie_favors_remote() {
        let t = Utc::now();
        let outcome = decide(ConflictStrategy::LastWriteWins, t, t);
        assert_eq!(
            outcome,
            ConflictOutcome::DownloadRemote(ConflictResolution::LastWriteWins)
        );
    }

    #[test]
    fn test_local_wins_ignores_timestamps() {
        let base = Utc::now();
        // Remote is newer, local still wins
        let outcome = decide(
            ConflictStrategy::LocalWins,
            base,
            base + Duration::hours(1),
        );
        assert_eq!(
            outcome,
            ConflictOutcome::UploadLocal(ConflictResolution::LocalWins)
        );
    }

    #[test]
    fn test_remote_wins_ignores_timestamps() {
        let base = Utc::now();
        let outcome = decide(
            ConflictStrategy::RemoteWins,
            base + Duration::hours(1),
            base,
        );
        assert_eq!(
            outcome,
            ConflictOutcome::DownloadRemote(ConflictResolution::RemoteWins)
        );
    }

    #[test]
    fn test_keep_both() {
        let t = Utc::now();
        assert_eq!(
            decide(ConflictStrategy::KeepBoth, t, t),
            ConflictOutcome::KeepBoth
        );
    }

    #[test]
    fn test_manual() {
        let t = Utc::now();
        assert_eq!(decide(ConflictStrategy::Manual, t, t), ConflictOutcome::Manual);
    }
}
