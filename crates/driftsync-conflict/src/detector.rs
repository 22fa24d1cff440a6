//! Divergence classification
//!
//! The only conflict trigger in the engine: the same path reported changed
//! by both the local scan and the remote poll, relative to the baseline
//! checksum recorded the last time the file was fully synced. A change on
//! exactly one side is never a conflict, regardless of how stale the other
//! side's metadata is, and edits that arrive at identical content converge
//! silently.

use driftsync_core::domain::newtypes::Checksum;

/// Which replica a one-sided change belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The local filesystem
    Local,
    /// The remote file store
    Remote,
}

/// Classification of a path reported changed on both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divergence {
    /// Only one side actually differs from the reconciliation baseline;
    /// the other side's report was redundant (e.g. a touched timestamp)
    OneSided(Side),
    /// Both sides differ from the baseline but hold identical content;
    /// not a conflict, the shared checksum becomes the new baseline
    Convergent,
    /// Both sides diverged with different resulting content
    Diverged,
}

/// Stateless divergence classifier
pub struct ConflictDetector;

impl ConflictDetector {
    /// Classifies a path that both `scan_local` and `fetch_remote` reported
    /// as changed
    ///
    /// `baseline` is the checksum recorded the last time the path was fully
    /// synced; `None` means the path was never reconciled (new on both
    /// sides simultaneously).
    pub fn classify(
        baseline: Option<&Checksum>,
        local: &Checksum,
        remote: &Checksum,
    ) -> Divergence {
        let local_changed = baseline != Some(local);
        let remote_changed = baseline != Some(remote);

        match (local_changed, remote_changed) {
            (true, false) => Divergence::OneSided(Side::Local),
            (false, true) => Divergence::OneSided(Side::Remote),
            // Both match the baseline: neither actually changed, which we
            // treat as a convergent no-op
            (false, false) => Divergence::Convergent,
            (true, true) => {
                if local == remote {
                    Divergence::Convergent
                } else {
                    Divergence::Diverged
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksum(c: char) -> Checksum {
        Checksum::new(c.to_string().repeat(64)).unwrap()
    }

    #[test]
    fn test_both_diverged() {
        let baseline = checksum('0');
        let local = checksum('a');
        let remote = checksum('b');

        assert_eq!(
            ConflictDetector::classify(Some(&baseline), &local, &remote),
            Divergence::Diverged
        );
    }

    #[test]
    fn test_convergent_edits_are_not_conflicts() {
        let baseline = checksum('0');
        let same = checksum('a');

        assert_eq!(
            ConflictDetector::classify(Some(&baseline), &same, &same),
            Divergence::Convergent
        );
    }

    #[test]
    fn test_local_only_change_is_one_sided() {
        let baseline = checksum('0');
        let local = checksum('a');

        assert_eq!(
            ConflictDetector::classify(Some(&baseline), &local, &baseline),
            Divergence::OneSided(Side::Local)
        );
    }

    #[test]
    fn test_remote_only_change_is_one_sided() {
        let baseline = checksum('0');
        let remote = checksum('b');

        assert_eq!(
            ConflictDetector::classify(Some(&baseline), &baseline, &remote),
            Divergence::OneSided(Side::Remote)
        );
    }

    #[test]
    fn test_neither_changed_converges() {
        let baseline = checksum('0');

        assert_eq!(
            ConflictDetector::classify(Some(&baseline), &baseline, &baseline),
            Divergence::Convergent
        );
    }

    #[test]
    fn test_no_baseline_same_content_converges() {
        // New file created identically on both sides
        let same = checksum('a');
        assert_eq!(
            ConflictDetector::classify(None, &same, &same),
            Divergence::Convergent
        );
    }

    #[test]
    fn test_no_baseline_different_content_diverges() {
        let local = checksum('a');
        let remote = checksum('b');
        assert_eq!(
            ConflictDetector::classify(None, &local, &remote),
            Divergence::Diverged
        );
    }
}
