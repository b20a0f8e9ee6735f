use serde::{Deserialize, Serialize};

/// The transaction's own progress marker, distinct from `pbs_net::Phase`
/// (which only names the six addressable phases a client can request).
/// `NotStarted` and `Unknown` are states the wire protocol's `Phase` has no
/// representation for: `NotStarted` is never observed outside this crate,
/// and `Unknown` is what a status query reports for a transaction the
/// journal hasn't finished replaying yet after a crash.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CurrentPhase {
    NotStarted,
    Begin,
    Prepare,
    Commit,
    Notify,
    End,
    Abort,
    Unknown,
}

impl CurrentPhase {
    /// Whether `next` is a legal transition from `self` for an ordinary
    /// client-driven phase request (not the synthetic `NotStarted`/`Unknown`
    /// values, which are never the target of a transition).
    pub fn can_advance_to(self, next: CurrentPhase) -> bool {
        use CurrentPhase::*;
        matches!(
            (self, next),
            (NotStarted, Begin)
                | (Begin, Prepare)
                | (Prepare, Commit)
                | (Commit, Notify)
                | (Notify, End)
                | (Begin, Abort)
                | (Prepare, Abort)
                | (Commit, Abort)
                | (Abort, End)
        )
    }
}

impl From<CurrentPhase> for pbs_net::TransactionExecutionPhase {
    fn from(phase: CurrentPhase) -> Self {
        use pbs_net::TransactionExecutionPhase as Wire;
        match phase {
            CurrentPhase::NotStarted => Wire::Unknown,
            CurrentPhase::Begin => Wire::Begin,
            CurrentPhase::Prepare => Wire::Prepare,
            CurrentPhase::Commit => Wire::Commit,
            CurrentPhase::Notify => Wire::Notify,
            CurrentPhase::End => Wire::End,
            CurrentPhase::Abort => Wire::Abort,
            CurrentPhase::Unknown => Wire::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CurrentPhase::*;

    #[test]
    fn happy_path_sequence_is_legal() {
        assert!(NotStarted.can_advance_to(Begin));
        assert!(Begin.can_advance_to(Prepare));
        assert!(Prepare.can_advance_to(Commit));
        assert!(Commit.can_advance_to(Notify));
        assert!(Notify.can_advance_to(End));
    }

    #[test]
    fn abort_path_is_legal_from_begin_prepare_or_commit() {
        assert!(Begin.can_advance_to(Abort));
        assert!(Prepare.can_advance_to(Abort));
        assert!(Commit.can_advance_to(Abort));
        assert!(Abort.can_advance_to(End));
    }

    #[test]
    fn skipping_a_phase_is_illegal() {
        assert!(!Begin.can_advance_to(Commit));
        assert!(!NotStarted.can_advance_to(Prepare));
        assert!(!End.can_advance_to(Begin));
    }
}
