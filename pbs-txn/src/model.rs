//! Exhaustive model of the six-phase protocol's state machine, checked
//! with `stateright` over the small state space of one transaction. Checks
//! the *2PC atomicity* property: every run either reaches `End` having
//! passed through Commit, or reaches `End` having passed through Abort,
//! and never both.

use stateright::{Checker, Model, Property};

use crate::phase_state::CurrentPhase;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct TxnState {
    phase: CurrentPhase,
    committed: bool,
    aborted: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
enum TxnAction {
    Begin,
    PrepareOk,
    PrepareInsufficientBudget,
    Commit,
    Notify,
    Abort,
    End,
}

struct TxnModel;

impl Model for TxnModel {
    type State = TxnState;
    type Action = TxnAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![TxnState { phase: CurrentPhase::NotStarted, committed: false, aborted: false }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        match state.phase {
            CurrentPhase::NotStarted => actions.push(TxnAction::Begin),
            CurrentPhase::Begin => {
                actions.push(TxnAction::PrepareOk);
                actions.push(TxnAction::PrepareInsufficientBudget);
            }
            CurrentPhase::Prepare => {
                actions.push(TxnAction::Commit);
                actions.push(TxnAction::Abort);
            }
            CurrentPhase::Commit => actions.push(TxnAction::Notify),
            CurrentPhase::Notify => actions.push(TxnAction::End),
            CurrentPhase::Abort => actions.push(TxnAction::End),
            CurrentPhase::End | CurrentPhase::Unknown => {}
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();
        match action {
            TxnAction::Begin => next.phase = CurrentPhase::Begin,
            TxnAction::PrepareOk => next.phase = CurrentPhase::Prepare,
            TxnAction::PrepareInsufficientBudget => next.phase = CurrentPhase::Abort,
            TxnAction::Commit => {
                next.phase = CurrentPhase::Commit;
                next.committed = true;
            }
            TxnAction::Notify => next.phase = CurrentPhase::Notify,
            TxnAction::Abort => {
                next.phase = CurrentPhase::Abort;
                next.aborted = true;
            }
            TxnAction::End => next.phase = CurrentPhase::End,
        }
        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("never both committed and aborted", |_, state| {
                !(state.committed && state.aborted)
            }),
            Property::always("commit only follows a successful prepare", |_, state| {
                !state.committed || state.phase == CurrentPhase::Commit || state.phase == CurrentPhase::Notify || state.phase == CurrentPhase::End
            }),
            Property::eventually("every run reaches End", |_, state| state.phase == CurrentPhase::End),
        ]
    }
}

#[test]
fn six_phase_protocol_always_reaches_end_without_committing_and_aborting_the_same_run() {
    TxnModel.checker().spawn_bfs().join().assert_properties();
}
