use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use pbs_base::{CommandId, TransactionId, Timestamp};

/// Whether an entry records a phase being entered, or that phase's
/// successful completion. On replay a transaction whose last entry is
/// `PhaseEntered` without a matching `PhaseSucceeded` is re-executed from
/// that phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    PhaseEntered,
    PhaseSucceeded,
}

/// One durable record in a partition's journal. `journal_id` is assigned by
/// the writer and increases monotonically within a partition; replay
/// order is journal_id order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub journal_id: u64,
    pub entry_type: EntryType,
    pub transaction_id: TransactionId,
    pub phase: String,
    pub last_execution_timestamp: Timestamp,
    pub per_command_timestamps: BTreeMap<CommandId, Timestamp>,
    pub wall_clock_millis: i64,
    /// Opaque, writer-defined bytes carried alongside the phase metadata so
    /// a reader can reconstruct domain state on replay (e.g. the budget
    /// lines and secret bound at Begin). Only the `PhaseEntered` entry for
    /// `Begin` is expected to carry a non-empty payload; later entries
    /// leave it empty since the state it would repeat is already durable.
    #[serde(default)]
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trips_through_json() {
        let entry = JournalEntry {
            journal_id: 1,
            entry_type: EntryType::PhaseEntered,
            transaction_id: TransactionId::new(),
            phase: "prepare".to_string(),
            last_execution_timestamp: 42,
            per_command_timestamps: BTreeMap::new(),
            wall_clock_millis: 0,
            payload: Vec::new(),
        };
        let json = serde_json::to_vec(&entry).unwrap();
        let back: JournalEntry = serde_json::from_slice(&json).unwrap();
        assert_eq!(entry, back);
    }
}
