use std::sync::Arc;

use pbs_base::{Timestamp, TransactionId};

use crate::command::Command;
use crate::phase_state::CurrentPhase;

/// A transaction as tracked in the active table: one or more commands run
/// in lock-step through the six phases, a caller secret checked on every
/// request, and the bookkeeping (`expiration_time`, `last_execution_
/// timestamp`, `retry_count`) every in-flight transaction carries.
pub struct Transaction {
    pub id: TransactionId,
    pub secret: String,
    pub reporting_origin: String,
    pub commands: Vec<Arc<dyn Command>>,
    pub expiration_time: Timestamp,
    pub last_execution_timestamp: Timestamp,
    pub retry_count: u32,
    pub current_phase: CurrentPhase,
}

impl Transaction {
    pub fn new(
        id: TransactionId,
        secret: String,
        reporting_origin: String,
        commands: Vec<Arc<dyn Command>>,
        expiration_time: Timestamp,
        initial_timestamp: Timestamp,
    ) -> Self {
        Transaction {
            id,
            secret,
            reporting_origin,
            commands,
            expiration_time,
            last_execution_timestamp: initial_timestamp,
            retry_count: 0,
            current_phase: CurrentPhase::NotStarted,
        }
    }

    pub fn secret_matches(&self, candidate: &str) -> bool {
        self.secret == candidate
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiration_time <= now
    }
}
