use serde::{Deserialize, Serialize};

use pbs_base::Timestamp;

use crate::consume_budget::BudgetLine;

/// What a `ConsumeBudgetCommand` transaction journals alongside its
/// `Begin` phase-entered entry, beyond the bare client-submitted JSON: the
/// secret and expiration bound at admission and the already-resolved
/// budget lines. Carrying these lets `TransactionManager::recover`
/// reconstruct the transaction from the journal alone after a restart,
/// replaying forward, rather than needing the client to resend Begin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeginRecoveryPayload {
    pub secret: String,
    pub reporting_origin: String,
    pub expiration_time: Timestamp,
    pub lines: Vec<BudgetLine>,
}
