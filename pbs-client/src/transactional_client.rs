use std::sync::Arc;

use uuid::Uuid;

use pbs_base::{err, Error, ExecutionResult, Result, Timestamp, TransactionId};
use pbs_net::BeginBudget;
use pbs_txn::{Command, PhaseError, Transaction, TransactionManager};

use crate::remote_command::ClientConsumeBudgetCommand;
use crate::wire_client::PbsEndpointClient;

/// Outcome of a `ConsumeBudget` call: the phase the transaction ultimately
/// reached and, on the happy path, the timestamp after End.
#[derive(Debug)]
pub struct ConsumeBudgetOutcome {
    pub reached_end: bool,
    pub last_execution_timestamp: Timestamp,
}

fn phase_error_to_error(e: PhaseError) -> Error {
    err(format!("{e:?}"))
}

/// The single entry point: `ConsumeBudget(context)`. Internally this
/// builds one `ClientConsumeBudgetCommand` per configured
/// PBS endpoint (one for single-coordinator mode, two for the default
/// two-coordinator mode) and drives them through a local
/// `TransactionManager` — the same six-phase machine `pbs-server` runs for
/// its own local commands, just pointed at remote HTTP calls instead.
pub struct TransactionalClient {
    manager: Arc<TransactionManager>,
    endpoints: Vec<Arc<PbsEndpointClient>>,
    reporting_origin: String,
}

impl TransactionalClient {
    /// `endpoints` must have length 1 (single-coordinator mode) or 2
    /// (the default two-coordinator mode).
    pub fn new(
        manager: Arc<TransactionManager>,
        endpoints: Vec<Arc<PbsEndpointClient>>,
        reporting_origin: String,
    ) -> Self {
        assert!(
            endpoints.len() == 1 || endpoints.len() == 2,
            "a transactional client drives one or two PBS coordinators, got {}",
            endpoints.len()
        );
        TransactionalClient { manager, endpoints, reporting_origin }
    }

    pub fn is_single_coordinator_mode(&self) -> bool {
        self.endpoints.len() == 1
    }

    /// Runs the full six-phase protocol for one consume-budget
    /// transaction. On the happy path this is Begin, Prepare, Commit,
    /// Notify, End against every endpoint in lock-step; if any endpoint's
    /// Prepare or Commit fails, Abort then End run instead — a non-success
    /// result at either replica drives the abort path for both.
    pub async fn consume_budget(
        &self,
        budgets: Vec<BeginBudget>,
        expiration_time: Timestamp,
    ) -> Result<ConsumeBudgetOutcome> {
        let txn_id = TransactionId::new();
        let secret = Uuid::new_v4().to_string();
        let begin_body = pbs_net::BeginRequestBody::new(budgets);
        let begin_payload = serde_json::to_vec(&begin_body)?;

        let commands: Vec<Arc<dyn Command>> = self
            .endpoints
            .iter()
            .map(|endpoint| {
                Arc::new(ClientConsumeBudgetCommand::new(
                    txn_id,
                    secret.clone(),
                    endpoint.clone(),
                    begin_body.clone(),
                )) as Arc<dyn Command>
            })
            .collect();

        let txn = Transaction::new(
            txn_id,
            secret.clone(),
            self.reporting_origin.clone(),
            commands,
            expiration_time,
            0,
        );

        let t0 = self.manager.begin(txn, begin_payload).await.map_err(phase_error_to_error)?;

        match self.drive_happy_path(txn_id, &secret, t0).await {
            Ok(t_end) => Ok(ConsumeBudgetOutcome { reached_end: true, last_execution_timestamp: t_end }),
            Err((failure, t_last_good)) => {
                self.abort_and_end(txn_id, &secret, t_last_good).await;
                Err(failure)
            }
        }
    }

    /// Runs Prepare, Commit, Notify, End. On failure returns the triggering
    /// error together with the last timestamp known good, so the caller can
    /// abort from there.
    async fn drive_happy_path(
        &self,
        txn_id: TransactionId,
        secret: &str,
        t0: Timestamp,
    ) -> std::result::Result<Timestamp, (Error, Timestamp)> {
        let t1 = self.manager.prepare(txn_id, secret, t0).await.map_err(|e| (phase_error_to_error(e), t0))?;
        let t2 = self.manager.commit(txn_id, secret, t1).await.map_err(|e| (phase_error_to_error(e), t1))?;
        let t3 = self.manager.notify(txn_id, secret, t2).await.map_err(|e| (phase_error_to_error(e), t2))?;
        let t4 = self.manager.end(txn_id, secret, t3).await.map_err(|e| (phase_error_to_error(e), t3))?;
        Ok(t4)
    }

    async fn abort_and_end(&self, txn_id: TransactionId, secret: &str, last_good: Timestamp) {
        let aborted = match self.manager.abort(txn_id, secret, last_good).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(target: "pbs", transaction_id = %txn_id, error = ?e, "abort rejected, transaction left for expiry cleanup");
                return;
            }
        };
        if let Err(e) = self.manager.end(txn_id, secret, aborted).await {
            tracing::warn!(target: "pbs", transaction_id = %txn_id, error = ?e, "end after abort rejected");
        }
    }
}

/// The `{status, code}` shape every async operation yields; `consume_budget`'s
/// `Result<_, Error>` is the
/// higher-level API, but callers that want the raw tri-state can inspect
/// this instead of matching on the error text.
pub fn outcome_execution_result(outcome: &std::result::Result<ConsumeBudgetOutcome, Error>) -> ExecutionResult {
    match outcome {
        Ok(_) => ExecutionResult::success(),
        Err(_) => ExecutionResult::failure(pbs_base::ResultCode("PBS_CLIENT_CONSUME_BUDGET_FAILED")),
    }
}
