use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use pbs_base::{CommandId, ExecutionResult, ExecutionStatus, ResultCode, Timestamp, TransactionId};
use pbs_executor::{ExponentialBackoff, RetryStrategy};
use pbs_net::{BeginRequestBody, Phase};
use pbs_txn::Command;

use crate::wire_client::PbsEndpointClient;

/// 31ms base, doubling, capped at 10 attempts — the backoff policy exercised
/// against a retryable transport error on the remote endpoint.
const RETRY_BASE_MS: u64 = 31;
const MAX_RETRIES: u32 = 10;

pub const PHASE_RETRIES_EXHAUSTED: ResultCode = ResultCode("PBS_CLIENT_PHASE_RETRIES_EXHAUSTED");

/// No server timestamp has been observed yet for this command. Any phase
/// request sent with this value is expected to be rejected with a
/// precondition failure (except Begin, which the server never timestamp-
/// checks), which is exactly the signal this command needs to go fetch the
/// server's real value before proceeding.
pub const UNINITIALIZED_TIMESTAMP: Timestamp = u64::MAX;

/// The per-replica command a transactional client drives against one
/// remote PBS endpoint. Implements `pbs_txn::Command` so the local
/// `TransactionManager` can run it through the same six-phase state
/// machine it uses for the server's own local `ConsumeBudgetCommand` —
/// this is the "outer" transaction that coordinates one command per
/// remote replica.
pub struct ClientConsumeBudgetCommand {
    command_id: CommandId,
    txn_id: TransactionId,
    secret: String,
    endpoint: Arc<PbsEndpointClient>,
    begin_body: BeginRequestBody,
    last_execution_timestamp: AtomicU64,
}

impl ClientConsumeBudgetCommand {
    pub fn new(
        txn_id: TransactionId,
        secret: String,
        endpoint: Arc<PbsEndpointClient>,
        begin_body: BeginRequestBody,
    ) -> Self {
        ClientConsumeBudgetCommand {
            command_id: CommandId::new(),
            txn_id,
            secret,
            endpoint,
            begin_body,
            last_execution_timestamp: AtomicU64::new(UNINITIALIZED_TIMESTAMP),
        }
    }

    fn current_timestamp(&self) -> Timestamp {
        self.last_execution_timestamp.load(Ordering::SeqCst)
    }

    fn adopt_timestamp(&self, new_timestamp: Timestamp) {
        self.last_execution_timestamp.store(new_timestamp, Ordering::SeqCst);
    }

    /// Runs one phase against the remote endpoint, with inline 412
    /// recovery (status query, adopt the server's timestamp, replay once)
    /// folded into a single attempt, and an outer bounded backoff loop
    /// wrapping retryable (5xx) results. `body` is only non-empty for
    /// Begin.
    async fn execute_phase(&self, phase: Phase, body: Option<&BeginRequestBody>) -> ExecutionResult {
        let backoff = ExponentialBackoff {
            base_nanos: Duration::from_millis(RETRY_BASE_MS).as_nanos() as u64,
            max_nanos: Duration::from_secs(5).as_nanos() as u64,
        };

        for attempt in 0..=MAX_RETRIES {
            let outcome = match self
                .endpoint
                .send_phase(phase, self.txn_id, &self.secret, self.current_timestamp(), body)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(target: "pbs", error = %e, phase = %phase, "phase request errored");
                    tokio::time::sleep(Duration::from_nanos(backoff.delay_nanos(attempt))).await;
                    continue;
                }
            };

            if outcome.result.status == ExecutionStatus::Retry
                && outcome.result.code == pbs_net::PRECONDITION_FAILED
            {
                match self.endpoint.query_status(self.txn_id, &self.secret).await {
                    Ok(status) => {
                        self.adopt_timestamp(status.last_execution_timestamp);
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(target: "pbs", error = %e, "status query after 412 failed");
                        tokio::time::sleep(Duration::from_nanos(backoff.delay_nanos(attempt))).await;
                        continue;
                    }
                }
            }

            if outcome.result.successful() {
                if let Some(new_timestamp) = outcome.new_timestamp {
                    self.adopt_timestamp(new_timestamp);
                }
                return outcome.result;
            }

            if outcome.result.status != ExecutionStatus::Retry {
                return outcome.result;
            }

            tokio::time::sleep(Duration::from_nanos(backoff.delay_nanos(attempt))).await;
        }

        ExecutionResult::failure(PHASE_RETRIES_EXHAUSTED)
    }
}

#[async_trait]
impl Command for ClientConsumeBudgetCommand {
    fn command_id(&self) -> CommandId {
        self.command_id
    }

    async fn begin(&self) -> ExecutionResult {
        self.execute_phase(Phase::Begin, Some(&self.begin_body)).await
    }

    async fn prepare(&self) -> ExecutionResult {
        self.execute_phase(Phase::Prepare, None).await
    }

    async fn commit(&self) -> ExecutionResult {
        self.execute_phase(Phase::Commit, None).await
    }

    async fn notify(&self) -> ExecutionResult {
        self.execute_phase(Phase::Notify, None).await
    }

    async fn abort(&self) -> ExecutionResult {
        self.execute_phase(Phase::Abort, None).await
    }

    async fn end(&self) -> ExecutionResult {
        self.execute_phase(Phase::End, None).await
    }

    fn last_execution_timestamp(&self) -> Timestamp {
        self.current_timestamp()
    }
}
