use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pbs_base::{CommandId, ExecutionResult, Timestamp, TransactionId};

use crate::command::Command;
use crate::ledger::{budget_exhausted, BudgetLedger, LedgerKey};

/// One `(budget_key, time_bucket, token_count)` line from a Begin request,
/// already bucketed under the reporting origin bound at Begin. Serializable
/// so it can round-trip through a journal entry's payload for recovery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BudgetLine {
    pub key: LedgerKey,
    pub token_count: u64,
}

/// The server-local command every PBS-side transaction carries: validates
/// and then spends budget tokens against the partition's `BudgetLedger`.
/// Begin/Notify/End are no-ops here (the interesting bookkeeping is in
/// Prepare/Commit/Abort); they exist so this type satisfies `Command`
/// uniformly with `pbs-client`'s remote command, which does real work on
/// every phase.
pub struct ConsumeBudgetCommand {
    command_id: CommandId,
    txn_id: TransactionId,
    ledger: Arc<BudgetLedger>,
    lines: Vec<BudgetLine>,
    last_execution_timestamp: std::sync::atomic::AtomicU64,
}

impl ConsumeBudgetCommand {
    pub fn new(txn_id: TransactionId, ledger: Arc<BudgetLedger>, lines: Vec<BudgetLine>) -> Self {
        ConsumeBudgetCommand {
            command_id: CommandId::new(),
            txn_id,
            ledger,
            lines,
            last_execution_timestamp: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn lines(&self) -> &[BudgetLine] {
        &self.lines
    }
}

#[async_trait]
impl Command for ConsumeBudgetCommand {
    fn command_id(&self) -> CommandId {
        self.command_id
    }

    async fn begin(&self) -> ExecutionResult {
        ExecutionResult::success()
    }

    async fn prepare(&self) -> ExecutionResult {
        for line in &self.lines {
            if self.ledger.reserve(self.txn_id, line.key.clone(), line.token_count).is_err() {
                return budget_exhausted();
            }
        }
        ExecutionResult::success()
    }

    async fn commit(&self) -> ExecutionResult {
        for line in &self.lines {
            self.ledger.commit(self.txn_id, line.key.clone());
        }
        ExecutionResult::success()
    }

    async fn notify(&self) -> ExecutionResult {
        ExecutionResult::success()
    }

    async fn abort(&self) -> ExecutionResult {
        for line in &self.lines {
            self.ledger.release(self.txn_id, line.key.clone());
        }
        ExecutionResult::success()
    }

    async fn end(&self) -> ExecutionResult {
        ExecutionResult::success()
    }

    fn last_execution_timestamp(&self) -> Timestamp {
        self.last_execution_timestamp.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> LedgerKey {
        ("origin".to_string(), k.to_string(), 1)
    }

    #[tokio::test]
    async fn prepare_fails_when_a_line_exceeds_the_cap() {
        let ledger = Arc::new(BudgetLedger::new(1));
        let cmd = ConsumeBudgetCommand::new(
            TransactionId::new(),
            ledger,
            vec![BudgetLine { key: key("k"), token_count: 2 }],
        );
        assert!(!cmd.prepare().await.successful());
    }

    #[tokio::test]
    async fn full_happy_path_consumes_the_budget() {
        let ledger = Arc::new(BudgetLedger::new(1));
        let cmd = ConsumeBudgetCommand::new(
            TransactionId::new(),
            ledger.clone(),
            vec![BudgetLine { key: key("k"), token_count: 1 }],
        );
        assert!(cmd.begin().await.successful());
        assert!(cmd.prepare().await.successful());
        assert!(cmd.commit().await.successful());
        assert!(cmd.notify().await.successful());
        assert!(cmd.end().await.successful());
        assert_eq!(ledger.remaining(&key("k")), 0);
    }

    #[tokio::test]
    async fn abort_releases_the_reservation() {
        let ledger = Arc::new(BudgetLedger::new(1));
        let cmd = ConsumeBudgetCommand::new(
            TransactionId::new(),
            ledger.clone(),
            vec![BudgetLine { key: key("k"), token_count: 1 }],
        );
        cmd.prepare().await;
        cmd.abort().await;
        assert_eq!(ledger.remaining(&key("k")), 1);
    }
}
