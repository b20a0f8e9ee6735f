use std::sync::Arc;

use pbs_journal::JournalWriter;
use pbs_storage::ObjectStore;
use pbs_storage_local::RedbObjectStore;
use pbs_txn::{BudgetLedger, TransactionManager};

/// Two independent PBS replicas, each backed by its own in-memory journal
/// and budget ledger, the way a real deployment runs two coordinators that
/// a transactional client drives in lock-step. Used by `pbs-txn`,
/// `pbs-client`, and `pbs-server` integration tests that need more than
/// one replica to exercise two-coordinator divergence scenarios.
pub struct TwoReplicaHarness {
    pub ledger_a: Arc<BudgetLedger>,
    pub ledger_b: Arc<BudgetLedger>,
    pub manager_a: Arc<TransactionManager>,
    pub manager_b: Arc<TransactionManager>,
}

impl TwoReplicaHarness {
    pub fn new(cap_per_key: u64, max_concurrent_transactions: usize) -> Self {
        let ledger_a = Arc::new(BudgetLedger::new(cap_per_key));
        let ledger_b = Arc::new(BudgetLedger::new(cap_per_key));

        let manager_a = single_replica_manager(max_concurrent_transactions);
        let manager_b = single_replica_manager(max_concurrent_transactions);
        manager_a.start();
        manager_b.start();

        TwoReplicaHarness { ledger_a, ledger_b, manager_a, manager_b }
    }
}

fn single_replica_manager(max_concurrent_transactions: usize) -> Arc<TransactionManager> {
    let store: Arc<dyn ObjectStore> =
        Arc::new(RedbObjectStore::in_memory().expect("in-memory object store never fails to open"));
    let journal = Arc::new(JournalWriter::new(store, "journal-bucket".to_string(), "p0".to_string(), 0));
    TransactionManager::new(journal, max_concurrent_transactions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_replicas_start_independently() {
        let harness = TwoReplicaHarness::new(10, 100);
        assert_eq!(harness.manager_a.active_transaction_count(), 0);
        assert_eq!(harness.manager_b.active_transaction_count(), 0);
    }
}
