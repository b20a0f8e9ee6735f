use std::collections::HashMap;
use std::sync::Mutex;

use pbs_base::{ExecutionResult, ResultCode, TransactionId};

pub const BUDGET_EXHAUSTED: ResultCode = ResultCode("PBS_TXN_BUDGET_EXHAUSTED");

/// `(reporting_origin, budget_key, time_bucket_nanos)` — the unit the cap
/// is enforced against.
pub type LedgerKey = (String, String, u64);

/// In-memory accounting for one partition's budget tokens. `Prepare` takes
/// a tentative reservation (so a second transaction can't also pass
/// Prepare against the same tokens before the first Commits); `Commit`
/// folds the reservation into the permanently consumed total; `Abort`
/// releases it. Rebuilt by `CheckpointSource::snapshot`/restore rather than
/// recomputed from the journal on every restart.
#[derive(Default)]
pub struct BudgetLedger {
    cap: u64,
    consumed: Mutex<HashMap<LedgerKey, u64>>,
    reserved: Mutex<HashMap<LedgerKey, HashMap<TransactionId, u64>>>,
}

impl BudgetLedger {
    pub fn new(cap: u64) -> Self {
        BudgetLedger { cap, consumed: Mutex::new(HashMap::new()), reserved: Mutex::new(HashMap::new()) }
    }

    /// Tentatively reserves `token_count` for `txn` at `key`. Fails if the
    /// already-consumed total plus every other transaction's outstanding
    /// reservation plus this request would exceed the cap. Idempotent: a
    /// retried Prepare for the same `txn`/`key` replaces its own prior
    /// reservation amount rather than stacking another one.
    pub fn reserve(&self, txn: TransactionId, key: LedgerKey, token_count: u64) -> Result<(), ()> {
        let consumed = self.consumed.lock().unwrap();
        let mut reserved = self.reserved.lock().unwrap();
        let already_consumed = *consumed.get(&key).unwrap_or(&0);
        let by_txn = reserved.entry(key.clone()).or_default();
        let others_reserved: u64 = by_txn.iter().filter(|(t, _)| **t != txn).map(|(_, n)| *n).sum();
        if already_consumed + others_reserved + token_count > self.cap {
            return Err(());
        }
        by_txn.insert(txn, token_count);
        Ok(())
    }

    /// Folds `txn`'s reservation at `key` into the permanently consumed
    /// total. A no-op if there is no reservation (a retried Commit after a
    /// prior one already succeeded).
    pub fn commit(&self, txn: TransactionId, key: LedgerKey) {
        let mut reserved = self.reserved.lock().unwrap();
        if let Some(by_txn) = reserved.get_mut(&key) {
            if let Some(amount) = by_txn.remove(&txn) {
                *self.consumed.lock().unwrap().entry(key).or_insert(0) += amount;
            }
        }
    }

    /// Releases `txn`'s tentative reservation at `key` without consuming it.
    pub fn release(&self, txn: TransactionId, key: LedgerKey) {
        if let Some(by_txn) = self.reserved.lock().unwrap().get_mut(&key) {
            by_txn.remove(&txn);
        }
    }

    pub fn remaining(&self, key: &LedgerKey) -> u64 {
        let consumed = *self.consumed.lock().unwrap().get(key).unwrap_or(&0);
        let reserved: u64 =
            self.reserved.lock().unwrap().get(key).map(|m| m.values().sum()).unwrap_or(0);
        self.cap.saturating_sub(consumed + reserved)
    }
}

pub fn budget_exhausted() -> ExecutionResult {
    ExecutionResult::failure(BUDGET_EXHAUSTED)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> LedgerKey {
        ("origin".to_string(), k.to_string(), 12345)
    }

    #[test]
    fn reservation_blocks_a_second_transaction_over_cap() {
        let ledger = BudgetLedger::new(1);
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert!(ledger.reserve(a, key("k"), 1).is_ok());
        assert!(ledger.reserve(b, key("k"), 1).is_err());
    }

    #[test]
    fn commit_makes_the_reservation_permanent_and_release_frees_it() {
        let ledger = BudgetLedger::new(1);
        let a = TransactionId::new();
        let b = TransactionId::new();
        ledger.reserve(a, key("k"), 1).unwrap();
        ledger.release(a, key("k"));
        // After release, someone else can reserve the same tokens.
        assert!(ledger.reserve(b, key("k"), 1).is_ok());
        ledger.commit(b, key("k"));
        // And now the tokens are permanently spent.
        let c = TransactionId::new();
        assert!(ledger.reserve(c, key("k"), 1).is_err());
    }

    #[test]
    fn repeated_prepare_for_the_same_transaction_does_not_double_reserve() {
        let ledger = BudgetLedger::new(1);
        let a = TransactionId::new();
        assert!(ledger.reserve(a, key("k"), 1).is_ok());
        // Retried Prepare from the same transaction re-reserves the same
        // amount rather than adding to it, so it doesn't spuriously fail
        // against its own prior reservation.
        assert!(ledger.reserve(a, key("k"), 1).is_ok());
    }
}
