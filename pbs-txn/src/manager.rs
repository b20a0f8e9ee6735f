use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use pbs_base::{ExecutionResult, ResultCode, Timestamp, TransactionId};
use pbs_journal::{CheckpointSource, EntryType, JournalEntry, JournalWriter};

use crate::command::Command;
use crate::consume_budget::{BudgetLine, ConsumeBudgetCommand};
use crate::ledger::BudgetLedger;
use crate::phase_state::CurrentPhase;
use crate::recovery::BeginRecoveryPayload;
use crate::transaction::Transaction;

fn parse_phase_name(name: &str) -> Option<CurrentPhase> {
    match name {
        "Begin" => Some(CurrentPhase::Begin),
        "Prepare" => Some(CurrentPhase::Prepare),
        "Commit" => Some(CurrentPhase::Commit),
        "Notify" => Some(CurrentPhase::Notify),
        "Abort" => Some(CurrentPhase::Abort),
        "End" => Some(CurrentPhase::End),
        _ => None,
    }
}

/// Per-transaction progress accumulated while scanning the journal
/// forward, for `TransactionManager::recover`.
#[derive(Default)]
struct RecoveredProgress {
    secret: String,
    origin: String,
    expiration_time: Timestamp,
    lines: Vec<BudgetLine>,
    begin_payload: Vec<u8>,
    last_succeeded_phase: Option<CurrentPhase>,
    last_succeeded_timestamp: Timestamp,
    phase_entered: Option<CurrentPhase>,
    entered_without_success: bool,
}

pub const CANNOT_ACCEPT_NEW_REQUESTS: ResultCode = ResultCode("PBS_TXN_CANNOT_ACCEPT_NEW_REQUESTS");

/// Why a phase request could not be carried out. Distinguished from
/// `ExecutionResult` because several of these map to specific HTTP status
/// codes (`pbs-server` owns that translation) that don't fit the generic
/// success/retry/failure shape the commands themselves return.
#[derive(Debug)]
pub enum PhaseError {
    NotFound,
    WrongSecret,
    /// The timestamp the caller presented doesn't match what the server
    /// has stored; carries the server's value so the caller can adopt it
    /// via a status query and replay.
    TimestampMismatch { server_timestamp: Timestamp },
    IllegalTransition { current: CurrentPhase },
    Expired,
    CannotAcceptNewRequests,
    /// A command's phase hook returned `Failure`; carries its result so
    /// the caller can distinguish e.g. budget exhaustion from other
    /// causes.
    CommandFailed(ExecutionResult),
}

pub struct StatusReport {
    pub has_failures: bool,
    pub is_expired: bool,
    pub last_execution_timestamp: Timestamp,
    pub phase: CurrentPhase,
}

/// Drives the six-phase protocol for every transaction active on this
/// node. One `TransactionManager` per partition. Used both by `pbs-server`
/// (commands = the local `ConsumeBudgetCommand`) and by `pbs-client`
/// (commands = per-replica `ClientConsumeBudgetCommand`s) — the manager
/// itself has no idea which.
pub struct TransactionManager {
    active: Mutex<HashMap<TransactionId, Transaction>>,
    active_count: AtomicUsize,
    max_concurrent_transactions: usize,
    started: AtomicBool,
    journal: Arc<JournalWriter>,
}

impl TransactionManager {
    pub fn new(journal: Arc<JournalWriter>, max_concurrent_transactions: usize) -> Arc<Self> {
        Arc::new(TransactionManager {
            active: Mutex::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
            max_concurrent_transactions,
            started: AtomicBool::new(false),
            journal,
        })
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    /// Rejects new submissions and waits for every active transaction's End
    /// callback to finish. The active-transaction decrement is the *last*
    /// action an End callback takes, so once this returns no callback is
    /// still running.
    pub async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        while self.active_count.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn active_transaction_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    fn now() -> Timestamp {
        // Monotonic ticks, not wall-clock; a simple process-wide counter
        // based on steady-clock nanos is enough since this is only ever
        // compared against other values this process produced.
        pbs_base::Clock::now_steady_nanos(&pbs_base::SystemClock)
    }

    /// Accepts a new transaction, runs Begin on every command, and admits
    /// it to the active table. Fails with `CannotAcceptNewRequests` if the
    /// manager isn't started or is already at capacity.
    pub async fn begin(&self, mut txn: Transaction, begin_payload: Vec<u8>) -> Result<Timestamp, PhaseError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(PhaseError::CannotAcceptNewRequests);
        }
        if self.active_count.load(Ordering::SeqCst) >= self.max_concurrent_transactions {
            return Err(PhaseError::CannotAcceptNewRequests);
        }
        if txn.is_expired(Self::now()) {
            return Err(PhaseError::Expired);
        }

        self.journal_phase_entered(&txn, CurrentPhase::Begin, begin_payload).await;
        for command in &txn.commands {
            let result = command.begin().await;
            if !result.successful() {
                return Err(PhaseError::CommandFailed(result));
            }
        }
        txn.current_phase = CurrentPhase::Begin;
        txn.last_execution_timestamp += 1;
        let timestamp = txn.last_execution_timestamp;
        self.journal_phase_succeeded(&txn).await;

        let id = txn.id;
        self.active.lock().await.insert(id, txn);
        self.active_count.fetch_add(1, Ordering::SeqCst);
        Ok(timestamp)
    }

    pub async fn prepare(&self, id: TransactionId, secret: &str, client_timestamp: Timestamp) -> Result<Timestamp, PhaseError> {
        self.run_phase(id, secret, client_timestamp, CurrentPhase::Prepare).await
    }

    pub async fn commit(&self, id: TransactionId, secret: &str, client_timestamp: Timestamp) -> Result<Timestamp, PhaseError> {
        self.run_phase(id, secret, client_timestamp, CurrentPhase::Commit).await
    }

    pub async fn notify(&self, id: TransactionId, secret: &str, client_timestamp: Timestamp) -> Result<Timestamp, PhaseError> {
        self.run_phase(id, secret, client_timestamp, CurrentPhase::Notify).await
    }

    /// Subphase failures inside Abort convert to Success for the outer
    /// flow: Abort always runs to
    /// completion so End can follow. Only the transition-legality and
    /// secret/timestamp checks can still fail it.
    pub async fn abort(&self, id: TransactionId, secret: &str, client_timestamp: Timestamp) -> Result<Timestamp, PhaseError> {
        self.run_phase(id, secret, client_timestamp, CurrentPhase::Abort).await
    }

    /// Runs End and evicts the transaction from the active table. The
    /// active-count decrement happens last, after the command hooks and
    /// the table removal, so `stop()`'s spin never observes zero while an
    /// End callback could still run a command hook.
    pub async fn end(&self, id: TransactionId, secret: &str, client_timestamp: Timestamp) -> Result<Timestamp, PhaseError> {
        let result = self.run_phase(id, secret, client_timestamp, CurrentPhase::End).await;
        if result.is_ok() {
            self.active.lock().await.remove(&id);
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }

    pub async fn status(&self, id: TransactionId, secret: &str) -> Result<StatusReport, PhaseError> {
        let active = self.active.lock().await;
        let txn = active.get(&id).ok_or(PhaseError::NotFound)?;
        if !txn.secret_matches(secret) {
            return Err(PhaseError::WrongSecret);
        }
        Ok(StatusReport {
            has_failures: false,
            is_expired: txn.is_expired(Self::now()),
            last_execution_timestamp: txn.last_execution_timestamp,
            phase: txn.current_phase,
        })
    }

    /// Reconstructs the active table from a partition's journal after a
    /// restart: a transaction whose last entry is a
    /// phase-entered record without its matching phase-succeeded record is
    /// re-executed from that phase; a transaction that reached `End` is
    /// already complete and is not reinserted. Must run after `start()` (the
    /// phase methods this calls gate on it) but before the node accepts any
    /// external traffic.
    pub async fn recover(&self, entries: Vec<JournalEntry>, ledger: Arc<BudgetLedger>) -> pbs_base::Result<()> {
        let mut per_txn: HashMap<TransactionId, RecoveredProgress> = HashMap::new();

        for entry in entries {
            let phase = parse_phase_name(&entry.phase);
            let progress = per_txn.entry(entry.transaction_id).or_default();
            match entry.entry_type {
                EntryType::PhaseEntered => {
                    if phase == Some(CurrentPhase::Begin) && !entry.payload.is_empty() {
                        if let Ok(recovery) = serde_json::from_slice::<BeginRecoveryPayload>(&entry.payload) {
                            progress.secret = recovery.secret;
                            progress.origin = recovery.reporting_origin;
                            progress.expiration_time = recovery.expiration_time;
                            progress.lines = recovery.lines;
                            progress.begin_payload = entry.payload.clone();
                        }
                    }
                    progress.phase_entered = phase;
                    progress.entered_without_success = true;
                }
                EntryType::PhaseSucceeded => {
                    progress.last_succeeded_phase = phase;
                    progress.last_succeeded_timestamp = entry.last_execution_timestamp;
                    progress.entered_without_success = false;
                }
            }
        }

        for (id, progress) in per_txn {
            if progress.phase_entered.is_none() {
                continue;
            }
            if !progress.entered_without_success && progress.last_succeeded_phase == Some(CurrentPhase::End) {
                continue;
            }

            let command: Arc<dyn Command> =
                Arc::new(ConsumeBudgetCommand::new(id, ledger.clone(), progress.lines.clone()));

            if progress.entered_without_success && progress.phase_entered == Some(CurrentPhase::Begin) {
                let txn = Transaction::new(
                    id,
                    progress.secret.clone(),
                    progress.origin.clone(),
                    vec![command],
                    progress.expiration_time,
                    0,
                );
                if let Err(e) = self.begin(txn, progress.begin_payload.clone()).await {
                    tracing::warn!(target: "pbs", transaction_id = %id, error = ?e, "failed to replay Begin during recovery");
                }
                continue;
            }

            let mut txn = Transaction::new(
                id,
                progress.secret.clone(),
                progress.origin.clone(),
                vec![command],
                progress.expiration_time,
                0,
            );
            txn.current_phase = progress.last_succeeded_phase.unwrap_or(CurrentPhase::NotStarted);
            txn.last_execution_timestamp = progress.last_succeeded_timestamp;
            self.active.lock().await.insert(id, txn);
            self.active_count.fetch_add(1, Ordering::SeqCst);

            if progress.entered_without_success {
                let secret = progress.secret.clone();
                let ts = progress.last_succeeded_timestamp;
                let result = match progress.phase_entered.expect("checked above") {
                    CurrentPhase::Prepare => self.prepare(id, &secret, ts).await,
                    CurrentPhase::Commit => self.commit(id, &secret, ts).await,
                    CurrentPhase::Notify => self.notify(id, &secret, ts).await,
                    CurrentPhase::Abort => self.abort(id, &secret, ts).await,
                    CurrentPhase::End => self.end(id, &secret, ts).await,
                    CurrentPhase::Begin | CurrentPhase::NotStarted | CurrentPhase::Unknown => Ok(ts),
                };
                if let Err(e) = result {
                    tracing::warn!(target: "pbs", transaction_id = %id, error = ?e, "failed to replay pending phase during recovery");
                }
            }
        }

        Ok(())
    }

    async fn run_phase(
        &self,
        id: TransactionId,
        secret: &str,
        client_timestamp: Timestamp,
        target_phase: CurrentPhase,
    ) -> Result<Timestamp, PhaseError> {
        let mut active = self.active.lock().await;
        let txn = active.get_mut(&id).ok_or(PhaseError::NotFound)?;

        if !txn.secret_matches(secret) {
            return Err(PhaseError::WrongSecret);
        }
        if txn.last_execution_timestamp != client_timestamp {
            return Err(PhaseError::TimestampMismatch { server_timestamp: txn.last_execution_timestamp });
        }
        if txn.is_expired(Self::now()) {
            return Err(PhaseError::Expired);
        }
        if !txn.current_phase.can_advance_to(target_phase) {
            return Err(PhaseError::IllegalTransition { current: txn.current_phase });
        }

        self.journal_phase_entered(txn, target_phase, Vec::new()).await;

        for command in &txn.commands {
            let result = match target_phase {
                CurrentPhase::Prepare => command.prepare().await,
                CurrentPhase::Commit => command.commit().await,
                CurrentPhase::Notify => command.notify().await,
                CurrentPhase::End => command.end().await,
                // Abort always reports Success for the outer flow: every
                // command gets a chance to release its reservations even
                // if an earlier one in the list reported Failure.
                CurrentPhase::Abort => {
                    let _ = command.abort().await;
                    ExecutionResult::success()
                }
                CurrentPhase::NotStarted | CurrentPhase::Begin | CurrentPhase::Unknown => {
                    unreachable!("run_phase is never called with {target_phase:?}")
                }
            };
            if !result.successful() {
                return Err(PhaseError::CommandFailed(result));
            }
        }

        txn.current_phase = target_phase;
        txn.last_execution_timestamp += 1;
        let timestamp = txn.last_execution_timestamp;
        self.journal_phase_succeeded(txn).await;
        Ok(timestamp)
    }

    async fn journal_phase_entered(&self, txn: &Transaction, phase: CurrentPhase, payload: Vec<u8>) {
        let entry = JournalEntry {
            journal_id: 0,
            entry_type: EntryType::PhaseEntered,
            transaction_id: txn.id,
            phase: format!("{phase:?}"),
            last_execution_timestamp: txn.last_execution_timestamp,
            per_command_timestamps: Default::default(),
            wall_clock_millis: chrono::Utc::now().timestamp_millis(),
            payload,
        };
        if let Err(e) = self.journal.append(entry).await {
            tracing::warn!(target: "pbs", error = %e, transaction_id = %txn.id, "failed to journal phase entry");
        }
    }

    async fn journal_phase_succeeded(&self, txn: &Transaction) {
        let entry = JournalEntry {
            journal_id: 0,
            entry_type: EntryType::PhaseSucceeded,
            transaction_id: txn.id,
            phase: format!("{:?}", txn.current_phase),
            last_execution_timestamp: txn.last_execution_timestamp,
            per_command_timestamps: Default::default(),
            wall_clock_millis: chrono::Utc::now().timestamp_millis(),
            payload: Vec::new(),
        };
        if let Err(e) = self.journal.append(entry).await {
            tracing::warn!(target: "pbs", error = %e, transaction_id = %txn.id, "failed to journal phase success");
        }
    }
}

impl CheckpointSource for TransactionManager {
    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> pbs_base::Result<Vec<u8>> {
        // Real recovery reattaches commands from the `Begin` journal
        // entry's payload; the checkpoint only needs to capture which
        // transaction ids are still active and their phase/timestamp so
        // the journal doesn't have to be replayed from the beginning of
        // time after every restart.
        let active = self.active.try_lock().map_err(|_| pbs_base::err("active table locked during checkpoint"))?;
        let snapshot: Vec<(TransactionId, String, Timestamp)> = active
            .values()
            .map(|t| (t.id, format!("{:?}", t.current_phase), t.last_execution_timestamp))
            .collect();
        Ok(serde_json::to_vec(&snapshot)?)
    }
}
