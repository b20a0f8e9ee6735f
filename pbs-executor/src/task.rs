use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use pbs_base::Timestamp;

pub type Work = Box<dyn FnOnce() + Send + 'static>;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A unit of work paired with the earliest timestamp it may run at. For
/// normal (FIFO) executors the timestamp is informational; for urgent
/// (priority) executors it orders the heap. Two tasks with equal timestamps
/// break ties by enqueue order.
pub struct AsyncTask {
    pub execution_timestamp: Timestamp,
    sequence: u64,
    pub cancelled: Arc<AtomicBool>,
    work: Option<Work>,
}

impl AsyncTask {
    pub fn new(work: Work, execution_timestamp: Timestamp) -> Self {
        AsyncTask {
            execution_timestamp,
            sequence: NEXT_SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed),
            cancelled: Arc::new(AtomicBool::new(false)),
            work: Some(work),
        }
    }

    /// Returns a callback the scheduler can invoke to cancel this task. A
    /// cancelled task is skipped, never executed, when the worker dequeues it.
    pub fn cancellation_callback(&self) -> impl Fn() -> bool + Send + Sync + 'static {
        let cancelled = self.cancelled.clone();
        move || {
            cancelled.store(true, AtomicOrdering::SeqCst);
            true
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }

    /// Runs the task's work exactly once, unless it was cancelled first.
    pub fn run(mut self) {
        if self.is_cancelled() {
            return;
        }
        if let Some(work) = self.work.take() {
            work();
        }
    }
}

impl PartialEq for AsyncTask {
    fn eq(&self, other: &Self) -> bool {
        self.execution_timestamp == other.execution_timestamp && self.sequence == other.sequence
    }
}
impl Eq for AsyncTask {}

impl PartialOrd for AsyncTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ascending by (timestamp, sequence): earlier timestamp first, ties broken
/// by enqueue order. Callers needing a min-heap wrap this in `Reverse`.
impl Ord for AsyncTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.execution_timestamp
            .cmp(&other.execution_timestamp)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earlier_timestamp_orders_first() {
        let a = AsyncTask::new(Box::new(|| {}), 10);
        let b = AsyncTask::new(Box::new(|| {}), 20);
        assert!(a < b);
    }

    #[test]
    fn equal_timestamps_break_tie_by_enqueue_order() {
        let a = AsyncTask::new(Box::new(|| {}), 10);
        let b = AsyncTask::new(Box::new(|| {}), 10);
        assert!(a < b);
    }

    #[test]
    fn cancelled_task_is_skipped() {
        use std::sync::atomic::AtomicBool as Flag;
        let ran = Arc::new(Flag::new(false));
        let ran2 = ran.clone();
        let task = AsyncTask::new(Box::new(move || ran2.store(true, AtomicOrdering::SeqCst)), 0);
        let cancel = task.cancellation_callback();
        assert!(cancel());
        task.run();
        assert!(!ran.load(AtomicOrdering::SeqCst));
    }
}
