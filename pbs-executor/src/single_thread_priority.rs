use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use pbs_base::{Clock, ExecutionResult, ResultCode, SystemClock, Timestamp};

use crate::task::AsyncTask;

pub const NOT_RUNNING: ResultCode = ResultCode("ASYNC_EXECUTOR_NOT_RUNNING");
pub const EXCEEDING_QUEUE_CAP: ResultCode = ResultCode("ASYNC_EXECUTOR_EXCEEDING_QUEUE_CAP");

struct Inner {
    heap: Mutex<BinaryHeap<Reverse<AsyncTask>>>,
    condvar: Condvar,
    running: AtomicBool,
    queue_cap: usize,
    drop_tasks_on_stop: bool,
}

/// One worker thread with a min-heap of tasks ordered by execution
/// timestamp. Tasks that become ready (timestamp <= now) run in timestamp
/// order, ties broken by enqueue order; the thread sleeps until the next
/// deadline rather than spinning.
pub struct SingleThreadPriorityAsyncExecutor {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SingleThreadPriorityAsyncExecutor {
    pub fn new(queue_cap: usize, drop_tasks_on_stop: bool) -> Self {
        SingleThreadPriorityAsyncExecutor {
            inner: Arc::new(Inner {
                heap: Mutex::new(BinaryHeap::new()),
                condvar: Condvar::new(),
                running: AtomicBool::new(false),
                queue_cap,
                drop_tasks_on_stop,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn run(&self) -> ExecutionResult {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return ExecutionResult::failure(ResultCode("ASYNC_EXECUTOR_ALREADY_RUNNING"));
        }
        let inner = self.inner.clone();
        let handle = std::thread::spawn(move || worker_loop(inner));
        *self.worker.lock().unwrap() = Some(handle);
        ExecutionResult::success()
    }

    pub fn stop(&self) -> ExecutionResult {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return ExecutionResult::failure(NOT_RUNNING);
        }
        if self.inner.drop_tasks_on_stop {
            self.inner.heap.lock().unwrap().clear();
        }
        self.inner.condvar.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        ExecutionResult::success()
    }

    /// Schedules `work` to run no earlier than `timestamp`. Returns a
    /// cancellation callback the caller can invoke to skip the task later.
    pub fn schedule_for(
        &self,
        work: crate::task::Work,
        timestamp: Timestamp,
    ) -> (ExecutionResult, Option<Box<dyn Fn() -> bool + Send + Sync>>) {
        if !self.inner.running.load(Ordering::SeqCst) {
            return (ExecutionResult::failure(NOT_RUNNING), None);
        }
        let mut heap = self.inner.heap.lock().unwrap();
        if heap.len() >= self.inner.queue_cap {
            return (ExecutionResult::retry(EXCEEDING_QUEUE_CAP), None);
        }
        let task = AsyncTask::new(work, timestamp);
        let cancel: Box<dyn Fn() -> bool + Send + Sync> = Box::new(task.cancellation_callback());
        heap.push(Reverse(task));
        drop(heap);
        self.inner.condvar.notify_one();
        (ExecutionResult::success(), Some(cancel))
    }

    pub fn queue_len(&self) -> usize {
        self.inner.heap.lock().unwrap().len()
    }
}

fn worker_loop(inner: Arc<Inner>) {
    let clock = SystemClock;
    loop {
        let mut heap = inner.heap.lock().unwrap();
        loop {
            if !inner.running.load(Ordering::SeqCst) && (inner.drop_tasks_on_stop || heap.is_empty()) {
                return;
            }
            match heap.peek() {
                None => {
                    // Bounded wait: if we're stopping we still want to notice
                    // new tasks pushed concurrently; re-check promptly.
                    let (guard, _) = inner
                        .condvar
                        .wait_timeout(heap, Duration::from_millis(50))
                        .unwrap();
                    heap = guard;
                    continue;
                }
                Some(Reverse(top)) => {
                    let now = clock.now_steady_nanos();
                    if top.execution_timestamp <= now || !inner.running.load(Ordering::SeqCst) {
                        break;
                    }
                    let wait_ns = top.execution_timestamp - now;
                    let wait = Duration::from_nanos(wait_ns.min(Duration::from_secs(1).as_nanos() as u64));
                    let (guard, _) = inner.condvar.wait_timeout(heap, wait).unwrap();
                    heap = guard;
                    continue;
                }
            }
        }
        let Reverse(task) = heap.pop().expect("peeked task must be present");
        drop(heap);
        task.run();
    }
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<SingleThreadPriorityAsyncExecutor>();
}
