use pbs_base::{ExecutionResult, ResultCode, Timestamp};

use crate::load_balance::LoadBalancer;
use crate::priority::{AsyncPriority, TaskLoadBalancingScheme};
use crate::single_thread_normal::SingleThreadAsyncExecutor;
use crate::single_thread_priority::SingleThreadPriorityAsyncExecutor;
use crate::task::Work;

pub const MAX_THREAD_COUNT: usize = 256;
pub const MAX_QUEUE_CAP: usize = 1_000_000;

pub const INVALID_THREAD_COUNT: ResultCode = ResultCode("ASYNC_EXECUTOR_INVALID_THREAD_COUNT");
pub const INVALID_QUEUE_CAP: ResultCode = ResultCode("ASYNC_EXECUTOR_INVALID_QUEUE_CAP");

pub struct AsyncExecutorOptions {
    pub urgent_thread_count: usize,
    pub normal_thread_count: usize,
    pub queue_cap: usize,
    pub drop_tasks_on_stop: bool,
    pub load_balancing_scheme: TaskLoadBalancingScheme,
}

impl Default for AsyncExecutorOptions {
    fn default() -> Self {
        AsyncExecutorOptions {
            urgent_thread_count: 2,
            normal_thread_count: 4,
            queue_cap: 10_000,
            drop_tasks_on_stop: false,
            load_balancing_scheme: TaskLoadBalancingScheme::default(),
        }
    }
}

/// Two independently sized executor pools behind one facade: an urgent pool
/// of timestamp-ordered single-thread executors for `ScheduleFor`, and a
/// normal pool of FIFO single-thread executors for `Schedule`. Each pool
/// picks a member via its own `LoadBalancer` so the urgent and normal
/// counters never interfere.
pub struct AsyncExecutor {
    urgent_pool: Vec<SingleThreadPriorityAsyncExecutor>,
    normal_pool: Vec<SingleThreadAsyncExecutor>,
    urgent_balancer: LoadBalancer,
    normal_balancer: LoadBalancer,
    scheme: TaskLoadBalancingScheme,
}

impl AsyncExecutor {
    pub fn new(options: AsyncExecutorOptions) -> Result<Self, ExecutionResult> {
        if options.urgent_thread_count == 0
            || options.normal_thread_count == 0
            || options.urgent_thread_count > MAX_THREAD_COUNT
            || options.normal_thread_count > MAX_THREAD_COUNT
        {
            return Err(ExecutionResult::failure(INVALID_THREAD_COUNT));
        }
        if options.queue_cap == 0 || options.queue_cap > MAX_QUEUE_CAP {
            return Err(ExecutionResult::failure(INVALID_QUEUE_CAP));
        }
        let urgent_pool = (0..options.urgent_thread_count)
            .map(|_| SingleThreadPriorityAsyncExecutor::new(options.queue_cap, options.drop_tasks_on_stop))
            .collect();
        let normal_pool = (0..options.normal_thread_count)
            .map(|_| SingleThreadAsyncExecutor::new(options.queue_cap, options.drop_tasks_on_stop))
            .collect();
        Ok(AsyncExecutor {
            urgent_pool,
            normal_pool,
            urgent_balancer: LoadBalancer::new(),
            normal_balancer: LoadBalancer::new(),
            scheme: options.load_balancing_scheme,
        })
    }

    pub fn run(&self) -> ExecutionResult {
        for executor in &self.urgent_pool {
            let result = executor.run();
            if !result.successful() {
                return result;
            }
        }
        for executor in &self.normal_pool {
            let result = executor.run();
            if !result.successful() {
                return result;
            }
        }
        ExecutionResult::success()
    }

    pub fn stop(&self) -> ExecutionResult {
        let mut last = ExecutionResult::success();
        for executor in &self.urgent_pool {
            let result = executor.stop();
            if !result.successful() {
                last = result;
            }
        }
        for executor in &self.normal_pool {
            let result = executor.stop();
            if !result.successful() {
                last = result;
            }
        }
        last
    }

    /// Enqueues `work` on the normal pool, chosen by `PickTaskExecutor`.
    /// `Urgent` priority is not valid here; use `schedule_for`.
    pub fn schedule(&self, work: Work, priority: AsyncPriority) -> ExecutionResult {
        if matches!(priority, AsyncPriority::Urgent) {
            return ExecutionResult::failure(ResultCode("ASYNC_EXECUTOR_INVALID_PRIORITY"));
        }
        let idx = self.normal_balancer.pick(self.normal_pool.len(), self.scheme);
        self.normal_pool[idx].schedule(work, priority)
    }

    /// Enqueues `work` on the urgent pool to run no earlier than `timestamp`.
    /// Returns a cancellation callback alongside the scheduling result.
    pub fn schedule_for(
        &self,
        work: Work,
        timestamp: Timestamp,
    ) -> (ExecutionResult, Option<Box<dyn Fn() -> bool + Send + Sync>>) {
        let idx = self.urgent_balancer.pick(self.urgent_pool.len(), self.scheme);
        self.urgent_pool[idx].schedule_for(work, timestamp)
    }
}
