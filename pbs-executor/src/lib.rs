mod dispatcher;
mod executor;
mod load_balance;
mod priority;
mod single_thread_normal;
mod single_thread_priority;
mod task;

pub use dispatcher::{
    ExponentialBackoff, FinishOnce, LinearBackoff, OperationDispatcher, RetryConfig, RetryStrategy,
    EXHAUSTED_RETRIES, NOT_ENOUGH_TIME_REMAINED, OPERATION_EXPIRED,
};
pub use executor::{
    AsyncExecutor, AsyncExecutorOptions, INVALID_QUEUE_CAP, INVALID_THREAD_COUNT, MAX_QUEUE_CAP,
    MAX_THREAD_COUNT,
};
pub use load_balance::LoadBalancer;
pub use priority::{AsyncPriority, TaskLoadBalancingScheme};
pub use single_thread_normal::SingleThreadAsyncExecutor;
pub use single_thread_priority::{SingleThreadPriorityAsyncExecutor, EXCEEDING_QUEUE_CAP, NOT_RUNNING};
pub use task::{AsyncTask, Work};
