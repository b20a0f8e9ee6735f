/// Where a `Schedule` call lands. `Urgent` goes to the timestamp-ordered
/// heap pool; `Normal`/`High` both land on the FIFO pool, differing only in
/// which end of the queue they enter at.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AsyncPriority {
    Normal,
    High,
    Urgent,
}

/// How `PickTaskExecutor` maps a caller onto one executor in a pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub enum TaskLoadBalancingScheme {
    /// Per-thread atomic counter, modulo pool size, seeded randomly so
    /// unrelated threads don't cluster onto the same executor. Default.
    #[default]
    RoundRobinPerThread,
    /// Single process-wide atomic counter.
    RoundRobinGlobal,
    /// Uniform random index per call.
    Random,
}
