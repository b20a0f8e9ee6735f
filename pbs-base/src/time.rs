use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonic clock ticks, nanosecond-scaled, used as the optimistic
/// concurrency token (`last_execution_timestamp`) and for expiration
/// comparisons. Not wall-clock: only ever compared to other `Timestamp`
/// values produced by the same process or carried over the wire.
pub type Timestamp = u64;

/// Source of both the steady clock (for timestamps/expiration) and wall
/// clock (for journal entries and reporting times). A trait so tests can
/// substitute a `FakeClock` from `pbs-testkit` without the rest of the
/// system noticing.
pub trait Clock: Send + Sync {
    fn now_steady_nanos(&self) -> Timestamp;
    fn now_wall_millis(&self) -> i64;
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_steady_nanos(&self) -> Timestamp {
        // There is no portable steady-clock-as-u64 in std; since we only ever
        // compare values produced here, wall time duration-since-epoch in
        // nanoseconds is a valid (if not leap-second-proof) stand-in.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_nanos() as Timestamp
    }

    fn now_wall_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as i64
    }
}
