use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use pbs_base::{Clock, Timestamp};

/// A `Clock` whose steady and wall time are both set explicitly by the
/// test, so dispatcher-expiry, lease-ttl, and transaction-timestamp
/// assertions don't depend on real wall-clock timing.
#[derive(Default)]
pub struct FakeClock {
    steady_nanos: AtomicU64,
    wall_millis: AtomicI64,
}

impl FakeClock {
    pub fn new(steady_nanos: Timestamp, wall_millis: i64) -> Self {
        FakeClock { steady_nanos: AtomicU64::new(steady_nanos), wall_millis: AtomicI64::new(wall_millis) }
    }

    pub fn advance_steady(&self, delta_nanos: u64) {
        self.steady_nanos.fetch_add(delta_nanos, Ordering::SeqCst);
    }

    pub fn set_steady(&self, nanos: Timestamp) {
        self.steady_nanos.store(nanos, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_steady_nanos(&self) -> Timestamp {
        self.steady_nanos.load(Ordering::SeqCst)
    }

    fn now_wall_millis(&self) -> i64 {
        self.wall_millis.load(Ordering::SeqCst)
    }
}
