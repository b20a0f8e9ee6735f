use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use crate::priority::TaskLoadBalancingScheme;

thread_local! {
    // Seeded randomly on first access per thread, so unrelated threads don't
    // all start picking executor 0.
    static PER_THREAD_COUNTER: AtomicU64 = AtomicU64::new(rand::thread_rng().gen());
}

/// Picks an index into a task-executor pool of the given scheme. One
/// instance is kept per pool (urgent, normal) so their global counters don't
/// interfere with each other.
#[derive(Default)]
pub struct LoadBalancer {
    global_counter: AtomicU64,
}

impl LoadBalancer {
    pub fn new() -> Self {
        LoadBalancer { global_counter: AtomicU64::new(0) }
    }

    pub fn pick(&self, pool_size: usize, scheme: TaskLoadBalancingScheme) -> usize {
        assert!(pool_size > 0, "cannot pick an executor from an empty pool");
        match scheme {
            TaskLoadBalancingScheme::RoundRobinPerThread => {
                PER_THREAD_COUNTER.with(|c| c.fetch_add(1, Ordering::Relaxed) as usize % pool_size)
            }
            TaskLoadBalancingScheme::RoundRobinGlobal => {
                self.global_counter.fetch_add(1, Ordering::Relaxed) as usize % pool_size
            }
            TaskLoadBalancingScheme::Random => rand::thread_rng().gen_range(0..pool_size),
        }
    }
}
