//! Single-writer election over a KV row. One `LeaseManager` runs per
//! partition; at most one node observes `Acquired` for a given `lock_id`
//! at any wall-clock instant, modulo lease skew.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use pbs_base::Result;
use pbs_storage::{KeyValueStore, Version};

/// Observed state of the lease, fed by the poll loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LeaseState {
    NotAcquired,
    Acquired,
    RenewedWithIntentToRelease,
    Released,
}

/// The durable row at `lock_id`: one partition's lease record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub lease_owner_id: String,
    pub lease_owner_endpoint: String,
    pub lease_expiration_timestamp_millis: i64,
}

/// Reacts to Acquired/Released transitions. `on_load` receives a
/// cancellation flag: if the lease is lost before the load finishes
/// starting, the flag is set and an implementation should skip its work.
/// `on_unload` failing is unrecoverable: the process aborts rather than
/// risk serving traffic for a partition it no longer owns.
#[async_trait::async_trait]
pub trait LeaseTransitionHandler: Send + Sync {
    async fn on_load(&self, cancelled: Arc<AtomicBool>);
    async fn on_unload(&self) -> Result<()>;
}

/// One poll loop electing a single writer for `lock_id`. Always used
/// behind an `Arc` since acquiring the lease schedules a boot-wait Load
/// task that outlives the call to `poll_once`.
pub struct LeaseManager {
    store: Arc<dyn KeyValueStore>,
    table: String,
    lock_id: String,
    owner_id: String,
    owner_endpoint: String,
    lease_duration: Duration,
    handler: Arc<dyn LeaseTransitionHandler>,
    state: Mutex<LeaseState>,
    version: Mutex<Option<Version>>,
    load_cancel: Mutex<Option<Arc<AtomicBool>>>,
    loaded: AtomicBool,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        table: String,
        lock_id: String,
        owner_id: String,
        owner_endpoint: String,
        lease_duration: Duration,
        handler: Arc<dyn LeaseTransitionHandler>,
    ) -> Arc<Self> {
        Arc::new(LeaseManager {
            store,
            table,
            lock_id,
            owner_id,
            owner_endpoint,
            lease_duration,
            handler,
            state: Mutex::new(LeaseState::NotAcquired),
            version: Mutex::new(None),
            load_cancel: Mutex::new(None),
            loaded: AtomicBool::new(false),
        })
    }

    pub async fn state(&self) -> LeaseState {
        *self.state.lock().await
    }

    /// Non-blocking read of the current state, for diagnostics/health
    /// checks that cannot await a lock held across a suspension point.
    /// Contention with a concurrent poll iteration is rare and momentary;
    /// treat a miss as "state unknown right now" rather than retrying.
    pub fn try_state(&self) -> Option<LeaseState> {
        self.state.try_lock().ok().map(|s| *s)
    }

    /// Whether `on_load` has actually finished for the partition this node
    /// currently holds the lease for. `Acquired` alone is not enough:
    /// requests must keep returning unavailable for the whole boot-up
    /// wait, not just until the lease row is won. Cleared the moment the
    /// lease is lost or released, even if that races with a load still in
    /// flight.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Runs a poll loop on its own task, waking every `poll_interval`. This
    /// is the lease manager's single poll thread.
    pub fn spawn(self: &Arc<Self>, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                let now = chrono::Utc::now().timestamp_millis();
                if let Err(e) = manager.poll_once(now).await {
                    tracing::warn!(target: "pbs", error = %e, "lease poll failed");
                }
            }
        })
    }

    /// Runs one poll iteration. Exposed separately from `spawn` so tests
    /// can drive the state machine deterministically instead of sleeping.
    pub async fn poll_once(self: &Arc<Self>, now_millis: i64) -> Result<()> {
        let row = self.store.get(&self.table, &self.lock_id).await?;
        let record = row
            .as_ref()
            .map(|(bytes, _)| serde_json::from_slice::<LeaseRecord>(bytes))
            .transpose()?;
        let row_version = row.map(|(_, v)| v);

        let mut state = self.state.lock().await;
        match *state {
            LeaseState::NotAcquired => {
                let expired_or_absent =
                    record.as_ref().map(|r| r.lease_expiration_timestamp_millis <= now_millis).unwrap_or(true);
                if expired_or_absent {
                    let new_record = LeaseRecord {
                        lease_owner_id: self.owner_id.clone(),
                        lease_owner_endpoint: self.owner_endpoint.clone(),
                        lease_expiration_timestamp_millis: now_millis + self.lease_duration.as_millis() as i64,
                    };
                    let bytes = serde_json::to_vec(&new_record)?;
                    if let Ok(new_version) =
                        self.store.put_if_version(&self.table, &self.lock_id, bytes, row_version).await
                    {
                        *self.version.lock().await = Some(new_version);
                        *state = LeaseState::Acquired;
                        drop(state);
                        self.start_load_after_boot_wait().await;
                    }
                }
            }
            LeaseState::Acquired | LeaseState::RenewedWithIntentToRelease => {
                let owned_by_us = record.as_ref().map(|r| r.lease_owner_id == self.owner_id).unwrap_or(false);
                let expired = record.as_ref().map(|r| r.lease_expiration_timestamp_millis <= now_millis).unwrap_or(true);
                if !owned_by_us || expired {
                    *state = LeaseState::NotAcquired;
                    drop(state);
                    self.loaded.store(false, Ordering::SeqCst);
                    self.cancel_pending_load().await;
                    self.handler.on_unload().await.unwrap_or_else(|_| std::process::abort());
                } else {
                    let current_version = *self.version.lock().await;
                    let renewed = LeaseRecord {
                        lease_owner_id: self.owner_id.clone(),
                        lease_owner_endpoint: self.owner_endpoint.clone(),
                        lease_expiration_timestamp_millis: now_millis + self.lease_duration.as_millis() as i64,
                    };
                    let bytes = serde_json::to_vec(&renewed)?;
                    match self.store.put_if_version(&self.table, &self.lock_id, bytes, current_version).await {
                        Ok(new_version) => *self.version.lock().await = Some(new_version),
                        Err(_) => {
                            *state = LeaseState::NotAcquired;
                            drop(state);
                            self.loaded.store(false, Ordering::SeqCst);
                            self.cancel_pending_load().await;
                            self.handler.on_unload().await.unwrap_or_else(|_| std::process::abort());
                        }
                    }
                }
            }
            LeaseState::Released => {}
        }
        Ok(())
    }

    /// Voluntarily gives up the lease: `Acquired` or
    /// `RenewedWithIntentToRelease` -> `Released`, then `on_unload`. Failing
    /// `on_unload` after release was acknowledged aborts the process.
    pub async fn release(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != LeaseState::Acquired && *state != LeaseState::RenewedWithIntentToRelease {
            return Ok(());
        }
        *state = LeaseState::RenewedWithIntentToRelease;
        *state = LeaseState::Released;
        drop(state);
        self.loaded.store(false, Ordering::SeqCst);
        self.cancel_pending_load().await;
        self.handler.on_unload().await.unwrap_or_else(|_| std::process::abort());
        Ok(())
    }

    /// Schedules the Load callback after a boot-up wait of one lease
    /// duration, giving the previous holder's writes time to settle. The
    /// cancellation flag is stored so a lease lost before the wait elapses
    /// can skip the load. `loaded` only flips once `on_load` actually
    /// returns, so `is_loaded()` stays false for the whole boot-up wait.
    async fn start_load_after_boot_wait(self: &Arc<Self>) {
        let cancelled = Arc::new(AtomicBool::new(false));
        *self.load_cancel.lock().await = Some(cancelled.clone());
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(manager.lease_duration).await;
            if !cancelled.load(Ordering::SeqCst) {
                manager.handler.on_load(cancelled.clone()).await;
                if !cancelled.load(Ordering::SeqCst) {
                    manager.loaded.store(true, Ordering::SeqCst);
                }
            }
        });
    }

    async fn cancel_pending_load(&self) {
        if let Some(flag) = self.load_cancel.lock().await.take() {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbs_storage_local::RedbKeyValueStore;
    use std::sync::atomic::AtomicU32;

    struct CountingHandler {
        loads: Arc<AtomicU32>,
        unloads: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl LeaseTransitionHandler for CountingHandler {
        async fn on_load(&self, _cancelled: Arc<AtomicBool>) {
            self.loads.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_unload(&self) -> Result<()> {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn only_one_manager_acquires_the_lease() {
        let store: Arc<dyn KeyValueStore> = Arc::new(RedbKeyValueStore::in_memory().unwrap());
        let handler_a = Arc::new(CountingHandler { loads: Arc::new(AtomicU32::new(0)), unloads: Arc::new(AtomicU32::new(0)) });
        let handler_b = Arc::new(CountingHandler { loads: Arc::new(AtomicU32::new(0)), unloads: Arc::new(AtomicU32::new(0)) });
        let a = LeaseManager::new(
            store.clone(),
            "leases".to_string(),
            "p0".to_string(),
            "node-a".to_string(),
            "a:8080".to_string(),
            Duration::from_secs(10),
            handler_a,
        );
        let b = LeaseManager::new(
            store,
            "leases".to_string(),
            "p0".to_string(),
            "node-b".to_string(),
            "b:8080".to_string(),
            Duration::from_secs(10),
            handler_b,
        );
        a.poll_once(0).await.unwrap();
        b.poll_once(0).await.unwrap();
        assert_eq!(a.state().await, LeaseState::Acquired);
        assert_eq!(b.state().await, LeaseState::NotAcquired);
    }

    #[tokio::test]
    async fn losing_the_lease_transitions_back_to_not_acquired() {
        let store: Arc<dyn KeyValueStore> = Arc::new(RedbKeyValueStore::in_memory().unwrap());
        let handler =
            Arc::new(CountingHandler { loads: Arc::new(AtomicU32::new(0)), unloads: Arc::new(AtomicU32::new(0)) });
        let a = LeaseManager::new(
            store.clone(),
            "leases".to_string(),
            "p0".to_string(),
            "node-a".to_string(),
            "a:8080".to_string(),
            Duration::from_millis(10),
            handler.clone(),
        );
        a.poll_once(0).await.unwrap();
        assert_eq!(a.state().await, LeaseState::Acquired);
        // Someone else takes over once the lease expires.
        a.poll_once(1_000).await.unwrap();
        assert_eq!(a.state().await, LeaseState::NotAcquired);
        assert_eq!(handler.unloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn is_loaded_stays_false_for_the_whole_boot_wait() {
        let store: Arc<dyn KeyValueStore> = Arc::new(RedbKeyValueStore::in_memory().unwrap());
        let handler =
            Arc::new(CountingHandler { loads: Arc::new(AtomicU32::new(0)), unloads: Arc::new(AtomicU32::new(0)) });
        let boot_wait = Duration::from_millis(80);
        let a = LeaseManager::new(
            store,
            "leases".to_string(),
            "p0".to_string(),
            "node-a".to_string(),
            "a:8080".to_string(),
            boot_wait,
            handler.clone(),
        );
        a.poll_once(0).await.unwrap();
        assert_eq!(a.state().await, LeaseState::Acquired);
        // Winning the lease row is not enough: Load hasn't run yet.
        assert!(!a.is_loaded());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!a.is_loaded());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(a.is_loaded());
        assert_eq!(handler.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn losing_the_lease_mid_boot_wait_cancels_load_and_never_reports_loaded() {
        let store: Arc<dyn KeyValueStore> = Arc::new(RedbKeyValueStore::in_memory().unwrap());
        let handler =
            Arc::new(CountingHandler { loads: Arc::new(AtomicU32::new(0)), unloads: Arc::new(AtomicU32::new(0)) });
        let a = LeaseManager::new(
            store,
            "leases".to_string(),
            "p0".to_string(),
            "node-a".to_string(),
            "a:8080".to_string(),
            Duration::from_millis(200),
            handler.clone(),
        );
        a.poll_once(0).await.unwrap();
        assert_eq!(a.state().await, LeaseState::Acquired);
        // Lease expires before the boot-up wait elapses.
        a.poll_once(1_000_000).await.unwrap();
        assert_eq!(a.state().await, LeaseState::NotAcquired);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!a.is_loaded());
        assert_eq!(handler.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn release_invokes_unload_and_reaches_released() {
        let store: Arc<dyn KeyValueStore> = Arc::new(RedbKeyValueStore::in_memory().unwrap());
        let handler =
            Arc::new(CountingHandler { loads: Arc::new(AtomicU32::new(0)), unloads: Arc::new(AtomicU32::new(0)) });
        let a = LeaseManager::new(
            store,
            "leases".to_string(),
            "p0".to_string(),
            "node-a".to_string(),
            "a:8080".to_string(),
            Duration::from_secs(10),
            handler.clone(),
        );
        a.poll_once(0).await.unwrap();
        assert_eq!(a.state().await, LeaseState::Acquired);
        a.release().await.unwrap();
        assert_eq!(a.state().await, LeaseState::Released);
        assert_eq!(handler.unloads.load(Ordering::SeqCst), 1);
    }
}
