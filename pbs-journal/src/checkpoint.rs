use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pbs_base::{err, Result, ResultCode};
use pbs_storage::ObjectStore;

pub const CANNOT_CHECKPOINT_WHILE_STARTED: ResultCode =
    ResultCode("SC_TRANSACTION_MANAGER_CANNOT_CREATE_CHECKPOINT_WHEN_STARTED");

const LAST_CHECKPOINT_KEY: &str = "last_checkpoint";

fn checkpoint_key(id: u64) -> String {
    format!("checkpoint/{id:020}")
}

/// Whatever owns the in-memory state a checkpoint materializes (the
/// transaction manager's active table). Implemented outside this crate so
/// `pbs-journal` doesn't need to know the shape of transaction state.
pub trait CheckpointSource: Send + Sync {
    /// Checkpointing is only safe while the owning coordinator is stopped;
    /// otherwise in-flight mutations could race the snapshot.
    fn is_started(&self) -> bool;
    fn snapshot(&self) -> Result<Vec<u8>>;
}

/// Runs checkpoint cycles for one partition: snapshot current state,
/// persist a new checkpoint blob and an updated pointer blob, and track the
/// newest persisted checkpoint id so the journal can be garbage collected
/// up to it.
pub struct CheckpointService {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    partition: String,
    source: Arc<dyn CheckpointSource>,
    last_persisted_checkpoint_id: AtomicU64,
}

impl CheckpointService {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: String, partition: String, source: Arc<dyn CheckpointSource>) -> Self {
        CheckpointService { store, bucket, partition, source, last_persisted_checkpoint_id: AtomicU64::new(0) }
    }

    pub fn last_persisted_checkpoint_id(&self) -> u64 {
        self.last_persisted_checkpoint_id.load(Ordering::SeqCst)
    }

    /// Runs one checkpoint cycle against the journal state durable up to
    /// `journal_id_durable`. Fails with
    /// `CANNOT_CHECKPOINT_WHILE_STARTED` if the coordinator is running.
    pub async fn run_cycle(&self, journal_id_durable: u64) -> Result<u64> {
        if self.source.is_started() {
            return Err(err(CANNOT_CHECKPOINT_WHILE_STARTED.0));
        }
        let body = self.source.snapshot()?;
        let bucket = format!("{}/{}", self.bucket, self.partition);
        self.store.put(&bucket, &checkpoint_key(journal_id_durable), body).await?;
        self.store
            .put(&bucket, LAST_CHECKPOINT_KEY, journal_id_durable.to_string().into_bytes())
            .await?;
        self.last_persisted_checkpoint_id.store(journal_id_durable, Ordering::SeqCst);
        Ok(journal_id_durable)
    }

    pub async fn last_checkpoint_id(&self) -> Result<Option<u64>> {
        let bucket = format!("{}/{}", self.bucket, self.partition);
        match self.store.get(&bucket, LAST_CHECKPOINT_KEY).await {
            Ok(bytes) => {
                let text = String::from_utf8(bytes).map_err(|e| err(e.to_string()))?;
                let id = text.parse::<u64>().map_err(|e| err(e.to_string()))?;
                Ok(Some(id))
            }
            Err(_) => Ok(None),
        }
    }

    /// Spawns a background task that runs a checkpoint cycle on a fixed
    /// interval. The caller supplies `journal_id_durable` as a closure
    /// since it changes as the journal advances.
    pub fn spawn_periodic(
        self: Arc<Self>,
        interval: Duration,
        journal_id_durable: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let id = journal_id_durable();
                if let Err(e) = self.run_cycle(id).await {
                    tracing::warn!(target: "pbs", error = %e, "checkpoint cycle failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbs_storage_local::RedbObjectStore;
    use std::sync::atomic::AtomicBool;

    struct FakeSource {
        started: AtomicBool,
    }
    impl CheckpointSource for FakeSource {
        fn is_started(&self) -> bool {
            self.started.load(Ordering::SeqCst)
        }
        fn snapshot(&self) -> Result<Vec<u8>> {
            Ok(b"state".to_vec())
        }
    }

    #[tokio::test]
    async fn refuses_to_checkpoint_while_started() {
        let store: Arc<dyn ObjectStore> = Arc::new(RedbObjectStore::in_memory().unwrap());
        let source = Arc::new(FakeSource { started: AtomicBool::new(true) });
        let service = CheckpointService::new(store, "bucket".to_string(), "p0".to_string(), source);
        assert!(service.run_cycle(5).await.is_err());
    }

    #[tokio::test]
    async fn checkpoint_cycle_updates_pointer_and_tracked_id() {
        let store: Arc<dyn ObjectStore> = Arc::new(RedbObjectStore::in_memory().unwrap());
        let source = Arc::new(FakeSource { started: AtomicBool::new(false) });
        let service = CheckpointService::new(store, "bucket".to_string(), "p0".to_string(), source);
        service.run_cycle(7).await.unwrap();
        assert_eq!(service.last_persisted_checkpoint_id(), 7);
        assert_eq!(service.last_checkpoint_id().await.unwrap(), Some(7));
    }
}
