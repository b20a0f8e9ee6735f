//! Wires one PBS node's subsystems together: local storage, the journal
//! and its replay-forward recovery, partition lease election, HTTP-backed
//! authorization, and the HTTP/2 request pipeline `pbs-server` defines.
//! A thin binary crate over a lib crate that does the actual assembly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pbs_auth::{HttpAuthorizationClient, SharedAuthorizationClient};
use pbs_base::{err, Result};
use pbs_config::{Metrics, NoopMetrics, PbsConfig};
use pbs_journal::{CheckpointService, CheckpointSource, JournalReader, JournalWriter};
use pbs_lease::{LeaseManager, LeaseTransitionHandler};
use pbs_server::{AlwaysLocal, AppState, Forwarder, LeaseBackedResolver, RouteResolver};
use pbs_storage::{KeyValueStore, ObjectStore};
use pbs_storage_local::{RedbKeyValueStore, RedbObjectStore};
use pbs_txn::{BudgetLedger, TransactionManager};

/// A single partition's budget cap. Per-budget-key caps are a deployment
/// concern this workspace doesn't model (the wire protocol carries
/// per-line token counts, not per-key caps); a node-wide ceiling high
/// enough to never itself be the limiting factor is the simplest faithful
/// stand-in.
const PARTITION_BUDGET_CAP: u64 = u64::MAX;

const LEASE_POLL_INTERVAL: Duration = Duration::from_secs(3);
const LEASE_DURATION: Duration = Duration::from_secs(10);
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

/// Starts/stops the local `TransactionManager` in step with this node
/// gaining or losing a partition's lease. `on_unload` failing aborts the
/// process — see `pbs_lease::LeaseManager`'s own doc comment on why that's
/// the right call here.
struct PartitionHandler {
    manager: Arc<TransactionManager>,
}

#[async_trait::async_trait]
impl LeaseTransitionHandler for PartitionHandler {
    async fn on_load(&self, cancelled: Arc<AtomicBool>) {
        if !cancelled.load(Ordering::SeqCst) {
            self.manager.start();
        }
    }

    async fn on_unload(&self) -> Result<()> {
        self.manager.stop().await;
        Ok(())
    }
}

/// A built but not-yet-serving node: storage is open, the journal has been
/// replayed, and the router is assembled. Call `serve` to bind and run.
pub struct Node {
    config: PbsConfig,
    manager: Arc<TransactionManager>,
    lease: Option<Arc<LeaseManager>>,
    checkpoints: Arc<CheckpointService>,
    journal: Arc<JournalWriter>,
    router: axum::Router,
}

impl Node {
    /// Opens local storage, replays the partition's journal forward
    /// through `TransactionManager::recover`, and wires the request
    /// pipeline. Binds no listener and accepts no traffic yet.
    pub async fn build(config: PbsConfig) -> Result<Self> {
        let object_store: Arc<dyn ObjectStore> = Arc::new(RedbObjectStore::in_memory()?);
        let kv_store: Arc<dyn KeyValueStore> = Arc::new(RedbKeyValueStore::in_memory()?);

        let reader = JournalReader::new(
            object_store.clone(),
            config.journal_service_bucket_name.clone(),
            config.journal_service_partition_name.clone(),
        );
        let entries = reader.replay_from(0).await?;
        let starting_at = entries.last().map(|e| e.journal_id + 1).unwrap_or(0);

        let journal = Arc::new(JournalWriter::new(
            object_store.clone(),
            config.journal_service_bucket_name.clone(),
            config.journal_service_partition_name.clone(),
            starting_at,
        ));
        let ledger = Arc::new(BudgetLedger::new(PARTITION_BUDGET_CAP));
        let manager = TransactionManager::new(journal.clone(), config.transaction_manager_capacity);

        // `recover` replays through the manager's own phase methods, which
        // gate on `started`. Flip it before replay rather than after: no
        // listener is bound yet, so there's no external caller who could
        // observe the gap between starting and finishing recovery.
        manager.start();
        manager.recover(entries, ledger.clone()).await?;

        let checkpoint_source: Arc<dyn CheckpointSource> = manager.clone();
        let checkpoints = Arc::new(CheckpointService::new(
            object_store.clone(),
            config.journal_service_bucket_name.clone(),
            config.journal_service_partition_name.clone(),
            checkpoint_source,
        ));

        let http_client = reqwest::Client::new();

        let auth: SharedAuthorizationClient = Arc::new(HttpAuthorizationClient::new(
            http_client.clone(),
            config.auth_service_endpoint.clone(),
        ));
        let metrics: Arc<dyn Metrics> = Arc::new(NoopMetrics);
        let forwarder =
            Arc::new(Forwarder::new(http_client, config.remote_pbs_host_address.clone()));

        // A configured lock table means this node shares its partition
        // with other replicas and must win an election before serving it;
        // an empty one means single-node operation, always local.
        let lease = if config.partition_lock_table_name.is_empty() {
            None
        } else {
            let handler = Arc::new(PartitionHandler { manager: manager.clone() });
            let owner_id = uuid::Uuid::new_v4().to_string();
            let owner_endpoint = format!("{}:{}", config.pbs_host_address, config.pbs_host_port);
            Some(LeaseManager::new(
                kv_store,
                config.partition_lock_table_name.clone(),
                config.journal_service_partition_name.clone(),
                owner_id,
                owner_endpoint,
                LEASE_DURATION,
                handler,
            ))
        };

        let routing: Arc<dyn RouteResolver> = match &lease {
            Some(lease) => Arc::new(LeaseBackedResolver::new(lease.clone())),
            None => Arc::new(AlwaysLocal),
        };

        let state = AppState::new(manager.clone(), ledger, auth, metrics, routing, forwarder);
        let router = pbs_server::build_router(state);

        Ok(Node { config, manager, lease, checkpoints, journal, router })
    }

    /// Binds the configured address and serves until interrupted, then
    /// drains in-flight transactions (and releases the lease, if held)
    /// before returning.
    pub async fn serve(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.pbs_host_address, self.config.pbs_host_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| err(format!("binding {addr}: {e}")))?;
        tracing::info!(target: "pbs", %addr, "serving");

        if let Some(lease) = &self.lease {
            lease.spawn(LEASE_POLL_INTERVAL);
        }
        let journal = self.journal.clone();
        self.checkpoints.clone().spawn_periodic(CHECKPOINT_INTERVAL, move || journal.next_journal_id());

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| err(format!("server error: {e}")))?;

        match &self.lease {
            Some(lease) => lease.release().await?,
            None => self.manager.stop().await,
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!(target: "pbs", "shutdown signal received");
}
