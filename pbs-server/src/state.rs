use std::sync::Arc;

use pbs_auth::SharedAuthorizationClient;
use pbs_config::Metrics;
use pbs_txn::{BudgetLedger, TransactionManager};

use crate::forwarder::Forwarder;
use crate::routing::RouteResolver;

/// Everything a request handler needs, shared across the whole HTTP/2
/// pipeline. One `AppState` per partition this node is currently serving.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TransactionManager>,
    pub ledger: Arc<BudgetLedger>,
    pub auth: SharedAuthorizationClient,
    pub metrics: Arc<dyn Metrics>,
    pub routing: Arc<dyn RouteResolver>,
    pub forwarder: Arc<Forwarder>,
}

impl AppState {
    pub fn new(
        manager: Arc<TransactionManager>,
        ledger: Arc<BudgetLedger>,
        auth: SharedAuthorizationClient,
        metrics: Arc<dyn Metrics>,
        routing: Arc<dyn RouteResolver>,
        forwarder: Arc<Forwarder>,
    ) -> Self {
        AppState { manager, ledger, auth, metrics, routing, forwarder }
    }
}
