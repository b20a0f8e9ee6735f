use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use pbs_net::{Phase, STATUS_PATH};

use crate::phases;
use crate::state::AppState;

/// Assembles the HTTP/2 request pipeline: one route per phase plus the
/// status query, all sharing the same `AppState` and wrapped in a
/// request/response trace layer the way the rest of this workspace's HTTP
/// surface is instrumented.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(&Phase::Begin.path(), post(phases::begin))
        .route(&Phase::Prepare.path(), post(phases::prepare))
        .route(&Phase::Commit.path(), post(phases::commit))
        .route(&Phase::Notify.path(), post(phases::notify))
        .route(&Phase::Abort.path(), post(phases::abort))
        .route(&Phase::End.path(), post(phases::end))
        .route(STATUS_PATH, get(phases::status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    use pbs_auth::AuthorizationClient;
    use pbs_base::ExecutionResult;
    use pbs_config::NoopMetrics;
    use pbs_journal::JournalWriter;
    use pbs_storage_local::RedbObjectStore;
    use pbs_storage::ObjectStore;
    use pbs_txn::{BudgetLedger, TransactionManager};

    use crate::forwarder::Forwarder;
    use crate::routing::AlwaysLocal;

    struct AllowAll;

    #[async_trait::async_trait]
    impl AuthorizationClient for AllowAll {
        async fn authorize(&self, _claimed_identity: &str, _token: &str) -> ExecutionResult {
            ExecutionResult::success()
        }
    }

    fn test_state() -> AppState {
        let store: Arc<dyn ObjectStore> = Arc::new(RedbObjectStore::in_memory().unwrap());
        let journal = Arc::new(JournalWriter::new(store, "bucket".to_string(), "p0".to_string(), 0));
        let manager = TransactionManager::new(journal, 10);
        manager.start();
        AppState::new(
            manager,
            Arc::new(BudgetLedger::new(1_000)),
            Arc::new(AllowAll),
            Arc::new(NoopMetrics),
            Arc::new(AlwaysLocal),
            Arc::new(Forwarder::new(reqwest::Client::new(), "http://unused".to_string())),
        )
    }

    #[tokio::test]
    async fn unauthenticated_begin_request_is_rejected() {
        let app = build_router(test_state());
        let request = Request::builder()
            .method("POST")
            .uri(Phase::Begin.path())
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_query_for_unknown_transaction_is_not_found() {
        let app = build_router(test_state());
        let request = Request::builder()
            .method("GET")
            .uri(STATUS_PATH)
            .header("authorization", "Bearer tok")
            .header("x-gscp-claimed-identity", "origin")
            .header("x-gscp-transaction-id", uuid::Uuid::new_v4().to_string())
            .header("x-gscp-transaction-secret", "s3cr3t")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
