//! The transactional client: drives one or two remote PBS endpoints
//! through the same six-phase state machine `pbs-txn` defines, with each
//! per-replica phase expressed as an HTTP/2 call carrying the standard
//! phase request headers and body shape.

mod auth_adapter;
mod remote_command;
mod transactional_client;
mod wire_client;

pub use auth_adapter::CachedTokenSource;
pub use remote_command::{ClientConsumeBudgetCommand, PHASE_RETRIES_EXHAUSTED, UNINITIALIZED_TIMESTAMP};
pub use transactional_client::{outcome_execution_result, ConsumeBudgetOutcome, TransactionalClient};
pub use wire_client::{PbsEndpointClient, PhaseOutcome, SharedTokenSource, TokenSource};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use pbs_base::{err, Result};
    use pbs_journal::JournalWriter;
    use pbs_net::{BeginBudget, LAST_EXECUTION_TIMESTAMP};
    use pbs_storage::ObjectStore;
    use pbs_storage_local::RedbObjectStore;
    use pbs_txn::TransactionManager;

    use super::*;

    struct FixedToken;
    #[async_trait]
    impl TokenSource for FixedToken {
        async fn token(&self) -> Result<String> {
            Ok("test-token".to_string())
        }
    }

    fn endpoint(base_url: String) -> Arc<PbsEndpointClient> {
        Arc::new(PbsEndpointClient::new(
            reqwest::Client::new(),
            base_url,
            "origin.example".to_string(),
            Arc::new(FixedToken),
        ))
    }

    async fn manager() -> Arc<TransactionManager> {
        let store: Arc<dyn ObjectStore> = Arc::new(RedbObjectStore::in_memory().unwrap());
        let journal = Arc::new(JournalWriter::new(store, "bucket".to_string(), "client".to_string(), 0));
        let manager = TransactionManager::new(journal, 100);
        manager.start();
        manager
    }

    fn budgets() -> Vec<BeginBudget> {
        vec![BeginBudget { key: "k".to_string(), reporting_time: chrono::Utc::now(), token: 1 }]
    }

    fn ok_with_timestamp(ts: u64) -> ResponseTemplate {
        ResponseTemplate::new(200).insert_header(LAST_EXECUTION_TIMESTAMP.as_str(), ts.to_string())
    }

    #[tokio::test]
    async fn happy_path_single_coordinator_reaches_end() {
        let server = MockServer::start().await;
        for (p, ts) in [
            ("/v1/transactions:begin", 1u64),
            ("/v1/transactions:prepare", 2),
            ("/v1/transactions:commit", 3),
            ("/v1/transactions:notify", 4),
            ("/v1/transactions:end", 5),
        ] {
            Mock::given(method("POST"))
                .and(path(p))
                .respond_with(ok_with_timestamp(ts))
                .mount(&server)
                .await;
        }

        let client = TransactionalClient::new(manager().await, vec![endpoint(server.uri())], "origin".to_string());
        let outcome = client.consume_budget(budgets(), u64::MAX).await.unwrap();
        assert!(outcome.reached_end);
    }

    #[tokio::test]
    async fn prepare_conflict_drives_abort_then_end() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:begin"))
            .respond_with(ok_with_timestamp(1))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:prepare"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:abort"))
            .respond_with(ok_with_timestamp(2))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:end"))
            .respond_with(ok_with_timestamp(3))
            .mount(&server)
            .await;

        let client = TransactionalClient::new(manager().await, vec![endpoint(server.uri())], "origin".to_string());
        let result = client.consume_budget(budgets(), u64::MAX).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn precondition_failed_recovers_via_status_query_and_replays() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:begin"))
            .respond_with(ok_with_timestamp(1))
            .mount(&server)
            .await;
        // First prepare attempt returns 412; the command should fetch
        // status, adopt its timestamp, then replay prepare successfully.
        Mock::given(method("POST"))
            .and(path("/v1/transactions:prepare"))
            .respond_with(ResponseTemplate::new(412))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/transactions:status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "has_failures": false,
                "is_expired": false,
                "last_execution_timestamp": 1,
                "transaction_execution_phase": "BEGIN",
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:prepare"))
            .respond_with(ok_with_timestamp(2))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:commit"))
            .respond_with(ok_with_timestamp(3))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:notify"))
            .respond_with(ok_with_timestamp(4))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:end"))
            .respond_with(ok_with_timestamp(5))
            .mount(&server)
            .await;

        let client = TransactionalClient::new(manager().await, vec![endpoint(server.uri())], "origin".to_string());
        let outcome = tokio::time::timeout(Duration::from_secs(5), client.consume_budget(budgets(), u64::MAX))
            .await
            .expect("did not hang")
            .unwrap();
        assert!(outcome.reached_end);
    }

    #[test]
    fn error_helper_wraps_debug_text() {
        let e = err("boom");
        assert!(format!("{e}").contains("boom"));
    }

    #[tokio::test]
    async fn two_coordinator_divergence_aborts_both_replicas() {
        // Replica 1 accepts Prepare; replica 2 conflicts. The outer
        // coordinator must fail Prepare and drive Abort against both.
        let healthy = MockServer::start().await;
        let conflicted = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/transactions:begin"))
            .respond_with(ok_with_timestamp(1))
            .mount(&healthy)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:prepare"))
            .respond_with(ok_with_timestamp(2))
            .mount(&healthy)
            .await;
        let healthy_abort = Mock::given(method("POST"))
            .and(path("/v1/transactions:abort"))
            .respond_with(ok_with_timestamp(3));
        healthy_abort.mount(&healthy).await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:end"))
            .respond_with(ok_with_timestamp(4))
            .mount(&healthy)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/transactions:begin"))
            .respond_with(ok_with_timestamp(1))
            .mount(&conflicted)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:prepare"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&conflicted)
            .await;
        let conflicted_abort = Mock::given(method("POST"))
            .and(path("/v1/transactions:abort"))
            .respond_with(ok_with_timestamp(2));
        conflicted_abort.mount(&conflicted).await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:end"))
            .respond_with(ok_with_timestamp(3))
            .mount(&conflicted)
            .await;

        let client = TransactionalClient::new(
            manager().await,
            vec![endpoint(healthy.uri()), endpoint(conflicted.uri())],
            "origin".to_string(),
        );
        let result = client.consume_budget(budgets(), u64::MAX).await;
        assert!(result.is_err());

        // Both replicas saw an Abort: the healthy one released its
        // tentative reservation even though only its peer conflicted.
        assert_eq!(healthy.received_requests().await.unwrap().iter().filter(|r| r.url.path().ends_with(":abort")).count(), 1);
        assert_eq!(conflicted.received_requests().await.unwrap().iter().filter(|r| r.url.path().ends_with(":abort")).count(), 1);
    }
}
