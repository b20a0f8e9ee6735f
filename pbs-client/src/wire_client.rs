use std::sync::Arc;

use async_trait::async_trait;

use pbs_base::{err, ExecutionResult, Result, Timestamp, TransactionId};
use pbs_net::{
    result_for_status, BeginRequestBody, Phase, StatusResponseBody, CLAIMED_IDENTITY,
    LAST_EXECUTION_TIMESTAMP, STATUS_PATH, TRANSACTION_ID, TRANSACTION_ORIGIN, TRANSACTION_SECRET,
};

/// Supplies the bearer token to attach to every phase/status request. A
/// thin seam over `pbs_auth::TokenProviderCache` so this crate doesn't need
/// to be generic over the cache's `Clock`/`TokenFetcher` type parameters.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String>;
}

pub type SharedTokenSource = Arc<dyn TokenSource>;

/// One remote PBS endpoint reached over HTTP/2: a shared `reqwest::Client`
/// connection pool and the token source that signs every request. Mirrors
/// the original's per-endpoint `PrivacyBudgetServiceClient`: one instance
/// per coordinator a transactional client talks to.
pub struct PbsEndpointClient {
    http: reqwest::Client,
    base_url: String,
    reporting_origin: String,
    tokens: SharedTokenSource,
}

pub struct PhaseOutcome {
    pub result: ExecutionResult,
    pub new_timestamp: Option<Timestamp>,
}

impl PbsEndpointClient {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        reporting_origin: String,
        tokens: SharedTokenSource,
    ) -> Self {
        PbsEndpointClient { http, base_url, reporting_origin, tokens }
    }

    /// Sends one phase request carrying the standard phase headers:
    /// `Authorization`, claimed identity, transaction id/secret/origin, and
    /// the last-execution-timestamp the caller currently holds. On success
    /// returns the new timestamp from the response header.
    pub async fn send_phase(
        &self,
        phase: Phase,
        txn_id: TransactionId,
        secret: &str,
        last_execution_timestamp: Timestamp,
        body: Option<&BeginRequestBody>,
    ) -> Result<PhaseOutcome> {
        let token = self.tokens.token().await?;
        let url = format!("{}{}", self.base_url, phase.path());
        let mut request = self
            .http
            .post(&url)
            .header(http::header::AUTHORIZATION, format!("Bearer {token}"))
            .header(CLAIMED_IDENTITY, &self.reporting_origin)
            .header(TRANSACTION_ID, txn_id.to_string())
            .header(TRANSACTION_SECRET, secret)
            .header(TRANSACTION_ORIGIN, &self.reporting_origin)
            .header(LAST_EXECUTION_TIMESTAMP, last_execution_timestamp.to_string());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| err(format!("phase request failed: {e}")))?;
        let status = response.status();
        let new_timestamp = response
            .headers()
            .get(LAST_EXECUTION_TIMESTAMP)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Timestamp>().ok());
        Ok(PhaseOutcome { result: result_for_status(status), new_timestamp })
    }

    /// `GET /v1/transactions:status`, used to recover from a `412` by
    /// adopting the server's reported timestamp before replaying the phase.
    pub async fn query_status(&self, txn_id: TransactionId, secret: &str) -> Result<StatusResponseBody> {
        let token = self.tokens.token().await?;
        let url = format!("{}{}", self.base_url, STATUS_PATH);
        let response = self
            .http
            .get(&url)
            .header(http::header::AUTHORIZATION, format!("Bearer {token}"))
            .header(TRANSACTION_ID, txn_id.to_string())
            .header(TRANSACTION_SECRET, secret)
            .send()
            .await
            .map_err(|e| err(format!("status query failed: {e}")))?;
        response.json::<StatusResponseBody>().await.map_err(|e| err(format!("malformed status body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedToken;
    #[async_trait]
    impl TokenSource for FixedToken {
        async fn token(&self) -> Result<String> {
            Ok("tok".to_string())
        }
    }

    #[test]
    fn endpoint_client_builds_without_making_a_connection() {
        let _client = PbsEndpointClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1".to_string(),
            "origin".to_string(),
            Arc::new(FixedToken),
        );
    }
}
