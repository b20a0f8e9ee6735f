//! Concrete HTTP implementations of the two traits this crate defines:
//! the client-side `TokenFetcher` (mints a bearer token from
//! `auth_service_endpoint`) and the server-side `AuthorizationClient`
//! (validates one). Cloud-specific credential minting is a non-goal; this
//! is the generic HTTP shape a deployment's own auth service speaks, the
//! same way `pbs-client::PbsEndpointClient` is the generic HTTP shape a
//! PBS replica speaks.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pbs_base::{err, Clock, ExecutionResult, Result, Timestamp};

use crate::{
    AuthorizationClient, CachedToken, TokenFetcher, AUTH_SERVICE_UNAVAILABLE, AUTH_TOKEN_INVALID,
};

#[derive(Serialize)]
struct TokenRequest<'a> {
    claimed_identity: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// Mints a bearer token by POSTing to the auth service's token endpoint.
/// The server's own expiry is not trusted across clock domains: this
/// fetcher stamps `expires_at` as `default_ttl` out from its own steady
/// clock, the same pattern `TokenProviderCache` already uses to decide
/// when to refetch.
pub struct HttpTokenFetcher<C: Clock> {
    http: reqwest::Client,
    endpoint: String,
    claimed_identity: String,
    clock: C,
    default_ttl: Duration,
}

impl<C: Clock> HttpTokenFetcher<C> {
    pub fn new(http: reqwest::Client, endpoint: String, claimed_identity: String, clock: C, default_ttl: Duration) -> Self {
        HttpTokenFetcher { http, endpoint, claimed_identity, clock, default_ttl }
    }
}

#[async_trait]
impl<C: Clock> TokenFetcher for HttpTokenFetcher<C> {
    async fn fetch(&self) -> Result<CachedToken> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&TokenRequest { claimed_identity: &self.claimed_identity })
            .send()
            .await
            .map_err(|e| err(format!("token fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(err(format!("token fetch returned {}", response.status())));
        }
        let body: TokenResponse =
            response.json().await.map_err(|e| err(format!("malformed token response: {e}")))?;
        let expires_at: Timestamp =
            self.clock.now_steady_nanos().saturating_add(self.default_ttl.as_nanos() as u64);
        Ok(CachedToken { token: body.token, expires_at })
    }
}

#[derive(Serialize)]
struct AuthorizeRequest<'a> {
    claimed_identity: &'a str,
    token: &'a str,
}

/// Validates a claimed identity and bearer token against the auth
/// service. A non-2xx response that looks like a transport or server
/// hiccup (anything but 401/403) comes back `Retry` so the HTTP/2
/// pipeline's dispatch treats it as backpressure rather than a terminal
/// denial.
pub struct HttpAuthorizationClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpAuthorizationClient {
    pub fn new(http: reqwest::Client, endpoint: String) -> Self {
        HttpAuthorizationClient { http, endpoint }
    }
}

#[async_trait]
impl AuthorizationClient for HttpAuthorizationClient {
    async fn authorize(&self, claimed_identity: &str, token: &str) -> ExecutionResult {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&AuthorizeRequest { claimed_identity, token })
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => ExecutionResult::success(),
            Ok(response) if response.status() == http::StatusCode::UNAUTHORIZED
                || response.status() == http::StatusCode::FORBIDDEN =>
            {
                ExecutionResult::failure(AUTH_TOKEN_INVALID)
            }
            Ok(response) => {
                tracing::warn!(target: "pbs", status = %response.status(), "auth service returned an unexpected status");
                ExecutionResult::retry(AUTH_SERVICE_UNAVAILABLE)
            }
            Err(e) => {
                tracing::warn!(target: "pbs", error = %e, "auth service request failed");
                ExecutionResult::retry(AUTH_SERVICE_UNAVAILABLE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FakeClock(std::sync::atomic::AtomicU64);
    impl Clock for FakeClock {
        fn now_steady_nanos(&self) -> Timestamp {
            self.0.load(std::sync::atomic::Ordering::SeqCst)
        }
        fn now_wall_millis(&self) -> i64 {
            0
        }
    }

    #[tokio::test]
    async fn fetches_a_token_and_stamps_local_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "abc"})))
            .mount(&server)
            .await;
        let fetcher = HttpTokenFetcher::new(
            reqwest::Client::new(),
            format!("{}/token", server.uri()),
            "origin.example".to_string(),
            FakeClock(std::sync::atomic::AtomicU64::new(1_000)),
            Duration::from_secs(60),
        );
        let token = fetcher.fetch().await.unwrap();
        assert_eq!(token.token, "abc");
        assert_eq!(token.expires_at, 1_000 + Duration::from_secs(60).as_nanos() as u64);
    }

    #[tokio::test]
    async fn successful_authorization_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/authz")).respond_with(ResponseTemplate::new(200)).mount(&server).await;
        let client = HttpAuthorizationClient::new(reqwest::Client::new(), format!("{}/authz", server.uri()));
        assert!(client.authorize("origin.example", "tok").await.successful());
    }

    #[tokio::test]
    async fn unauthorized_is_a_terminal_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/authz")).respond_with(ResponseTemplate::new(401)).mount(&server).await;
        let client = HttpAuthorizationClient::new(reqwest::Client::new(), format!("{}/authz", server.uri()));
        let result = client.authorize("origin.example", "tok").await;
        assert!(!result.successful());
        assert!(!result.should_retry());
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/authz")).respond_with(ResponseTemplate::new(503)).mount(&server).await;
        let client = HttpAuthorizationClient::new(reqwest::Client::new(), format!("{}/authz", server.uri()));
        let result = client.authorize("origin.example", "tok").await;
        assert!(result.should_retry());
    }
}
