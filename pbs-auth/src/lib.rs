//! Authorization for both sides of a transaction request: the client-side
//! bearer-token cache used to populate the `Authorization` header, and the
//! server-side trait the HTTP/2 pipeline dispatches through so transient
//! auth-service failures retry instead of failing the request outright.

mod http;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use pbs_base::{err, Clock, ExecutionResult, Result, ResultCode, Timestamp};

pub use http::{HttpAuthorizationClient, HttpTokenFetcher};

pub const AUTH_TOKEN_INVALID: ResultCode = ResultCode("PBS_AUTH_TOKEN_INVALID");
pub const AUTH_SERVICE_UNAVAILABLE: ResultCode = ResultCode("PBS_AUTH_SERVICE_UNAVAILABLE");

/// A bearer token together with the instant (steady-clock nanos) it stops
/// being valid, so the cache knows when to refetch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: Timestamp,
}

/// Fetches a fresh token from the auth service. Implementations talk to
/// whatever token-issuing endpoint the deployment configures; `pbs-testkit`
/// supplies a fixed-token fake for tests.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    async fn fetch(&self) -> Result<CachedToken>;
}

/// Lets an `Arc<dyn TokenFetcher>` stand in for a concrete `F: TokenFetcher`
/// so `TokenProviderCache` can be built generically over a trait object
/// when the concrete fetcher type varies by deployment (cloud-specific
/// token minting is a non-goal; callers wire their own fetcher in).
#[async_trait]
impl<T: TokenFetcher + ?Sized> TokenFetcher for Arc<T> {
    async fn fetch(&self) -> Result<CachedToken> {
        (**self).fetch().await
    }
}

/// Caches the most recent token and refetches it once it's within
/// `refresh_skew_nanos` of expiring. One cache per remote endpoint: a
/// client talking to two PBS replicas holds two of these.
pub struct TokenProviderCache<F: TokenFetcher, C: Clock> {
    fetcher: F,
    clock: C,
    refresh_skew_nanos: Timestamp,
    cached: RwLock<Option<CachedToken>>,
}

impl<F: TokenFetcher, C: Clock> TokenProviderCache<F, C> {
    pub fn new(fetcher: F, clock: C, refresh_skew_nanos: Timestamp) -> Self {
        TokenProviderCache { fetcher, clock, refresh_skew_nanos, cached: RwLock::new(None) }
    }

    /// Returns a still-valid token, refetching if the cached one is
    /// missing or within the refresh skew of expiry.
    pub async fn token(&self) -> Result<String> {
        let now = self.clock.now_steady_nanos();
        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.expires_at > now.saturating_add(self.refresh_skew_nanos) {
                return Ok(cached.token.clone());
            }
        }
        let mut guard = self.cached.write().await;
        // Another caller may have refreshed while we waited for the write lock.
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > now.saturating_add(self.refresh_skew_nanos) {
                return Ok(cached.token.clone());
            }
        }
        let fresh = self.fetcher.fetch().await?;
        let token = fresh.token.clone();
        *guard = Some(fresh);
        Ok(token)
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}

/// Server side of authorization: validates a claimed identity and bearer
/// token, dispatched through the Operation Dispatcher so a transient
/// failure to reach the auth service comes back as `Retry` rather than
/// failing the whole request.
#[async_trait]
pub trait AuthorizationClient: Send + Sync {
    async fn authorize(&self, claimed_identity: &str, token: &str) -> ExecutionResult;
}

/// Wraps an `AuthorizationClient` behind an `Arc` so the HTTP/2 pipeline
/// can dispatch it from a task closure without borrowing the server.
pub type SharedAuthorizationClient = Arc<dyn AuthorizationClient>;

pub fn unavailable_error() -> pbs_base::Error {
    err("auth service unavailable")
}
