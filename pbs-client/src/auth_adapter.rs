use std::sync::Arc;

use async_trait::async_trait;

use pbs_auth::{TokenFetcher, TokenProviderCache};
use pbs_base::{Clock, Result};

use crate::wire_client::TokenSource;

/// Adapts `pbs_auth::TokenProviderCache<F, C>` (generic over its fetcher
/// and clock) to the object-safe `TokenSource` trait `PbsEndpointClient`
/// holds, since an endpoint client is built once per remote coordinator and
/// shouldn't be generic over every caller's fetcher/clock types.
pub struct CachedTokenSource<F: TokenFetcher, C: Clock> {
    cache: Arc<TokenProviderCache<F, C>>,
}

impl<F: TokenFetcher, C: Clock> CachedTokenSource<F, C> {
    pub fn new(cache: Arc<TokenProviderCache<F, C>>) -> Self {
        CachedTokenSource { cache }
    }
}

#[async_trait]
impl<F, C> TokenSource for CachedTokenSource<F, C>
where
    F: TokenFetcher + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    async fn token(&self) -> Result<String> {
        self.cache.token().await
    }
}
