use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, Method, StatusCode};

use pbs_base::TransactionId;
use pbs_net::{
    BeginBudget, BeginRequestBody, Phase, StatusResponseBody, CLAIMED_IDENTITY,
    LAST_EXECUTION_TIMESTAMP, TRANSACTION_ID, TRANSACTION_ORIGIN, TRANSACTION_SECRET,
};
use pbs_txn::{BeginRecoveryPayload, BudgetLine, Command, ConsumeBudgetCommand, PhaseError, Transaction};

use crate::state::AppState;
use crate::status_codes::status_for_phase_error;
use crate::sync_context::RequestSyncContext;

/// Transactions carry no TTL in the wire contract; this node enforces one
/// anyway so a caller that never reaches End doesn't pin a reservation
/// forever. 24 hours comfortably exceeds any real reporting-origin retry
/// budget.
const DEFAULT_TRANSACTION_TTL_NANOS: u64 = 24 * 60 * 60 * 1_000_000_000;

fn header_str<'a>(headers: &'a HeaderMap, name: http::HeaderName) -> Result<&'a str, Response> {
    headers
        .get(name.clone())
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("missing or malformed {name}")).into_response())
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, Response> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| StatusCode::UNAUTHORIZED.into_response())
}

fn parse_transaction_id(headers: &HeaderMap) -> Result<TransactionId, Response> {
    let raw = header_str(headers, TRANSACTION_ID)?;
    TransactionId::from_str(raw).map_err(|_| StatusCode::BAD_REQUEST.into_response())
}

fn parse_last_execution_timestamp(headers: &HeaderMap) -> Result<u64, Response> {
    let raw = header_str(headers, LAST_EXECUTION_TIMESTAMP)?;
    raw.parse::<u64>().map_err(|_| StatusCode::BAD_REQUEST.into_response())
}

/// Runs the `CreateSyncContext` join of authorization and body receipt.
/// The body leg is always already-resolved by the time a handler runs
/// (axum buffers it for us); only the authorization leg can actually fail
/// this join.
async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let claimed_identity = header_str(headers, CLAIMED_IDENTITY)?;
    let token = bearer_token(headers)?;
    let ctx = RequestSyncContext::new();
    ctx.join(state.auth.authorize(claimed_identity, token))
        .await
        .map_err(|_| StatusCode::UNAUTHORIZED.into_response())
}

/// Turns a phase result into its response: the new
/// optimistic-concurrency timestamp in a header on success, the mapped
/// status code with no body on failure.
fn phase_response(outcome: Result<u64, PhaseError>) -> Response {
    match outcome {
        Ok(new_timestamp) => {
            let mut response = StatusCode::OK.into_response();
            response
                .headers_mut()
                .insert(LAST_EXECUTION_TIMESTAMP, new_timestamp.to_string().parse().expect("decimal u64 is a valid header value"));
            response
        }
        Err(error) => status_for_phase_error(&error).into_response(),
    }
}

fn record_status(state: &AppState, status: StatusCode, started_at: Instant) {
    state.metrics.record_status_code(status.as_u16(), false);
    state.metrics.record_latency_millis(started_at.elapsed().as_secs_f64() * 1000.0);
}

/// Forwards the request as-is if this node doesn't currently serve the
/// target partition; returns `None` when the caller should handle the
/// request locally instead.
async fn forward_if_not_local(
    state: &AppState,
    method: Method,
    path: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Option<Response> {
    if state.routing.is_local() {
        None
    } else {
        Some(state.forwarder.forward(method, path, headers, body).await)
    }
}

pub async fn begin(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let started_at = Instant::now();
    state.metrics.active_requests(1);
    state.metrics.record_request_body_bytes(body.len() as u64);

    if let Some(forwarded) =
        forward_if_not_local(&state, Method::POST, &Phase::Begin.path(), &headers, body.clone()).await
    {
        state.metrics.record_status_code(forwarded.status().as_u16(), true);
        state.metrics.active_requests(-1);
        return forwarded;
    }

    let response = begin_local(&state, &headers, &body).await;
    record_status(&state, response.status(), started_at);
    state.metrics.active_requests(-1);
    response
}

async fn begin_local(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Response {
    if let Err(e) = authorize(state, headers).await {
        return e;
    }
    let origin = match header_str(headers, TRANSACTION_ORIGIN) {
        Ok(o) => o.to_string(),
        Err(e) => return e,
    };
    let txn_id = match parse_transaction_id(headers) {
        Ok(id) => id,
        Err(e) => return e,
    };
    let secret = match header_str(headers, TRANSACTION_SECRET) {
        Ok(s) => s.to_string(),
        Err(e) => return e,
    };

    let parsed: BeginRequestBody = match serde_json::from_slice(body) {
        Ok(b) => b,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    if parsed.version != pbs_net::BEGIN_BODY_VERSION {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let lines: Vec<BudgetLine> =
        parsed.transactions.iter().map(|b: &BeginBudget| BudgetLine {
            key: (origin.clone(), b.key.clone(), b.reporting_time.timestamp_nanos_opt().unwrap_or(0) as u64),
            token_count: b.token,
        }).collect();

    let command: Arc<dyn Command> = Arc::new(ConsumeBudgetCommand::new(txn_id, state.ledger.clone(), lines.clone()));
    let now = pbs_base::Clock::now_steady_nanos(&pbs_base::SystemClock);
    let expiration_time = now.saturating_add(DEFAULT_TRANSACTION_TTL_NANOS);
    let txn = Transaction::new(
        txn_id,
        secret.clone(),
        origin.clone(),
        vec![command],
        expiration_time,
        0,
    );

    let recovery = BeginRecoveryPayload { secret, reporting_origin: origin, expiration_time, lines };
    let begin_payload = match serde_json::to_vec(&recovery) {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    phase_response(state.manager.begin(txn, begin_payload).await)
}

async fn run_named_phase(
    state: AppState,
    headers: HeaderMap,
    phase: Phase,
    run: impl std::future::Future<Output = Result<u64, PhaseError>>,
) -> Response {
    let started_at = Instant::now();
    state.metrics.active_requests(1);

    if let Some(forwarded) =
        forward_if_not_local(&state, Method::POST, &phase.path(), &headers, Bytes::new()).await
    {
        state.metrics.record_status_code(forwarded.status().as_u16(), true);
        state.metrics.active_requests(-1);
        return forwarded;
    }

    let response = match authorize(&state, &headers).await {
        Ok(()) => phase_response(run.await),
        Err(e) => e,
    };
    record_status(&state, response.status(), started_at);
    state.metrics.active_requests(-1);
    response
}

fn parse_phase_ids(headers: &HeaderMap) -> Result<(TransactionId, String, u64), Response> {
    let txn_id = parse_transaction_id(headers)?;
    let secret = header_str(headers, TRANSACTION_SECRET)?.to_string();
    let timestamp = parse_last_execution_timestamp(headers)?;
    Ok((txn_id, secret, timestamp))
}

pub async fn prepare(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (txn_id, secret, timestamp) = match parse_phase_ids(&headers) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let manager = state.manager.clone();
    run_named_phase(state, headers, Phase::Prepare, async move {
        manager.prepare(txn_id, &secret, timestamp).await
    })
    .await
}

pub async fn commit(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (txn_id, secret, timestamp) = match parse_phase_ids(&headers) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let manager = state.manager.clone();
    run_named_phase(state, headers, Phase::Commit, async move {
        manager.commit(txn_id, &secret, timestamp).await
    })
    .await
}

pub async fn notify(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (txn_id, secret, timestamp) = match parse_phase_ids(&headers) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let manager = state.manager.clone();
    run_named_phase(state, headers, Phase::Notify, async move {
        manager.notify(txn_id, &secret, timestamp).await
    })
    .await
}

pub async fn abort(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (txn_id, secret, timestamp) = match parse_phase_ids(&headers) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let manager = state.manager.clone();
    run_named_phase(state, headers, Phase::Abort, async move {
        manager.abort(txn_id, &secret, timestamp).await
    })
    .await
}

pub async fn end(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (txn_id, secret, timestamp) = match parse_phase_ids(&headers) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let manager = state.manager.clone();
    run_named_phase(state, headers, Phase::End, async move {
        manager.end(txn_id, &secret, timestamp).await
    })
    .await
}

pub async fn status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let started_at = Instant::now();
    state.metrics.active_requests(1);

    if let Some(forwarded) =
        forward_if_not_local(&state, Method::GET, pbs_net::STATUS_PATH, &headers, Bytes::new()).await
    {
        state.metrics.record_status_code(forwarded.status().as_u16(), true);
        state.metrics.active_requests(-1);
        return forwarded;
    }

    let response = status_local(&state, &headers).await;
    record_status(&state, response.status(), started_at);
    state.metrics.active_requests(-1);
    response
}

async fn status_local(state: &AppState, headers: &HeaderMap) -> Response {
    if let Err(e) = authorize(state, headers).await {
        return e;
    }
    let txn_id = match parse_transaction_id(headers) {
        Ok(id) => id,
        Err(e) => return e,
    };
    let secret = match header_str(headers, TRANSACTION_SECRET) {
        Ok(s) => s.to_string(),
        Err(e) => return e,
    };

    match state.manager.status(txn_id, &secret).await {
        Ok(report) => {
            let body = StatusResponseBody {
                has_failures: report.has_failures,
                is_expired: report.is_expired,
                last_execution_timestamp: report.last_execution_timestamp,
                transaction_execution_phase: report.phase.into(),
            };
            axum::Json(body).into_response()
        }
        Err(error) => status_for_phase_error(&error).into_response(),
    }
}
