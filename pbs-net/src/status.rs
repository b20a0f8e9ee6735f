use http::StatusCode;
use pbs_base::{ExecutionResult, ResultCode};

pub const MALFORMED_REQUEST: ResultCode = ResultCode("PBS_MALFORMED_REQUEST");
pub const UNAUTHENTICATED: ResultCode = ResultCode("PBS_UNAUTHENTICATED");
pub const FORBIDDEN: ResultCode = ResultCode("PBS_FORBIDDEN_WRONG_SECRET");
pub const NOT_FOUND: ResultCode = ResultCode("PBS_UNKNOWN_PATH");
pub const BUDGET_EXHAUSTED: ResultCode = ResultCode("PBS_BUDGET_EXHAUSTED");
pub const PRECONDITION_FAILED: ResultCode = ResultCode("PBS_PRECONDITION_FAILED");
pub const TRANSIENT_SERVER_ERROR: ResultCode = ResultCode("PBS_TRANSIENT_SERVER_ERROR");
pub const NOT_SERVING_PARTITION: ResultCode = ResultCode("PBS_NOT_SERVING_PARTITION");

/// Maps an HTTP response status from a phase or status-query request onto
/// the internal `{status, code}` model. `412` and `5xx` become `Retry` so
/// the Operation Dispatcher drives the client's replay/backoff loop; the
/// caller is responsible for the special-cased 412 status-query-and-replay
/// behavior on top of that.
pub fn result_for_status(status: StatusCode) -> ExecutionResult {
    match status {
        StatusCode::OK => ExecutionResult::success(),
        StatusCode::BAD_REQUEST => ExecutionResult::failure(MALFORMED_REQUEST),
        StatusCode::UNAUTHORIZED => ExecutionResult::failure(UNAUTHENTICATED),
        StatusCode::FORBIDDEN => ExecutionResult::failure(FORBIDDEN),
        StatusCode::NOT_FOUND => ExecutionResult::failure(NOT_FOUND),
        StatusCode::CONFLICT => ExecutionResult::failure(BUDGET_EXHAUSTED),
        StatusCode::PRECONDITION_FAILED => ExecutionResult::retry(PRECONDITION_FAILED),
        StatusCode::SERVICE_UNAVAILABLE => ExecutionResult::retry(NOT_SERVING_PARTITION),
        s if s.is_server_error() => ExecutionResult::retry(TRANSIENT_SERVER_ERROR),
        _ => ExecutionResult::failure(MALFORMED_REQUEST),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_is_success() {
        assert!(result_for_status(StatusCode::OK).successful());
    }

    #[test]
    fn precondition_failed_is_retry_not_terminal_failure() {
        assert!(result_for_status(StatusCode::PRECONDITION_FAILED).should_retry());
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(result_for_status(StatusCode::INTERNAL_SERVER_ERROR).should_retry());
        assert!(result_for_status(StatusCode::SERVICE_UNAVAILABLE).should_retry());
    }

    #[test]
    fn client_errors_other_than_412_are_terminal() {
        assert!(!result_for_status(StatusCode::FORBIDDEN).should_retry());
        assert!(!result_for_status(StatusCode::FORBIDDEN).successful());
    }
}
