use http::StatusCode;

use pbs_base::ExecutionResult;
use pbs_txn::{PhaseError, BUDGET_EXHAUSTED, CANNOT_ACCEPT_NEW_REQUESTS};

/// Maps a rejected phase request onto its status-code table. Distinct
/// from `pbs_net::result_for_status` (the client-side inverse): this is
/// what a `pbs-server` handler returns, not what a `pbs-client` command
/// interprets.
pub fn status_for_phase_error(error: &PhaseError) -> StatusCode {
    match error {
        PhaseError::NotFound => StatusCode::NOT_FOUND,
        PhaseError::WrongSecret => StatusCode::FORBIDDEN,
        PhaseError::TimestampMismatch { .. } => StatusCode::PRECONDITION_FAILED,
        PhaseError::IllegalTransition { .. } => StatusCode::BAD_REQUEST,
        PhaseError::Expired => StatusCode::BAD_REQUEST,
        PhaseError::CannotAcceptNewRequests => StatusCode::SERVICE_UNAVAILABLE,
        PhaseError::CommandFailed(result) => status_for_command_failure(result),
    }
}

fn status_for_command_failure(result: &ExecutionResult) -> StatusCode {
    if result.code == BUDGET_EXHAUSTED {
        StatusCode::CONFLICT
    } else if result.code == CANNOT_ACCEPT_NEW_REQUESTS {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbs_txn::CurrentPhase;

    #[test]
    fn wrong_secret_is_forbidden() {
        assert_eq!(status_for_phase_error(&PhaseError::WrongSecret), StatusCode::FORBIDDEN);
    }

    #[test]
    fn timestamp_mismatch_is_precondition_failed() {
        let e = PhaseError::TimestampMismatch { server_timestamp: 5 };
        assert_eq!(status_for_phase_error(&e), StatusCode::PRECONDITION_FAILED);
    }

    #[test]
    fn budget_exhausted_command_failure_is_conflict() {
        let e = PhaseError::CommandFailed(ExecutionResult::failure(BUDGET_EXHAUSTED));
        assert_eq!(status_for_phase_error(&e), StatusCode::CONFLICT);
    }

    #[test]
    fn illegal_transition_is_bad_request() {
        let e = PhaseError::IllegalTransition { current: CurrentPhase::Begin };
        assert_eq!(status_for_phase_error(&e), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn not_accepting_new_requests_is_unavailable() {
        assert_eq!(
            status_for_phase_error(&PhaseError::CannotAcceptNewRequests),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
