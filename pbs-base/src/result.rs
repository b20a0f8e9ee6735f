// The status/code pair every asynchronous operation in the system resolves
// to. `Success` advances state, `Retry` is backpressure the dispatcher should
// re-drive after backoff, `Failure` is terminal and surfaces to the caller.

/// A stable identifier for why an operation succeeded, should be retried, or
/// failed. Each component defines its own range of codes; this type just
/// carries them so `ExecutionResult` stays uniform across crates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ResultCode(pub &'static str);

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ExecutionStatus {
    Success,
    Retry,
    Failure,
}

/// The tagged result every async operation yields exactly once. A plain
/// `{status, code}` pair rather than `std::result::Result`, because callers
/// need to distinguish retry-as-backpressure from terminal failure without
/// downcasting an error.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub code: ResultCode,
}

impl ExecutionResult {
    pub const fn success() -> Self {
        ExecutionResult { status: ExecutionStatus::Success, code: ResultCode("SUCCESS") }
    }

    pub const fn retry(code: ResultCode) -> Self {
        ExecutionResult { status: ExecutionStatus::Retry, code }
    }

    pub const fn failure(code: ResultCode) -> Self {
        ExecutionResult { status: ExecutionStatus::Failure, code }
    }

    pub fn successful(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn should_retry(&self) -> bool {
        self.status == ExecutionStatus::Retry
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self.status, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_successful() {
        assert!(ExecutionResult::success().successful());
    }

    #[test]
    fn retry_is_not_successful_but_marked_retry() {
        let r = ExecutionResult::retry(ResultCode("QUEUE_FULL"));
        assert!(!r.successful());
        assert!(r.should_retry());
    }
}
