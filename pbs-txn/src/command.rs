use async_trait::async_trait;

use pbs_base::{CommandId, ExecutionResult, Timestamp};

/// One step of the six-phase protocol. A `Transaction` carries one or more
/// `Command`s; every phase of the transaction runs the matching hook on
/// every command and only advances once all of them report `Success`.
///
/// This is the "per-replica phase execution" abstraction:
/// `ConsumeBudgetCommand` in this crate implements it against the
/// local budget ledger; `pbs-client`'s `ClientConsumeBudgetCommand`
/// implements the same trait by making an HTTP call to a remote PBS
/// endpoint. The transaction coordinator below never needs to know which
/// kind of command it is driving.
#[async_trait]
pub trait Command: Send + Sync {
    fn command_id(&self) -> CommandId;

    async fn begin(&self) -> ExecutionResult;
    async fn prepare(&self) -> ExecutionResult;
    async fn commit(&self) -> ExecutionResult;
    async fn notify(&self) -> ExecutionResult;
    async fn abort(&self) -> ExecutionResult;
    async fn end(&self) -> ExecutionResult;

    /// The command's own optimistic-concurrency token, tracked internally
    /// (e.g. a remote command stores the timestamp the last successful
    /// response carried). Local commands that have no independent replica
    /// state of their own may just return the transaction's timestamp.
    fn last_execution_timestamp(&self) -> Timestamp;
}
