//! Wire contracts shared by the transactional client and the HTTP/2 server
//! pipeline: header names, transaction phase paths, request/response JSON
//! bodies, and the HTTP-status-to-internal-result mapping table.

mod headers;
mod phase;
mod status;
mod wire;

pub use headers::{
    CLAIMED_IDENTITY, LAST_EXECUTION_TIMESTAMP, TRANSACTION_ID, TRANSACTION_ORIGIN,
    TRANSACTION_SECRET,
};
pub use phase::{Phase, TransactionExecutionPhase};
pub use status::{
    result_for_status, BUDGET_EXHAUSTED, FORBIDDEN, MALFORMED_REQUEST, NOT_FOUND,
    NOT_SERVING_PARTITION, PRECONDITION_FAILED, TRANSIENT_SERVER_ERROR, UNAUTHENTICATED,
};
pub use wire::{BeginBudget, BeginRequestBody, StatusResponseBody, BEGIN_BODY_VERSION, STATUS_PATH};
