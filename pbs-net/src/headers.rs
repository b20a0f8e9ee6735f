use http::HeaderName;

/// Reporting origin of the caller (`x-gscp-claimed-identity`). Distinct
/// from the `Authorization` bearer token, which proves the caller's service
/// identity rather than the origin it claims to act on behalf of.
pub const CLAIMED_IDENTITY: HeaderName = HeaderName::from_static("x-gscp-claimed-identity");

/// UUID string identifying the transaction (`x-gscp-transaction-id`).
pub const TRANSACTION_ID: HeaderName = HeaderName::from_static("x-gscp-transaction-id");

/// Secret bound at Begin; every later phase must present the same value
/// (`x-gscp-transaction-secret`).
pub const TRANSACTION_SECRET: HeaderName = HeaderName::from_static("x-gscp-transaction-secret");

/// Origin of the transaction as recorded at Begin (`x-gscp-transaction-origin`).
pub const TRANSACTION_ORIGIN: HeaderName = HeaderName::from_static("x-gscp-transaction-origin");

/// Decimal `u64` optimistic-concurrency token
/// (`x-gscp-transaction-last-execution-timestamp`). Sent by the client with
/// its last known value, returned by the server with the new value on
/// success.
pub const LAST_EXECUTION_TIMESTAMP: HeaderName =
    HeaderName::from_static("x-gscp-transaction-last-execution-timestamp");
