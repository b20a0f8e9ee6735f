//! Persisted-state traits the journal, checkpoint service, and lease
//! manager are built on. `pbs-storage-local` provides a `redb`-backed
//! implementation for single-node and dev use; a cloud deployment would
//! implement these against its own object/KV services.

use async_trait::async_trait;

use pbs_base::{ResultCode, Result};

pub const NOT_FOUND: ResultCode = ResultCode("PBS_STORAGE_NOT_FOUND");
pub const PRECONDITION_FAILED: ResultCode = ResultCode("PBS_STORAGE_PRECONDITION_FAILED");
pub const THROTTLED: ResultCode = ResultCode("PBS_STORAGE_THROTTLED");

/// Opaque monotonic version token returned alongside a read, required by
/// the writer on the next conditional update. Mirrors the role
/// `last_execution_timestamp` plays for transactions, one level down in
/// the stack.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Version(pub u64);

/// Append/overwrite-whole-blob storage: one blob per journal id, two blobs
/// per checkpoint partition (`last_checkpoint` pointer + body).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Single-row KV store with compare-and-swap semantics, used for the
/// partition lease row. A write whose `expected_version` doesn't match the
/// stored version fails with `PRECONDITION_FAILED` rather than silently
/// overwriting a concurrent writer.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, table: &str, key: &str) -> Result<Option<(Vec<u8>, Version)>>;

    async fn put_if_version(
        &self,
        table: &str,
        key: &str,
        value: Vec<u8>,
        expected_version: Option<Version>,
    ) -> Result<Version>;
}
