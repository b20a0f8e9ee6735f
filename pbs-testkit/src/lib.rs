//! Shared test fakes used across the workspace: a controllable clock, an
//! in-memory object/KV store (re-exported from `pbs-storage-local`'s
//! in-memory constructors), and a canned two-replica transaction
//! coordinator harness.

mod clock;
mod harness;

pub use clock::FakeClock;
pub use harness::TwoReplicaHarness;
pub use pbs_storage_local::{RedbKeyValueStore, RedbObjectStore};
