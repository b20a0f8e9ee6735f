use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A 128-bit transaction identifier. Identified together with a caller
/// secret (see `pbs-txn`); the id alone is not assumed secret.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TransactionId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TransactionId(Uuid::parse_str(s)?))
    }
}

/// Identifies a single command within a transaction (one per replica, for
/// example). Distinct from the transaction id so journal entries can name
/// "which per-replica command" a timestamp belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct CommandId(pub Uuid);

impl CommandId {
    pub fn new() -> Self {
        CommandId(Uuid::new_v4())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

/// Correlates a chain of work across the async pipeline for logging. The
/// async context carries `parent_activity`/`activity`/`correlation` ids.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub Uuid);

impl ActivityId {
    pub fn new() -> Self {
        ActivityId(Uuid::new_v4())
    }
}

impl Default for ActivityId {
    fn default() -> Self {
        Self::new()
    }
}
