mod error;
mod ids;
mod result;
mod time;

pub use error::{err, Error, Result};
pub use ids::{ActivityId, CommandId, TransactionId};
pub use result::{ExecutionResult, ExecutionStatus, ResultCode};
pub use time::{Clock, SystemClock, Timestamp};
