use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::TransactionExecutionPhase;

pub const STATUS_PATH: &str = "/v1/transactions:status";
pub const BEGIN_BODY_VERSION: &str = "1.0";

/// One budget reservation requested at Begin: `(budget_key, reporting_time,
/// token_count)`. `reporting_time` buckets to the time window the tokens
/// apply to, not the time the request was made.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginBudget {
    pub key: String,
    pub reporting_time: DateTime<Utc>,
    pub token: u64,
}

/// Body of `POST /v1/transactions:begin`. The `v` field is a format version,
/// not a protocol version; readers should reject bodies whose `v` they
/// don't recognize rather than guess at shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginRequestBody {
    #[serde(rename = "t")]
    pub transactions: Vec<BeginBudget>,
    #[serde(rename = "v")]
    pub version: String,
}

impl BeginRequestBody {
    pub fn new(transactions: Vec<BeginBudget>) -> Self {
        BeginRequestBody { transactions, version: BEGIN_BODY_VERSION.to_string() }
    }
}

/// Body of `GET /v1/transactions:status`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponseBody {
    pub has_failures: bool,
    pub is_expired: bool,
    pub last_execution_timestamp: u64,
    pub transaction_execution_phase: TransactionExecutionPhase,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn begin_request_body_serializes_to_the_invariant_shape() {
        let body = BeginRequestBody::new(vec![BeginBudget {
            key: "k".to_string(),
            reporting_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            token: 1,
        }]);
        let json: serde_json::Value = serde_json::to_value(&body).unwrap();
        assert_eq!(json["v"], "1.0");
        assert_eq!(json["t"][0]["key"], "k");
        assert_eq!(json["t"][0]["token"], 1);
    }

    #[test]
    fn status_response_round_trips() {
        let body = StatusResponseBody {
            has_failures: false,
            is_expired: false,
            last_execution_timestamp: 42,
            transaction_execution_phase: TransactionExecutionPhase::Commit,
        };
        let json = serde_json::to_string(&body).unwrap();
        let back: StatusResponseBody = serde_json::from_str(&json).unwrap();
        assert_eq!(body, back);
    }
}
