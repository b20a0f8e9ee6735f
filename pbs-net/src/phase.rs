use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A step of the two-phase commit protocol. Each variant maps to a fixed
/// `/v1/transactions:<phase>` path segment.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Phase {
    Begin,
    Prepare,
    Commit,
    Notify,
    Abort,
    End,
}

impl Phase {
    pub const ALL: [Phase; 6] =
        [Phase::Begin, Phase::Prepare, Phase::Commit, Phase::Notify, Phase::Abort, Phase::End];

    pub fn path_segment(self) -> &'static str {
        match self {
            Phase::Begin => "begin",
            Phase::Prepare => "prepare",
            Phase::Commit => "commit",
            Phase::Notify => "notify",
            Phase::Abort => "abort",
            Phase::End => "end",
        }
    }

    pub fn path(self) -> String {
        format!("/v1/transactions:{}", self.path_segment())
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path_segment())
    }
}

impl FromStr for Phase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "begin" => Ok(Phase::Begin),
            "prepare" => Ok(Phase::Prepare),
            "commit" => Ok(Phase::Commit),
            "notify" => Ok(Phase::Notify),
            "abort" => Ok(Phase::Abort),
            "end" => Ok(Phase::End),
            _ => Err(()),
        }
    }
}

/// The phase reported in a status query, including `Unknown` for
/// transactions the server has no record of.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionExecutionPhase {
    Begin,
    Prepare,
    Commit,
    Notify,
    Abort,
    End,
    Unknown,
}

impl From<Phase> for TransactionExecutionPhase {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Begin => TransactionExecutionPhase::Begin,
            Phase::Prepare => TransactionExecutionPhase::Prepare,
            Phase::Commit => TransactionExecutionPhase::Commit,
            Phase::Notify => TransactionExecutionPhase::Notify,
            Phase::Abort => TransactionExecutionPhase::Abort,
            Phase::End => TransactionExecutionPhase::End,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_path_round_trips_through_display_and_from_str() {
        for phase in Phase::ALL {
            let parsed: Phase = phase.to_string().parse().unwrap();
            assert_eq!(parsed, phase);
        }
    }

    #[test]
    fn status_json_uses_uppercase_phase_names() {
        let json = serde_json::to_string(&TransactionExecutionPhase::Prepare).unwrap();
        assert_eq!(json, "\"PREPARE\"");
    }
}
