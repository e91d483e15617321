use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Structured key/value payload attached to a step update.
pub type StepFields = BTreeMap<String, serde_json::Value>;

/// Final outcome reported when a pipeline step ends.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Skipped(String),
    Failed(String),
}

impl StepStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepStatus::Failed(_))
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Succeeded => f.write_str("succeeded"),
            StepStatus::Skipped(reason) => write!(f, "skipped ({reason})"),
            StepStatus::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Builds a `StepFields` map from `(name, value)` pairs.
pub fn fields<I, K, V>(pairs: I) -> StepFields
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<serde_json::Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
