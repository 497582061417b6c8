//! Status reports and outcomes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Final outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunOutcome {
    /// All stages exited 0 and the metadata is valid.
    QA,
    /// Metadata was rejected, or an explicit error path ran.
    Error,
    /// A stage failed and nothing recovered.
    Invalid,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QA => "QA",
            Self::Error => "Error",
            Self::Invalid => "Invalid",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of the single status call made per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub dataset_id: String,
    pub status: RunOutcome,
    pub message: String,
    /// Empty unless the status is `QA`.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl StatusReport {
    pub fn qa(dataset_id: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            status: RunOutcome::QA,
            message: "the process ran".to_string(),
            metadata,
        }
    }

    pub fn error(dataset_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            status: RunOutcome::Error,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    pub fn invalid(dataset_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            status: RunOutcome::Invalid,
            message: message.into(),
            metadata: Map::new(),
        }
    }
}

/// HTTP method of the status call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusMethod {
    #[default]
    Put,
    Post,
}

impl FromStr for StatusMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PUT" => Ok(Self::Put),
            "POST" => Ok(Self::Post),
            other => Err(format!("unsupported status method '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_wire_format() {
        let report = StatusReport::invalid("d-1", "tail");
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"dataset_id": "d-1", "status": "Invalid", "message": "tail", "metadata": {}})
        );

        let report = StatusReport::qa("d-1", Map::new());
        assert_eq!(serde_json::to_value(&report).unwrap()["status"], "QA");
        assert_eq!(report.message, "the process ran");
    }

    #[test]
    fn test_status_method_parse() {
        assert_eq!("post".parse::<StatusMethod>().unwrap(), StatusMethod::Post);
        assert_eq!(" PUT ".parse::<StatusMethod>().unwrap(), StatusMethod::Put);
        assert!("patch".parse::<StatusMethod>().is_err());
    }
}
