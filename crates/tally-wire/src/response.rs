//! Server response bodies.

use serde::{Deserialize, Serialize};

/// A version reference inside a comparison overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRef {
    pub version: String,
}

/// Per-test-case comparison outcome returned with a `200` submit reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonOverview {
    /// Test case the entry describes (absent on single-case replies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testcase: Option<String>,
    /// The version just submitted.
    pub src: VersionRef,
    /// The baseline version it was compared against.
    pub dst: VersionRef,
    /// Match score in `[0, 1]`; `1.0` is a perfect match.
    pub score: f64,
}

impl ComparisonOverview {
    /// Parse the JSON body of a `200` submit reply.
    pub fn parse_list(body: &[u8]) -> Result<Vec<Self>, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// Error body returned with a `400` reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ErrorBody {
    /// Best-effort human message for a rejected request.
    ///
    /// Falls back to the raw body text when it is not the expected JSON.
    pub fn message_from(body: &[u8]) -> String {
        match serde_json::from_slice::<ErrorBody>(body) {
            Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
            _ => String::from_utf8_lossy(body).trim().to_string(),
        }
    }
}
