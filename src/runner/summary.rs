//! Run summary (run_summary.json)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use super::status::CaseState;

/// Schema version for run_summary.json
pub const RUN_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Outcome of one test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub suite: String,
    pub testcase: String,
    pub state: CaseState,
    /// Wall-clock duration of the workflow callback in milliseconds
    pub duration_ms: u64,
    /// Why the case failed, when it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run summary (run_summary.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: u32,

    /// When the summary was created
    pub created_at: DateTime<Utc>,

    /// Cases in execution order
    pub cases: Vec<CaseOutcome>,

    pub sent: usize,
    pub pass: usize,
    pub diff: usize,
    pub fail: usize,
    pub skip: usize,

    /// Wall-clock duration of the entire run in milliseconds
    pub duration_ms: u64,

    /// Errors from sealing versions at the end of each workflow
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seal_errors: Vec<String>,
}

impl RunSummary {
    pub fn new(cases: Vec<CaseOutcome>, duration_ms: u64) -> Self {
        let count = |state: CaseState| cases.iter().filter(|c| c.state == state).count();
        Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION,
            created_at: Utc::now(),
            sent: count(CaseState::Sent),
            pass: count(CaseState::Pass),
            diff: count(CaseState::Diff),
            fail: count(CaseState::Fail),
            skip: count(CaseState::Skip),
            cases,
            duration_ms,
            seal_errors: Vec::new(),
        }
    }

    pub fn with_seal_errors(mut self, errors: Vec<String>) -> Self {
        self.seal_errors = errors;
        self
    }

    pub fn total(&self) -> usize {
        self.cases.len()
    }

    /// Count of cases that ended in `state`
    pub fn count(&self, state: CaseState) -> usize {
        match state {
            CaseState::Sent => self.sent,
            CaseState::Pass => self.pass,
            CaseState::Diff => self.diff,
            CaseState::Fail => self.fail,
            CaseState::Skip => self.skip,
            CaseState::Pending | CaseState::Running => 0,
        }
    }

    /// True when no case failed and every seal went through
    pub fn is_success(&self) -> bool {
        self.fail == 0 && self.seal_errors.is_empty()
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        fs::write(path, json)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for case in &self.cases {
            write!(
                f,
                "{:>5}  {}/{} ({} ms)",
                case.state.as_str(),
                case.suite,
                case.testcase,
                case.duration_ms
            )?;
            if let Some(error) = &case.error {
                write!(f, ": {error}")?;
            }
            writeln!(f)?;
        }
        for error in &self.seal_errors {
            writeln!(f, "seal failed: {error}")?;
        }
        write!(
            f,
            "{} test cases in {} ms: {} sent, {} pass, {} diff, {} fail, {} skip",
            self.total(),
            self.duration_ms,
            self.sent,
            self.pass,
            self.diff,
            self.fail,
            self.skip
        )
    }
}
