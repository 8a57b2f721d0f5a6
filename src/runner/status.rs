//! Per test case state machine
//!
//! PENDING → RUNNING → {SENT | PASS | DIFF | FAIL}
//! PENDING → SKIP when results already exist and overwrite is off

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::client::SubmitStatus;

/// State of one test case within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseState {
    /// Waiting to run
    Pending,
    /// Workflow callback executing
    Running,
    /// Submitted, no comparison result
    Sent,
    /// Matched the baseline, or completed while offline
    Pass,
    /// Differed from the baseline
    Diff,
    /// Callback or submission failed
    Fail,
    /// Results already on disk
    Skip,
}

impl CaseState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: CaseState) -> bool {
        match (self, target) {
            (CaseState::Pending, CaseState::Running) => true,
            (CaseState::Pending, CaseState::Skip) => true,

            (CaseState::Running, CaseState::Sent) => true,
            (CaseState::Running, CaseState::Pass) => true,
            (CaseState::Running, CaseState::Diff) => true,
            (CaseState::Running, CaseState::Fail) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CaseState::Pending | CaseState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseState::Pending => "pending",
            CaseState::Running => "running",
            CaseState::Sent => "sent",
            CaseState::Pass => "pass",
            CaseState::Diff => "diff",
            CaseState::Fail => "fail",
            CaseState::Skip => "skip",
        }
    }
}

impl From<SubmitStatus> for CaseState {
    fn from(status: SubmitStatus) -> Self {
        match status {
            SubmitStatus::Sent => CaseState::Sent,
            SubmitStatus::Pass => CaseState::Pass,
            SubmitStatus::Diff => CaseState::Diff,
        }
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors for case state operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid state transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: CaseState,
    pub to: CaseState,
}

/// A test case moving through its states
#[derive(Debug, Clone)]
pub(crate) struct CaseTracker {
    state: CaseState,
}

impl CaseTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: CaseState::Pending,
        }
    }

    pub(crate) fn state(&self) -> CaseState {
        self.state
    }

    pub(crate) fn transition(&mut self, to: CaseState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}
