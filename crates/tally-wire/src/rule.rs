//! Comparison rules for decimal results.

use serde::{Deserialize, Serialize};

/// Tolerance hint attached to a decimal result.
///
/// The rule is consumed by the server-side comparator; it never changes
/// the captured value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ComparisonRule {
    /// Accept values within `[min, max]`
    Absolute {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// Accept a relative difference up to `min`, optionally as a percentage
    Relative {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<bool>,
    },
}

impl ComparisonRule {
    pub fn absolute(min: Option<f64>, max: Option<f64>) -> Self {
        ComparisonRule::Absolute { min, max }
    }

    pub fn relative(min: Option<f64>, percent: Option<bool>) -> Self {
        ComparisonRule::Relative { min, percent }
    }

    /// Mode byte used by the binary codec
    pub fn mode_u8(&self) -> u8 {
        match self {
            ComparisonRule::Absolute { .. } => 0,
            ComparisonRule::Relative { .. } => 1,
        }
    }
}
