//! Per-journey generation outcome
//!
//! Persisted as camelCase JSON next to the generated files so later runs and
//! reviewers can see what was mapped, what was blocked and what the heal loop
//! did.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::selectors::SelectorDebt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeStatus {
    /// Every step mapped
    Compiled,
    /// Generated, with at least one `test.fixme` step
    CompiledWithBlockedSteps,
    /// Autogen disabled; authored by hand
    Manual,
    /// Verified and passing
    Passed,
    /// Verification ended without a passing run
    Blocked,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Compiled => "compiled",
            OutcomeStatus::CompiledWithBlockedSteps => "compiledWithBlockedSteps",
            OutcomeStatus::Manual => "manual",
            OutcomeStatus::Passed => "passed",
            OutcomeStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step that became `test.fixme`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedStepReport {
    pub step: u32,
    pub reason: String,
    pub text: String,
    /// Source line of the step in the journey file
    #[serde(default)]
    pub line: usize,
}

/// Paths to artifacts left by a failed run, relative to the output directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,
}

impl Evidence {
    pub fn is_empty(&self) -> bool {
        self.trace.is_none() && self.screenshot.is_none() && self.snapshot.is_none()
    }
}

/// One heal cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealAttempt {
    pub attempt: u32,
    pub failure: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    pub action: String,
    pub result: String,
    #[serde(default)]
    pub evidence: Evidence,
}

/// Final state of verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSummary {
    /// `passed`, `blocked`, or `error` when the run could not complete
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub runs: u32,
    #[serde(default)]
    pub evidence: Evidence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub journey_id: String,
    pub status: OutcomeStatus,
    pub mapped_count: usize,
    pub total_steps: usize,
    #[serde(default)]
    pub blocked_steps: Vec<BlockedStepReport>,
    #[serde(default)]
    pub emitted_files: Vec<PathBuf>,
    #[serde(default)]
    pub selector_debt: Vec<SelectorDebt>,
    #[serde(default)]
    pub heal_attempts: Vec<HealAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationSummary>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl GenerationOutcome {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
