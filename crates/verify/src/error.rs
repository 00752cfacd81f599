//! Error types for verification

use stepwright_compiler::{CompileError, Evidence, VerificationSummary};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Test runner not found: {0}. Install with: npm i -D @playwright/test && npx playwright install")]
    RunnerNotFound(String),

    #[error("Failed to spawn {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("Playwright report parse error: {0}")]
    ReportParse(String),

    #[error("Illegal verify transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Verification task failed: {0}")]
    Join(String),
}

impl VerifyError {
    /// Verification summary for a journey whose verification could not finish
    pub fn summary(&self) -> VerificationSummary {
        VerificationSummary {
            state: "error".to_string(),
            reason: Some(self.to_string()),
            runs: 0,
            evidence: Evidence::default(),
        }
    }
}

pub type VerifyResult<T> = Result<T, VerifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_summary() {
        let summary = VerifyError::RunnerNotFound("npx".to_string()).summary();
        assert_eq!(summary.state, "error");
        assert!(summary.reason.unwrap().starts_with("Test runner not found: npx"));
        assert_eq!(summary.runs, 0);
    }
}
