//! Error types for the step compiler

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the compiler error
pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Compiler error types
///
/// Mapping gaps and unresolved locators are not errors: they are recovered
/// into `CustomStep` entries. Only failures that make the output of unknown
/// correctness surface here.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("{}:{line}: {message}", path.display())]
    Structural {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Journey {id} has status '{status}'; compilation requires clarified, implemented or quarantined")]
    NotCompilable { id: String, status: String },

    #[error("Generation conflict in {}: managed region '{region}' was edited by hand; reconcile it before regenerating", path.display())]
    GenerationConflict { path: PathBuf, region: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Selector catalog error: {0}")]
    Catalog(String),

    #[error("Template error in '{template}': {message}")]
    Template { template: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CompileError {
    /// Build a structural error at a given line
    pub fn structural(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        CompileError::Structural {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Whether this error aborts the journey before any output is produced
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CompileError::Structural { .. } | CompileError::NotCompilable { .. }
        )
    }
}
