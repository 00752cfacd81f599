//! Compiler configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{CompileError, CompileResult};

/// Default config file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "stepwright.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepwrightConfig {
    /// Code generation layout and promotion
    pub codegen: CodegenConfig,

    /// Selector resolution thresholds
    pub resolver: ResolverConfig,

    /// Glossary extensions
    pub glossary: GlossaryConfig,

    /// Verification and heal loop
    pub verify: VerifyConfig,
}

/// Code generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    /// Directory for generated tests, relative to the output directory
    pub tests_dir: PathBuf,

    /// Directory for generated modules, relative to the output directory
    pub modules_dir: PathBuf,

    /// Promote element functions used by several journeys into a shared
    /// module. Journey modules are generated either way.
    pub generate_modules: bool,

    /// Token-set similarity at which two element accessors are treated as the
    /// same shared function. 1.0 means structural equality only.
    pub promotion_similarity: f64,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            tests_dir: PathBuf::from("tests"),
            modules_dir: PathBuf::from("modules"),
            generate_modules: true,
            promotion_similarity: 1.0,
        }
    }
}

/// Selector resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Knowledge-base suggestions below this confidence are ignored
    pub min_suggestion_confidence: f64,

    /// Catalog entries below this confidence are ignored
    pub min_catalog_confidence: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_suggestion_confidence: 0.6,
            min_catalog_confidence: 0.5,
        }
    }
}

/// Glossary extensions merged over the built-in synonym table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlossaryConfig {
    /// Extra synonyms: canonical term -> synonyms
    pub synonyms: BTreeMap<String, Vec<String>>,

    /// Words that mark a step as list/option picking
    pub list_context_words: Vec<String>,
}

impl Default for GlossaryConfig {
    fn default() -> Self {
        Self {
            synonyms: BTreeMap::new(),
            list_context_words: ["from", "dropdown", "option", "combobox", "listbox", "picker"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Maximum heal attempts per journey
    pub heal_budget: u32,

    /// Per-journey run timeout
    pub timeout_secs: u64,

    /// Journeys verified in parallel
    pub concurrency: usize,

    /// Runner command; the test file and reporter flags are appended
    pub runner: Vec<String>,

    /// Timeout used when a heal first adds a wait
    pub initial_wait_ms: u64,

    /// Upper bound for strengthened waits
    pub max_wait_ms: u64,

    /// Grace period between SIGTERM and kill on timeout
    pub kill_grace_ms: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            heal_budget: 3,
            timeout_secs: 300,
            concurrency: 2,
            runner: vec!["npx".to_string(), "playwright".to_string(), "test".to_string()],
            initial_wait_ms: 5000,
            max_wait_ms: 30000,
            kill_grace_ms: 2000,
        }
    }
}

impl StepwrightConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> CompileResult<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> CompileResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the heal loop and promotion cannot work with
    pub fn validate(&self) -> CompileResult<()> {
        if !(1..=5).contains(&self.verify.heal_budget) {
            return Err(CompileError::InvalidConfig(format!(
                "verify.heal_budget must be between 1 and 5, got {}",
                self.verify.heal_budget
            )));
        }
        if self.verify.concurrency == 0 {
            return Err(CompileError::InvalidConfig(
                "verify.concurrency must be at least 1".to_string(),
            ));
        }
        if self.verify.runner.is_empty() {
            return Err(CompileError::InvalidConfig(
                "verify.runner must name a command".to_string(),
            ));
        }
        if self.verify.initial_wait_ms == 0 || self.verify.initial_wait_ms > self.verify.max_wait_ms {
            return Err(CompileError::InvalidConfig(format!(
                "verify.initial_wait_ms ({}) must be positive and not exceed max_wait_ms ({})",
                self.verify.initial_wait_ms, self.verify.max_wait_ms
            )));
        }
        let sim = self.codegen.promotion_similarity;
        if !(sim > 0.0 && sim <= 1.0) {
            return Err(CompileError::InvalidConfig(format!(
                "codegen.promotion_similarity must be in (0, 1], got {}",
                sim
            )));
        }
        Ok(())
    }
}
