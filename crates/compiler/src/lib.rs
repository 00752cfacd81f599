//! Stepwright Compiler
//!
//! Compiles journey documents (Markdown with YAML frontmatter and numbered
//! steps) into Playwright tests and page modules.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  journey.md                                                 │
//! │    └── journey::parse ──────────► Journey { steps, hints }  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  per step                                                   │
//! │    ├── Glossary::normalize    canonical leading verb        │
//! │    ├── PatternEngine          template → IrOp | CustomStep  │
//! │    └── Resolver               tiers 1..7 → ResolvedElement  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  per run                                                    │
//! │    ├── PromotionPlanner       shared element functions      │
//! │    ├── CodeGenerator          managed regions               │
//! │    └── ArtifactWriter         merge + atomic write          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod codegen;
pub mod config;
pub mod error;
pub mod glossary;
pub mod hints;
pub mod ir;
pub mod journey;
pub mod managed;
pub mod outcome;
pub mod patterns;
pub mod pipeline;
pub mod promotion;
pub mod selectors;
pub mod template;
pub mod writer;

pub use catalog::{KnowledgeBase, ScopeContext, SelectorCatalog};
pub use codegen::{CodeGenerator, ElementTuning, Tuning};
pub use config::{StepwrightConfig, VerifyConfig, DEFAULT_CONFIG_FILE};
pub use error::{CompileError, CompileResult};
pub use glossary::Glossary;
pub use ir::{IrOp, OpKind};
pub use journey::{Journey, JourneyStatus, Tier};
pub use outcome::{Evidence, GenerationOutcome, HealAttempt, OutcomeStatus, VerificationSummary};
pub use pipeline::{CompileContext, Compilation, CompiledJourney, CompiledStep, Emitter};
pub use promotion::{NearDuplicate, PromotionPlan};
pub use selectors::{LocatorStrategy, ResolvedElement, Resolver};
pub use writer::{ArtifactWriter, PlannedFile};

/// Stepwright version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
