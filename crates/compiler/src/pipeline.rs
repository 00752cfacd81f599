//! Journey compilation pipeline
//!
//! `CompileContext` holds everything shared by the journeys of one run and
//! turns a parsed journey into a `CompiledJourney`: steps normalized, matched
//! and resolved. `Emitter` renders compiled journeys and writes them.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{KnowledgeBase, ScopeContext, SelectorCatalog};
use crate::codegen::ts::capitalize;
use crate::codegen::{CodeGenerator, Tuning};
use crate::config::StepwrightConfig;
use crate::error::CompileResult;
use crate::glossary::Glossary;
use crate::ir::{IrOp, OpKind};
use crate::journey::Journey;
use crate::managed::MergeMode;
use crate::outcome::{BlockedStepReport, GenerationOutcome, OutcomeStatus};
use crate::patterns::PatternEngine;
use crate::promotion::{PromotionPlan, PromotionPlanner};
use crate::selectors::{Resolution, ResolvedElement, Resolver, SelectorDebt};
use crate::writer::{ArtifactWriter, PlannedFile};

// ============================================================================
// Compiled journeys
// ============================================================================

/// One step as the code generator sees it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledStep {
    pub ordinal: u32,
    /// Normalized step text, used for `test.step` labels only
    pub title: String,
    pub op: IrOp,
    /// Key into `CompiledJourney::elements`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// A journey with every step mapped to IR and every element resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledJourney {
    pub journey: Journey,
    pub steps: Vec<CompiledStep>,
    pub elements: BTreeMap<String, ResolvedElement>,
    pub blocked: Vec<BlockedStepReport>,
    pub debt: Vec<SelectorDebt>,
}

impl CompiledJourney {
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn mapped_count(&self) -> usize {
        self.steps.iter().filter(|s| !s.op.is_custom()).count()
    }

    pub fn is_fully_mapped(&self) -> bool {
        self.blocked.is_empty()
    }

    /// Operation kinds applied to an element
    pub fn ops_for(&self, key: &str) -> BTreeSet<OpKind> {
        self.steps
            .iter()
            .filter(|s| s.element.as_deref() == Some(key))
            .map(|s| s.op.kind())
            .collect()
    }

    /// Steps as pretty JSON; stable for identical input
    pub fn ir_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.steps)
    }

    pub fn status(&self) -> OutcomeStatus {
        if self.is_fully_mapped() {
            OutcomeStatus::Compiled
        } else {
            OutcomeStatus::CompiledWithBlockedSteps
        }
    }

    pub fn outcome(&self, emitted_files: Vec<PathBuf>) -> GenerationOutcome {
        GenerationOutcome {
            journey_id: self.journey.id.clone(),
            status: self.status(),
            mapped_count: self.mapped_count(),
            total_steps: self.total_steps(),
            blocked_steps: self.blocked.clone(),
            emitted_files,
            selector_debt: self.debt.clone(),
            heal_attempts: Vec::new(),
            verification: None,
            acceptance_criteria: self.journey.acceptance_criteria.clone(),
        }
    }
}

/// Result of compiling one journey
#[derive(Debug, Clone, PartialEq)]
pub enum Compilation {
    /// Authored by hand (`autogen.enabled: false`); nothing is generated
    Manual { journey: Journey, reason: String },
    Compiled(CompiledJourney),
}

impl Compilation {
    pub fn journey(&self) -> &Journey {
        match self {
            Compilation::Manual { journey, .. } => journey,
            Compilation::Compiled(compiled) => &compiled.journey,
        }
    }
}

/// Outcome for a journey that was not compiled
pub fn manual_outcome(journey: &Journey) -> GenerationOutcome {
    GenerationOutcome {
        journey_id: journey.id.clone(),
        status: OutcomeStatus::Manual,
        mapped_count: 0,
        total_steps: journey.steps.len(),
        blocked_steps: Vec::new(),
        emitted_files: Vec::new(),
        selector_debt: Vec::new(),
        heal_attempts: Vec::new(),
        verification: None,
        acceptance_criteria: journey.acceptance_criteria.clone(),
    }
}

// ============================================================================
// Compile context
// ============================================================================

/// Immutable state shared by every journey of a run
#[derive(Debug)]
pub struct CompileContext {
    config: StepwrightConfig,
    glossary: Arc<Glossary>,
    resolver: Resolver,
    engine: PatternEngine,
}

impl CompileContext {
    pub fn new(config: StepwrightConfig, catalog: SelectorCatalog, knowledge: KnowledgeBase) -> CompileResult<Self> {
        config.validate()?;
        let glossary = Arc::new(Glossary::new(&config.glossary));
        let resolver = Resolver::new(Arc::new(catalog), Arc::new(knowledge), config.resolver.clone());
        let engine = PatternEngine::new()?;
        Ok(Self {
            config,
            glossary,
            resolver,
            engine,
        })
    }

    /// Context with no catalog or knowledge base
    pub fn from_config(config: StepwrightConfig) -> CompileResult<Self> {
        Self::new(config, SelectorCatalog::empty(), KnowledgeBase::empty())
    }

    pub fn config(&self) -> &StepwrightConfig {
        &self.config
    }

    pub fn glossary(&self) -> &Glossary {
        &self.glossary
    }

    pub fn compile_file(&self, path: &Path) -> CompileResult<Compilation> {
        self.compile(Journey::load(path)?)
    }

    /// Normalize, match and resolve every step of a journey
    pub fn compile(&self, journey: Journey) -> CompileResult<Compilation> {
        journey.ensure_compilable()?;
        if !journey.autogen.enabled {
            info!("{} has autogen disabled", journey.id);
            return Ok(Compilation::Manual {
                reason: "autogen.enabled is false".to_string(),
                journey,
            });
        }

        let ctx = ScopeContext {
            app: journey.scope.as_deref(),
            framework: journey.framework.as_deref(),
        };
        let mut steps = Vec::with_capacity(journey.steps.len());
        let mut elements: BTreeMap<String, ResolvedElement> = BTreeMap::new();
        let mut blocked = Vec::new();

        for step in &journey.steps {
            let normalized = self.glossary.normalize(&step.text);
            let title = capitalize(&normalized.text);

            let (mut op, mut template) = match journey.autogen.blocked_reason(step.ordinal) {
                Some(reason) => (
                    IrOp::CustomStep {
                        reason: format!("marked blocked by the author: {}", reason),
                    },
                    None,
                ),
                None => {
                    let matched = self.engine.match_step(&normalized.text, step.hint.as_ref());
                    (matched.op, matched.template)
                }
            };

            let mut element = None;
            if let IrOp::ExpectToast { toast_type, .. } = &op {
                let resolved = self.resolver.resolve_toast(*toast_type, &ctx);
                element = Some(resolved.key.clone());
                elements.entry(resolved.key.clone()).or_insert(resolved);
            } else if let Some(request) = op.locator() {
                match self.resolver.resolve(request, &ctx) {
                    Resolution::Resolved(resolved) => {
                        element = Some(resolved.key.clone());
                        elements.entry(resolved.key.clone()).or_insert(resolved);
                    }
                    Resolution::Unresolved { reason } => {
                        op = IrOp::CustomStep { reason };
                        template = None;
                    }
                }
            }

            if let IrOp::CustomStep { reason } = &op {
                warn!("{} step {} blocked: {}", journey.id, step.ordinal, reason);
                blocked.push(BlockedStepReport {
                    step: step.ordinal,
                    reason: reason.clone(),
                    text: step.text.clone(),
                    line: step.line,
                });
            }

            steps.push(CompiledStep {
                ordinal: step.ordinal,
                title,
                op,
                element,
                template,
            });
        }

        let debt = elements.values().filter_map(|e| e.debt.clone()).collect();
        let compiled = CompiledJourney {
            journey,
            steps,
            elements,
            blocked,
            debt,
        };
        info!(
            "Compiled {}: {}/{} steps mapped",
            compiled.journey.id,
            compiled.mapped_count(),
            compiled.total_steps()
        );
        Ok(Compilation::Compiled(compiled))
    }

    /// Promotion plan for the journeys of one run
    pub fn plan_promotion(&self, journeys: &[&CompiledJourney]) -> PromotionPlan {
        if !self.config.codegen.generate_modules {
            debug!("Module generation disabled; skipping promotion");
            return PromotionPlan::empty();
        }
        PromotionPlanner::new(self.config.codegen.promotion_similarity).plan(journeys)
    }
}

// ============================================================================
// Emission
// ============================================================================

/// Renders compiled journeys and writes them through an `ArtifactWriter`
#[derive(Debug, Clone)]
pub struct Emitter {
    generator: CodeGenerator,
    writer: ArtifactWriter,
}

impl Emitter {
    pub fn new(config: &StepwrightConfig, writer: ArtifactWriter) -> Self {
        Self {
            generator: CodeGenerator::new(config.codegen.clone()),
            writer,
        }
    }

    pub fn generator(&self) -> &CodeGenerator {
        &self.generator
    }

    pub fn writer(&self) -> &ArtifactWriter {
        &self.writer
    }

    /// Render and merge one journey's files without writing them
    pub fn plan_journey(
        &self,
        compiled: &CompiledJourney,
        plan: &PromotionPlan,
        tuning: &Tuning,
    ) -> CompileResult<Vec<PlannedFile>> {
        let artifacts = self.generator.render_journey(compiled, plan, tuning)?;
        Ok(vec![
            self.writer
                .prepare(&artifacts.test_path, &artifacts.test, MergeMode::Replace)?,
            self.writer
                .prepare(&artifacts.module_path, &artifacts.module, MergeMode::Replace)?,
        ])
    }

    /// Write one journey's files; on any error nothing of the journey is written
    pub fn emit_journey(
        &self,
        compiled: &CompiledJourney,
        plan: &PromotionPlan,
        tuning: &Tuning,
    ) -> CompileResult<Vec<PlannedFile>> {
        let files = self.plan_journey(compiled, plan, tuning)?;
        self.writer.commit(&files)?;
        Ok(files)
    }

    /// Write the shared module, keeping functions other runs promoted
    pub fn emit_shared(&self, plan: &PromotionPlan) -> CompileResult<Option<PlannedFile>> {
        let Some(rendered) = self.generator.render_shared(plan)? else {
            return Ok(None);
        };
        let file = self
            .writer
            .prepare(&self.generator.shared_path(), &rendered, MergeMode::Additive)?;
        self.writer.commit(std::slice::from_ref(&file))?;
        Ok(Some(file))
    }
}
