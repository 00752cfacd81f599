//! CLI Commands
//!
//! `compile` and `verify` share the front half of the pipeline: discover
//! journey files, compile them in parallel, plan promotion, emit.

pub mod check;
pub mod compile;
pub mod verify;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use stepwright_compiler::journey;
use stepwright_compiler::pipeline::manual_outcome;
use stepwright_compiler::{
    CompileContext, CompileResult, Compilation, CompiledJourney, Emitter, GenerationOutcome, KnowledgeBase,
    OutcomeStatus, PromotionPlan, SelectorCatalog, StepwrightConfig, Tuning, VerificationSummary,
};

use crate::output::{status_label, TableDisplay};
use crate::signal::ExitSignal;

// ============================================================================
// Shared arguments
// ============================================================================

/// Journey inputs and resolution sources
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Journey files, or directories searched for *.journey.md
    #[arg(required = true)]
    pub journeys: Vec<PathBuf>,

    /// Selector catalog (JSON)
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Knowledge-base locator suggestions (JSON)
    #[arg(long)]
    pub knowledge: Option<PathBuf>,
}

/// Load the config file and build the shared compile context
pub fn build_context(config: StepwrightConfig, input: &InputArgs) -> Result<Arc<CompileContext>> {
    let catalog = match &input.catalog {
        Some(path) => SelectorCatalog::load(path)
            .with_context(|| format!("Failed to load selector catalog {}", path.display()))?,
        None => SelectorCatalog::empty(),
    };
    let knowledge = match &input.knowledge {
        Some(path) => KnowledgeBase::load(path)
            .with_context(|| format!("Failed to load knowledge base {}", path.display()))?,
        None => KnowledgeBase::empty(),
    };
    info!("Selector catalog has {} entries", catalog.len());
    let ctx = CompileContext::new(config, catalog, knowledge)?;
    Ok(Arc::new(ctx))
}

pub fn load_config(path: &Path) -> Result<StepwrightConfig> {
    StepwrightConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

// ============================================================================
// Compilation
// ============================================================================

/// Compile every discovered journey file on the blocking pool
pub async fn compile_all(
    ctx: Arc<CompileContext>,
    inputs: &[PathBuf],
) -> Result<Vec<(PathBuf, CompileResult<Compilation>)>> {
    let files = journey::discover(inputs)?;
    info!("Compiling {} journey file(s)", files.len());

    let tasks = files.into_iter().map(|path| {
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || {
            let result = ctx.compile_file(&path);
            (path, result)
        })
    });

    let mut results = Vec::new();
    for joined in futures::future::join_all(tasks).await {
        results.push(joined.context("Compile task panicked")?);
    }
    Ok(results)
}

/// Compiled journeys split by what happens to them next
#[derive(Default)]
pub struct Batch {
    pub compiled: Vec<(PathBuf, CompiledJourney)>,
    pub manual: Vec<(PathBuf, GenerationOutcome)>,
    pub rows: Vec<JourneyRow>,
}

impl Batch {
    pub fn from_results(results: Vec<(PathBuf, CompileResult<Compilation>)>) -> Self {
        let mut batch = Batch::default();
        for (path, result) in results {
            match result {
                Ok(Compilation::Compiled(compiled)) => batch.compiled.push((path, compiled)),
                Ok(Compilation::Manual { journey, reason }) => {
                    info!("{}: {}", journey.id, reason);
                    batch.manual.push((path, manual_outcome(&journey)));
                }
                Err(e) => {
                    error!("{}: {}", path.display(), e);
                    batch.rows.push(JourneyRow::failed(&path, None, &e.to_string()));
                }
            }
        }
        batch.compiled.sort_by(|a, b| a.1.journey.id.cmp(&b.1.journey.id));
        batch
    }
}

/// A journey whose files were written
pub struct Emitted {
    pub path: PathBuf,
    pub compiled: CompiledJourney,
    pub outcome: GenerationOutcome,
}

/// Plan promotion across the batch and emit every journey. Conflicts fail
/// only the journey they occur in.
pub fn emit_batch(
    ctx: &CompileContext,
    emitter: &Emitter,
    compiled: Vec<(PathBuf, CompiledJourney)>,
    rows: &mut Vec<JourneyRow>,
) -> Result<(PromotionPlan, Vec<Emitted>)> {
    let refs: Vec<&CompiledJourney> = compiled.iter().map(|(_, c)| c).collect();
    let plan = ctx.plan_promotion(&refs);
    if !plan.is_empty() {
        info!("Promoting {} shared element(s)", plan.shared.len());
    }

    let mut emitted = Vec::new();
    for (path, journey) in compiled {
        match emitter.emit_journey(&journey, &plan, &Tuning::default()) {
            Ok(files) => {
                let written = files.iter().map(|f| f.path.clone()).collect();
                let outcome = journey.outcome(written);
                emitted.push(Emitted {
                    path,
                    compiled: journey,
                    outcome,
                });
            }
            Err(e) => {
                error!("{}: {}", journey.journey.id, e);
                rows.push(JourneyRow::failed(&path, Some(&journey.journey.id), &e.to_string()));
            }
        }
    }

    emitter
        .emit_shared(&plan)
        .context("Failed to write the shared module")?;
    Ok((plan, emitted))
}

/// Persist an outcome and turn it into a summary row
pub fn record(emitter: &Emitter, path: &Path, outcome: &GenerationOutcome) -> JourneyRow {
    match emitter.writer().write_outcome(outcome) {
        Ok(_) => JourneyRow::from_outcome(path, outcome),
        Err(e) => JourneyRow::failed(
            path,
            Some(&outcome.journey_id),
            &format!("failed to record outcome: {}", e),
        ),
    }
}

/// Persist the outcome of a journey whose verification errored. The row stays
/// a hard error; the outcome records why verification did not finish.
pub fn record_error(
    emitter: &Emitter,
    path: &Path,
    outcome: &mut GenerationOutcome,
    summary: VerificationSummary,
) -> JourneyRow {
    let message = summary.reason.clone().unwrap_or_else(|| summary.state.clone());
    outcome.verification = Some(summary);
    let recorded = record(emitter, path, outcome);
    if recorded.status.is_none() {
        return recorded;
    }
    JourneyRow::failed(path, Some(&outcome.journey_id), &message)
}

// ============================================================================
// Summary rows
// ============================================================================

/// One line of the run summary
#[derive(Debug, Clone, Serialize)]
pub struct JourneyRow {
    pub journey: String,
    pub path: PathBuf,
    pub status: Option<OutcomeStatus>,
    pub mapped: String,
    pub blocked_steps: usize,
    pub selector_debt: usize,
    pub heal_attempts: usize,
    pub detail: String,
}

impl JourneyRow {
    pub fn from_outcome(path: &Path, outcome: &GenerationOutcome) -> Self {
        let detail = match &outcome.verification {
            Some(v) => v.reason.clone().unwrap_or_else(|| format!("{} run(s)", v.runs)),
            None => outcome
                .blocked_steps
                .first()
                .map(|b| format!("step {}: {}", b.step, b.reason))
                .unwrap_or_default(),
        };
        Self {
            journey: outcome.journey_id.clone(),
            path: path.to_path_buf(),
            status: Some(outcome.status),
            mapped: format!("{}/{}", outcome.mapped_count, outcome.total_steps),
            blocked_steps: outcome.blocked_steps.len(),
            selector_debt: outcome.selector_debt.len(),
            heal_attempts: outcome.heal_attempts.len(),
            detail,
        }
    }

    pub fn failed(path: &Path, journey: Option<&str>, message: &str) -> Self {
        Self {
            journey: journey.unwrap_or("-").to_string(),
            path: path.to_path_buf(),
            status: None,
            mapped: "-".to_string(),
            blocked_steps: 0,
            selector_debt: 0,
            heal_attempts: 0,
            detail: message.to_string(),
        }
    }

    pub fn signal(&self) -> ExitSignal {
        match self.status {
            Some(status) => ExitSignal::for_status(status),
            None => ExitSignal::HardError,
        }
    }
}

impl TableDisplay for JourneyRow {
    fn headers() -> Vec<&'static str> {
        vec!["Journey", "Status", "Mapped", "Blocked", "Debt", "Heals", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.journey.clone(),
            self.status
                .map(status_label)
                .unwrap_or_else(|| "✗ error".red().to_string()),
            self.mapped.clone(),
            self.blocked_steps.to_string(),
            self.selector_debt.to_string(),
            self.heal_attempts.to_string(),
            self.detail.clone(),
        ]
    }
}

/// Rows sorted for display, and the combined exit signal
pub fn finish(mut rows: Vec<JourneyRow>) -> (Vec<JourneyRow>, ExitSignal) {
    rows.sort_by(|a, b| a.journey.cmp(&b.journey).then_with(|| a.path.cmp(&b.path)));
    let signal = rows.iter().map(JourneyRow::signal).collect();
    (rows, signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwright_compiler::ArtifactWriter;

    fn write_journey(dir: &Path, name: &str, id: &str, steps: &[&str]) -> PathBuf {
        let mut doc = format!(
            "---\nid: {}\ntitle: Journey {}\nstatus: clarified\ntier: smoke\nactor: user\n---\n\n## Steps\n\n",
            id, id
        );
        for (i, step) in steps.iter().enumerate() {
            doc.push_str(&format!("{}. {}\n", i + 1, step));
        }
        let path = dir.join(name);
        std::fs::write(&path, doc).unwrap();
        path
    }

    #[tokio::test]
    async fn test_compile_all_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        write_journey(dir.path(), "a.journey.md", "JRN-1", &["Navigate to /a"]);
        write_journey(dir.path(), "b.journey.md", "JRN-2", &["Navigate to /b", "Click the confirm element"]);
        std::fs::write(dir.path().join("notes.md"), "not a journey").unwrap();

        let ctx = Arc::new(CompileContext::from_config(StepwrightConfig::default()).unwrap());
        let results = compile_all(ctx, &[dir.path().to_path_buf()]).await.unwrap();
        assert_eq!(results.len(), 2);

        let batch = Batch::from_results(results);
        assert_eq!(batch.compiled.len(), 2);
        assert!(batch.rows.is_empty());
        assert_eq!(batch.compiled[0].1.journey.id, "JRN-1");
    }

    #[tokio::test]
    async fn test_errored_verification_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let journeys = tempfile::tempdir().unwrap();
        let path = write_journey(journeys.path(), "a.journey.md", "JRN-7", &["Navigate to /a"]);
        let ctx = Arc::new(CompileContext::from_config(StepwrightConfig::default()).unwrap());
        let results = compile_all(ctx.clone(), &[path.clone()]).await.unwrap();
        let Batch { compiled, .. } = Batch::from_results(results);
        let mut outcome = compiled[0].1.outcome(Vec::new());

        let emitter = Emitter::new(ctx.config(), ArtifactWriter::new(dir.path(), false));
        let summary = VerificationSummary {
            state: "error".to_string(),
            reason: Some("Test runner not found: npx".to_string()),
            runs: 0,
            evidence: Default::default(),
        };
        let row = record_error(&emitter, &path, &mut outcome, summary);
        assert_eq!(row.signal(), ExitSignal::HardError);
        assert_eq!(row.detail, "Test runner not found: npx");

        let written = std::fs::read_to_string(emitter.writer().outcome_path("JRN-7")).unwrap();
        let back: GenerationOutcome = serde_json::from_str(&written).unwrap();
        let verification = back.verification.unwrap();
        assert_eq!(verification.state, "error");
        assert_eq!(verification.reason.as_deref(), Some("Test runner not found: npx"));
    }

    #[test]
    fn test_failed_rows_are_hard_errors() {
        let rows = vec![
            JourneyRow::failed(Path::new("b.journey.md"), None, "line 3: bad step"),
            JourneyRow::failed(Path::new("a.journey.md"), Some("JRN-1"), "conflict"),
        ];
        let (rows, signal) = finish(rows);
        assert_eq!(signal, ExitSignal::HardError);
        assert_eq!(rows[0].journey, "-");
    }
}
