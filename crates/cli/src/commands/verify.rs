//! Verify Command - compile, write, run and heal

use anyhow::Result;
use clap::Args;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stepwright_compiler::{ArtifactWriter, Emitter, Evidence, StepwrightConfig, VerificationSummary};
use stepwright_verify::{verify_all, PlaywrightExecutor, VerifyError};

use super::{build_context, compile_all, emit_batch, finish, record, record_error, Batch, InputArgs};
use crate::output::{print_list, print_warning, OutputFormat};
use crate::signal::ExitSignal;

#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Output directory; also the Playwright project root
    #[arg(long)]
    pub out: PathBuf,

    /// Keep every element function in its journey module (no shared module)
    #[arg(long)]
    pub no_modules: bool,

    /// Heal attempts per journey (1-5)
    #[arg(long)]
    pub heal_budget: Option<u32>,

    /// Journeys verified in parallel
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-run timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

pub async fn execute(args: VerifyArgs, mut config: StepwrightConfig, format: OutputFormat) -> Result<ExitSignal> {
    if args.no_modules {
        config.codegen.generate_modules = false;
    }
    if let Some(budget) = args.heal_budget {
        config.verify.heal_budget = budget;
    }
    if let Some(concurrency) = args.concurrency {
        config.verify.concurrency = concurrency;
    }
    if let Some(timeout) = args.timeout_secs {
        config.verify.timeout_secs = timeout;
    }

    let ctx = build_context(config, &args.input)?;
    let results = compile_all(ctx.clone(), &args.input.journeys).await?;
    let Batch {
        compiled,
        manual,
        mut rows,
    } = Batch::from_results(results);

    let emitter = Arc::new(Emitter::new(ctx.config(), ArtifactWriter::new(&args.out, false)));
    let (plan, emitted) = emit_batch(&ctx, &emitter, compiled, &mut rows)?;

    // Journeys with fixme steps cannot pass; they keep their compile outcome
    let (runnable, partial): (Vec<_>, Vec<_>) = emitted
        .into_iter()
        .partition(|e| e.compiled.is_fully_mapped());
    for item in &partial {
        info!(
            "{} has {} blocked step(s); not verified",
            item.outcome.journey_id,
            item.outcome.blocked_steps.len()
        );
        rows.push(record(&emitter, &item.path, &item.outcome));
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping running tests");
            on_interrupt.cancel();
        }
    });

    let executor = Arc::new(PlaywrightExecutor::new(&ctx.config().verify));
    let journeys = runnable.iter().map(|e| e.compiled.clone()).collect();
    let mut verified: BTreeMap<String, _> = verify_all(
        executor,
        emitter.clone(),
        &ctx.config().verify,
        &plan,
        journeys,
        cancel,
    )
    .await
    .into_iter()
    .collect();

    let mut runner_missing = false;
    for mut item in runnable {
        match verified.remove(&item.outcome.journey_id) {
            Some(Ok(result)) => {
                result.apply_to(&mut item.outcome);
                rows.push(record(&emitter, &item.path, &item.outcome));
            }
            Some(Err(e)) => {
                runner_missing |= matches!(e, VerifyError::RunnerNotFound(_));
                rows.push(record_error(&emitter, &item.path, &mut item.outcome, e.summary()));
            }
            None => {
                let summary = VerificationSummary {
                    state: "error".to_string(),
                    reason: Some("verification did not report".to_string()),
                    runs: 0,
                    evidence: Evidence::default(),
                };
                rows.push(record_error(&emitter, &item.path, &mut item.outcome, summary));
            }
        }
    }
    for (path, outcome) in &manual {
        rows.push(record(&emitter, path, outcome));
    }

    if runner_missing {
        print_warning("Playwright is not available; install it in the output directory and rerun");
    }

    let (rows, signal) = finish(rows);
    print_list(&rows, format);
    Ok(signal)
}
