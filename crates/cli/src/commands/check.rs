//! Check Command - parse and match only, never writes

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use stepwright_compiler::{CompiledJourney, StepwrightConfig};

use super::{build_context, compile_all, finish, Batch, InputArgs, JourneyRow};
use crate::output::{print_error, print_list, OutputFormat, TableDisplay};
use crate::signal::ExitSignal;

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub input: InputArgs,
}

/// One step as the compiler understood it
#[derive(Debug, Serialize)]
pub struct StepRow {
    pub journey: String,
    pub step: u32,
    pub op: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl StepRow {
    fn rows(compiled: &CompiledJourney) -> impl Iterator<Item = StepRow> + '_ {
        compiled.steps.iter().map(move |step| {
            let summary = match compiled.blocked.iter().find(|b| b.step == step.ordinal) {
                Some(blocked) => format!("blocked: {}", blocked.reason),
                None => step.op.summary(),
            };
            StepRow {
                journey: compiled.journey.id.clone(),
                step: step.ordinal,
                op: step.op.kind().as_str().to_string(),
                summary,
                element: step.element.clone(),
                template: step.template.clone(),
            }
        })
    }
}

impl TableDisplay for StepRow {
    fn headers() -> Vec<&'static str> {
        vec!["Journey", "Step", "Op", "Summary", "Element", "Template"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.journey.clone(),
            self.step.to_string(),
            self.op.clone(),
            self.summary.clone(),
            self.element.clone().unwrap_or_default(),
            self.template.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

pub async fn execute(args: CheckArgs, config: StepwrightConfig, format: OutputFormat) -> Result<ExitSignal> {
    let ctx = build_context(config, &args.input)?;
    let results = compile_all(ctx, &args.input.journeys).await?;
    let Batch {
        compiled,
        manual,
        mut rows,
    } = Batch::from_results(results);

    let steps: Vec<StepRow> = compiled.iter().flat_map(|(_, c)| StepRow::rows(c)).collect();
    print_list(&steps, format);

    for (path, journey) in &compiled {
        rows.push(JourneyRow::from_outcome(path, &journey.outcome(Vec::new())));
    }
    for (path, outcome) in &manual {
        rows.push(JourneyRow::from_outcome(path, outcome));
    }
    let (rows, signal) = finish(rows);
    for row in rows.iter().filter(|r| r.status.is_none()) {
        print_error(&format!("{}: {}", row.path.display(), row.detail));
    }
    Ok(signal)
}
