//! Compile Command

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use stepwright_compiler::{ArtifactWriter, Emitter, StepwrightConfig};

use super::{build_context, compile_all, emit_batch, finish, record, Batch, InputArgs};
use crate::output::{print_info, print_list, print_success, OutputFormat};
use crate::signal::ExitSignal;

#[derive(Args, Debug)]
pub struct CompileArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Output directory for tests, modules and outcomes
    #[arg(long)]
    pub out: PathBuf,

    /// Compute everything but write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Keep every element function in its journey module (no shared module)
    #[arg(long)]
    pub no_modules: bool,
}

pub async fn execute(args: CompileArgs, mut config: StepwrightConfig, format: OutputFormat) -> Result<ExitSignal> {
    if args.no_modules {
        config.codegen.generate_modules = false;
    }
    let ctx = build_context(config, &args.input)?;
    let results = compile_all(ctx.clone(), &args.input.journeys).await?;

    let Batch {
        compiled,
        manual,
        mut rows,
    } = Batch::from_results(results);

    let emitter = Emitter::new(ctx.config(), ArtifactWriter::new(&args.out, args.dry_run));
    let (_, emitted) = emit_batch(&ctx, &emitter, compiled, &mut rows)?;

    for item in &emitted {
        rows.push(record(&emitter, &item.path, &item.outcome));
    }
    for (path, outcome) in &manual {
        rows.push(record(&emitter, path, outcome));
    }

    let human = matches!(format, OutputFormat::Table | OutputFormat::Plain);
    if args.dry_run && human {
        let planned: usize = emitted
            .iter()
            .map(|e| e.outcome.emitted_files.len())
            .sum();
        print_info(&format!("Dry run: {} file(s) planned, nothing written", planned));
    }

    let (rows, signal) = finish(rows);
    print_list(&rows, format);
    if human && signal == ExitSignal::Success && !args.dry_run && !emitted.is_empty() {
        print_success(&format!(
            "Compiled {} journey(s) into {}",
            emitted.len(),
            args.out.display()
        ));
    }
    Ok(signal)
}
