//! Stagegraph command line.
//!
//! Compiles a layer graph document and runs it through the tiered runner.
//! Prints the artifacts directory on success.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use stagegraph::config::RunConfig;
use stagegraph::context::RunContext;
use stagegraph::core::Shape;
use stagegraph::engine::{ComputeEngine, ProcessEngine, UnavailableEngine};
use stagegraph::errors::StagegraphError;
use stagegraph::events::LoggingEventSink;
use stagegraph::runner::{ResilientRunner, DEFAULT_OUTPUT_DIR};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "stagegraph")]
#[command(about = "Compile a layer graph and run it with tiered fallback", long_about = None)]
struct Cli {
    /// Graph document (JSON with `modelStructure` and `edges`)
    input: PathBuf,

    /// Directory that receives one artifacts directory per run
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Program that trains pipelines; without one, training is unavailable
    #[arg(long)]
    engine: Option<String>,

    /// Argument passed to the engine program (repeatable)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Run configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-sample input shape, e.g. 28,28,1
    #[arg(long, value_parser = parse_shape)]
    input_shape: Option<Shape>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_shape(text: &str) -> Result<Shape, String> {
    Shape::parse(text).ok_or_else(|| format!("'{text}' is not a list of positive dimensions"))
}

fn init_tracing(format: LogFormat, verbose: bool) {
    let default = if verbose { "stagegraph=debug" } else { "stagegraph=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> anyhow::Result<PathBuf> {
    let config = match &cli.config {
        Some(path) => RunConfig::from_path(path)?,
        None => RunConfig::new(),
    };
    let engine: Box<dyn ComputeEngine> = match cli.engine {
        Some(program) => Box::new(ProcessEngine::new(program).with_args(cli.engine_args)),
        None => Box::new(UnavailableEngine),
    };
    let mut ctx = RunContext::new().with_sink(Arc::new(LoggingEventSink::debug()));
    let runner = ResilientRunner::new(engine, config).with_output_dir(cli.output_dir);
    let report = runner
        .run_document(&cli.input, cli.input_shape.as_ref(), &mut ctx)
        .with_context(|| format!("cannot run {}", cli.input.display()))?;

    info!(
        run_id = %ctx.run_id(),
        final_tier = %report.final_tier,
        succeeded = report.succeeded(),
        "Run finished"
    );
    Ok(report.artifacts_dir)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose);

    match run(cli) {
        Ok(artifacts_dir) => {
            println!("{}", artifacts_dir.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err:#}");
            if let Some(StagegraphError::Graph(graph)) = err.downcast_ref::<StagegraphError>() {
                let info = graph.error_info();
                if let Some(hint) = info.fix_hint {
                    error!(code = %info.code, "{hint}");
                }
            }
            ExitCode::FAILURE
        }
    }
}
