use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use hippo_volume::{
    EvaluationReport, Pipeline, PipelineConfig, VolumeLoader, enums::SortBy, evaluate_pairs,
};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run inference on the newest study in a routing folder and send the report
    Run(RunArgs),
    /// Compare predicted label series against reference series
    Evaluate(EvaluateArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Folder whose subdirectories each hold one routed study
    routing_dir: PathBuf,

    /// Configuration file
    #[arg(short, long, value_name = "FILE", env = "HIPPO_VOLUME_CONFIG")]
    config: Option<PathBuf>,

    /// Keep the report local instead of sending it to the archive
    #[arg(long)]
    no_push: bool,
}

#[derive(Debug, Args)]
struct EvaluateArgs {
    /// Directories of predicted label series (.dcm files)
    #[arg(short, long, value_name = "DIR", required = true)]
    prediction: Vec<PathBuf>,

    /// Directories of reference label series, in the same order
    #[arg(short, long, value_name = "DIR", required = true)]
    reference: Vec<PathBuf>,

    /// Write the JSON report here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

fn run(args: RunArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let mut pipeline = Pipeline::from_config(config).context("failed to set up the model")?;
    if args.no_push {
        pipeline = pipeline.without_push();
    }

    let outcome = pipeline
        .run(&args.routing_dir)
        .with_context(|| format!("inference failed for {}", args.routing_dir.display()))?;

    println!("Study: {}", outcome.study_dir.display());
    println!("Report: {}", outcome.report_path.display());
    println!(
        "Volume anterior: {} ({:.1} mm3), posterior: {} ({:.1} mm3), total: {} ({:.1} mm3)",
        outcome.volumes.anterior,
        outcome.physical.anterior_mm3,
        outcome.volumes.posterior,
        outcome.physical.posterior_mm3,
        outcome.volumes.total,
        outcome.physical.total_mm3,
    );
    println!("Sent to archive: {}", if outcome.pushed { "yes" } else { "no" });
    Ok(())
}

fn evaluate(args: EvaluateArgs) -> Result<()> {
    if args.prediction.len() != args.reference.len() {
        bail!(
            "got {} prediction and {} reference directories",
            args.prediction.len(),
            args.reference.len()
        );
    }

    let mut names = Vec::new();
    let mut pairs = Vec::new();
    for (prediction, reference) in args.prediction.iter().zip(&args.reference) {
        let load = |dir: &PathBuf| {
            VolumeLoader::load_from_directory(dir, SortBy::InstanceNumber)
                .with_context(|| format!("failed to load {}", dir.display()))
        };
        pairs.push((load(prediction)?.data, load(reference)?.data));
        names.push(prediction.display().to_string());
    }

    let report = EvaluationReport::from_results(names.into_iter().zip(evaluate_pairs(&pairs)));
    let json = report.to_json().context("failed to serialize evaluation")?;
    match &args.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run(args) => run(args),
        Command::Evaluate(args) => evaluate(args),
    }
}
