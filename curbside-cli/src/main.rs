mod reports;
mod tables;
mod util;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use curbside_core::{EstimationConfig, EstimationEngine, EstimationRun, Prepared, replicate_seed};
use reports::ReportFormat;
use tables::{CsvSink, CsvSource, PreparedTables, read_truck_types};
use util::{OutputTarget, split_csv};

#[derive(Debug, Parser)]
#[command(name = "curbside", version)]
#[command(about = "BBL estimation of food-truck location choice from a daily parking panel")]
struct Cli {
    /// Verbose output (debug logging per path and sample)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build states and choice probabilities and write them to a directory
    Prepare(PrepareArgs),
    /// Draw one set of moment inequalities from prepared tables
    Moments(MomentsArgs),
    /// Run full estimation replicates from a raw panel
    Estimate(EstimateArgs),
}

/// Settings shared by every subcommand. Flags override the config file.
#[derive(Debug, Args)]
struct ConfigArgs {
    /// JSON file deserialized into the estimation config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Known locations (comma-separated), in reporting order
    #[arg(long)]
    locations: Option<String>,

    /// Catch-all location for missing truck-days
    #[arg(long)]
    other_location: Option<String>,

    /// Master seed
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Args)]
struct PrepareArgs {
    /// Panel CSV with Truck, Date and Location columns
    #[arg(long)]
    panel: PathBuf,

    /// Truck types CSV with Truck and Type columns
    #[arg(long)]
    truck_types: PathBuf,

    /// Directory receiving probabilities.csv, state_variables.csv and states.csv
    #[arg(long)]
    out_dir: PathBuf,

    #[command(flatten)]
    settings: ConfigArgs,
}

#[derive(Debug, Args)]
struct MomentsArgs {
    /// Directory written by `prepare`
    #[arg(long)]
    prepared_dir: PathBuf,

    /// Truck types CSV with Truck and Type columns
    #[arg(long)]
    truck_types: PathBuf,

    #[command(flatten)]
    settings: ConfigArgs,
}

#[derive(Debug, Args)]
struct EstimateArgs {
    /// Panel CSV with Truck, Date and Location columns
    #[arg(long)]
    panel: PathBuf,

    /// Truck types CSV with Truck and Type columns
    #[arg(long)]
    truck_types: PathBuf,

    /// Number of replicates
    #[arg(long)]
    replicates: Option<usize>,

    /// Results table destination
    #[arg(long, default_value = "results.csv")]
    output: PathBuf,

    /// Also write the first-stage tables to this directory
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Console)]
    report: ReportFormat,

    /// Write the report here instead of stdout
    #[arg(long)]
    report_output: Option<PathBuf>,

    #[command(flatten)]
    settings: ConfigArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Prepare(args) => run_prepare(&args),
        Command::Moments(args) => run_moments(&args),
        Command::Estimate(args) => run_estimate(&args),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn announce_banner() {
    println!("{}", "🚚 Curbside BBL Estimator".bright_cyan().bold());
    println!("{}", "================================".cyan());
}

fn load_config(settings: &ConfigArgs) -> Result<EstimationConfig> {
    let mut config = match &settings.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            EstimationConfig::from_json(&json)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => EstimationConfig::default(),
    };
    if let Some(locations) = &settings.locations {
        config.locations = split_csv(locations);
    }
    if let Some(other) = &settings.other_location {
        config.other_location.clone_from(other);
    }
    if let Some(seed) = settings.seed {
        config.seed = seed;
    }
    Ok(config)
}

fn run_prepare(args: &PrepareArgs) -> Result<()> {
    let config = load_config(&args.settings)?;
    config.validate().context("invalid configuration")?;
    announce_banner();

    let engine = EstimationEngine::new(
        CsvSource::new(args.panel.clone(), args.truck_types.clone()),
        CsvSink::new(Some(args.out_dir.clone()), None),
        config,
    );
    let prepared = engine.prepare().context("first stage failed")?;

    let mut out = std::io::stdout().lock();
    reports::write_summary(&mut out, &prepared.summary)?;
    writeln!(
        out,
        "📁 Tables written to {}",
        args.out_dir.display().to_string().green()
    )?;
    Ok(())
}

fn restore(args: &MomentsArgs, config: &EstimationConfig) -> Result<Prepared> {
    let truck_types = read_truck_types(&args.truck_types)
        .with_context(|| format!("failed to read {}", args.truck_types.display()))?;
    let tables = PreparedTables::read(&args.prepared_dir)
        .with_context(|| format!("failed to read {}", args.prepared_dir.display()))?;
    Prepared::restore(
        config,
        &truck_types,
        &tables.state_variables,
        &tables.probabilities,
        &tables.states,
    )
    .context("prepared tables do not match the configuration")
}

fn run_moments(args: &MomentsArgs) -> Result<()> {
    let config = load_config(&args.settings)?;
    config.validate().context("invalid configuration")?;
    announce_banner();

    let prepared = restore(args, &config)?;
    let samples = prepared.moments(&config, replicate_seed(config.seed, 0));
    let model = &prepared.model;

    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", "🎲 Moment Samples".bright_yellow().bold())?;
    writeln!(out, "{}", "-".repeat(30).yellow())?;
    for sample in &samples {
        writeln!(
            out,
            "{} {:20} {:32} params={:2} g(1)={:>12.6}",
            sample.date,
            model.fleet.name(sample.truck),
            sample.choice.label(&model.locations),
            sample.g.parameters().count(),
            sample.g.evaluate(|_| 1.0)
        )?;
    }
    let unknown: u64 = samples.iter().map(|s| s.stats.unknown_states).sum();
    writeln!(out, "{} samples, {} unknown-state draws", samples.len(), unknown)?;
    Ok(())
}

fn run_estimate(args: &EstimateArgs) -> Result<()> {
    let mut config = load_config(&args.settings)?;
    if let Some(replicates) = args.replicates {
        config.replicates = replicates;
    }
    config.validate().context("invalid configuration")?;
    if args.report == ReportFormat::Console {
        announce_banner();
    }

    let start_time = Instant::now();
    let engine = EstimationEngine::new(
        CsvSource::new(args.panel.clone(), args.truck_types.clone()),
        CsvSink::new(args.out_dir.clone(), Some(args.output.clone())),
        config,
    );
    let run = engine.estimate().context("estimation failed")?;
    write_report(args, &run, start_time)?;
    log::info!("results table written to {}", args.output.display());
    Ok(())
}

fn write_report(
    args: &EstimateArgs,
    run: &EstimationRun,
    start_time: Instant,
) -> Result<()> {
    let mut target = OutputTarget::new(args.report_output.clone())?;
    match args.report {
        ReportFormat::Json => reports::generate_json_report(&mut target, run)?,
        ReportFormat::Markdown => reports::generate_markdown_report(&mut target, run)?,
        ReportFormat::Console => {
            reports::generate_console_report(&mut target, run, start_time.elapsed())?;
            writeln!(target, "🏁 Results written to {}", args.output.display())?;
        }
    }
    target.flush()?;
    Ok(())
}
