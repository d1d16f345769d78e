//! Xetra CLI: run the daily report job, or preview what it would process.
//!
//! Commands:
//! - `run <config>`: resolve pending dates, extract, transform, load and update the meta file
//! - `plan <config>`: resolve pending dates and print them without reading any source file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use xetra_runner::{JobConfig, RunPlan, RunSummary, XetraEtl};

#[derive(Parser)]
#[command(name = "xetra", about = "Xetra daily report job")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full job: extract, transform, load and update the meta file.
    Run {
        /// Path to the TOML job file.
        config: PathBuf,
    },
    /// Show the dates the next run would process.
    Plan {
        /// Path to the TOML job file.
        config: PathBuf,

        /// Print the plan as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_job(&config),
        Commands::Plan { config, json } => run_plan(&config, json),
    }
}

/// `RUST_LOG` wins over the job file's `[logging] level`. Logs go to stderr.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

fn load_job(path: &Path) -> Result<(JobConfig, PathBuf)> {
    let job = JobConfig::from_file(path)
        .with_context(|| format!("loading job file {}", path.display()))?;
    let base = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((job, base))
}

fn setup(path: &Path) -> Result<XetraEtl> {
    let (job, base) = load_job(path)?;
    init_logging(&job.logging.level);
    XetraEtl::from_job(&job, &base).map_err(|e| {
        let stage = e.stage();
        anyhow::Error::new(e).context(format!("{stage} stage failed"))
    })
}

fn run_job(path: &Path) -> Result<()> {
    let etl = setup(path)?;
    info!("Xetra ETL job started");
    let summary = etl.etl_report1().map_err(|e| {
        let stage = e.stage();
        anyhow::Error::new(e).context(format!("{stage} stage failed"))
    })?;
    info!("Xetra ETL job finished");

    print_summary(&summary);
    Ok(())
}

fn run_plan(path: &Path, json: bool) -> Result<()> {
    let etl = setup(path)?;
    let plan = etl.plan()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn join_dates(dates: &[chrono::NaiveDate]) -> String {
    dates
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_plan(plan: &RunPlan) {
    println!("=== Xetra Report 1 Plan ===");
    println!("First extract date: {}", plan.first_extract_date);
    println!("Today:              {}", plan.today);
    if plan.extract_dates.is_empty() {
        println!("Nothing to do: every date up to today is processed.");
        return;
    }
    println!("Report from:        {}", plan.min_date);
    if let Some(lookback) = plan.lookback_date {
        println!("Lookback day:       {lookback}");
    }
    println!("Extract dates:      {}", join_dates(&plan.extract_dates));
    println!("Dates to record:    {}", join_dates(&plan.dates_to_record));
    println!("Report key:         {}", plan.report_key);
}

fn print_summary(summary: &RunSummary) {
    println!("=== Xetra Report 1 ===");
    println!("Report from:     {}", summary.min_date);
    println!("Extracted rows:  {}", summary.extracted_rows);
    println!("Report rows:     {}", summary.report_rows);
    match &summary.report_key {
        Some(key) => println!("Report key:      {key}"),
        None => println!("Report key:      (empty report, nothing written)"),
    }
    if summary.recorded_dates.is_empty() {
        println!("Meta file:       unchanged");
    } else {
        println!(
            "Meta file:       recorded {} ({} rows total)",
            join_dates(&summary.recorded_dates),
            summary.meta_rows.unwrap_or_default()
        );
    }
}
