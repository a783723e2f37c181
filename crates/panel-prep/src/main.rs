//! CLI entry point for the panel cleaning pipeline.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use panel_prep::{
    CleaningOutcome, DatasetSchema, DatasetSpec, Pipeline, PipelineConfig, SummaryStatistics,
};
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Typed cleaning pipeline for panel survey extracts",
    long_about = "Renames, types and derives variables of one raw survey extract.\n\n\
                  EXAMPLES:\n  \
                  # Clean with a rename table only\n  \
                  panel-prep raw/health.csv --schema schemas/health.csv\n\n  \
                  # Full run with dataset specification and output\n  \
                  panel-prep raw/health.csv --schema schemas/health.csv \\\n    \
                  --specs specs.json --dataset health -o cleaned/health.csv\n\n  \
                  # Machine-readable report\n  \
                  panel-prep raw/health.csv --schema schemas/health.csv --json"
)]
struct Args {
    /// Path to the raw CSV extract
    input: PathBuf,

    /// Rename table (`raw_name;new_name;type;categories;ordered`)
    #[arg(short, long)]
    schema: PathBuf,

    /// Dataset specification file (JSON keyed by dataset name)
    #[arg(long)]
    specs: Option<PathBuf>,

    /// Dataset name inside the specification file
    ///
    /// Defaults to the input file stem
    #[arg(short, long)]
    dataset: Option<String>,

    /// Pipeline configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path of the cleaned CSV
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show warnings and errors)
    #[arg(short, long)]
    quiet: bool,

    /// Print the cleaning report as JSON to stdout instead of a summary
    ///
    /// Disables all logs so stdout only carries the report.
    #[arg(long)]
    json: bool,

    /// Write the cleaning report next to the output as `<output>.report.json`
    #[arg(short = 'r', long)]
    emit_report: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled to ensure
/// only JSON is written to stdout.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.json);

    if !args.input.exists() {
        return Err(anyhow!("Input file not found: {}", args.input.display()));
    }

    let dataset = match &args.dataset {
        Some(name) => name.clone(),
        None => file_stem(&args.input),
    };

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str::<PipelineConfig>(&text)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    let schema = DatasetSchema::load(&args.schema)?;
    let spec = match &args.specs {
        Some(path) => DatasetSpec::load(path, &dataset)?,
        None => DatasetSpec::default(),
    };

    info!("Loading dataset from: {}", args.input.display());
    let data = load_csv(&args.input)?;
    info!("Dataset loaded successfully: {:?}", data.shape());

    let pipeline = Pipeline::builder()
        .config(config)
        .dataset(&dataset)
        .schema(schema)
        .spec(spec)
        .build()?;

    let outcome = match pipeline.process(data) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Pipeline failed [{}]: {}", e.error_code(), e);
            return Err(anyhow!("Pipeline failed: {}", e));
        }
    };

    if let Some(path) = &args.output {
        write_csv(&outcome, path)?;
        info!("Cleaned table written to: {}", path.display());

        if args.emit_report {
            let report_path = path.with_extension("report.json");
            std::fs::write(&report_path, serde_json::to_string_pretty(&outcome.report)?)?;
            info!("Report written to: {}", report_path.display());
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
        return Ok(());
    }

    print_summary(&outcome, pipeline.spec());
    Ok(())
}

fn load_csv(path: &Path) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_infer_schema_length(Some(10_000))
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

fn write_csv(outcome: &CleaningOutcome, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut df = outcome.frame.data().clone();
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create output {}", path.display()))?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "dataset".to_string())
}

/// Print a human-readable run summary.
fn print_summary(outcome: &CleaningOutcome, spec: &DatasetSpec) {
    let report = &outcome.report;

    println!("\n{}", "=".repeat(80));
    println!("CLEANING SUMMARY: {}", report.dataset);
    println!("{}", "=".repeat(80));
    println!(
        "  Rows:    {} -> {}",
        report.rows_before, report.rows_after
    );
    println!(
        "  Columns: {} -> {}",
        report.columns_before, report.columns_after
    );
    println!("  Duration: {} ms", report.duration_ms);
    if !report.intentionally_dropped.is_empty() {
        println!(
            "  Dropped by schema: {}",
            report.intentionally_dropped.join(", ")
        );
    }

    println!("\nACTIONS ({})", report.actions.len());
    println!("{}", "-".repeat(40));
    for action in &report.actions {
        println!(
            "  [{}] {}: {}",
            action.action_type.display_name(),
            action.target,
            action.description
        );
    }

    if !report.warnings.is_empty() {
        println!("\nWARNINGS ({})", report.warnings.len());
        println!("{}", "-".repeat(40));
        for warning in &report.warnings {
            println!("  {warning}");
        }
    }

    if !spec.summary.is_empty() {
        println!("\nSUMMARY STATISTICS");
        println!("{}", "-".repeat(40));
        match SummaryStatistics::describe(&outcome.frame, &spec.summary) {
            Ok(table) => println!("{table}"),
            Err(e) => println!("  unavailable: {e}"),
        }
    }
}
