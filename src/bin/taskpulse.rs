//! Taskpulse CLI - Command-line interface for the scoring engine
//!
//! Commands:
//! - score: Compute per-instance metric scores from a record file
//! - aggregate: Compute a trailing-window aggregate for a metric and scope
//! - composite: Compute the weighted composite score for a scope
//! - recommend: Rank pending instances by a primary metric
//! - validate: Validate raw record schema
//! - doctor: Diagnose engine health and configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use taskpulse::{
    BaselineMetric, CandidateFilter, InMemorySource, Metric, RawRecord, ScoreEngine, Scope,
    DEFAULT_COMPOSITE_SCORE, ENGINE_VERSION, PRODUCER_NAME, SCHEMA_VERSION,
};

/// Taskpulse - Analytics and scoring engine for personal activity tracking
#[derive(Parser)]
#[command(name = "taskpulse")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Score activity records and rank recommendations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute per-instance metric scores from a record file
    Score {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Instance to score (all instances when omitted)
        #[arg(long)]
        instance: Option<String>,

        /// Metric to compute (all metrics when omitted)
        #[arg(long)]
        metric: Option<String>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Compute a trailing-window aggregate for a metric and scope
    Aggregate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Aggregated metric
        #[arg(long, value_enum)]
        metric: AggregateMetric,

        /// Scope ("global", "category:<name>", or "template:<id>")
        #[arg(long, default_value = "global")]
        scope: String,

        /// Trailing window in days
        #[arg(long, default_value = "30")]
        window_days: u32,
    },

    /// Compute the weighted composite score for a scope
    Composite {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Scope ("global", "category:<name>", or "template:<id>")
        #[arg(long, default_value = "global")]
        scope: String,

        /// Composite score name
        #[arg(long, default_value = DEFAULT_COMPOSITE_SCORE)]
        score: String,

        /// Load a weight table from file (defaults apply when omitted)
        #[arg(long)]
        load_weights: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Rank pending instances by a primary metric
    Recommend {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Primary ranking metric
        #[arg(long, default_value = "execution")]
        metric: String,

        /// Restrict to one category
        #[arg(long)]
        category: Option<String>,

        /// Restrict to one activity template
        #[arg(long)]
        template: Option<String>,

        /// Exclude candidates estimated longer than this (minutes)
        #[arg(long)]
        max_minutes: Option<f64>,

        /// Maximum number of recommendations (0 uses the engine default)
        #[arg(long, default_value = "0")]
        limit: usize,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Validate raw record schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose engine health and configuration
    Doctor {
        /// Check a saved weight table file
        #[arg(long)]
        weights: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one result per line)
    Ndjson,
    /// JSON array
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum AggregateMetric {
    Relief,
    InitialAversion,
    CognitiveLoad,
    ElapsedMinutes,
    CompletionPct,
}

impl From<AggregateMetric> for BaselineMetric {
    fn from(metric: AggregateMetric) -> Self {
        match metric {
            AggregateMetric::Relief => BaselineMetric::Relief,
            AggregateMetric::InitialAversion => BaselineMetric::InitialAversion,
            AggregateMetric::CognitiveLoad => BaselineMetric::CognitiveLoad,
            AggregateMetric::ElapsedMinutes => BaselineMetric::ElapsedMinutes,
            AggregateMetric::CompletionPct => BaselineMetric::CompletionPct,
        }
    }
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// RUST_LOG-driven logging to stderr, keeping stdout clean for results
fn init_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), TaskpulseCliError> {
    match cli.command {
        Commands::Score {
            input,
            instance,
            metric,
            output_format,
        } => cmd_score(&input, instance.as_deref(), metric.as_deref(), output_format),

        Commands::Aggregate {
            input,
            metric,
            scope,
            window_days,
        } => cmd_aggregate(&input, metric.into(), &scope, window_days),

        Commands::Composite {
            input,
            scope,
            score,
            load_weights,
            output_format,
        } => cmd_composite(&input, &scope, &score, load_weights.as_deref(), output_format),

        Commands::Recommend {
            input,
            metric,
            category,
            template,
            max_minutes,
            limit,
            output_format,
        } => {
            let filter = CandidateFilter {
                category,
                template_id: template,
                max_estimated_minutes: max_minutes,
            };
            cmd_recommend(&input, &metric, &filter, limit, output_format)
        }

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Doctor { weights, json } => cmd_doctor(weights.as_deref(), json),
    }
}

fn cmd_score(
    input: &Path,
    instance: Option<&str>,
    metric: Option<&str>,
    output_format: OutputFormat,
) -> Result<(), TaskpulseCliError> {
    // One read: stdin (`-`) cannot be consumed twice
    let records = read_records(input)?;

    let metrics: Vec<Metric> = match metric {
        Some(name) => vec![parse_metric(name)?],
        None => Metric::ALL.to_vec(),
    };
    let instances: Vec<String> = match instance {
        Some(id) => vec![id.to_string()],
        None => instance_ids(&records),
    };

    let engine = ScoreEngine::new(Arc::new(InMemorySource::new(records)));
    let results = score_results(&engine, &instances, &metrics)?;
    print!("{}", format_output(&results, &output_format)?);
    Ok(())
}

fn instance_ids(records: &[RawRecord]) -> Vec<String> {
    let mut ids: Vec<String> = records.iter().map(|r| r.instance_id.clone()).collect();
    ids.sort();
    ids.dedup();
    ids
}

fn score_results(
    engine: &ScoreEngine,
    instances: &[String],
    metrics: &[Metric],
) -> Result<Vec<serde_json::Value>, TaskpulseCliError> {
    let mut results: Vec<serde_json::Value> = Vec::new();
    for id in instances {
        let mut scores = serde_json::Map::new();
        for metric in metrics {
            let value = engine.compute_score(*metric, id)?;
            scores.insert(metric.as_str().to_string(), serde_json::json!(value));
        }
        results.push(serde_json::json!({
            "instance_id": id,
            "scores": scores,
        }));
    }
    Ok(results)
}

fn cmd_aggregate(
    input: &Path,
    metric: BaselineMetric,
    scope: &str,
    window_days: u32,
) -> Result<(), TaskpulseCliError> {
    let engine = load_engine(input)?;
    let scope = parse_scope(scope)?;

    let value = engine.compute_aggregate(metric, &scope, window_days)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_composite(
    input: &Path,
    scope: &str,
    score: &str,
    load_weights: Option<&Path>,
    output_format: OutputFormat,
) -> Result<(), TaskpulseCliError> {
    let engine = load_engine(input)?;
    let scope = parse_scope(scope)?;

    if let Some(weights_path) = load_weights {
        let weights_json = fs::read_to_string(weights_path)?;
        engine.load_weights(&weights_json)?;
    }

    let result = engine.compute_composite(&scope, "cli", score)?;
    let results = vec![serde_json::to_value(&result)?];
    print!("{}", format_output(&results, &output_format)?);
    Ok(())
}

fn cmd_recommend(
    input: &Path,
    metric: &str,
    filter: &CandidateFilter,
    limit: usize,
    output_format: OutputFormat,
) -> Result<(), TaskpulseCliError> {
    let engine = load_engine(input)?;
    let metric = parse_metric(metric)?;

    let ranked = engine.get_recommendations(filter, metric, limit)?;
    let results: Vec<serde_json::Value> = ranked
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<_, _>>()?;
    print!("{}", format_output(&results, &output_format)?);
    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), TaskpulseCliError> {
    let records = read_records(input)?;

    let errors: Vec<ValidationErrorDetail> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            record.validate().err().map(|e| ValidationErrorDetail {
                index,
                instance_id: Some(record.instance_id.clone()),
                error: e.to_string(),
            })
        })
        .collect();

    let report = ValidationReport {
        total_records: records.len(),
        valid_records: records.len() - errors.len(),
        invalid_records: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Record {} (index {}): {}",
                    err.instance_id.as_deref().unwrap_or("unknown"),
                    err.index,
                    err.error
                );
            }
        }
    }

    if report.invalid_records > 0 {
        Err(TaskpulseCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_doctor(weights: Option<&Path>, json: bool) -> Result<(), TaskpulseCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Taskpulse version {}", ENGINE_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}", SCHEMA_VERSION),
    });

    if let Some(weights_path) = weights {
        if weights_path.exists() {
            let check = match fs::read_to_string(weights_path) {
                Ok(content) => {
                    let probe = InMemorySource::new(vec![]);
                    let engine = ScoreEngine::new(Arc::new(probe));
                    match engine.load_weights(&content) {
                        Ok(()) => DoctorCheck {
                            name: "weights".to_string(),
                            status: CheckStatus::Ok,
                            message: "Weight table file valid".to_string(),
                        },
                        Err(e) => DoctorCheck {
                            name: "weights".to_string(),
                            status: CheckStatus::Error,
                            message: format!("Invalid weight table: {}", e),
                        },
                    }
                }
                Err(e) => DoctorCheck {
                    name: "weights".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read weight table file: {}", e),
                },
            };
            checks.push(check);
        } else {
            checks.push(DoctorCheck {
                name: "weights".to_string(),
                status: CheckStatus::Warning,
                message: "Weight table file does not exist".to_string(),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (streaming mode ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Taskpulse Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(TaskpulseCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_records(input: &Path) -> Result<Vec<RawRecord>, TaskpulseCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let trimmed = input_data.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    // NDJSON: one record per line
    let mut records = Vec::new();
    for (number, line) in input_data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: RawRecord = serde_json::from_str(line).map_err(|e| {
            TaskpulseCliError::ParseError(format!("Failed to parse record on line {}: {}", number + 1, e))
        })?;
        records.push(record);
    }

    if records.is_empty() {
        return Err(TaskpulseCliError::NoRecords);
    }
    Ok(records)
}

fn load_engine(input: &Path) -> Result<ScoreEngine, TaskpulseCliError> {
    let records = read_records(input)?;
    let source = InMemorySource::new(records);
    Ok(ScoreEngine::new(Arc::new(source)))
}

fn parse_metric(name: &str) -> Result<Metric, TaskpulseCliError> {
    Metric::parse(name)
        .ok_or_else(|| taskpulse::EngineError::UnknownMetric(name.to_string()).into())
}

fn parse_scope(scope: &str) -> Result<Scope, TaskpulseCliError> {
    if scope == "global" {
        return Ok(Scope::Global);
    }
    match scope.split_once(':') {
        Some(("category", name)) if !name.is_empty() => Ok(Scope::Category(name.to_string())),
        Some(("template", id)) if !id.is_empty() => Ok(Scope::Template(id.to_string())),
        _ => Err(TaskpulseCliError::ParseError(format!(
            "Unknown scope '{}' (expected global, category:<name>, or template:<id>)",
            scope
        ))),
    }
}

fn format_output(
    results: &[serde_json::Value],
    format: &OutputFormat,
) -> Result<String, TaskpulseCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for result in results {
                lines.push(serde_json::to_string(result)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(results)?),
        OutputFormat::JsonPretty => {
            let mut out = serde_json::to_string_pretty(results)?;
            out.push('\n');
            Ok(out)
        }
    }
}

// Error types

#[derive(Debug)]
enum TaskpulseCliError {
    Io(io::Error),
    Engine(taskpulse::EngineError),
    Json(serde_json::Error),
    NoRecords,
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for TaskpulseCliError {
    fn from(e: io::Error) -> Self {
        TaskpulseCliError::Io(e)
    }
}

impl From<taskpulse::EngineError> for TaskpulseCliError {
    fn from(e: taskpulse::EngineError) -> Self {
        TaskpulseCliError::Engine(e)
    }
}

impl From<serde_json::Error> for TaskpulseCliError {
    fn from(e: serde_json::Error) -> Self {
        TaskpulseCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<TaskpulseCliError> for CliError {
    fn from(e: TaskpulseCliError) -> Self {
        match e {
            TaskpulseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            TaskpulseCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check metric names, instance ids, and weight keys".to_string()),
            },
            TaskpulseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            TaskpulseCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            TaskpulseCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            TaskpulseCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            TaskpulseCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    instance_id: Option<String>,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
