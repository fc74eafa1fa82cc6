//! CLI command definitions for parallel-analysis.
//!
//! `compute` runs the built-in row statistics over a rows file directly;
//! `submit`, `status` and `jobs` go through the job store and the admission
//! controller.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::compute::{load_rows, ParallelExecutor, ResultSeries, RowStatistics};
use crate::config::EngineConfig;
use crate::metrics::{export_metrics, init_metrics};
use crate::notify::{NotificationSink, TracingSink, WebhookSink};
use crate::scheduler::{AdmissionController, JobRegistry, JobStatus};
use crate::storage::JobStore;

/// Default number of job records listed by `jobs`.
const DEFAULT_JOBS_LIMIT: u32 = 20;

/// Parallel batch analysis engine.
#[derive(Parser)]
#[command(name = "parallel-analysis")]
#[command(about = "Run row analyses in parallel and gate concurrent jobs")]
#[command(version)]
#[command(
    long_about = "parallel-analysis splits a batch of rows across worker threads, streams progress while it runs, and reassembles results in row order.\n\nJobs submitted through `submit` are admitted against a system-wide concurrency limit kept in a SQLite job store.\n\nExample usage:\n  parallel-analysis compute --input rows.json --workers 4 --output stats.json\n  parallel-analysis submit --job-type row_statistics --params '{\"input\": \"rows.json\"}' --wait"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file.
    #[arg(short, long, global = true, env = "ENGINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Job store URL or path; overrides the configuration.
    #[arg(long, global = true)]
    pub database_url: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Compute per-row mean and standard deviation of a rows file.
    Compute(ComputeArgs),

    /// Submit a job to the admission controller and print its status.
    Submit(SubmitArgs),

    /// Print the stored status of a job.
    Status(StatusArgs),

    /// List stored job records, newest first.
    Jobs(JobsArgs),
}

/// Arguments for `parallel-analysis compute`.
#[derive(Parser, Debug)]
pub struct ComputeArgs {
    /// JSON file holding an array of numeric rows.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Worker threads; overrides the configuration.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Progress notifications per second; overrides the configuration.
    #[arg(long)]
    pub notifications_per_second: Option<u32>,

    /// Write the result series here instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// POST progress events to this URL instead of logging them.
    #[arg(long)]
    pub webhook: Option<String>,

    /// Print Prometheus metrics to stderr when done.
    #[arg(long)]
    pub print_metrics: bool,
}

/// Arguments for `parallel-analysis submit`.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Registered job type.
    #[arg(short = 't', long)]
    pub job_type: String,

    /// Job parameters as JSON.
    #[arg(short, long, default_value = "{}")]
    pub params: String,

    /// Also print the job's final status once launched work finishes. The
    /// command always lets a launched job finish before it exits.
    #[arg(long)]
    pub wait: bool,
}

/// Arguments for `parallel-analysis status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Job type.
    #[arg(short = 't', long)]
    pub job_type: String,

    /// Job parameters as JSON.
    #[arg(short, long, default_value = "{}")]
    pub params: String,
}

/// Arguments for `parallel-analysis jobs`.
#[derive(Parser, Debug)]
pub struct JobsArgs {
    /// Maximum number of records to list.
    #[arg(short = 'n', long, default_value_t = DEFAULT_JOBS_LIMIT)]
    pub limit: u32,

    /// Print records as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments without running any command.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    match cli.command {
        Commands::Compute(args) => run_compute_command(config, args).await,
        Commands::Submit(args) => run_submit_command(config, args).await,
        Commands::Status(args) => run_status_command(config, args).await,
        Commands::Jobs(args) => run_jobs_command(config, args).await,
    }
}

async fn run_compute_command(mut config: EngineConfig, args: ComputeArgs) -> anyhow::Result<()> {
    if args.print_metrics {
        init_metrics()?;
    }

    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(rate) = args.notifications_per_second {
        config.notifications_per_second = rate;
    }
    config.validate()?;

    let rows: Arc<[Vec<f64>]> = load_rows(&args.input).await?.into();
    let analysis_id = Uuid::new_v4().to_string();
    let sink: Arc<dyn NotificationSink> = match args.webhook {
        Some(url) => Arc::new(WebhookSink::new(url, analysis_id.as_str())),
        None => Arc::new(TracingSink::with_label(analysis_id.as_str())),
    };

    info!(
        analysis_id = %analysis_id,
        input = %args.input.display(),
        rows = rows.len(),
        workers = config.workers,
        "Computing row statistics"
    );

    let result = ParallelExecutor::new(config.executor()?)
        .run_reported(Arc::new(RowStatistics), rows, (), sink)
        .await?;

    let rendered = serde_json::to_string_pretty(&series_to_json(&result))?;
    match args.output {
        Some(path) => {
            tokio::fs::write(&path, rendered)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(output = %path.display(), "Wrote result series");
        }
        None => println!("{}", rendered),
    }

    if args.print_metrics {
        eprint!("{}", export_metrics());
    }

    Ok(())
}

async fn run_submit_command(config: EngineConfig, args: SubmitArgs) -> anyhow::Result<()> {
    let params = parse_params(&args.params)?;
    let controller = build_controller(&config).await?;

    let status = controller.submit(&args.job_type, &params).await?;
    println!("{}", status);

    // Launched jobs run on this process's runtime; exiting would kill them.
    controller.drain().await;

    if args.wait && status == JobStatus::Running {
        let finished = controller.status(&args.job_type, &params).await?;
        println!("{}", finished);
    }

    Ok(())
}

async fn run_status_command(config: EngineConfig, args: StatusArgs) -> anyhow::Result<()> {
    let params = parse_params(&args.params)?;
    let controller = build_controller(&config).await?;

    let status = controller.status(&args.job_type, &params).await?;
    println!("{}", status);
    Ok(())
}

async fn run_jobs_command(config: EngineConfig, args: JobsArgs) -> anyhow::Result<()> {
    let store = JobStore::open(&config.database_url).await?;
    let records = store.list(args.limit).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No jobs recorded.");
        return Ok(());
    }

    println!(
        "{:>6}  {:<10}  {:<24}  {:<16}  PARAMS",
        "ID", "STATUS", "STARTED", "TYPE"
    );
    for record in records {
        println!(
            "{:>6}  {:<10}  {:<24}  {:<16}  {}",
            record.id,
            record.status,
            record.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
            record.job_type,
            record.params
        );
    }

    Ok(())
}

async fn build_controller(config: &EngineConfig) -> anyhow::Result<AdmissionController> {
    let store = JobStore::open(&config.database_url).await?;
    let registry = JobRegistry::with_builtins(config.executor()?);
    Ok(AdmissionController::new(store, registry, config.admission()?))
}

fn parse_params(raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("--params is not valid JSON: {}", raw))
}

/// `{"<series>": [values...], ...}`.
fn series_to_json(result: &ResultSeries<f64>) -> Value {
    Value::Object(
        result
            .iter()
            .map(|(name, values)| (name.to_string(), Value::from(values.to_vec())))
            .collect(),
    )
}
