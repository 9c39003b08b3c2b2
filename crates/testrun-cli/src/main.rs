//! TestRun CLI - run framework tests through an in-process orchestrator.

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use testrun_core::{Framework, OutcomeStatus, RunRecord, RunStatus, TestRunRequest};
use testrun_orchestrator::{BatchOptions, BatchResult, Orchestrator, OrchestratorConfig, RunStats};

/// TestRun CLI - test execution orchestrator
#[derive(Parser)]
#[command(name = "testrun")]
#[command(about = "Run Robot Framework, Playwright and pytest tests", long_about = None)]
struct Cli {
    /// Orchestrator config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print run statistics when done
    #[arg(long, global = true)]
    stats: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single test and wait for its outcome
    Run {
        /// Framework: robot, playwright or pytest
        #[arg(short, long)]
        framework: Framework,

        /// Test identifier
        #[arg(short, long)]
        test: String,

        /// Tag filter (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Test file or directory
        #[arg(short, long)]
        path: Option<String>,

        /// Deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Run a batch of requests from a JSON file
    Batch {
        /// JSON array of run requests
        file: PathBuf,

        /// Run items one at a time
        #[arg(long)]
        sequential: bool,

        /// Parallel limit for this batch
        #[arg(long, conflicts_with = "sequential")]
        max_concurrent: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = match &cli.config {
        Some(path) => OrchestratorConfig::load(path)?,
        None => OrchestratorConfig::default(),
    };
    let orchestrator = Orchestrator::new(config);

    let result = match cli.command {
        Commands::Run {
            framework,
            test,
            tags,
            path,
            timeout,
        } => {
            let mut request = TestRunRequest::new(framework, test);
            request.tags = tags;
            request.test_path = path;
            request.timeout_secs = timeout;
            run_test(&orchestrator, request, cli.json).await
        }
        Commands::Batch {
            file,
            sequential,
            max_concurrent,
        } => {
            let mut options = if sequential {
                BatchOptions::sequential()
            } else {
                BatchOptions::default()
            };
            options.max_concurrent = max_concurrent;
            run_batch(&orchestrator, &file, options, cli.json).await
        }
    };

    if cli.stats {
        print_stats(&orchestrator.stats().await);
    }
    orchestrator.shutdown().await;

    if !result? {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Run one test. Returns whether it passed.
async fn run_test(
    orchestrator: &Orchestrator,
    request: TestRunRequest,
    json: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    let id = orchestrator.submit(request).await?;

    let record = tokio::select! {
        record = orchestrator.wait(id) => record?,
        _ = tokio::signal::ctrl_c() => {
            warn!(run_id = %id, "Interrupted, cancelling run");
            orchestrator.cancel(id).await?;
            orchestrator.wait(id).await?
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("Run finished:");
        print_record(&record);
    }

    Ok(record.status == RunStatus::Passed)
}

/// Run a batch file. Returns whether every item passed.
async fn run_batch(
    orchestrator: &Orchestrator,
    file: &Path,
    options: BatchOptions,
    json: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(file)?;
    let requests: Vec<TestRunRequest> = serde_json::from_str(&raw)?;
    info!(file = %file.display(), items = requests.len(), "Loaded batch");

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let Some(result) = batch_until(orchestrator, requests, options, interrupt).await else {
        return Ok(false);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_batch(&result);
    }

    let all_passed = result
        .outcomes()
        .all(|outcome| outcome.status == OutcomeStatus::Passed);
    Ok(all_passed)
}

/// Run a batch unless `interrupt` completes first. On interrupt every
/// in-flight run is cancelled and its process group reaped before returning.
async fn batch_until<F>(
    orchestrator: &Orchestrator,
    requests: Vec<TestRunRequest>,
    options: BatchOptions,
    interrupt: F,
) -> Option<BatchResult>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        result = orchestrator.submit_batch(requests, options) => Some(result),
        _ = interrupt => {
            warn!("Interrupted, cancelling batch");
            orchestrator.shutdown().await;
            None
        }
    }
}

fn print_record(record: &RunRecord) {
    println!("  ID:         {}", record.id);
    println!("  Framework:  {}", record.request.framework);
    println!("  Test:       {}", record.request.test_identifier);
    println!("  Status:     {}", record.status);
    println!("  Created:    {}", format_timestamp(&record.created_at));

    if let Some(code) = record.exit_code {
        println!("  Exit code:  {}", code);
    }
    if let Some(error) = &record.error {
        println!("  Error:      {}", error);
    }

    if let Some(outcome) = &record.outcome {
        println!("  Duration:   {:.2}s", outcome.duration);
        println!("  Message:    {}", outcome.message);
        if let Some(report) = &outcome.report_url {
            println!("  Report:     {}", report);
        }
        if !outcome.screenshots.is_empty() {
            println!("  Screenshots:");
            for shot in &outcome.screenshots {
                println!("    - {}", shot);
            }
        }
    }

    if record.output.is_truncated() {
        println!("  (captured output was truncated)");
    }
}

fn print_batch(result: &BatchResult) {
    println!("Batch ({}/{} completed):", result.completed, result.total);
    println!("{:<5}  {:<8}  {:<8}  {:>9}  {}", "#", "RUN", "STATUS", "DURATION", "MESSAGE");
    println!("{}", "-".repeat(80));

    for item in &result.results {
        let run = item
            .run_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let outcome = &item.outcome;
        println!(
            "{:<5}  {:<8}  {:<8}  {:>8.2}s  {}",
            item.index, run, outcome.status, outcome.duration, outcome.message
        );
    }
}

fn print_stats(stats: &RunStats) {
    println!();
    println!("Statistics:");
    println!("  Total:        {}", stats.total);
    println!("  Passed:       {}", stats.passed);
    println!("  Failed:       {}", stats.failed);
    println!("  Timeout:      {}", stats.timeout);
    println!("  Error:        {}", stats.error);
    println!("  Success rate: {:.1}%", stats.success_rate);
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}
