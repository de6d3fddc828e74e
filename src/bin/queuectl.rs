//! queuectl CLI: operator interface to the job queue.

use chrono::Duration as ChronoDuration;
use clap::{Parser, Subcommand};
use queuectl::config::Config;
use queuectl::db::Db;
use queuectl::engine::exec;
use queuectl::engine::{Supervisor, WorkerConfig};
use queuectl::model::job::parse_timestamp;
use queuectl::model::{JobId, NewJob, State};
use queuectl::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;
use std::sync::Arc;

/// A worker counts as active if it sent a heartbeat this recently.
const WORKER_FRESHNESS_SECS: i64 = 15;

#[derive(Parser)]
#[command(name = "queuectl", about = "Persistent background job queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a new job
    Enqueue {
        /// Job as JSON, e.g. '{"command": "echo hi", "priority": 1}'
        job_json: Option<String>,
        /// Command to execute (alternative to JSON input)
        #[arg(long, short)]
        command: Option<String>,
        /// Path to a JSON file containing the job
        #[arg(long, short)]
        file: Option<PathBuf>,
        /// Job id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        /// Priority (lower = sooner)
        #[arg(long)]
        priority: Option<i64>,
        /// Earliest start time, ISO-8601 (no offset = UTC)
        #[arg(long)]
        run_at: Option<String>,
        /// Executions allowed before dead-lettering
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// List jobs
    List {
        /// Filter by state (pending, processing, completed, dead)
        #[arg(long)]
        state: Option<String>,
    },
    /// Show one job
    Show { id: String },
    /// Job counts, active workers and DLQ size
    Status,
    /// Worker operations
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },
    /// Dead letter queue operations
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },
    /// Runtime configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Completion metrics summary
    Metrics,
    /// Print a job's output log
    Logs { id: String },
}

#[derive(Subcommand)]
enum WorkerAction {
    /// Run workers in the foreground until Ctrl+C or `worker stop`
    Start {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Ask running workers (in any process) to drain and stop
    Stop,
}

#[derive(Subcommand)]
enum DlqAction {
    /// List dead-lettered jobs, newest first
    List,
    /// Re-queue a dead-lettered job with attempts reset
    Retry { id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    let db = Db::open(&config.database_path).await?;

    match cli.command {
        Command::Enqueue {
            job_json,
            command,
            file,
            id,
            priority,
            run_at,
            max_retries,
        } => {
            let new = build_job(job_json, command, file, id, priority, run_at, max_retries)?;
            let job = db.submit(new).await?;
            println!("Enqueued: {} (priority {})", job.id, job.priority);
        }
        Command::List { state } => cmd_list(&db, state).await?,
        Command::Show { id } => cmd_show(&db, id).await?,
        Command::Status => cmd_status(&db).await?,
        Command::Worker { action } => match action {
            WorkerAction::Start { count } => cmd_worker_start(db, &config, count).await?,
            WorkerAction::Stop => {
                db.request_stop().await?;
                println!("Stop requested; workers will exit after their current job.");
            }
        },
        Command::Dlq { action } => match action {
            DlqAction::List => cmd_dlq_list(&db).await?,
            DlqAction::Retry { id } => match db.retry_dead_letter(&JobId(id.clone())).await? {
                Some(job) => println!("Requeued: {}", job.id),
                None => println!("Nothing to retry: {id} is not in the DLQ."),
            },
        },
        Command::Config { action } => match action {
            ConfigAction::Get { key } => match db.get_setting(&key).await? {
                Some(value) => println!("{key} = {value}"),
                None => println!("{key} is not set"),
            },
            ConfigAction::Set { key, value } => {
                db.set_setting(&key, &value).await?;
                println!("{key} = {value}");
            }
            ConfigAction::List => {
                for (key, value) in db.list_settings().await? {
                    println!("{key} = {value}");
                }
            }
        },
        Command::Metrics => cmd_metrics(&db).await?,
        Command::Logs { id } => match exec::read_log(&config.log_dir, &JobId(id.clone())).await? {
            Some(log) => print!("{log}"),
            None => println!("No log for job {id}."),
        },
    }

    Ok(())
}

fn build_job(
    job_json: Option<String>,
    command: Option<String>,
    file: Option<PathBuf>,
    id: Option<String>,
    priority: Option<i64>,
    run_at: Option<String>,
    max_retries: Option<u32>,
) -> anyhow::Result<NewJob> {
    let mut new = if let Some(command) = command {
        NewJob::new(command)
    } else if let Some(path) = file {
        NewJob::from_json(&std::fs::read_to_string(&path)?)?
    } else if let Some(json) = job_json {
        NewJob::from_json(&json)?
    } else {
        anyhow::bail!("provide a job as JSON, --command, or --file");
    };

    if let Some(id) = id {
        new = new.id(id);
    }
    if let Some(priority) = priority {
        new = new.priority(priority);
    }
    if let Some(run_at) = run_at {
        new = new.run_at(parse_timestamp(&run_at)?);
    }
    if let Some(max) = max_retries {
        new = new.max_retries(max);
    }
    new.validate()?;
    Ok(new)
}

async fn cmd_list(db: &Db, state: Option<String>) -> anyhow::Result<()> {
    let state_filter: Option<State> = state.map(|s| s.parse()).transpose()?;
    let jobs = db.list_jobs(state_filter).await?;

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:<3}  {:<8}  {:<20}  COMMAND",
        "ID", "STATE", "PRI", "ATTEMPTS", "RUN AT"
    );
    println!("{}", "-".repeat(100));
    for job in &jobs {
        println!(
            "{:<36}  {:<10}  {:<3}  {:<8}  {:<20}  {}",
            job.id,
            job.state,
            job.priority,
            format!("{}/{}", job.attempts, job.max_retries),
            job.run_at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            job.command
        );
    }
    println!("\n{} job(s)", jobs.len());
    Ok(())
}

async fn cmd_show(db: &Db, id: String) -> anyhow::Result<()> {
    let job = db.get_job(&JobId(id)).await?;

    println!("ID:          {}", job.id);
    println!("Command:     {}", job.command);
    println!("State:       {}", job.state);
    println!("Priority:    {}", job.priority);
    println!("Attempts:    {}/{}", job.attempts, job.max_retries);
    println!(
        "Run At:      {}",
        job.run_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Created:     {}", job.created_at);
    println!("Updated:     {}", job.updated_at);

    for metric in db.metrics_for_job(&job.id).await? {
        println!(
            "Finished:    {} {} in {:.2}s",
            metric.finished_at, metric.status, metric.duration
        );
    }
    if let Some(dead) = db.get_dead_letter(&job.id).await? {
        println!("Dead Since:  {}", dead.failed_at);
    }
    Ok(())
}

async fn cmd_status(db: &Db) -> anyhow::Result<()> {
    let counts = db.counts_by_state().await?;
    let freshness = ChronoDuration::seconds(WORKER_FRESHNESS_SECS);
    let active = db.active_worker_count(freshness).await?;

    println!("Jobs:");
    for (state, count) in &counts {
        println!("  {:<12} {count}", state.to_string());
    }
    println!("Active workers: {active}");
    println!("DLQ size:       {}", db.dlq_count().await?);

    let workers = db.list_workers().await?;
    if !workers.is_empty() {
        let now = chrono::Utc::now();
        println!("Heartbeats:");
        for w in workers {
            let marker = if w.is_fresh(now, freshness) { "" } else { "  (stale)" };
            println!(
                "  {:<32} pid {:<7} {} last seen {}{marker}",
                w.worker_id,
                w.pid,
                w.hostname,
                w.last_seen.format("%H:%M:%S")
            );
        }
    }
    Ok(())
}

async fn cmd_worker_start(db: Db, config: &Config, count: usize) -> anyhow::Result<()> {
    let worker_config = WorkerConfig {
        log_dir: Some(config.log_dir.clone()),
        ..WorkerConfig::default()
    };
    let supervisor = Supervisor::start(Arc::new(db), count, worker_config).await?;
    println!("Started {count} worker(s). Press Ctrl+C to stop.");

    let token = supervisor.shutdown_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        token.cancel();
    });

    let stats = supervisor.wait().await?;
    println!(
        "All workers stopped: {} completed, {} retried, {} dead-lettered.",
        stats.completed, stats.retried, stats.dead_lettered
    );
    Ok(())
}

async fn cmd_dlq_list(db: &Db) -> anyhow::Result<()> {
    let records = db.list_dead_letters().await?;
    if records.is_empty() {
        println!("DLQ is empty.");
        return Ok(());
    }
    for r in &records {
        println!(
            "[DEAD] {} - {} (attempts: {}/{}, failed at {})",
            r.id,
            r.command,
            r.attempts,
            r.max_retries,
            r.failed_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn cmd_metrics(db: &Db) -> anyhow::Result<()> {
    let summary = db.metrics_summary().await?;
    if summary.is_empty() {
        println!("No metrics recorded yet.");
        return Ok(());
    }
    for (status, s) in &summary {
        let avg = s
            .avg_time_sec
            .map(|a| format!("{a:.2}s"))
            .unwrap_or_else(|| "-".to_string());
        println!("{:<10} jobs: {:<6} avg: {avg}", status.to_string(), s.jobs);
    }

    let series = db.metrics_timeseries(ChronoDuration::minutes(60)).await?;
    if !series.labels.is_empty() {
        println!("\nLast hour (per minute):");
        for (i, minute) in series.labels.iter().enumerate() {
            println!(
                "  {minute}  completed {:<4} failed {}",
                series.completed[i], series.failed[i]
            );
        }
    }
    Ok(())
}
