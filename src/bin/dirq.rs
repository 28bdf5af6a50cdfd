//! dirq CLI: operator interface to a directory queue.
//!
//! The queue location and retention policy come from the environment
//! (`DIRQ_BASE_DIR`, `DIRQ_RETENTION`); see `dirq::config`.

use std::io::Read as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dirq::config::Config;
use dirq::config::hook::HookConfig;
use dirq::hook::HookHandler;
use dirq::telemetry::{TelemetryConfig, init_telemetry};
use dirq::{Error, JobId, Queue, ReceiveReport, State};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dirq", about = "Filesystem-backed job queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the queue directories (idempotent)
    Init,
    /// Submit a job
    Submit {
        #[command(subcommand)]
        what: SubmitAction,
    },
    /// Show which state a job is in
    Status {
        /// Job ID
        id: String,
    },
    /// Count jobs per state
    Counts {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List job IDs in one state
    List {
        /// queued, processing, success, failed or interrupted
        state: String,
    },
    /// Reclaim jobs whose consumer process died
    Recover,
    /// Process queued jobs with a hook command
    Receive {
        /// Hook TOML config
        #[arg(long)]
        hook: PathBuf,
        /// Process at most one job
        #[arg(long)]
        once: bool,
        /// Keep directory listing order instead of shuffling
        #[arg(long)]
        ordered: bool,
        /// Maximum candidates to attempt (0 = all)
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
    /// Keep receiving until interrupted
    Watch {
        /// Hook TOML config
        #[arg(long)]
        hook: PathBuf,
        /// Pause between cycles that found no work
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
    },
}

#[derive(Subcommand)]
enum SubmitAction {
    /// Submit a data payload
    Data {
        /// Payload text
        text: Option<String>,
        /// Read the payload from stdin instead
        #[arg(long, conflicts_with = "text")]
        stdin: bool,
    },
    /// Submit a file
    File {
        /// File to queue
        path: PathBuf,
        /// Move the file into the queue instead of copying it
        #[arg(long = "move")]
        move_file: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "dirq".to_string(),
        log_level: config.log_level.clone(),
        queue_base: Some(config.base_dir.clone()),
        retention: Some(config.retention),
    })?;

    let queue = Queue::open(&config.base_dir, config.retention)?;

    match cli.command {
        Command::Init => {
            println!("Queue ready at {}", queue.base().display());
            Ok(())
        }
        Command::Submit { what } => cmd_submit(&queue, what),
        Command::Status { id } => cmd_status(&queue, &id),
        Command::Counts { json } => cmd_counts(&queue, json),
        Command::List { state } => cmd_list(&queue, &state),
        Command::Recover => {
            let n = queue.recover()?;
            println!("Recovered {n} job(s)");
            Ok(())
        }
        Command::Receive {
            hook,
            once,
            ordered,
            limit,
        } => {
            let handler = HookHandler::new(HookConfig::load(&hook)?)?;
            let report = if once {
                queue.receive_one(&handler, !ordered)?
            } else {
                queue.receive_limit(&handler, !ordered, limit)?
            };
            print_report(&report)
        }
        Command::Watch { hook, poll_ms } => {
            let handler = HookHandler::new(HookConfig::load(&hook)?)?;
            cmd_watch(queue, handler, Duration::from_millis(poll_ms)).await
        }
    }
}

fn cmd_submit(queue: &Queue, what: SubmitAction) -> anyhow::Result<()> {
    let id = match what {
        SubmitAction::Data { text, stdin } => {
            let payload = if stdin {
                let mut buf = Vec::new();
                std::io::stdin().read_to_end(&mut buf)?;
                buf
            } else {
                text.ok_or_else(|| anyhow::anyhow!("give a payload or --stdin"))?
                    .into_bytes()
            };
            queue.submit_data(payload)?
        }
        SubmitAction::File { path, move_file } => queue.submit_file(&path, !move_file)?,
    };
    println!("{id}");
    Ok(())
}

fn cmd_status(queue: &Queue, id: &str) -> anyhow::Result<()> {
    let id: JobId = id.parse()?;

    let state = if queue.is_queued(id)? {
        Some(State::Queued)
    } else if queue.is_processing(id)? {
        Some(State::Processing)
    } else {
        let mut found = None;
        for state in [State::Success, State::Failed, State::Interrupted] {
            let present = match state {
                State::Success => queue.is_success(id),
                State::Failed => queue.is_failed(id),
                _ => queue.is_interrupted(id),
            };
            match present {
                Ok(true) => {
                    found = Some(state);
                    break;
                }
                Ok(false) | Err(Error::PolicyUnsupported(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        found
    };

    println!("ID:       {id}");
    if let Some(created) = id.created_at() {
        println!("Created:  {}", created.format("%Y-%m-%d %H:%M:%S%.3f"));
    }
    match state {
        Some(state) => println!("State:    {state}"),
        None => println!("State:    unknown (discarded or never queued)"),
    }
    Ok(())
}

fn cmd_counts(queue: &Queue, json: bool) -> anyhow::Result<()> {
    let counts = queue.counts()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&counts)?);
        return Ok(());
    }
    println!("{:<12}  {:>8}", "STATE", "JOBS");
    println!("{}", "-".repeat(22));
    for (state, n) in [
        (State::Queued, counts.queued),
        (State::Processing, counts.processing),
        (State::Success, counts.success),
        (State::Failed, counts.failed),
        (State::Interrupted, counts.interrupted),
    ] {
        println!("{:<12}  {:>8}", state.to_string(), n);
    }
    println!("\nretention: {}", queue.retention());
    Ok(())
}

fn cmd_list(queue: &Queue, state: &str) -> anyhow::Result<()> {
    let state: State = state.parse()?;
    let ids = queue.list(state)?;
    if ids.is_empty() {
        println!("No {state} jobs.");
        return Ok(());
    }
    for id in &ids {
        match id.created_at() {
            Some(at) => println!("{id}  {}", at.format("%Y-%m-%d %H:%M")),
            None => println!("{id}"),
        }
    }
    println!("\n{} job(s)", ids.len());
    Ok(())
}

fn print_report(report: &ReceiveReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(report)?);
    Ok(())
}

async fn cmd_watch(queue: Queue, handler: HookHandler, poll: Duration) -> anyhow::Result<()> {
    let queue = Arc::new(queue);
    let handler = Arc::new(handler);
    info!(base = %queue.base().display(), "watching queue");

    loop {
        let q = Arc::clone(&queue);
        let h = Arc::clone(&handler);
        // Handlers block; keep them off the async workers.
        let mut cycle = tokio::task::spawn_blocking(move || q.receive(h.as_ref(), true));

        let report = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, finishing current cycle");
                let _ = cycle.await;
                return Ok(());
            }
            joined = &mut cycle => joined?,
        };

        let idle = match report {
            Ok(report) => {
                if report.claimed > 0 || report.recovered > 0 {
                    info!(
                        claimed = report.claimed,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        retried = report.retried,
                        recovered = report.recovered,
                        "receive cycle"
                    );
                }
                report.claimed == 0
            }
            Err(e) => {
                error!("receive cycle failed: {e}");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted");
                    return Ok(());
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}
