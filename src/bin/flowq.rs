//! flowq CLI — operator interface to the queue engine.
//!
//! `serve` runs a worker over a TOML profile, handling jobs by executing
//! the configured hook commands; job requests are ingested as JSON lines on
//! stdin. `demo` runs a self-contained lifecycle/flow smoke.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

use flowq::config::{Config, Profile};
use flowq::telemetry::init_telemetry;
use flowq::{
    Backoff, FlowJob, FlowProducer, Handler, Job, JobContext, JobState, NewJob, Outcome, Queue,
    Store, Worker, async_trait,
};

#[derive(Parser)]
#[command(name = "flowq", about = "Distributed job-queue engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker from a TOML profile; enqueue JSON lines from stdin
    Serve {
        /// Profile file with [queue], [worker], and [[handler]] sections
        #[arg(long, default_value = "flowq.toml")]
        config: PathBuf,
    },
    /// Run a self-contained retry and flow demonstration
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => cmd_serve(config).await,
        Command::Demo => cmd_demo().await,
    }
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn cmd_serve(profile_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _guard = init_telemetry("flowq", config.otel_endpoint.as_deref())?;

    let profile = Profile::load(&profile_path)?;
    let store = Arc::new(Store::new());
    let queue = Queue::new(Arc::clone(&store), profile.queue.name.clone());

    let handler = CommandHandler {
        commands: profile
            .handlers
            .iter()
            .map(|h| (h.name.clone(), h.command.clone()))
            .collect(),
    };

    let worker = Worker::new(queue.clone(), handler, profile.worker.to_options());

    let w = worker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        w.shutdown();
    });

    // Producers speak JSON lines on stdin.
    let ingest_queue = queue.clone();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JobRequest>(&line) {
                Ok(request) => match ingest_queue.add(request.into_new_job()) {
                    Ok(job) => info!(id = %job.id, name = %job.name, "enqueued"),
                    Err(e) => warn!("enqueue rejected: {e}"),
                },
                Err(e) => warn!("bad job request line: {e}"),
            }
        }
    });

    worker.run().await?;
    Ok(())
}

/// A job request as accepted on stdin.
#[derive(Debug, Deserialize)]
struct JobRequest {
    name: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    delay_ms: Option<u64>,
    #[serde(default)]
    attempts: Option<u32>,
    #[serde(default)]
    backoff_ms: Option<i64>,
}

impl JobRequest {
    fn into_new_job(self) -> NewJob {
        let mut new = NewJob::new(self.name).data(self.data).priority(self.priority);
        if let Some(delay) = self.delay_ms {
            new = new.delay(Duration::from_millis(delay));
        }
        if let Some(attempts) = self.attempts {
            new = new.attempts(attempts);
        }
        if let Some(backoff) = self.backoff_ms {
            new = new.backoff(Backoff::fixed(backoff));
        }
        new
    }
}

/// Executes one hook command per job name, with job context in the
/// environment. Non-zero exit drives the failed/retry path.
struct CommandHandler {
    commands: HashMap<String, PathBuf>,
}

#[async_trait]
impl Handler for CommandHandler {
    async fn process(&self, job: Job, _ctx: JobContext) -> flowq::Result<Outcome> {
        let Some(command) = self.commands.get(&job.name) else {
            return Err(flowq::Error::Handler(format!(
                "no handler command for job name '{}'",
                job.name
            )));
        };

        // Resolve relative commands against the process CWD, not whatever
        // directory the hook may chdir into.
        let command = if command.is_relative() {
            std::env::current_dir()?.join(command)
        } else {
            command.clone()
        };

        let status = tokio::process::Command::new(&command)
            .env("FLOWQ_QUEUE", &job.queue)
            .env("FLOWQ_JOB_ID", &job.id)
            .env("FLOWQ_JOB_NAME", &job.name)
            .env("FLOWQ_PAYLOAD", job.data.to_string())
            .env("FLOWQ_ATTEMPT", (job.attempts + 1).to_string())
            .status()
            .await?;

        if status.success() {
            Ok(Outcome::Complete(None))
        } else {
            Err(flowq::Error::Handler(format!(
                "{} exited with status {}",
                command.display(),
                status.code().unwrap_or(-1)
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// demo
// ---------------------------------------------------------------------------

struct DemoHandler;

#[async_trait]
impl Handler for DemoHandler {
    async fn process(&self, job: Job, _ctx: JobContext) -> flowq::Result<Outcome> {
        match job.name.as_str() {
            // Fails until the final attempt to show the backoff path.
            "flaky" if job.attempts + 1 < job.max_attempts => {
                Err(flowq::Error::Handler("simulated transient failure".into()))
            }
            _ => {
                info!(id = %job.id, name = %job.name, attempt = job.attempts + 1, "demo job ran");
                Ok(Outcome::Complete(Some(serde_json::json!({ "ok": true }))))
            }
        }
    }
}

async fn cmd_demo() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _guard = init_telemetry("flowq-demo", config.otel_endpoint.as_deref())?;

    let store = Arc::new(Store::new());
    let queue = Queue::new(Arc::clone(&store), "demo");
    let flow = FlowProducer::new(Arc::clone(&store));

    queue.add(NewJob::new("greet").data(serde_json::json!({"to": "world"})))?;
    queue.add(
        NewJob::new("flaky")
            .attempts(3)
            .backoff(Backoff::fixed(200)),
    )?;
    let tree = flow.add_with_children(
        "demo",
        NewJob::new("publish-report"),
        vec![
            FlowJob::new("demo", NewJob::new("render-section")),
            FlowJob::new("demo", NewJob::new("render-section")),
        ],
    )?;
    info!(parent = %tree.id, children = tree.children.len(), "demo flow added");

    let worker = Worker::new(
        queue.clone(),
        DemoHandler,
        flowq::WorkerOptions {
            poll_interval: Duration::from_millis(100),
            ..Default::default()
        },
    );
    let w = worker.clone();
    let run = tokio::spawn(async move { w.run().await });

    // Wait until everything settled, then report.
    loop {
        let counts = queue.counts();
        if counts.completed + counts.failed == counts.total() && counts.total() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let counts = queue.counts();
    println!(
        "demo settled: {} completed, {} failed",
        counts.completed, counts.failed
    );
    for job in queue.jobs_in(JobState::Completed, 20)? {
        println!(
            "  {} {:<16} attempts={} value={}",
            job.id,
            job.name,
            job.attempts,
            job.return_value.unwrap_or(serde_json::Value::Null)
        );
    }

    worker.shutdown();
    run.await.ok();
    Ok(())
}
