//! Runs the document pipeline in-process over a batch of arrivals.
//!
//! Every stage gets a pass-through actor, so the run exercises launch,
//! completion, promotion, and the scheduler loop end to end.
//!
//! # Usage
//!
//! ```bash
//! # Ingest two arrivals and run until no work remains
//! docflow acquire/0/invoice-1.pdf acquire/1/invoice-2.pdf --standby-seconds 1
//!
//! # Replay a storage event notification with JSON logs
//! docflow --records event.json --json-logs
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use docflow::ingest::{ArrivalNotice, Ingestor};
use docflow::observability::{init_tracing, LogFormat};
use docflow::prelude::*;
use docflow::utils::now_utc;
use std::path::PathBuf;
use tracing::{info, warn};

/// Run the document pipeline over a batch of arrivals
#[derive(Parser, Debug)]
#[command(name = "docflow")]
#[command(version, about, long_about = None)]
struct Args {
    /// Object paths of arriving documents, e.g. `acquire/1/d001.pdf`
    paths: Vec<String>,

    /// Container the paths live in
    #[arg(long, default_value = "local")]
    container: String,

    /// Storage event notification file to ingest as well
    #[arg(long)]
    records: Option<PathBuf>,

    /// JSON configuration file (defaults to DOCFLOW_* environment variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the delay between scheduler iterations
    #[arg(long)]
    standby_seconds: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PipelineConfig::from_env().context("loading config from environment")?,
    };
    if let Some(seconds) = args.standby_seconds {
        config = config.with_standby_seconds(seconds);
    }
    config.validate()?;
    Ok(config)
}

fn load_notices(args: &Args) -> Result<Vec<ArrivalNotice>> {
    let arrived = now_utc();
    let mut notices: Vec<_> = args
        .paths
        .iter()
        .map(|path| ArrivalNotice::new(args.container.clone(), path.clone(), arrived))
        .collect();

    if let Some(path) = &args.records {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("reading records from {}", path.display()))?;
        notices.extend(ArrivalNotice::from_records(&body)?);
    }
    Ok(notices)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let format = if args.json_logs { LogFormat::Json } else { LogFormat::Pretty };
    init_tracing(format)?;

    let config = load_config(&args)?;
    let notices = load_notices(&args)?;
    if notices.is_empty() {
        warn!("No arrivals given; the run will break up immediately");
    }

    let store = Arc::new(InMemoryDocumentStore::new());
    let events: Arc<dyn EventSink> = Arc::new(LoggingEventSink::debug());
    let clock = SystemClock::shared();
    let channels = ChannelRegistry::in_memory(&config);
    let ctx = PhaseContext::new(store.clone(), clock.clone(), events.clone());
    let invoker = LocalInvoker::pass_through(&config, channels.clone(), clock);

    let scheduler = PipelineScheduler::new(&config, ctx, &channels, Arc::new(invoker))?;
    let shutdown = scheduler.shutdown_token().clone();
    let trigger = Arc::new(PipelineTrigger::new(Arc::new(scheduler)));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.shutdown("interrupted");
        }
    });

    let report = Ingestor::new(store.clone(), events)
        .with_trigger(trigger.clone())
        .ingest(&notices)
        .await?;
    info!(documents = report.documents.len(), fired = ?report.fired, "Ingested arrivals");

    if let Some(run) = trigger.join().await {
        let run = run?;
        info!(
            iterations = run.iterations,
            restarts = run.restarts,
            promoted = run.promoted,
            final_step = %run.final_step,
            "Run finished"
        );
    }

    println!("{}", serde_json::to_string_pretty(&store.snapshot())?);
    Ok(())
}
