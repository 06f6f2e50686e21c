use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use courier_sync::config;
use courier_sync::{
    ConnectivityTrigger, EventRouter, HttpTransport, NetworkStatus, QueueHandle, QueueStore,
    SyncEvent, SyncProcessor,
};

const WATCH_CHECK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Replay a JSON-lines event log into the sync queue and drain it against the backend"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// JSON-lines file with one event per line
    #[arg(long)]
    events: PathBuf,

    /// Stop after this many passes even if items are still waiting on backoff
    #[arg(long, default_value = "20")]
    max_passes: usize,

    /// Drain through the connectivity trigger (settle delay + poll interval)
    /// instead of back-to-back passes
    #[arg(long)]
    watch: bool,

    /// Write the final queue snapshot here
    #[arg(long)]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let queue = QueueHandle::new(QueueStore::with_backoff(cfg.app.backoff()));
    let mut router = EventRouter::new(cfg.retries.clone());

    let content = tokio::fs::read_to_string(&args.events)
        .await
        .with_context(|| format!("failed to read {}", args.events.display()))?;
    let mut queued = 0;
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: SyncEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                warn!(?err, line = lineno + 1, "skipping malformed event");
                continue;
            }
        };
        queued += router.submit(&queue, event).await?;
    }
    queued += router.submit_flush(&queue).await?;
    info!(queued, "events loaded");

    let network = NetworkStatus::new(!args.watch);
    let transport = Arc::new(HttpTransport::from_config(&cfg)?);
    let processor = Arc::new(
        SyncProcessor::new(queue.clone(), transport, network.subscribe())
            .with_batch_size(cfg.app.batch_size),
    );

    if args.watch {
        let trigger = ConnectivityTrigger::new(processor.clone(), network.subscribe())
            .with_settle_delay(cfg.app.settle_delay())
            .with_poll_interval(cfg.app.poll_interval())
            .spawn();
        network.set_online(true);
        while queue.outstanding_count().await > 0 {
            tokio::time::sleep(WATCH_CHECK_INTERVAL).await;
        }
        drop(network);
        trigger.await.context("connectivity trigger panicked")?;
    } else {
        drain(&queue, &processor, &cfg, args.max_passes).await;
    }

    let stats = queue.statistics().await;
    info!(
        synced = stats.total_synced,
        failed = stats.total_failed,
        requires_support = stats.total_requires_support,
        pending = stats.total_pending,
        "replay finished"
    );
    for item in queue.requires_support().await {
        warn!(
            id = item.id(),
            error = item.last_error().unwrap_or("unknown"),
            "item requires support"
        );
    }

    if let Some(path) = args.export {
        let snapshot = queue.export_json().await?;
        tokio::fs::write(&path, snapshot)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "queue snapshot exported");
    }

    Ok(())
}

async fn drain(
    queue: &QueueHandle,
    processor: &SyncProcessor,
    cfg: &config::Config,
    max_passes: usize,
) {
    for pass in 1..=max_passes {
        let report = match processor.process_pass().await {
            Ok(report) => report,
            Err(err) => {
                error!(?err, pass, "sync pass aborted");
                break;
            }
        };
        let stats = queue.statistics().await;
        info!(
            pass,
            success = report.success_count,
            failed = report.failed_count,
            pending = stats.total_pending,
            "pass complete"
        );

        if queue.outstanding_count().await == 0 {
            break;
        }
        if report.success_count + report.failed_count == 0 {
            // everything left is backing off
            tokio::time::sleep(cfg.app.poll_interval()).await;
        }
    }
}
