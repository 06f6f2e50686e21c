use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use courier_sync::policy::BackoffPolicy;
use courier_sync::QueueStore;

#[derive(Parser, Debug)]
#[command(about = "Print statistics for an exported queue snapshot")]
struct Args {
    /// Snapshot written by `courier-sync --export`
    #[arg(long)]
    snapshot: PathBuf,

    /// Also list every item that needs manual support
    #[arg(long)]
    support: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let raw = fs::read_to_string(&args.snapshot)?;
    let store = QueueStore::from_json(&raw, BackoffPolicy::default())?;
    let stats = store.statistics();

    println!("Items: {}", store.len());
    println!(
        "Pending: {}  Synced: {}  Failed: {} ({} need support)",
        stats.total_pending, stats.total_synced, stats.total_failed, stats.total_requires_support
    );
    if let Some(oldest) = stats.oldest_pending {
        println!("Oldest pending: {}", oldest.to_rfc3339());
    }
    println!("By entity type:");
    for (entity_type, counts) in &stats.by_entity_type {
        println!(
            "  {:<8} pending={} synced={} failed={}",
            entity_type.as_str(),
            counts.pending,
            counts.synced,
            counts.failed
        );
    }

    if args.support {
        println!("Requires support:");
        for item in store.requires_support() {
            println!(
                "  {} retries={} error={}",
                item.id(),
                item.retry_count(),
                item.last_error().unwrap_or("-")
            );
        }
    }
    Ok(())
}
