//! Offline interrupted-document repair
//!
//! Run with: cargo run -p extract-queue --bin extract-queue-recover -- --config queue.toml

use clap::Parser;
use extract_queue::{recover_interrupted, QueueConfig, SqliteStore};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Repair documents left `queued` or `processing` by a crash
#[derive(Debug, Parser)]
#[command(name = "extract-queue-recover", version)]
struct Args {
    /// TOML configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database to repair, overriding the configuration
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "extract_queue=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => QueueConfig::from_file(path)?,
        None => QueueConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(database) = args.database {
        config.storage.database_path = database;
    }

    tracing::info!("Opening {}", config.storage.database_path.display());
    let store = SqliteStore::new(&config.storage.database_path)?;

    let report = recover_interrupted(&store, &store).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Scanned {} interrupted documents: {} partial, {} pending, {} errors",
        report.scanned, report.marked_partial, report.marked_pending, report.errors
    );
    for document in &report.documents {
        println!(
            "  {} -> {} ({} pages, resume from page {})",
            document.key, document.status, document.completed_pages, document.resume_page
        );
    }

    Ok(())
}
