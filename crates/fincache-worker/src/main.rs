//! fincache worker - hosts the offline caching layer as a line-oriented process.
//!
//! Platform events arrive on stdin as one JSON object per line; each outcome
//! is written to stdout as JSON. Messages broadcast to the console client
//! (such as SYNC_COMPLETE) are printed as they arrive.

mod events;
mod report;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use fincache_core::{CacheStorage, Worker, WorkerConfig};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable naming a directory for daily log files.
const LOG_DIR_ENV: &str = "FINCACHE_LOG_DIR";

const USAGE: &str = "\
Usage: fincache-worker [--status | --help]

Reads platform events from stdin, one JSON object per line:
  {\"event\": \"fetch\", \"url\": \"https://cdn.jsdelivr.net/npm/chart.js\"}
  {\"event\": \"sync\", \"tag\": \"sync-transactions\"}
  {\"event\": \"message\", \"data\": {\"type\": \"GET_CACHE_STATUS\"}}

Options:
  --status   Print the persisted cache partitions and exit
  --help     Show this message";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout stays reserved for event outcomes. The
/// returned guard must live until exit or buffered file logs are lost.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fincache-worker.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config() -> WorkerConfig {
    let mut config = WorkerConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        WorkerConfig::default()
    });
    config.apply_env();
    config
}

fn open_storage(config: &WorkerConfig) -> Result<Arc<CacheStorage>> {
    let dir = config.cache_dir().context("Could not determine cache directory")?;
    let storage = CacheStorage::persistent(dir.clone())
        .with_context(|| format!("Failed to open cache storage at {}", dir.display()))?;
    Ok(Arc::new(storage))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && (args[1] == "--help" || args[1] == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let _guard = init_tracing();
    let config = load_config();

    if args.len() > 1 && args[1] == "--status" {
        return print_status(&config).await;
    }
    if args.len() > 1 {
        anyhow::bail!("Unknown argument: {}\n\n{}", args[1], USAGE);
    }

    info!(version = %config.cache_version, origin = %config.origin, "fincache worker starting");
    run(config).await?;
    info!("fincache worker shutting down");
    Ok(())
}

async fn print_status(config: &WorkerConfig) -> Result<()> {
    let storage = open_storage(config)?;
    let partitions = storage.keys().await;
    let status = json!({
        "caches": partitions.len(),
        "partitions": partitions,
        "size": storage.entry_count().await,
        "lastUpdated": storage.last_updated().await,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn run(config: WorkerConfig) -> Result<()> {
    let storage = open_storage(&config)?;
    let root = config.origin_url().context("Invalid origin")?;
    let worker = Worker::builder(config)
        .storage(storage)
        .build()
        .context("Failed to build worker")?;
    let worker = Worker::register(worker);

    // The console stands in for the dashboard window
    let (client_id, mut broadcasts) = worker.clients().connect(root.as_str()).await;
    tokio::spawn(async move {
        while let Some(message) = broadcasts.recv().await {
            match serde_json::to_string(&json!({"broadcast": message})) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Failed to encode broadcast"),
            }
        }
    });

    let (installed, activated) = worker.start().await.context("Worker failed to start")?;
    info!(
        cached = installed.cached,
        failed = installed.failed,
        activated = activated.is_some(),
        "Worker started"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parsed = match events::parse_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Skipping malformed event line");
                println!("{}", json!({"error": format!("{:#}", e)}));
                continue;
            }
        };

        let kind = parsed.event.kind();
        let outcome = worker.dispatch_and_settle(parsed.event).await;
        println!("{}", report::describe(kind, &outcome));

        if let Some(reply) = parsed.reply {
            if let Ok(value) = reply.await {
                println!("{}", json!({"reply": value}));
            }
        }
    }

    worker.clients().disconnect(client_id).await;
    Ok(())
}
