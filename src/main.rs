use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::signal;
use tokio_stream::wrappers::LinesStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::pipeline::{RateLimitingProcessor, RecordProcessor};
use turnstile::ratelimit::EventKey;
use turnstile::store::InMemoryCounterStore;

/// Replay JSON-lines events through a fixed-window rate limiter.
///
/// Each input line is `{"key": "...", "timestamp_ms": 123, "value": ...}`.
/// Admitted lines are written to stdout unchanged; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Events file; stdin is read when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Deserialize)]
struct InputEvent {
    key: String,
    #[serde(default)]
    timestamp_ms: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Turnstile replay");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TurnstileConfig::load(args.config.as_deref())?;
    let settings = config.limiter.validate()?;
    info!(
        window_size_ms = settings.window_size_ms(),
        max_per_window = settings.max_per_window(),
        failure_policy = ?settings.failure_policy(),
        "Configuration loaded"
    );

    let store = Arc::new(InMemoryCounterStore::new());
    let processor = RateLimitingProcessor::start(settings, store);

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut lines = LinesStream::new(reader.lines());
    let mut out = BufWriter::new(tokio::io::stdout());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut line_number: u64 = 0;
    loop {
        let line = tokio::select! {
            line = lines.next() => line,
            _ = &mut shutdown => break,
        };
        let Some(line) = line else {
            break;
        };
        let line = line?;
        line_number += 1;

        if line.trim().is_empty() {
            continue;
        }

        let event: InputEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_number, error = %e, "Skipping malformed event");
                continue;
            }
        };

        let timestamp_ms = event
            .timestamp_ms
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let key = EventKey::from(event.key);

        if let Some(admitted) = processor.process(&key, line, timestamp_ms).await {
            out.write_all(admitted.as_bytes()).await?;
            out.write_all(b"\n").await?;
        }
    }

    out.flush().await?;
    processor.close().await;

    let stats = processor.stats();
    info!(stats = %serde_json::to_string(&stats)?, "Turnstile replay finished");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping replay");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping replay");
        }
    }
}
