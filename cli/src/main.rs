use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use auditlog_kernel::alert::{AlertSink, Notifier, TracingNotifier, WebhookNotifier};
use auditlog_kernel::bus::LineSource;
use auditlog_kernel::config::IngestConfig;
use auditlog_kernel::consumer::{ConsumerLoop, ConsumerStats};
use auditlog_kernel::flush::{FlushStatsSnapshot, Flusher};
use auditlog_kernel::timer::spawn_flush_timer;
use auditlog_kernel::writer::JsonLinesWriter;

/// Audit log batching consumer
#[derive(Parser, Debug)]
#[command(name = "auditlog")]
#[command(about = "Buffer audit-log events and persist them in batches", long_about = None)]
struct Cli {
    /// Path to ingest config JSON
    #[arg(long, env = "AUDITLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Records per size-triggered flush
    #[arg(long, env = "AUDITLOG_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Maximum age of buffered data, e.g. "1m"
    #[arg(long, env = "AUDITLOG_FLUSH_INTERVAL", value_parser = humantime::parse_duration)]
    flush_interval: Option<Duration>,

    /// Buffer size in MB that forces an early flush and an alert
    #[arg(long, env = "AUDITLOG_MAX_BUFFER_MB")]
    max_buffer_mb: Option<f64>,

    /// Newline-delimited JSON input; stdin when omitted
    #[arg(long, env = "AUDITLOG_INPUT")]
    input: Option<PathBuf>,

    /// JSON-lines file batches are appended to
    #[arg(long, env = "AUDITLOG_OUTPUT", default_value = "audit-logs.jsonl")]
    output: PathBuf,

    /// Endpoint alerts are posted to; alerts are only logged when omitted
    #[arg(long, env = "AUDITLOG_ALERT_WEBHOOK")]
    alert_webhook: Option<String>,

    /// Recipient passed along with every alert
    #[arg(long, env = "AUDITLOG_ALERT_RECIPIENT")]
    alert_recipient: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Wrapper for JSON output
#[derive(Debug, Serialize)]
struct ExitSummary {
    consumer: Option<ConsumerStats>,
    flush: FlushStatsSnapshot,
    unpersisted: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // ----------------------------
    // Load config
    // ----------------------------
    let config = load_config(&cli)?;
    config.validate()?;
    tracing::info!(
        batch_size = config.batch_size,
        flush_interval = ?config.flush_interval,
        max_buffer_mb = config.max_buffer_mb,
        "config loaded"
    );

    // ----------------------------
    // Wire collaborators
    // ----------------------------
    let notifier: Arc<dyn Notifier> = match &cli.alert_webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), cli.alert_recipient.clone())?),
        None => Arc::new(TracingNotifier),
    };
    let alerts = AlertSink::new(notifier);

    let writer = JsonLinesWriter::open(&cli.output)
        .await
        .with_context(|| format!("opening {}", cli.output.display()))?;
    tracing::info!(path = %writer.path().display(), "writing batches");

    let flusher = Flusher::new(
        config.flush_policy(),
        Arc::new(writer),
        alerts.clone(),
        config.write_timeout,
    );

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    // ----------------------------
    // Run consumer + timer
    // ----------------------------
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => tracing::warn!(error = %e, "cannot listen for shutdown signal"),
            }
        }
    });

    let timer = spawn_flush_timer(flusher.clone(), config.timer_tick, shutdown.clone());
    let consumer = ConsumerLoop::new(
        LineSource::new(reader),
        flusher.clone(),
        alerts,
        shutdown.clone(),
    );
    let outcome = consumer.run().await;

    shutdown.cancel();
    timer.await.context("flush timer panicked")?;

    // ----------------------------
    // Final drain
    // ----------------------------
    if let Some(report) = flusher.force_flush().await {
        if !report.succeeded() {
            tracing::error!(
                unpersisted = report.requeued,
                "final flush failed, buffered logs will be lost"
            );
        }
    }

    // ----------------------------
    // Output
    // ----------------------------
    let summary = ExitSummary {
        consumer: outcome.as_ref().ok().map(|report| report.stats),
        flush: flusher.stats(),
        unpersisted: flusher.buffered().0,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    outcome?;
    Ok(())
}

/// Defaults, then the config file, then flags and environment.
fn load_config(cli: &Cli) -> Result<IngestConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            IngestConfig::from_json(&data)?
        }
        None => IngestConfig::default(),
    };

    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(flush_interval) = cli.flush_interval {
        config.flush_interval = flush_interval;
    }
    if let Some(max_buffer_mb) = cli.max_buffer_mb {
        config.max_buffer_mb = max_buffer_mb;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "auditlog",
            "--batch-size",
            "25",
            "--flush-interval",
            "5m",
        ]);
        let config = load_config(&cli).unwrap();

        assert_eq!(config.batch_size, 25);
        assert_eq!(config.flush_interval, Duration::from_secs(300));
        assert_eq!(config.max_buffer_mb, 5.0);
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.json");
        std::fs::write(&path, r#"{ "batch_size": 500, "max_buffer_mb": 8 }"#).unwrap();

        let cli = Cli::parse_from([
            "auditlog",
            "--config",
            path.to_str().unwrap(),
            "--max-buffer-mb",
            "2",
        ]);
        let config = load_config(&cli).unwrap();

        assert_eq!(config.batch_size, 500);
        assert_eq!(config.max_buffer_mb, 2.0);
    }
}
