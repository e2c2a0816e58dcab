//! ITS gateway - camera event relay and lane barrier control
//!
//! Receives camera notifications over HTTP and forwards them to RabbitMQ,
//! and opens lane barriers on Dahua access controllers on request.
//!
//! Module structure:
//! - `domain/` - Event model and lane mapping
//! - `io/` - External interfaces (HTTP API, AMQP, Dahua controllers)
//! - `services/` - Ingestion pipeline and gate dispatcher
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use its_gateway::infra::{Config, LogFormat, Metrics};
use its_gateway::io::{serve, AmqpConfig, AmqpConnector, AppState, DahuaClient, Publisher, RetryPolicy};
use its_gateway::services::{GateDispatcher, IngestPipeline};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// ITS gateway - camera event relay and barrier control
#[derive(Parser, Debug)]
#[command(
    name = "its-gateway",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"),
    about
)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(format: LogFormat) {
    // Default: INFO, use RUST_LOG=debug for per-request detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Config decides the log format, so load before the subscriber exists and report afterwards
    let config_path = Config::resolve_config_path(args.config.as_deref());
    let loaded = Config::from_file(&config_path);
    init_logging(loaded.as_ref().map(|c| c.log_format()).unwrap_or_default());

    info!(git_hash = %env!("GIT_HASH"), "its-gateway starting");

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %format!("{e:#}"), path = %config_path, "config_load_failed_using_defaults");
            Config::default()
        }
    };

    let lanes = config.lane_map();
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        bind_address = %config.bind_address(),
        port = %config.port(),
        request_timeout_ms = %config.request_timeout().as_millis(),
        rabbitmq_url = %config.rabbitmq_url_redacted(),
        exchange = %config.rabbitmq_exchange(),
        routing_key = %config.rabbitmq_routing_key(),
        retry = %config.rabbitmq_retry(),
        lanes = ?lanes.lane_ids(),
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());

    let connector = Arc::new(AmqpConnector::new(AmqpConfig::from_config(&config)));
    let publisher = Arc::new(Publisher::new(connector, RetryPolicy::from_config(&config)));
    publisher.connect().await.context("Failed to connect to RabbitMQ")?;

    let dahua = DahuaClient::new(lanes).context("Failed to build controller HTTP client")?;

    let state = Arc::new(AppState {
        ingest: IngestPipeline::new(publisher.clone(), config.request_timeout(), metrics.clone()),
        gate: GateDispatcher::new(Arc::new(dahua), config.request_timeout(), metrics.clone()),
        metrics: metrics.clone(),
        site_id: config.site_id().to_string(),
        max_body_bytes: config.max_body_bytes(),
    });

    let addr = format!("{}:{}", config.bind_address(), config.port());
    let listener =
        TcpListener::bind(&addr).await.with_context(|| format!("Failed to bind {}", addr))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Periodic metrics summary (interval 0 disables it)
    let metrics_interval = config.metrics_interval_secs();
    if metrics_interval > 0 {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                metrics.report().log();
            }
        });
    }

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    serve(listener, state, shutdown_rx).await.context("HTTP server failed")?;

    publisher.close().await;
    metrics.report().log();
    info!("its-gateway shutdown complete");
    Ok(())
}
