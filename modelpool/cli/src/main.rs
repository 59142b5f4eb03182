//! Modelpool CLI
//!
//! Loads a pool from configuration and sends one chat call through it,
//! either to completion or as a chunk stream.
//!
//! # Usage
//!
//! ```bash
//! # Use the default config (~/.config/modelpool/pool.toml)
//! modelpool -p "Hello there"
//!
//! # Override the strategy and stream the answer
//! modelpool -c pool.toml -s race --stream -p "Hello there"
//!
//! # Send a raw chat payload and print health afterwards
//! modelpool --payload request.json --repeat 5 --health
//! ```
//!
//! # Environment Variables
//!
//! - `MODELPOOL_CONFIG`: path to the pool config file
//! - `MODELPOOL_STRATEGY`: strategy override applied at config load
//! - `MODELPOOL_STREAM_RACING`: enable stream racing for the race strategy
//! - `RUST_LOG`: log filter (overrides `--log-level`)

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use modelpool_core::config::load_config_from_path;
use modelpool_core::{
    DispatchRequest, HttpDispatcher, ModelPool, PoolConfig, StrategyKind, StreamChunk,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Modelpool - client-side load balancing for model calls
#[derive(Parser, Debug)]
#[command(name = "modelpool")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the pool config file
    #[arg(short = 'c', long, env = "MODELPOOL_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// User prompt to send
    #[arg(short = 'p', long, conflicts_with = "payload")]
    pub prompt: Option<String>,

    /// Raw JSON chat payload to send instead of a prompt
    #[arg(long, value_name = "FILE")]
    pub payload: Option<PathBuf>,

    /// Strategy override (fail_fast, sequential, round_robin, weighted_random, least_latency, race)
    #[arg(short = 's', long)]
    pub strategy: Option<StrategyKind>,

    /// Stream the answer chunk by chunk
    #[arg(long)]
    pub stream: bool,

    /// Send the same call this many times through one pool
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,

    /// Print per-endpoint health after the calls
    #[arg(long)]
    pub health: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let mut config = load_config_from_path(args.config.clone())
        .context("Failed to load pool configuration")?;
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    if config.endpoints.is_empty() {
        bail!(
            "No endpoints configured{}",
            config
                .config_file_path()
                .map(|p| format!(" in {}", p.display()))
                .unwrap_or_default()
        );
    }

    let payload = build_payload(&args)?;
    let pool = build_pool(&config)?;

    tracing::info!(
        pool = %pool.name(),
        strategy = %pool.strategy_kind(),
        endpoints = pool.endpoints().len(),
        source = ?config.source(),
        "Modelpool ready"
    );

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    for _ in 0..args.repeat.max(1) {
        if cancel.is_cancelled() {
            break;
        }
        let request = DispatchRequest::new(payload.clone());
        if args.stream {
            run_stream(&pool, &request, cancel.clone()).await?;
        } else {
            run_once(&pool, &request, cancel.clone()).await?;
        }
    }

    if args.health {
        let snapshots = pool.health().snapshots();
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        let stats = pool.health().aggregate_stats();
        tracing::info!(
            availability_pct = stats.availability_percentage(),
            endpoints = stats.total_endpoints,
            "Pool health"
        );
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!("modelpool={level},modelpool_core={level},warn"))
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_payload(args: &Args) -> Result<serde_json::Value> {
    if let Some(path) = &args.payload {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload {}", path.display()))?;
        return serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON in {}", path.display()));
    }
    let Some(prompt) = &args.prompt else {
        bail!("Either --prompt or --payload is required");
    };
    Ok(serde_json::json!({
        "messages": [{ "role": "user", "content": prompt }]
    }))
}

fn build_pool(config: &PoolConfig) -> Result<ModelPool> {
    let dispatcher = Arc::new(
        HttpDispatcher::from_config(config).context("Failed to create HTTP dispatcher")?,
    );
    ModelPool::from_config(config, dispatcher).context("Failed to create pool")
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight calls");
            cancel.cancel();
        }
    });
}

async fn run_once(
    pool: &ModelPool,
    request: &DispatchRequest,
    cancel: CancellationToken,
) -> Result<()> {
    let response = pool.execute(request, cancel).await?;
    if response.success {
        println!("{}", response.content_or_empty());
    }
    eprintln!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_stream(
    pool: &ModelPool,
    request: &DispatchRequest,
    cancel: CancellationToken,
) -> Result<()> {
    let mut rx = pool.execute_stream(request, cancel).await?;
    let mut stdout = std::io::stdout();

    while let Some(item) = rx.recv().await {
        match item? {
            StreamChunk::Start { endpoint } => {
                tracing::info!(
                    endpoint = %endpoint.endpoint_id,
                    model = %endpoint.model_id,
                    "Streaming from endpoint"
                );
            }
            StreamChunk::Text { content } => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            StreamChunk::Done {
                finish_reason,
                usage,
            } => {
                writeln!(stdout)?;
                tracing::info!(finish_reason = ?finish_reason, usage = ?usage, "Stream finished");
            }
            StreamChunk::Error { code, message } => {
                writeln!(stdout)?;
                tracing::error!(code = %code, "{message}");
            }
        }
    }
    Ok(())
}
