//! a3s-bridge - gateway connection plus signed interaction webhook

use a3s_bridge::config::BridgeConfig;
use a3s_bridge::pipeline::{EventHandler, EventPipeline, EventSink, WILDCARD};
use a3s_bridge::{
    webhook, DispatchBridge, LifecycleCoordinator, PipelineEvent, WebSocketGateway, WebhookState,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "a3s-bridge")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Gateway connection plus signed interaction webhook")]
struct Cli {
    /// Configuration file path (.hcl or .json)
    #[arg(short, long, env = "A3S_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind the webhook listener to
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the webhook listener to
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Hex-encoded Ed25519 public key used to verify webhook signatures
    #[arg(long, env = "PUBLIC_KEY", hide_env_values = true)]
    public_key: Option<String>,

    /// Gateway bot token
    #[arg(long, env = "TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Gateway WebSocket URL
    #[arg(long)]
    gateway_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Run,

    /// Print the resolved configuration with secrets redacted, then exit
    CheckConfig,
}

/// Logs every event that reaches the pipeline
struct LogHandler;

#[async_trait]
impl EventHandler for LogHandler {
    async fn handle(&self, event: PipelineEvent) -> a3s_bridge::Result<()> {
        tracing::info!(
            event_id = %event.id,
            name = %event.name,
            ingress = %event.ingress,
            "Event received"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let config = resolve_config(&cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            config.validate().context("Configuration is not runnable")?;
            let json = serde_json::to_string_pretty(&config.redacted())
                .context("Failed to serialize configuration")?;
            println!("{}", json);
        }
        Commands::Run => run(config).await?,
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("a3s_bridge={},tower_http={}", log_level, log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// File config with CLI / environment overrides applied
fn resolve_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = BridgeConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(public_key) = &cli.public_key {
        config.webhook.public_key = public_key.clone();
    }
    if let Some(token) = &cli.token {
        config.gateway.token = token.clone();
    }
    if let Some(url) = &cli.gateway_url {
        config.gateway.url = url.clone();
    }

    Ok(config)
}

async fn run(config: BridgeConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let bind_addr = config.server.bind_addr()?;

    let (pipeline, mut runner) = EventPipeline::new(a3s_bridge::pipeline::DEFAULT_CAPACITY);
    runner.register(WILDCARD, Arc::new(LogHandler));
    let pipeline_task = runner.spawn();
    let sink: Arc<dyn EventSink> = Arc::new(pipeline);

    let gateway = Arc::new(WebSocketGateway::new(config.gateway.clone(), sink.clone()));
    let state = WebhookState::from_config(config.webhook.clone(), DispatchBridge::new(sink))
        .context("Failed to initialise webhook verifier")?;
    let app = webhook::router(state);

    let coordinator = LifecycleCoordinator::new(config.lifecycle.clone(), bind_addr);
    let shutdown = coordinator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
        shutdown.cancel();
    });

    tracing::info!(
        addr = %bind_addr,
        path = %config.webhook.path,
        gateway = %config.gateway.url,
        "Starting a3s-bridge"
    );
    let report = coordinator
        .run(gateway, app)
        .await
        .context("Bridge failed to start")?;

    // The runner drains queued events and exits once every sink is dropped
    match tokio::time::timeout(config.lifecycle.shutdown_grace(), pipeline_task).await {
        Ok(Ok(())) => tracing::debug!("Event pipeline drained"),
        Ok(Err(e)) => tracing::warn!("Event pipeline task failed: {}", e),
        Err(_) => tracing::warn!("Event pipeline did not drain in time, queued events dropped"),
    }

    if !report.is_clean() {
        anyhow::bail!(
            "Shutdown left resources unreleased (listener: {:?}, gateway: {:?})",
            report.listener,
            report.gateway
        );
    }
    Ok(())
}
