use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod config;
mod error;
mod handlers;
mod identity;
mod metrics;
mod retry;
#[cfg(test)]
mod test_helpers;
mod upstream;

use crate::config::{BrokerConfig, FileConfig};
use crate::metrics::BrokerMetrics;
use crate::upstream::{HttpSessionApi, SessionApi};

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "chatkit-broker")]
#[command(about = "Mints short-lived ChatKit client secrets for the web panel")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to ./chatkit.toml; missing file is fine)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session broker (default)
    Serve(ServeArgs),

    /// Print the resolved configuration with secrets masked
    Config,
}

#[derive(Parser, Default)]
struct ServeArgs {
    /// Port for the web server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct BrokerState {
    /// Read-only process configuration
    pub config: Arc<BrokerConfig>,
    /// Session-issuing API (HTTP in production, scripted in tests)
    pub session_api: Arc<dyn SessionApi>,
    pub metrics: Arc<BrokerMetrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_FILE));
    let file_config: FileConfig = config::load_config(&config_path)
        .extract()
        .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;

    match cli.command {
        None => run_server(ServeArgs::default(), file_config).await,
        Some(Commands::Serve(args)) => run_server(args, file_config).await,
        Some(Commands::Config) => {
            let rendered = toml::to_string_pretty(&file_config.redacted())
                .context("Failed to render configuration")?;
            print!("{}", rendered);
            Ok(())
        }
    }
}

/// Routes served by the broker.
fn build_router(state: BrokerState) -> Router {
    Router::new()
        .route(
            "/api/create-session",
            post(handlers::create_session).fallback(handlers::method_not_allowed),
        )
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .with_state(state)
}

async fn run_server(args: ServeArgs, mut file_config: FileConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "chatkit_broker=debug,tower_http=debug,info"
    } else {
        "chatkit_broker=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting ChatKit session broker");

    if let Some(host) = args.host {
        file_config.server.host = host;
    }
    if let Some(port) = args.port {
        file_config.server.port = port;
    }
    let config = Arc::new(BrokerConfig::from_file(&file_config));

    if config.upstream.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; every session request will fail with 500");
    }
    match &config.upstream.default_workflow_id {
        Some(id) => info!("Default workflow: {}", id),
        None => warn!("No default workflow (set CHATKIT_WORKFLOW_ID); requests must name one"),
    }
    info!(
        "Upstream: {} (timeout {}s, {} retries, backoff base {}ms)",
        config.upstream.api_base,
        config.upstream.timeout.as_secs(),
        config.retry.max_retries,
        config.retry.backoff_base.as_millis()
    );

    let session_api = HttpSessionApi::new(&config.upstream)
        .context("Failed to build the session API client")?;

    let state = BrokerState {
        config: config.clone(),
        session_api: Arc::new(session_api),
        metrics: Arc::new(BrokerMetrics::new()),
    };

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port)
        .parse::<SocketAddr>()
        .context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("ChatKit broker listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  POST   /api/create-session  - Mint a client secret");
    info!("  GET    /health              - Broker status");
    info!("  GET    /metrics             - Counters");

    // Create shutdown signal handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, stopping...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
