//! chiplink - WebSocket bridge for the Matter `chip-tool` CLI
//!
//! Browser clients send JSON intents over `/ws`; each one becomes a
//! `chip-tool` invocation whose output is parsed and pushed back as events.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser as ClapParser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chiplink::{
    api,
    config::{BridgeConfig, ConfigError},
    dispatch::Dispatcher,
    session::SessionRegistry,
    tool::ChipTool,
};

/// chiplink - WebSocket bridge for the Matter chip-tool CLI
#[derive(ClapParser, Debug)]
#[command(name = "chiplink", version, about, long_about = None)]
struct Cli {
    /// Address to bind the HTTP/WebSocket server (overrides config)
    #[arg(long, env = "CHIPLINK_BIND")]
    bind: Option<SocketAddr>,

    /// Path to the TOML config file
    #[arg(long, env = "CHIPLINK_CONFIG")]
    config: Option<PathBuf>,

    /// chip-tool binary to run (overrides config)
    #[arg(long, env = "CHIPLINK_TOOL_PATH")]
    tool_path: Option<PathBuf>,

    /// Allowed CORS origin; repeat for several (overrides config)
    #[arg(long = "cors-origin")]
    cors_origins: Vec<String>,
}

#[derive(Error, Debug)]
pub enum ChiplinkError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), ChiplinkError> {
    init_tracing();
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    run_server(config).await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "chiplink=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Layer CLI/env overrides on top of the config file, or defaults when
/// there is no file.
fn resolve_config(cli: &Cli) -> Result<BridgeConfig, ConfigError> {
    let path = cli.config.clone().or_else(BridgeConfig::default_path);
    let mut config = match path {
        Some(ref path) => match BridgeConfig::load(path)? {
            Some(config) => {
                tracing::info!(path = %path.display(), "loaded config");
                config
            }
            None => BridgeConfig::default(),
        },
        None => BridgeConfig::default(),
    };

    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(ref tool_path) = cli.tool_path {
        config.tool.path = tool_path.clone();
    }
    if !cli.cors_origins.is_empty() {
        config.server.cors_origins = cli.cors_origins.clone();
    }
    Ok(config)
}

async fn run_server(config: BridgeConfig) -> Result<(), ChiplinkError> {
    tracing::info!("chiplink starting");

    let tool = ChipTool::new(config.tool.path.clone());
    match tool.probe().await {
        Ok(version) => tracing::info!(path = %tool.path().display(), %version, "chip-tool found"),
        Err(e) => tracing::warn!(
            path = %tool.path().display(),
            "chip-tool is not runnable, intents will fail until it is: {e}"
        ),
    }

    let shutdown = CancellationToken::new();
    let sessions = SessionRegistry::with_limits(
        shutdown.clone(),
        config.session.outbound_capacity,
        config.session.max_clients,
    );
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(tool), config.dispatch_config()));
    let state = api::AppState {
        sessions: sessions.clone(),
        dispatcher,
        transport: config.transport_config(),
        shutdown: shutdown.clone(),
    };
    let app = api::router(
        state,
        api::RouterConfig {
            cors_origins: config.server.cors_origins.clone(),
        },
    );

    let bind = config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|source| ChiplinkError::Bind { addr: bind, source })?;
    tracing::info!(addr = %bind, "HTTP/WS server listening");

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received Ctrl+C");
                signal.cancel();
            }
            Err(e) => tracing::error!("cannot listen for Ctrl+C: {e}"),
        }
    });

    let stopped = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { stopped.cancelled().await })
        .await?;

    let drained = sessions.drain();
    tracing::info!(sessions = drained, "chiplink stopped");
    Ok(())
}
