//! procscope daemon binary entry point.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use procscope_core::config::ProcscopeConfig;
use procscope_daemon::{server, Engine};

/// procscope - real-time host security monitor.
#[derive(Parser, Debug)]
#[command(name = "procscope", version, about)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "~/.procscope/config.toml")]
    config: String,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the bind address.
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = expand_tilde(&args.config);
    let mut config = ProcscopeConfig::load(&config_path).context("loading configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }

    // Priority: PROCSCOPE_LOG env var > config log_level > info.
    let env_filter = EnvFilter::try_from_env("PROCSCOPE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(config.log_level.clone().unwrap_or_else(|| "info".to_string()))
    });
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(config = %config_path.display(), "procscope starting");

    let engine = Engine::start(config.clone()).context("starting engine")?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("parsing listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "procscope listening");

    let app = server::router(engine.clone());
    let mut engine_shutdown = engine.shutdown_signal();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
                _ = engine_shutdown.changed() => tracing::info!("engine requested shutdown"),
            }
        })
        .await
        .context("serving")?;

    engine.stop().await;
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
