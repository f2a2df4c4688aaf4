//! tpush Daemon Binary
//!
//! A WebSocket server that routes pushed data between connected clients.
//!
//! # Usage
//!
//! ```bash
//! tpush-daemon --port 8080
//! tpush-daemon --config ./tpush.toml --host 127.0.0.1
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use tpush::config::PushConfig;
use tpush::socket_server::{serve, Dispatcher};

/// tpush Socket Server Daemon
#[derive(Parser, Debug)]
#[command(name = "tpush-daemon")]
#[command(about = "WebSocket push service with user and channel addressing")]
#[command(version)]
struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long, env = "TPUSH_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// URL path of the WebSocket endpoint
    #[arg(long)]
    path: Option<String>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<PushConfig> {
        let mut config = match &self.config {
            Some(path) => PushConfig::load_from(path)?,
            None => PushConfig::load()?,
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(path) = &self.path {
            config.server.path = path.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    // Initialize logging; RUST_LOG overrides the configured level
    let default_filter = format!("tpush={level},tpush_daemon={level}", level = config.logging.level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let addr = config.bind_addr();
    let path = config.server.path.clone();
    let dispatcher = Arc::new(Dispatcher::new(config));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("tpush daemon listening on ws://{}{}", addr, path);

    tokio::select! {
        _ = serve(listener, Arc::clone(&dispatcher)) => {}
        _ = tokio::signal::ctrl_c() => {
            let stats = dispatcher.registry().stats();
            tracing::info!(
                "Shutting down with {} session(s), {} user(s), {} channel(s)",
                stats.session_count,
                stats.user_count,
                stats.channel_count
            );
        }
    }

    Ok(())
}
