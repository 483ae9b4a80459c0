//! gitgate - git Smart HTTP server.

use anyhow::Context;
use clap::Parser;
use gitgate_server::observability::{init_logging, LogFormat};
use gitgate_server::{create_router, AppState, Config};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Serve local git repositories over Smart HTTP
#[derive(Parser, Debug)]
#[command(name = "gitgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Directory holding the repositories
    #[arg(long)]
    content_root: Option<PathBuf>,

    /// Do not create missing repositories on push
    #[arg(long)]
    no_auto_create: bool,

    /// git executable
    #[arg(long)]
    git: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(content_root) = self.content_root {
            config.content_root = content_root;
        }
        if self.no_auto_create {
            config.auto_create = false;
        }
        if let Some(git) = self.git {
            config.git.executable = git;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if let Some(format) = self.log_format {
            config.log.format = LogFormat::parse(&format);
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;

    init_logging(&config.log.level, config.log.format);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting gitgate");
    tracing::info!(
        listen = %config.listen,
        content_root = %config.content_root.display(),
        auto_create = config.auto_create,
        git = %config.git.executable.display(),
        "Server configuration"
    );

    let state = AppState::from_config(&config, tracing::info_span!("gitgate"))
        .await
        .with_context(|| format!("failed to open content root {}", config.content_root.display()))?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(addr = %config.listen, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
