use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vidrelay::{
    api::{self, AppState},
    config::{self, AppConfig, DEFAULT_CONFIG_PATH},
    extractor::Extractor,
    security::ensure_not_root,
};

const DEFAULT_LOG_FILTER: &str = "vidrelay=info,backend=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve the yt-dlp analyze/download API.")]
struct Cli {
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the optional env-file")]
    config: PathBuf,
    #[arg(long = "host", value_name = "ADDR", help = "Listen address (overrides LISTEN_HOST)")]
    host: Option<String>,
    #[arg(short = 'p', long = "port", value_name = "PORT", help = "Listen port (overrides PORT)")]
    port: Option<u16>,
    #[arg(
        long = "project-root",
        value_name = "PATH",
        help = "Directory holding yt-dlp, cookies.txt and dist/ (default: current directory)"
    )]
    project_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    ensure_not_root("backend")?;

    let config = load_config(cli)?;
    info!(
        extractor = %config.extractor_bin.display(),
        www_root = %config.www_root.display(),
        timeout_secs = config.analyze_timeout.as_secs(),
        "configuration loaded"
    );
    match config.cookies() {
        Some(path) => info!(cookies = %path.display(), "cookie jar found"),
        None => warn!(
            cookies = %config.cookies_file.display(),
            "no cookie jar; some sites may block anonymous requests"
        ),
    }

    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("parsing listen address {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);

    let extractor = Extractor::new(Arc::new(config));
    let app = api::router(AppState::new(extractor));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("Server running at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

/// env-file, then process environment, then command-line flags.
fn load_config(cli: Cli) -> Result<AppConfig> {
    let file_cfg = config::read_env_config(&cli.config)?.unwrap_or_default();
    let mut cfg = config::apply_env_overrides(file_cfg, |key| std::env::var(key).ok())?;
    if cli.host.is_some() {
        cfg.host = cli.host;
    }
    if cli.port.is_some() {
        cfg.port = cli.port;
    }
    if cli.project_root.is_some() {
        cfg.project_root = cli.project_root;
    }
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    Ok(AppConfig::resolve(cfg, &cwd))
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", err);
    }
    info!("shutting down");
}
