use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use feedpull::client::{AcquisitionClient, NoopClient, QbittorrentClient};
use feedpull::config::Config;
use feedpull::feed::build_http_client;
use feedpull::storage::FeedStore;
use feedpull::Refresher;

/// Get the config directory path (~/.config/feedpull/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedpull"))
}

/// Get the default cache directory path (~/.cache/feedpull/)
fn get_cache_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".cache").join("feedpull"))
}

#[derive(Parser, Debug)]
#[command(name = "feedpull", about = "Poll RSS feeds and send new torrents to a download client")]
struct Args {
    /// Config file (default: ~/.config/feedpull/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding feeds.json and the ledger (overrides config)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Run a single refresh cycle and exit
    #[arg(long)]
    once: bool,
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let data_dir = args
        .data_dir
        .clone()
        .or_else(|| config.data_dir.clone())
        .unwrap_or(config_dir);
    let cache_dir = match config.cache_dir.clone() {
        Some(dir) => dir,
        None => get_cache_dir()?,
    };

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;

    let feed_store = FeedStore::new(&data_dir);
    if feed_store
        .ensure_exists()
        .await
        .context("Failed to create feed list")?
    {
        println!(
            "Created {}; edit it to add feeds.",
            feed_store.path().display()
        );
    }

    let http = build_http_client(&config).context("Failed to build HTTP client")?;

    let client: Box<dyn AcquisitionClient> = match &config.qbittorrent {
        Some(qb) => {
            // The download client is usually local, so it never goes through the proxy
            let qb_http = reqwest::Client::builder()
                .timeout(config.request_timeout())
                .build()
                .context("Failed to build qBittorrent HTTP client")?;
            Box::new(QbittorrentClient::from_config(qb_http, qb))
        }
        None => {
            tracing::warn!("No [qbittorrent] section configured, items will not be submitted");
            Box::new(NoopClient)
        }
    };

    let refresher = Refresher::from_config(&config, http, &data_dir, &cache_dir);

    tracing::info!(
        data_dir = %data_dir.display(),
        cache_dir = %cache_dir.display(),
        client = client.client_type(),
        "feedpull starting"
    );

    if args.once {
        tokio::select! {
            result = refresher.refresh_all(client.as_ref()) => {
                let report = result.context("Failed to load feed list")?;
                println!(
                    "{} feeds refreshed, {} failed, {} submitted",
                    report.feeds.len(),
                    report.failed(),
                    report.submitted()
                );
            }
            _ = shutdown_signal() => {
                tracing::info!("Interrupted, abandoning refresh cycle");
            }
        }
        return Ok(());
    }

    refresher
        .run_periodic(client.as_ref(), config.refresh_interval(), shutdown_signal())
        .await;

    println!("Goodbye!");
    Ok(())
}
