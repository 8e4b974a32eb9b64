//! Result Cache - maintenance tool for the on-disk query result cache

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::Config;
use resultcache_core::ExpiringCache;
use resultcache_storage::{EntryStore, LocalStore};

/// Result Cache - inspect and garbage-collect an on-disk result cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Cache directory
    #[arg(long, env = "RESULTCACHE_DIR")]
    directory: Option<String>,

    /// Log level
    #[arg(long, env = "RESULTCACHE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every cached entry with its age
    List,
    /// Run a single sweep with the configured limits
    Sweep,
    /// Run the background collector until interrupted
    Watch {
        /// Serve Prometheus metrics on this address
        #[arg(long)]
        metrics_addr: Option<SocketAddr>,
    },
    /// Remove one entry
    Invalidate { key: String },
    /// Write the effective configuration to the config path
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let (mut config, source) = Config::load(&args.config)?;
    if let Some(directory) = args.directory {
        config.cache.directory = directory;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format);

    info!("Starting resultcache v{}", env!("CARGO_PKG_VERSION"));
    info!("{}", source);

    match args.command {
        Command::InitConfig { force } => init_config(&config, &args.config, force),
        Command::List => {
            let (store, _cache) = open_cache(&config).await?;
            list_entries(&*store).await
        }
        Command::Sweep => {
            let (_store, cache) = open_cache(&config).await?;
            let report = cache.run_sweep().await?;
            println!(
                "scanned {} entries: {} expired, {} evicted, {} failures",
                report.scanned, report.expired, report.evicted, report.failures
            );
            Ok(())
        }
        Command::Watch { metrics_addr } => {
            let (_store, cache) = open_cache(&config).await?;
            watch(cache, metrics_addr.or(config.metrics.listen)).await
        }
        Command::Invalidate { key } => {
            let (_store, cache) = open_cache(&config).await?;
            if cache.invalidate(&key).await? {
                println!("removed {}", key);
            } else {
                println!("{} is not cached", key);
            }
            Ok(())
        }
    }
}

/// Open the store and wrap it in an expiring cache
async fn open_cache(config: &Config) -> Result<(Arc<LocalStore>, ExpiringCache)> {
    let store = Arc::new(
        LocalStore::new(&config.cache.directory)
            .await
            .with_context(|| format!("Failed to open cache at {}", config.cache.directory))?,
    );
    let cache = ExpiringCache::new(store.clone(), config.cache.to_cache_config());
    Ok((store, cache))
}

fn init_config(config: &Config, path: &str, force: bool) -> Result<()> {
    if std::path::Path::new(path).exists() && !force {
        anyhow::bail!("{} already exists, pass --force to overwrite", path);
    }
    config.save(path)
}

async fn list_entries(store: &dyn EntryStore) -> Result<()> {
    let mut entries = store.list_entries().await?;
    entries.sort_by_key(|entry| entry.last_modified);

    let now = Utc::now();
    for entry in &entries {
        let age = (now - entry.last_modified).num_seconds().max(0);
        println!("{:>10}s  {}", age, entry.key);
    }
    println!("{} entries", entries.len());
    Ok(())
}

async fn watch(cache: ExpiringCache, metrics_addr: Option<SocketAddr>) -> Result<()> {
    if let Some(addr) = metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Serving metrics on {}", addr);
    }

    cache.subscribe(|key: &str| {
        info!("Evicted {}", key);
        Ok(())
    });

    let collector = cache.start_collector();
    shutdown_signal().await;
    collector.shutdown().await;

    info!("Collector stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        "json" => registry.with(fmt::layer().json()).init(),
        "pretty" => registry.with(fmt::layer()).init(),
        other => {
            registry.with(fmt::layer()).init();
            warn!("Unknown log format {:?}, using pretty", other);
        }
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
