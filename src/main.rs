//! ==============================================================================
//! main.rs - rrd-monitor entry point
//! ==============================================================================
//!
//! purpose:
//!     polls http temperature sensors on a fixed interval and records every
//!     reading into a round-robin database file. graphs are drawn from that
//!     file by a separate renderer.
//!
//! responsibilities:
//!     - parse arguments, load configuration, set up logging
//!     - run the polling loop (monitor.rs) until ctrl-c or a fatal store error
//!     - `--dump` / `--info`: print the store as JSON and exit
//!
//! exit status:
//!     0 on ctrl-c or after `--once`, non-zero when the store could not be
//!     migrated or read, so a supervisor notices.
//!
//! ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use rrd_monitor::rrd::{RoundRobinStore, RrdFile};
use rrd_monitor::{Monitor, MonitorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rrd-monitor", version, about)]
struct Args {
    /// log level (trace, debug, info, warn, error); RUST_LOG overrides it
    #[arg(long, env = "RRD_MONITOR_LOG")]
    log_level: Option<String>,

    /// run a single polling cycle and exit
    #[arg(long)]
    once: bool,

    /// print a full JSON dump of the store and exit
    #[arg(long, conflicts_with_all = ["once", "info"])]
    dump: bool,

    /// print the store's schema and archive fill levels and exit
    #[arg(long, conflicts_with = "once")]
    info: bool,

    /// configuration file (TOML, or JSON with a .json extension)
    #[arg(value_name = "CONFIG-FILENAME")]
    config: Option<PathBuf>,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // step 1: load configuration
    let config_path = args.config.clone().or_else(MonitorConfig::locate);
    let config = match &config_path {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };

    // step 2: logging
    init_logging(args.log_level.as_deref().unwrap_or(&config.logging.level));
    match &config_path {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => warn!("No config file found - using defaults"),
    }

    // step 3: one-shot store inspection
    if args.dump || args.info {
        let store = RrdFile::new();
        let path = &config.store.path;
        let json = if args.dump {
            serde_json::to_string_pretty(&store.export_full(path)?)?
        } else {
            serde_json::to_string_pretty(&store.info(path)?)?
        };
        println!("{}", json);
        return Ok(());
    }

    config.log_summary();
    if config.servers.is_empty() {
        warn!("No sensor servers configured - no readings will be recorded");
    }

    // step 4: polling
    let monitor = Monitor::new(Arc::new(config)).context("failed to set up monitor")?;
    if args.once {
        monitor.run_cycle().await?;
        return Ok(());
    }

    tokio::select! {
        result = monitor.run() => result.context("monitoring stopped")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
