//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `monitor.toml` (or `.json`).
//!     loads configuration from file or falls back to defaults.
//!     the loaded value is built once at startup and shared read-only.
//!
//! structure:
//!     - PollingConfig: how often the sensor servers are polled.
//!     - StoreConfig: store file path, step and defaults for new columns.
//!     - archives: retention policy applied when the store is created.
//!     - servers: sensor servers exposing /temperatures.
//!
//! ==============================================================================

use crate::rrd::{
    ArchiveDef, Consolidation, DataSource, DEFAULT_HEARTBEAT_SECS, DEFAULT_MAX, DEFAULT_MIN,
};
use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_archives", alias = "rras")]
    pub archives: Vec<ArchiveDef>,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    pub interval_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_seconds: 300 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    #[serde(default = "default_step")]
    pub step_seconds: u64,
    #[serde(default)]
    pub data_source: DataSourceDefaults,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("temperatures.rrd"),
            step_seconds: default_step(),
            data_source: DataSourceDefaults::default(),
        }
    }
}

/// attributes given to every column the monitor creates
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DataSourceDefaults {
    pub heartbeat_seconds: u64,
    pub min: f64,
    pub max: f64,
}

impl Default for DataSourceDefaults {
    fn default() -> Self {
        Self { heartbeat_seconds: DEFAULT_HEARTBEAT_SECS, min: DEFAULT_MIN, max: DEFAULT_MAX }
    }
}

impl DataSourceDefaults {
    pub fn data_source(&self, name: &str) -> DataSource {
        DataSource::gauge(name, self.heartbeat_seconds, self.min, self.max)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_seconds: 10 }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

fn default_step() -> u64 {
    300
}

/// 5 minute samples for a day, 30 minutes for a week, 2 hours for a month
/// and daily average/min/max for a year
fn default_archives() -> Vec<ArchiveDef> {
    let archive = |cf, steps, rows| ArchiveDef { cf, xff: 0.5, steps, rows };
    vec![
        archive(Consolidation::Average, 1, 288),
        archive(Consolidation::Average, 6, 336),
        archive(Consolidation::Average, 24, 372),
        archive(Consolidation::Average, 288, 365),
        archive(Consolidation::Min, 288, 365),
        archive(Consolidation::Max, 288, 365),
    ]
}

impl MonitorConfig {
    /// Load configuration from file. `.json` files are parsed as JSON,
    /// everything else as TOML.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let config: MonitorConfig = if is_json {
            serde_json::from_str(&content)
                .map_err(|e| anyhow!("Failed to parse config {}: {}", path.display(), e))?
        } else {
            toml::from_str(&content)
                .map_err(|e| anyhow!("Failed to parse config {}: {}", path.display(), e))?
        };

        config.validate()?;
        Ok(config)
    }

    /// first config file found in the usual places
    pub fn locate() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config").join("monitor.toml"),
            PathBuf::from("..").join("config").join("monitor.toml"),
        ];
        paths.into_iter().find(|p| p.exists())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.polling.interval_seconds == 0 {
            bail!("polling.interval_seconds must be greater than zero");
        }
        if self.store.step_seconds == 0 {
            bail!("store.step_seconds must be greater than zero");
        }
        if self.store.path.as_os_str().is_empty() {
            bail!("store.path must not be empty");
        }
        let ds = &self.store.data_source;
        if ds.heartbeat_seconds == 0 || ds.min >= ds.max {
            bail!("store.data_source needs a heartbeat and min below max");
        }
        // every sample after a longer gap would be recorded as unknown
        if self.polling.interval_seconds > ds.heartbeat_seconds {
            bail!(
                "polling.interval_seconds ({}) exceeds store.data_source.heartbeat_seconds ({})",
                self.polling.interval_seconds,
                ds.heartbeat_seconds
            );
        }
        if self.archives.is_empty() {
            bail!("at least one archive is required");
        }
        for archive in &self.archives {
            archive.validate()?;
            if archive.span_secs(self.store.step_seconds).is_none() {
                bail!(
                    "archive {}:{}:{} is too long for a {}s step",
                    archive.cf,
                    archive.steps,
                    archive.rows,
                    self.store.step_seconds
                );
            }
        }
        for server in &self.servers {
            if server.hostname.is_empty() || server.port == 0 {
                bail!("server entry {}:{} is invalid", server.hostname, server.port);
            }
        }
        Ok(())
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!(
            interval_seconds = self.polling.interval_seconds,
            store = %self.store.path.display(),
            step_seconds = self.store.step_seconds,
            archives = self.archives.len(),
            servers = self.servers.len(),
            "configuration"
        );
        for server in &self.servers {
            info!("sensor server {}:{}", server.hostname, server.port);
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            polling: PollingConfig::default(),
            store: StoreConfig::default(),
            archives: default_archives(),
            servers: vec![ServerConfig { hostname: "localhost".to_string(), port: 5001 }],
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_valid() {
        MonitorConfig::default().validate().unwrap();
    }

    #[test]
    fn test_load_toml() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("monitor.toml");
        std::fs::write(
            &path,
            r#"
[polling]
interval_seconds = 60

[store]
path = "/var/lib/monitor/temps.rrd"

[store.data_source]
heartbeat_seconds = 120
min = -40
max = 60

[[archives]]
type = "AVERAGE"
xff = 0.5
steps = 1
rows = 1440

[[archives]]
type = "MAX"
xff = 0.5
steps = 60
rows = 720

[[servers]]
hostname = "kitchen.local"
port = 5001
"#,
        )
        .unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.polling.interval_seconds, 60);
        assert_eq!(config.store.step_seconds, 300);
        assert_eq!(config.store.data_source.heartbeat_seconds, 120);
        assert_eq!(config.archives.len(), 2);
        assert_eq!(config.archives[1].cf, Consolidation::Max);
        assert_eq!(config.servers[0].hostname, "kitchen.local");
        assert_eq!(config.http.timeout_seconds, 10);
    }

    #[test]
    fn test_load_json_with_rras_alias() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("monitor.json");
        std::fs::write(
            &path,
            r#"{
                "store": {"path": "temps.rrd"},
                "rras": [{"type": "AVERAGE", "xff": 0.5, "steps": 1, "rows": 600}],
                "servers": [{"hostname": "localhost", "port": 5001}]
            }"#,
        )
        .unwrap();
        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.archives[0].rows, 600);
        assert_eq!(config.polling.interval_seconds, 300);
    }

    #[test]
    fn test_invalid_archive_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("monitor.toml");
        std::fs::write(
            &path,
            "[[archives]]\ntype = \"AVERAGE\"\nxff = 0.5\nsteps = 0\nrows = 10\n",
        )
        .unwrap();
        assert!(MonitorConfig::load(&path).is_err());
    }

    #[test]
    fn test_interval_longer_than_heartbeat_rejected() {
        let mut config = MonitorConfig::default();
        config.polling.interval_seconds = 900;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat_seconds"));

        config.polling.interval_seconds = config.store.data_source.heartbeat_seconds;
        config.validate().unwrap();
    }

    #[test]
    fn test_overflowing_archive_rejected() {
        let mut config = MonitorConfig::default();
        config.archives[0].steps = u32::MAX;
        config.archives[0].rows = u32::MAX;
        assert!(config.validate().is_err());
    }
}
