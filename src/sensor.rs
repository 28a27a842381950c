//! ==============================================================================
//! sensor.rs - sensor server client
//! ==============================================================================
//!
//! purpose:
//!     reads `GET http://<host>:<port>/temperatures` from every configured
//!     sensor server and merges the answers into one ReadingBatch.
//!
//! failure model:
//!     a server that is down, slow, or answers garbage only costs its own
//!     series for this cycle. nothing here is retried; the next poll is the
//!     retry.
//!
//! relationships:
//!     - used by: monitor.rs (once per cycle)
//!     - produces: domain.rs ReadingBatch
//!
//! ==============================================================================

use crate::config::ServerConfig;
use crate::domain::ReadingBatch;
use crate::error::FetchError;
use crate::rrd::is_valid_name;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct SensorClient {
    http: reqwest::Client,
}

impl SensorClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    pub fn url(hostname: &str, port: u16) -> String {
        format!("http://{}:{}/temperatures", hostname, port)
    }

    /// one request, every failure reported
    pub async fn fetch(&self, hostname: &str, port: u16) -> Result<ReadingBatch, FetchError> {
        let url = Self::url(hostname, port);
        debug!("Querying temperatures from: {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Transport { url: url.clone(), source })?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::Status { url, status: response.status().as_u16() });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|source| FetchError::Decode { url: url.clone(), source })?;

        parse_readings(&url, body)
    }

    /// like [`fetch`](Self::fetch) but an unreachable or broken server just
    /// yields an empty batch
    pub async fn read_temperatures(&self, hostname: &str, port: u16) -> ReadingBatch {
        match self.fetch(hostname, port).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("{}", e);
                ReadingBatch::new()
            }
        }
    }
}

/// keep numeric members with usable names, skip the rest
pub(crate) fn parse_readings(url: &str, body: serde_json::Value) -> Result<ReadingBatch, FetchError> {
    let serde_json::Value::Object(members) = body else {
        return Err(FetchError::NotAnObject { url: url.to_string() });
    };

    let mut batch = ReadingBatch::new();
    for (name, value) in members {
        if !is_valid_name(&name) {
            warn!(%url, series = %name, "skipping series with unusable name");
            continue;
        }
        match value.as_f64() {
            Some(v) => {
                batch.insert(name, v);
            }
            None => warn!(%url, series = %name, %value, "skipping non-numeric reading"),
        }
    }
    Ok(batch)
}

/// poll every server in order and union the results. a later server
/// overrides an earlier one reporting the same series.
pub async fn aggregate(client: &SensorClient, servers: &[ServerConfig]) -> ReadingBatch {
    let mut batch = ReadingBatch::new();
    for server in servers {
        let readings = client.read_temperatures(&server.hostname, server.port).await;
        debug!(
            host = %server.hostname,
            port = server.port,
            series = readings.len(),
            "server answered"
        );
        for name in batch.merge(readings) {
            debug!(series = %name, "series reported by more than one server, keeping the later value");
        }
    }
    batch
}
