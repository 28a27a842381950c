//! ==============================================================================
//! monitor.rs - the polling cycle
//! ==============================================================================
//!
//! one cycle:
//!
//! ```text
//!     ┌──────────┐    ┌───────────┐    ┌──────────────┐    ┌────────────┐
//!     │ sensors  │ -> │ aggregate │ -> │ ensure_store │ -> │ write row  │
//!     │ (http)   │    │ (union)   │    │ (schema.rs)  │    │ (writer.rs)│
//!     └──────────┘    └───────────┘    └──────────────┘    └────────────┘
//! ```
//!
//! cycles run back to back on one task, so they never overlap and this
//! process is the only writer of the store file. store calls are blocking
//! file i/o and go through spawn_blocking.
//!
//! ==============================================================================

use crate::config::MonitorConfig;
use crate::domain::ReadingBatch;
use crate::error::{MonitorError, Result};
use crate::rrd::{RoundRobinStore, RrdFile};
use crate::schema::{EnsureOutcome, SchemaManager, StoreState};
use crate::sensor::{self, SensorClient};
use crate::writer::StoreWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// what one cycle did
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub batch: ReadingBatch,
    /// `None` when the cycle was skipped
    pub outcome: Option<EnsureOutcome>,
    pub row: Option<Vec<f64>>,
}

#[derive(Clone)]
pub struct Monitor {
    config: Arc<MonitorConfig>,
    client: SensorClient,
    schema: Arc<SchemaManager>,
    writer: Arc<StoreWriter>,
}

impl Monitor {
    pub fn new(config: Arc<MonitorConfig>) -> anyhow::Result<Self> {
        Self::with_store(config, Arc::new(RrdFile::new()))
    }

    pub fn with_store(
        config: Arc<MonitorConfig>,
        store: Arc<dyn RoundRobinStore>,
    ) -> anyhow::Result<Self> {
        let client = SensorClient::new(config.http.timeout())?;
        let schema = Arc::new(SchemaManager::from_config(store.clone(), &config));
        let writer = Arc::new(StoreWriter::new(store, config.store.path.clone()));
        Ok(Self { config, client, schema, writer })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// one cycle stamped with the current time
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_at(chrono::Utc::now().timestamp()).await
    }

    pub async fn run_cycle_at(&self, timestamp: i64) -> Result<CycleReport> {
        let batch = sensor::aggregate(&self.client, &self.config.servers).await;
        if batch.is_empty() {
            // an existing store still gets its (all unknown) row so the
            // heartbeat keeps running through the outage
            let schema = self.schema.clone();
            if matches!(blocking(move || schema.state()).await?, StoreState::Absent) {
                warn!("no sensor returned data and no store exists yet, skipping this cycle");
                return Ok(CycleReport { batch, outcome: None, row: None });
            }
            warn!("no sensor returned data, recording an unknown sample");
        }

        let schema = self.schema.clone();
        let ensure_batch = batch.clone();
        let outcome = blocking(move || schema.ensure_store(&ensure_batch, timestamp)).await?;

        let writer = self.writer.clone();
        let write_batch = batch.clone();
        let row = blocking(move || writer.write(&write_batch, timestamp)).await?;

        Ok(CycleReport { batch, outcome: Some(outcome), row: Some(row) })
    }

    /// poll forever. returns only on a fatal store error.
    pub async fn run(&self) -> Result<()> {
        let period = Duration::from_secs(self.config.polling.interval_seconds);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting sensor polling ({}s interval)", period.as_secs());
        loop {
            ticker.tick().await;
            match self.run_cycle().await {
                Ok(report) => log_report(&report),
                Err(e) if e.is_fatal() => {
                    error!("{}", e);
                    return Err(e);
                }
                Err(e) => error!("{} (sample dropped, continuing)", e),
            }
        }
    }
}

fn log_report(report: &CycleReport) {
    match &report.outcome {
        Some(EnsureOutcome::Created(columns)) => info!(?columns, "store created"),
        Some(EnsureOutcome::Migrated { added }) => info!(?added, "store columns added"),
        _ => {}
    }
    if let Some(row) = &report.row {
        info!(series = report.batch.len(), values = ?row, "sample recorded");
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MonitorError::Task(format!("task join error: {}", e)))?
}
