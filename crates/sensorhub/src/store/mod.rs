// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series store abstraction
//!
//! Defines the trait for retained time-series backends (in-memory, Redis
//! TimeSeries) and the startup bootstrap pass.

pub mod memory;
pub mod redis_ts;

pub use memory::MemoryStore;
pub use redis_ts::RedisStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::keyspace::TimeseriesKey;

/// Default retention window (10 minutes).
pub const DEFAULT_RETENTION_MS: u64 = 600_000;

/// Conflict rule for two writes at the same key and timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the first value; later writes are discarded.
    #[default]
    First,
    /// Overwrite with the latest value.
    Last,
}

impl DuplicatePolicy {
    pub fn as_redis_arg(self) -> &'static str {
        match self {
            Self::First => "FIRST",
            Self::Last => "LAST",
        }
    }
}

/// Retained time-series store
///
/// Backend-agnostic interface shared by ingestion sessions, the broadcaster and
/// the range endpoint. Implementations must be safe under concurrent calls.
///
/// # Implementations
///
/// - `MemoryStore` -- in-process, sharded per key
/// - `RedisStore` -- Redis TimeSeries module
#[async_trait]
pub trait TimeseriesStore: Send + Sync {
    /// Create the series if absent. An existing series is not an error.
    async fn ensure_series(
        &self,
        key: &TimeseriesKey,
        retention_ms: u64,
        policy: DuplicatePolicy,
    ) -> Result<(), StoreError>;

    /// Write one point. A missing series is created with the store defaults;
    /// a write at an already recorded timestamp follows the series policy and
    /// never fails the caller.
    async fn append(
        &self,
        key: &TimeseriesKey,
        timestamp_ms: i64,
        value: f64,
    ) -> Result<(), StoreError>;

    /// Points in `[start_ms, end_ms]`, ascending by timestamp.
    async fn range(
        &self,
        key: &TimeseriesKey,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<(i64, f64)>, StoreError>;

    /// Most recent point, `None` if the key was never written.
    async fn latest(&self, key: &TimeseriesKey) -> Result<Option<(i64, f64)>, StoreError>;
}

/// Store handle shared across tasks.
pub type SharedStore = Arc<dyn TimeseriesStore>;

/// Open the backend selected by the configuration.
pub async fn open_store(config: &StoreConfig) -> Result<SharedStore, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            info!(retention_ms = config.retention_ms, "using in-memory store");
            Ok(Arc::new(MemoryStore::new(config.retention_ms)))
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect(
                &config.redis_url,
                config.pool_size,
                config.retention_ms,
                Duration::from_millis(config.op_timeout_ms),
            )
            .await?;
            info!(url = %config.redis_url, retention_ms = config.retention_ms, "using redis timeseries store");
            Ok(Arc::new(store))
        }
    }
}

/// Outcome of [`bootstrap_series`].
#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub ensured: usize,
    pub failed: Vec<(TimeseriesKey, StoreError)>,
}

/// Pre-create every key with first-wins semantics.
///
/// A failing key is logged and skipped; the pass always completes.
pub async fn bootstrap_series(
    store: &dyn TimeseriesStore,
    keys: &[TimeseriesKey],
    retention_ms: u64,
) -> BootstrapReport {
    let mut report = BootstrapReport::default();
    for key in keys {
        match store
            .ensure_series(key, retention_ms, DuplicatePolicy::First)
            .await
        {
            Ok(()) => report.ensured += 1,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to create timeseries");
                report.failed.push((key.clone(), e));
            }
        }
    }
    info!(
        ensured = report.ensured,
        failed = report.failed.len(),
        "timeseries bootstrap complete"
    );
    report
}
