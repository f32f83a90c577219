// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory time-series backend
//!
//! One ordered point map per key inside a sharded [`DashMap`]: writers to
//! different keys never contend on a global lock, and the duplicate check and
//! the insert happen under the same shard lock.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as SeriesEntry;
use dashmap::DashMap;
use tracing::debug;

use super::{DuplicatePolicy, TimeseriesStore, DEFAULT_RETENTION_MS};
use crate::error::StoreError;
use crate::keyspace::TimeseriesKey;

#[derive(Debug)]
struct Series {
    /// 0 = unlimited.
    retention_ms: u64,
    policy: DuplicatePolicy,
    points: BTreeMap<i64, f64>,
}

impl Series {
    fn new(retention_ms: u64, policy: DuplicatePolicy) -> Self {
        Self {
            retention_ms,
            policy,
            points: BTreeMap::new(),
        }
    }

    /// Returns false when the write was discarded as a duplicate.
    fn insert(&mut self, timestamp_ms: i64, value: f64) -> bool {
        let stored = match (self.points.entry(timestamp_ms), self.policy) {
            (Entry::Vacant(slot), _) => {
                slot.insert(value);
                true
            }
            (Entry::Occupied(mut slot), DuplicatePolicy::Last) => {
                slot.insert(value);
                true
            }
            (Entry::Occupied(_), DuplicatePolicy::First) => false,
        };
        self.trim();
        stored
    }

    /// Drop points older than the newest point minus the retention window.
    fn trim(&mut self) {
        if self.retention_ms == 0 {
            return;
        }
        let Some((&newest, _)) = self.points.last_key_value() else {
            return;
        };
        let window = i64::try_from(self.retention_ms).unwrap_or(i64::MAX);
        let cutoff = newest.saturating_sub(window);
        self.points = self.points.split_off(&cutoff);
    }
}

/// In-process store, suitable for tests and single-node deployments.
#[derive(Debug)]
pub struct MemoryStore {
    series: DashMap<TimeseriesKey, Series>,
    default_retention_ms: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_MS)
    }
}

impl MemoryStore {
    /// `default_retention_ms` applies to series created lazily by `append`.
    pub fn new(default_retention_ms: u64) -> Self {
        Self {
            series: DashMap::new(),
            default_retention_ms,
        }
    }

    /// Whether the series exists.
    pub fn contains(&self, key: &TimeseriesKey) -> bool {
        self.series.contains_key(key)
    }

    /// Number of retained points in the series.
    pub fn point_count(&self, key: &TimeseriesKey) -> usize {
        self.series.get(key).map_or(0, |s| s.points.len())
    }
}

#[async_trait]
impl TimeseriesStore for MemoryStore {
    async fn ensure_series(
        &self,
        key: &TimeseriesKey,
        retention_ms: u64,
        policy: DuplicatePolicy,
    ) -> Result<(), StoreError> {
        match self.series.entry(key.clone()) {
            SeriesEntry::Occupied(_) => {
                debug!(key = %key, "timeseries already exists");
            }
            SeriesEntry::Vacant(slot) => {
                slot.insert(Series::new(retention_ms, policy));
                debug!(key = %key, retention_ms, ?policy, "timeseries created");
            }
        }
        Ok(())
    }

    async fn append(
        &self,
        key: &TimeseriesKey,
        timestamp_ms: i64,
        value: f64,
    ) -> Result<(), StoreError> {
        let mut series = self
            .series
            .entry(key.clone())
            .or_insert_with(|| Series::new(self.default_retention_ms, DuplicatePolicy::First));
        if !series.insert(timestamp_ms, value) {
            debug!(key = %key, timestamp_ms, "duplicate timestamp ignored");
        }
        Ok(())
    }

    async fn range(
        &self,
        key: &TimeseriesKey,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        if start_ms > end_ms {
            return Ok(Vec::new());
        }
        Ok(self
            .series
            .get(key)
            .map(|s| {
                s.points
                    .range(start_ms..=end_ms)
                    .map(|(&ts, &v)| (ts, v))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest(&self, key: &TimeseriesKey) -> Result<Option<(i64, f64)>, StoreError> {
        Ok(self
            .series
            .get(key)
            .and_then(|s| s.points.last_key_value().map(|(&ts, &v)| (ts, v))))
    }
}
