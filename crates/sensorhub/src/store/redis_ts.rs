// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Redis TimeSeries backend
//!
//! Talks to a server with the TimeSeries module loaded (`TS.CREATE`, `TS.ADD`,
//! `TS.RANGE`, `TS.GET`) through a deadpool connection pool. Every call,
//! including the pool checkout, is bounded by the operation timeout.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::{FromRedisValue, RedisError, Value};
use tracing::{debug, info};

use super::{DuplicatePolicy, TimeseriesStore};
use crate::error::StoreError;
use crate::keyspace::TimeseriesKey;

/// Redis TimeSeries store.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    default_retention_ms: u64,
    op_timeout: Duration,
}

impl RedisStore {
    /// Build the pool and probe the server with `PING`.
    pub async fn connect(
        url: &str,
        pool_size: usize,
        default_retention_ms: u64,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = Config::from_url(url)
            .builder()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .max_size(pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let store = Self {
            pool,
            default_retention_ms,
            op_timeout,
        };
        let pong: String = store
            .query(&redis::cmd("PING"))
            .await?
            .map_err(unavailable)?;
        debug!(reply = %pong, "redis reachable");
        Ok(store)
    }

    /// Outer error: pool or timeout failure. Inner error: server reply.
    async fn query<T>(&self, cmd: &redis::Cmd) -> Result<Result<T, RedisError>, StoreError>
    where
        T: FromRedisValue + Send,
    {
        let call = async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(cmd.query_async::<T>(&mut *conn).await)
        };
        match tokio::time::timeout(self.op_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "operation timed out after {}ms",
                self.op_timeout.as_millis()
            ))),
        }
    }
}

fn unavailable(e: RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn already_exists(e: &RedisError) -> bool {
    e.to_string().contains("already exists")
}

fn missing_key(e: &RedisError) -> bool {
    e.to_string().contains("does not exist")
}

fn duplicate_rejected(e: &RedisError) -> bool {
    let msg = e.to_string().to_ascii_lowercase();
    msg.contains("duplicate")
}

/// `TS.GET` answers an empty array for a series without samples.
fn parse_latest(reply: Value) -> Result<Option<(i64, f64)>, StoreError> {
    match reply {
        Value::Nil => Ok(None),
        Value::Array(ref items) if items.is_empty() => Ok(None),
        other => redis::from_redis_value::<(i64, f64)>(&other)
            .map(Some)
            .map_err(unavailable),
    }
}

#[async_trait]
impl TimeseriesStore for RedisStore {
    async fn ensure_series(
        &self,
        key: &TimeseriesKey,
        retention_ms: u64,
        policy: DuplicatePolicy,
    ) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("TS.CREATE");
        cmd.arg(key.as_str())
            .arg("RETENTION")
            .arg(retention_ms)
            .arg("DUPLICATE_POLICY")
            .arg(policy.as_redis_arg());

        match self.query::<()>(&cmd).await? {
            Ok(()) => {
                info!(key = %key, retention_ms, "timeseries created");
                Ok(())
            }
            Err(e) if already_exists(&e) => {
                info!(key = %key, "timeseries already exists");
                Ok(())
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn append(
        &self,
        key: &TimeseriesKey,
        timestamp_ms: i64,
        value: f64,
    ) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("TS.ADD");
        cmd.arg(key.as_str())
            .arg(timestamp_ms)
            .arg(value)
            .arg("RETENTION")
            .arg(self.default_retention_ms)
            .arg("DUPLICATE_POLICY")
            .arg(DuplicatePolicy::First.as_redis_arg());

        match self.query::<i64>(&cmd).await? {
            Ok(_) => Ok(()),
            Err(e) if duplicate_rejected(&e) => {
                debug!(key = %key, timestamp_ms, "duplicate timestamp ignored");
                Ok(())
            }
            Err(e) => Err(unavailable(e)),
        }
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
        let mut cmd = redis::cmd("TS.RANGE");
        cmd.arg(key.as_str()).arg(start_ms).arg(end_ms);

        match self.query::<Vec<(i64, f64)>>(&cmd).await? {
            Ok(points) => Ok(points),
            Err(e) if missing_key(&e) => Ok(Vec::new()),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn latest(&self, key: &TimeseriesKey) -> Result<Option<(i64, f64)>, StoreError> {
        let mut cmd = redis::cmd("TS.GET");
        cmd.arg(key.as_str());

        match self.query::<Value>(&cmd).await? {
            Ok(reply) => parse_latest(reply),
            Err(e) if missing_key(&e) => Ok(None),
            Err(e) => Err(unavailable(e)),
        }
    }
}
