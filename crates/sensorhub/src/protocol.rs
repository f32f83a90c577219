// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON messages sent to dashboards and HTTP clients.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::keyspace::TimeseriesKey;

/// One broadcast tick for one key
///
/// ```text
/// [1752834600000, "15.5"]      latest point
/// null                         key never written
/// {"error": "store unavailable: ..."}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TickMessage {
    /// Timestamp (ms) and value rendered as a string.
    Point(i64, String),
    Error { error: String },
    Empty,
}

impl TickMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }
}

impl From<Result<Option<(i64, f64)>, StoreError>> for TickMessage {
    fn from(latest: Result<Option<(i64, f64)>, StoreError>) -> Self {
        match latest {
            Ok(Some((ts, value))) => Self::Point(ts, value.to_string()),
            Ok(None) => Self::Empty,
            Err(e) => Self::Error {
                error: e.to_string(),
            },
        }
    }
}

/// `GET /data/:sensor_id/:device_id/:metric` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeResponse {
    pub start: i64,
    pub end: i64,
    pub key: TimeseriesKey,
    pub data: Vec<(i64, f64)>,
}

/// `GET /health` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub clients: usize,
    pub observers: usize,
}

/// Error body of failed HTTP requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
