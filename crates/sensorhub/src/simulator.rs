// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Synthetic sensor readings.
//!
//! Every simulated sensor follows the same periodic step signal, locked to
//! wall-clock time so several simulators stay in phase:
//!
//! ```text
//!  50 ─────┐                 ┌───────────────────────────── 50
//!          ╲                 ╱
//!   5       └───────────────┘
//!     0s   5s 6s          11s 12s                        30s
//! ```

use std::f64::consts::PI;

use chrono::Utc;

use crate::payload::{SensorPayload, SensorReading, SensorType, DEFAULT_STATUS};

/// Length of one signal cycle.
pub const CYCLE_MS: i64 = 30_000;

const HIGH: f64 = 50.0;
const LOW: f64 = 5.0;

/// Finite-difference step for derived axis metrics.
const STEP_MS: i64 = 50;

/// Produces the next reading to publish.
pub trait ReadingSource: Send {
    fn next_reading(&mut self) -> SensorReading;
}

/// Value of the step signal at `timestamp_ms`.
pub fn step_signal(timestamp_ms: i64) -> f64 {
    let t = timestamp_ms.rem_euclid(CYCLE_MS);
    match t {
        0..=4_999 => HIGH,
        5_000..=5_999 => ease(HIGH, LOW, (t - 5_000) as f64 / 1_000.0),
        6_000..=10_999 => LOW,
        11_000..=11_999 => ease(LOW, HIGH, (t - 11_000) as f64 / 1_000.0),
        _ => HIGH,
    }
}

/// Cosine interpolation, `progress` in `[0, 1)`.
fn ease(from: f64, to: f64, progress: f64) -> f64 {
    let smooth = (1.0 - (progress * PI).cos()) / 2.0;
    from + (to - from) * smooth
}

/// Signal slope in units per second.
fn slope(f: impl Fn(i64) -> f64, timestamp_ms: i64) -> f64 {
    (f(timestamp_ms) - f(timestamp_ms - STEP_MS)) * 1_000.0 / STEP_MS as f64
}

/// Simulated sensor of any type.
#[derive(Debug, Clone)]
pub struct Simulator {
    pub sensor_type: SensorType,
    pub sensor_id: i64,
    pub device_id: i64,
}

impl Simulator {
    pub fn new(sensor_type: SensorType, sensor_id: i64, device_id: i64) -> Self {
        Self {
            sensor_type,
            sensor_id,
            device_id,
        }
    }

    /// Reading this sensor reports at `timestamp_ms`.
    pub fn reading_at(&self, timestamp_ms: i64) -> SensorReading {
        let value = step_signal(timestamp_ms);
        let payload = match self.sensor_type {
            SensorType::Distance => SensorPayload::Distance { distance: value },
            SensorType::GripForce => SensorPayload::GripForce { force: value },
            SensorType::AirPressure => SensorPayload::AirPressure { pressure: value },
            SensorType::Axis => {
                let speed = slope(step_signal, timestamp_ms);
                let acceleration = slope(|ts| slope(step_signal, ts), timestamp_ms);
                SensorPayload::Axis {
                    position: value,
                    speed,
                    acceleration,
                    load: 20.0 + value * 0.5 + acceleration.abs() * 0.01,
                }
            }
        };
        SensorReading {
            sensor_id: self.sensor_id,
            device_id: self.device_id,
            timestamp_ms,
            status: DEFAULT_STATUS.to_string(),
            payload,
        }
    }
}

impl ReadingSource for Simulator {
    fn next_reading(&mut self) -> SensorReading {
        self.reading_at(Utc::now().timestamp_millis())
    }
}
