// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series key space.
//!
//! Every stored metric lives under `sensor:<sensor_id>:device:<device_id>:<metric>`.
//! The bootstrap set of series comes from a static [`DeviceTopology`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected key text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid timeseries key `{0}` (expected sensor:<id>:device:<id>:<metric>)")]
pub struct InvalidKey(pub String);

/// Storage key of one series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeseriesKey(String);

/// Components of a [`TimeseriesKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts {
    pub sensor_id: i64,
    pub device_id: i64,
    pub metric: String,
}

impl TimeseriesKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimeseriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TimeseriesKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<KeyParts>().map(|parts| parts.key())
    }
}

impl KeyParts {
    pub fn key(&self) -> TimeseriesKey {
        key_for(self.sensor_id, self.device_id, &self.metric)
    }
}

impl FromStr for KeyParts {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        split_key(s).ok_or_else(|| InvalidKey(s.to_string()))
    }
}

impl TryFrom<String> for TimeseriesKey {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeseriesKey> for String {
    fn from(key: TimeseriesKey) -> Self {
        key.0
    }
}

fn split_key(s: &str) -> Option<KeyParts> {
    let mut fields = s.splitn(5, ':');
    if fields.next()? != "sensor" {
        return None;
    }
    let sensor_id = fields.next()?.parse().ok()?;
    if fields.next()? != "device" {
        return None;
    }
    let device_id = fields.next()?.parse().ok()?;
    let metric = fields.next()?;
    if metric.is_empty() || metric.contains(':') {
        return None;
    }
    Some(KeyParts {
        sensor_id,
        device_id,
        metric: metric.to_string(),
    })
}

/// Storage key for one metric of one sensor on one device.
pub fn key_for(sensor_id: i64, device_id: i64, metric: &str) -> TimeseriesKey {
    TimeseriesKey(format!("sensor:{sensor_id}:device:{device_id}:{metric}"))
}

/// Static device → sensor → metric table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTopology {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub device_id: i64,
    #[serde(default)]
    pub sensors: Vec<SensorEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorEntry {
    pub sensor_id: i64,
    pub metrics: Vec<String>,
}

impl SensorEntry {
    fn new(sensor_id: i64, metric: &str) -> Self {
        Self {
            sensor_id,
            metrics: vec![metric.to_string()],
        }
    }
}

impl Default for DeviceTopology {
    /// Axis unit on device 1, gripper on device 2.
    fn default() -> Self {
        Self {
            devices: vec![
                DeviceEntry {
                    device_id: 1,
                    sensors: vec![
                        SensorEntry::new(1, "position"),
                        SensorEntry::new(2, "speed"),
                        SensorEntry::new(3, "acceleration"),
                        SensorEntry::new(4, "load"),
                    ],
                },
                DeviceEntry {
                    device_id: 2,
                    sensors: vec![
                        SensorEntry::new(7, "grip_force"),
                        SensorEntry::new(8, "distance"),
                    ],
                },
            ],
        }
    }
}

/// Keys to pre-create at startup, in table order, without duplicates.
pub fn known_series(topology: &DeviceTopology) -> Vec<TimeseriesKey> {
    let mut seen = HashSet::new();
    topology
        .devices
        .iter()
        .flat_map(|device| {
            device.sensors.iter().flat_map(move |sensor| {
                sensor
                    .metrics
                    .iter()
                    .map(move |metric| key_for(sensor.sensor_id, device.device_id, metric))
            })
        })
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic() {
        assert_eq!(
            key_for(3, 1, "acceleration").as_str(),
            "sensor:3:device:1:acceleration"
        );
        assert_eq!(key_for(3, 1, "acceleration"), key_for(3, 1, "acceleration"));
    }

    #[test]
    fn parse_roundtrip() {
        let parts: KeyParts = "sensor:8:device:2:distance".parse().unwrap();
        assert_eq!(
            parts,
            KeyParts {
                sensor_id: 8,
                device_id: 2,
                metric: "distance".into()
            }
        );
        assert_eq!(parts.key(), key_for(8, 2, "distance"));
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        for bad in [
            "",
            "sensor:8:device:2",
            "sensor:8:device:2:",
            "sensor:x:device:2:distance",
            "probe:8:device:2:distance",
            "sensor:8:device:2:distance:extra",
        ] {
            assert!(bad.parse::<TimeseriesKey>().is_err(), "{bad}");
        }
    }

    #[test]
    fn default_topology_keys() {
        let keys: Vec<String> = known_series(&DeviceTopology::default())
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            keys,
            [
                "sensor:1:device:1:position",
                "sensor:2:device:1:speed",
                "sensor:3:device:1:acceleration",
                "sensor:4:device:1:load",
                "sensor:7:device:2:grip_force",
                "sensor:8:device:2:distance",
            ]
        );
    }

    #[test]
    fn known_series_skips_duplicates() {
        let topology = DeviceTopology {
            devices: vec![
                DeviceEntry {
                    device_id: 5,
                    sensors: vec![SensorEntry {
                        sensor_id: 1,
                        metrics: vec!["position".into(), "speed".into(), "position".into()],
                    }],
                },
                DeviceEntry {
                    device_id: 5,
                    sensors: vec![SensorEntry::new(1, "speed")],
                },
            ],
        };
        assert_eq!(
            known_series(&topology),
            vec![key_for(1, 5, "position"), key_for(1, 5, "speed")]
        );
    }

    #[test]
    fn topology_from_toml() {
        let topology: DeviceTopology = toml::from_str(
            r#"
            [[devices]]
            device_id = 2
            sensors = [{ sensor_id = 6, metrics = ["distance"] }]
            "#,
        )
        .unwrap();
        assert_eq!(known_series(&topology), vec![key_for(6, 2, "distance")]);
    }
}
