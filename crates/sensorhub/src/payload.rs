// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor payload model.
//!
//! Readings arrive as JSON objects discriminated by `sensor_type`:
//!
//! ```json
//! {"sensor_type": "axis", "sensor_id": 3, "device_id": 100,
//!  "timestamp": "2025-07-18T10:30:00Z",
//!  "data": {"position": 100.0, "speed": 5.2, "acceleration": 0.8, "load": 75.5},
//!  "status": "active"}
//! ```
//!
//! [`decode`] validates the envelope and the exact metric set of the sensor
//! type, [`expand`] flattens a reading into one sample per stored metric.
//!
//! Decoding walks a [`serde_json::Value`] rather than deriving an internally
//! tagged enum. A derived `#[serde(tag = "sensor_type")]` error only carries
//! a message, while [`DecodeError::SchemaMismatch`] has to name the field
//! (`data.load`, `timestamp`) and unknown variants need their own kind.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// Status reported when a reading omits it.
pub const DEFAULT_STATUS: &str = "active";

/// Sensor variants understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorType {
    Distance,
    GripForce,
    Axis,
    AirPressure,
}

impl SensorType {
    pub const ALL: [SensorType; 4] = [
        SensorType::Distance,
        SensorType::GripForce,
        SensorType::Axis,
        SensorType::AirPressure,
    ];

    /// Name used in the `sensor_type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Distance => "distance",
            Self::GripForce => "grip_force",
            Self::Axis => "axis",
            Self::AirPressure => "air_pressure",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Exact key set required in the `data` object.
    pub fn data_keys(self) -> &'static [&'static str] {
        match self {
            Self::Distance => &["distance"],
            Self::GripForce => &["force"],
            Self::Axis => &["position", "speed", "acceleration", "load"],
            Self::AirPressure => &["pressure"],
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measured values, one variant per sensor type.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorPayload {
    Distance {
        distance: f64,
    },
    GripForce {
        force: f64,
    },
    Axis {
        position: f64,
        speed: f64,
        acceleration: f64,
        load: f64,
    },
    AirPressure {
        pressure: f64,
    },
}

impl SensorPayload {
    pub fn sensor_type(&self) -> SensorType {
        match self {
            Self::Distance { .. } => SensorType::Distance,
            Self::GripForce { .. } => SensorType::GripForce,
            Self::Axis { .. } => SensorType::Axis,
            Self::AirPressure { .. } => SensorType::AirPressure,
        }
    }

    /// Values keyed by their `data` field names, in declaration order.
    pub fn data_values(&self) -> Vec<(&'static str, f64)> {
        match *self {
            Self::Distance { distance } => vec![("distance", distance)],
            Self::GripForce { force } => vec![("force", force)],
            Self::Axis {
                position,
                speed,
                acceleration,
                load,
            } => vec![
                ("position", position),
                ("speed", speed),
                ("acceleration", acceleration),
                ("load", load),
            ],
            Self::AirPressure { pressure } => vec![("pressure", pressure)],
        }
    }

    /// Values keyed by the metric name of the series they are stored in.
    ///
    /// Grip force is stored under `grip_force`; every other metric keeps its
    /// `data` field name.
    pub fn series_values(&self) -> Vec<(&'static str, f64)> {
        match *self {
            Self::GripForce { force } => vec![("grip_force", force)],
            _ => self.data_values(),
        }
    }

    fn from_data(sensor_type: SensorType, data: &Map<String, Value>) -> Result<Self, DecodeError> {
        let expected = sensor_type.data_keys();
        if let Some(extra) = data.keys().find(|k| !expected.contains(&k.as_str())) {
            return Err(DecodeError::mismatch(
                format!("data.{extra}"),
                format!(
                    "unexpected metric for {sensor_type} (expected {})",
                    expected.join(", ")
                ),
            ));
        }

        let payload = match sensor_type {
            SensorType::Distance => Self::Distance {
                distance: metric(data, "distance")?,
            },
            SensorType::GripForce => Self::GripForce {
                force: metric(data, "force")?,
            },
            SensorType::Axis => Self::Axis {
                position: metric(data, "position")?,
                speed: metric(data, "speed")?,
                acceleration: metric(data, "acceleration")?,
                load: metric(data, "load")?,
            },
            SensorType::AirPressure => Self::AirPressure {
                pressure: metric(data, "pressure")?,
            },
        };
        Ok(payload)
    }
}

/// A decoded sensor measurement event.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub sensor_id: i64,
    pub device_id: i64,
    /// Normalized timestamp, epoch milliseconds.
    pub timestamp_ms: i64,
    pub status: String,
    pub payload: SensorPayload,
}

impl SensorReading {
    pub fn sensor_type(&self) -> SensorType {
        self.payload.sensor_type()
    }

    /// Encode back to the wire representation.
    pub fn to_json(&self, format: TimestampFormat) -> Value {
        let data: Map<String, Value> = self
            .payload
            .data_values()
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::from(v)))
            .collect();

        let timestamp = match format {
            TimestampFormat::Iso => format_iso8601(self.timestamp_ms)
                .map(Value::String)
                .unwrap_or_else(|| Value::from(self.timestamp_ms)),
            TimestampFormat::Epoch => Value::from(self.timestamp_ms),
        };

        serde_json::json!({
            "sensor_type": self.sensor_type().as_str(),
            "sensor_id": self.sensor_id,
            "device_id": self.device_id,
            "timestamp": timestamp,
            "data": data,
            "status": self.status,
        })
    }
}

/// Outgoing timestamp encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    /// RFC 3339 string in UTC with millisecond precision.
    #[default]
    Iso,
    /// Integer epoch milliseconds.
    Epoch,
}

/// One stored value produced from a reading.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub metric: &'static str,
    pub value: f64,
    pub timestamp_ms: i64,
}

/// Decode and validate one raw inbound message.
pub fn decode(raw: &[u8]) -> Result<SensorReading, DecodeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| DecodeError::MalformedSyntax(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(DecodeError::MalformedSyntax(
            "expected a JSON object".to_string(),
        ));
    };

    let sensor_type = match obj.get("sensor_type") {
        Some(Value::String(name)) => SensorType::from_wire(name)
            .ok_or_else(|| DecodeError::UnknownVariant(name.clone()))?,
        Some(_) => return Err(DecodeError::mismatch("sensor_type", "expected a string")),
        None => return Err(DecodeError::mismatch("sensor_type", "missing field")),
    };

    let sensor_id = integer_field(&obj, "sensor_id")?;
    let device_id = integer_field(&obj, "device_id")?;

    let timestamp_ms = match obj.get("timestamp") {
        Some(Value::String(text)) => parse_timestamp_ms(text).ok_or_else(|| {
            DecodeError::mismatch("timestamp", format!("`{text}` is not an ISO-8601 timestamp"))
        })?,
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
            DecodeError::mismatch("timestamp", "epoch milliseconds must be an integer")
        })?,
        Some(_) => {
            return Err(DecodeError::mismatch(
                "timestamp",
                "expected an ISO-8601 string or epoch milliseconds",
            ))
        }
        None => return Err(DecodeError::mismatch("timestamp", "missing field")),
    };

    let status = match obj.get("status") {
        None => DEFAULT_STATUS.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(DecodeError::mismatch("status", "expected a string")),
    };

    let data = match obj.get("data") {
        Some(Value::Object(map)) => map,
        Some(_) => return Err(DecodeError::mismatch("data", "expected an object")),
        None => return Err(DecodeError::mismatch("data", "missing field")),
    };

    let payload = SensorPayload::from_data(sensor_type, data)?;

    Ok(SensorReading {
        sensor_id,
        device_id,
        timestamp_ms,
        status,
        payload,
    })
}

/// Flatten a reading into one sample per stored metric.
///
/// Axis readings always yield position, speed, acceleration, load in that order.
pub fn expand(reading: &SensorReading) -> Vec<MetricSample> {
    reading
        .payload
        .series_values()
        .into_iter()
        .map(|(metric, value)| MetricSample {
            metric,
            value,
            timestamp_ms: reading.timestamp_ms,
        })
        .collect()
}

/// Parse an ISO-8601 timestamp into epoch milliseconds.
///
/// A timestamp without an explicit offset is taken as UTC.
pub fn parse_timestamp_ms(text: &str) -> Option<i64> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(dt.timestamp_millis());
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

fn format_iso8601(timestamp_ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, false))
}

fn integer_field(obj: &Map<String, Value>, name: &str) -> Result<i64, DecodeError> {
    match obj.get(name) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| DecodeError::mismatch(name, "expected an integer")),
        Some(_) => Err(DecodeError::mismatch(name, "expected an integer")),
        None => Err(DecodeError::mismatch(name, "missing field")),
    }
}

fn metric(data: &Map<String, Value>, key: &str) -> Result<f64, DecodeError> {
    match data.get(key) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| DecodeError::mismatch(format!("data.{key}"), "expected a number")),
        Some(_) => Err(DecodeError::mismatch(
            format!("data.{key}"),
            "expected a number",
        )),
        None => Err(DecodeError::mismatch(format!("data.{key}"), "missing metric")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-07-18T10:30:00Z
    const T: i64 = 1_752_834_600_000;

    fn axis_json() -> &'static str {
        r#"{"sensor_type": "axis", "sensor_id": 3, "device_id": 100,
            "timestamp": "2025-07-18T10:30:00Z",
            "data": {"load": 75.5, "speed": 5.2, "position": 100.0, "acceleration": 0.8},
            "status": "active"}"#
    }

    #[test]
    fn decode_distance() {
        let raw = r#"{"sensor_type": "distance", "sensor_id": 1, "device_id": 100,
                      "timestamp": "2025-07-18T10:30:00Z", "data": {"distance": 15.5}}"#;
        let reading = decode(raw.as_bytes()).unwrap();

        assert_eq!(reading.sensor_id, 1);
        assert_eq!(reading.device_id, 100);
        assert_eq!(reading.timestamp_ms, T);
        assert_eq!(reading.status, DEFAULT_STATUS);
        assert_eq!(reading.payload, SensorPayload::Distance { distance: 15.5 });
    }

    #[test]
    fn axis_expands_in_declared_order() {
        let reading = decode(axis_json().as_bytes()).unwrap();
        let samples = expand(&reading);

        let metrics: Vec<_> = samples.iter().map(|s| s.metric).collect();
        assert_eq!(metrics, ["position", "speed", "acceleration", "load"]);
        let values: Vec<_> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, [100.0, 5.2, 0.8, 75.5]);
        assert!(samples.iter().all(|s| s.timestamp_ms == T));
    }

    #[test]
    fn single_metric_variants_expand_to_one_sample() {
        let cases = [
            ("grip_force", r#"{"force": 25.3}"#, "grip_force"),
            ("air_pressure", r#"{"pressure": 1013.25}"#, "pressure"),
            ("distance", r#"{"distance": 4}"#, "distance"),
        ];
        for (sensor_type, data, metric) in cases {
            let raw = format!(
                r#"{{"sensor_type": "{sensor_type}", "sensor_id": 2, "device_id": 100,
                    "timestamp": 1000, "data": {data}}}"#
            );
            let samples = expand(&decode(raw.as_bytes()).unwrap());
            assert_eq!(samples.len(), 1, "{sensor_type}");
            assert_eq!(samples[0].metric, metric);
            assert_eq!(samples[0].timestamp_ms, 1000);
        }
    }

    #[test]
    fn missing_metric_is_schema_mismatch() {
        let raw = r#"{"sensor_type": "axis", "sensor_id": 3, "device_id": 1,
                      "timestamp": 1, "data": {"position": 1.0, "speed": 2.0, "load": 3.0}}"#;
        let err = decode(raw.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), "schema_mismatch");
        assert_eq!(err.field(), Some("data.acceleration"));
    }

    #[test]
    fn foreign_metric_is_schema_mismatch() {
        let raw = r#"{"sensor_type": "grip_force", "sensor_id": 7, "device_id": 2,
                      "timestamp": 1, "data": {"distance": 15.5}}"#;
        let err = decode(raw.as_bytes()).unwrap_err();
        assert_eq!(err.field(), Some("data.distance"));

        let raw = r#"{"sensor_type": "distance", "sensor_id": 8, "device_id": 2,
                      "timestamp": 1, "data": {"distance": 1.0, "force": 2.0}}"#;
        let err = decode(raw.as_bytes()).unwrap_err();
        assert_eq!(err.field(), Some("data.force"));
    }

    #[test]
    fn non_numeric_metric_is_schema_mismatch() {
        let raw = r#"{"sensor_type": "distance", "sensor_id": 8, "device_id": 2,
                      "timestamp": 1, "data": {"distance": "far"}}"#;
        let err = decode(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::SchemaMismatch { .. }));
        assert_eq!(err.field(), Some("data.distance"));
    }

    #[test]
    fn data_must_be_an_object() {
        let raw = r#"{"sensor_type": "distance", "sensor_id": 6, "device_id": 2,
                      "timestamp": 1, "data": 15.5}"#;
        let err = decode(raw.as_bytes()).unwrap_err();
        assert_eq!(err.field(), Some("data"));
    }

    #[test]
    fn unknown_sensor_type() {
        let raw = r#"{"sensor_type": "temperature", "sensor_id": 1, "device_id": 1,
                      "timestamp": 1, "data": {"celsius": 21.0}}"#;
        assert_eq!(
            decode(raw.as_bytes()).unwrap_err(),
            DecodeError::UnknownVariant("temperature".into())
        );
    }

    #[test]
    fn malformed_input() {
        assert!(matches!(
            decode(b"{not json"),
            Err(DecodeError::MalformedSyntax(_))
        ));
        assert!(matches!(
            decode(b"[1, 2, 3]"),
            Err(DecodeError::MalformedSyntax(_))
        ));
    }

    #[test]
    fn envelope_fields_are_typed() {
        let raw = r#"{"sensor_type": "distance", "sensor_id": "one", "device_id": 1,
                      "timestamp": 1, "data": {"distance": 1.0}}"#;
        assert_eq!(decode(raw.as_bytes()).unwrap_err().field(), Some("sensor_id"));

        let raw = r#"{"sensor_type": "distance", "sensor_id": 1,
                      "timestamp": 1, "data": {"distance": 1.0}}"#;
        assert_eq!(decode(raw.as_bytes()).unwrap_err().field(), Some("device_id"));

        let raw = r#"{"sensor_type": "distance", "sensor_id": 1, "device_id": 1,
                      "timestamp": 1, "data": {"distance": 1.0}, "status": 3}"#;
        assert_eq!(decode(raw.as_bytes()).unwrap_err().field(), Some("status"));
    }

    #[test]
    fn timestamp_normalization() {
        assert_eq!(parse_timestamp_ms("2025-07-18T10:30:00Z"), Some(T));
        assert_eq!(parse_timestamp_ms("2025-07-18T10:30:00+00:00"), Some(T));
        assert_eq!(parse_timestamp_ms("2025-07-18T12:30:00+02:00"), Some(T));
        assert_eq!(parse_timestamp_ms("2025-07-18T10:30:00"), Some(T));
        assert_eq!(parse_timestamp_ms("2025-07-18 10:30:00"), Some(T));
        assert_eq!(
            parse_timestamp_ms("2025-07-22T02:40:06.870829+00:00"),
            Some(1_753_152_006_870)
        );
        assert_eq!(parse_timestamp_ms("yesterday"), None);
    }

    #[test]
    fn epoch_timestamp_is_not_rescaled() {
        let raw = r#"{"sensor_type": "distance", "sensor_id": 6, "device_id": 2,
                      "timestamp": 1753152006870, "data": {"distance": 1.0}}"#;
        assert_eq!(decode(raw.as_bytes()).unwrap().timestamp_ms, 1_753_152_006_870);

        let raw = r#"{"sensor_type": "distance", "sensor_id": 6, "device_id": 2,
                      "timestamp": 1753152006.87, "data": {"distance": 1.0}}"#;
        assert_eq!(decode(raw.as_bytes()).unwrap_err().field(), Some("timestamp"));
    }

    #[test]
    fn wire_encoding_decodes_to_same_reading() {
        let reading = decode(axis_json().as_bytes()).unwrap();
        for format in [TimestampFormat::Iso, TimestampFormat::Epoch] {
            let encoded = reading.to_json(format).to_string();
            assert_eq!(decode(encoded.as_bytes()).unwrap(), reading);
        }
        assert_eq!(
            reading.to_json(TimestampFormat::Iso)["timestamp"],
            "2025-07-18T10:30:00.000+00:00"
        );
    }
}
