// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SensorHub Simulator - publish synthetic sensor readings.
//!
//! # Usage
//!
//! ```bash
//! # Distance sensor 8 on device 2, one reading per second
//! sensorhub-sim
//!
//! # Axis sensor with epoch timestamps, 10 Hz
//! sensorhub-sim --sensor-type axis --sensor-id 1 --device-id 1 \
//!     --interval-ms 100 --timestamp epoch
//! ```

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use sensorhub::{
    shutdown, PublisherClient, PublisherConfig, ReconnectPolicy, SensorType, Simulator,
    TimestampFormat,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum SensorKind {
    Distance,
    GripForce,
    Axis,
    AirPressure,
}

impl From<SensorKind> for SensorType {
    fn from(kind: SensorKind) -> Self {
        match kind {
            SensorKind::Distance => SensorType::Distance,
            SensorKind::GripForce => SensorType::GripForce,
            SensorKind::Axis => SensorType::Axis,
            SensorKind::AirPressure => SensorType::AirPressure,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum TimestampArg {
    Iso,
    Epoch,
}

/// SensorHub sensor simulator
#[derive(Parser, Debug)]
#[command(name = "sensorhub-sim")]
#[command(about = "Publish simulated sensor readings to a SensorHub server")]
#[command(version)]
struct Args {
    /// Ingestion endpoint
    #[arg(short, long, default_value = "ws://127.0.0.1:8000/ws")]
    url: String,

    /// Simulated sensor type
    #[arg(short = 't', long, value_enum, default_value_t = SensorKind::Distance)]
    sensor_type: SensorKind,

    /// Sensor ID
    #[arg(short, long, default_value_t = 8)]
    sensor_id: i64,

    /// Device ID
    #[arg(short, long, default_value_t = 2)]
    device_id: i64,

    /// Delay between readings (ms)
    #[arg(short, long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: u64,

    /// Acknowledgement timeout (ms)
    #[arg(long, default_value_t = 5000)]
    ack_timeout_ms: u64,

    /// Timestamp encoding
    #[arg(long, value_enum, default_value_t = TimestampArg::Iso)]
    timestamp: TimestampArg,

    /// Reconnect attempts after the first failed connection, before giving up
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    /// First reconnect delay (ms)
    #[arg(long, default_value_t = 1000)]
    initial_backoff_ms: u64,

    /// Reconnect delay cap (ms)
    #[arg(long, default_value_t = 60_000)]
    max_backoff_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            url: self.url.clone(),
            interval: Duration::from_millis(self.interval_ms),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            timestamp_format: match self.timestamp {
                TimestampArg::Iso => TimestampFormat::Iso,
                TimestampArg::Epoch => TimestampFormat::Epoch,
            },
            policy: ReconnectPolicy {
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                max_retries: self.max_retries,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let sensor_type = SensorType::from(args.sensor_type);
    info!("SensorHub simulator v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "  Sensor: {} {} on device {}",
        sensor_type, args.sensor_id, args.device_id
    );
    info!("  Server: {}", args.url);

    let (stop, stop_rx) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping...");
            let _ = stop.send(true);
        }
    });

    let simulator = Simulator::new(sensor_type, args.sensor_id, args.device_id);
    let mut client = PublisherClient::new(args.publisher_config(), simulator);
    let result = client.run(stop_rx).await;

    let stats = client.stats();
    info!(
        "Sent {} readings ({} ok, {} rejected) over {} connections",
        stats.sent, stats.acked_ok, stats.acked_error, stats.connections
    );

    if let Err(e) = &result {
        error!("{}", e);
    }
    Ok(result?)
}
