// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SensorHub Server - sensor ingestion over WebSocket.
//!
//! # Usage
//!
//! ```bash
//! # In-memory store on the default port 8000
//! sensorhub-server
//!
//! # Redis TimeSeries backend
//! sensorhub-server --store redis --redis-url redis://127.0.0.1:6379
//!
//! # From a configuration file, overriding the port
//! sensorhub-server --config sensorhub.toml --port 9000
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sensorhub::{open_store, HubConfig, HubServer, StoreBackend};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum BackendArg {
    Memory,
    Redis,
}

impl From<BackendArg> for StoreBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Memory => StoreBackend::Memory,
            BackendArg::Redis => StoreBackend::Redis,
        }
    }
}

/// SensorHub ingestion server
#[derive(Parser, Debug)]
#[command(name = "sensorhub-server")]
#[command(about = "SensorHub - ingest sensor readings into a time-series store")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// HTTP / WebSocket port
    #[arg(short, long)]
    port: Option<u16>,

    /// Time-series backend
    #[arg(long, value_enum)]
    store: Option<BackendArg>,

    /// Redis URL (redis backend)
    #[arg(long)]
    redis_url: Option<String>,

    /// Maximum concurrent sensor connections
    #[arg(long)]
    max_clients: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Command-line values win over the file.
    fn apply(&self, config: &mut HubConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(backend) = self.store {
            config.store.backend = backend.into();
        }
        if let Some(url) = &self.redis_url {
            config.store.redis_url = url.clone();
        }
        if let Some(max_clients) = self.max_clients {
            config.server.max_clients = max_clients;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => HubConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => HubConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("SensorHub server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Store: {}", config.store.backend);
    info!("  Retention: {} ms", config.store.retention_ms);
    info!("  Broadcast period: {} ms", config.broadcast.period_ms);

    let store = open_store(&config.store)
        .await
        .context("Failed to open time-series store")?;

    let hub = HubServer::new(config, store)
        .spawn()
        .await
        .context("Failed to start server")?;
    info!("Listening on {}", hub.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down...");

    hub.shutdown().await?;
    info!("Server stopped");
    Ok(())
}
