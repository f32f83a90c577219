// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SensorHub - streaming sensor ingestion.
//!
//! Sensors push JSON readings over a WebSocket; each reading is validated,
//! flattened into one point per metric and written to a retained time-series
//! store. A broadcaster pushes the latest value of selected series to
//! dashboards at a fixed cadence.
//!
//! # Architecture
//!
//! ```text
//! PublisherClient ──ws──> IngestSession ──decode/expand──> TimeseriesStore
//!                                                               │ latest
//!                              dashboards <──ws── Broadcaster <─┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sensorhub::{HubConfig, HubServer, MemoryStore};
//!
//! # async fn demo() -> std::io::Result<()> {
//! let config = HubConfig::default();
//! let store = Arc::new(MemoryStore::new(config.store.retention_ms));
//! let hub = HubServer::new(config, store).spawn().await?;
//! println!("listening on {}", hub.local_addr());
//! hub.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod ingest;
pub mod keyspace;
pub mod payload;
pub mod protocol;
pub mod publisher;
pub mod server;
pub mod shutdown;
pub mod simulator;
pub mod store;

pub use broadcast::{Broadcaster, ObserverId, ObserverSet, TickReport};
pub use config::{ConfigError, HubConfig, StoreBackend};
pub use error::{DecodeError, IngestError, StoreError, TransportClosed};
pub use ingest::{Ack, CloseReason, Frame, IngestSession, SessionState, SessionSummary};
pub use keyspace::{key_for, known_series, DeviceTopology, KeyParts, TimeseriesKey};
pub use payload::{
    decode, expand, MetricSample, SensorPayload, SensorReading, SensorType, TimestampFormat,
};
pub use publisher::{
    PublisherClient, PublisherConfig, PublisherError, PublisherStats, ReconnectPolicy,
};
pub use server::{HubHandle, HubServer};
pub use simulator::{ReadingSource, Simulator};
pub use store::{
    bootstrap_series, open_store, BootstrapReport, DuplicatePolicy, MemoryStore, RedisStore,
    SharedStore, TimeseriesStore,
};
