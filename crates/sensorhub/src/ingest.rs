// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingestion sessions.
//!
//! One session per connected sensor. Each inbound data frame is decoded,
//! expanded into metric samples and written to the store, then answered with
//! exactly one acknowledgement (`ok` or `error: ...`). Bad input never closes
//! the session.
//!
//! The frame loop is transport-agnostic: the server feeds it axum WebSocket
//! messages, tests feed it plain streams and channels.

use std::fmt;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{IngestError, TransportClosed};
use crate::keyspace::key_for;
use crate::payload::{decode, expand};
use crate::shutdown;
use crate::store::SharedStore;

/// Transport frame as seen by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Per-message acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    /// Every sample of the reading was written.
    Accepted { points: usize },
    Rejected(IngestError),
}

impl Ack {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted { .. } => f.write_str("ok"),
            Self::Rejected(e) => write!(f, "error: {e}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepting,
    Open,
    Closing,
    Closed,
}

/// Why the frame loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Close frame or end of stream.
    PeerClosed,
    /// Receive error, or the acknowledgement could not be delivered.
    Transport(String),
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::Transport(reason) => write!(f, "transport error: {reason}"),
            Self::Shutdown => f.write_str("server shutdown"),
        }
    }
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub messages: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub points_written: u64,
    pub reason: CloseReason,
}

impl SessionSummary {
    fn record(&mut self, ack: &Ack) {
        self.messages += 1;
        match ack {
            Ack::Accepted { points } => {
                self.accepted += 1;
                self.points_written += *points as u64;
            }
            Ack::Rejected(_) => self.rejected += 1,
        }
    }
}

/// One sensor connection.
pub struct IngestSession {
    store: SharedStore,
    session_id: String,
    state: SessionState,
}

impl IngestSession {
    pub fn new(store: SharedStore) -> Self {
        let session_id = Uuid::new_v4().to_string()[..8].to_string();
        debug!("[{}] Ingest session created", session_id);
        Self {
            store,
            session_id,
            state: SessionState::Accepting,
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Decode one message and write its samples in order.
    ///
    /// Returns the number of points written. A store failure stops at the
    /// failing sample; earlier samples stay written.
    pub async fn ingest(&self, raw: &[u8]) -> Result<usize, IngestError> {
        let reading = decode(raw)?;
        let samples = expand(&reading);
        for sample in &samples {
            let key = key_for(reading.sensor_id, reading.device_id, sample.metric);
            self.store
                .append(&key, sample.timestamp_ms, sample.value)
                .await?;
        }
        Ok(samples.len())
    }

    /// [`ingest`](Self::ingest) folded into an acknowledgement.
    pub async fn process(&self, raw: &[u8]) -> Ack {
        match self.ingest(raw).await {
            Ok(points) => Ack::Accepted { points },
            Err(e) => {
                warn!("[{}] Rejected message: {}", self.session_id, e);
                Ack::Rejected(e)
            }
        }
    }

    /// Run the frame loop until the peer leaves, the transport fails or
    /// shutdown is signalled.
    ///
    /// Shutdown is only observed between messages.
    pub async fn run<S, K, E>(
        mut self,
        mut frames: S,
        mut acks: K,
        mut shutdown: watch::Receiver<bool>,
    ) -> SessionSummary
    where
        S: Stream<Item = Result<Frame, E>> + Unpin,
        E: fmt::Display,
        K: Sink<Frame> + Unpin,
    {
        self.state = SessionState::Open;
        info!("[{}] Sensor connected", self.session_id);

        let mut summary = SessionSummary {
            session_id: self.session_id.clone(),
            messages: 0,
            accepted: 0,
            rejected: 0,
            points_written: 0,
            reason: CloseReason::PeerClosed,
        };

        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = shutdown::signalled(&mut shutdown) => break CloseReason::Shutdown,
                next = frames.next() => next,
            };

            let raw = match next {
                None | Some(Ok(Frame::Close)) => break CloseReason::PeerClosed,
                Some(Err(e)) => break CloseReason::Transport(e.to_string()),
                Some(Ok(Frame::Ping(_) | Frame::Pong(_))) => continue,
                Some(Ok(Frame::Text(text))) => text.into_bytes(),
                Some(Ok(Frame::Binary(bytes))) => bytes,
            };

            let ack = self.process(&raw).await;
            summary.record(&ack);
            if acks.send(Frame::Text(ack.to_string())).await.is_err() {
                break CloseReason::Transport(TransportClosed.to_string());
            }
        };

        self.state = SessionState::Closing;
        let _ = acks.close().await;
        self.state = SessionState::Closed;

        info!(
            "[{}] Session ended ({}): {} messages, {} accepted, {} rejected, {} points",
            self.session_id,
            reason,
            summary.messages,
            summary.accepted,
            summary.rejected,
            summary.points_written
        );
        summary.reason = reason;
        summary
    }
}
