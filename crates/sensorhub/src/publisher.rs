// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconnecting publisher client.
//!
//! Connects to the ingestion endpoint, sends one reading per interval and
//! waits for each acknowledgement. A lost connection is retried with
//! exponential backoff plus jitter; the retry budget resets after every
//! successful connect.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::payload::TimestampFormat;
use crate::shutdown;
use crate::simulator::ReadingSource;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Publisher failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublisherError {
    #[error("giving up after {attempts} consecutive connection attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("invalid server url `{0}`")]
    InvalidUrl(String),

    #[error("publish interval must be greater than zero")]
    ZeroInterval,
}

/// Exponential backoff with a bounded retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Failed attempts tolerated after the first one.
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

impl ReconnectPolicy {
    /// `min(initial * 2^retry_count, max)`, saturating.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        2u32.checked_pow(retry_count)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    /// Backoff plus a uniform 10-50% jitter.
    pub fn jittered<R: Rng + ?Sized>(&self, retry_count: u32, rng: &mut R) -> Duration {
        let base = self.backoff(retry_count);
        base + base.mul_f64(rng.gen_range(0.1..=0.5))
    }
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Ingestion endpoint, `ws://` or `wss://`.
    pub url: String,
    /// Delay between two readings.
    pub interval: Duration,
    /// Longest wait for the acknowledgement of one reading.
    pub ack_timeout: Duration,
    pub timestamp_format: TimestampFormat,
    pub policy: ReconnectPolicy,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".to_string(),
            interval: Duration::from_secs(1),
            ack_timeout: Duration::from_secs(5),
            timestamp_format: TimestampFormat::Iso,
            policy: ReconnectPolicy::default(),
        }
    }
}

/// Counters over the client lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub connections: u32,
    pub sent: u64,
    pub acked_ok: u64,
    pub acked_error: u64,
}

/// How a connected phase ended.
enum Disconnect {
    Shutdown,
    Lost(String),
}

/// WebSocket publisher driving one [`ReadingSource`].
pub struct PublisherClient<S> {
    config: PublisherConfig,
    source: S,
    stats: PublisherStats,
}

impl<S: ReadingSource> PublisherClient<S> {
    pub fn new(config: PublisherConfig, source: S) -> Self {
        Self {
            config,
            source,
            stats: PublisherStats::default(),
        }
    }

    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }

    /// Publish until shutdown, or until the retry budget is spent.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PublisherError> {
        let url = self.config.url.clone();
        if !(url.starts_with("ws://") || url.starts_with("wss://"))
            || url.as_str().into_client_request().is_err()
        {
            return Err(PublisherError::InvalidUrl(url));
        }
        if self.config.interval.is_zero() {
            return Err(PublisherError::ZeroInterval);
        }

        let policy = self.config.policy;
        let mut retry_count: u32 = 0;

        loop {
            info!(
                "Connecting to {} (attempt {}/{})",
                url,
                retry_count + 1,
                policy.max_retries + 1
            );
            let connected = tokio::select! {
                biased;
                _ = shutdown::signalled(&mut shutdown) => return Ok(()),
                res = connect_async(url.as_str()) => res,
            };

            match connected {
                Ok((ws, _)) => {
                    info!("Connected to {}", url);
                    retry_count = 0;
                    self.stats.connections += 1;
                    match self.publish(ws, &mut shutdown).await {
                        Disconnect::Shutdown => return Ok(()),
                        Disconnect::Lost(reason) => warn!("Connection lost: {}", reason),
                    }
                }
                Err(e) => warn!("Connection failed: {}", e),
            }

            if retry_count >= policy.max_retries {
                error!("Max retries ({}) reached, giving up", policy.max_retries);
                return Err(PublisherError::RetriesExhausted {
                    attempts: retry_count + 1,
                });
            }

            let delay = {
                let mut rng = rand::thread_rng();
                policy.jittered(retry_count, &mut rng)
            };
            info!("Retrying in {:.2}s", delay.as_secs_f64());
            tokio::select! {
                biased;
                _ = shutdown::signalled(&mut shutdown) => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
            retry_count += 1;
        }
    }

    /// Send one reading per interval over an open connection.
    async fn publish(&mut self, ws: WsStream, shutdown: &mut watch::Receiver<bool>) -> Disconnect {
        let (mut tx, mut rx) = ws.split();
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown::signalled(shutdown) => {
                    let _ = tx.send(Message::Close(None)).await;
                    return Disconnect::Shutdown;
                }
                _ = ticker.tick() => {}
            }

            let reading = self.source.next_reading();
            let text = reading.to_json(self.config.timestamp_format).to_string();
            if let Err(e) = tx.send(Message::Text(text)).await {
                return Disconnect::Lost(e.to_string());
            }
            self.stats.sent += 1;
            debug!(
                ">>> {} sensor {} device {}",
                reading.sensor_type(),
                reading.sensor_id,
                reading.device_id
            );

            let ack = tokio::select! {
                biased;
                _ = shutdown::signalled(shutdown) => return Disconnect::Shutdown,
                ack = tokio::time::timeout(self.config.ack_timeout, next_text(&mut rx)) => ack,
            };
            match ack {
                Ok(Ok(ack)) if ack == "ok" => {
                    self.stats.acked_ok += 1;
                    debug!("<<< {}", ack);
                }
                Ok(Ok(ack)) => {
                    self.stats.acked_error += 1;
                    warn!("Server rejected reading: {}", ack);
                }
                Ok(Err(reason)) => return Disconnect::Lost(reason),
                Err(_) => {
                    return Disconnect::Lost(format!(
                        "no acknowledgement within {}ms",
                        self.config.ack_timeout.as_millis()
                    ))
                }
            }
        }
    }
}

/// Next text frame, skipping control frames.
async fn next_text<R>(rx: &mut R) -> Result<String, String>
where
    R: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match rx.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Close(_))) | None => return Err("closed by server".to_string()),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.to_string()),
        }
    }
}
