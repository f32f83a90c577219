// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP / WebSocket front end.
//!
//! | Route | |
//! |---|---|
//! | `GET /ws` | sensor ingestion (WebSocket) |
//! | `GET /dashboard/ws[?key=...]` | latest-value feed (WebSocket) |
//! | `GET /data/:sensor_id/:device_id/:metric` | recent points of one series |
//! | `GET /health` | liveness and connection counts |

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tokio::task::{JoinError, JoinHandle};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::broadcast::{Broadcaster, ObserverSet};
use crate::config::HubConfig;
use crate::ingest::{Frame, IngestSession};
use crate::keyspace::{key_for, known_series, InvalidKey, TimeseriesKey};
use crate::protocol::{ErrorBody, HealthResponse, RangeResponse};
use crate::shutdown;
use crate::store::{bootstrap_series, SharedStore};

/// Shared application state
pub struct AppState {
    store: SharedStore,
    observers: Arc<ObserverSet>,
    broadcast_keys: Vec<TimeseriesKey>,
    max_clients: usize,
    range_window_ms: u64,
    client_count: AtomicUsize,
    drained: Notify,
    shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        config: &HubConfig,
        store: SharedStore,
        observers: Arc<ObserverSet>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            observers,
            broadcast_keys: config.broadcast.keys.clone(),
            max_clients: config.server.max_clients,
            range_window_ms: config.query.range_window_ms,
            client_count: AtomicUsize::new(0),
            drained: Notify::new(),
            shutdown,
        }
    }

    /// Active ingestion connections.
    pub fn clients(&self) -> usize {
        self.client_count.load(Ordering::Acquire)
    }

    /// Resolves once no ingestion connection holds a slot.
    pub async fn sessions_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.clients() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn try_add_client(self: &Arc<Self>) -> Option<ClientSlot> {
        let reserved = self
            .client_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.max_clients).then_some(count + 1)
            });
        match reserved {
            Ok(previous) => {
                info!("Client connected. Total: {}", previous + 1);
                Some(ClientSlot {
                    state: Arc::clone(self),
                })
            }
            Err(_) => None,
        }
    }

    /// Key requested by an observer, defaulting to the first broadcast key.
    fn observed_key(&self, requested: Option<&str>) -> Result<TimeseriesKey, Response> {
        let Some(text) = requested else {
            return self.broadcast_keys.first().cloned().ok_or_else(|| {
                error_response(StatusCode::NOT_FOUND, "no broadcast keys configured")
            });
        };
        let key: TimeseriesKey = text
            .parse()
            .map_err(|e: InvalidKey| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;
        if !self.broadcast_keys.contains(&key) {
            return Err(error_response(
                StatusCode::NOT_FOUND,
                format!("key `{key}` is not broadcast"),
            ));
        }
        Ok(key)
    }
}

/// Ingestion connection slot, released on drop.
struct ClientSlot {
    state: Arc<AppState>,
}

impl Drop for ClientSlot {
    fn drop(&mut self) {
        let previous = self.state.client_count.fetch_sub(1, Ordering::AcqRel);
        info!("Client disconnected. Total: {}", previous.saturating_sub(1));
        if previous == 1 {
            self.state.drained.notify_waiters();
        }
    }
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(bytes) => Frame::Binary(bytes),
            Message::Ping(bytes) => Frame::Ping(bytes),
            Message::Pong(bytes) => Frame::Pong(bytes),
            Message::Close(_) => Frame::Close,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
            Frame::Ping(bytes) => Message::Ping(bytes),
            Frame::Pong(bytes) => Message::Pong(bytes),
            Frame::Close => Message::Close(None),
        }
    }
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(error))).into_response()
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ingest_handler))
        .route("/dashboard/ws", get(observer_handler))
        .route("/data/:sensor_id/:device_id/:metric", get(range_handler))
        .route("/health", get(health_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Sensor WebSocket upgrade handler
async fn ingest_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = state.try_add_client() else {
        warn!("Connection rejected: max clients reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    ws.on_upgrade(move |socket| handle_ingest(socket, state, slot))
}

async fn handle_ingest(socket: WebSocket, state: Arc<AppState>, _slot: ClientSlot) {
    let (sink, stream) = socket.split();
    let frames = stream.map(|msg| msg.map(Frame::from));
    let acks = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(Message::from(frame))));

    let session = IngestSession::new(Arc::clone(&state.store));
    session.run(frames, acks, state.shutdown.clone()).await;
}

#[derive(Debug, Deserialize)]
struct ObserveParams {
    key: Option<String>,
}

/// Dashboard WebSocket upgrade handler
async fn observer_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ObserveParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.observed_key(params.key.as_deref()) {
        Ok(key) => ws.on_upgrade(move |socket| handle_observer(socket, key, state)),
        Err(rejection) => rejection,
    }
}

async fn handle_observer(socket: WebSocket, key: TimeseriesKey, state: Arc<AppState>) {
    let (id, mut feed) = state.observers.subscribe(key.clone());
    let (mut tx, mut inbound) = socket.split();
    let mut shutdown = state.shutdown.clone();
    info!(observer = %id, key = %key, "dashboard connected");

    loop {
        tokio::select! {
            biased;
            _ = shutdown::signalled(&mut shutdown) => break,
            update = feed.recv() => match update {
                Some(text) => {
                    if tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Pruned by the broadcaster.
                None => break,
            },
            msg = inbound.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.observers.remove(&id);
    let _ = tx.close().await;
    info!(observer = %id, "dashboard disconnected");
}

/// Recent points of one series
async fn range_handler(
    Path((sensor_id, device_id, metric)): Path<(i64, i64, String)>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if metric.is_empty() || metric.contains(':') {
        return error_response(StatusCode::BAD_REQUEST, format!("invalid metric `{metric}`"));
    }
    let key = key_for(sensor_id, device_id, &metric);
    let end = Utc::now().timestamp_millis();
    let window = i64::try_from(state.range_window_ms).unwrap_or(i64::MAX);
    let start = end.saturating_sub(window);

    match state.store.range(&key, start, end).await {
        Ok(data) => {
            debug!(key = %key, points = data.len(), "range query");
            Json(RangeResponse {
                start,
                end,
                key,
                data,
            })
            .into_response()
        }
        Err(e) => {
            warn!(key = %key, error = %e, "range query failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

/// Health check endpoint
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        clients: state.clients(),
        observers: state.observers.len(),
    })
}

/// Ingestion hub: router plus broadcaster over one store.
pub struct HubServer {
    config: HubConfig,
    store: SharedStore,
}

impl HubServer {
    pub fn new(config: HubConfig, store: SharedStore) -> Self {
        Self { config, store }
    }

    /// Create the known series, bind the listener and start serving.
    pub async fn spawn(self) -> std::io::Result<HubHandle> {
        let keys = known_series(&self.config.topology);
        bootstrap_series(self.store.as_ref(), &keys, self.config.store.retention_ms).await;

        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let observers = Arc::new(ObserverSet::new(self.config.broadcast.queue_depth));
        let state = Arc::new(AppState::new(
            &self.config,
            Arc::clone(&self.store),
            Arc::clone(&observers),
            shutdown_rx.clone(),
        ));

        let broadcaster = Broadcaster::new(
            Arc::clone(&self.store),
            Arc::clone(&observers),
            self.config.broadcast.keys.clone(),
            self.config.broadcast.period(),
            self.config.broadcast.send_timeout(),
        )
        .spawn(shutdown_rx.clone());

        let app = router(Arc::clone(&state));
        let mut server_shutdown = shutdown_rx;
        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                shutdown::signalled(&mut server_shutdown).await;
            });
            if let Err(err) = serve.await {
                warn!(error = %err, "server exited with error");
            }
        });

        info!("Ingestion endpoint: ws://{}/ws", local_addr);
        info!("Dashboard endpoint: ws://{}/dashboard/ws", local_addr);

        Ok(HubHandle {
            local_addr,
            state,
            shutdown: shutdown_tx,
            server,
            broadcaster,
        })
    }
}

/// Handle for a running hub.
pub struct HubHandle {
    local_addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<()>,
    broadcaster: JoinHandle<()>,
}

impl HubHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn store(&self) -> &SharedStore {
        &self.state.store
    }

    pub fn observers(&self) -> &Arc<ObserverSet> {
        &self.state.observers
    }

    pub fn clients(&self) -> usize {
        self.state.clients()
    }

    /// Signal shutdown and wait for the server, the broadcaster and every
    /// ingestion session.
    ///
    /// Upgraded connections outlive the listener, so sessions are awaited
    /// through their client slots. Each one finishes the message it is
    /// processing before it closes.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        let _ = self.shutdown.send(true);
        self.broadcaster.await?;
        self.server.await?;
        self.state.sessions_drained().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn state(max_clients: usize) -> Arc<AppState> {
        let mut config = HubConfig::default();
        config.server.max_clients = max_clients;
        config.broadcast.keys = vec![key_for(8, 2, "distance"), key_for(1, 1, "position")];
        let (_tx, rx) = shutdown::channel();
        Arc::new(AppState::new(
            &config,
            Arc::new(MemoryStore::default()),
            Arc::new(ObserverSet::default()),
            rx,
        ))
    }

    #[test]
    fn client_slots_are_bounded_and_released() {
        let state = state(2);
        let a = state.try_add_client().unwrap();
        let _b = state.try_add_client().unwrap();
        assert!(state.try_add_client().is_none());
        assert_eq!(state.clients(), 2);

        drop(a);
        assert_eq!(state.clients(), 1);
        assert!(state.try_add_client().is_some());
    }

    #[tokio::test]
    async fn sessions_drained_waits_for_last_slot() {
        let state = state(2);
        state.sessions_drained().await;

        let a = state.try_add_client().unwrap();
        let b = state.try_add_client().unwrap();
        let waiter = tokio::spawn({
            let state = Arc::clone(&state);
            async move { state.sessions_drained().await }
        });

        drop(a);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(b);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("Drain did not resolve")
            .unwrap();
    }

    #[test]
    fn observer_key_selection() {
        let state = state(1);
        assert_eq!(state.observed_key(None).unwrap(), key_for(8, 2, "distance"));
        assert_eq!(
            state.observed_key(Some("sensor:1:device:1:position")).unwrap(),
            key_for(1, 1, "position")
        );
        assert_eq!(
            state.observed_key(Some("sensor:1:device")).unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            state.observed_key(Some("sensor:4:device:1:load")).unwrap_err().status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn frames_map_to_messages() {
        assert_eq!(Frame::from(Message::Text("ok".into())), Frame::Text("ok".into()));
        assert_eq!(Frame::from(Message::Close(None)), Frame::Close);
        assert!(matches!(Message::from(Frame::Close), Message::Close(None)));
        assert!(matches!(Message::from(Frame::Binary(vec![1])), Message::Binary(b) if b == [1]));
    }
}
