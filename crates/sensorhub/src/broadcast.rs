// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dashboard fan-out.
//!
//! Observers register for one key and get a bounded queue. A single
//! broadcaster task reads the latest point of every observed key once per
//! period and pushes it to all observers of that key. An observer whose queue
//! stays full past the send timeout, or whose receiver is gone, is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::keyspace::TimeseriesKey;
use crate::protocol::TickMessage;
use crate::shutdown;
use crate::store::SharedStore;

pub type ObserverId = Uuid;

struct ObserverHandle {
    observed: TimeseriesKey,
    tx: mpsc::Sender<String>,
}

/// Registered dashboard connections.
pub struct ObserverSet {
    observers: DashMap<ObserverId, ObserverHandle>,
    queue_depth: usize,
}

impl ObserverSet {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            observers: DashMap::new(),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Register an observer of `key`; it receives from the next tick on.
    pub fn subscribe(&self, key: TimeseriesKey) -> (ObserverId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = Uuid::new_v4();
        debug!(observer = %id, key = %key, "observer added");
        self.observers.insert(id, ObserverHandle { observed: key, tx });
        (id, rx)
    }

    /// Returns false if the observer was already gone.
    pub fn remove(&self, id: &ObserverId) -> bool {
        self.observers.remove(id).is_some()
    }

    pub fn contains(&self, id: &ObserverId) -> bool {
        self.observers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Snapshot of senders grouped by observed key.
    fn targets(&self) -> HashMap<TimeseriesKey, Vec<(ObserverId, mpsc::Sender<String>)>> {
        let mut by_key: HashMap<_, Vec<_>> = HashMap::new();
        for entry in self.observers.iter() {
            by_key
                .entry(entry.value().observed.clone())
                .or_default()
                .push((*entry.key(), entry.value().tx.clone()));
        }
        by_key
    }
}

impl Default for ObserverSet {
    fn default() -> Self {
        Self::new(crate::config::default_queue_depth())
    }
}

/// Outcome of one broadcast pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub keys_polled: usize,
    pub delivered: usize,
    pub pruned: usize,
    pub store_errors: usize,
}

/// Periodic latest-value publisher.
pub struct Broadcaster {
    store: SharedStore,
    observers: Arc<ObserverSet>,
    keys: Vec<TimeseriesKey>,
    period: Duration,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(
        store: SharedStore,
        observers: Arc<ObserverSet>,
        keys: Vec<TimeseriesKey>,
        period: Duration,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            observers,
            keys,
            period,
            send_timeout,
        }
    }

    /// Keys observers may subscribe to, in configuration order.
    pub fn keys(&self) -> &[TimeseriesKey] {
        &self.keys
    }

    pub fn observers(&self) -> &Arc<ObserverSet> {
        &self.observers
    }

    /// Poll every configured key that has at least one observer and deliver
    /// the result to its observers.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        let mut targets = self.observers.targets();

        for key in &self.keys {
            let Some(recipients) = targets.remove(key) else {
                continue;
            };
            report.keys_polled += 1;

            let latest = self.store.latest(key).await;
            if let Err(e) = &latest {
                warn!(key = %key, error = %e, "latest value unavailable");
                report.store_errors += 1;
            }
            let message = TickMessage::from(latest).to_json();

            let sends = recipients.into_iter().map(|(id, tx)| {
                let message = message.clone();
                let timeout = self.send_timeout;
                async move { (id, tx.send_timeout(message, timeout).await.is_ok()) }
            });
            for (id, sent) in join_all(sends).await {
                if sent {
                    report.delivered += 1;
                } else if self.observers.remove(&id) {
                    debug!(observer = %id, key = %key, "observer pruned");
                    report.pruned += 1;
                }
            }
        }
        report
    }

    /// Tick every period until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            period_ms = self.period.as_millis() as u64,
            keys = self.keys.len(),
            "broadcaster started"
        );

        loop {
            let pass = async {
                ticker.tick().await;
                self.tick().await
            };
            tokio::select! {
                biased;
                _ = shutdown::signalled(&mut shutdown) => break,
                report = pass => {
                    if report.pruned > 0 || report.store_errors > 0 {
                        debug!(?report, "broadcast tick");
                    }
                }
            }
        }
        info!("broadcaster stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::keyspace::key_for;
    use crate::store::{DuplicatePolicy, MemoryStore, TimeseriesStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails `latest` on the first `outages` calls.
    struct FlakyStore {
        inner: MemoryStore,
        outages: AtomicUsize,
    }

    #[async_trait]
    impl TimeseriesStore for FlakyStore {
        async fn ensure_series(
            &self,
            key: &TimeseriesKey,
            retention_ms: u64,
            policy: DuplicatePolicy,
        ) -> Result<(), StoreError> {
            self.inner.ensure_series(key, retention_ms, policy).await
        }

        async fn append(&self, key: &TimeseriesKey, ts: i64, v: f64) -> Result<(), StoreError> {
            self.inner.append(key, ts, v).await
        }

        async fn range(
            &self,
            key: &TimeseriesKey,
            start_ms: i64,
            end_ms: i64,
        ) -> Result<Vec<(i64, f64)>, StoreError> {
            self.inner.range(key, start_ms, end_ms).await
        }

        async fn latest(&self, key: &TimeseriesKey) -> Result<Option<(i64, f64)>, StoreError> {
            let remaining = self.outages.load(Ordering::SeqCst);
            if remaining > 0 {
                self.outages.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.latest(key).await
        }
    }

    fn broadcaster(store: SharedStore, observers: Arc<ObserverSet>) -> Broadcaster {
        Broadcaster::new(
            store,
            observers,
            vec![key_for(8, 2, "distance"), key_for(1, 1, "position")],
            Duration::from_millis(20),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn tick_delivers_latest_to_observers_of_key() {
        let store = Arc::new(MemoryStore::default());
        store.append(&key_for(8, 2, "distance"), 10, 4.5).await.unwrap();
        store.append(&key_for(8, 2, "distance"), 20, 5.5).await.unwrap();
        let observers = Arc::new(ObserverSet::default());
        let (_, mut a) = observers.subscribe(key_for(8, 2, "distance"));
        let (_, mut b) = observers.subscribe(key_for(8, 2, "distance"));
        let (_, mut c) = observers.subscribe(key_for(1, 1, "position"));

        let report = broadcaster(store, observers).tick().await;

        assert_eq!(report.keys_polled, 2);
        assert_eq!(report.delivered, 3);
        assert_eq!(a.recv().await.unwrap(), r#"[20,"5.5"]"#);
        assert_eq!(b.recv().await.unwrap(), r#"[20,"5.5"]"#);
        assert_eq!(c.recv().await.unwrap(), "null");
    }

    #[tokio::test]
    async fn unobserved_keys_are_not_polled() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::default(),
            outages: AtomicUsize::new(usize::MAX),
        });
        let observers = Arc::new(ObserverSet::default());

        let report = broadcaster(store, observers).tick().await;

        assert_eq!(report, TickReport::default());
    }

    #[tokio::test]
    async fn store_outage_sends_error_then_recovers() {
        let key = key_for(8, 2, "distance");
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::default(),
            outages: AtomicUsize::new(1),
        });
        store.append(&key, 100, 7.0).await.unwrap();
        let observers = Arc::new(ObserverSet::default());
        let (id, mut rx) = observers.subscribe(key);
        let caster = broadcaster(store, observers.clone());

        let first = caster.tick().await;
        assert_eq!(first.store_errors, 1);
        let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["error"], "store unavailable: connection reset");
        assert!(observers.contains(&id));

        let second = caster.tick().await;
        assert_eq!(second.store_errors, 0);
        assert_eq!(rx.recv().await.unwrap(), r#"[100,"7"]"#);
    }

    #[tokio::test]
    async fn closed_observer_is_pruned_once() {
        let store = Arc::new(MemoryStore::default());
        let observers = Arc::new(ObserverSet::default());
        let (gone, rx) = observers.subscribe(key_for(8, 2, "distance"));
        let (stays, mut live) = observers.subscribe(key_for(8, 2, "distance"));
        drop(rx);
        let caster = broadcaster(store, observers.clone());

        let report = caster.tick().await;

        assert_eq!(report.pruned, 1);
        assert_eq!(report.delivered, 1);
        assert!(!observers.contains(&gone));
        assert!(observers.contains(&stays));
        assert_eq!(live.recv().await.unwrap(), "null");

        assert_eq!(caster.tick().await.pruned, 0);
    }

    #[tokio::test]
    async fn stalled_observer_is_pruned_after_timeout() {
        let store = Arc::new(MemoryStore::default());
        let observers = Arc::new(ObserverSet::new(1));
        let (id, _stalled) = observers.subscribe(key_for(1, 1, "position"));
        let caster = broadcaster(store, observers.clone());

        assert_eq!(caster.tick().await.delivered, 1);
        let report = caster.tick().await;

        assert_eq!(report.pruned, 1);
        assert!(!observers.contains(&id));
        assert!(observers.is_empty());
    }

    #[tokio::test]
    async fn unread_default_queue_goes_at_most_two_ticks_stale() {
        let key = key_for(8, 2, "distance");
        let store = Arc::new(MemoryStore::default());
        let observers = Arc::new(ObserverSet::default());
        let (id, mut slow) = observers.subscribe(key.clone());
        let caster = broadcaster(store.clone(), observers.clone());

        store.append(&key, 1, 1.0).await.unwrap();
        assert_eq!(caster.tick().await.delivered, 1);
        store.append(&key, 2, 2.0).await.unwrap();
        assert_eq!(caster.tick().await.delivered, 1);
        store.append(&key, 3, 3.0).await.unwrap();
        assert_eq!(caster.tick().await.pruned, 1);
        assert!(!observers.contains(&id));

        assert_eq!(slow.recv().await.unwrap(), r#"[1,"1"]"#);
        assert_eq!(slow.recv().await.unwrap(), r#"[2,"2"]"#);
        assert_eq!(slow.recv().await, None);
    }

    #[tokio::test]
    async fn run_ticks_periodically_and_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::default());
        let observers = Arc::new(ObserverSet::default());
        let (_, mut rx) = observers.subscribe(key_for(8, 2, "distance"));
        let (stop, shutdown) = shutdown::channel();

        let handle = broadcaster(store, observers).spawn(shutdown);
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
        }

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_long_period() {
        let store = Arc::new(MemoryStore::default());
        let observers = Arc::new(ObserverSet::default());
        let caster = Broadcaster::new(
            store,
            observers,
            vec![key_for(8, 2, "distance")],
            Duration::from_secs(3600),
            Duration::from_millis(20),
        );
        let (stop, shutdown) = shutdown::channel();
        let handle = caster.spawn(shutdown);

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.send(true).unwrap();

        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
