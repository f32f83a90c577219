// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cooperative shutdown over a `watch::channel(false)`.

use tokio::sync::watch;

/// Shutdown trigger shared by the server, the broadcaster and sessions.
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve once the flag is raised.
///
/// A dropped sender never resolves: the owner going away is not a request to
/// stop.
pub async fn signalled(rx: &mut watch::Receiver<bool>) {
    let raised = rx.wait_for(|stop| *stop).await.is_ok();
    if !raised {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_when_raised() {
        let (tx, mut rx) = channel();
        let waiter = tokio::spawn(async move { signalled(&mut rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn already_raised_resolves_immediately() {
        let (tx, mut rx) = channel();
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_millis(100), signalled(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_sender_keeps_waiting() {
        let (tx, mut rx) = channel();
        drop(tx);
        let res = tokio::time::timeout(Duration::from_millis(50), signalled(&mut rx)).await;
        assert!(res.is_err());
    }
}
