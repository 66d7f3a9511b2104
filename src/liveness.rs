//! Heartbeat into the `bot_status` row, independent of message traffic.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::store::{BotStatus, Store};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Starting,
    Ready,
    Closed,
}

/// Shared view of the gateway connection: set by the Discord client,
/// observed by the heartbeat loop.
#[derive(Clone)]
pub struct ConnectionSignal {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl Default for ConnectionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Starting);
        Self { tx: Arc::new(tx) }
    }

    pub fn mark_ready(&self) {
        self.tx.send_if_modified(|state| {
            if *state == ConnectionState::Starting {
                *state = ConnectionState::Ready;
                true
            } else {
                false
            }
        });
    }

    pub fn mark_closed(&self) {
        self.tx.send_replace(ConnectionState::Closed);
    }

    pub fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Returns `false` if the connection closed before it was ever ready.
    pub async fn wait_until_ready(&self) -> bool {
        let mut rx = self.tx.subscribe();
        let ready = match rx
            .wait_for(|state| *state != ConnectionState::Starting)
            .await
        {
            Ok(state) => *state == ConnectionState::Ready,
            Err(_) => false,
        };
        ready
    }

    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }
}

#[derive(Clone)]
pub struct LivenessReporter {
    store: Arc<dyn Store>,
    status_id: i64,
    interval: Duration,
}

impl LivenessReporter {
    pub fn new(store: Arc<dyn Store>, status_id: i64, interval: Duration) -> Self {
        Self {
            store,
            status_id,
            interval,
        }
    }

    /// Records the current connection state; failures are only logged.
    pub async fn report(&self, connected: bool) {
        let status = BotStatus::now(self.status_id, connected);
        match self.store.upsert_status(&status).await {
            Ok(()) => debug!("Heartbeat: connected={}", connected),
            Err(e) => warn!("Heartbeat error: {}", e),
        }
    }

    /// Marks the bot alive every interval from readiness until closure.
    pub async fn run(&self, signal: &ConnectionSignal) {
        if !signal.wait_until_ready().await {
            return;
        }
        info!("Heartbeat: started (every {:?})", self.interval);

        while !signal.is_closed() {
            self.report(true).await;
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = signal.closed() => break,
            }
        }
        debug!("Heartbeat: stopped");
    }

    /// Drives `client` alongside the heartbeat loop and always finishes with
    /// a single `connected = false` write, whatever `client` returned.
    pub async fn supervise<F, T>(&self, signal: &ConnectionSignal, client: F) -> T
    where
        F: Future<Output = T>,
    {
        let (_, output) = tokio::join!(self.run(signal), async {
            let output = client.await;
            signal.mark_closed();
            output
        });

        self.report(false).await;
        info!("Heartbeat: marked bot offline");
        output
    }
}
