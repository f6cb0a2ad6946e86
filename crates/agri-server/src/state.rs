//! Shared state for the HTTP server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use agri_market::{MarketEvent, MarketResult, Marketplace};
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use crate::config::ServerConfig;

/// Shared state for the HTTP server.
///
/// The marketplace sits behind a single lock; every operation runs start to
/// finish while holding it. Snapshot writes happen after the lock is
/// released.
#[derive(Debug)]
pub struct AppState {
    /// Server configuration.
    config: Arc<ServerConfig>,
    /// Marketplace aggregate.
    market: Mutex<Marketplace>,
    /// Broadcast channel for marketplace events.
    event_tx: broadcast::Sender<MarketEvent>,
    /// Number of active WebSocket connections.
    ws_connections: AtomicUsize,
    /// Server start time.
    start_time: Instant,
}

impl AppState {
    /// Create server state around an opened marketplace.
    pub fn new(config: ServerConfig, market: Marketplace) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            config: Arc::new(config),
            market: Mutex::new(market),
            event_tx,
            ws_connections: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run a read-only marketplace operation.
    pub async fn read<T>(&self, op: impl FnOnce(&Marketplace) -> T) -> T {
        let market = self.market.lock().await;
        op(&market)
    }

    /// Run a mutating marketplace operation, publish the events it queued
    /// and persist the result.
    ///
    /// Events are published before the lock is released, so subscribers see
    /// them in the order the mutations happened. The snapshot is encoded
    /// under the lock and written on the blocking pool after it is released;
    /// the call returns once the write has finished.
    pub async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut Marketplace) -> MarketResult<T>,
    ) -> MarketResult<T> {
        let (result, snapshot) = {
            let mut market = self.market.lock().await;
            let result = op(&mut market);
            for event in market.take_events() {
                self.publish(event);
            }
            (result, market.take_snapshot())
        };

        if let Some(snapshot) = snapshot {
            if let Err(e) = tokio::task::spawn_blocking(move || snapshot.write()).await {
                warn!(error = %e, "snapshot write task failed");
            }
        }
        result
    }

    /// Subscribe to marketplace events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.event_tx.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: MarketEvent) -> usize {
        self.event_tx.send(event).unwrap_or(0)
    }

    /// Get the number of active WebSocket connections.
    #[must_use]
    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Relaxed)
    }

    /// Increment the WebSocket connection count.
    ///
    /// Returns `true` if the connection was allowed, `false` if limit reached.
    pub fn add_ws_connection(&self) -> bool {
        let current = self.ws_connections.fetch_add(1, Ordering::Relaxed);
        if current >= self.config.max_ws_connections {
            self.ws_connections.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Decrement the WebSocket connection count.
    pub fn remove_ws_connection(&self) {
        self.ws_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get server uptime in seconds.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
