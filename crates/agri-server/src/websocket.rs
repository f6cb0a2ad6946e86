//! WebSocket feed of marketplace events.

use std::sync::Arc;
use std::time::Duration;

use agri_market::MarketEvent;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Handle WebSocket upgrade request for /api/ws.
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    if !state.add_ws_connection() {
        let current = state.ws_connection_count();
        let max = state.config().max_ws_connections;
        return Err(ApiError::TooManyConnections(current, max));
    }

    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, state)))
}

async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let event_rx = state.subscribe();
    let ping_interval = state.config().ws_ping_interval;
    info!(
        connections = state.ws_connection_count(),
        "WebSocket subscriber connected"
    );

    let send_task = tokio::spawn(async move {
        forward_events(&mut sender, event_rx, ping_interval).await;
    });

    let recv_task = tokio::spawn(async move {
        drain_incoming(&mut receiver).await;
    });

    run_until_first_exit(send_task, recv_task).await;

    state.remove_ws_connection();
    info!("WebSocket connection closed");
}

/// Wait for either half of a connection to finish, then abort the other.
///
/// The surviving task holds a broadcast receiver or the socket half.
async fn run_until_first_exit(mut send_task: JoinHandle<()>, mut recv_task: JoinHandle<()>) {
    tokio::select! {
        _ = &mut send_task => {
            debug!("WebSocket send task completed");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            debug!("WebSocket receive task completed");
            send_task.abort();
        }
    }
}

/// Forward marketplace events as JSON text frames, pinging on a timer.
async fn forward_events(
    sender: &mut SplitSink<WebSocket, Message>,
    mut event_rx: broadcast::Receiver<MarketEvent>,
    ping_interval: Duration,
) {
    let mut ping_timer = interval(ping_interval);

    loop {
        tokio::select! {
            received = event_rx.recv() => {
                match received {
                    Ok(event) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize event");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(count = n, "WebSocket receiver lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }

            _ = ping_timer.tick() => {
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// The feed is one-way; incoming frames are read only to notice a close.
async fn drain_incoming(receiver: &mut SplitStream<WebSocket>) {
    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(Message::Close(_)) => {
                debug!("Received close frame");
                break;
            }
            Ok(Message::Pong(_)) => {
                debug!("Received pong");
            }
            Ok(_) => {
                debug!("Ignoring client frame");
            }
            Err(e) => {
                warn!(error = %e, "WebSocket receive error");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    /// Spawn a task that never finishes and drops `guard` only when aborted.
    fn stalled_task(guard: oneshot::Sender<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        })
    }

    #[tokio::test]
    async fn test_finished_sender_aborts_receiver() {
        let (guard, dropped) = oneshot::channel();
        let send_task = tokio::spawn(async {});
        let recv_task = stalled_task(guard);

        run_until_first_exit(send_task, recv_task).await;

        let outcome = tokio::time::timeout(Duration::from_secs(1), dropped).await;
        assert!(matches!(outcome, Ok(Err(_))), "receive task was left running");
    }

    #[tokio::test]
    async fn test_finished_receiver_aborts_sender() {
        let (guard, dropped) = oneshot::channel();
        let send_task = stalled_task(guard);
        let recv_task = tokio::spawn(async {});

        run_until_first_exit(send_task, recv_task).await;

        let outcome = tokio::time::timeout(Duration::from_secs(1), dropped).await;
        assert!(matches!(outcome, Ok(Err(_))), "send task was left running");
    }
}
