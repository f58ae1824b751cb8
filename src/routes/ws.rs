// Push channel: initial snapshot on connect, then every published event.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::models::{PanelEvent, SystemUpdate};

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Decrements the observer count on drop (connect = +1, drop = -1).
struct WsConnectionGuard(Arc<AtomicUsize>);

impl Drop for WsConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

pub(super) async fn ws_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        // Subscribe before taking the snapshot so nothing published in between is lost.
        let mut rx = state.orchestrator.subscribe();
        let initial = state.orchestrator.initial_update();
        if let Err(e) = stream_events(socket, initial, &mut rx, state.ws_connections).await {
            tracing::info!(error = %e, "push channel closed with error");
        }
    })
}

async fn send_text(socket: &mut WebSocket, json: String) -> bool {
    matches!(
        timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await,
        Ok(Ok(()))
    )
}

async fn stream_events(
    mut socket: WebSocket,
    initial: SystemUpdate,
    rx: &mut broadcast::Receiver<PanelEvent>,
    connections: Arc<AtomicUsize>,
) -> anyhow::Result<()> {
    let observers = connections.fetch_add(1, Ordering::Relaxed) + 1;
    let _guard = WsConnectionGuard(connections);
    tracing::info!(observers, "client connected to push channel");

    if !send_text(&mut socket, serde_json::to_string(&initial)?).await {
        return Ok(());
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_text(&mut socket, serde_json::to_string(&event)?).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "push channel client lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = ping_interval.tick() => {
                let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Ping(Bytes::new()))).await;
                if !matches!(r, Ok(Ok(()))) {
                    break;
                }
            }
        }
    }
    tracing::info!("client disconnected from push channel");
    Ok(())
}
