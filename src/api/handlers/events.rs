//! Progress event WebSocket.

use super::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{debug, warn};

/// GET /events — upgrade to a WebSocket carrying progress events as JSON
/// text frames. Subscribers beyond the configured cap get 503.
pub async fn events_ws(
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let subscription = match state.orchestrator.bus().subscribe() {
        Some(s) => s,
        None => {
            warn!("Event subscriber cap reached, refusing WebSocket");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "event subscriber limit reached",
            )
                .into_response();
        }
    };

    upgrade.on_upgrade(move |socket| forward_events(socket, state, subscription))
}

async fn forward_events(
    mut socket: WebSocket,
    state: Arc<AppState>,
    mut subscription: crate::events::Subscription,
) {
    let id = subscription.id;
    debug!("Event WebSocket {} connected", id);

    loop {
        tokio::select! {
            event = subscription.receiver.recv() => {
                let Some(event) = event else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!("Event serialization failed: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                // Clients only ever send close (pings are answered by the
                // protocol layer); any error ends the subscription.
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.orchestrator.bus().unsubscribe(id);
    debug!("Event WebSocket {} disconnected", id);
}
