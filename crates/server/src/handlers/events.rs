//! Completion event subscriptions over WebSocket.

use crate::error::{ApiError, ApiResult};
use crate::notify::SessionNotifier;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// GET /v1/sessions/{token}/events - Receive `file:completed` events for
/// files uploaded with this session token.
pub async fn session_events(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let token = Uuid::parse_str(&token)
        .map_err(|e| ApiError::BadRequest(format!("invalid session token: {e}")))?;
    let sessions = state.sessions.clone();
    Ok(ws.on_upgrade(move |socket| forward_events(socket, sessions, token)))
}

async fn forward_events(mut socket: WebSocket, sessions: Arc<SessionNotifier>, token: Uuid) {
    let mut events = sessions.subscribe(token);
    debug!(session = %token, "Session subscriber connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        debug!(session = %token, error = %e, "Failed to encode completion event");
                        continue;
                    }
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    drop(events);
    sessions.release(token);
    debug!(session = %token, "Session subscriber disconnected");
}
