use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::events::{ClientFrame, Scope, ServerFrame};
use super::registry::{ConnectionId, ConnectionRegistry};
use crate::auth::{bearer_token, AuthUser};
use crate::state::AppState;
use crate::utils::error::AppError;

#[derive(Debug, Default, Deserialize)]
pub struct SocketParams {
    pub token: Option<String>,
}

/// GET /ws. Browsers cannot set headers on an upgrade, so the token may also
/// arrive as `?token=`.
pub async fn socket_handler(
    State(state): State<AppState>,
    Query(params): Query<SocketParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(params.token)
        .ok_or_else(|| AppError::AuthError("Missing socket token".to_string()))?;
    let user = state.auth.authenticate(&token)?;

    Ok(ws
        .on_upgrade(move |socket| run_connection(socket, state, user))
        .into_response())
}

async fn run_connection(socket: WebSocket, state: AppState, user: AuthUser) {
    let registry = state.registry.clone();
    let (connection_id, mut outbound) = registry.connect(user.user_id);
    let (mut sink, mut stream) = socket.split();

    let hello = ServerFrame::Connected {
        connection_id,
        user_id: user.user_id,
    };
    if let Ok(json) = serde_json::to_string(&hello) {
        if sink.send(Message::Text(json)).await.is_err() {
            registry.disconnect(connection_id);
            return;
        }
    }

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(payload) = queued else { break };
                if sink.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_frame(&registry, connection_id, &text);
                        if let Ok(json) = serde_json::to_string(&reply) {
                            if sink.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "Socket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    registry.disconnect(connection_id);
}

/// Applies one client frame to the registry and returns the reply.
pub fn handle_client_frame(
    registry: &ConnectionRegistry,
    connection_id: ConnectionId,
    text: &str,
) -> ServerFrame {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(connection_id = %connection_id, error = %e, "Unreadable client frame");
            return ServerFrame::Error {
                message: format!("Unrecognised frame: {}", e),
            };
        }
    };

    match frame {
        ClientFrame::JoinEvent { event_id } => room_reply(
            registry.join(connection_id, Scope::Event(event_id)),
            ServerFrame::JoinedEvent { event_id },
            event_id,
        ),
        ClientFrame::LeaveEvent { event_id } => {
            // Leaving a room that was never joined is a no-op.
            registry.leave(connection_id, Scope::Event(event_id));
            ServerFrame::LeftEvent { event_id }
        }
        ClientFrame::Ping => ServerFrame::Pong,
    }
}

fn room_reply(ok: bool, reply: ServerFrame, event_id: Uuid) -> ServerFrame {
    if ok {
        reply
    } else {
        ServerFrame::Error {
            message: format!("Could not join event {}", event_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_then_leave_updates_rooms() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = registry.connect(Uuid::new_v4());
        let event_id = Uuid::new_v4();

        let joined = handle_client_frame(
            &registry,
            conn,
            &format!(r#"{{"type":"join_event","eventId":"{}"}}"#, event_id),
        );
        assert_eq!(joined, ServerFrame::JoinedEvent { event_id });
        assert_eq!(registry.room_size(Scope::Event(event_id)), 1);

        let left = handle_client_frame(
            &registry,
            conn,
            &format!(r#"{{"type":"leave_event","eventId":"{}"}}"#, event_id),
        );
        assert_eq!(left, ServerFrame::LeftEvent { event_id });
        assert_eq!(registry.room_size(Scope::Event(event_id)), 0);
    }

    #[test]
    fn ping_and_garbage() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = registry.connect(Uuid::new_v4());

        assert_eq!(handle_client_frame(&registry, conn, r#"{"type":"ping"}"#), ServerFrame::Pong);
        assert!(matches!(
            handle_client_frame(&registry, conn, "not json"),
            ServerFrame::Error { .. }
        ));
    }

    #[test]
    fn unknown_connection_gets_error_on_join() {
        let registry = ConnectionRegistry::new();
        let reply = handle_client_frame(
            &registry,
            Uuid::new_v4(),
            &format!(r#"{{"type":"join_event","eventId":"{}"}}"#, Uuid::new_v4()),
        );
        assert!(matches!(reply, ServerFrame::Error { .. }));
    }
}
