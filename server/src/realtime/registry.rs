//! Process-local registry of live socket connections and the rooms they joined.
//!
//! ```text
//! ws handler ── connect ──▶ ConnectionRegistry
//!                            ├── connections: conn_id → (user_id, sender, scopes)
//!                            └── rooms:       Scope   → {conn_id}
//!                                               ▲
//! Broadcaster ── deliver(scopes, payload) ──────┘
//! ```
//!
//! Only a connection's own lifecycle (connect, join, leave, disconnect)
//! mutates its entries. No code path holds a `connections` guard and a
//! `rooms` guard at the same time.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::Scope;

pub type ConnectionId = Uuid;

/// Frames held for a connection that is not draining its socket. Past this,
/// new frames for it are dropped.
pub const OUTBOUND_BUFFER: usize = 64;

struct Connection {
    user_id: Uuid,
    sender: mpsc::Sender<String>,
    scopes: HashSet<Scope>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
    rooms: DashMap<Scope, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and subscribes it to its user's private channel.
    pub fn connect(&self, user_id: Uuid) -> (ConnectionId, mpsc::Receiver<String>) {
        let connection_id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(OUTBOUND_BUFFER);
        let user_scope = Scope::User(user_id);

        self.connections.insert(
            connection_id,
            Connection {
                user_id,
                sender,
                scopes: HashSet::from([user_scope]),
            },
        );
        self.rooms.entry(user_scope).or_default().insert(connection_id);

        info!(
            connection_id = %connection_id,
            user_id = %user_id,
            total_connections = self.connections.len(),
            "Socket connected"
        );
        (connection_id, receiver)
    }

    /// Returns false when the connection is unknown.
    pub fn join(&self, connection_id: ConnectionId, scope: Scope) -> bool {
        {
            let Some(mut connection) = self.connections.get_mut(&connection_id) else {
                return false;
            };
            connection.scopes.insert(scope);
        }
        self.rooms.entry(scope).or_default().insert(connection_id);
        debug!(connection_id = %connection_id, scope = ?scope, "Joined room");
        true
    }

    /// Leaving the private user channel is not allowed; it lasts as long as
    /// the connection.
    pub fn leave(&self, connection_id: ConnectionId, scope: Scope) -> bool {
        {
            let Some(mut connection) = self.connections.get_mut(&connection_id) else {
                return false;
            };
            if scope == Scope::User(connection.user_id) {
                return false;
            }
            if !connection.scopes.remove(&scope) {
                return false;
            }
        }
        self.remove_from_room(scope, connection_id);
        debug!(connection_id = %connection_id, scope = ?scope, "Left room");
        true
    }

    pub fn disconnect(&self, connection_id: ConnectionId) {
        let Some((_, connection)) = self.connections.remove(&connection_id) else {
            return;
        };
        for scope in connection.scopes {
            self.remove_from_room(scope, connection_id);
        }
        info!(
            connection_id = %connection_id,
            user_id = %connection.user_id,
            total_connections = self.connections.len(),
            "Socket disconnected"
        );
    }

    /// Sends `payload` once to every connection subscribed to any of `scopes`.
    /// Returns how many connections accepted it. A connection whose queue is
    /// full misses this frame.
    pub fn deliver(&self, scopes: &[Scope], payload: &str) -> usize {
        let mut targets: HashSet<ConnectionId> = HashSet::new();
        for scope in scopes {
            if let Some(members) = self.rooms.get(scope) {
                targets.extend(members.iter().copied());
            }
        }

        targets
            .into_iter()
            .filter(|id| {
                let Some(connection) = self.connections.get(id) else {
                    return false;
                };
                match connection.sender.try_send(payload.to_string()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        warn!(connection_id = %id, user_id = %connection.user_id, "Socket queue full, dropping frame");
                        false
                    }
                    Err(TrySendError::Closed(_)) => false,
                }
            })
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_size(&self, scope: Scope) -> usize {
        self.rooms.get(&scope).map(|members| members.len()).unwrap_or(0)
    }

    fn remove_from_room(&self, scope: Scope, connection_id: ConnectionId) {
        let now_empty = match self.rooms.get_mut(&scope) {
            Some(mut members) => {
                members.remove(&connection_id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove_if(&scope, |_, members| members.is_empty());
        }
    }
}
