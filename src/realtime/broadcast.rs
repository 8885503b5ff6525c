// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Named broadcast rooms backed by `tokio::sync::broadcast` channels.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Buffered events per room before slow receivers start lagging.
const ROOM_CAPACITY: usize = 64;

/// Event name telling a user's clients that their session ended server-side.
pub const SESSION_REVOKED: &str = "session:revoked";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEvent {
    pub event: String,
    pub payload: serde_json::Value,
}

/// Room a user's connections join.
pub fn user_room(user_id: &str) -> String {
    format!("user:{}", user_id)
}

#[derive(Clone, Default)]
pub struct Broadcaster {
    rooms: Arc<DashMap<String, broadcast::Sender<ServerEvent>>>,
}

/// Emit target returned by [`Broadcaster::to`].
pub struct Room<'a> {
    broadcaster: &'a Broadcaster,
    name: String,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `room`, creating it on first use.
    pub fn join(&self, room: &str) -> broadcast::Receiver<ServerEvent> {
        self.rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    pub fn to(&self, room: impl Into<String>) -> Room<'_> {
        Room {
            broadcaster: self,
            name: room.into(),
        }
    }

    pub fn emit_to_user(&self, user_id: &str, event: &str, payload: serde_json::Value) -> usize {
        self.to(user_room(user_id)).emit(event, payload)
    }

    /// Number of live connections in `room`.
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms
            .get(room)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop rooms nobody is listening to.
    pub fn prune(&self) {
        self.rooms.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Room<'_> {
    /// Deliver to every member. Returns how many receivers got it.
    pub fn emit(&self, event: &str, payload: serde_json::Value) -> usize {
        let Some(tx) = self.broadcaster.rooms.get(&self.name) else {
            return 0;
        };

        let delivered = tx
            .send(ServerEvent {
                event: event.to_string(),
                payload,
            })
            .unwrap_or(0);

        if delivered == 0 {
            drop(tx);
            self.broadcaster
                .rooms
                .remove_if(&self.name, |_, tx| tx.receiver_count() == 0);
        }

        tracing::debug!(room = %self.name, event, delivered, "Realtime event emitted");
        delivered
    }
}
