// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Realtime channel: authenticated WebSocket connections grouped into
//! per-user broadcast rooms.

pub mod broadcast;
pub mod handshake;
pub mod socket;

pub use broadcast::{user_room, Broadcaster, Room, ServerEvent, SESSION_REVOKED};
pub use handshake::{
    authenticate, extract_token, AccessTokenVerifier, HandshakeError, HandshakeRequest,
    SocketIdentity, ACCESS_TOKEN_COOKIE,
};

/// Handle to the realtime server, passed explicitly to whoever emits events.
#[derive(Clone, Default)]
pub enum RealtimeServer {
    #[default]
    NotStarted,
    Started(Broadcaster),
}

impl RealtimeServer {
    pub fn start() -> Self {
        RealtimeServer::Started(Broadcaster::new())
    }

    pub fn broadcaster(&self) -> Option<&Broadcaster> {
        match self {
            RealtimeServer::Started(broadcaster) => Some(broadcaster),
            RealtimeServer::NotStarted => None,
        }
    }

    /// Emit to every connection of `user_id`. Zero when not started.
    pub fn notify_user(&self, user_id: &str, event: &str, payload: serde_json::Value) -> usize {
        self.broadcaster()
            .map(|b| b.emit_to_user(user_id, event, payload))
            .unwrap_or(0)
    }
}
