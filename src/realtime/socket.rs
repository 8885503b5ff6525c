// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! `GET /socket` WebSocket endpoint.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use super::{authenticate, user_room, Broadcaster, HandshakeRequest, SocketIdentity};
use crate::middleware::is_allowed_origin;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SocketParams {
    pub token: Option<String>,
}

/// Authenticates before upgrading, so rejected clients get a plain HTTP
/// error and never reach the broadcast fabric.
pub async fn socket_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SocketParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, axum::extract::ws::rejection::WebSocketUpgradeRejection>,
) -> Response {
    let Some(broadcaster) = state.realtime.broadcaster().cloned() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "Realtime server not started" })),
        )
            .into_response();
    };

    // Browsers attach the access cookie cross-site; only allowlisted pages may use it.
    if let Some(origin) = headers.get(header::ORIGIN) {
        let allowed = origin
            .to_str()
            .is_ok_and(|o| is_allowed_origin(o, &state.config.frontend_url));
        if !allowed {
            tracing::warn!(origin = ?origin, "Socket connection from foreign origin rejected");
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": "Origin not allowed" })),
            )
                .into_response();
        }
    }

    let identity = match authenticate(
        &state.tokens,
        HandshakeRequest {
            auth_token: params.token.as_deref(),
            headers: &headers,
        },
    )
    .await
    {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(reason = %e, "Socket connection rejected");
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| serve_connection(socket, broadcaster, identity)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn serve_connection(socket: WebSocket, broadcaster: Broadcaster, identity: SocketIdentity) {
    let room = user_room(&identity.user_id);
    let mut events = broadcaster.join(&room);
    let (mut sink, mut stream) = socket.split();

    tracing::info!(user_id = %identity.user_id, session_id = %identity.session_id, "Socket connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to encode realtime event");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %identity.user_id, skipped, "Socket lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Clients only listen; inbound frames are ignored.
                Some(Ok(_)) => {}
            },
        }
    }

    drop(events);
    broadcaster.prune();
    tracing::info!(user_id = %identity.user_id, session_id = %identity.session_id, "Socket disconnected");
}
