// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Connection-time authentication for realtime clients.
//!
//! Runs once per connection attempt. A session that lapses while the
//! connection is open stays trusted until the client disconnects.

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;

use crate::token::{AccessPayload, TokenCodec, Verified};

/// Cookie carrying the access token for browser clients.
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

/// Identity attached to an accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketIdentity {
    pub user_id: String,
    pub session_id: String,
}

/// Rejection reasons. The `Display` text is what the client sees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("No token provided")]
    NoToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Authentication failed")]
    Failed,
}

/// Handshake metadata presented by a connecting client.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeRequest<'a> {
    /// Explicit credential (the `token` query parameter for WebSocket clients)
    pub auth_token: Option<&'a str>,
    pub headers: &'a HeaderMap,
}

#[async_trait]
pub trait AccessTokenVerifier: Send + Sync {
    async fn verify_access_token(&self, token: &str) -> anyhow::Result<Verified<AccessPayload>>;
}

#[async_trait]
impl AccessTokenVerifier for TokenCodec {
    async fn verify_access_token(&self, token: &str) -> anyhow::Result<Verified<AccessPayload>> {
        Ok(self.verify_access(Some(token)))
    }
}

/// Pull the bearer credential out of the handshake: the explicit auth field
/// wins, then the `accessToken` cookie.
pub fn extract_token(request: &HandshakeRequest<'_>) -> Option<String> {
    if let Some(token) = request.auth_token.filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    CookieJar::from_headers(request.headers)
        .get(ACCESS_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|t| !t.is_empty())
}

pub async fn authenticate(
    verifier: &dyn AccessTokenVerifier,
    request: HandshakeRequest<'_>,
) -> Result<SocketIdentity, HandshakeError> {
    let Some(token) = extract_token(&request) else {
        return Err(HandshakeError::NoToken);
    };

    let verified = verifier.verify_access_token(&token).await.map_err(|e| {
        tracing::error!(error = %e, "Socket handshake verification failed");
        HandshakeError::Failed
    })?;

    let Some(payload) = verified.payload else {
        tracing::debug!(reason = ?verified.error, "Socket handshake rejected");
        return Err(HandshakeError::InvalidToken);
    };

    Ok(SocketIdentity {
        user_id: payload.user_id,
        session_id: payload.session_id,
    })
}
