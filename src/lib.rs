// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! TuneStream authentication core.
//!
//! Token issuance and verification, session lifecycle with rolling renewal,
//! one-time verification codes and links, and the authenticated realtime
//! channel.

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod routes;
pub mod services;
pub mod time_utils;
pub mod token;

use std::sync::Arc;

use config::Config;
use db::{SessionStore, UserStore, VerificationStore};
use error::Result;
use models::{PublicUser, Session};
use realtime::{RealtimeServer, SESSION_REVOKED};
use services::{AuthService, EmailSender, IdentityProvider, PasswordHasher, VerificationService};
use token::TokenCodec;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub tokens: TokenCodec,
    pub auth_service: AuthService,
    pub verification_service: VerificationService,
    pub realtime: RealtimeServer,
}

/// External collaborators the services are built over.
pub struct Backends {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub verifications: Arc<dyn VerificationStore>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub email: Arc<dyn EmailSender>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(config: Config, backends: Backends, realtime: RealtimeServer) -> Self {
        let tokens = TokenCodec::new(&config);

        let auth_service = AuthService::new(
            backends.users.clone(),
            backends.sessions.clone(),
            tokens.clone(),
            backends.hasher.clone(),
            backends.identity,
        );

        let verification_service = VerificationService::new(
            backends.users,
            backends.sessions,
            backends.verifications,
            tokens.clone(),
            backends.hasher,
            backends.email,
            config.verification_send_limit,
            config.frontend_url.clone(),
        );

        Self {
            config,
            tokens,
            auth_service,
            verification_service,
            realtime,
        }
    }

    /// Log out and tell the user's open connections which session ended.
    pub async fn logout(&self, access_token: Option<&str>) -> Result<Option<Session>> {
        let deleted = self.auth_service.logout_user(access_token).await?;
        if let Some(session) = &deleted {
            self.realtime.notify_user(
                &session.user,
                SESSION_REVOKED,
                serde_json::json!({ "sessionId": session.id }),
            );
        }
        Ok(deleted)
    }

    /// Reset a password; every session of the user ends, so every
    /// connection is told.
    pub async fn reset_password(
        &self,
        token: Option<&str>,
        new_password: &str,
    ) -> Result<PublicUser> {
        let user = self
            .verification_service
            .reset_password(token, new_password)
            .await?;
        self.realtime.notify_user(
            &user.id,
            SESSION_REVOKED,
            serde_json::json!({ "sessionId": null }),
        );
        Ok(user)
    }
}
