// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account creation, login, logout and token refresh.
//!
//! A successful login or registration creates a session that lives 30 days.
//! Refreshing inside the last day of that window renews the session and
//! rotates the refresh token; refreshing earlier only mints an access token.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use super::firebase::{IdentityError, IdentityProvider};
use super::normalize_email;
use super::password::PasswordHasher;
use crate::db::{SessionStore, UserStore};
use crate::error::{AppError, Result, ThirdPartyCode};
use crate::models::{NewSession, NewUser, PublicUser, Session, User};
use crate::time_utils::{from_now, SESSION_LIFETIME, SESSION_RENEWAL_WINDOW};
use crate::token::{AccessPayload, RefreshPayload, TokenCodec};

/// Same message for unknown email and wrong password.
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Google serves profile photos at 96px unless asked otherwise.
const PROFILE_PICTURE_SIZE: u32 = 400;

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    /// Ignored for third-party accounts
    pub password: String,
    pub device_info: String,
    pub auth_for_third_party: bool,
    pub firebase_uid: Option<String>,
    pub name: Option<String>,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LoginRequest {
    pub email: String,
    pub password: Option<String>,
    pub device_info: String,
    pub auth_for_third_party: bool,
    pub firebase_uid: Option<String>,
    /// Access token the caller already holds, if any
    pub existing_access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub user_preference_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthSuccess {
    pub user: PublicUser,
    #[serde(flatten)]
    pub tokens: IssuedTokens,
    #[serde(skip)]
    pub session_id: String,
}

/// Result of a refresh. No new refresh token means "keep the old one".
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedTokens {
    pub new_access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThirdPartyProfile {
    pub email: String,
    pub uid: String,
    pub picture: Option<String>,
}

pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    tokens: TokenCodec,
    hasher: Arc<dyn PasswordHasher>,
    identity: Arc<dyn IdentityProvider>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        tokens: TokenCodec,
        hasher: Arc<dyn PasswordHasher>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            users,
            sessions,
            tokens,
            hasher,
            identity,
        }
    }

    pub fn tokens(&self) -> &TokenCodec {
        &self.tokens
    }

    pub async fn create_account(&self, account: NewAccount) -> Result<AuthSuccess> {
        let email = normalize_email(&account.email)?;

        if self.users.find_user_by_email(&email).await?.is_some() {
            return Err(AppError::conflict("Email is already in use"));
        }

        let password_hash = if account.auth_for_third_party {
            None
        } else {
            if account.password.is_empty() {
                return Err(AppError::BadRequest("Password is required".to_string()));
            }
            Some(self.hasher.hash(&account.password).await?)
        };

        let user = self
            .users
            .create_user(NewUser {
                email,
                password_hash,
                auth_for_third_party: account.auth_for_third_party,
                firebase_uid: account.firebase_uid.clone(),
                name: account.name,
                profile_picture: account.profile_picture,
            })
            .await?;

        tracing::info!(user_id = %user.id, third_party = user.auth_for_third_party, "Account created");

        self.start_session(&user, account.device_info, account.firebase_uid)
            .await
    }

    pub async fn login_user(&self, request: LoginRequest) -> Result<AuthSuccess> {
        let email = normalize_email(&request.email)
            .map_err(|_| AppError::unauthorized(INVALID_CREDENTIALS))?;

        let user = self
            .users
            .find_user_by_email(&email)
            .await?
            .ok_or_else(|| AppError::unauthorized(INVALID_CREDENTIALS))?;

        match (user.auth_for_third_party, request.auth_for_third_party) {
            (true, false) => {
                return Err(AppError::forbidden(
                    "This account uses third-party sign-in; password login is not available",
                ));
            }
            (false, true) => {
                return Err(AppError::forbidden(
                    "This account uses email and password; third-party sign-in is not available",
                ));
            }
            _ => {}
        }

        if !request.auth_for_third_party {
            let password = request.password.as_deref().unwrap_or_default();
            let matches = match &user.password_hash {
                Some(digest) => self.hasher.compare(password, digest).await,
                None => false,
            };
            if !matches {
                tracing::warn!(user_id = %user.id, "Password mismatch");
                return Err(AppError::unauthorized(INVALID_CREDENTIALS));
            }
        }

        if let Some(existing) = self
            .active_session_for(&user, request.existing_access_token.as_deref())
            .await?
        {
            tracing::warn!(user_id = %user.id, session_id = %existing.id, "Login while already logged in");
            return Err(AppError::conflict("User is already logged in"));
        }

        tracing::info!(user_id = %user.id, "User logged in");
        self.start_session(&user, request.device_info, request.firebase_uid)
            .await
    }

    /// Deletes the session named by `access_token`, returning it if it existed.
    pub async fn logout_user(&self, access_token: Option<&str>) -> Result<Option<Session>> {
        let payload = self.tokens.verify_access(access_token).payload;

        if let Some(uid) = payload.as_ref().and_then(|p| p.firebase_user_id.clone()) {
            self.delete_external_identity(uid);
        }

        let Some(session_id) = payload.map(|p| p.session_id) else {
            return Ok(None);
        };

        let deleted = self.sessions.delete_session(&session_id).await?;
        if let Some(session) = &deleted {
            tracing::info!(user_id = %session.user, session_id = %session.id, "User logged out");
        }
        Ok(deleted)
    }

    pub async fn refresh_tokens(&self, refresh_token: Option<&str>) -> Result<RefreshedTokens> {
        let payload = self
            .tokens
            .verify_refresh(refresh_token)
            .payload
            .ok_or_else(|| AppError::unauthorized("Invalid refresh token"))?;

        let now = Utc::now();
        let session = self
            .sessions
            .find_live_session(&payload.session_id, now)
            .await?
            .ok_or_else(|| AppError::unauthorized("session is expired"))?;

        let remaining = session.expires_at - now;
        let new_refresh_token = if remaining < SESSION_RENEWAL_WINDOW {
            if !self
                .sessions
                .extend_session(&session.id, now + SESSION_LIFETIME, now)
                .await?
            {
                return Err(AppError::unauthorized("session is expired"));
            }

            tracing::info!(session_id = %session.id, user_id = %session.user, "Session renewed");
            Some(self.tokens.sign_refresh(&RefreshPayload {
                session_id: session.id.clone(),
            })?)
        } else {
            None
        };

        let new_access_token = self.tokens.sign_access(&AccessPayload {
            user_id: session.user,
            session_id: session.id,
            firebase_user_id: None,
        })?;

        Ok(RefreshedTokens {
            new_access_token,
            new_refresh_token,
        })
    }

    pub async fn verify_third_party_credential(
        &self,
        external_token: &str,
    ) -> Result<ThirdPartyProfile> {
        let identity = match self.identity.verify_id_token(external_token).await {
            Ok(identity) => identity,
            Err(IdentityError::Rejected(reason)) => {
                tracing::warn!(reason = %reason, "Third-party credential rejected");
                return Err(AppError::third_party(
                    ThirdPartyCode::InvalidCredential,
                    "Invalid third-party credential",
                    None,
                ));
            }
            Err(IdentityError::Transient(reason)) => {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "Identity provider unavailable: {}",
                    reason
                )));
            }
        };

        let Some(email) = identity.email else {
            return Err(AppError::third_party(
                ThirdPartyCode::EmailMissing,
                "The sign-in provider did not share an email address",
                Some(identity.uid),
            ));
        };

        let email = normalize_email(&email).map_err(|_| {
            AppError::third_party(
                ThirdPartyCode::EmailMissing,
                "The sign-in provider shared an invalid email address",
                Some(identity.uid.clone()),
            )
        })?;

        Ok(ThirdPartyProfile {
            email,
            uid: identity.uid,
            picture: identity.picture.map(|url| enlarge_profile_picture(&url)),
        })
    }

    pub async fn login_with_third_party(
        &self,
        external_token: &str,
        device_info: String,
        existing_access_token: Option<String>,
    ) -> Result<AuthSuccess> {
        let profile = self.verify_third_party_credential(external_token).await?;

        self.login_user(LoginRequest {
            email: profile.email,
            password: None,
            device_info,
            auth_for_third_party: true,
            firebase_uid: Some(profile.uid.clone()),
            existing_access_token,
        })
        .await
        .map_err(|e| match e {
            AppError::Unauthorized(_) => AppError::third_party(
                ThirdPartyCode::UserNotFound,
                "User not found",
                Some(profile.uid),
            ),
            other => other,
        })
    }

    pub async fn register_with_third_party(
        &self,
        external_token: &str,
        device_info: String,
        name: Option<String>,
    ) -> Result<AuthSuccess> {
        let profile = self.verify_third_party_credential(external_token).await?;

        self.create_account(NewAccount {
            email: profile.email,
            password: String::new(),
            device_info,
            auth_for_third_party: true,
            firebase_uid: Some(profile.uid.clone()),
            name,
            profile_picture: profile.picture,
        })
        .await
        .map_err(|e| match e {
            AppError::Conflict(_) => AppError::third_party(
                ThirdPartyCode::UserAlreadyExists,
                "User already exists",
                Some(profile.uid),
            ),
            other => other,
        })
    }

    /// Remove an account with every session it holds.
    pub async fn deregister_user(&self, user_id: &str) -> Result<PublicUser> {
        let user = self
            .users
            .delete_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;

        let sessions = self.sessions.delete_user_sessions(&user.id).await?;

        if let Some(uid) = user.firebase_uid.clone() {
            self.delete_external_identity(uid);
        }

        tracing::info!(user_id = %user.id, sessions, "User deregistered");
        Ok(user.public())
    }

    /// The caller's current session, if `access_token` still names a live
    /// session belonging to `user`.
    async fn active_session_for(
        &self,
        user: &User,
        access_token: Option<&str>,
    ) -> Result<Option<Session>> {
        let Some(payload) = self.tokens.verify_access(access_token).payload else {
            return Ok(None);
        };

        if payload.user_id != user.id {
            return Ok(None);
        }

        Ok(self
            .sessions
            .find_live_session(&payload.session_id, Utc::now())
            .await?
            .filter(|session| session.user == user.id))
    }

    async fn start_session(
        &self,
        user: &User,
        device_info: String,
        firebase_uid: Option<String>,
    ) -> Result<AuthSuccess> {
        let session = self
            .sessions
            .create_session(NewSession {
                user: user.id.clone(),
                device_info,
                expires_at: from_now(SESSION_LIFETIME),
            })
            .await?;

        let tokens = IssuedTokens {
            access_token: self.tokens.sign_access(&AccessPayload {
                user_id: user.id.clone(),
                session_id: session.id.clone(),
                firebase_user_id: firebase_uid,
            })?,
            refresh_token: self.tokens.sign_refresh(&RefreshPayload {
                session_id: session.id.clone(),
            })?,
            user_preference_token: self.tokens.sign_user_preference(&user.preferences)?,
        };

        tracing::debug!(user_id = %user.id, session_id = %session.id, "Session started");

        Ok(AuthSuccess {
            user: user.public(),
            tokens,
            session_id: session.id,
        })
    }

    /// Best-effort removal of an external identity; never blocks the caller.
    fn delete_external_identity(&self, uid: String) {
        let identity = self.identity.clone();
        tokio::spawn(async move {
            if let Err(e) = identity.delete_user(&uid).await {
                tracing::warn!(uid = %uid, error = %e, "Failed to delete third-party identity");
            }
        });
    }
}

/// Rewrite a provider photo URL to request a larger rendition.
///
/// Google photo URLs end in a size directive such as `=s96-c`.
pub fn enlarge_profile_picture(url: &str) -> String {
    let Some(idx) = url.rfind("=s") else {
        return url.to_string();
    };

    let directive = &url[idx + 2..];
    let digits = directive
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(directive.len());

    if digits == 0 {
        return url.to_string();
    }

    format!(
        "{}=s{}{}",
        &url[..idx],
        PROFILE_PICTURE_SIZE,
        &directive[digits..]
    )
}
