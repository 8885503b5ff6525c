// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bearer-token codec.
//!
//! Four token kinds are issued, each signed with its own secret and bound to
//! the `user` audience. Verification never fails the caller: it reports the
//! payload, or an error message, or neither when no token was presented.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::UserPreferences;
use crate::time_utils::{ACCESS_TOKEN_LIFETIME, SESSION_LIFETIME, VERIFICATION_LIFETIME};

/// Audience claim carried by every token.
pub const AUDIENCE: &str = "user";

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
    UserPreference,
    Verification,
}

impl TokenKind {
    /// Fixed lifetime for each kind.
    pub fn lifetime(self) -> Duration {
        match self {
            TokenKind::Access => ACCESS_TOKEN_LIFETIME,
            TokenKind::Refresh | TokenKind::UserPreference => SESSION_LIFETIME,
            TokenKind::Verification => VERIFICATION_LIFETIME,
        }
    }
}

/// Payload of an access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPayload {
    pub user_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firebase_user_id: Option<String>,
}

/// Payload of a refresh token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    pub session_id: String,
}

/// Payload of a verification token: the verification record's `session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationPayload {
    pub session_id: String,
}

/// Registered claims wrapped around a payload.
#[derive(Debug, Serialize, Deserialize)]
struct Claims<T> {
    #[serde(flatten)]
    payload: T,
    aud: Vec<String>,
    iat: i64,
    exp: i64,
}

/// Key material and lifetime for one token kind.
#[derive(Clone)]
pub struct SignOptions {
    kind: TokenKind,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expires_in: Duration,
}

impl SignOptions {
    pub fn new(kind: TokenKind, secret: &[u8], expires_in: Duration) -> Self {
        Self {
            kind,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            expires_in,
        }
    }

    /// Options for `kind` with its fixed lifetime.
    pub fn for_kind(kind: TokenKind, secret: &[u8]) -> Self {
        Self::new(kind, secret, kind.lifetime())
    }
}

/// Outcome of verifying a token.
///
/// `payload` and `error` are never both set. Both are `None` when no token
/// was supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct Verified<T> {
    pub payload: Option<T>,
    pub error: Option<String>,
}

impl<T> Verified<T> {
    fn absent() -> Self {
        Self {
            payload: None,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            payload: None,
            error: Some(error),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.contains("expired"))
    }
}

/// Sign `payload` with the key and lifetime from `options`.
pub fn sign<T: Serialize>(payload: &T, options: &SignOptions) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        payload,
        aud: vec![AUDIENCE.to_string()],
        iat: now.timestamp(),
        exp: (now + options.expires_in).timestamp(),
    };

    encode(&Header::new(ALGORITHM), &claims, &options.encoding_key).map_err(|e| {
        AppError::Internal(anyhow::anyhow!(
            "Failed to sign {:?} token: {}",
            options.kind,
            e
        ))
    })
}

/// Verify `token` against `options`. Never panics or errors.
pub fn verify<T: DeserializeOwned>(token: Option<&str>, options: &SignOptions) -> Verified<T> {
    let Some(token) = token else {
        return Verified::absent();
    };

    let mut validation = Validation::new(ALGORITHM);
    validation.set_audience(&[AUDIENCE]);
    validation.set_required_spec_claims(&["exp", "aud"]);
    validation.leeway = 0;

    match decode::<Claims<T>>(token, &options.decoding_key, &validation) {
        Ok(data) => Verified {
            payload: Some(data.claims.payload),
            error: None,
        },
        Err(e) => Verified::failed(describe_error(e.kind())),
    }
}

fn describe_error(kind: &ErrorKind) -> String {
    match kind {
        ErrorKind::ExpiredSignature => "jwt expired".to_string(),
        ErrorKind::InvalidSignature => "invalid signature".to_string(),
        ErrorKind::InvalidAudience => "jwt audience invalid".to_string(),
        ErrorKind::InvalidAlgorithm => "invalid algorithm".to_string(),
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => "jwt malformed".to_string(),
        other => format!("invalid token: {:?}", other),
    }
}

/// The four sign options, built once from configuration.
#[derive(Clone)]
pub struct TokenCodec {
    access: SignOptions,
    refresh: SignOptions,
    user_preference: SignOptions,
    verification: SignOptions,
}

impl TokenCodec {
    pub fn new(config: &Config) -> Self {
        Self {
            access: SignOptions::for_kind(TokenKind::Access, &config.access_token_secret),
            refresh: SignOptions::for_kind(TokenKind::Refresh, &config.refresh_token_secret),
            user_preference: SignOptions::for_kind(
                TokenKind::UserPreference,
                &config.user_preference_secret,
            ),
            verification: SignOptions::for_kind(
                TokenKind::Verification,
                &config.verification_secret,
            ),
        }
    }

    pub fn sign_access(&self, payload: &AccessPayload) -> Result<String> {
        sign(payload, &self.access)
    }

    pub fn verify_access(&self, token: Option<&str>) -> Verified<AccessPayload> {
        verify(token, &self.access)
    }

    pub fn sign_refresh(&self, payload: &RefreshPayload) -> Result<String> {
        sign(payload, &self.refresh)
    }

    pub fn verify_refresh(&self, token: Option<&str>) -> Verified<RefreshPayload> {
        verify(token, &self.refresh)
    }

    pub fn sign_user_preference(&self, preferences: &UserPreferences) -> Result<String> {
        sign(preferences, &self.user_preference)
    }

    pub fn verify_user_preference(&self, token: Option<&str>) -> Verified<UserPreferences> {
        verify(token, &self.user_preference)
    }

    pub fn sign_verification(&self, payload: &VerificationPayload) -> Result<String> {
        sign(payload, &self.verification)
    }

    pub fn verify_verification(&self, token: Option<&str>) -> Verified<VerificationPayload> {
        verify(token, &self.verification)
    }
}
