// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Each bearer-token kind is signed with its own secret. The secrets are
//! loaded once at startup and must be pairwise distinct.

use std::env;

/// Default number of times a verification email may be issued for one record.
pub const DEFAULT_VERIFICATION_SEND_LIMIT: u32 = 5;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend origin, used for CORS and for links sent by email
    pub frontend_url: String,
    /// GCP project ID (Firestore and Firebase Auth)
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// How many times a verification record may be (re)issued before it expires
    pub verification_send_limit: u32,
    /// Sender address for outbound email
    pub email_from: String,

    // --- Secrets ---
    /// Signing key for access tokens
    pub access_token_secret: Vec<u8>,
    /// Signing key for refresh tokens
    pub refresh_token_secret: Vec<u8>,
    /// Signing key for user-preference tokens
    pub user_preference_secret: Vec<u8>,
    /// Signing key for verification tokens
    pub verification_secret: Vec<u8>,
    /// Email provider API key
    pub resend_api_key: String,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            verification_send_limit: DEFAULT_VERIFICATION_SEND_LIMIT,
            email_from: "TuneStream <no-reply@tunestream.app>".to_string(),
            access_token_secret: b"test_access_secret_32_bytes_min!".to_vec(),
            refresh_token_secret: b"test_refresh_secret_32_bytes_mn!".to_vec(),
            user_preference_secret: b"test_preference_secret_32_bytes!".to_vec(),
            verification_secret: b"test_verification_secret_32_byte".to_vec(),
            resend_api_key: "re_test_key".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file is honored for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let config = Self {
            frontend_url: env::var("FRONTEND_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            verification_send_limit: match env::var("VERIFICATION_SEND_LIMIT") {
                Ok(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("VERIFICATION_SEND_LIMIT must be a number"))?,
                Err(_) => DEFAULT_VERIFICATION_SEND_LIMIT,
            },
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "TuneStream <no-reply@tunestream.app>".to_string()),

            access_token_secret: secret("ACCESS_TOKEN_SECRET")?,
            refresh_token_secret: secret("REFRESH_TOKEN_SECRET")?,
            user_preference_secret: secret("USER_PREFERENCE_TOKEN_SECRET")?,
            verification_secret: secret("VERIFICATION_TOKEN_SECRET")?,
            resend_api_key: env::var("RESEND_API_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("RESEND_API_KEY"))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations where two token kinds would share a key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secrets = [
            &self.access_token_secret,
            &self.refresh_token_secret,
            &self.user_preference_secret,
            &self.verification_secret,
        ];

        for (i, a) in secrets.iter().enumerate() {
            if a.is_empty() {
                return Err(ConfigError::Invalid("token secrets must not be empty"));
            }
            if secrets[i + 1..].iter().any(|b| b == a) {
                return Err(ConfigError::Invalid("token secrets must be distinct"));
            }
        }

        if self.verification_send_limit == 0 {
            return Err(ConfigError::Invalid(
                "VERIFICATION_SEND_LIMIT must be at least 1",
            ));
        }

        Ok(())
    }
}

fn secret(name: &'static str) -> Result<Vec<u8>, ConfigError> {
    env::var(name)
        .map(|v| v.trim().as_bytes().to_vec())
        .map_err(|_| ConfigError::Missing(name))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
