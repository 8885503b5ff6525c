// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! One-time verification records (email confirmation, password reset).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    EmailVerification,
    PasswordReset,
}

impl VerificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationType::EmailVerification => "email_verification",
            VerificationType::PasswordReset => "password_reset",
        }
    }
}

/// Server-side state for one in-flight verification.
///
/// At most one live record exists per `(email, kind)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub id: String,
    pub email: String,
    pub kind: VerificationType,
    /// Random correlation string, carried as the verification token's `sessionId`
    pub session: String,
    /// Hashed code (email verification only)
    pub verification_code: Option<String>,
    /// How many times this record has been issued
    pub times: u32,
    #[serde(with = "firestore::serialize_as_timestamp")]
    pub expires_at: DateTime<Utc>,
    #[serde(with = "firestore::serialize_as_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Verification {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Values written by a create-or-update of a verification record.
#[derive(Debug, Clone)]
pub struct VerificationDraft {
    pub email: String,
    pub kind: VerificationType,
    pub session: String,
    /// Already hashed
    pub verification_code: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Result of an atomic create-or-update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Created(Verification),
    Updated(Verification),
    /// The live record already reached the send limit; nothing was written.
    LimitReached,
}
