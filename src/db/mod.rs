// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! Services talk to the store traits below. Each mutating method is a single
//! atomic operation against one document; callers never split a
//! read-modify-write across two round trips.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    NewSession, NewUser, Session, UpsertOutcome, User, Verification, VerificationDraft,
    VerificationType,
};

/// Collection names as constants.
pub mod collections {
    /// Keyed by normalized email
    pub const USERS: &str = "users";
    /// Keyed by session id
    pub const SESSIONS: &str = "sessions";
    /// Keyed by `{type}_{email}`
    pub const VERIFICATIONS: &str = "verifications";
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>>;

    /// Fails with `Conflict` if the email is already taken.
    async fn create_user(&self, user: NewUser) -> Result<User>;

    /// Returns false if no such user.
    async fn update_password(&self, id: &str, password_hash: &str) -> Result<bool>;

    async fn delete_user(&self, id: &str) -> Result<Option<User>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: NewSession) -> Result<Session>;

    /// Finds a session only if `expires_at > now`.
    async fn find_live_session(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Session>>;

    /// Moves `expires_at` forward. Never shortens a session and never
    /// recreates a reaped one. Returns false if the session is gone or no
    /// longer live at `now`.
    async fn extend_session(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// No-op returning `None` if the session does not exist.
    async fn delete_session(&self, id: &str) -> Result<Option<Session>>;

    async fn delete_user_sessions(&self, user_id: &str) -> Result<usize>;
}

#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn find_live_verification(
        &self,
        email: &str,
        kind: VerificationType,
        now: DateTime<Utc>,
    ) -> Result<Option<Verification>>;

    async fn find_verification_by_session(
        &self,
        kind: VerificationType,
        session: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Verification>>;

    /// Create the record for `(draft.email, draft.kind)`, or update a live one
    /// in place if its `times` is below `send_limit`.
    async fn upsert_verification(
        &self,
        draft: VerificationDraft,
        send_limit: u32,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome>;

    /// Delete the live record for `(email, kind)` if it carries `session`.
    /// Of several concurrent callers, at most one gets `Some`.
    async fn take_verification(
        &self,
        email: &str,
        kind: VerificationType,
        session: &str,
    ) -> Result<Option<Verification>>;
}

/// Document id of the verification record for `(email, kind)`.
pub fn verification_doc_id(email: &str, kind: VerificationType) -> String {
    format!("{}_{}", kind.as_str(), urlencoding::encode(email))
}

/// Document id of the user with `email`.
pub fn user_doc_id(email: &str) -> String {
    urlencoding::encode(email).into_owned()
}

/// Apply a create-or-update to the current state of one verification record.
///
/// Shared by the backends so the limit rule lives in one place.
pub(crate) fn next_verification(
    current: Option<&Verification>,
    draft: VerificationDraft,
    send_limit: u32,
    now: DateTime<Utc>,
) -> UpsertOutcome {
    match current {
        Some(existing) if existing.is_live(now) => {
            if existing.times >= send_limit {
                return UpsertOutcome::LimitReached;
            }
            UpsertOutcome::Updated(Verification {
                session: draft.session,
                verification_code: draft.verification_code,
                times: existing.times + 1,
                expires_at: draft.expires_at,
                ..existing.clone()
            })
        }
        // Absent, or lapsed but not yet reaped: start over.
        _ => UpsertOutcome::Created(Verification {
            id: verification_doc_id(&draft.email, draft.kind),
            email: draft.email,
            kind: draft.kind,
            session: draft.session,
            verification_code: draft.verification_code,
            times: 1,
            expires_at: draft.expires_at,
            created_at: now,
        }),
    }
}
