// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process store for tests and local development.
//!
//! Every mutation goes through a single `DashMap` entry, whose shard lock
//! gives the same per-document atomicity Firestore provides.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};

use super::{next_verification, SessionStore, UserStore, VerificationStore};
use crate::crypto::new_id;
use crate::error::{AppError, Result};
use crate::models::{
    NewSession, NewUser, Session, UpsertOutcome, User, UserPreferences, Verification,
    VerificationDraft, VerificationType,
};

#[derive(Default)]
pub struct MemoryDb {
    /// Keyed by email
    users: DashMap<String, User>,
    sessions: DashMap<String, Session>,
    verifications: DashMap<(String, VerificationType), Verification>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, live or lapsed.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Insert or replace a session as-is (fixtures).
    pub fn put_session(&self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    /// Raw session lookup, ignoring expiry.
    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Raw verification lookup, ignoring expiry.
    pub fn get_verification(&self, email: &str, kind: VerificationType) -> Option<Verification> {
        self.verifications
            .get(&(email.to_string(), kind))
            .map(|v| v.clone())
    }
}

#[async_trait]
impl UserStore for MemoryDb {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.users.get(email).map(|u| u.clone()))
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.id == id)
            .map(|u| u.value().clone()))
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        match self.users.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(AppError::conflict("Email is already in use")),
            Entry::Vacant(slot) => {
                let created = User {
                    id: new_id()?,
                    email: user.email,
                    password_hash: user.password_hash,
                    auth_for_third_party: user.auth_for_third_party,
                    firebase_uid: user.firebase_uid,
                    name: user.name,
                    profile_picture: user.profile_picture,
                    preferences: UserPreferences::default(),
                    created_at: Utc::now(),
                };
                slot.insert(created.clone());
                Ok(created)
            }
        }
    }

    async fn update_password(&self, id: &str, password_hash: &str) -> Result<bool> {
        for mut user in self.users.iter_mut() {
            if user.id == id {
                user.password_hash = Some(password_hash.to_string());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn delete_user(&self, id: &str) -> Result<Option<User>> {
        let email = self
            .users
            .iter()
            .find(|u| u.id == id)
            .map(|u| u.key().clone());

        Ok(email.and_then(|email| self.users.remove(&email).map(|(_, user)| user)))
    }
}

#[async_trait]
impl SessionStore for MemoryDb {
    async fn create_session(&self, session: NewSession) -> Result<Session> {
        let created = Session {
            id: new_id()?,
            user: session.user,
            device_info: session.device_info,
            expires_at: session.expires_at,
            created_at: Utc::now(),
        };
        self.sessions.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn find_live_session(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .get(id)
            .filter(|s| s.is_live(now))
            .map(|s| s.clone()))
    }

    async fn extend_session(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        match self.sessions.get_mut(id) {
            Some(mut session) if session.is_live(now) => {
                if expires_at > session.expires_at {
                    session.expires_at = expires_at;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.remove(id).map(|(_, s)| s))
    }

    async fn delete_user_sessions(&self, user_id: &str) -> Result<usize> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.user != user_id);
        Ok(before.saturating_sub(self.sessions.len()))
    }
}

#[async_trait]
impl VerificationStore for MemoryDb {
    async fn find_live_verification(
        &self,
        email: &str,
        kind: VerificationType,
        now: DateTime<Utc>,
    ) -> Result<Option<Verification>> {
        Ok(self
            .verifications
            .get(&(email.to_string(), kind))
            .filter(|v| v.is_live(now))
            .map(|v| v.clone()))
    }

    async fn find_verification_by_session(
        &self,
        kind: VerificationType,
        session: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Verification>> {
        Ok(self
            .verifications
            .iter()
            .find(|v| v.kind == kind && v.session == session && v.is_live(now))
            .map(|v| v.value().clone()))
    }

    async fn upsert_verification(
        &self,
        draft: VerificationDraft,
        send_limit: u32,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let key = (draft.email.clone(), draft.kind);

        let outcome = match self.verifications.entry(key) {
            Entry::Occupied(mut slot) => {
                let outcome = next_verification(Some(slot.get()), draft, send_limit, now);
                if let UpsertOutcome::Created(record) | UpsertOutcome::Updated(record) = &outcome {
                    slot.insert(record.clone());
                }
                outcome
            }
            Entry::Vacant(slot) => {
                let outcome = next_verification(None, draft, send_limit, now);
                if let UpsertOutcome::Created(record) = &outcome {
                    slot.insert(record.clone());
                }
                outcome
            }
        };

        Ok(outcome)
    }

    async fn take_verification(
        &self,
        email: &str,
        kind: VerificationType,
        session: &str,
    ) -> Result<Option<Verification>> {
        let now = Utc::now();
        Ok(self
            .verifications
            .remove_if(&(email.to_string(), kind), |_, v| {
                v.session == session && v.is_live(now)
            })
            .map(|(_, v)| v))
    }
}
