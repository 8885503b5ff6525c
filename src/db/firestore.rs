// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides the store traits over three collections:
//! - Users (keyed by normalized email)
//! - Sessions (keyed by random id, reaped by a TTL policy on `expires_at`)
//! - Verifications (keyed by `{type}_{email}`, reaped the same way)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use firestore::errors::FirestoreError;
use firestore::FirestoreWritePrecondition;

use super::{
    collections, next_verification, user_doc_id, verification_doc_id, SessionStore, UserStore,
    VerificationStore,
};
use crate::crypto::new_id;
use crate::error::{AppError, Result};
use crate::models::{
    NewSession, NewUser, Session, UpsertOutcome, User, UserPreferences, Verification,
    VerificationDraft, VerificationType,
};

// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// Attempts for an optimistic read-check-write before giving up.
const MAX_WRITE_ATTEMPTS: usize = 5;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client for testing.
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Read a document together with its update time, for conditional writes.
    async fn get_versioned<T>(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<(T, Option<DateTime<Utc>>)>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let doc = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collection)
            .one(doc_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let Some(doc) = doc else {
            return Ok(None);
        };

        let update_time = doc
            .update_time
            .as_ref()
            .and_then(|ts| DateTime::from_timestamp(ts.seconds, ts.nanos as u32));
        let value = firestore::FirestoreDb::deserialize_doc_to::<T>(&doc)
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(Some((value, update_time)))
    }

    /// Helper to batch delete documents using transactions.
    async fn batch_delete<T, F>(
        &self,
        items: &[T],
        collection: &str,
        id_extractor: F,
    ) -> Result<()>
    where
        F: Fn(&T) -> String,
    {
        let client = self.get_client()?;

        for chunk in items.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for item in chunk {
                let doc_id = id_extractor(item);
                client
                    .fluent()
                    .delete()
                    .from(collection)
                    .document_id(&doc_id)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add deletion to transaction for {}: {}",
                            collection, e
                        ))
                    })?;
            }

            transaction.commit().await.map_err(|e| {
                AppError::Database(format!("Failed to commit batch deletion: {}", e))
            })?;
        }

        Ok(())
    }
}

/// How a failed conditional write should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteFailure {
    /// Someone else touched the document first.
    Conflict,
    /// The backend was briefly unreachable; the write did not happen.
    Transient,
    Fatal,
}

fn classify_write_error(err: &FirestoreError) -> WriteFailure {
    match err {
        // ALREADY_EXISTS and NOT_FOUND from create/exists preconditions.
        FirestoreError::DataConflictError(_) | FirestoreError::DataNotFoundError(_) => {
            WriteFailure::Conflict
        }
        // A stale update-time precondition surfaces as FAILED_PRECONDITION.
        FirestoreError::DatabaseError(e) if e.public.code == "FailedPrecondition" => {
            WriteFailure::Conflict
        }
        FirestoreError::DatabaseError(e) if e.retry_possible => WriteFailure::Transient,
        _ => WriteFailure::Fatal,
    }
}

fn retries_exhausted(what: &str, last: Option<FirestoreError>) -> AppError {
    match last {
        Some(e) => AppError::Database(format!("{} failed after retries: {}", what, e)),
        None => AppError::Database(format!("{} kept conflicting", what)),
    }
}

fn precondition_for(update_time: Option<DateTime<Utc>>) -> FirestoreWritePrecondition {
    match update_time {
        Some(at) => FirestoreWritePrecondition::UpdateTime(at),
        None => FirestoreWritePrecondition::Exists(true),
    }
}

// ─── User Operations ─────────────────────────────────────────

#[async_trait]
impl UserStore for FirestoreDb {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(&user_doc_id(email))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let users: Vec<User> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::USERS)
            .filter(|q| q.for_all([q.field("id").eq(id)]))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(users.into_iter().next())
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
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

        let mut last_error = None;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            // Keyed by email: the create precondition makes the email unique.
            let result: std::result::Result<(), FirestoreError> = self
                .get_client()?
                .fluent()
                .update()
                .in_col(collections::USERS)
                .precondition(FirestoreWritePrecondition::Exists(false))
                .document_id(user_doc_id(&created.email))
                .object(&created)
                .execute()
                .await;

            let Err(e) = result else {
                return Ok(created);
            };
            match classify_write_error(&e) {
                WriteFailure::Conflict => {
                    return Err(AppError::conflict("Email is already in use"))
                }
                WriteFailure::Transient => {
                    tracing::warn!(error = %e, "User create hit a transient error, retrying");
                    last_error = Some(e);
                }
                WriteFailure::Fatal => return Err(AppError::Database(e.to_string())),
            }
        }

        Err(retries_exhausted("User create", last_error))
    }

    async fn update_password(&self, id: &str, password_hash: &str) -> Result<bool> {
        let Some(mut user) = self.find_user_by_id(id).await? else {
            return Ok(false);
        };
        user.password_hash = Some(password_hash.to_string());

        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .fields(firestore::paths!(User::{password_hash}))
            .in_col(collections::USERS)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(user_doc_id(&user.email))
            .object(&user)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(true)
    }

    async fn delete_user(&self, id: &str) -> Result<Option<User>> {
        let Some(user) = self.find_user_by_id(id).await? else {
            return Ok(None);
        };

        self.get_client()?
            .fluent()
            .delete()
            .from(collections::USERS)
            .document_id(user_doc_id(&user.email))
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        tracing::debug!(user_id = id, "Deleted user document");
        Ok(Some(user))
    }
}

// ─── Session Operations ──────────────────────────────────────

#[async_trait]
impl SessionStore for FirestoreDb {
    async fn create_session(&self, session: NewSession) -> Result<Session> {
        let created = Session {
            id: new_id()?,
            user: session.user,
            device_info: session.device_info,
            expires_at: session.expires_at,
            created_at: Utc::now(),
        };

        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::SESSIONS)
            .precondition(FirestoreWritePrecondition::Exists(false))
            .document_id(&created.id)
            .object(&created)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(created)
    }

    async fn find_live_session(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Session>> {
        let session: Option<Session> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::SESSIONS)
            .obj()
            .one(id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(session.filter(|s| s.is_live(now)))
    }

    async fn extend_session(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut last_error = None;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some((mut session, update_time)) = self
                .get_versioned::<Session>(collections::SESSIONS, id)
                .await?
            else {
                return Ok(false);
            };

            // Expired but not yet reaped by the TTL policy.
            if !session.is_live(now) {
                return Ok(false);
            }

            if expires_at <= session.expires_at {
                return Ok(true);
            }
            session.expires_at = expires_at;

            let result: std::result::Result<(), FirestoreError> = self
                .get_client()?
                .fluent()
                .update()
                .fields(firestore::paths!(Session::{expires_at}))
                .in_col(collections::SESSIONS)
                .precondition(precondition_for(update_time))
                .document_id(id)
                .object(&session)
                .execute()
                .await;

            let Err(e) = result else {
                return Ok(true);
            };
            match classify_write_error(&e) {
                WriteFailure::Conflict => {
                    tracing::debug!(session_id = id, "Session changed during renewal, retrying");
                }
                WriteFailure::Transient => {
                    tracing::warn!(session_id = id, error = %e, "Session renewal hit a transient error, retrying");
                    last_error = Some(e);
                }
                WriteFailure::Fatal => return Err(AppError::Database(e.to_string())),
            }
        }

        Err(retries_exhausted(&format!("Session {} renewal", id), last_error))
    }

    async fn delete_session(&self, id: &str) -> Result<Option<Session>> {
        let session: Option<Session> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::SESSIONS)
            .obj()
            .one(id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if session.is_none() {
            return Ok(None);
        }

        self.get_client()?
            .fluent()
            .delete()
            .from(collections::SESSIONS)
            .document_id(id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(session)
    }

    async fn delete_user_sessions(&self, user_id: &str) -> Result<usize> {
        let sessions: Vec<Session> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::SESSIONS)
            .filter(|q| q.for_all([q.field("user").eq(user_id)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let count = sessions.len();
        self.batch_delete(&sessions, collections::SESSIONS, |s: &Session| {
            s.id.clone()
        })
        .await?;

        tracing::debug!(user_id, count, "Deleted user sessions");
        Ok(count)
    }
}

// ─── Verification Operations ─────────────────────────────────

#[async_trait]
impl VerificationStore for FirestoreDb {
    async fn find_live_verification(
        &self,
        email: &str,
        kind: VerificationType,
        now: DateTime<Utc>,
    ) -> Result<Option<Verification>> {
        let record: Option<Verification> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::VERIFICATIONS)
            .obj()
            .one(&verification_doc_id(email, kind))
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(record.filter(|v| v.is_live(now)))
    }

    async fn find_verification_by_session(
        &self,
        kind: VerificationType,
        session: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Verification>> {
        let records: Vec<Verification> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::VERIFICATIONS)
            .filter(|q| {
                q.for_all([
                    q.field("kind").eq(kind.as_str()),
                    q.field("session").eq(session),
                ])
            })
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(records.into_iter().find(|v| v.is_live(now)))
    }

    async fn upsert_verification(
        &self,
        draft: VerificationDraft,
        send_limit: u32,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let doc_id = verification_doc_id(&draft.email, draft.kind);

        let mut last_error = None;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self
                .get_versioned::<Verification>(collections::VERIFICATIONS, &doc_id)
                .await?;

            let (existing, precondition) = match &current {
                Some((record, update_time)) => (Some(record), precondition_for(*update_time)),
                None => (None, FirestoreWritePrecondition::Exists(false)),
            };

            let outcome = next_verification(existing, draft.clone(), send_limit, now);
            let record = match &outcome {
                UpsertOutcome::Created(record) | UpsertOutcome::Updated(record) => record,
                UpsertOutcome::LimitReached => return Ok(outcome),
            };

            // The precondition turns read-check-write into a compare-and-set.
            let result: std::result::Result<(), FirestoreError> = self
                .get_client()?
                .fluent()
                .update()
                .in_col(collections::VERIFICATIONS)
                .precondition(precondition)
                .document_id(&doc_id)
                .object(record)
                .execute()
                .await;

            let Err(e) = result else {
                return Ok(outcome);
            };
            match classify_write_error(&e) {
                WriteFailure::Conflict => {
                    tracing::debug!(doc_id = %doc_id, "Verification changed concurrently, retrying");
                }
                WriteFailure::Transient => {
                    tracing::warn!(doc_id = %doc_id, error = %e, "Verification write hit a transient error, retrying");
                    last_error = Some(e);
                }
                WriteFailure::Fatal => return Err(AppError::Database(e.to_string())),
            }
        }

        Err(retries_exhausted(
            &format!("Verification {} update", doc_id),
            last_error,
        ))
    }

    async fn take_verification(
        &self,
        email: &str,
        kind: VerificationType,
        session: &str,
    ) -> Result<Option<Verification>> {
        let doc_id = verification_doc_id(email, kind);

        let mut last_error = None;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some((record, update_time)) = self
                .get_versioned::<Verification>(collections::VERIFICATIONS, &doc_id)
                .await?
            else {
                return Ok(None);
            };

            if record.session != session || !record.is_live(Utc::now()) {
                return Ok(None);
            }

            // Only the caller whose precondition still holds deletes the record.
            let result = self
                .get_client()?
                .fluent()
                .delete()
                .from(collections::VERIFICATIONS)
                .document_id(&doc_id)
                .precondition(precondition_for(update_time))
                .execute()
                .await;

            let Err(e) = result else {
                return Ok(Some(record));
            };
            match classify_write_error(&e) {
                WriteFailure::Conflict => return Ok(None),
                WriteFailure::Transient => {
                    tracing::warn!(doc_id = %doc_id, error = %e, "Verification take hit a transient error, retrying");
                    last_error = Some(e);
                }
                WriteFailure::Fatal => return Err(AppError::Database(e.to_string())),
            }
        }

        Err(retries_exhausted(
            &format!("Verification {} take", doc_id),
            last_error,
        ))
    }
}
