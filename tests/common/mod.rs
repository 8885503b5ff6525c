// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tunestream_auth::config::Config;
use tunestream_auth::db::{FirestoreDb, MemoryDb};
use tunestream_auth::error::Result;
use tunestream_auth::realtime::RealtimeServer;
use tunestream_auth::routes::create_router;
use tunestream_auth::services::{
    Argon2Hasher, EmailMessage, EmailReceipt, EmailSender, ExternalIdentity, IdentityError,
    IdentityProvider, PasswordHasher,
};
use tunestream_auth::{AppState, Backends};

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Cheap Argon2 parameters so tests don't spend seconds hashing.
#[allow(dead_code)]
pub fn fast_hasher() -> Arc<Argon2Hasher> {
    Arc::new(Argon2Hasher::with_cost(8, 1, 1).expect("valid argon2 params"))
}

/// Email sender that keeps every message instead of delivering it.
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
    fail: AtomicBool,
}

#[allow(dead_code)]
impl RecordingEmailSender {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Make subsequent sends come back without a message id.
    pub fn fail_next_sends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// The code in the most recent verification email.
    pub fn last_code(&self) -> String {
        let message = self.sent.lock().unwrap().last().cloned().expect("no email sent");
        let start = message.html.find("<strong>").expect("no code in email") + "<strong>".len();
        let end = message.html[start..].find("</strong>").expect("unterminated code") + start;
        message.html[start..end].to_string()
    }

    /// The token query parameter of the most recent reset link.
    pub fn last_reset_token(&self) -> String {
        let message = self.sent.lock().unwrap().last().cloned().expect("no email sent");
        let start = message.html.find("token=").expect("no link in email") + "token=".len();
        let end = message.html[start..].find('"').expect("unterminated link") + start;
        urlencoding::decode(&message.html[start..end])
            .expect("link token is utf-8")
            .into_owned()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: EmailMessage) -> EmailReceipt {
        if self.fail.load(Ordering::SeqCst) {
            return EmailReceipt {
                id: None,
                error: Some("provider unavailable".to_string()),
            };
        }

        let mut sent = self.sent.lock().unwrap();
        sent.push(message);
        EmailReceipt {
            id: Some(format!("msg-{}", sent.len())),
            error: None,
        }
    }
}

/// Identity provider answering from a fixed table of external tokens.
#[derive(Default)]
pub struct StubIdentityProvider {
    identities: DashMap<String, ExternalIdentity>,
    deleted: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl StubIdentityProvider {
    pub fn register(&self, token: &str, identity: ExternalIdentity) {
        self.identities.insert(token.to_string(), identity);
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityProvider for StubIdentityProvider {
    async fn verify_id_token(
        &self,
        token: &str,
    ) -> std::result::Result<ExternalIdentity, IdentityError> {
        self.identities
            .get(token)
            .map(|i| i.clone())
            .ok_or_else(|| IdentityError::Rejected("unknown token".to_string()))
    }

    async fn delete_user(&self, uid: &str) -> std::result::Result<(), IdentityError> {
        self.deleted.lock().unwrap().push(uid.to_string());
        Ok(())
    }
}

/// Hasher whose `compare` waits until `parties` callers are comparing at once.
#[allow(dead_code)]
pub struct RendezvousHasher {
    inner: Argon2Hasher,
    barrier: tokio::sync::Barrier,
}

#[allow(dead_code)]
impl RendezvousHasher {
    pub fn new(parties: usize) -> Self {
        Self {
            inner: Argon2Hasher::with_cost(8, 1, 1).expect("valid argon2 params"),
            barrier: tokio::sync::Barrier::new(parties),
        }
    }
}

#[async_trait]
impl PasswordHasher for RendezvousHasher {
    async fn hash(&self, plaintext: &str) -> Result<String> {
        self.inner.hash(plaintext).await
    }

    async fn compare(&self, plaintext: &str, digest: &str) -> bool {
        self.barrier.wait().await;
        self.inner.compare(plaintext, digest).await
    }
}

/// Services wired over in-memory collaborators.
pub struct TestApp {
    pub state: Arc<AppState>,
    pub db: Arc<MemoryDb>,
    pub email: Arc<RecordingEmailSender>,
    pub identity: Arc<StubIdentityProvider>,
}

#[allow(dead_code)]
impl TestApp {
    pub fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }
}

#[allow(dead_code)]
pub fn test_app() -> TestApp {
    test_app_with(Config::default(), fast_hasher())
}

#[allow(dead_code)]
pub fn test_app_with(config: Config, hasher: Arc<dyn PasswordHasher>) -> TestApp {
    let db = Arc::new(MemoryDb::new());
    let email = Arc::new(RecordingEmailSender::default());
    let identity = Arc::new(StubIdentityProvider::default());

    let backends = Backends {
        users: db.clone(),
        sessions: db.clone(),
        verifications: db.clone(),
        hasher,
        email: email.clone(),
        identity: identity.clone(),
    };

    let state = Arc::new(AppState::new(config, backends, RealtimeServer::start()));

    TestApp {
        state,
        db,
        email,
        identity,
    }
}
