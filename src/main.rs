// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! TuneStream auth server.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tunestream_auth::{
    config::Config,
    db::FirestoreDb,
    realtime::RealtimeServer,
    services::{Argon2Hasher, FirebaseIdentityProvider, ResendEmailSender},
    AppState, Backends,
};

const DEFAULT_LOG_FILTER: &str = "tunestream_auth=debug,info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting TuneStream auth server");

    let db = Arc::new(FirestoreDb::new(&config.gcp_project_id).await?);
    tracing::info!(project = %config.gcp_project_id, "Firestore connected");

    let email = ResendEmailSender::new(config.resend_api_key.clone(), config.email_from.clone())?;
    let identity = FirebaseIdentityProvider::new(&config.gcp_project_id)?;

    let backends = Backends {
        users: db.clone(),
        sessions: db.clone(),
        verifications: db,
        hasher: Arc::new(Argon2Hasher::default()),
        email: Arc::new(email),
        identity: Arc::new(identity),
    };

    let state = Arc::new(AppState::new(
        config.clone(),
        backends,
        RealtimeServer::start(),
    ));

    let app = tunestream_auth::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Structured JSON logs, one object per event.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
