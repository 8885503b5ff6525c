// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account, login, refresh and logout flows over the in-memory store.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tunestream_auth::db::UserStore;
use tunestream_auth::error::{AppError, ThirdPartyCode};
use tunestream_auth::models::Session;
use tunestream_auth::services::{AuthSuccess, ExternalIdentity, LoginRequest, NewAccount};

mod common;
use common::{test_app, TestApp};

fn account(email: &str, password: &str) -> NewAccount {
    NewAccount {
        email: email.to_string(),
        password: password.to_string(),
        device_info: "test-device".to_string(),
        auth_for_third_party: false,
        firebase_uid: None,
        name: None,
        profile_picture: None,
    }
}

fn login(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.to_string(),
        password: Some(password.to_string()),
        device_info: "test-device".to_string(),
        ..LoginRequest::default()
    }
}

async fn signed_up(app: &TestApp) -> AuthSuccess {
    app.state
        .auth_service
        .create_account(account("a@x.com", "pw1"))
        .await
        .unwrap()
}

/// Rewrite a stored session's expiry to `expires_at`.
fn set_expiry(app: &TestApp, session_id: &str, expires_at: chrono::DateTime<Utc>) {
    let session = app.db.get_session(session_id).expect("session exists");
    app.db.put_session(Session {
        expires_at,
        ..session
    });
}

#[tokio::test]
async fn full_login_cycle() {
    let app = test_app();
    let auth = &app.state.auth_service;

    signed_up(&app).await;

    let logged_in = auth.login_user(login("a@x.com", "pw1")).await.unwrap();
    assert!(!logged_in.tokens.access_token.is_empty());
    assert!(!logged_in.tokens.refresh_token.is_empty());

    let refreshed = auth
        .refresh_tokens(Some(&logged_in.tokens.refresh_token))
        .await
        .unwrap();
    assert!(!refreshed.new_access_token.is_empty());
    assert!(refreshed.new_refresh_token.is_none());

    let deleted = app
        .state
        .logout(Some(&logged_in.tokens.access_token))
        .await
        .unwrap()
        .expect("session deleted");
    assert_eq!(deleted.id, logged_in.session_id);

    let err = auth
        .refresh_tokens(Some(&logged_in.tokens.refresh_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(ref m) if m == "session is expired"));
}

#[tokio::test]
async fn created_account_hides_password() {
    let app = test_app();
    let created = signed_up(&app).await;

    let json = serde_json::to_value(&created).unwrap();
    assert!(json["user"].get("password_hash").is_none());
    assert!(json.get("accessToken").is_some());

    let stored = app.db.find_user_by_email("a@x.com").await.unwrap().unwrap();
    assert_ne!(stored.password_hash.as_deref(), Some("pw1"));
}

#[tokio::test]
async fn duplicate_email_conflicts() {
    let app = test_app();
    signed_up(&app).await;

    let err = app
        .state
        .auth_service
        .create_account(account("A@X.com", "other"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn malformed_email_is_bad_request() {
    let app = test_app();
    let err = app
        .state
        .auth_service
        .create_account(account("nope", "pw1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn wrong_password_and_unknown_email_look_the_same() {
    let app = test_app();
    signed_up(&app).await;
    let auth = &app.state.auth_service;

    let wrong_password = auth.login_user(login("a@x.com", "nope")).await.unwrap_err();
    let unknown_email = auth.login_user(login("b@x.com", "pw1")).await.unwrap_err();

    assert_eq!(wrong_password.to_string(), "Invalid email or password");
    assert_eq!(unknown_email.to_string(), wrong_password.to_string());
    assert!(matches!(wrong_password, AppError::Unauthorized(_)));
}

#[tokio::test]
async fn second_login_with_live_session_conflicts() {
    let app = test_app();
    signed_up(&app).await;
    let auth = &app.state.auth_service;

    let first = auth.login_user(login("a@x.com", "pw1")).await.unwrap();
    let sessions_before = app.db.session_count();

    let err = auth
        .login_user(LoginRequest {
            existing_access_token: Some(first.tokens.access_token.clone()),
            ..login("a@x.com", "pw1")
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Conflict(ref m) if m == "User is already logged in"));
    assert_eq!(app.db.session_count(), sessions_before);
}

#[tokio::test]
async fn stale_access_token_does_not_block_login() {
    let app = test_app();
    signed_up(&app).await;
    let auth = &app.state.auth_service;

    let first = auth.login_user(login("a@x.com", "pw1")).await.unwrap();
    set_expiry(&app, &first.session_id, Utc::now() - Duration::seconds(1));

    let second = auth
        .login_user(LoginRequest {
            existing_access_token: Some(first.tokens.access_token),
            ..login("a@x.com", "pw1")
        })
        .await
        .unwrap();
    assert_ne!(second.session_id, first.session_id);
}

#[tokio::test]
async fn refresh_near_expiry_renews_session() {
    let app = test_app();
    let created = signed_up(&app).await;
    set_expiry(&app, &created.session_id, Utc::now() + Duration::hours(23));

    let refreshed = app
        .state
        .auth_service
        .refresh_tokens(Some(&created.tokens.refresh_token))
        .await
        .unwrap();

    let new_refresh = refreshed.new_refresh_token.expect("rotated refresh token");
    let payload = app
        .state
        .tokens
        .verify_refresh(Some(&new_refresh))
        .payload
        .unwrap();
    assert_eq!(payload.session_id, created.session_id);

    let session = app.db.get_session(&created.session_id).unwrap();
    assert!(session.expires_at > Utc::now() + Duration::days(29));
}

#[tokio::test]
async fn refresh_far_from_expiry_leaves_session_alone() {
    let app = test_app();
    let created = signed_up(&app).await;
    let expires_at = Utc::now() + Duration::hours(25);
    set_expiry(&app, &created.session_id, expires_at);

    let refreshed = app
        .state
        .auth_service
        .refresh_tokens(Some(&created.tokens.refresh_token))
        .await
        .unwrap();

    assert!(refreshed.new_refresh_token.is_none());
    assert_eq!(
        app.db.get_session(&created.session_id).unwrap().expires_at,
        expires_at
    );

    let access = app
        .state
        .tokens
        .verify_access(Some(&refreshed.new_access_token))
        .payload
        .unwrap();
    assert_eq!(access.session_id, created.session_id);
    assert_eq!(access.user_id, created.user.id);
}

#[tokio::test]
async fn refresh_rejects_bad_and_lapsed_tokens() {
    let app = test_app();
    let created = signed_up(&app).await;
    let auth = &app.state.auth_service;

    let err = auth.refresh_tokens(None).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(ref m) if m == "Invalid refresh token"));

    // An access token is signed with a different secret.
    let err = auth
        .refresh_tokens(Some(&created.tokens.access_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(ref m) if m == "Invalid refresh token"));

    set_expiry(&app, &created.session_id, Utc::now() - Duration::seconds(1));
    let err = auth
        .refresh_tokens(Some(&created.tokens.refresh_token))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(ref m) if m == "session is expired"));
}

#[tokio::test]
async fn logout_without_token_is_a_no_op() {
    let app = test_app();
    signed_up(&app).await;

    assert!(app.state.logout(None).await.unwrap().is_none());
    assert!(app.state.logout(Some("garbage")).await.unwrap().is_none());
    assert_eq!(app.db.session_count(), 1);
}

fn google_identity(uid: &str, email: Option<&str>) -> ExternalIdentity {
    ExternalIdentity {
        uid: uid.to_string(),
        email: email.map(str::to_string),
        picture: Some("https://lh3.googleusercontent.com/a/photo=s96-c".to_string()),
    }
}

#[tokio::test]
async fn third_party_register_then_login() {
    let app = test_app();
    app.identity
        .register("google-token", google_identity("fb-1", Some("G@X.com")));
    let auth = &app.state.auth_service;

    let registered = auth
        .register_with_third_party("google-token", "web".to_string(), Some("Gee".to_string()))
        .await
        .unwrap();
    assert_eq!(registered.user.email, "g@x.com");
    assert!(registered.user.auth_for_third_party);
    assert_eq!(
        registered.user.profile_picture.as_deref(),
        Some("https://lh3.googleusercontent.com/a/photo=s400-c")
    );

    let access = app
        .state
        .tokens
        .verify_access(Some(&registered.tokens.access_token))
        .payload
        .unwrap();
    assert_eq!(access.firebase_user_id.as_deref(), Some("fb-1"));

    let logged_in = auth
        .login_with_third_party("google-token", "phone".to_string(), None)
        .await
        .unwrap();
    assert_eq!(logged_in.user.id, registered.user.id);

    let err = auth
        .register_with_third_party("google-token", "web".to_string(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::ThirdParty {
            code: ThirdPartyCode::UserAlreadyExists,
            ..
        }
    ));
    assert_eq!(err.third_party_uid(), Some("fb-1"));
}

#[tokio::test]
async fn third_party_login_for_unknown_user_is_tagged() {
    let app = test_app();
    app.identity
        .register("google-token", google_identity("fb-2", Some("new@x.com")));

    let err = app
        .state
        .auth_service
        .login_with_third_party("google-token", "web".to_string(), None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some(ThirdPartyCode::UserNotFound.as_str()));
    assert_eq!(err.third_party_uid(), Some("fb-2"));
    assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn third_party_credential_failures() {
    let app = test_app();
    app.identity
        .register("no-email", google_identity("fb-3", None));
    let auth = &app.state.auth_service;

    let err = auth
        .verify_third_party_credential("no-email")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::ThirdParty {
            code: ThirdPartyCode::EmailMissing,
            ..
        }
    ));
    assert_eq!(err.third_party_uid(), Some("fb-3"));

    let err = auth
        .verify_third_party_credential("forged")
        .await
        .unwrap_err();
    assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sign_in_method_must_match_account() {
    let app = test_app();
    signed_up(&app).await;
    app.identity
        .register("google-token", google_identity("fb-4", Some("a@x.com")));
    let auth = &app.state.auth_service;

    let err = auth
        .login_with_third_party("google-token", "web".to_string(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    app.identity
        .register("other-token", google_identity("fb-5", Some("t@x.com")));
    auth.register_with_third_party("other-token", "web".to_string(), None)
        .await
        .unwrap();

    let err = auth.login_user(login("t@x.com", "")).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn logout_deletes_external_identity() {
    let app = test_app();
    app.identity
        .register("google-token", google_identity("fb-6", Some("g@x.com")));

    let registered = app
        .state
        .auth_service
        .register_with_third_party("google-token", "web".to_string(), None)
        .await
        .unwrap();

    app.state
        .logout(Some(&registered.tokens.access_token))
        .await
        .unwrap();

    // Deletion runs on a spawned task.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(app.identity.deleted(), vec!["fb-6".to_string()]);
    assert_eq!(app.db.session_count(), 0);
}

#[tokio::test]
async fn deregister_removes_user_and_sessions() {
    let app = test_app();
    let created = signed_up(&app).await;
    let auth = &app.state.auth_service;
    auth.login_user(login("a@x.com", "pw1")).await.unwrap();
    assert_eq!(app.db.session_count(), 2);

    let removed = auth.deregister_user(&created.user.id).await.unwrap();
    assert_eq!(removed.email, "a@x.com");
    assert_eq!(app.db.session_count(), 0);
    assert!(app.db.find_user_by_email("a@x.com").await.unwrap().is_none());

    let err = auth.deregister_user(&created.user.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn concurrent_refreshes_both_succeed() {
    let app = test_app();
    let created = signed_up(&app).await;
    set_expiry(&app, &created.session_id, Utc::now() + Duration::hours(2));

    let state = Arc::clone(&app.state);
    let token = created.tokens.refresh_token.clone();
    let (a, b) = tokio::join!(
        state.auth_service.refresh_tokens(Some(&token)),
        state.auth_service.refresh_tokens(Some(&token)),
    );

    // At least one renews; the old refresh token stays usable either way.
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.new_refresh_token.is_some() || b.new_refresh_token.is_some());
    assert!(
        app.db.get_session(&created.session_id).unwrap().expires_at
            > Utc::now() + Duration::days(29)
    );
    assert!(state.auth_service.refresh_tokens(Some(&token)).await.is_ok());
}
