// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Verification code and password-reset link flows.

use std::sync::Arc;
use tunestream_auth::config::Config;
use tunestream_auth::error::AppError;
use tunestream_auth::models::VerificationType;
use tunestream_auth::realtime::{user_room, SESSION_REVOKED};
use tunestream_auth::services::{CodeAction, LinkAction, LoginRequest, NewAccount, VerifyCodeRequest};
use tunestream_auth::token::VerificationPayload;

mod common;
use common::{fast_hasher, test_app, test_app_with, RendezvousHasher, TestApp};

const EMAIL: &str = "v@x.com";

async fn first_code(app: &TestApp) -> (String, String) {
    let issued = app
        .state
        .verification_service
        .send_code_email_to_user(EMAIL, false, None)
        .await
        .unwrap();
    assert_eq!(issued.action, CodeAction::CodeCreated);
    (issued.id, issued.session_token.expect("session token"))
}

fn verify_request(code: &str, token: Option<&str>) -> VerifyCodeRequest {
    VerifyCodeRequest {
        code: code.to_string(),
        email: EMAIL.to_string(),
        token: token.map(str::to_string),
    }
}

#[tokio::test]
async fn code_is_hashed_at_rest() {
    let app = test_app();
    first_code(&app).await;

    let code = app.email.last_code();
    assert_eq!(code.len(), 6);

    let record = app
        .db
        .get_verification(EMAIL, VerificationType::EmailVerification)
        .unwrap();
    assert_eq!(record.times, 1);
    assert_ne!(record.verification_code.as_deref(), Some(code.as_str()));
}

#[tokio::test]
async fn repeated_request_without_resend_returns_existing_record() {
    let app = test_app();
    let (id, token) = first_code(&app).await;
    let service = &app.state.verification_service;

    for _ in 0..2 {
        let again = service
            .send_code_email_to_user(EMAIL, false, Some(&token))
            .await
            .unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.action, CodeAction::CodeReturned);
        assert!(again.session_token.is_none());
    }

    assert_eq!(app.email.count(), 1);
}

#[tokio::test]
async fn foreign_requester_cannot_touch_pending_record() {
    let app = test_app();
    first_code(&app).await;
    let service = &app.state.verification_service;

    let err = service
        .send_code_email_to_user(EMAIL, true, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(ref m) if m == "Email is already in use"));

    let forged = app
        .state
        .tokens
        .sign_verification(&VerificationPayload {
            session_id: "someone-else".to_string(),
        })
        .unwrap();
    let err = service
        .send_code_email_to_user(EMAIL, true, Some(&forged))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(app.email.count(), 1);
}

#[tokio::test]
async fn registered_email_is_refused() {
    let app = test_app();
    app.state
        .auth_service
        .create_account(NewAccount {
            email: EMAIL.to_string(),
            password: "pw1".to_string(),
            device_info: "test".to_string(),
            auth_for_third_party: false,
            firebase_uid: None,
            name: None,
            profile_picture: None,
        })
        .await
        .unwrap();

    let err = app
        .state
        .verification_service
        .send_code_email_to_user(EMAIL, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(app.email.count(), 0);
}

#[tokio::test]
async fn resend_rotates_session_and_code() {
    let app = test_app();
    let (id, old_token) = first_code(&app).await;
    let old_code = app.email.last_code();

    let resent = app
        .state
        .verification_service
        .send_code_email_to_user(EMAIL, true, Some(&old_token))
        .await
        .unwrap();
    assert_eq!(resent.action, CodeAction::CodeUpdated);
    assert_eq!(resent.id, id);
    assert_eq!(app.email.count(), 2);

    let record = app
        .db
        .get_verification(EMAIL, VerificationType::EmailVerification)
        .unwrap();
    assert_eq!(record.times, 2);

    // The old token no longer names the record.
    let stale = app
        .state
        .verification_service
        .verify_code(verify_request(&old_code, Some(&old_token)))
        .await
        .unwrap();
    assert!(!stale.verified);
}

#[tokio::test]
async fn send_limit_is_a_hard_stop() {
    let config = Config {
        verification_send_limit: 2,
        ..Config::default()
    };
    let app = test_app_with(config, fast_hasher());
    let service = &app.state.verification_service;

    let (_, token) = first_code(&app).await;
    let token = service
        .send_code_email_to_user(EMAIL, true, Some(&token))
        .await
        .unwrap()
        .session_token
        .unwrap();

    let before = app
        .db
        .get_verification(EMAIL, VerificationType::EmailVerification)
        .unwrap();

    let err = service
        .send_code_email_to_user(EMAIL, true, Some(&token))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TooManyRequests(_)));

    let after = app
        .db
        .get_verification(EMAIL, VerificationType::EmailVerification)
        .unwrap();
    assert_eq!(after, before);
    assert_eq!(app.email.count(), 2);
}

#[tokio::test]
async fn correct_code_verifies_once() {
    let app = test_app();
    let (_, token) = first_code(&app).await;
    let code = app.email.last_code();
    let service = &app.state.verification_service;

    let result = service
        .verify_code(verify_request(&code, Some(&token)))
        .await
        .unwrap();
    assert!(result.verified);
    assert!(app
        .db
        .get_verification(EMAIL, VerificationType::EmailVerification)
        .is_none());

    let again = service
        .verify_code(verify_request(&code, Some(&token)))
        .await
        .unwrap();
    assert!(!again.verified);
}

#[tokio::test]
async fn wrong_code_keeps_record_for_retry() {
    let app = test_app();
    let (_, token) = first_code(&app).await;
    let code = app.email.last_code();
    let wrong = if code == "000000" { "111111" } else { "000000" };
    let service = &app.state.verification_service;

    let result = service
        .verify_code(verify_request(wrong, Some(&token)))
        .await
        .unwrap();
    assert!(!result.verified);
    assert!(app
        .db
        .get_verification(EMAIL, VerificationType::EmailVerification)
        .is_some());

    assert!(service
        .verify_code(verify_request(&code, Some(&token)))
        .await
        .unwrap()
        .verified);
}

#[tokio::test]
async fn missing_token_is_simply_unverified() {
    let app = test_app();
    first_code(&app).await;
    let code = app.email.last_code();

    let result = app
        .state
        .verification_service
        .verify_code(verify_request(&code, None))
        .await
        .unwrap();
    assert!(!result.verified);
}

#[tokio::test]
async fn concurrent_correct_codes_have_one_winner() {
    let app = test_app_with(Config::default(), Arc::new(RendezvousHasher::new(2)));
    let (_, token) = first_code(&app).await;
    let code = app.email.last_code();
    let service = &app.state.verification_service;

    let (a, b) = tokio::join!(
        service.verify_code(verify_request(&code, Some(&token))),
        service.verify_code(verify_request(&code, Some(&token))),
    );

    let outcomes = [a, b];
    let wins = outcomes
        .iter()
        .filter(|r| matches!(r, Ok(v) if v.verified))
        .count();
    let conflicts = outcomes
        .iter()
        .filter(|r| {
            matches!(r, Err(AppError::Conflict(m))
                if m == "Verification code has already been used or expired")
        })
        .count();

    assert_eq!(wins, 1);
    assert_eq!(conflicts, 1);
}

#[tokio::test]
async fn failed_dispatch_is_internal_error() {
    let app = test_app();
    app.email.fail_next_sends();

    let err = app
        .state
        .verification_service
        .send_code_email_to_user(EMAIL, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Internal(_)));
}

async fn password_account(app: &TestApp) -> String {
    let created = app
        .state
        .auth_service
        .create_account(NewAccount {
            email: "r@x.com".to_string(),
            password: "pw1".to_string(),
            device_info: "test".to_string(),
            auth_for_third_party: false,
            firebase_uid: None,
            name: None,
            profile_picture: None,
        })
        .await
        .unwrap();
    created.user.id
}

fn password_login(password: &str) -> LoginRequest {
    LoginRequest {
        email: "r@x.com".to_string(),
        password: Some(password.to_string()),
        device_info: "test".to_string(),
        ..LoginRequest::default()
    }
}

#[tokio::test]
async fn reset_link_flow() {
    let app = test_app();
    let user_id = password_account(&app).await;
    let service = &app.state.verification_service;

    let issued = service.send_link_email_to_user("R@x.com").await.unwrap();
    assert_eq!(issued.action, LinkAction::LinkCreated);
    assert!(app.email.sent()[0]
        .html
        .contains("http://localhost:5173/reset-password?token="));

    let token = app.email.last_reset_token();

    // Checking the link does not consume it.
    for _ in 0..2 {
        let link = service.verify_link(Some(&token)).await.unwrap();
        assert_eq!(link.email, "r@x.com");
    }

    let mut events = app
        .state
        .realtime
        .broadcaster()
        .unwrap()
        .join(&user_room(&user_id));

    let user = app.state.reset_password(Some(&token), "pw2").await.unwrap();
    assert_eq!(user.id, user_id);
    assert_eq!(app.db.session_count(), 0);
    assert_eq!(events.recv().await.unwrap().event, SESSION_REVOKED);

    let auth = &app.state.auth_service;
    assert!(auth.login_user(password_login("pw1")).await.is_err());
    assert!(auth.login_user(password_login("pw2")).await.is_ok());

    let err = app
        .state
        .reset_password(Some(&token), "pw3")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn second_link_request_updates_record() {
    let app = test_app();
    password_account(&app).await;
    let service = &app.state.verification_service;

    service.send_link_email_to_user("r@x.com").await.unwrap();
    let first_token = app.email.last_reset_token();

    let second = service.send_link_email_to_user("r@x.com").await.unwrap();
    assert_eq!(second.action, LinkAction::LinkUpdated);

    let err = service.verify_link(Some(&first_token)).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn reset_link_refusals() {
    let app = test_app();
    let service = &app.state.verification_service;

    let err = service.send_link_email_to_user("ghost@x.com").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    app.state
        .auth_service
        .create_account(NewAccount {
            email: "g@x.com".to_string(),
            password: String::new(),
            device_info: "test".to_string(),
            auth_for_third_party: true,
            firebase_uid: Some("fb-1".to_string()),
            name: None,
            profile_picture: None,
        })
        .await
        .unwrap();

    let err = service.send_link_email_to_user("g@x.com").await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(ref m) if m.contains("password reset is not supported")));

    let err = service.verify_link(Some("garbage")).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));
    assert_eq!(app.email.count(), 0);
}
