// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod auth;
pub mod email;
pub mod firebase;
pub mod password;
pub mod verification;

pub use auth::{
    AuthService, AuthSuccess, IssuedTokens, LoginRequest, NewAccount, RefreshedTokens,
    ThirdPartyProfile,
};
pub use email::{EmailMessage, EmailReceipt, EmailSender, ResendEmailSender};
pub use firebase::{ExternalIdentity, FirebaseIdentityProvider, IdentityError, IdentityProvider};
pub use password::{Argon2Hasher, PasswordHasher};
pub use verification::{
    CodeAction, CodeIssued, CodeVerification, LinkAction, LinkIssued, VerificationService,
    VerifiedLink, VerifyCodeRequest,
};

use crate::error::{AppError, Result};
use validator::ValidateEmail;

/// Trim and lowercase an email address, rejecting malformed input.
pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    if !email.validate_email() {
        return Err(AppError::BadRequest("Invalid email address".to_string()));
    }
    Ok(email)
}
