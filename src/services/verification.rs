// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! One-time verification codes (email confirmation) and links (password reset).
//!
//! Each record is bound to a random `session` string that only the holder of
//! the matching verification token knows. Codes are hashed before storage.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::email::{password_reset_email, verification_code_email, EmailMessage, EmailSender};
use super::normalize_email;
use super::password::PasswordHasher;
use crate::crypto::{new_session_string, numeric_code};
use crate::db::{SessionStore, UserStore, VerificationStore};
use crate::error::{AppError, Result};
use crate::models::{PublicUser, UpsertOutcome, Verification, VerificationDraft, VerificationType};
use crate::time_utils::{from_now, VERIFICATION_LIFETIME};
use crate::token::{TokenCodec, VerificationPayload};

const EMAIL_IN_USE: &str = "Email is already in use";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeAction {
    CodeCreated,
    CodeUpdated,
    /// Existing record handed back untouched; nothing was sent.
    CodeReturned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkAction {
    LinkCreated,
    LinkUpdated,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeIssued {
    pub id: String,
    pub action: CodeAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkIssued {
    pub id: String,
    pub action: LinkAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyCodeRequest {
    pub code: String,
    pub email: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeVerification {
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedLink {
    pub email: String,
}

pub struct VerificationService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    verifications: Arc<dyn VerificationStore>,
    tokens: TokenCodec,
    hasher: Arc<dyn PasswordHasher>,
    email: Arc<dyn EmailSender>,
    send_limit: u32,
    frontend_url: String,
}

impl VerificationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        verifications: Arc<dyn VerificationStore>,
        tokens: TokenCodec,
        hasher: Arc<dyn PasswordHasher>,
        email: Arc<dyn EmailSender>,
        send_limit: u32,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            users,
            sessions,
            verifications,
            tokens,
            hasher,
            email,
            send_limit,
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn send_code_email_to_user(
        &self,
        email: &str,
        should_resend_code: bool,
        token: Option<&str>,
    ) -> Result<CodeIssued> {
        let email = normalize_email(email)?;
        let now = Utc::now();

        let (owner, existing) = tokio::try_join!(
            self.users.find_user_by_email(&email),
            self.verifications
                .find_live_verification(&email, VerificationType::EmailVerification, now),
        )?;

        if owner.is_some() {
            return Err(AppError::conflict(EMAIL_IN_USE));
        }

        if let Some(existing) = existing {
            let holder = self.tokens.verify_verification(token).payload;
            if holder.map(|p| p.session_id) != Some(existing.session.clone()) {
                return Err(AppError::conflict(EMAIL_IN_USE));
            }

            if !should_resend_code {
                return Ok(CodeIssued {
                    id: existing.id,
                    action: CodeAction::CodeReturned,
                    session_token: None,
                });
            }
        }

        let code = numeric_code()?;
        let code_hash = self.hasher.hash(&code).await?;

        let (record, created) = self
            .issue(&email, VerificationType::EmailVerification, Some(code_hash))
            .await?;
        let session_token = self.sign_for(&record)?;

        self.deliver(verification_code_email(&email, &code)).await?;

        let action = if created {
            CodeAction::CodeCreated
        } else {
            CodeAction::CodeUpdated
        };
        tracing::info!(email = %email, action = ?action, times = record.times, "Verification code sent");

        Ok(CodeIssued {
            id: record.id,
            action,
            session_token: Some(session_token),
        })
    }

    /// A wrong or stale code is `verified: false`; only a lost consumption
    /// race is an error.
    pub async fn verify_code(&self, request: VerifyCodeRequest) -> Result<CodeVerification> {
        let rejected = Ok(CodeVerification { verified: false });

        let Some(token) = request.token.as_deref() else {
            return rejected;
        };
        let Some(payload) = self.tokens.verify_verification(Some(token)).payload else {
            return rejected;
        };
        let Ok(email) = normalize_email(&request.email) else {
            return rejected;
        };

        let record = self
            .verifications
            .find_verification_by_session(
                VerificationType::EmailVerification,
                &payload.session_id,
                Utc::now(),
            )
            .await?
            .filter(|r| r.email == email);

        let Some(digest) = record.and_then(|r| r.verification_code) else {
            return rejected;
        };

        if !self.hasher.compare(&request.code, &digest).await {
            tracing::debug!(email = %email, "Verification code mismatch");
            return rejected;
        }

        let taken = self
            .verifications
            .take_verification(
                &email,
                VerificationType::EmailVerification,
                &payload.session_id,
            )
            .await?;

        if taken.is_none() {
            tracing::warn!(email = %email, "Verification code consumed concurrently");
            return Err(AppError::conflict(
                "Verification code has already been used or expired",
            ));
        }

        tracing::info!(email = %email, "Email verified");
        Ok(CodeVerification { verified: true })
    }

    pub async fn send_link_email_to_user(&self, email: &str) -> Result<LinkIssued> {
        let email = normalize_email(email)?;

        let user = self
            .users
            .find_user_by_email(&email)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;

        if user.auth_for_third_party {
            return Err(AppError::forbidden(
                "password reset is not supported for third-party accounts",
            ));
        }

        let (record, created) = self
            .issue(&email, VerificationType::PasswordReset, None)
            .await?;
        let token = self.sign_for(&record)?;

        let link = format!(
            "{}/reset-password?token={}",
            self.frontend_url,
            urlencoding::encode(&token)
        );
        self.deliver(password_reset_email(&email, &link)).await?;

        let action = if created {
            LinkAction::LinkCreated
        } else {
            LinkAction::LinkUpdated
        };
        tracing::info!(user_id = %user.id, action = ?action, times = record.times, "Password reset link sent");

        Ok(LinkIssued {
            id: record.id,
            action,
        })
    }

    /// Checks that a live reset record backs `token`. Does not consume it.
    pub async fn verify_link(&self, token: Option<&str>) -> Result<VerifiedLink> {
        let record = self.live_reset_record(token).await?;
        Ok(VerifiedLink {
            email: record.email,
        })
    }

    /// Complete a password reset: consume the link, store the new password and
    /// end every session the user had.
    pub async fn reset_password(
        &self,
        token: Option<&str>,
        new_password: &str,
    ) -> Result<PublicUser> {
        if new_password.is_empty() {
            return Err(AppError::BadRequest("Password is required".to_string()));
        }

        let record = self.live_reset_record(token).await?;

        let user = self
            .users
            .find_user_by_email(&record.email)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;

        if user.auth_for_third_party {
            return Err(AppError::forbidden(
                "password reset is not supported for third-party accounts",
            ));
        }

        let password_hash = self.hasher.hash(new_password).await?;

        self.verifications
            .take_verification(&record.email, VerificationType::PasswordReset, &record.session)
            .await?
            .ok_or_else(|| AppError::conflict("Reset link has already been used or expired"))?;

        if !self.users.update_password(&user.id, &password_hash).await? {
            return Err(AppError::not_found("User not found"));
        }

        let revoked = self.sessions.delete_user_sessions(&user.id).await?;
        tracing::info!(user_id = %user.id, sessions_revoked = revoked, "Password reset");

        Ok(user.public())
    }

    async fn live_reset_record(&self, token: Option<&str>) -> Result<Verification> {
        let payload = self
            .tokens
            .verify_verification(token)
            .payload
            .ok_or_else(|| AppError::unauthorized("Invalid or expired link"))?;

        self.verifications
            .find_verification_by_session(
                VerificationType::PasswordReset,
                &payload.session_id,
                Utc::now(),
            )
            .await?
            .ok_or_else(|| AppError::not_found("Verification link not found or expired"))
    }

    /// Create or refresh the record for `(email, kind)` under a new session.
    /// Returns the stored record and whether it was newly created.
    async fn issue(
        &self,
        email: &str,
        kind: VerificationType,
        verification_code: Option<String>,
    ) -> Result<(Verification, bool)> {
        let draft = VerificationDraft {
            email: email.to_string(),
            kind,
            session: new_session_string()?,
            verification_code,
            expires_at: from_now(VERIFICATION_LIFETIME),
        };

        match self
            .verifications
            .upsert_verification(draft, self.send_limit, Utc::now())
            .await?
        {
            UpsertOutcome::Created(record) => Ok((record, true)),
            UpsertOutcome::Updated(record) => Ok((record, false)),
            UpsertOutcome::LimitReached => {
                tracing::warn!(email = %email, kind = kind.as_str(), "Verification send limit reached");
                Err(AppError::TooManyRequests(
                    "Too many verification emails requested, try again later".to_string(),
                ))
            }
        }
    }

    fn sign_for(&self, record: &Verification) -> Result<String> {
        self.tokens.sign_verification(&VerificationPayload {
            session_id: record.session.clone(),
        })
    }

    async fn deliver(&self, message: EmailMessage) -> Result<()> {
        let to = message.to.clone();
        let receipt = self.email.send(message).await;
        match receipt.id {
            Some(id) => {
                tracing::debug!(email = %to, message_id = %id, "Email accepted");
                Ok(())
            }
            None => {
                let reason = receipt.error.unwrap_or_else(|| "no message id".to_string());
                tracing::error!(email = %to, error = %reason, "Email dispatch failed");
                Err(AppError::Internal(anyhow::anyhow!(
                    "Email dispatch failed: {}",
                    reason
                )))
            }
        }
    }
}
