// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbound email.
//!
//! Delivery goes through the Resend HTTP API. Callers only see an
//! [`EmailReceipt`]; a receipt without an id means the message was not
//! accepted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const RESEND_API_URL: &str = "https://api.resend.com/emails";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Provider response: `id` when accepted, `error` otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailReceipt {
    pub id: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: EmailMessage) -> EmailReceipt;
}

/// Resend API client.
#[derive(Clone)]
pub struct ResendEmailSender {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    from: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    id: Option<String>,
    message: Option<String>,
}

impl ResendEmailSender {
    pub fn new(api_key: String, from: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: RESEND_API_URL.to_string(),
            api_key,
            from,
        })
    }
}

#[async_trait]
impl EmailSender for ResendEmailSender {
    async fn send(&self, message: EmailMessage) -> EmailReceipt {
        let body = SendRequest {
            from: &self.from,
            to: [&message.to],
            subject: &message.subject,
            html: &message.html,
        };

        let response = match self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Email request failed");
                return EmailReceipt {
                    id: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let status = response.status();
        match response.json::<SendResponse>().await {
            Ok(parsed) if status.is_success() => EmailReceipt {
                id: parsed.id,
                error: parsed.message,
            },
            Ok(parsed) => {
                tracing::warn!(status = %status, "Email provider rejected message");
                EmailReceipt {
                    id: None,
                    error: Some(parsed.message.unwrap_or_else(|| format!("HTTP {}", status))),
                }
            }
            Err(e) => EmailReceipt {
                id: None,
                error: Some(format!("HTTP {}: {}", status, e)),
            },
        }
    }
}

/// Email carrying a one-time verification code.
pub fn verification_code_email(to: &str, code: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Your TuneStream verification code".to_string(),
        html: format!(
            "<p>Use this code to confirm your email address:</p>\
             <p style=\"font-size:24px;letter-spacing:4px\"><strong>{}</strong></p>\
             <p>The code expires in 10 minutes.</p>",
            code
        ),
    }
}

/// Email carrying a password-reset link.
pub fn password_reset_email(to: &str, link: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Reset your TuneStream password".to_string(),
        html: format!(
            "<p>Someone asked to reset the password for this account.</p>\
             <p><a href=\"{link}\">Choose a new password</a></p>\
             <p>The link expires in 10 minutes. If this wasn't you, ignore this email.</p>"
        ),
    }
}
