// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod session;
pub mod user;
pub mod verification;

pub use session::{NewSession, Session};
pub use user::{NewUser, PublicUser, RepeatMode, User, UserPreferences};
pub use verification::{UpsertOutcome, Verification, VerificationDraft, VerificationType};
