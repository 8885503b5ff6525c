// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for timestamps and fixed lifetimes.

use chrono::{DateTime, Duration, Utc};

/// Session lifetime, also the refresh-token lifetime.
pub const SESSION_LIFETIME: Duration = Duration::days(30);

/// Sessions with less than this remaining are renewed on refresh.
pub const SESSION_RENEWAL_WINDOW: Duration = Duration::days(1);

/// Access-token lifetime.
pub const ACCESS_TOKEN_LIFETIME: Duration = Duration::minutes(15);

/// Lifetime of a verification record and its token.
pub const VERIFICATION_LIFETIME: Duration = Duration::minutes(10);

/// Timestamp `duration` after now.
pub fn from_now(duration: Duration) -> DateTime<Utc> {
    Utc::now() + duration
}
