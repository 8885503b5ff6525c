// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Login session model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One logged-in device, with a rolling expiry.
///
/// `expires_at` is a Firestore timestamp so a TTL policy on the
/// collection reaps lapsed sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Owning user id
    pub user: String,
    /// User-agent / device description
    pub device_info: String,
    #[serde(with = "firestore::serialize_as_timestamp")]
    pub expires_at: DateTime<Utc>,
    #[serde(with = "firestore::serialize_as_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A session past `expires_at` does not exist for authorization,
    /// whether or not it has been reaped yet.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Fields supplied when creating a session; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user: String,
    pub device_info: String,
    pub expires_at: DateTime<Utc>,
}
