// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model for storage and API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Player UI preferences, carried in the user-preference token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    /// Playback volume, 0-100
    pub volume: u8,
    pub muted: bool,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    /// Whether the library sidebar is collapsed
    pub sidebar_collapsed: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            volume: 80,
            muted: false,
            shuffle: false,
            repeat: RepeatMode::Off,
            sidebar_collapsed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    Off,
    All,
    One,
}

/// User account stored in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Opaque id (also used as document ID)
    pub id: String,
    /// Lowercased email address, unique across accounts
    pub email: String,
    /// Password hash (None for third-party accounts)
    pub password_hash: Option<String>,
    /// Registered through a third-party identity provider
    pub auth_for_third_party: bool,
    /// Firebase uid of the linked identity, if any
    pub firebase_uid: Option<String>,
    pub name: Option<String>,
    /// Profile picture URL
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub preferences: UserPreferences,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Projection with the password hash omitted.
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            email: self.email.clone(),
            auth_for_third_party: self.auth_for_third_party,
            name: self.name.clone(),
            profile_picture: self.profile_picture.clone(),
            preferences: self.preferences.clone(),
            created_at: self.created_at,
        }
    }
}

/// User as returned to API callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub auth_for_third_party: bool,
    pub name: Option<String>,
    pub profile_picture: Option<String>,
    pub preferences: UserPreferences,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a user; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub auth_for_third_party: bool,
    pub firebase_uid: Option<String>,
    pub name: Option<String>,
    pub profile_picture: Option<String>,
}
