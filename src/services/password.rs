// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Password and one-time-code hashing.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use async_trait::async_trait;

use crate::crypto::random_bytes;
use crate::error::{AppError, Result};

/// Hashing primitive used for passwords and verification codes.
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, plaintext: &str) -> Result<String>;

    /// Never fails: an unparsable digest or a verifier error counts as a mismatch.
    async fn compare(&self, plaintext: &str, digest: &str) -> bool;
}

/// Argon2id hasher producing PHC-format strings.
#[derive(Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl Argon2Hasher {
    /// Hasher with explicit cost parameters (memory in KiB).
    pub fn with_cost(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid Argon2 params: {}", e)))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

#[async_trait]
impl PasswordHasher for Argon2Hasher {
    async fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::encode_b64(&random_bytes(16)?)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Salt encoding failed: {}", e)))?;
        let argon2 = self.argon2();
        let plaintext = plaintext.to_owned();

        tokio::task::spawn_blocking(move || {
            argon2
                .hash_password(plaintext.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| AppError::Internal(anyhow::anyhow!("Hashing failed: {}", e)))
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Hashing task failed: {}", e)))?
    }

    async fn compare(&self, plaintext: &str, digest: &str) -> bool {
        let argon2 = self.argon2();
        let plaintext = plaintext.to_owned();
        let digest = digest.to_owned();

        let outcome = tokio::task::spawn_blocking(move || {
            PasswordHash::new(&digest)
                .map(|parsed| argon2.verify_password(plaintext.as_bytes(), &parsed).is_ok())
                .unwrap_or(false)
        })
        .await;

        match outcome {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!(error = %e, "Hash comparison task failed");
                false
            }
        }
    }
}
