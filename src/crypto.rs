// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Random identifiers, session strings and one-time codes.

use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{AppError, Result};

/// Digits in an email verification code.
pub const CODE_DIGITS: u32 = 6;

/// Fill a fresh buffer with `len` bytes from the system CSPRNG.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG failure")))?;
    Ok(buf)
}

/// Hex string built from `len` random bytes.
pub fn random_hex(len: usize) -> Result<String> {
    Ok(hex::encode(random_bytes(len)?))
}

/// Opaque document id (12 random bytes, hex).
pub fn new_id() -> Result<String> {
    random_hex(12)
}

/// Unguessable correlation string for a verification record.
pub fn new_session_string() -> Result<String> {
    random_hex(32)
}

/// Zero-padded numeric code with [`CODE_DIGITS`] digits.
pub fn numeric_code() -> Result<String> {
    let modulus = 10u32.pow(CODE_DIGITS);
    // Largest multiple of `modulus` that fits in u32; rejects the biased tail.
    let zone = u32::MAX - (u32::MAX % modulus);

    loop {
        let bytes = random_bytes(4)?;
        let value = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if value < zone {
            return Ok(format!(
                "{:0width$}",
                value % modulus,
                width = CODE_DIGITS as usize
            ));
        }
    }
}
