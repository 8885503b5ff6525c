// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP middleware.

pub mod security;

pub use security::{add_security_headers, is_allowed_origin};
