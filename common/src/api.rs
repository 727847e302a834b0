// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

//! Transport envelope types shared by pipeline services.
//!
//! Tokens travel opaquely: a single base64url string in a JSON body field.
//! The envelope never interprets token contents; only the receiving hop's
//! codec does, after signature verification.

use serde::{Deserialize, Serialize};

/// Inbound request body for any hop endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenRequest {
    /// Opaque signed token (base64url, no padding)
    pub token: String,
}

/// Response body returned by a hop after processing a token.
#[derive(Debug, Serialize, Deserialize)]
pub struct HopReply {
    pub ok: bool,

    /// Effect result recorded by the hop (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Protocol-level rejection reason (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// True when this delivery was a duplicate and the recorded
    /// outcome was replayed without re-applying the effect.
    #[serde(default)]
    pub replayed: bool,
}

impl HopReply {
    pub fn success(result: impl Into<String>, replayed: bool) -> Self {
        Self {
            ok: true,
            result: Some(result.into()),
            error: None,
            replayed,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
            replayed: false,
        }
    }
}
