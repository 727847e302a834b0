// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

//! Truncated keyed MAC over token bytes.
//!
//! Tags are HMAC-SHA256 truncated to 16 bytes — half the full output, a
//! deliberate size/security trade-off to keep tokens short enough for query
//! parameters. The truncation width is part of the wire format; changing it
//! breaks cross-service compatibility.
//!
//! The MAC input is domain-separated by a context string (the schema name):
//! two schemas with identical field layouts under the same key still
//! produce mutually unverifiable tags, so a token can never be replayed
//! into a different hop than the one it was minted for.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Truncated tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Compute the truncated tag over `context || 0x00 || data`. Context
/// strings never contain NUL, so the framing is unambiguous.
pub fn sign(key: &[u8], context: &str, data: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(context.as_bytes());
    mac.update(&[0u8]);
    mac.update(data);
    let full = mac.finalize().into_bytes();
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&full[..TAG_LEN]);
    tag
}

/// Recompute the tag and compare against `tag` in constant time. Returns
/// a bool; callers turn `false` into a protocol-level signature error.
pub fn verify(key: &[u8], context: &str, data: &[u8], tag: &[u8]) -> bool {
    if tag.len() != TAG_LEN {
        return false;
    }
    let computed = sign(key, context, data);
    bool::from(computed.ct_eq(tag))
}
