// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

//! Signed binary token protocol for the payhop payment pipeline.
//!
//! Services in the pipeline share no database; all cross-hop payment state
//! travels inside compact, self-describing, HMAC-signed tokens. This crate
//! is the protocol core:
//!
//! - [`sig`] — truncated keyed MAC over a byte buffer, constant-time verify
//! - [`timestamp`] — 16-bit minute counter with wrap-around reconstruction
//! - [`field`] — the typed field model (fixed-width ints, 48-bit compact
//!   IDs, IEEE-754 amounts, length-prefixed strings)
//! - [`codec`] — one generic encoder/decoder driven by schema values
//! - [`registry`] — the catalog of named token schemas
//! - [`keyring`] — signing-key resolution at process start
//!
//! A token is only usable once base64url decoding, structural validation and
//! signature verification all succeed, in that order. Expired, malformed and
//! forged tokens are routine outcomes on an adversarial network, so they are
//! ordinary [`TokenError`] values, never panics.

pub mod codec;
pub mod field;
pub mod keyring;
pub mod registry;
pub mod sig;
pub mod timestamp;

pub use codec::{Codec, FieldMap, Token};
pub use field::{round_amount, FieldKind, FieldSpec, TimeWidth, Value};
pub use keyring::{Keyring, SecretProvider};
pub use registry::{Registry, TokenSchema};

use std::fmt;

/// Everything that can go wrong while encoding or decoding a token.
///
/// All decode-side variants are permanent, non-retryable at the protocol
/// layer: a caller that gets one should surface a 4xx-equivalent failure,
/// not retry with the same token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenError {
    /// Token string is not valid unpadded base64url.
    MalformedEncoding,
    /// Decoded buffer is shorter than the schema's minimum length.
    Undersized { need: usize, got: usize },
    /// Structural violation while walking the declared fields.
    Malformed(&'static str),
    /// MAC tag mismatch; treat as tampering or wrong key, not transient.
    Signature,
    /// Timestamp outside the schema's acceptance window.
    Expired { issued_at: i64, now: i64 },
    /// Caller requested a schema name not in the registry.
    UnknownSchema(String),
    /// No signing key loaded for the schema's key id.
    UnknownKey(String),
    /// Encode: a declared field is absent from the supplied map.
    MissingField(&'static str),
    /// Encode: supplied value variant does not match the field kind.
    WrongKind(&'static str),
    /// Encode: variable string exceeds the 255-byte wire cap.
    TextTooLong(&'static str),
    /// Encode: fixed-width string is not exactly the declared length.
    TextWrongLen(&'static str),
    /// Encode: ID outside the signed 48-bit range.
    IdOutOfRange(&'static str),
    /// Encode: integer does not fit the field's declared width.
    ValueOutOfRange(&'static str),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::MalformedEncoding => write!(f, "malformed base64url encoding"),
            TokenError::Undersized { need, got } => {
                write!(f, "undersized token: need at least {need} bytes, got {got}")
            }
            TokenError::Malformed(what) => write!(f, "malformed token: {what}"),
            TokenError::Signature => write!(f, "signature verification failed"),
            TokenError::Expired { issued_at, now } => {
                write!(f, "token expired: issued_at={issued_at} now={now}")
            }
            TokenError::UnknownSchema(name) => write!(f, "unknown token schema '{name}'"),
            TokenError::UnknownKey(id) => write!(f, "no signing key loaded for '{id}'"),
            TokenError::MissingField(name) => write!(f, "missing field '{name}'"),
            TokenError::WrongKind(name) => write!(f, "wrong value kind for field '{name}'"),
            TokenError::TextTooLong(name) => {
                write!(f, "field '{name}' exceeds 255-byte string cap")
            }
            TokenError::TextWrongLen(name) => {
                write!(f, "field '{name}' is not the declared fixed length")
            }
            TokenError::IdOutOfRange(name) => {
                write!(f, "field '{name}' outside signed 48-bit range")
            }
            TokenError::ValueOutOfRange(name) => {
                write!(f, "field '{name}' does not fit its declared width")
            }
        }
    }
}

impl std::error::Error for TokenError {}

/// Current Unix time in whole seconds.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs() as i64
}
