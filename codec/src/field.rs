// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

//! Typed field model for token schemas.
//!
//! A schema is an ordered list of [`FieldSpec`]s; the codec walks them in
//! declared order on both the encode and decode path. Fixed-width integers
//! are big-endian. Platform IDs are carried as 48-bit two's-complement
//! values: Telegram-style channel IDs are negative 64-bit integers that
//! always fit in 48 bits, so truncating saves two bytes per ID.

use crate::TokenError;

/// Width of a schema's timestamp field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWidth {
    /// Minutes since epoch mod 2^16; wraps every ~45.5 days.
    Minutes16,
    /// Whole Unix seconds, 32-bit.
    Seconds32,
    /// Whole Unix seconds, 64-bit.
    Seconds64,
}

impl TimeWidth {
    pub const fn byte_len(self) -> usize {
        match self {
            TimeWidth::Minutes16 => 2,
            TimeWidth::Seconds32 => 4,
            TimeWidth::Seconds64 => 8,
        }
    }
}

/// Wire representation of one schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Unsigned big-endian integer of 1, 2, 4 or 8 bytes.
    Uint(u8),
    /// Signed big-endian two's-complement integer of 1, 2, 4 or 8 bytes.
    Int(u8),
    /// Signed platform ID packed into 6 bytes (48-bit two's complement).
    CompactId48,
    /// IEEE-754 double, big-endian. Monetary amounts only.
    Float64,
    /// One length byte (0-255) followed by that many UTF-8 bytes.
    Text,
    /// Exactly `n` UTF-8 bytes, no length prefix.
    FixedText(usize),
    /// The schema's timestamp field.
    Time(TimeWidth),
}

impl FieldKind {
    /// On-wire byte count, excluding the payload of variable-length text.
    /// For `Text` this is the single length byte.
    pub fn min_width(&self) -> usize {
        match self {
            FieldKind::Uint(w) | FieldKind::Int(w) => *w as usize,
            FieldKind::CompactId48 => 6,
            FieldKind::Float64 => 8,
            FieldKind::Text => 1,
            FieldKind::FixedText(n) => *n,
            FieldKind::Time(tw) => tw.byte_len(),
        }
    }
}

/// One field of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// A decoded or to-be-encoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Uint(u64),
    Int(i64),
    Float(f64),
    Text(String),
    /// Absolute Unix seconds. On decode this is the reconstructed
    /// timestamp, never the raw wrapped counter.
    Time(i64),
}

impl Value {
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<i64> {
        match self {
            Value::Time(v) => Some(*v),
            _ => None,
        }
    }
}

/// Inclusive lower bound of the signed 48-bit ID range.
pub const ID48_MIN: i64 = -(1 << 47);
/// Exclusive upper bound of the signed 48-bit ID range.
pub const ID48_MAX: i64 = 1 << 47;

/// Pack a signed 64-bit platform ID into 6 big-endian bytes.
pub fn id48_to_bytes(field: &'static str, v: i64) -> Result<[u8; 6], TokenError> {
    if !(ID48_MIN..ID48_MAX).contains(&v) {
        return Err(TokenError::IdOutOfRange(field));
    }
    let raw = (v as u64) & 0x0000_FFFF_FFFF_FFFF;
    let be = raw.to_be_bytes();
    let mut out = [0u8; 6];
    out.copy_from_slice(&be[2..]);
    Ok(out)
}

/// Sign-extend a raw 48-bit value back to i64. Inverts [`id48_to_bytes`]
/// exactly over the signed 48-bit range.
pub fn id48_from_bytes(b: &[u8]) -> i64 {
    debug_assert_eq!(b.len(), 6);
    let mut be = [0u8; 8];
    be[2..].copy_from_slice(b);
    let raw = u64::from_be_bytes(be);
    if raw >= 1 << 47 {
        (raw as i64) - (1i64 << 48)
    } else {
        raw as i64
    }
}

/// Pack a signed integer into `width` big-endian two's-complement bytes.
pub fn int_to_bytes(field: &'static str, v: i64, width: u8) -> Result<Vec<u8>, TokenError> {
    let bits = u32::from(width) * 8;
    if bits < 64 {
        let lo = -(1i64 << (bits - 1));
        let hi = 1i64 << (bits - 1);
        if !(lo..hi).contains(&v) {
            return Err(TokenError::ValueOutOfRange(field));
        }
    }
    let be = (v as u64).to_be_bytes();
    Ok(be[8 - width as usize..].to_vec())
}

/// Sign-extend a `width`-byte big-endian two's-complement value.
pub fn int_from_bytes(b: &[u8]) -> i64 {
    let width = b.len();
    let mut be = [0u8; 8];
    be[8 - width..].copy_from_slice(b);
    let raw = u64::from_be_bytes(be);
    if width < 8 {
        let sign_bit = 1u64 << (width * 8 - 1);
        if raw & sign_bit != 0 {
            return (raw | !((1u64 << (width * 8)) - 1)) as i64;
        }
    }
    raw as i64
}

/// Pack an unsigned integer into `width` big-endian bytes.
pub fn uint_to_bytes(field: &'static str, v: u64, width: u8) -> Result<Vec<u8>, TokenError> {
    if width < 8 && v >= 1u64 << (u32::from(width) * 8) {
        return Err(TokenError::ValueOutOfRange(field));
    }
    let be = v.to_be_bytes();
    Ok(be[8 - width as usize..].to_vec())
}

pub fn uint_from_bytes(b: &[u8]) -> u64 {
    let mut be = [0u8; 8];
    be[8 - b.len()..].copy_from_slice(b);
    u64::from_be_bytes(be)
}

/// Centralized rounding policy for monetary amounts: 8 decimal places,
/// applied once when a float field is decoded. Amounts are IEEE-754
/// doubles on the wire (documented source behavior, precision-loss risk
/// and all), so every consumer must round identically.
pub fn round_amount(v: f64) -> f64 {
    (v * 1e8).round() / 1e8
}
