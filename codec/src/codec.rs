// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

//! The generic token encoder/decoder.
//!
//! One codec serves every schema in the registry; per-format packing code
//! is exactly the bug class this design eliminates. Decode ordering is the
//! load-bearing decision:
//!
//! 1. base64url decode, 2. minimum-length check, 3. structural field walk
//! (bounds-checked against attacker-controlled length prefixes),
//! 4. signature verification over every byte before the tag, 5. timestamp
//! expansion and window check, 6. ID sign-extension and amount rounding.
//!
//! Malformed buffers are rejected cheaply, but no field value ever reaches
//! a caller unless the signature verified over the exact bytes that
//! produced it.

use base64ct::{Base64UrlUnpadded, Encoding};
use std::collections::HashMap;
use std::time::Duration;

use crate::field::{self, FieldKind, TimeWidth, Value};
use crate::keyring::Keyring;
use crate::registry::Registry;
use crate::sig::{self, TAG_LEN};
use crate::timestamp;
use crate::TokenError;

/// Field values keyed by field name.
pub type FieldMap = HashMap<String, Value>;

/// An immutable decoded token. Constructed only after decode, length
/// consistency and signature verification all succeeded. Forwarding never
/// mutates one of these; the next hop gets a freshly encoded token.
#[derive(Debug, Clone)]
pub struct Token {
    schema: &'static str,
    issued_at: i64,
    fields: FieldMap,
}

impl Token {
    pub fn schema(&self) -> &'static str {
        self.schema
    }

    /// Reconstructed issuance time, Unix seconds.
    pub fn issued_at(&self) -> i64 {
        self.issued_at
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(Value::as_int)
    }

    pub fn uint(&self, name: &str) -> Option<u64> {
        self.fields.get(name).and_then(Value::as_uint)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_float)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_text)
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn into_fields(self) -> FieldMap {
        self.fields
    }
}

/// Default forward tolerance for sender clock skew.
const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

/// Schema-driven encoder/decoder. Pure and thread-safe: signing keys are
/// immutable after construction, so any number of requests may encode or
/// decode concurrently without coordination.
pub struct Codec {
    registry: Registry,
    keyring: Keyring,
    skew: Duration,
}

impl Codec {
    pub fn new(registry: Registry, keyring: Keyring) -> Self {
        Self {
            registry,
            keyring,
            skew: DEFAULT_CLOCK_SKEW,
        }
    }

    /// Override the forward clock-skew tolerance (operator knob).
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Serialize and sign `fields` under the named schema. The schema's
    /// timestamp field is stamped from `now`; any caller-supplied value
    /// for it is ignored, so a forwarded token always gets a fresh window.
    pub fn encode(&self, schema_name: &str, fields: &FieldMap, now: i64) -> Result<String, TokenError> {
        let schema = self.registry.get(schema_name)?;
        let key = self.keyring.mac_key(schema.signing_key_id)?;

        let mut buf = Vec::with_capacity(schema.min_encoded_len() + 64);
        for spec in &schema.fields {
            match spec.kind {
                FieldKind::Time(width) => encode_time(&mut buf, spec.name, width, now)?,
                _ => {
                    let value = fields
                        .get(spec.name)
                        .ok_or(TokenError::MissingField(spec.name))?;
                    encode_value(&mut buf, spec.name, spec.kind, value)?;
                }
            }
        }

        let tag = sig::sign(key, schema.name, &buf);
        buf.extend_from_slice(&tag);
        Ok(Base64UrlUnpadded::encode_string(&buf))
    }

    /// Decode and verify a token against the named schema.
    pub fn decode(&self, schema_name: &str, token: &str, now: i64) -> Result<Token, TokenError> {
        let schema = self.registry.get(schema_name)?;
        let key = self.keyring.mac_key(schema.signing_key_id)?;

        let raw = Base64UrlUnpadded::decode_vec(token)
            .map_err(|_| TokenError::MalformedEncoding)?;

        let need = schema.min_encoded_len();
        if raw.len() < need {
            return Err(TokenError::Undersized { need, got: raw.len() });
        }

        // Structural walk. Length prefixes are attacker-controlled until
        // the signature check passes, so every slice is bounds-checked.
        let mut cursor = 0usize;
        let mut staged: Vec<(&'static str, Staged)> = Vec::with_capacity(schema.fields.len());
        for spec in &schema.fields {
            let staged_value = decode_field(&raw, &mut cursor, spec.kind)?;
            staged.push((spec.name, staged_value));
        }

        // After all declared fields the remainder must be exactly the tag.
        if raw.len() - cursor != TAG_LEN {
            return Err(TokenError::Malformed("trailing bytes after declared fields"));
        }

        // Signature covers the schema name and every byte before the tag.
        if !sig::verify(key, schema.name, &raw[..cursor], &raw[cursor..]) {
            return Err(TokenError::Signature);
        }

        // Semantic/time validation only after the bytes are authenticated.
        let mut issued_at = 0i64;
        let mut fields = FieldMap::with_capacity(staged.len());
        for (name, value) in staged {
            let value = match value {
                Staged::Time(width, raw_time) => {
                    issued_at = expand_time(width, raw_time, now);
                    self.check_window(schema.max_age, issued_at, now)?;
                    Value::Time(issued_at)
                }
                Staged::Id48(bytes) => Value::Int(field::id48_from_bytes(&bytes)),
                Staged::Ready(v) => v,
            };
            fields.insert(name.to_string(), value);
        }

        Ok(Token {
            schema: schema.name,
            issued_at,
            fields,
        })
    }

    fn check_window(&self, max_age: Duration, issued_at: i64, now: i64) -> Result<(), TokenError> {
        let expired = now - issued_at > max_age.as_secs() as i64;
        let too_far_ahead = issued_at - now > self.skew.as_secs() as i64;
        if expired || too_far_ahead {
            return Err(TokenError::Expired { issued_at, now });
        }
        Ok(())
    }
}

/// Parsed-but-not-yet-trusted field value.
enum Staged {
    Ready(Value),
    Id48([u8; 6]),
    Time(TimeWidth, u64),
}

fn encode_time(buf: &mut Vec<u8>, name: &'static str, width: TimeWidth, now: i64) -> Result<(), TokenError> {
    match width {
        TimeWidth::Minutes16 => buf.extend_from_slice(&timestamp::compact(now).to_be_bytes()),
        TimeWidth::Seconds32 => {
            let secs = u32::try_from(now).map_err(|_| TokenError::ValueOutOfRange(name))?;
            buf.extend_from_slice(&secs.to_be_bytes());
        }
        TimeWidth::Seconds64 => {
            let secs = u64::try_from(now).map_err(|_| TokenError::ValueOutOfRange(name))?;
            buf.extend_from_slice(&secs.to_be_bytes());
        }
    }
    Ok(())
}

fn encode_value(
    buf: &mut Vec<u8>,
    name: &'static str,
    kind: FieldKind,
    value: &Value,
) -> Result<(), TokenError> {
    match (kind, value) {
        (FieldKind::Uint(w), Value::Uint(v)) => {
            buf.extend_from_slice(&field::uint_to_bytes(name, *v, w)?);
        }
        (FieldKind::Int(w), Value::Int(v)) => {
            buf.extend_from_slice(&field::int_to_bytes(name, *v, w)?);
        }
        (FieldKind::CompactId48, Value::Int(v)) => {
            buf.extend_from_slice(&field::id48_to_bytes(name, *v)?);
        }
        (FieldKind::Float64, Value::Float(v)) => {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        (FieldKind::Text, Value::Text(s)) => {
            if s.len() > 255 {
                // Hard wire cap: fail at encode time, never truncate.
                return Err(TokenError::TextTooLong(name));
            }
            buf.push(s.len() as u8);
            buf.extend_from_slice(s.as_bytes());
        }
        (FieldKind::FixedText(n), Value::Text(s)) => {
            if s.len() != n {
                return Err(TokenError::TextWrongLen(name));
            }
            buf.extend_from_slice(s.as_bytes());
        }
        (FieldKind::Time(_), _) => unreachable!("time fields are stamped by the codec"),
        _ => return Err(TokenError::WrongKind(name)),
    }
    Ok(())
}

/// Consume exactly `n` bytes, bounds-checked before slicing.
fn take<'a>(raw: &'a [u8], cursor: &mut usize, n: usize) -> Result<&'a [u8], TokenError> {
    let start = *cursor;
    let end = start
        .checked_add(n)
        .ok_or(TokenError::Malformed("field length overflow"))?;
    if end > raw.len() {
        return Err(TokenError::Malformed("field extends past end of buffer"));
    }
    *cursor = end;
    Ok(&raw[start..end])
}

fn decode_field(raw: &[u8], cursor: &mut usize, kind: FieldKind) -> Result<Staged, TokenError> {
    match kind {
        FieldKind::Uint(w) => {
            let bytes = take(raw, cursor, w as usize)?;
            Ok(Staged::Ready(Value::Uint(field::uint_from_bytes(bytes))))
        }
        FieldKind::Int(w) => {
            let bytes = take(raw, cursor, w as usize)?;
            Ok(Staged::Ready(Value::Int(field::int_from_bytes(bytes))))
        }
        FieldKind::CompactId48 => {
            let bytes = take(raw, cursor, 6)?;
            let mut id = [0u8; 6];
            id.copy_from_slice(bytes);
            Ok(Staged::Id48(id))
        }
        FieldKind::Float64 => {
            let bytes = take(raw, cursor, 8)?;
            let mut be = [0u8; 8];
            be.copy_from_slice(bytes);
            let v = f64::from_be_bytes(be);
            Ok(Staged::Ready(Value::Float(field::round_amount(v))))
        }
        FieldKind::Text => {
            let len = take(raw, cursor, 1)?[0] as usize;
            let bytes = take(raw, cursor, len)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| TokenError::Malformed("invalid UTF-8 in string field"))?;
            Ok(Staged::Ready(Value::Text(s.to_string())))
        }
        FieldKind::FixedText(n) => {
            let bytes = take(raw, cursor, n)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| TokenError::Malformed("invalid UTF-8 in string field"))?;
            Ok(Staged::Ready(Value::Text(s.to_string())))
        }
        FieldKind::Time(width) => {
            let bytes = take(raw, cursor, width.byte_len())?;
            Ok(Staged::Time(width, field::uint_from_bytes(bytes)))
        }
    }
}

fn expand_time(width: TimeWidth, raw: u64, now: i64) -> i64 {
    match width {
        TimeWidth::Minutes16 => timestamp::expand(raw as u16, now),
        // Full-width stamps carry absolute seconds; no wrap logic.
        TimeWidth::Seconds32 | TimeWidth::Seconds64 => raw as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::{Keyring, SecretProvider};
    use crate::registry::Registry;

    struct TestProvider;

    impl SecretProvider for TestProvider {
        fn get_secret(&self, key_id: &str) -> anyhow::Result<Vec<u8>> {
            Ok(format!("test-secret-{key_id}").into_bytes())
        }
    }

    fn test_codec() -> Codec {
        let registry = Registry::builtin();
        let ids = registry.key_ids();
        let keyring = Keyring::load(&TestProvider, ids).unwrap();
        Codec::new(registry, keyring)
    }

    fn nowpayments_fields() -> FieldMap {
        FieldMap::from([
            ("user_id".into(), Value::Int(123_456_789)),
            ("channel_id".into(), Value::Int(-1_001_234_567_890)),
            ("sub_days".into(), Value::Uint(30)),
            ("price".into(), Value::Text("15.00".into())),
            ("wallet".into(), Value::Text("0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B".into())),
            ("currency".into(), Value::Text("eth".into())),
            ("network".into(), Value::Text("mainnet".into())),
        ])
    }

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn scenario_subscription_token_roundtrip_then_expiry() {
        let codec = test_codec();
        let token = codec
            .encode("nowpayments_to_orchestrator", &nowpayments_fields(), NOW)
            .unwrap();

        // Immediate decode: success, all fields equal.
        let decoded = codec
            .decode("nowpayments_to_orchestrator", &token, NOW)
            .unwrap();
        assert_eq!(decoded.int("user_id"), Some(123_456_789));
        assert_eq!(decoded.int("channel_id"), Some(-1_001_234_567_890));
        assert_eq!(decoded.uint("sub_days"), Some(30));
        assert_eq!(decoded.text("price"), Some("15.00"));
        assert_eq!(decoded.text("currency"), Some("eth"));
        assert_eq!(decoded.text("network"), Some("mainnet"));
        assert_eq!(decoded.issued_at(), NOW - NOW % 60);

        // Three hours later, against the schema's 2h window: expired.
        let err = codec
            .decode("nowpayments_to_orchestrator", &token, NOW + 3 * 3600)
            .unwrap_err();
        assert!(matches!(err, TokenError::Expired { .. }), "got {err:?}");
    }

    #[test]
    fn acceptance_window_edges() {
        let codec = test_codec();
        let token = codec
            .encode("nowpayments_to_orchestrator", &nowpayments_fields(), NOW)
            .unwrap();
        let issued = NOW - NOW % 60;

        // Just inside the backward window.
        assert!(codec
            .decode("nowpayments_to_orchestrator", &token, issued + 2 * 3600)
            .is_ok());
        // Just past it.
        assert!(codec
            .decode("nowpayments_to_orchestrator", &token, issued + 2 * 3600 + 61)
            .is_err());
        // Inside the forward skew tolerance.
        assert!(codec
            .decode("nowpayments_to_orchestrator", &token, issued - 4 * 60)
            .is_ok());
        // Beyond it.
        assert!(codec
            .decode("nowpayments_to_orchestrator", &token, issued - 6 * 60)
            .is_err());
    }

    #[test]
    fn minute_wrap_boundary_accepted() {
        let codec = test_codec();
        // Issue with the counter at 65535, decode after it wrapped to 3.
        let issued = (3 * timestamp::MINUTE_CYCLE - 1) * 60;
        let now = (3 * timestamp::MINUTE_CYCLE + 3) * 60;

        let token = codec
            .encode("nowpayments_to_orchestrator", &nowpayments_fields(), issued)
            .unwrap();
        let decoded = codec
            .decode("nowpayments_to_orchestrator", &token, now)
            .unwrap();
        assert_eq!(decoded.issued_at(), issued);
    }

    #[test]
    fn tampered_byte_is_a_signature_error() {
        let codec = test_codec();
        let token = codec
            .encode("nowpayments_to_orchestrator", &nowpayments_fields(), NOW)
            .unwrap();

        let mut raw = Base64UrlUnpadded::decode_vec(&token).unwrap();
        raw[0] ^= 0x01; // first byte of user_id
        let tampered = Base64UrlUnpadded::encode_string(&raw);

        let err = codec
            .decode("nowpayments_to_orchestrator", &tampered, NOW)
            .unwrap_err();
        assert_eq!(err, TokenError::Signature);
    }

    #[test]
    fn bad_base64_is_malformed_encoding() {
        let codec = test_codec();
        let err = codec
            .decode("nowpayments_to_orchestrator", "not!!valid@@base64", NOW)
            .unwrap_err();
        assert_eq!(err, TokenError::MalformedEncoding);
    }

    #[test]
    fn truncated_buffer_is_undersized() {
        let codec = test_codec();
        let token = codec
            .encode("nowpayments_to_orchestrator", &nowpayments_fields(), NOW)
            .unwrap();
        let raw = Base64UrlUnpadded::decode_vec(&token).unwrap();
        let short = Base64UrlUnpadded::encode_string(&raw[..10]);

        let err = codec
            .decode("nowpayments_to_orchestrator", &short, NOW)
            .unwrap_err();
        assert!(matches!(err, TokenError::Undersized { .. }));
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let codec = test_codec();
        let token = codec
            .encode("nowpayments_to_orchestrator", &nowpayments_fields(), NOW)
            .unwrap();
        let mut raw = Base64UrlUnpadded::decode_vec(&token).unwrap();
        raw.push(0x00);
        let padded = Base64UrlUnpadded::encode_string(&raw);

        let err = codec
            .decode("nowpayments_to_orchestrator", &padded, NOW)
            .unwrap_err();
        assert!(matches!(err, TokenError::Malformed(_)));
    }

    #[test]
    fn hostile_length_prefix_is_bounds_checked() {
        let codec = test_codec();
        let token = codec
            .encode("nowpayments_to_orchestrator", &nowpayments_fields(), NOW)
            .unwrap();
        let mut raw = Base64UrlUnpadded::decode_vec(&token).unwrap();
        // The price length byte sits right after the two IDs, ts, sub_days.
        let price_len_at = 6 + 6 + 2 + 2;
        raw[price_len_at] = 0xFF;
        let hostile = Base64UrlUnpadded::encode_string(&raw);

        // Must fail cleanly (never panic or over-read).
        let err = codec
            .decode("nowpayments_to_orchestrator", &hostile, NOW)
            .unwrap_err();
        assert!(matches!(err, TokenError::Malformed(_)));
    }

    #[test]
    fn text_cap_enforced_at_encode() {
        let codec = test_codec();
        let mut fields = nowpayments_fields();

        fields.insert("wallet".into(), Value::Text("w".repeat(255)));
        let token = codec
            .encode("nowpayments_to_orchestrator", &fields, NOW)
            .unwrap();
        let decoded = codec
            .decode("nowpayments_to_orchestrator", &token, NOW)
            .unwrap();
        assert_eq!(decoded.text("wallet").unwrap().len(), 255);

        fields.insert("wallet".into(), Value::Text("w".repeat(256)));
        let err = codec
            .encode("nowpayments_to_orchestrator", &fields, NOW)
            .unwrap_err();
        assert_eq!(err, TokenError::TextTooLong("wallet"));
    }

    #[test]
    fn fixed_text_must_be_exact() {
        let codec = test_codec();
        let mut fields = FieldMap::from([
            ("user_id".into(), Value::Int(42)),
            ("channel_id".into(), Value::Text("c".repeat(16))),
            ("wallet".into(), Value::Text("0xdead".into())),
            ("deposit_amount".into(), Value::Float(0.5)),
            ("payout_amount".into(), Value::Float(0.45)),
            ("mode".into(), Value::Text("standard".into())),
        ]);

        assert!(codec
            .encode("split1_to_split2_estimate_request", &fields, NOW)
            .is_ok());

        fields.insert("channel_id".into(), Value::Text("too-short".into()));
        let err = codec
            .encode("split1_to_split2_estimate_request", &fields, NOW)
            .unwrap_err();
        assert_eq!(err, TokenError::TextWrongLen("channel_id"));
    }

    #[test]
    fn missing_and_mismatched_fields() {
        let codec = test_codec();
        let mut fields = nowpayments_fields();

        fields.remove("price");
        assert_eq!(
            codec.encode("nowpayments_to_orchestrator", &fields, NOW),
            Err(TokenError::MissingField("price"))
        );

        fields.insert("price".into(), Value::Uint(15));
        assert_eq!(
            codec.encode("nowpayments_to_orchestrator", &fields, NOW),
            Err(TokenError::WrongKind("price"))
        );
    }

    #[test]
    fn unknown_schema_rejected_on_both_paths() {
        let codec = test_codec();
        assert!(matches!(
            codec.encode("bogus", &FieldMap::new(), NOW),
            Err(TokenError::UnknownSchema(_))
        ));
        assert!(matches!(
            codec.decode("bogus", "AAAA", NOW),
            Err(TokenError::UnknownSchema(_))
        ));
    }

    #[test]
    fn schema_confusion_never_verifies() {
        // A token signed for one schema must not decode under another,
        // even within the same trust domain.
        let codec = test_codec();
        let token = codec
            .encode("nowpayments_to_orchestrator", &nowpayments_fields(), NOW)
            .unwrap();
        assert!(codec.decode("orchestrator_to_invite", &token, NOW).is_err());
    }

    #[test]
    fn amounts_round_to_eight_places_on_decode() {
        let codec = test_codec();
        let fields = FieldMap::from([
            ("accumulation_id".into(), Value::Uint(77)),
            ("client_id".into(), Value::Text("client-9".into())),
            ("eth_amount".into(), Value::Float(0.123456789123)),
        ]);
        let token = codec.encode("accumulator_to_split3", &fields, NOW).unwrap();
        let decoded = codec.decode("accumulator_to_split3", &token, NOW).unwrap();
        assert_eq!(decoded.float("eth_amount"), Some(0.12345679));
    }

    #[test]
    fn forwarding_resets_the_window() {
        let codec = test_codec();
        let t0 = NOW;
        let token = codec
            .encode("nowpayments_to_orchestrator", &nowpayments_fields(), t0)
            .unwrap();

        // 1h55m later the inbound token is near the end of its 2h window.
        let relay_time = t0 + 115 * 60;
        let inbound = codec
            .decode("nowpayments_to_orchestrator", &token, relay_time)
            .unwrap();

        // Re-sign under the outbound schema: fresh stamp, fresh window.
        let outbound = codec
            .encode("orchestrator_to_invite", inbound.fields(), relay_time)
            .unwrap();
        let decoded = codec
            .decode("orchestrator_to_invite", &outbound, relay_time + 20 * 3600)
            .unwrap();
        assert_eq!(decoded.issued_at(), relay_time - relay_time % 60);
        assert_eq!(decoded.int("channel_id"), Some(-1_001_234_567_890));
    }
}
