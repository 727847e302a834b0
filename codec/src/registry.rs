// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

//! Catalog of named token schemas.
//!
//! Each hop in the pipeline knows statically which schema it accepts and
//! which it emits; nothing is negotiated in-band. Schema lookup fails
//! loudly on an unknown name — schema confusion is a security bug class,
//! not a usability one.
//!
//! Two signing-key identifiers partition trust domains: a key compromised
//! in the URL-signed flows cannot forge tokens for the HostPay-internal
//! flow, and vice versa.
//!
//! Expiration windows are tuned per hop: minutes where the encoded value
//! decays quickly (live exchange rates, gas prices), hours where the only
//! risk is user-interaction delay (waiting out a channel invite).

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::field::{FieldKind, FieldSpec, TimeWidth};
use crate::sig::TAG_LEN;
use crate::timestamp::MAX_WINDOW_SECS;
use crate::TokenError;

/// Key id for the shared URL-signing trust domain.
pub const KEY_URL_SIGNING: &str = "url-signing";
/// Key id for the HostPay-internal trust domain.
pub const KEY_HOSTPAY_INTERNAL: &str = "hostpay-internal";

/// An immutable, versioned-by-name token schema.
#[derive(Debug, Clone)]
pub struct TokenSchema {
    pub name: &'static str,
    pub fields: Vec<FieldSpec>,
    pub signing_key_id: &'static str,
    /// Backward acceptance window: how long after issuance a token stays
    /// valid. The small forward tolerance for clock skew is codec-wide.
    pub max_age: Duration,
}

impl TokenSchema {
    /// Minimum serialized length: all fixed widths, one length byte per
    /// variable string, plus the signature tag.
    pub fn min_encoded_len(&self) -> usize {
        self.fields.iter().map(|f| f.kind.min_width()).sum::<usize>() + TAG_LEN
    }

    /// The schema's single timestamp field.
    pub fn time_field(&self) -> &FieldSpec {
        self.fields
            .iter()
            .find(|f| matches!(f.kind, FieldKind::Time(_)))
            .expect("schema validated to carry exactly one time field")
    }
}

/// Static table mapping schema name to schema.
#[derive(Debug, Clone)]
pub struct Registry {
    map: HashMap<&'static str, TokenSchema>,
}

impl Registry {
    /// The pipeline's schema catalog. Field order is normative: both ends
    /// of a hop must walk fields in exactly this order.
    pub fn builtin() -> Self {
        use FieldKind::*;
        use TimeWidth::*;

        let mut reg = Registry { map: HashMap::new() };

        // Payment provider callback -> orchestrator. Short window: the
        // quoted price goes stale fast.
        reg.insert(TokenSchema {
            name: "nowpayments_to_orchestrator",
            fields: vec![
                FieldSpec::new("user_id", CompactId48),
                FieldSpec::new("channel_id", CompactId48),
                FieldSpec::new("ts", Time(Minutes16)),
                FieldSpec::new("sub_days", Uint(2)),
                FieldSpec::new("price", Text),
                FieldSpec::new("wallet", Text),
                FieldSpec::new("currency", Text),
                FieldSpec::new("network", Text),
            ],
            signing_key_id: KEY_URL_SIGNING,
            max_age: Duration::from_secs(2 * 3600),
        });

        // Orchestrator -> invite service. Same shape, fresh stamp; long
        // window because the user may take hours to accept the invite.
        reg.insert(TokenSchema {
            name: "orchestrator_to_invite",
            fields: vec![
                FieldSpec::new("user_id", CompactId48),
                FieldSpec::new("channel_id", CompactId48),
                FieldSpec::new("ts", Time(Minutes16)),
                FieldSpec::new("sub_days", Uint(2)),
                FieldSpec::new("price", Text),
                FieldSpec::new("wallet", Text),
                FieldSpec::new("currency", Text),
                FieldSpec::new("network", Text),
            ],
            signing_key_id: KEY_URL_SIGNING,
            max_age: Duration::from_secs(24 * 3600),
        });

        reg.insert(TokenSchema {
            name: "split1_to_split2_estimate_request",
            fields: vec![
                FieldSpec::new("user_id", Int(8)),
                FieldSpec::new("channel_id", FixedText(16)),
                FieldSpec::new("wallet", Text),
                FieldSpec::new("deposit_amount", Float64),
                FieldSpec::new("payout_amount", Float64),
                FieldSpec::new("mode", Text),
                FieldSpec::new("ts", Time(Seconds32)),
            ],
            signing_key_id: KEY_URL_SIGNING,
            max_age: Duration::from_secs(24 * 3600),
        });

        reg.insert(TokenSchema {
            name: "split2_to_split1_estimate_response",
            fields: vec![
                FieldSpec::new("user_id", Int(8)),
                FieldSpec::new("channel_id", FixedText(16)),
                FieldSpec::new("estimated_eth", Float64),
                FieldSpec::new("rate", Float64),
                FieldSpec::new("ts", Time(Seconds32)),
            ],
            signing_key_id: KEY_URL_SIGNING,
            max_age: Duration::from_secs(24 * 3600),
        });

        // Estimate-request shape plus the swap identifiers.
        reg.insert(TokenSchema {
            name: "split1_to_split3_swap_request",
            fields: vec![
                FieldSpec::new("user_id", Int(8)),
                FieldSpec::new("channel_id", FixedText(16)),
                FieldSpec::new("wallet", Text),
                FieldSpec::new("deposit_amount", Float64),
                FieldSpec::new("payout_amount", Float64),
                FieldSpec::new("mode", Text),
                FieldSpec::new("unique_id", FixedText(16)),
                FieldSpec::new("actual_amount", Float64),
                FieldSpec::new("ts", Time(Seconds32)),
            ],
            signing_key_id: KEY_URL_SIGNING,
            max_age: Duration::from_secs(24 * 3600),
        });

        reg.insert(TokenSchema {
            name: "split3_to_split1_swap_response",
            fields: vec![
                FieldSpec::new("unique_id", FixedText(16)),
                FieldSpec::new("cn_api_id", Text),
                FieldSpec::new("eth_amount", Float64),
                FieldSpec::new("status", Text),
                FieldSpec::new("ts", Time(Seconds32)),
            ],
            signing_key_id: KEY_URL_SIGNING,
            max_age: Duration::from_secs(24 * 3600),
        });

        // Accumulated payout release. Very short window: the ETH amount
        // reflects a live rate.
        reg.insert(TokenSchema {
            name: "accumulator_to_split3",
            fields: vec![
                FieldSpec::new("accumulation_id", Uint(8)),
                FieldSpec::new("client_id", Text),
                FieldSpec::new("eth_amount", Float64),
                FieldSpec::new("ts", Time(Seconds32)),
            ],
            signing_key_id: KEY_URL_SIGNING,
            max_age: Duration::from_secs(5 * 60),
        });

        reg.insert(TokenSchema {
            name: "microbatch_to_hostpay1_request",
            fields: vec![
                FieldSpec::new("batch_id", Text),
                FieldSpec::new("cn_api_id", Text),
                FieldSpec::new("amount", Float64),
                FieldSpec::new("payin_address", Text),
                FieldSpec::new("ts", Time(Seconds64)),
            ],
            signing_key_id: KEY_URL_SIGNING,
            max_age: Duration::from_secs(30 * 60),
        });

        reg.insert(TokenSchema {
            name: "hostpay1_to_microbatch_response",
            fields: vec![
                FieldSpec::new("batch_id", Text),
                FieldSpec::new("cn_api_id", Text),
                FieldSpec::new("status", Text),
                FieldSpec::new("tx_hash", Text),
                FieldSpec::new("ts", Time(Seconds64)),
            ],
            signing_key_id: KEY_URL_SIGNING,
            max_age: Duration::from_secs(30 * 60),
        });

        // HostPay-internal hop under its own key. Gas-priced, so short.
        reg.insert(TokenSchema {
            name: "hostpay1_to_hostpay2_internal",
            fields: vec![
                FieldSpec::new("cn_api_id", Text),
                FieldSpec::new("eth_amount", Float64),
                FieldSpec::new("gas_limit", Uint(4)),
                FieldSpec::new("ts", Time(Minutes16)),
            ],
            signing_key_id: KEY_HOSTPAY_INTERNAL,
            max_age: Duration::from_secs(10 * 60),
        });

        reg
    }

    fn insert(&mut self, schema: TokenSchema) {
        let time_fields = schema
            .fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Time(_)))
            .count();
        assert_eq!(
            time_fields, 1,
            "schema '{}' must carry exactly one time field",
            schema.name
        );
        assert!(
            schema.max_age.as_secs() <= MAX_WINDOW_SECS,
            "schema '{}' window exceeds the wrap ambiguity bound",
            schema.name
        );
        for f in &schema.fields {
            if let FieldKind::Uint(w) | FieldKind::Int(w) = f.kind {
                assert!(
                    matches!(w, 1 | 2 | 4 | 8),
                    "schema '{}' field '{}' has invalid width {w}",
                    schema.name,
                    f.name
                );
            }
        }
        let prev = self.map.insert(schema.name, schema);
        assert!(prev.is_none(), "duplicate schema name");
    }

    /// Look up a schema by name. Never guesses a default.
    pub fn get(&self, name: &str) -> Result<&TokenSchema, TokenError> {
        self.map
            .get(name)
            .ok_or_else(|| TokenError::UnknownSchema(name.to_string()))
    }

    /// All distinct signing-key ids referenced by the catalog, for
    /// startup-time key resolution.
    pub fn key_ids(&self) -> BTreeSet<&'static str> {
        self.map.values().map(|s| s.signing_key_id).collect()
    }

    pub fn schema_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.map.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
