// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

//! Hop choreography.
//!
//! Every service in the pipeline runs the same per-hop state machine:
//! `Received -> Verified -> EffectApplied -> {Forwarded | RespondedSuccess
//! | Rejected}`. The inbound schema and key are known statically per
//! endpoint, never negotiated in-band. Rejection short-circuits before any
//! side effect and is not retried here; retry policy belongs to the
//! transport, not the token logic.
//!
//! Forwarding always re-signs: the outbound token is freshly encoded
//! (fresh timestamp, possibly a different schema), so a stale-but-valid
//! inbound token can never indirectly grant a stale outbound one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use payhop_codec::{now_unix, Codec, FieldMap, Token, TokenError, Value};
use payhop_common::api::HopReply;

use crate::store::{IdempotencyStore, Reservation};

/// What a hop's local effect hands back to the relay.
pub struct EffectReply {
    /// Outcome recorded for duplicate deliveries and returned to callers.
    pub result: String,
    /// Fields for the outbound token, when this hop forwards.
    pub forward_fields: Option<FieldMap>,
}

/// A hop's local effect. Applied at most once per idempotency key.
#[async_trait]
pub trait HopEffect: Send + Sync {
    async fn apply(&self, token: &Token) -> Result<EffectReply>;
}

/// Static per-endpoint wiring: which schema arrives, which field keys the
/// effect's idempotency, which schema (if any) leaves.
#[derive(Debug, Clone)]
pub struct HopPlan {
    pub inbound_schema: &'static str,
    /// Field whose value makes duplicate deliveries detectable. `None`
    /// for hops whose effect is naturally idempotent.
    pub idempotency_field: Option<&'static str>,
    pub forward_schema: Option<&'static str>,
}

/// Terminal result of one hop.
#[derive(Debug)]
pub enum HopOutcome {
    /// Effect applied; outbound token signed for the next hop.
    Forwarded {
        result: String,
        schema: &'static str,
        token: String,
    },
    /// Terminal hop, or duplicate delivery replaying the recorded outcome.
    Responded { result: String, replayed: bool },
    /// Structural, signature or expiry failure. No side effect happened.
    /// An expected adversarial outcome, not a transport error.
    Rejected(TokenError),
}

impl HopOutcome {
    /// Render this outcome as the transport reply body. Rejections carry
    /// only the error's display form; callers never learn which byte of
    /// an invalid token was at fault.
    pub fn to_reply(&self) -> HopReply {
        match self {
            HopOutcome::Forwarded { result, .. } => HopReply::success(result.clone(), false),
            HopOutcome::Responded { result, replayed } => {
                HopReply::success(result.clone(), *replayed)
            }
            HopOutcome::Rejected(err) => HopReply::rejected(err.to_string()),
        }
    }
}

/// Drives the hop state machine over a codec and an idempotency store.
pub struct Relay {
    codec: Codec,
    store: Arc<dyn IdempotencyStore>,
    record_ttl: Duration,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("record_ttl", &self.record_ttl)
            .finish_non_exhaustive()
    }
}

impl Relay {
    pub fn new(codec: Codec, store: Arc<dyn IdempotencyStore>, record_ttl: Duration) -> Self {
        Self {
            codec,
            store,
            record_ttl,
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Process one inbound token delivery.
    ///
    /// `Err` means a collaborator (store, effect) failed and the delivery
    /// may be retried by the transport. Protocol-level rejection is a
    /// success value: [`HopOutcome::Rejected`].
    pub async fn run_hop(
        &self,
        plan: &HopPlan,
        token_str: &str,
        effect: &dyn HopEffect,
    ) -> Result<HopOutcome> {
        let now = now_unix();

        // Received -> Verified. Everything before the signature check is
        // attacker-controlled bytes.
        let token = match self.codec.decode(plan.inbound_schema, token_str, now) {
            Ok(t) => t,
            Err(e) => {
                warn!(schema = plan.inbound_schema, error = %e, "token rejected");
                return Ok(HopOutcome::Rejected(e));
            }
        };
        debug!(schema = plan.inbound_schema, issued_at = token.issued_at(), "token verified");

        // Duplicate check before the effect: at-least-once delivery must
        // produce at-most-once side effects.
        let idem_key = match plan.idempotency_field {
            Some(field) => Some(self.idempotency_key(plan, &token, field)?),
            None => None,
        };
        if let Some(key) = &idem_key {
            match self.store.reserve(key, self.record_ttl).await? {
                Reservation::Fresh => {}
                Reservation::Duplicate(prior) => {
                    // Not an error: the expected behavior for redelivery.
                    info!(%key, "duplicate delivery, replaying recorded outcome");
                    return Ok(HopOutcome::Responded {
                        result: prior.unwrap_or_default(),
                        replayed: true,
                    });
                }
            }
        }

        // Verified -> EffectApplied.
        let reply = effect
            .apply(&token)
            .await
            .with_context(|| format!("hop effect for '{}'", plan.inbound_schema))?;
        if let Some(key) = &idem_key {
            self.store.record(key, &reply.result, self.record_ttl).await?;
        }

        // EffectApplied -> Forwarded | RespondedSuccess.
        match (plan.forward_schema, reply.forward_fields) {
            (Some(schema), Some(fields)) => {
                let outbound = self.codec.encode(schema, &fields, now)?;
                info!(from = plan.inbound_schema, to = schema, "token forwarded");
                Ok(HopOutcome::Forwarded {
                    result: reply.result,
                    schema,
                    token: outbound,
                })
            }
            (None, Some(_)) => {
                warn!(schema = plan.inbound_schema, "effect produced forward fields but plan has no outbound schema");
                Ok(HopOutcome::Responded {
                    result: reply.result,
                    replayed: false,
                })
            }
            _ => Ok(HopOutcome::Responded {
                result: reply.result,
                replayed: false,
            }),
        }
    }

    /// Namespaced store key, e.g. `split3:unique_id:af52…`. The value is
    /// owned by this service's store, not by the token.
    fn idempotency_key(&self, plan: &HopPlan, token: &Token, field: &'static str) -> Result<String> {
        let value = token
            .get(field)
            .with_context(|| format!("plan names idempotency field '{field}' absent from schema '{}'", plan.inbound_schema))?;
        let rendered = match value {
            Value::Text(s) => s.clone(),
            Value::Int(v) => v.to_string(),
            Value::Uint(v) => v.to_string(),
            Value::Time(v) => v.to_string(),
            Value::Float(_) => anyhow::bail!("float fields cannot key idempotency"),
        };
        Ok(format!("{}:{}:{}", plan.inbound_schema, field, rendered))
    }
}
