// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

//! Service-side plumbing for the payhop token pipeline.
//!
//! Where `payhop-codec` defines the wire protocol, this crate carries the
//! choreography each service repeats around it: decode-and-verify the
//! inbound token, suppress duplicate deliveries through an idempotency
//! store, apply the hop's local effect at most once, then either respond
//! or re-sign a fresh token for the next hop.
//!
//! - [`hop`] — the per-hop state machine ([`Relay`], [`HopEffect`])
//! - [`store`] — atomic check-and-reserve idempotency backends
//! - [`secrets`] — signing-secret providers (env vars, key files)
//! - [`config`] — environment-driven service configuration

pub mod config;
pub mod hop;
pub mod secrets;
pub mod store;

pub use config::{KeyProviderConfig, RelayConfig};
pub use hop::{EffectReply, HopEffect, HopOutcome, HopPlan, Relay};
pub use secrets::{EnvSecretProvider, FileSecretProvider, StaticSecretProvider};
pub use store::{IdempotencyStore, InMemoryStore, RedisStore, Reservation, StoreBackend};

use anyhow::{Context, Result};
use payhop_codec::{Codec, Keyring, Registry};

/// Wire a [`Relay`] from configuration: resolve every signing key the
/// schema registry references (missing keys abort startup), then attach
/// the configured idempotency backend.
pub fn build_relay(config: &RelayConfig) -> Result<Relay> {
    let registry = Registry::builtin();
    let provider = config.key_config.build();
    let keyring = Keyring::load(provider.as_ref(), registry.key_ids())
        .context("load signing keys")?;
    let codec = Codec::new(registry, keyring).with_clock_skew(config.clock_skew);
    let store = config.store_backend().build()?;
    Ok(Relay::new(codec, store, config.record_ttl))
}
