// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

use anyhow::{bail, Result};
use payhop_codec::SecretProvider;
use payhop_common::duration::env_duration;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::secrets::{EnvSecretProvider, FileSecretProvider};
use crate::store::StoreBackend;

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub service_id: String,
    /// Redis URL for the idempotency store; in-memory when unset.
    pub redis_url: Option<String>,
    pub key_config: KeyProviderConfig,
    /// Backward clock-skew tolerance applied on decode.
    pub clock_skew: Duration,
    /// How long recorded effect outcomes are kept for duplicate replay.
    pub record_ttl: Duration,
}

#[derive(Clone, Debug)]
pub enum KeyProviderConfig {
    /// Secrets from `PAYHOP_KEY_*` environment variables.
    Env,
    /// Raw key files under a directory, optionally generated on first boot.
    File { dir: PathBuf, generate: bool },
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        let service_id =
            env::var("SERVICE_ID").unwrap_or_else(|_| "payhop:relay:v1".to_string());

        let redis_url = env::var("REDIS_URL").ok().filter(|u| !u.is_empty());

        // Duration fields support human-readable formats: "5m", "7d", etc.
        let clock_skew = env_duration("CLOCK_SKEW", Duration::from_secs(300));
        let record_ttl = env_duration("IDEMPOTENCY_TTL", Duration::from_secs(7 * 24 * 3600));

        Ok(Self {
            service_id,
            redis_url,
            key_config: KeyProviderConfig::from_env()?,
            clock_skew,
            record_ttl,
        })
    }

    pub fn store_backend(&self) -> StoreBackend {
        match &self.redis_url {
            Some(url) => StoreBackend::Redis(url.clone()),
            None => StoreBackend::InMemory,
        }
    }
}

impl KeyProviderConfig {
    fn from_env() -> Result<Self> {
        let source = env::var("KEY_SOURCE").unwrap_or_else(|_| "env".to_string());
        match source.to_lowercase().as_str() {
            "env" => Ok(Self::Env),
            "file" => Ok(Self::File {
                dir: env::var("KEY_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/data/keys")),
                generate: env_bool("KEY_GENERATE"),
            }),
            other => bail!("KEY_SOURCE must be 'env' or 'file', got '{other}'"),
        }
    }

    pub fn build(&self) -> Box<dyn SecretProvider> {
        match self {
            Self::Env => Box::new(EnvSecretProvider::new()),
            Self::File { dir, generate } => {
                Box::new(FileSecretProvider::new(dir.clone()).generate_missing(*generate))
            }
        }
    }
}

// Helpers
fn env_bool(key: &str) -> bool {
    env::var(key).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false)
}
