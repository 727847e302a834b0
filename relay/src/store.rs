// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

//! Idempotency stores.
//!
//! Token delivery is at-least-once; externally consequential effects
//! (funds movement, database inserts) must be at-most-once. The store
//! provides the single transactional guarantee the protocol needs from a
//! collaborator: an atomic check-and-reserve keyed by the idempotency key
//! a token carries, so two concurrent deliveries of the same token cannot
//! both pass the duplicate check.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::Script;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

//
// ─── REDIS LUA SCRIPT ────────────────────────────────────────────────
//   Atomic reserve-if-absent with expiry; returns the prior outcome on
//   a duplicate so the caller can replay it.
//
const LUA_RESERVE: &str = r#"
  -- KEYS[1] = idempotency key, ARGV[1] = ttl (seconds)
  if redis.call('SETNX', KEYS[1], '') == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
    return {1, ''}
  else
    return {0, redis.call('GET', KEYS[1])}
  end
"#;

/// Result of an atomic check-and-reserve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// First delivery: the caller owns the effect.
    Fresh,
    /// Duplicate delivery. Carries the recorded outcome of the original
    /// effect, or `None` if the original holder has not recorded one yet.
    Duplicate(Option<String>),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically reserve `key`. Exactly one caller across all concurrent
    /// deliveries observes `Fresh`.
    async fn reserve(&self, key: &str, ttl: Duration) -> Result<Reservation>;

    /// Record the effect outcome under a previously reserved key, to be
    /// replayed to duplicate deliveries.
    async fn record(&self, key: &str, outcome: &str, ttl: Duration) -> Result<()>;
}

//
// ─── IN-MEMORY BACKEND ───────────────────────────────────────────────
//
struct Entry {
    expires_at: Instant,
    outcome: Option<String>,
}

/// Single-process backend for tests and development.
#[derive(Default)]
pub struct InMemoryStore {
    map: Arc<RwLock<HashMap<String, Entry>>>,
}

#[async_trait]
impl IdempotencyStore for InMemoryStore {
    async fn reserve(&self, key: &str, ttl: Duration) -> Result<Reservation> {
        let mut map = self.map.write().await;
        let now = Instant::now();

        // purge expired
        map.retain(|_, e| e.expires_at > now);

        if let Some(entry) = map.get(key) {
            debug!(%key, "duplicate delivery (in-memory)");
            return Ok(Reservation::Duplicate(entry.outcome.clone()));
        }

        map.insert(
            key.to_owned(),
            Entry {
                expires_at: now + ttl,
                outcome: None,
            },
        );
        debug!(%key, ttl = ?ttl, "reserved (in-memory)");
        Ok(Reservation::Fresh)
    }

    async fn record(&self, key: &str, outcome: &str, ttl: Duration) -> Result<()> {
        let mut map = self.map.write().await;
        let now = Instant::now();
        map.insert(
            key.to_owned(),
            Entry {
                expires_at: now + ttl,
                outcome: Some(outcome.to_owned()),
            },
        );
        Ok(())
    }
}

//
// ─── REDIS BACKEND ───────────────────────────────────────────────────
//
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).with_context(|| format!("connect redis @ {}", url))?;
        Ok(Self { client })
    }

    async fn get_conn(&self) -> Result<redis::aio::Connection> {
        let mut backoff_ms = 200u64;
        for attempt in 1..=3 {
            match self.client.get_async_connection().await {
                Ok(conn) => return Ok(conn),
                Err(e) if attempt < 3 => {
                    warn!(
                        attempt,
                        "redis connect failed: {e}; retrying in {backoff_ms}ms"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
                Err(e) => return Err(e.into()),
            }
        }
        unreachable!()
    }
}

#[async_trait]
impl IdempotencyStore for RedisStore {
    async fn reserve(&self, key: &str, ttl: Duration) -> Result<Reservation> {
        let ttl_secs = ttl.as_secs().max(1);
        let mut conn = self.get_conn().await?;

        let (fresh, prior): (i32, String) = Script::new(LUA_RESERVE)
            .key(key)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await
            .context("invoke redis reserve script")?;

        if fresh == 1 {
            info!(%key, ttl = %ttl_secs, "reserved (redis)");
            Ok(Reservation::Fresh)
        } else {
            warn!(%key, "duplicate delivery (redis)");
            let outcome = if prior.is_empty() { None } else { Some(prior) };
            Ok(Reservation::Duplicate(outcome))
        }
    }

    async fn record(&self, key: &str, outcome: &str, ttl: Duration) -> Result<()> {
        let ttl_secs = ttl.as_secs().max(1);
        let mut conn = self.get_conn().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(outcome)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await
            .context("record idempotency outcome")?;
        Ok(())
    }
}

//
// ─── FACTORY ─────────────────────────────────────────────────────────
//
pub enum StoreBackend {
    InMemory,
    Redis(String),
}

impl StoreBackend {
    pub fn build(self) -> Result<Arc<dyn IdempotencyStore>> {
        match self {
            StoreBackend::InMemory => {
                info!("using in-memory idempotency store");
                Ok(Arc::new(InMemoryStore::default()))
            }
            StoreBackend::Redis(url) => {
                info!(%url, "using redis idempotency store");
                Ok(Arc::new(RedisStore::new(&url)?))
            }
        }
    }
}
