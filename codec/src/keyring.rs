// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

//! Signing-key resolution.
//!
//! Key material is resolved once at process start through a
//! [`SecretProvider`] collaborator and never persisted by the protocol
//! core. A missing key is fatal to startup, not a per-request failure: a
//! service that cannot verify its inbound schema must not accept traffic.
//!
//! The wire MAC key for each key id is derived from the provider secret
//! with HKDF-SHA256, domain-separated by key id, so the raw secret is
//! never used directly and distinct ids stay cryptographically
//! independent even if an operator reuses a secret.

use anyhow::{Context, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use std::collections::HashMap;
use tracing::info;
use zeroize::Zeroizing;

use crate::TokenError;

/// External secret storage, resolved at process start.
pub trait SecretProvider {
    fn get_secret(&self, key_id: &str) -> Result<Vec<u8>>;
}

const HKDF_SALT: &[u8] = b"payhop-mac-salt";
const HKDF_INFO_PREFIX: &str = "payhop:mac:v1|";

/// Immutable map of key id to derived 32-byte MAC key. Loaded once,
/// shared read-only by any number of concurrent verifications.
pub struct Keyring {
    keys: HashMap<String, Zeroizing<[u8; 32]>>,
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print derived key material; ids are enough for diagnostics.
        f.debug_struct("Keyring")
            .field("key_ids", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Keyring {
    /// Resolve every key id through the provider. Any failure aborts: the
    /// caller is expected to treat this as fatal to startup.
    pub fn load<'a>(
        provider: &dyn SecretProvider,
        key_ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let mut keys = HashMap::new();
        for id in key_ids {
            let secret = Zeroizing::new(
                provider
                    .get_secret(id)
                    .with_context(|| format!("resolve signing key '{id}'"))?,
            );
            anyhow::ensure!(!secret.is_empty(), "signing key '{id}' is empty");
            keys.insert(id.to_string(), derive_mac_key(&secret, id));
        }
        info!(count = keys.len(), "signing keys loaded");
        Ok(Self { keys })
    }

    pub(crate) fn mac_key(&self, key_id: &str) -> Result<&[u8; 32], TokenError> {
        self.keys
            .get(key_id)
            .map(|k| &**k)
            .ok_or_else(|| TokenError::UnknownKey(key_id.to_string()))
    }

    pub fn has(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }
}

/// HKDF-SHA256 with per-key-id domain separation.
fn derive_mac_key(secret: &[u8], key_id: &str) -> Zeroizing<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret);
    let info = format!("{HKDF_INFO_PREFIX}{key_id}");
    let mut out = Zeroizing::new([0u8; 32]);
    hkdf.expand(info.as_bytes(), &mut *out)
        .expect("32 bytes is a valid HKDF output length");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapProvider(HashMap<String, Vec<u8>>);

    impl SecretProvider for MapProvider {
        fn get_secret(&self, key_id: &str) -> Result<Vec<u8>> {
            self.0
                .get(key_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no secret for '{key_id}'"))
        }
    }

    #[test]
    fn loads_all_requested_ids() {
        let provider = MapProvider(HashMap::from([
            ("url-signing".to_string(), vec![1u8; 32]),
            ("hostpay-internal".to_string(), vec![2u8; 32]),
        ]));

        let ring = Keyring::load(&provider, ["url-signing", "hostpay-internal"]).unwrap();
        assert!(ring.has("url-signing"));
        assert!(ring.has("hostpay-internal"));
        assert!(!ring.has("other"));
    }

    #[test]
    fn missing_key_is_fatal() {
        let provider = MapProvider(HashMap::new());
        let err = Keyring::load(&provider, ["url-signing"]).unwrap_err();
        assert!(err.to_string().contains("url-signing"));
    }

    #[test]
    fn empty_secret_is_fatal() {
        let provider = MapProvider(HashMap::from([("url-signing".to_string(), vec![])]));
        assert!(Keyring::load(&provider, ["url-signing"]).is_err());
    }

    #[test]
    fn derivation_is_domain_separated() {
        // Same operator secret under two ids still yields independent keys.
        let secret = vec![7u8; 32];
        let a = derive_mac_key(&secret, "url-signing");
        let b = derive_mac_key(&secret, "hostpay-internal");
        assert_ne!(*a, *b);

        // And is deterministic per id.
        let a2 = derive_mac_key(&secret, "url-signing");
        assert_eq!(*a, *a2);
    }
}
