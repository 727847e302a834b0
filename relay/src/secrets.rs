// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

//! Secret providers.
//!
//! The codec resolves signing keys through [`SecretProvider`] once at
//! process start. Two production providers are offered: environment
//! variables (container deployments) and raw key files (bare metal, with
//! optional generate-on-missing for first boot). Key files are written
//! atomically with owner-only permissions.

use anyhow::{anyhow, Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::RngCore;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::{env, fs};
use tracing::info;

use payhop_codec::SecretProvider;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt; // for mode 0o600

/// Reads base64url-nopad secrets from `PAYHOP_KEY_<ID>` variables, where
/// `<ID>` is the key id uppercased with `-` mapped to `_`
/// (e.g. `url-signing` -> `PAYHOP_KEY_URL_SIGNING`).
pub struct EnvSecretProvider {
    prefix: String,
}

impl EnvSecretProvider {
    pub fn new() -> Self {
        Self {
            prefix: "PAYHOP_KEY_".to_string(),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, key_id: &str) -> String {
        let id = key_id.to_ascii_uppercase().replace('-', "_");
        format!("{}{}", self.prefix, id)
    }
}

impl Default for EnvSecretProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretProvider for EnvSecretProvider {
    fn get_secret(&self, key_id: &str) -> Result<Vec<u8>> {
        let var = self.var_name(key_id);
        let raw = env::var(&var).map_err(|_| anyhow!("{var} is not set"))?;
        Base64UrlUnpadded::decode_vec(raw.trim())
            .map_err(|_| anyhow!("{var} is not valid base64url"))
    }
}

/// Reads one raw key file per id from a directory (`<dir>/<key_id>.key`).
/// With `generate_missing`, absent keys are created on first boot.
pub struct FileSecretProvider {
    dir: PathBuf,
    generate_missing: bool,
}

impl FileSecretProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            generate_missing: false,
        }
    }

    pub fn generate_missing(mut self, yes: bool) -> Self {
        self.generate_missing = yes;
        self
    }

    fn key_path(&self, key_id: &str) -> PathBuf {
        self.dir.join(format!("{key_id}.key"))
    }
}

impl SecretProvider for FileSecretProvider {
    fn get_secret(&self, key_id: &str) -> Result<Vec<u8>> {
        let path = self.key_path(key_id);

        match fs::read(&path) {
            Ok(bytes) => {
                anyhow::ensure!(
                    bytes.len() >= 16,
                    "key file {} is too short ({} bytes)",
                    path.display(),
                    bytes.len()
                );
                info!(key_id, path = %path.display(), "signing secret loaded");
                Ok(bytes)
            }
            Err(_) if self.generate_missing => {
                let mut secret = vec![0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut secret);
                fs::create_dir_all(&self.dir)
                    .with_context(|| format!("create key directory {}", self.dir.display()))?;
                atomic_write_secure(&path, &secret)
                    .with_context(|| format!("write key file {}", path.display()))?;
                info!(key_id, path = %path.display(), "signing secret created");
                Ok(secret)
            }
            Err(e) => Err(anyhow!(e).context(format!("read key file {}", path.display()))),
        }
    }
}

/// Fixed secrets for tests and embedded wiring.
#[derive(Default)]
pub struct StaticSecretProvider {
    secrets: HashMap<String, Vec<u8>>,
}

impl StaticSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key_id: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        self.secrets.insert(key_id.into(), secret.into());
        self
    }
}

impl SecretProvider for StaticSecretProvider {
    fn get_secret(&self, key_id: &str) -> Result<Vec<u8>> {
        self.secrets
            .get(key_id)
            .cloned()
            .ok_or_else(|| anyhow!("no secret configured for '{key_id}'"))
    }
}

/// Atomic write with restrictive permissions where possible.
fn atomic_write_secure(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");

    #[cfg(unix)]
    {
        use std::fs::OpenOptions;
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)?;
        f.write_all(data)?;
        f.sync_all()?;
    }

    #[cfg(not(unix))]
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(data)?;
        f.sync_all()?;
    }

    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_provider_decodes_base64url() {
        let secret = b"super-secret-signing-key-material";
        let encoded = Base64UrlUnpadded::encode_string(secret);
        env::set_var("PAYHOP_KEY_URL_SIGNING", &encoded);

        let provider = EnvSecretProvider::new();
        assert_eq!(provider.get_secret("url-signing").unwrap(), secret);

        env::remove_var("PAYHOP_KEY_URL_SIGNING");
    }

    #[test]
    #[serial]
    fn env_provider_missing_var_errors() {
        env::remove_var("PAYHOP_KEY_HOSTPAY_INTERNAL");
        let provider = EnvSecretProvider::new();
        let err = provider.get_secret("hostpay-internal").unwrap_err();
        assert!(err.to_string().contains("PAYHOP_KEY_HOSTPAY_INTERNAL"));
    }

    #[test]
    fn file_provider_roundtrip_and_generation() {
        let dir = std::env::temp_dir().join(format!("payhop-keys-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        // Missing without generation: error.
        let strict = FileSecretProvider::new(&dir);
        assert!(strict.get_secret("url-signing").is_err());

        // Generate on first boot, then read back identically.
        let gen = FileSecretProvider::new(&dir).generate_missing(true);
        let created = gen.get_secret("url-signing").unwrap();
        assert_eq!(created.len(), 32);

        let reread = FileSecretProvider::new(&dir).get_secret("url-signing").unwrap();
        assert_eq!(created, reread);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn static_provider_serves_configured_ids() {
        let provider = StaticSecretProvider::new().with("url-signing", vec![7u8; 32]);
        assert_eq!(provider.get_secret("url-signing").unwrap(), vec![7u8; 32]);
        assert!(provider.get_secret("hostpay-internal").is_err());
    }
}
