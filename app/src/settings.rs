//! Credential persistence for the terminal shell.
//!
//! The key is stored base64-encoded under [`CREDENTIAL_KEY`]. Older installs
//! kept a plain value under [`LEGACY_CREDENTIAL_KEY`]; it is moved over the
//! first time the store is read.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as B64_ENGINE;
use base64::Engine;
use her_os_core::kv::KeyValueStore;
use log::info;

pub const CREDENTIAL_KEY: &str = "her_os_api_key";
pub const LEGACY_CREDENTIAL_KEY: &str = "openai_api_key";
pub const CREDENTIAL_ENV: &str = "HER_OS_API_KEY";

pub struct CredentialStore {
    kv: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Stored key, else `HER_OS_API_KEY` from the environment.
    pub fn load(&self) -> Result<Option<String>> {
        self.resolve(std::env::var(CREDENTIAL_ENV).ok())
    }

    fn resolve(&self, env_value: Option<String>) -> Result<Option<String>> {
        self.migrate_legacy()?;
        if let Some(encoded) = self.kv.get(CREDENTIAL_KEY)? {
            let decoded = B64_ENGINE
                .decode(encoded.trim().as_bytes())
                .map_err(|_| anyhow!("Failed to decode stored credential"))?;
            let value = String::from_utf8(decoded)
                .map_err(|_| anyhow!("Stored credential was not valid UTF-8"))?;
            return Ok(Some(value));
        }
        Ok(env_value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    /// Persist `key`; an empty value removes the stored credential.
    pub fn save(&self, key: &str) -> Result<()> {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            self.kv.remove(CREDENTIAL_KEY)?;
        } else {
            self.kv
                .set(CREDENTIAL_KEY, &B64_ENGINE.encode(trimmed.as_bytes()))?;
        }
        Ok(())
    }

    fn migrate_legacy(&self) -> Result<()> {
        let Some(legacy) = self.kv.get(LEGACY_CREDENTIAL_KEY)? else {
            return Ok(());
        };
        if self.kv.get(CREDENTIAL_KEY)?.is_none() {
            self.save(&legacy)?;
            info!("moved stored credential to {CREDENTIAL_KEY}");
        }
        self.kv.remove(LEGACY_CREDENTIAL_KEY)?;
        Ok(())
    }
}
