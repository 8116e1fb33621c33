use anyhow::{Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::path::PathBuf;

use crate::credentials::{
    DerivedKey, RefreshTokenHasher, TokenCipher, TokenError, TokenVault, DEFAULT_EXPIRES_IN_SECS,
    MIN_ITERATIONS,
};

/// Complete vault configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub vk: VkConfig,
}

/// Secrets used to derive the token cipher key
#[derive(Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// Application secret (VK_APP_SECRET)
    #[serde(default)]
    pub app_secret: Option<String>,
    /// Explicit key material, takes precedence over the app secret
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("SecurityConfig")
            .field("app_secret", &redact(&self.app_secret))
            .field("encryption_key", &redact(&self.encryption_key))
            .finish()
    }
}

/// Settings database location
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("vkinder.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Token lifecycle tuning
#[derive(Debug, Clone, Deserialize)]
pub struct TokensConfig {
    /// Lifetime assumed when the provider does not report `expires_in`
    #[serde(default = "default_expires_in")]
    pub default_expires_in_seconds: i64,
    /// PBKDF2 rounds for refresh-token hashes (never below 100k)
    #[serde(default = "default_hash_iterations")]
    pub hash_iterations: u32,
    /// Reject ciphertexts older than this; unset means no cipher-level TTL
    #[serde(default)]
    pub cipher_ttl_seconds: Option<u64>,
}

fn default_expires_in() -> i64 {
    DEFAULT_EXPIRES_IN_SECS
}

fn default_hash_iterations() -> u32 {
    MIN_ITERATIONS
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            default_expires_in_seconds: default_expires_in(),
            hash_iterations: default_hash_iterations(),
            cipher_ttl_seconds: None,
        }
    }
}

/// VK API access for the group token check
#[derive(Clone, Deserialize)]
pub struct VkConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Group token to migrate into storage (VK_GROUP_TOKEN)
    #[serde(default)]
    pub group_token: Option<String>,
}

fn default_api_base_url() -> String {
    "https://api.vk.com/method".to_string()
}

fn default_api_version() -> String {
    "5.131".to_string()
}

fn default_request_timeout() -> u64 {
    5
}

impl Default for VkConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_version: default_api_version(),
            request_timeout_seconds: default_request_timeout(),
            group_token: None,
        }
    }
}

impl std::fmt::Debug for VkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkConfig")
            .field("api_base_url", &self.api_base_url)
            .field("api_version", &self.api_version)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("group_token", &self.group_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl VaultConfig {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    /// Overlays process environment variables onto this config.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Overlays values from `lookup`; unparsable numbers are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VK_APP_SECRET") {
            self.security.app_secret = Some(v);
        }
        if let Some(v) = lookup("TOKEN_ENCRYPTION_KEY") {
            self.security.encryption_key = Some(v);
        }
        if let Some(v) = lookup("VKINDER_DB_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TOKEN_HASH_ITERATIONS") {
            if let Ok(n) = v.parse::<u32>() {
                self.tokens.hash_iterations = n;
            }
        }
        if let Some(v) = lookup("TOKEN_CIPHER_TTL_SECONDS") {
            if let Ok(n) = v.parse::<u64>() {
                self.tokens.cipher_ttl_seconds = Some(n);
            }
        }
        if let Some(v) = lookup("VK_GROUP_TOKEN") {
            self.vk.group_token = Some(v);
        }
        if let Some(v) = lookup("VK_API_BASE_URL") {
            self.vk.api_base_url = v;
        }
    }

    /// Builds the token vault: derived key, cipher TTL and hasher.
    pub fn build_vault(&self) -> Result<TokenVault, TokenError> {
        let key = DerivedKey::resolve(
            self.security.encryption_key.as_deref(),
            self.security.app_secret.as_deref(),
        );

        let mut cipher = TokenCipher::new(&key)?;
        if let Some(ttl) = self.tokens.cipher_ttl_seconds {
            let ttl = i64::try_from(ttl)
                .ok()
                .and_then(Duration::try_seconds)
                .ok_or_else(|| {
                    TokenError::Configuration(format!("cipher TTL out of range: {} seconds", ttl))
                })?;
            cipher = cipher.with_ttl(ttl);
        }

        Ok(TokenVault::from_parts(
            cipher,
            RefreshTokenHasher::new(self.tokens.hash_iterations),
        ))
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<VaultConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: VaultConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
