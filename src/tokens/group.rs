//! Community (group) token management.
//!
//! The bot's group token is stored like any user token, under a reserved
//! user id, with no refresh token and no expiry.

use anyhow::{Context, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info, warn};

use super::UserTokens;
use crate::config::VkConfig;
use crate::credentials::{mask_token, TokenError, TokenStore, TokenUpdate};

/// Reserved user id holding the group token
pub const GROUP_ADMIN_USER_ID: i64 = 900_000_009;

/// Value shipped in the sample `.env`; never a real token
pub const GROUP_TOKEN_PLACEHOLDER: &str = "your_group_token_here";

/// Result of moving the group token from the environment into storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No usable token in the environment
    Skipped,
    /// A readable group token was already stored; left untouched
    AlreadyPresent,
    /// The environment token was encrypted and stored
    Migrated,
}

impl<S: TokenStore> UserTokens<S> {
    /// Decrypted group token.
    pub fn group_token(&self) -> Result<String, TokenError> {
        self.access_token(GROUP_ADMIN_USER_ID)
    }

    /// Replaces the stored group token.
    pub fn update_group_token(&self, token: &str) -> Result<(), TokenError> {
        self.update_tokens(GROUP_ADMIN_USER_ID, &TokenUpdate::access(token))
    }

    /// Stores the group token from the environment unless one is already
    /// stored and readable.
    pub fn migrate_group_token(&self, env_token: Option<&str>) -> Result<MigrationOutcome, TokenError> {
        let token = match env_token.map(str::trim) {
            Some(t) if !t.is_empty() && t != GROUP_TOKEN_PLACEHOLDER => t,
            _ => {
                warn!("VK_GROUP_TOKEN not set or still the placeholder; skipping migration");
                return Ok(MigrationOutcome::Skipped);
            }
        };

        match self.group_token() {
            Ok(_) => {
                info!("Group token already stored; skipping migration");
                return Ok(MigrationOutcome::AlreadyPresent);
            }
            Err(TokenError::NotFound) | Err(TokenError::Expired) => {}
            Err(TokenError::Decryption(e)) => {
                warn!(error = %e, "Stored group token unreadable; replacing it");
            }
            Err(e) => return Err(e),
        }

        self.update_group_token(token)?;
        info!(group_token = %mask_token(token), "Migrated group token into storage");
        Ok(MigrationOutcome::Migrated)
    }
}

/// Checks a group token against the VK API.
pub struct GroupTokenChecker {
    client: reqwest::Client,
    api_base_url: String,
    api_version: String,
}

impl GroupTokenChecker {
    pub fn new(config: &VkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
        })
    }

    /// `true` only when `groups.getById` answers with a `response` body.
    ///
    /// API errors and transport failures are logged and reported as `false`.
    pub async fn check(&self, token: &str) -> bool {
        match self.call_groups_get_by_id(token).await {
            Ok(body) => {
                if let Some(err) = body.get("error") {
                    let code = err.get("error_code").and_then(Value::as_i64).unwrap_or(0);
                    let msg = err
                        .get("error_msg")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown error");
                    error!(code, msg, "Group token rejected by VK API");
                    return false;
                }
                let valid = body.get("response").is_some();
                if valid {
                    info!("Group token is valid");
                }
                valid
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "Group token check failed");
                false
            }
        }
    }

    async fn call_groups_get_by_id(&self, token: &str) -> Result<Value> {
        let url = format!("{}/groups.getById", self.api_base_url);
        let body = self
            .client
            .get(&url)
            .query(&[("access_token", token), ("v", self.api_version.as_str())])
            .send()
            .await
            .context("groups.getById request failed")?
            .json::<Value>()
            .await
            .context("groups.getById returned invalid JSON")?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{DerivedKey, MemoryTokenStore, TokenVault};

    fn service() -> UserTokens<MemoryTokenStore> {
        let vault = TokenVault::new(&DerivedKey::resolve(None, Some("app-secret"))).unwrap();
        UserTokens::new(vault, MemoryTokenStore::new())
    }

    #[test]
    fn test_group_token_roundtrip_without_expiry() {
        let tokens = service();
        tokens.update_group_token("vk1.a.group-token").unwrap();

        assert_eq!(tokens.group_token().unwrap(), "vk1.a.group-token");
        let record = tokens.store().get(GROUP_ADMIN_USER_ID).unwrap();
        assert_eq!(record.token_expires_at, None);
        assert_eq!(record.encrypted_refresh_token, None);
    }

    #[test]
    fn test_migration_skips_missing_or_placeholder() {
        let tokens = service();
        assert_eq!(tokens.migrate_group_token(None).unwrap(), MigrationOutcome::Skipped);
        assert_eq!(tokens.migrate_group_token(Some("  ")).unwrap(), MigrationOutcome::Skipped);
        assert_eq!(
            tokens.migrate_group_token(Some(GROUP_TOKEN_PLACEHOLDER)).unwrap(),
            MigrationOutcome::Skipped
        );
        assert_eq!(tokens.group_token(), Err(TokenError::NotFound));
    }

    #[test]
    fn test_migration_stores_token_once() {
        let tokens = service();
        assert_eq!(
            tokens.migrate_group_token(Some("env-token")).unwrap(),
            MigrationOutcome::Migrated
        );
        assert_eq!(
            tokens.migrate_group_token(Some("other-token")).unwrap(),
            MigrationOutcome::AlreadyPresent
        );
        assert_eq!(tokens.group_token().unwrap(), "env-token");
    }

    #[test]
    fn test_migration_replaces_token_under_old_key() {
        let store = MemoryTokenStore::new();
        let old_vault = TokenVault::new(&DerivedKey::resolve(None, Some("old"))).unwrap();
        let old = UserTokens::new(old_vault, store);
        old.update_group_token("stale-token").unwrap();

        let new_vault = TokenVault::new(&DerivedKey::resolve(None, Some("new"))).unwrap();
        let record = old.store().get(GROUP_ADMIN_USER_ID);
        let store = MemoryTokenStore::new();
        store
            .unit_of_work(|uow| {
                uow.save(GROUP_ADMIN_USER_ID, record.as_ref().unwrap())
                    .map_err(TokenError::unavailable)
            })
            .unwrap();
        let tokens = UserTokens::new(new_vault, store);

        assert_eq!(
            tokens.migrate_group_token(Some("env-token")).unwrap(),
            MigrationOutcome::Migrated
        );
        assert_eq!(tokens.group_token().unwrap(), "env-token");
    }

    #[test]
    fn test_migration_propagates_storage_outage() {
        let tokens = service();
        tokens.store().set_unavailable(true);
        assert!(matches!(
            tokens.migrate_group_token(Some("env-token")),
            Err(TokenError::Unavailable(_))
        ));
    }
}
