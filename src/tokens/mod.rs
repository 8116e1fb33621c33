//! Per-user token API for bot integration code.
//!
//! Wraps a [`TokenVault`] and a [`TokenStore`]: every call is one unit of
//! work against the store, keyed by VK user id.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::credentials::{
    is_expired, TokenError, TokenInfo, TokenRecord, TokenStore, TokenUpdate, TokenVault,
    DEFAULT_EXPIRES_IN_SECS,
};

mod group;

pub use group::{
    GroupTokenChecker, MigrationOutcome, GROUP_ADMIN_USER_ID, GROUP_TOKEN_PLACEHOLDER,
};


/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Token operations scoped to one user id.
pub struct UserTokens<S: TokenStore> {
    vault: TokenVault,
    store: S,
    clock: Arc<dyn Clock>,
    default_expires_in: i64,
}

impl<S: TokenStore> UserTokens<S> {
    pub fn new(vault: TokenVault, store: S) -> Self {
        Self::with_clock(vault, store, Arc::new(SystemClock))
    }

    pub fn with_clock(vault: TokenVault, store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            vault,
            store,
            clock,
            default_expires_in: DEFAULT_EXPIRES_IN_SECS,
        }
    }

    /// Lifetime used by [`UserTokens::save_tokens`] when the provider
    /// reports none.
    pub fn with_default_expires_in(mut self, seconds: i64) -> Self {
        self.default_expires_in = seconds;
        self
    }

    pub fn vault(&self) -> &TokenVault {
        &self.vault
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stores freshly issued tokens, replacing whatever the user had.
    pub fn save_tokens(
        &self,
        user_id: i64,
        access_token: &str,
        refresh_token: &str,
        expires_in: Option<i64>,
    ) -> Result<(), TokenError> {
        let now = self.clock.now();
        let expires_in = expires_in.unwrap_or(self.default_expires_in);
        let record = self
            .vault
            .issue_at(access_token, refresh_token, expires_in, now)?;

        self.store.unit_of_work(|uow| {
            uow.save(user_id, &record).map_err(TokenError::unavailable)
        })?;

        info!(user_id, "Saved encrypted tokens");
        Ok(())
    }

    /// Replaces the provided tokens. Creates the record when the user has
    /// none yet.
    pub fn update_tokens(&self, user_id: i64, update: &TokenUpdate) -> Result<(), TokenError> {
        let now = self.clock.now();

        self.store.unit_of_work(|uow| {
            let current = uow
                .load(user_id)
                .map_err(TokenError::unavailable)?
                .unwrap_or_default();
            let next = self.vault.rotate_at(&current, update, now)?;
            uow.save(user_id, &next).map_err(TokenError::unavailable)
        })?;

        info!(
            user_id,
            access = update.access_token.is_some(),
            refresh = update.refresh_token.is_some(),
            "Updated tokens"
        );
        Ok(())
    }

    /// Decrypted access token.
    ///
    /// `NotFound` when the user has none, `Expired` when a stored expiry has
    /// passed. Records without an expiry (the group token) never expire here.
    pub fn access_token(&self, user_id: i64) -> Result<String, TokenError> {
        let record = self.load(user_id)?;
        let encrypted = record
            .encrypted_access_token
            .as_deref()
            .ok_or(TokenError::NotFound)?;

        let now = self.clock.now();
        if let Some(expires_at) = record.token_expires_at {
            if now >= expires_at {
                info!(user_id, %expires_at, "Access token expired");
                return Err(TokenError::Expired);
            }
        }

        self.vault.cipher().decrypt_at(encrypted, now).map_err(|e| {
            warn!(user_id, error = %e, "Failed to decrypt access token");
            e
        })
    }

    /// Decrypted refresh token.
    pub fn refresh_token(&self, user_id: i64) -> Result<String, TokenError> {
        let record = self.load(user_id)?;
        let encrypted = record
            .encrypted_refresh_token
            .as_deref()
            .ok_or(TokenError::NotFound)?;

        self.vault
            .cipher()
            .decrypt_at(encrypted, self.clock.now())
            .map_err(|e| {
                warn!(user_id, error = %e, "Failed to decrypt refresh token");
                e
            })
    }

    /// Stored refresh token hash, if any.
    pub fn refresh_token_hash(&self, user_id: i64) -> Result<Option<String>, TokenError> {
        Ok(self.load_optional(user_id)?.and_then(|r| r.refresh_token_hash))
    }

    /// Checks a presented refresh token against the stored hash.
    pub fn verify_refresh_token(&self, user_id: i64, candidate: &str) -> Result<bool, TokenError> {
        let valid = self
            .load_optional(user_id)?
            .map(|record| self.vault.verify_refresh(&record, candidate))
            .unwrap_or(false);

        debug!(user_id, valid, "Verified refresh token");
        Ok(valid)
    }

    /// True when the user has no record or its expiry has passed.
    pub fn is_expired(&self, user_id: i64) -> Result<bool, TokenError> {
        let now = self.clock.now();
        Ok(self
            .load_optional(user_id)?
            .map(|record| is_expired(&record, now))
            .unwrap_or(true))
    }

    /// Clears all token fields. Returns whether the user had any.
    pub fn revoke(&self, user_id: i64) -> Result<bool, TokenError> {
        let had_tokens = self.store.unit_of_work(|uow| {
            let Some(current) = uow.load(user_id).map_err(TokenError::unavailable)? else {
                return Ok(false);
            };
            if current.is_empty() {
                return Ok(false);
            }
            let cleared = self.vault.revoke(&current);
            uow.save(user_id, &cleared).map_err(TokenError::unavailable)?;
            Ok(true)
        })?;

        if had_tokens {
            info!(user_id, "Revoked tokens");
        }
        Ok(had_tokens)
    }

    /// Read-only summary of the user's tokens.
    pub fn describe(&self, user_id: i64) -> Result<TokenInfo, TokenError> {
        let record = self.load_optional(user_id)?.unwrap_or_default();
        Ok(self.vault.describe(&record, self.clock.now()))
    }

    /// Re-encrypts every stored token from `previous`'s key to this vault's.
    ///
    /// Runs as a single unit of work: one undecryptable record aborts the
    /// whole sweep. Returns the number of records rewritten.
    pub fn reencrypt_all(&self, previous: &TokenVault) -> Result<usize, TokenError> {
        let now = self.clock.now();
        let count = self.store.unit_of_work(|uow| {
            let ids = uow.user_ids().map_err(TokenError::unavailable)?;
            for &user_id in &ids {
                let Some(record) = uow.load(user_id).map_err(TokenError::unavailable)? else {
                    continue;
                };
                let moved = self.vault.reencrypt_at(&record, previous, now).map_err(|e| {
                    warn!(user_id, error = %e, "Key rotation aborted");
                    e
                })?;
                uow.save(user_id, &moved).map_err(TokenError::unavailable)?;
            }
            Ok(ids.len())
        })?;

        info!(count, "Re-encrypted stored tokens under new key");
        Ok(count)
    }

    fn load_optional(&self, user_id: i64) -> Result<Option<TokenRecord>, TokenError> {
        self.store
            .unit_of_work(|uow| uow.load(user_id).map_err(TokenError::unavailable))
    }

    fn load(&self, user_id: i64) -> Result<TokenRecord, TokenError> {
        self.load_optional(user_id)?.ok_or_else(|| {
            debug!(user_id, "No token record");
            TokenError::NotFound
        })
    }
}
