//! Token record lifecycle: issue, rotate, revoke, describe.
//!
//! All operations are pure over [`TokenRecord`] values; callers persist the
//! result.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::encryption::TokenCipher;
use super::hashing::RefreshTokenHasher;
use super::key::DerivedKey;
use super::mask::mask_token;
use super::{TokenError, TokenInfo, TokenRecord, TokenStatus};

/// Access token lifetime used when the provider does not report one
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Fields to replace on rotation. `None` leaves the stored value untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

impl TokenUpdate {
    pub fn access(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn refresh(token: impl Into<String>) -> Self {
        Self {
            refresh_token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.expires_in = Some(seconds);
        self
    }
}

/// Encrypts, hashes and expires token records.
///
/// Construct once at startup and share by reference; tests can build one per
/// key.
#[derive(Clone)]
pub struct TokenVault {
    cipher: TokenCipher,
    hasher: RefreshTokenHasher,
}

impl TokenVault {
    /// Vault with the default hasher and no cipher TTL.
    pub fn new(key: &DerivedKey) -> Result<Self, TokenError> {
        Ok(Self::from_parts(TokenCipher::new(key)?, RefreshTokenHasher::default()))
    }

    pub fn from_parts(cipher: TokenCipher, hasher: RefreshTokenHasher) -> Self {
        Self { cipher, hasher }
    }

    pub fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }

    pub fn hasher(&self) -> &RefreshTokenHasher {
        &self.hasher
    }

    /// Builds a complete record for freshly obtained tokens.
    pub fn issue(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in: i64,
    ) -> Result<TokenRecord, TokenError> {
        self.issue_at(access_token, refresh_token, expires_in, Utc::now())
    }

    /// Like [`TokenVault::issue`] with an explicit clock reading.
    ///
    /// Either both tokens are encrypted or an error is returned; no partial
    /// record escapes.
    pub fn issue_at(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in: i64,
        now: DateTime<Utc>,
    ) -> Result<TokenRecord, TokenError> {
        debug!(
            access_token = %mask_token(access_token),
            refresh_token = %mask_token(refresh_token),
            expires_in,
            "Issuing token record"
        );

        let expires_at = expiry_after(now, expires_in)?;
        let encrypted_access = self.cipher.encrypt_at(access_token, now)?;
        let encrypted_refresh = self.cipher.encrypt_at(refresh_token, now)?;
        let (hash, salt) = self.hasher.hash(refresh_token, None);

        Ok(TokenRecord {
            encrypted_access_token: Some(encrypted_access),
            encrypted_refresh_token: Some(encrypted_refresh),
            refresh_token_hash: Some(hash),
            token_salt: Some(salt),
            token_expires_at: Some(expires_at),
            token_updated_at: Some(now),
        })
    }

    /// Replaces the provided fields of `record`.
    pub fn rotate(&self, record: &TokenRecord, update: &TokenUpdate) -> Result<TokenRecord, TokenError> {
        self.rotate_at(record, update, Utc::now())
    }

    /// Like [`TokenVault::rotate`] with an explicit clock reading.
    ///
    /// A new refresh token gets a new hash and salt; without one the stored
    /// hash and salt are carried over unchanged. `token_updated_at` is always
    /// bumped, `token_expires_at` only when `update.expires_in` is set.
    pub fn rotate_at(
        &self,
        record: &TokenRecord,
        update: &TokenUpdate,
        now: DateTime<Utc>,
    ) -> Result<TokenRecord, TokenError> {
        let mut next = record.clone();

        if let Some(expires_in) = update.expires_in {
            next.token_expires_at = Some(expiry_after(now, expires_in)?);
        }

        if let Some(access) = &update.access_token {
            debug!(access_token = %mask_token(access), "Rotating access token");
            next.encrypted_access_token = Some(self.cipher.encrypt_at(access, now)?);
        }

        if let Some(refresh) = &update.refresh_token {
            debug!(refresh_token = %mask_token(refresh), "Rotating refresh token");
            let encrypted = self.cipher.encrypt_at(refresh, now)?;
            let (hash, salt) = self.hasher.hash(refresh, None);
            next.encrypted_refresh_token = Some(encrypted);
            next.refresh_token_hash = Some(hash);
            next.token_salt = Some(salt);
        }

        next.token_updated_at = Some(now);
        Ok(next)
    }

    /// Clears every token field.
    pub fn revoke(&self, _record: &TokenRecord) -> TokenRecord {
        TokenRecord::default()
    }

    /// Derived read-only view of `record` at `now`.
    pub fn describe(&self, record: &TokenRecord, now: DateTime<Utc>) -> TokenInfo {
        let has_access_token = record.encrypted_access_token.is_some();
        let expired = is_expired(record, now);

        let status = if !has_access_token {
            TokenStatus::Missing
        } else if expired {
            TokenStatus::Expired
        } else {
            TokenStatus::Valid
        };

        TokenInfo {
            has_tokens: has_access_token && record.refresh_token_hash.is_some(),
            is_expired: expired,
            expires_at: record.token_expires_at,
            updated_at: record.token_updated_at,
            has_access_token,
            has_refresh_token: record.encrypted_refresh_token.is_some(),
            status,
        }
    }

    /// Decrypts the stored access token, if any.
    pub fn decrypt_access(&self, record: &TokenRecord) -> Result<Option<String>, TokenError> {
        self.decrypt_access_at(record, Utc::now())
    }

    /// Like [`TokenVault::decrypt_access`], checking the cipher TTL at `now`.
    pub fn decrypt_access_at(
        &self,
        record: &TokenRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, TokenError> {
        record
            .encrypted_access_token
            .as_deref()
            .map(|token| self.cipher.decrypt_at(token, now))
            .transpose()
    }

    /// Decrypts the stored refresh token, if any.
    pub fn decrypt_refresh(&self, record: &TokenRecord) -> Result<Option<String>, TokenError> {
        self.decrypt_refresh_at(record, Utc::now())
    }

    pub fn decrypt_refresh_at(
        &self,
        record: &TokenRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, TokenError> {
        record
            .encrypted_refresh_token
            .as_deref()
            .map(|token| self.cipher.decrypt_at(token, now))
            .transpose()
    }

    /// Checks a presented refresh token against the stored hash.
    ///
    /// `false` when the record has no hash or salt.
    pub fn verify_refresh(&self, record: &TokenRecord, candidate: &str) -> bool {
        match (&record.refresh_token_hash, &record.token_salt) {
            (Some(hash), Some(salt)) => self.hasher.verify(candidate, hash, salt),
            _ => false,
        }
    }

    /// Re-encrypts a record written under `previous` with this vault's key.
    ///
    /// Hash, salt and timestamps are left as they are.
    pub fn reencrypt(&self, record: &TokenRecord, previous: &TokenVault) -> Result<TokenRecord, TokenError> {
        self.reencrypt_at(record, previous, Utc::now())
    }

    /// Like [`TokenVault::reencrypt`] with an explicit clock reading.
    pub fn reencrypt_at(
        &self,
        record: &TokenRecord,
        previous: &TokenVault,
        now: DateTime<Utc>,
    ) -> Result<TokenRecord, TokenError> {
        let mut next = record.clone();
        if let Some(access) = previous.decrypt_access_at(record, now)? {
            next.encrypted_access_token = Some(self.cipher.encrypt_at(&access, now)?);
        }
        if let Some(refresh) = previous.decrypt_refresh_at(record, now)? {
            next.encrypted_refresh_token = Some(self.cipher.encrypt_at(&refresh, now)?);
        }
        Ok(next)
    }
}

/// `now + expires_in`, or [`TokenError::InvalidLifetime`] when that does not
/// fit a timestamp.
fn expiry_after(now: DateTime<Utc>, expires_in: i64) -> Result<DateTime<Utc>, TokenError> {
    Duration::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or(TokenError::InvalidLifetime(expires_in))
}

/// `now >= token_expires_at`; a record without an expiry counts as expired.
pub fn is_expired(record: &TokenRecord, now: DateTime<Utc>) -> bool {
    match record.token_expires_at {
        Some(expires_at) => now >= expires_at,
        None => true,
    }
}
