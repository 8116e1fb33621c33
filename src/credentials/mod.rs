//! Token security for stored OAuth credentials.
//!
//! Access and refresh tokens live encrypted in each user's settings row. The
//! refresh token is additionally stored as a salted PBKDF2 hash so a
//! presented refresh token can be checked without decrypting anything.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenVault                         │
//! │  - issue / rotate / revoke / describe    │
//! │  - pure functions over TokenRecord       │
//! └─────────────────────────────────────────┘
//!          ↓                    ↓
//! ┌────────────────────┐ ┌──────────────────┐
//! │  TokenCipher       │ │ RefreshTokenHasher│
//! │  - AES-256-GCM     │ │ - PBKDF2-SHA256   │
//! │  - self-describing │ │ - random salt     │
//! └────────────────────┘ └──────────────────┘
//!          ↑
//! ┌─────────────────────────────────────────┐
//! │       DerivedKey                         │
//! │  - SHA-256 of configured secret          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Persistence is a separate concern: see [`TokenStore`] and the per-user
//! service in [`crate::tokens`].
//!
//! # Usage
//!
//! ```
//! use vkinder_vault::credentials::{DerivedKey, TokenStatus, TokenVault};
//! use chrono::{Duration, Utc};
//!
//! # fn main() -> Result<(), vkinder_vault::credentials::TokenError> {
//! let vault = TokenVault::new(&DerivedKey::resolve(None, Some("app-secret")))?;
//!
//! let t0 = Utc::now();
//! let record = vault.issue_at("access", "refresh", 3600, t0)?;
//! assert_eq!(vault.describe(&record, t0).status, TokenStatus::Valid);
//! assert!(vault.verify_refresh(&record, "refresh"));
//!
//! let later = t0 + Duration::seconds(3601);
//! assert_eq!(vault.describe(&record, later).status, TokenStatus::Expired);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod error;
mod hashing;
mod key;
mod lifecycle;
mod mask;
mod memory;
mod storage;

pub use encryption::TokenCipher;
pub use error::TokenError;
pub use hashing::{generate_salt, RefreshTokenHasher, MIN_ITERATIONS};
pub use key::{derive_key, DerivedKey, KeySource};
pub use lifecycle::{is_expired, TokenUpdate, TokenVault, DEFAULT_EXPIRES_IN_SECS};
pub use mask::mask_token;
pub use memory::MemoryTokenStore;
pub use storage::{SqliteTokenStore, TokenStore, UnitOfWork};

/// Token fields embedded in a user's settings row.
///
/// Every field is nullable: a revoked or never-authenticated user has an
/// all-`None` record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Encrypted access token
    pub encrypted_access_token: Option<String>,

    /// Encrypted refresh token
    pub encrypted_refresh_token: Option<String>,

    /// PBKDF2 hash of the refresh token (hex), computed under `token_salt`
    pub refresh_token_hash: Option<String>,

    /// Salt for `refresh_token_hash` (32 hex chars)
    pub token_salt: Option<String>,

    /// When the access token expires (UTC)
    pub token_expires_at: Option<DateTime<Utc>>,

    /// Last time any token field was written (UTC)
    pub token_updated_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// True when no token field is set.
    pub fn is_empty(&self) -> bool {
        *self == TokenRecord::default()
    }
}

/// Derived status of a stored token record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Valid,
    Expired,
    Missing,
}

/// Read-only view of a token record, safe to expose to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub has_tokens: bool,
    pub is_expired: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub status: TokenStatus,
}
