//! Cipher key derivation from the application secret.
//!
//! Key material is resolved from configuration (explicit key, then app
//! secret, then a hard-coded fallback) and hashed with SHA-256 into a
//! 32-byte key, carried around urlsafe-base64 encoded.

use base64::{engine::general_purpose::URL_SAFE as BASE64_URL, Engine};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::TokenError;

/// Size of the derived key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Used only when neither an encryption key nor an app secret is configured.
const FALLBACK_SECRET: &str = "default_secret";

/// Where the key material came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    EncryptionKey,
    AppSecret,
    Fallback,
}

/// A derived cipher key, urlsafe-base64 encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKey {
    encoded: String,
    source: KeySource,
}

impl DerivedKey {
    /// Resolves key material and derives the cipher key.
    ///
    /// An explicit encryption key wins over the app secret. With neither set
    /// the key comes from a fallback string: tokens stay encrypted but anyone
    /// who has read this source can decrypt them.
    ///
    /// # Arguments
    /// * `encryption_key` - Explicit key material (TOKEN_ENCRYPTION_KEY)
    /// * `app_secret` - Application secret (VK_APP_SECRET)
    ///
    /// # Security
    /// - The fallback is logged as a warning and must not be used in production
    /// - Neither the material nor the derived key is ever logged
    pub fn resolve(encryption_key: Option<&str>, app_secret: Option<&str>) -> Self {
        let non_empty = |s: &&str| !s.is_empty();

        let (material, source) = match (
            encryption_key.filter(non_empty),
            app_secret.filter(non_empty),
        ) {
            (Some(key), _) => (key.to_string(), KeySource::EncryptionKey),
            (None, Some(secret)) => (sha256_hex(secret), KeySource::AppSecret),
            (None, None) => {
                warn!(
                    "No TOKEN_ENCRYPTION_KEY or VK_APP_SECRET configured; \
                     deriving token key from built-in fallback secret"
                );
                (sha256_hex(FALLBACK_SECRET), KeySource::Fallback)
            }
        };

        Self {
            encoded: derive_key(&material),
            source,
        }
    }

    /// Wraps an already-encoded key, validating its length.
    pub fn from_encoded(encoded: &str) -> Result<Self, TokenError> {
        decode_key(encoded)?;
        Ok(Self {
            encoded: encoded.to_string(),
            source: KeySource::EncryptionKey,
        })
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn source(&self) -> KeySource {
        self.source
    }

    /// Raw key bytes for the cipher.
    pub fn bytes(&self) -> Result<[u8; KEY_SIZE], TokenError> {
        decode_key(&self.encoded)
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("encoded", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// SHA-256 of the key material, urlsafe-base64 encoded. Deterministic.
pub fn derive_key(material: &str) -> String {
    let digest = Sha256::digest(material.as_bytes());
    BASE64_URL.encode(digest)
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn decode_key(encoded: &str) -> Result<[u8; KEY_SIZE], TokenError> {
    let bytes = BASE64_URL
        .decode(encoded)
        .map_err(|e| TokenError::Configuration(format!("key is not urlsafe base64: {}", e)))?;

    bytes.as_slice().try_into().map_err(|_| {
        TokenError::Configuration(format!(
            "key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            bytes.len()
        ))
    })
}
