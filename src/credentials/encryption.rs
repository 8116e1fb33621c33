//! AES-256-GCM encryption for stored tokens.
//!
//! Every encrypted token is self-describing, so nothing besides the token
//! string needs to be persisted:
//!
//! ```text
//! urlsafe_base64( version | issued_at (u64 BE) | nonce (12) | ciphertext | tag (16) )
//! ```
//!
//! The version byte and timestamp are bound as associated data, so they are
//! covered by the authentication tag.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE as BASE64_URL, Engine};
use chrono::{DateTime, Duration, Utc};

use super::key::DerivedKey;
use super::TokenError;

/// Format version marker, first byte of every token
const VERSION: u8 = 0x80;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag
const TAG_SIZE: usize = 16;

/// version + timestamp
const HEADER_SIZE: usize = 1 + 8;

/// How far in the future an embedded timestamp may be when a TTL is enforced
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Symmetric cipher for token strings.
///
/// Built once at startup from the derived key and shared by reference.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
    ttl: Option<Duration>,
}

impl TokenCipher {
    /// Creates a cipher from a derived key.
    ///
    /// # Arguments
    /// * `key` - Key produced by [`DerivedKey::resolve`] or [`DerivedKey::from_encoded`]
    ///
    /// # Returns
    /// * `Ok(TokenCipher)` - Cipher without a TTL
    /// * `Err(TokenError::Configuration)` - If the key does not decode to 32 bytes
    pub fn new(key: &DerivedKey) -> Result<Self, TokenError> {
        let bytes = key.bytes()?;
        let cipher = Aes256Gcm::new_from_slice(&bytes)
            .map_err(|e| TokenError::Configuration(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher, ttl: None })
    }

    /// Rejects tokens whose embedded timestamp is older than `ttl`.
    ///
    /// Application-level expiry (`token_expires_at`) is checked separately
    /// and does not depend on this.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Encrypts a token with a fresh random nonce.
    ///
    /// # Arguments
    /// * `plaintext` - Token to encrypt (e.g., VK access token)
    ///
    /// # Returns
    /// * `Ok(String)` - Self-describing urlsafe base64 token
    /// * `Err(TokenError::Encryption)` - If the cipher refuses the input
    ///
    /// # Security
    /// - Uses a cryptographically secure random nonce (never reuse)
    /// - Authenticated encryption (tampering detected)
    /// - The embedded timestamp is authenticated along with the ciphertext
    pub fn encrypt(&self, plaintext: &str) -> Result<String, TokenError> {
        self.encrypt_at(plaintext, Utc::now())
    }

    /// Encrypts a token, embedding `now` as its issue time.
    pub fn encrypt_at(&self, plaintext: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = VERSION;
        header[1..].copy_from_slice(&(now.timestamp().max(0) as u64).to_be_bytes());

        // Never reuse a nonce with the same key
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &header,
                },
            )
            .map_err(|e| TokenError::Encryption(e.to_string()))?;

        let mut token = Vec::with_capacity(HEADER_SIZE + NONCE_SIZE + sealed.len());
        token.extend_from_slice(&header);
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&sealed);

        Ok(BASE64_URL.encode(token))
    }

    /// Decrypts a token produced by [`TokenCipher::encrypt`].
    ///
    /// # Returns
    /// * `Ok(String)` - Decrypted plaintext
    /// * `Err(TokenError::Decryption)` - Wrong key, corrupted or tampered data,
    ///   or the cipher TTL has passed
    pub fn decrypt(&self, token: &str) -> Result<String, TokenError> {
        self.decrypt_at(token, Utc::now())
    }

    /// Decrypts a token, evaluating the cipher TTL (if any) at `now`.
    pub fn decrypt_at(&self, token: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let raw = BASE64_URL
            .decode(token)
            .map_err(|e| TokenError::Decryption(format!("invalid token encoding: {}", e)))?;

        if raw.len() < HEADER_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(TokenError::Decryption(format!(
                "token too short: {} bytes",
                raw.len()
            )));
        }

        let (header, rest) = raw.split_at(HEADER_SIZE);
        if header[0] != VERSION {
            return Err(TokenError::Decryption(format!(
                "unsupported token version 0x{:02x}",
                header[0]
            )));
        }

        let (nonce, sealed) = rest.split_at(NONCE_SIZE);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: header,
                },
            )
            .map_err(|_| {
                TokenError::Decryption("authentication failed (wrong key or corrupted data)".into())
            })?;

        if let Some(ttl) = self.ttl {
            let mut ts = [0u8; 8];
            ts.copy_from_slice(&header[1..]);
            let issued_at = i64::try_from(u64::from_be_bytes(ts)).unwrap_or(i64::MAX);
            let now_secs = now.timestamp();

            if issued_at.saturating_add(ttl.num_seconds()) < now_secs {
                return Err(TokenError::Decryption("token exceeded cipher TTL".into()));
            }
            if issued_at > now_secs.saturating_add(MAX_CLOCK_SKEW_SECS) {
                return Err(TokenError::Decryption(
                    "token timestamp is in the future".into(),
                ));
            }
        }

        String::from_utf8(plaintext)
            .map_err(|_| TokenError::Decryption("decrypted data is not valid UTF-8".into()))
    }
}
