/// Token subsystem errors.
///
/// Cryptographic failures and storage failures are kept apart so callers can
/// tell "re-authenticate the user" from "the database is down".
#[derive(Debug, Clone, PartialEq)]
pub enum TokenError {
    /// Explicitly supplied key material is unusable
    Configuration(String),
    /// The cipher refused to encrypt
    Encryption(String),
    /// Ciphertext failed decoding, authentication or the cipher TTL
    Decryption(String),
    /// No record (or no token of the requested kind) for the user
    NotFound,
    /// The stored expiry of the access token has passed
    Expired,
    /// `expires_in` does not fit a timestamp
    InvalidLifetime(i64),
    /// The storage collaborator failed
    Unavailable(String),
}

impl TokenError {
    /// Wraps a storage-layer failure, keeping the full context chain.
    pub fn unavailable(err: anyhow::Error) -> Self {
        TokenError::Unavailable(format!("{:#}", err))
    }

    /// True for errors that mean the stored token is unusable and the user
    /// must authenticate again.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            TokenError::Decryption(_) | TokenError::NotFound | TokenError::Expired
        )
    }
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Configuration(msg) => write!(f, "Invalid key configuration: {}", msg),
            TokenError::Encryption(msg) => write!(f, "Token encryption failed: {}", msg),
            TokenError::Decryption(msg) => write!(f, "Token decryption failed: {}", msg),
            TokenError::NotFound => write!(f, "No stored tokens for user"),
            TokenError::Expired => write!(f, "Stored access token has expired"),
            TokenError::InvalidLifetime(secs) => {
                write!(f, "Token lifetime out of range: {} seconds", secs)
            }
            TokenError::Unavailable(msg) => write!(f, "Token storage unavailable: {}", msg),
        }
    }
}

impl std::error::Error for TokenError {}
