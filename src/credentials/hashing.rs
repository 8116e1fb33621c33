//! Salted PBKDF2 hashes for refresh tokens.
//!
//! Lets a presented refresh token be checked against storage without
//! decrypting the stored copy.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use tracing::warn;

/// Lowest accepted PBKDF2 iteration count.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Salt length in random bytes (hex-encoded to twice this)
pub const SALT_BYTES: usize = 16;

/// PBKDF2 output length in bytes
const HASH_BYTES: usize = 32;

/// Hashes and verifies refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTokenHasher {
    iterations: u32,
}

impl Default for RefreshTokenHasher {
    fn default() -> Self {
        Self {
            iterations: MIN_ITERATIONS,
        }
    }
}

impl RefreshTokenHasher {
    /// Creates a hasher. Counts below [`MIN_ITERATIONS`] are raised to it.
    pub fn new(iterations: u32) -> Self {
        if iterations < MIN_ITERATIONS {
            warn!(
                configured = iterations,
                minimum = MIN_ITERATIONS,
                "Refresh token hash iterations below minimum, using minimum"
            );
        }
        Self {
            iterations: iterations.max(MIN_ITERATIONS),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Hashes `token` under `salt`, generating a fresh salt when none (or an
    /// empty one) is given. Returns `(hash_hex, salt)`; persist both.
    pub fn hash(&self, token: &str, salt: Option<&str>) -> (String, String) {
        let salt = match salt {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => generate_salt(),
        };

        let mut out = [0u8; HASH_BYTES];
        pbkdf2_hmac::<Sha256>(token.as_bytes(), salt.as_bytes(), self.iterations, &mut out);

        (hex::encode(out), salt)
    }

    /// Checks `token` against a stored hash and salt.
    ///
    /// Never errors: a missing salt or malformed stored hash is simply a
    /// mismatch.
    pub fn verify(&self, token: &str, expected_hash_hex: &str, salt: &str) -> bool {
        if salt.is_empty() {
            return false;
        }
        let expected = match hex::decode(expected_hash_hex) {
            Ok(bytes) if bytes.len() == HASH_BYTES => bytes,
            _ => return false,
        };

        let mut computed = [0u8; HASH_BYTES];
        pbkdf2_hmac::<Sha256>(token.as_bytes(), salt.as_bytes(), self.iterations, &mut computed);

        constant_time_eq(&computed, &expected)
    }
}

/// 16 random bytes from the OS-seeded thread RNG, hex-encoded.
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
