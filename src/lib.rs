// Configuration (TOML + environment)
pub mod config;

// Key derivation, token encryption, refresh-token hashing, storage
pub mod credentials;

// Per-user token API and group token management
pub mod tokens;
