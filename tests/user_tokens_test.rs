// Integration tests for the per-user token API over an on-disk SQLite store.

use rusqlite::{params, Connection};
use tempfile::TempDir;
use vkinder_vault::config::VaultConfig;
use vkinder_vault::credentials::{SqliteTokenStore, TokenError, TokenStatus, TokenUpdate};
use vkinder_vault::tokens::UserTokens;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn config_with_secret(secret: &str) -> VaultConfig {
    let mut config = VaultConfig::default();
    config.security.app_secret = Some(secret.to_string());
    config
}

fn open(dir: &TempDir, secret: &str) -> UserTokens<SqliteTokenStore> {
    let config = config_with_secret(secret);
    let store = SqliteTokenStore::new(dir.path().join("settings.db")).unwrap();
    UserTokens::new(config.build_vault().unwrap(), store)
}

fn raw_connection(dir: &TempDir) -> Connection {
    Connection::open(dir.path().join("settings.db")).unwrap()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn tokens_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let tokens = open(&dir, "app-secret");
        tokens.save_tokens(100, "access-1", "refresh-1", Some(3600)).unwrap();
    }

    let tokens = open(&dir, "app-secret");
    assert_eq!(tokens.access_token(100).unwrap(), "access-1");
    assert_eq!(tokens.refresh_token(100).unwrap(), "refresh-1");
    assert!(tokens.verify_refresh_token(100, "refresh-1").unwrap());
    assert_eq!(tokens.describe(100).unwrap().status, TokenStatus::Valid);
}

#[test]
fn tokens_are_not_stored_in_clear() {
    let dir = TempDir::new().unwrap();
    let tokens = open(&dir, "app-secret");
    tokens
        .save_tokens(100, "plain-access-token", "plain-refresh-token", Some(3600))
        .unwrap();

    let conn = raw_connection(&dir);
    let (access, refresh, hash): (String, String, String) = conn
        .query_row(
            "SELECT encrypted_access_token, encrypted_refresh_token, refresh_token_hash
             FROM user_settings WHERE vk_user_id = ?1",
            params![100],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();

    assert!(!access.contains("plain-access-token"));
    assert!(!refresh.contains("plain-refresh-token"));
    assert_eq!(hash.len(), 64);
}

#[test]
fn different_secret_cannot_read_tokens() {
    let dir = TempDir::new().unwrap();
    open(&dir, "secret-one")
        .save_tokens(100, "access-1", "refresh-1", Some(3600))
        .unwrap();

    let tokens = open(&dir, "secret-two");
    let err = tokens.access_token(100).unwrap_err();
    assert!(matches!(err, TokenError::Decryption(_)));
    assert!(err.requires_reauth());
}

#[test]
fn revoke_leaves_other_settings_untouched() {
    let dir = TempDir::new().unwrap();
    let tokens = open(&dir, "app-secret");
    tokens.save_tokens(100, "access-1", "refresh-1", Some(3600)).unwrap();

    raw_connection(&dir)
        .execute(
            "UPDATE user_settings SET min_age = 25, max_age = 40 WHERE vk_user_id = ?1",
            params![100],
        )
        .unwrap();

    assert!(tokens.revoke(100).unwrap());

    let conn = raw_connection(&dir);
    let (min_age, max_age, access, salt): (i64, i64, Option<String>, Option<String>) = conn
        .query_row(
            "SELECT min_age, max_age, encrypted_access_token, token_salt
             FROM user_settings WHERE vk_user_id = ?1",
            params![100],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();

    assert_eq!((min_age, max_age), (25, 40));
    assert_eq!(access, None);
    assert_eq!(salt, None);

    let info = tokens.describe(100).unwrap();
    assert!(!info.has_tokens);
    assert_eq!(info.status, TokenStatus::Missing);

    // The settings row survives, but there is nothing left to revoke
    assert!(!tokens.revoke(100).unwrap());
    let rows: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM user_settings WHERE vk_user_id = ?1",
            params![100],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn new_rows_get_default_age_range() {
    let dir = TempDir::new().unwrap();
    let tokens = open(&dir, "app-secret");
    tokens
        .update_tokens(100, &TokenUpdate::access("access-1"))
        .unwrap();

    let (min_age, max_age): (i64, i64) = raw_connection(&dir)
        .query_row(
            "SELECT min_age, max_age FROM user_settings WHERE vk_user_id = ?1",
            params![100],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!((min_age, max_age), (18, 35));
}

#[test]
fn refresh_rotation_persists_new_hash() {
    let dir = TempDir::new().unwrap();
    let tokens = open(&dir, "app-secret");
    tokens.save_tokens(100, "access-1", "refresh-1", Some(3600)).unwrap();
    let old_hash = tokens.refresh_token_hash(100).unwrap();

    tokens
        .update_tokens(
            100,
            &TokenUpdate {
                access_token: Some("access-2".into()),
                refresh_token: Some("refresh-2".into()),
                expires_in: Some(7200),
            },
        )
        .unwrap();

    assert_ne!(tokens.refresh_token_hash(100).unwrap(), old_hash);
    assert!(tokens.verify_refresh_token(100, "refresh-2").unwrap());
    assert!(!tokens.verify_refresh_token(100, "refresh-1").unwrap());
    assert_eq!(tokens.access_token(100).unwrap(), "access-2");
}

#[test]
fn key_rotation_sweep_over_sqlite() {
    let dir = TempDir::new().unwrap();
    let old = open(&dir, "old-secret");
    old.save_tokens(1, "a1", "r1", Some(3600)).unwrap();
    old.save_tokens(2, "a2", "r2", Some(3600)).unwrap();

    let tokens = open(&dir, "new-secret");
    assert_eq!(tokens.reencrypt_all(old.vault()).unwrap(), 2);
    assert_eq!(tokens.access_token(1).unwrap(), "a1");
    assert_eq!(tokens.refresh_token(2).unwrap(), "r2");
}
