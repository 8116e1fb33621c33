//! Token persistence in the `user_settings` table (SQLite).
//!
//! Token columns live next to the user's search preferences. Token writes
//! only ever touch token columns, so revoking tokens leaves the rest of the
//! settings row alone.

use super::{TokenError, TokenRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// How long a writer waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to one open transaction against the token store.
pub trait UnitOfWork {
    /// Reads the token record of one user.
    fn load(&mut self, user_id: i64) -> Result<Option<TokenRecord>>;

    /// Inserts or updates the token record of one user.
    fn save(&mut self, user_id: i64, record: &TokenRecord) -> Result<()>;

    /// Users that currently hold at least one encrypted token.
    fn user_ids(&mut self) -> Result<Vec<i64>>;
}

/// Storage collaborator for the token subsystem.
pub trait TokenStore: Send + Sync {
    /// Runs `f` inside one transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise. Failures to begin
    /// or commit are reported as [`TokenError::Unavailable`].
    fn unit_of_work<T, F>(&self, f: F) -> Result<T, TokenError>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, TokenError>;
}

/// Token storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE user_settings (
///     vk_user_id INTEGER PRIMARY KEY,
///     min_age INTEGER NOT NULL DEFAULT 18,
///     max_age INTEGER NOT NULL DEFAULT 35,
///     encrypted_access_token TEXT,   -- self-describing AES-256-GCM token
///     encrypted_refresh_token TEXT,  -- self-describing AES-256-GCM token
///     refresh_token_hash TEXT,       -- PBKDF2-SHA256 hex
///     token_salt TEXT,               -- 32 hex chars
///     token_expires_at TEXT,         -- RFC 3339
///     token_updated_at TEXT,         -- RFC 3339
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in a Mutex; units of work run one at a time
/// - Each unit is a `BEGIN IMMEDIATE` transaction, so concurrent writers from
///   other processes are serialized by SQLite (last writer wins)
pub struct SqliteTokenStore {
    conn: Mutex<Connection>,
}

impl SqliteTokenStore {
    /// Opens (or creates) the settings database.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    ///
    /// # Returns
    /// * `Ok(SqliteTokenStore)` - Store with the `user_settings` table in place
    /// * `Err` - If the database cannot be opened or the schema cannot be created
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open settings DB at {}", db_path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set busy timeout")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS user_settings (
                vk_user_id INTEGER PRIMARY KEY,
                min_age INTEGER NOT NULL DEFAULT 18,
                max_age INTEGER NOT NULL DEFAULT 35,
                encrypted_access_token TEXT,
                encrypted_refresh_token TEXT,
                refresh_token_hash TEXT,
                token_salt TEXT,
                token_expires_at TEXT,
                token_updated_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create user_settings table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl TokenStore for SqliteTokenStore {
    fn unit_of_work<T, F>(&self, f: F) -> Result<T, TokenError>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, TokenError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| TokenError::Unavailable("settings DB connection poisoned".into()))?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")
            .map_err(TokenError::unavailable)?;

        let result = {
            let mut unit = SqliteUnit { conn: &tx };
            f(&mut unit)
        };

        match result {
            Ok(value) => {
                tx.commit()
                    .context("Failed to commit transaction")
                    .map_err(TokenError::unavailable)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "Failed to roll back token transaction");
                }
                Err(err)
            }
        }
    }
}

struct SqliteUnit<'a> {
    conn: &'a Connection,
}

impl UnitOfWork for SqliteUnit<'_> {
    fn load(&mut self, user_id: i64) -> Result<Option<TokenRecord>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT encrypted_access_token, encrypted_refresh_token,
                       refresh_token_hash, token_salt,
                       token_expires_at, token_updated_at
                FROM user_settings
                WHERE vk_user_id = ?1
                "#,
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("Failed to load token record for user {}", user_id))?;

        let Some((access, refresh, hash, salt, expires_at, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(TokenRecord {
            encrypted_access_token: access,
            encrypted_refresh_token: refresh,
            refresh_token_hash: hash,
            token_salt: salt,
            token_expires_at: parse_timestamp(expires_at)
                .context("Failed to parse token_expires_at")?,
            token_updated_at: parse_timestamp(updated_at)
                .context("Failed to parse token_updated_at")?,
        }))
    }

    fn save(&mut self, user_id: i64, record: &TokenRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        self.conn
            .execute(
                r#"
                INSERT INTO user_settings (
                    vk_user_id,
                    encrypted_access_token, encrypted_refresh_token,
                    refresh_token_hash, token_salt,
                    token_expires_at, token_updated_at,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(vk_user_id) DO UPDATE SET
                    encrypted_access_token = excluded.encrypted_access_token,
                    encrypted_refresh_token = excluded.encrypted_refresh_token,
                    refresh_token_hash = excluded.refresh_token_hash,
                    token_salt = excluded.token_salt,
                    token_expires_at = excluded.token_expires_at,
                    token_updated_at = excluded.token_updated_at,
                    updated_at = excluded.updated_at
                "#,
                params![
                    user_id,
                    record.encrypted_access_token,
                    record.encrypted_refresh_token,
                    record.refresh_token_hash,
                    record.token_salt,
                    record.token_expires_at.map(|dt| dt.to_rfc3339()),
                    record.token_updated_at.map(|dt| dt.to_rfc3339()),
                    now,
                    now,
                ],
            )
            .with_context(|| format!("Failed to save token record for user {}", user_id))?;

        Ok(())
    }

    fn user_ids(&mut self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT vk_user_id FROM user_settings
                WHERE encrypted_access_token IS NOT NULL
                   OR encrypted_refresh_token IS NOT NULL
                ORDER BY vk_user_id
                "#,
            )
            .context("Failed to prepare user_ids query")?;

        let ids = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to query user ids")?
            .collect::<Result<Vec<i64>, _>>()
            .context("Failed to read user ids")?;

        Ok(ids)
    }
}

fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_store() -> SqliteTokenStore {
        SqliteTokenStore::new(":memory:").expect("Failed to create test store")
    }

    fn sample_record() -> TokenRecord {
        let now = Utc::now();
        TokenRecord {
            encrypted_access_token: Some("enc-access".to_string()),
            encrypted_refresh_token: Some("enc-refresh".to_string()),
            refresh_token_hash: Some("ab".repeat(32)),
            token_salt: Some("cd".repeat(16)),
            token_expires_at: Some(now + Duration::hours(1)),
            token_updated_at: Some(now),
        }
    }

    fn load(store: &SqliteTokenStore, user_id: i64) -> Option<TokenRecord> {
        store.unit_of_work(|uow| uow.load(user_id).map_err(TokenError::unavailable)).unwrap()
    }

    fn save(store: &SqliteTokenStore, user_id: i64, record: &TokenRecord) {
        store
            .unit_of_work(|uow| uow.save(user_id, record).map_err(TokenError::unavailable))
            .unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let store = create_test_store();
        let record = sample_record();

        save(&store, 42, &record);

        assert_eq!(load(&store, 42), Some(record));
    }

    #[test]
    fn test_load_nonexistent() {
        let store = create_test_store();
        assert_eq!(load(&store, 42), None);
    }

    #[test]
    fn test_save_overwrites() {
        let store = create_test_store();
        save(&store, 42, &sample_record());

        let updated = TokenRecord {
            encrypted_access_token: Some("enc-access-2".to_string()),
            ..sample_record()
        };
        save(&store, 42, &updated);

        assert_eq!(
            load(&store, 42).unwrap().encrypted_access_token.as_deref(),
            Some("enc-access-2")
        );
    }

    #[test]
    fn test_saving_empty_record_clears_tokens() {
        let store = create_test_store();
        save(&store, 42, &sample_record());
        save(&store, 42, &TokenRecord::default());

        assert_eq!(load(&store, 42), Some(TokenRecord::default()));
    }

    #[test]
    fn test_failed_unit_rolls_back() {
        let store = create_test_store();

        let result: Result<(), TokenError> = store.unit_of_work(|uow| {
            uow.save(42, &sample_record()).map_err(TokenError::unavailable)?;
            Err(TokenError::Encryption("boom".into()))
        });

        assert_eq!(result, Err(TokenError::Encryption("boom".into())));
        assert_eq!(load(&store, 42), None);
    }

    #[test]
    fn test_user_ids_skips_cleared_rows() {
        let store = create_test_store();
        save(&store, 3, &sample_record());
        save(&store, 1, &sample_record());
        save(&store, 2, &TokenRecord::default());

        let ids = store
            .unit_of_work(|uow| uow.user_ids().map_err(TokenError::unavailable))
            .unwrap();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_corrupt_timestamp_is_an_error() {
        let store = create_test_store();
        save(&store, 42, &sample_record());

        store
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE user_settings SET token_expires_at = 'yesterday' WHERE vk_user_id = 42",
                [],
            )
            .unwrap();

        let result = store.unit_of_work(|uow| uow.load(42).map_err(TokenError::unavailable));
        assert!(matches!(result, Err(TokenError::Unavailable(_))));
    }
}
