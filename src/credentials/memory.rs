//! In-memory token store.
//!
//! Writes are staged per unit of work and applied only on success, matching
//! the SQLite store's transactional behaviour.

use super::storage::{TokenStore, UnitOfWork};
use super::{TokenError, TokenRecord};
use anyhow::{bail, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// DashMap-backed [`TokenStore`].
#[derive(Default)]
pub struct MemoryTokenStore {
    records: DashMap<i64, TokenRecord>,
    /// Serializes units of work
    write_lock: Mutex<()>,
    /// Simulated outage: every unit of work fails while set
    unavailable: AtomicBool,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent unit of work fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current record of a user, outside any unit of work.
    pub fn get(&self, user_id: i64) -> Option<TokenRecord> {
        self.records.get(&user_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl TokenStore for MemoryTokenStore {
    fn unit_of_work<T, F>(&self, f: F) -> Result<T, TokenError>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, TokenError>,
    {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TokenError::Unavailable("in-memory store marked unavailable".into()));
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| TokenError::Unavailable("in-memory store lock poisoned".into()))?;

        let mut unit = MemoryUnit {
            store: self,
            staged: HashMap::new(),
        };
        let value = f(&mut unit)?;

        for (user_id, record) in unit.staged {
            self.records.insert(user_id, record);
        }
        Ok(value)
    }
}

struct MemoryUnit<'a> {
    store: &'a MemoryTokenStore,
    staged: HashMap<i64, TokenRecord>,
}

impl UnitOfWork for MemoryUnit<'_> {
    fn load(&mut self, user_id: i64) -> Result<Option<TokenRecord>> {
        if self.store.unavailable.load(Ordering::SeqCst) {
            bail!("in-memory store marked unavailable");
        }
        if let Some(record) = self.staged.get(&user_id) {
            return Ok(Some(record.clone()));
        }
        Ok(self.store.get(user_id))
    }

    fn save(&mut self, user_id: i64, record: &TokenRecord) -> Result<()> {
        if self.store.unavailable.load(Ordering::SeqCst) {
            bail!("in-memory store marked unavailable");
        }
        self.staged.insert(user_id, record.clone());
        Ok(())
    }

    fn user_ids(&mut self) -> Result<Vec<i64>> {
        let mut merged: HashMap<i64, bool> = self
            .store
            .records
            .iter()
            .map(|entry| (*entry.key(), holds_tokens(entry.value())))
            .collect();
        for (user_id, record) in &self.staged {
            merged.insert(*user_id, holds_tokens(record));
        }

        let mut ids: Vec<i64> = merged
            .into_iter()
            .filter_map(|(id, has)| has.then_some(id))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

fn holds_tokens(record: &TokenRecord) -> bool {
    record.encrypted_access_token.is_some() || record.encrypted_refresh_token.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(access: &str) -> TokenRecord {
        TokenRecord {
            encrypted_access_token: Some(access.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_commit_applies_staged_writes() {
        let store = MemoryTokenStore::new();
        store
            .unit_of_work(|uow| {
                uow.save(1, &record("a")).map_err(TokenError::unavailable)?;
                // Reads see the unit's own writes
                let seen = uow.load(1).map_err(TokenError::unavailable)?;
                assert_eq!(seen, Some(record("a")));
                Ok(())
            })
            .unwrap();

        assert_eq!(store.get(1), Some(record("a")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_error_discards_staged_writes() {
        let store = MemoryTokenStore::new();
        let result: Result<(), TokenError> = store.unit_of_work(|uow| {
            uow.save(1, &record("a")).map_err(TokenError::unavailable)?;
            Err(TokenError::NotFound)
        });

        assert_eq!(result, Err(TokenError::NotFound));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unavailable_store() {
        let store = MemoryTokenStore::new();
        store.set_unavailable(true);

        let result = store.unit_of_work(|uow| uow.load(1).map_err(TokenError::unavailable));
        assert!(matches!(result, Err(TokenError::Unavailable(_))));

        store.set_unavailable(false);
        let result = store.unit_of_work(|uow| uow.load(1).map_err(TokenError::unavailable));
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn test_user_ids_reflects_staged_changes() {
        let store = MemoryTokenStore::new();
        store
            .unit_of_work(|uow| {
                uow.save(5, &record("a")).map_err(TokenError::unavailable)?;
                uow.save(2, &record("b")).map_err(TokenError::unavailable)
            })
            .unwrap();

        let ids = store
            .unit_of_work(|uow| {
                uow.save(5, &TokenRecord::default()).map_err(TokenError::unavailable)?;
                uow.save(9, &record("c")).map_err(TokenError::unavailable)?;
                uow.user_ids().map_err(TokenError::unavailable)
            })
            .unwrap();

        assert_eq!(ids, vec![2, 9]);
    }
}
