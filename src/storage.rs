use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{AppError, Result};
use crate::types::{CompletionMap, Id};

pub const TOKEN_KEY: &str = "ironlog_token";
pub const API_BASE_KEY: &str = "ironlog_api_base";
pub const ACTIVE_SESSION_KEY: &str = "ironlog_active_session";
const COMPLETION_KEY_PREFIX: &str = "ironlog_completed_";

pub fn completion_key(session_id: Id) -> String {
    format!("{}{}", COMPLETION_KEY_PREFIX, session_id)
}

/// Raw string key/value backend.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub fn get_local_storage() -> Option<web_sys::Storage> {
    web_sys::window()?.local_storage().ok()?
}

/// Browser `localStorage`.
pub struct LocalStore {
    storage: web_sys::Storage,
}

impl LocalStore {
    pub fn open() -> Option<Self> {
        get_local_storage().map(|storage| Self { storage })
    }
}

impl KeyValueStore for LocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.storage
            .get_item(key)
            .map_err(|e| AppError::Storage(format!("read {}: {:?}", key, e)))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.storage
            .set_item(key, value)
            .map_err(|e| AppError::Storage(format!("write {}: {:?}", key, e)))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.storage
            .remove_item(key)
            .map_err(|e| AppError::Storage(format!("remove {}: {:?}", key, e)))
    }
}

/// In-memory store. Used when `localStorage` is unavailable (private mode, no window).
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<HashMap<String, String>>>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose writes always fail, like a full quota.
    pub fn read_only() -> Self {
        Self { read_only: true, ..Self::default() }
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    #[cfg(test)]
    pub fn put_raw(&self, key: &str, value: &str) {
        self.entries.borrow_mut().insert(key.to_string(), value.to_string());
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.read_only {
            return Err(AppError::Storage(format!("quota exceeded writing {}", key)));
        }
        self.entries.borrow_mut().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        if self.read_only {
            return Err(AppError::Storage(format!("cannot remove {}", key)));
        }
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// Typed access to local persistence. Every failure is logged and swallowed:
/// reads fall back to a neutral value, writes report `false`.
#[derive(Clone)]
pub struct LocalPersistence {
    store: Rc<dyn KeyValueStore>,
}

impl LocalPersistence {
    pub fn new(store: Rc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn browser() -> Self {
        match LocalStore::open() {
            Some(store) => Self::new(Rc::new(store)),
            None => {
                warn!("localStorage unavailable, session recovery will not survive a reload");
                Self::new(Rc::new(MemoryStore::new()))
            }
        }
    }

    pub fn read_string(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "storage read failed");
                None
            }
        }
    }

    pub fn write_string(&self, key: &str, value: &str) -> bool {
        match self.store.set(key, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "storage write failed");
                false
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.store.remove(key) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "storage remove failed");
                false
            }
        }
    }

    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self.read_string(key)?;
        match serde_json::from_str(&json) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable stored value");
                None
            }
        }
    }

    pub fn write_json<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.write_string(key, &json),
            Err(e) => {
                warn!(key, error = %e, "could not serialize value for storage");
                false
            }
        }
    }

    // ============ AUTH TOKEN ============

    pub fn load_token(&self) -> Option<String> {
        self.read_string(TOKEN_KEY).filter(|t| !t.is_empty())
    }

    pub fn save_token(&self, token: &str) {
        self.write_string(TOKEN_KEY, token);
    }

    pub fn clear_token(&self) {
        self.remove(TOKEN_KEY);
    }

    // ============ API BASE ============

    pub fn load_api_base(&self) -> Option<String> {
        self.read_string(API_BASE_KEY).filter(|b| !b.trim().is_empty())
    }

    pub fn save_api_base(&self, base: &str) {
        self.write_string(API_BASE_KEY, base);
    }

    // ============ COMPLETION MAPS ============

    pub fn load_completion(&self, session_id: Id) -> CompletionMap {
        self.read_json(&completion_key(session_id)).unwrap_or_default()
    }

    pub fn save_completion(&self, session_id: Id, map: &CompletionMap) -> bool {
        self.write_json(&completion_key(session_id), map)
    }

    pub fn clear_completion(&self, session_id: Id) {
        self.remove(&completion_key(session_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> (MemoryStore, LocalPersistence) {
        let store = MemoryStore::new();
        let persistence = LocalPersistence::new(Rc::new(store.clone()));
        (store, persistence)
    }

    #[test]
    fn token_round_trip_and_clear() {
        let (_, p) = memory();
        assert_eq!(p.load_token(), None);
        p.save_token("abc");
        assert_eq!(p.load_token().as_deref(), Some("abc"));
        p.clear_token();
        assert_eq!(p.load_token(), None);
    }

    #[test]
    fn completion_maps_are_scoped_per_session() {
        let (store, p) = memory();
        let mut map = CompletionMap::default();
        map.mark_done(5);
        assert!(p.save_completion(1, &map));
        assert!(store.raw("ironlog_completed_1").is_some());
        assert!(p.load_completion(1).is_done(5));
        assert!(!p.load_completion(2).is_done(5));
    }

    #[test]
    fn corrupt_values_fall_back_to_neutral() {
        let (store, p) = memory();
        store.put_raw(&completion_key(9), "{not json");
        assert_eq!(p.load_completion(9), CompletionMap::default());
    }

    #[test]
    fn write_failures_are_swallowed() {
        let p = LocalPersistence::new(Rc::new(MemoryStore::read_only()));
        let mut map = CompletionMap::default();
        map.mark_done(1);
        assert!(!p.save_completion(1, &map));
        p.save_token("t");
        assert_eq!(p.load_token(), None);
    }
}
