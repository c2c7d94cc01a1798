//! Session bridge for OAuth state.
//!
//! The host application owns the session; this module only needs a
//! [`KeyValueStore`] capability from it. [`TokenStore`] layers JSON
//! (de)serialization over that capability under a fixed key namespace:
//!
//! | key                | value                                   |
//! |--------------------|-----------------------------------------|
//! | `teams_auth_state` | pending CSRF state and PKCE verifier     |
//! | `teams_token`      | access/refresh token and expiry          |
//! | `teams_user`       | normalized Graph profile                 |

use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Session key for the pending authorization request.
pub const KEY_AUTH_STATE: &str = "teams_auth_state";
/// Session key for the serialized token.
pub const KEY_TOKEN: &str = "teams_token";
/// Session key for the cached profile.
pub const KEY_PROFILE: &str = "teams_user";

/// Minimal string key-value capability provided by the host session.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
    fn delete(&mut self, key: &str);
}

/// In-memory session, one per browser session.
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    values: HashMap<String, String>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl KeyValueStore for MemorySession {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    fn delete(&mut self, key: &str) {
        self.values.remove(key);
    }
}

/// Typed remember/recall/forget over a [`KeyValueStore`].
///
/// Values are opaque to this type: it serializes whatever it is given and
/// never inspects the contents.
pub struct TokenStore<S> {
    session: S,
}

impl<S: KeyValueStore> TokenStore<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }

    /// Serialize `value` and store it under `key`, replacing any previous value.
    pub fn remember<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value).map_err(|e| StoreError::Serialize {
            key: key.to_string(),
            source: e,
        })?;
        self.session.set(key, json);
        debug!(key, "Session value stored");
        Ok(())
    }

    /// Load the value stored under `key`.
    ///
    /// A value that no longer deserializes is deleted and reported as absent.
    pub fn recall<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let raw = self.session.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable session value");
                self.session.delete(key);
                None
            }
        }
    }

    pub fn recall_or<T: DeserializeOwned>(&mut self, key: &str, default: T) -> T {
        self.recall(key).unwrap_or(default)
    }

    pub fn forget(&mut self, key: &str) {
        self.session.delete(key);
    }

    /// Forget token, profile and any pending authorization state.
    pub fn forget_all(&mut self) {
        for key in [KEY_TOKEN, KEY_PROFILE, KEY_AUTH_STATE] {
            self.session.delete(key);
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn into_inner(self) -> S {
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob {
        value: u32,
    }

    #[test]
    fn test_remember_and_recall() {
        let mut store = TokenStore::new(MemorySession::new());
        store.remember("k", &Blob { value: 7 }).unwrap();

        assert_eq!(store.recall::<Blob>("k"), Some(Blob { value: 7 }));
        assert_eq!(store.recall::<Blob>("missing"), None);
    }

    #[test]
    fn test_recall_or_default() {
        let mut store = TokenStore::new(MemorySession::new());
        assert_eq!(store.recall_or("k", Blob { value: 1 }), Blob { value: 1 });
    }

    #[test]
    fn test_corrupt_value_is_discarded() {
        let mut session = MemorySession::new();
        session.set("k", "{not json".to_string());

        let mut store = TokenStore::new(session);
        assert_eq!(store.recall::<Blob>("k"), None);
        assert!(!store.session().contains("k"));
    }

    #[test]
    fn test_forget_all_leaves_unrelated_keys() {
        let mut session = MemorySession::new();
        session.set("other", "1".to_string());

        let mut store = TokenStore::new(session);
        store.remember(KEY_TOKEN, &Blob { value: 1 }).unwrap();
        store.remember(KEY_PROFILE, &Blob { value: 2 }).unwrap();
        store.remember(KEY_AUTH_STATE, &Blob { value: 3 }).unwrap();

        store.forget_all();

        let session = store.into_inner();
        assert!(!session.contains(KEY_TOKEN));
        assert!(!session.contains(KEY_PROFILE));
        assert!(!session.contains(KEY_AUTH_STATE));
        assert!(session.contains("other"));
    }
}
