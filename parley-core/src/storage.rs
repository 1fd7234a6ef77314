//! Durable key-value collaborator.
//!
//! The engine persists exactly one value through this interface: the session
//! reconnection identifier. Hosts supply a real backing store; [`MemoryStore`]
//! covers tests and ephemeral runs.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::Result;

pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Erasing a missing key is not an error.
    fn erase(&self, key: &str) -> Result<()>;
}

/// In-process store; contents are lost with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn erase(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_erase() {
        let store = MemoryStore::new();
        assert_eq!(store.get("sessionId").unwrap(), None);
        store.set("sessionId", "abc").unwrap();
        assert_eq!(store.get("sessionId").unwrap().as_deref(), Some("abc"));
        store.erase("sessionId").unwrap();
        store.erase("sessionId").unwrap();
        assert_eq!(store.get("sessionId").unwrap(), None);
    }
}
