use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::adapter::{Adapter, AdapterError};

/// In-memory adapter. Clones share storage, so a test can keep a handle to
/// the map while the database owns the adapter.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    files: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryAdapter {
    pub fn new() -> MemoryAdapter {
        MemoryAdapter::default()
    }

    /// Number of stored payloads.
    pub fn len(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direct read of a stored payload, for inspection.
    pub fn get(&self, name: &str) -> Option<String> {
        self.files.lock().ok()?.get(name).cloned()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, AdapterError> {
        self.files
            .lock()
            .map_err(|e| AdapterError(format!("memory adapter lock poisoned: {e}")))
    }
}

impl Adapter for MemoryAdapter {
    fn load(&self, name: &str) -> Result<Option<String>, AdapterError> {
        Ok(self.lock()?.get(name).cloned())
    }

    fn save(&mut self, name: &str, payload: &str) -> Result<(), AdapterError> {
        self.lock()?.insert(name.to_string(), payload.to_string());
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<(), AdapterError> {
        self.lock()?.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut adapter = MemoryAdapter::new();
        assert_eq!(adapter.load("db").unwrap(), None);
        adapter.save("db", "payload").unwrap();
        assert_eq!(adapter.load("db").unwrap().as_deref(), Some("payload"));
        adapter.delete("db").unwrap();
        assert_eq!(adapter.load("db").unwrap(), None);
    }

    #[test]
    fn clones_share_storage() {
        let mut adapter = MemoryAdapter::new();
        let observer = adapter.clone();
        adapter.save("db", "x").unwrap();
        assert_eq!(observer.get("db").as_deref(), Some("x"));
    }
}
