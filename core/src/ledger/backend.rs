//! Storage drivers for parameter ledgers.
//!
//! A backend moves raw serialized ledgers in and out of storage, keyed by
//! parameter identifier. Decoding and invariant checks live in
//! `ParameterStore`, so every driver reports corruption the same way.

use std::collections::BTreeMap;

use crate::error::Result;

/// Load/save/delete contract for persisted ledgers.
pub trait LedgerBackend {
    /// Raw ledger text for `param`, or `None` when no ledger exists.
    fn load_raw(&self, param: &str) -> Result<Option<String>>;

    /// Replace the ledger for `param`. Must be atomic: readers see either
    /// the old or the new content, never a partial write.
    fn save_raw(&mut self, param: &str, data: &str) -> Result<()>;

    /// Remove the ledger for `param`. Removing a missing ledger is not an error.
    fn delete(&mut self, param: &str) -> Result<()>;

    /// Identifiers of all stored ledgers, sorted.
    fn list(&self) -> Result<Vec<String>>;
}

/// In-memory backend for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    ledgers: BTreeMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            ledgers: BTreeMap::new(),
        }
    }

    /// Store raw text as-is, bypassing serialization. Lets tests plant
    /// malformed ledgers.
    pub fn insert_raw(&mut self, param: &str, data: &str) {
        self.ledgers.insert(param.to_string(), data.to_string());
    }
}

impl LedgerBackend for MemoryBackend {
    fn load_raw(&self, param: &str) -> Result<Option<String>> {
        Ok(self.ledgers.get(param).cloned())
    }

    fn save_raw(&mut self, param: &str, data: &str) -> Result<()> {
        self.ledgers.insert(param.to_string(), data.to_string());
        Ok(())
    }

    fn delete(&mut self, param: &str) -> Result<()> {
        self.ledgers.remove(param);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.ledgers.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_save_load_delete() {
        let mut backend = MemoryBackend::new();
        assert_eq!(backend.load_raw("THP").unwrap(), None);
        backend.save_raw("THP", "{}").unwrap();
        assert_eq!(backend.load_raw("THP").unwrap().as_deref(), Some("{}"));
        backend.delete("THP").unwrap();
        assert_eq!(backend.load_raw("THP").unwrap(), None);
    }

    #[test]
    fn memory_backend_delete_missing_is_ok() {
        let mut backend = MemoryBackend::new();
        assert!(backend.delete("nothing").is_ok());
    }

    #[test]
    fn memory_backend_lists_sorted() {
        let mut backend = MemoryBackend::new();
        backend.insert_raw("vm.swappiness", "{}");
        backend.insert_raw("KSM", "{}");
        assert_eq!(backend.list().unwrap(), vec!["KSM", "vm.swappiness"]);
    }
}
