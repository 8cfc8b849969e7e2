//! In-memory system for tests.
//!
//! Parameters live in a map; reads of unknown identifiers return `NA` like
//! the live accessor does for missing files. Individual identifiers can be
//! made to fail on read or write, and every successful write is recorded.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};

use crate::error::{Result, TuneError};
use crate::types::comparison::NOT_APPLICABLE;

use super::SystemAccessor;

pub struct MockSystem {
    values: RefCell<BTreeMap<String, String>>,
    writes: RefCell<Vec<(String, String)>>,
    failing_reads: HashSet<String>,
    failing_writes: HashSet<String>,
    mem_total_mb: u64,
}

impl MockSystem {
    pub fn new() -> Self {
        MockSystem {
            values: RefCell::new(BTreeMap::new()),
            writes: RefCell::new(Vec::new()),
            failing_reads: HashSet::new(),
            failing_writes: HashSet::new(),
            mem_total_mb: 65536,
        }
    }

    /// Builder: preset `id` to `value`.
    pub fn with(self, id: &str, value: &str) -> Self {
        self.set(id, value);
        self
    }

    pub fn with_mem_total_mb(mut self, mb: u64) -> Self {
        self.mem_total_mb = mb;
        self
    }

    pub fn fail_read(mut self, id: &str) -> Self {
        self.failing_reads.insert(id.to_string());
        self
    }

    pub fn fail_write(mut self, id: &str) -> Self {
        self.failing_writes.insert(id.to_string());
        self
    }

    /// Change a value behind the tuner's back.
    pub fn set(&self, id: &str, value: &str) {
        self.values
            .borrow_mut()
            .insert(id.to_string(), value.to_string());
    }

    pub fn value(&self, id: &str) -> Option<String> {
        self.values.borrow().get(id).cloned()
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.borrow().clone()
    }
}

impl Default for MockSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemAccessor for MockSystem {
    fn read_value(&self, id: &str) -> Result<String> {
        if self.failing_reads.contains(id) {
            return Err(TuneError::ReadFailure {
                param: id.to_string(),
                reason: "mock read failure".into(),
            });
        }
        Ok(self
            .value(id)
            .unwrap_or_else(|| NOT_APPLICABLE.to_string()))
    }

    fn write_value(&self, id: &str, value: &str) -> Result<()> {
        if self.failing_writes.contains(id) {
            return Err(TuneError::WriteFailure {
                param: id.to_string(),
                value: value.to_string(),
                reason: "mock write failure".into(),
            });
        }
        self.set(id, value);
        self.writes
            .borrow_mut()
            .push((id.to_string(), value.to_string()));
        Ok(())
    }

    fn mem_total_mb(&self) -> Result<u64> {
        Ok(self.mem_total_mb)
    }
}
