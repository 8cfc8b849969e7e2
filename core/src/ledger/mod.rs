//! Parameter store: durable per-parameter ledgers of stacked values.
//!
//! Every system parameter touched by a note gets a ledger holding the
//! pristine `start` value followed by the value each note set, oldest first.
//! Reverting a note pops its entry and hands back the value that was in
//! effect before it, no matter how many other notes touched the parameter.

pub mod backend;
pub mod file;

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::{Result, TuneError};
use crate::types::parameter::{ParameterNotes, START_ID};

pub use backend::{LedgerBackend, MemoryBackend};
pub use file::FileBackend;

/// Ledgers keyed by parameter identifier, persisted through a backend.
pub struct ParameterStore {
    backend: Box<dyn LedgerBackend>,
}

impl ParameterStore {
    pub fn new(backend: Box<dyn LedgerBackend>) -> Self {
        ParameterStore { backend }
    }

    /// A store that lives only as long as the value.
    pub fn in_memory() -> Self {
        ParameterStore::new(Box::new(MemoryBackend::new()))
    }

    /// Decode the stored ledger. Missing is empty; corruption is an error.
    fn read(&self, param: &str) -> Result<ParameterNotes> {
        match self.backend.load_raw(param)? {
            Some(data) => ParameterNotes::from_json(param, &data),
            None => Ok(ParameterNotes::new()),
        }
    }

    fn write(&mut self, param: &str, notes: &ParameterNotes) -> Result<()> {
        let data = notes.to_json()?;
        self.backend.save_raw(param, &data)
    }

    /// The ledger for `param`. An unreadable ledger is reported and
    /// treated as empty.
    pub fn load(&self, param: &str) -> ParameterNotes {
        match self.read(param) {
            Ok(notes) => notes,
            Err(e) => {
                warn!(param, error = %e, "treating unreadable ledger as empty");
                ParameterNotes::new()
            }
        }
    }

    /// Capture the pristine value of `param`. Does nothing once a ledger
    /// exists, and refuses to replace a corrupt one.
    pub fn init_start(&mut self, param: &str, current: &str) -> Result<()> {
        let notes = self.read(param)?;
        if !notes.is_empty() {
            return Ok(());
        }
        debug!(param, value = current, "capturing start value");
        self.write(param, &ParameterNotes::with_start(current))
    }

    /// Record that `note_id` set `param` to `value`.
    pub fn push(&mut self, param: &str, value: &str, note_id: &str) -> Result<()> {
        let mut notes = self.read(param)?;
        if notes.is_empty() {
            return Err(TuneError::LedgerMissing {
                param: param.to_string(),
            });
        }
        if note_id == START_ID {
            warn!(param, "refusing to push a value for the start entry");
            return Ok(());
        }
        notes.push(value, note_id);
        debug!(param, note = note_id, value, "pushed value");
        self.write(param, &notes)
    }

    /// 0-based position of `note_id` in the ledger of `param`, or 0 when
    /// absent. Indistinguishable from `start`; prefer [`Self::position`].
    pub fn index_of(&self, param: &str, note_id: &str) -> usize {
        self.position(param, note_id).unwrap_or(0)
    }

    pub fn position(&self, param: &str, note_id: &str) -> Option<usize> {
        self.load(param).position(note_id)
    }

    /// Remove the entry of `note_id` from `param` and return the value that
    /// preceded it. The ledger is deleted once only `start` is left.
    pub fn revert(&mut self, param: &str, note_id: &str) -> Result<Option<String>> {
        let mut notes = self.load(param);
        if notes.is_empty() {
            return Ok(None);
        }
        if note_id == START_ID && !notes.only_start() {
            warn!(param, "start entry cannot be reverted while notes remain");
            return Ok(None);
        }

        let restored = match notes.remove(note_id) {
            Some(value) => value,
            None => return Ok(None),
        };

        if notes.is_empty() || notes.only_start() {
            debug!(param, note = note_id, "ledger back to pristine, deleting");
            self.backend.delete(param)?;
        } else {
            self.write(param, &notes)?;
        }
        debug!(param, note = note_id, value = restored.as_str(), "reverted");
        Ok(Some(restored))
    }

    /// All readable ledgers. Corrupt ones are skipped.
    pub fn enumerate(&self) -> Result<BTreeMap<String, ParameterNotes>> {
        let mut all = BTreeMap::new();
        for param in self.backend.list()? {
            match self.read(&param) {
                Ok(notes) if !notes.is_empty() => {
                    all.insert(param, notes);
                }
                Ok(_) => {}
                Err(e) => warn!(param = param.as_str(), error = %e, "skipping ledger"),
            }
        }
        Ok(all)
    }

    /// Parameters whose ledger holds an entry of `note_id`.
    pub fn params_of(&self, note_id: &str) -> Result<Vec<String>> {
        Ok(self
            .enumerate()?
            .into_iter()
            .filter(|(_, notes)| notes.contains(note_id))
            .map(|(param, _)| param)
            .collect())
    }

    /// Value of the most recently applied entry.
    pub fn effective_value(&self, param: &str) -> Option<String> {
        self.load(param).effective_value().map(|v| v.to_string())
    }

    /// Drop a ledger regardless of content.
    pub fn discard(&mut self, param: &str) -> Result<()> {
        self.backend.delete(param)
    }
}
