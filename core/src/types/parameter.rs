//! Per-parameter ledger types.
//!
//! A `ParameterNotes` value is the full history of one system parameter:
//! the pristine `start` entry followed by one entry per note that changed
//! it, oldest first. The JSON layout (`AllNotes`/`NoteID`/`Value`) is the
//! on-disk format of the state directory.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TuneError};

/// Note ID of the entry holding the pre-tuning value.
pub const START_ID: &str = "start";

// ---------------------------------------------------------------------------
// ParameterNoteEntry
// ---------------------------------------------------------------------------

/// One historical value of a parameter, tagged with the note that set it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParameterNoteEntry {
    #[serde(rename = "NoteID")]
    pub note_id: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl ParameterNoteEntry {
    pub fn new(note_id: &str, value: &str) -> Self {
        ParameterNoteEntry {
            note_id: note_id.to_string(),
            value: value.to_string(),
        }
    }

    pub fn is_start(&self) -> bool {
        self.note_id == START_ID
    }
}

// ---------------------------------------------------------------------------
// ParameterNotes
// ---------------------------------------------------------------------------

/// Ordered history of one parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParameterNotes {
    #[serde(rename = "AllNotes", default)]
    pub all_notes: Vec<ParameterNoteEntry>,
}

impl ParameterNotes {
    pub fn new() -> Self {
        ParameterNotes {
            all_notes: Vec::new(),
        }
    }

    /// A ledger holding only the pristine value.
    pub fn with_start(value: &str) -> Self {
        ParameterNotes {
            all_notes: vec![ParameterNoteEntry::new(START_ID, value)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.all_notes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.all_notes.len()
    }

    /// Position of `note_id`, if present.
    pub fn position(&self, note_id: &str) -> Option<usize> {
        self.all_notes.iter().position(|e| e.note_id == note_id)
    }

    pub fn contains(&self, note_id: &str) -> bool {
        self.position(note_id).is_some()
    }

    /// Whether only the `start` entry is left.
    pub fn only_start(&self) -> bool {
        self.all_notes.len() == 1 && self.all_notes[0].is_start()
    }

    pub fn start_value(&self) -> Option<&str> {
        self.all_notes
            .first()
            .filter(|e| e.is_start())
            .map(|e| e.value.as_str())
    }

    /// The value of the most recently applied entry.
    pub fn effective_value(&self) -> Option<&str> {
        self.all_notes.last().map(|e| e.value.as_str())
    }

    /// IDs of all notes that changed this parameter, in application order.
    pub fn note_ids(&self) -> Vec<&str> {
        self.all_notes
            .iter()
            .filter(|e| !e.is_start())
            .map(|e| e.note_id.as_str())
            .collect()
    }

    /// Append `value` for `note_id`, moving an earlier entry of the same
    /// note to the tail instead of duplicating it.
    pub fn push(&mut self, value: &str, note_id: &str) {
        if let Some(pos) = self.position(note_id) {
            self.all_notes.remove(pos);
        }
        self.all_notes.push(ParameterNoteEntry::new(note_id, value));
    }

    /// Remove the entry of `note_id` and return the value of the entry that
    /// preceded it. Returns `None` (and leaves the ledger untouched) when the
    /// note is absent or when `start` is asked to go while others remain.
    /// Removing a sole `start` entry returns its value and empties the ledger.
    pub fn remove(&mut self, note_id: &str) -> Option<String> {
        let pos = self.position(note_id)?;
        if pos == 0 {
            if self.all_notes.len() > 1 {
                return None;
            }
            return self.all_notes.pop().map(|e| e.value);
        }
        self.all_notes.remove(pos);
        Some(self.all_notes[pos - 1].value.clone())
    }

    // -------------------------------------------------------------------
    // JSON serialization
    // -------------------------------------------------------------------

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode a persisted ledger, checking the `start`-first invariant.
    pub fn from_json(param: &str, data: &str) -> Result<Self> {
        let notes: ParameterNotes =
            serde_json::from_str(data).map_err(|e| TuneError::StoreCorrupt {
                param: param.to_string(),
                reason: e.to_string(),
            })?;
        if let Some(first) = notes.all_notes.first() {
            if !first.is_start() {
                return Err(TuneError::StoreCorrupt {
                    param: param.to_string(),
                    reason: format!("first entry is '{}', expected '{}'", first.note_id, START_ID),
                });
            }
        }
        Ok(notes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
