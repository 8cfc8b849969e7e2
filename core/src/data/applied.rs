//! Order in which notes were applied, persisted as `applied.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TuneError};
use crate::ledger::file::write_atomic;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct AppliedFile {
    #[serde(rename = "NoteApplyOrder", default)]
    order: Vec<String>,
}

/// Applied note IDs, oldest first.
#[derive(Debug, Clone)]
pub struct AppliedNotes {
    path: PathBuf,
    order: Vec<String>,
}

impl AppliedNotes {
    /// Read the applied order from `path`. Missing is empty; an unreadable
    /// file is warned about and treated as empty.
    pub fn load(path: &Path) -> Self {
        let order = match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<AppliedFile>(&data) {
                Ok(file) => file.order,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring unreadable applied-note list");
                    Vec::new()
                }
            },
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "cannot read applied-note list");
                }
                Vec::new()
            }
        };
        AppliedNotes {
            path: path.to_path_buf(),
            order,
        }
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, note_id: &str) -> bool {
        self.order.iter().any(|id| id == note_id)
    }

    /// Record `note_id` as the most recently applied note.
    pub fn mark_applied(&mut self, note_id: &str) -> Result<()> {
        self.order.retain(|id| id != note_id);
        self.order.push(note_id.to_string());
        self.save()
    }

    pub fn mark_reverted(&mut self, note_id: &str) -> Result<()> {
        let before = self.order.len();
        self.order.retain(|id| id != note_id);
        if self.order.len() == before {
            return Ok(());
        }
        self.save()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.order.clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TuneError::io(&self.path, e)),
        }
    }

    fn save(&self) -> Result<()> {
        let file = AppliedFile {
            order: self.order.clone(),
        };
        write_atomic(&self.path, &serde_json::to_string_pretty(&file)?)
    }
}
