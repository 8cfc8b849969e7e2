//! Notes: named bundles of target values for system parameters.
//!
//! A note is rebuilt on every run. `initialise` reads the live values into a
//! fresh instance, `optimise` derives the desired instance from it, and both
//! describe themselves through `fields()`. Apply, revert and comparison work
//! on that field list only, so a note never has to know about the ledger.

pub mod cpu;
pub mod custom;
pub mod hana;
pub mod lifecycle;
pub mod paging;

use std::collections::BTreeMap;

use tracing::warn;

use crate::data::sysconfig::SysconfigFile;
use crate::error::{Result, TuneError};
use crate::infrastructure::SystemAccessor;
use crate::types::comparison::NoteField;
use crate::types::config::CustomNoteDef;

pub use lifecycle::{ApplyOutcome, NoteRun, NoteState, RevertOutcome};

/// Inputs to `optimise` that do not come from the live system.
#[derive(Debug, Clone)]
pub struct TuningContext {
    pub mem_total_mb: u64,
    /// The note's own override file.
    pub overrides: SysconfigFile,
}

impl TuningContext {
    pub fn new(mem_total_mb: u64) -> Self {
        TuningContext {
            mem_total_mb,
            overrides: SysconfigFile::empty(),
        }
    }

    pub fn with_overrides(mut self, overrides: SysconfigFile) -> Self {
        self.overrides = overrides;
        self
    }
}

pub trait Note {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// A new instance holding the live values. Reads only.
    fn initialise(&self, system: &dyn SystemAccessor) -> Result<Box<dyn Note>>;

    /// The desired instance. Pure: no reads, no writes.
    fn optimise(&self, ctx: &TuningContext) -> Result<Box<dyn Note>>;

    /// Declared fields, in report order.
    fn fields(&self) -> Vec<NoteField>;
}

// ---------------------------------------------------------------------------
// NoteCatalog
// ---------------------------------------------------------------------------

/// Every note this host knows: the built-in ones plus those defined in
/// settings.
#[derive(Debug, Clone, Default)]
pub struct NoteCatalog {
    custom: BTreeMap<String, CustomNoteDef>,
}

const BUILTIN_IDS: [&str; 3] = [hana::ID, paging::ID, cpu::ID];

impl NoteCatalog {
    pub fn new(custom: &[CustomNoteDef]) -> Self {
        let mut map = BTreeMap::new();
        for def in custom {
            if BUILTIN_IDS.contains(&def.id.as_str()) {
                warn!(note = def.id.as_str(), "custom note shadows a built-in note, ignoring it");
                continue;
            }
            map.insert(def.id.clone(), def.clone());
        }
        NoteCatalog { custom: map }
    }

    pub fn contains(&self, id: &str) -> bool {
        BUILTIN_IDS.contains(&id) || self.custom.contains_key(id)
    }

    /// Built-in IDs first, then custom ones sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = BUILTIN_IDS.iter().map(|s| s.to_string()).collect();
        ids.extend(self.custom.keys().cloned());
        ids
    }

    /// A fresh, uninitialised instance of note `id`.
    pub fn get(&self, id: &str) -> Result<Box<dyn Note>> {
        match id {
            hana::ID => Ok(Box::new(hana::HanaOsSettings::default())),
            paging::ID => Ok(Box::new(paging::PagingImprovements::default())),
            cpu::ID => Ok(Box::new(cpu::CpuPerformance::default())),
            _ => self
                .custom
                .get(id)
                .map(|def| Box::new(custom::CustomNote::new(def.clone())) as Box<dyn Note>)
                .ok_or_else(|| TuneError::UnknownNote(id.to_string())),
        }
    }

    /// `(id, name)` of every note.
    pub fn list(&self) -> Vec<(String, String)> {
        self.ids()
            .into_iter()
            .filter_map(|id| {
                self.get(&id)
                    .ok()
                    .map(|note| (id.clone(), note.name().to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(id: &str) -> CustomNoteDef {
        CustomNoteDef {
            id: id.into(),
            name: format!("custom {}", id),
            values: BTreeMap::from([("vm.swappiness".to_string(), "10".to_string())]),
            reminder: None,
        }
    }

    #[test]
    fn builtins_are_listed_first() {
        let catalog = NoteCatalog::new(&[custom("aaa")]);
        assert_eq!(catalog.ids(), vec!["2205917", "1557506", "2684254", "aaa"]);
    }

    #[test]
    fn get_unknown_note() {
        let catalog = NoteCatalog::default();
        let err = catalog.get("9999999").err().unwrap();
        assert!(matches!(err, TuneError::UnknownNote(ref id) if id == "9999999"));
    }

    #[test]
    fn custom_cannot_shadow_builtin() {
        let catalog = NoteCatalog::new(&[custom(hana::ID)]);
        assert_eq!(catalog.ids().len(), 3);
        assert_ne!(catalog.get(hana::ID).unwrap().name(), "custom 2205917");
    }

    #[test]
    fn list_names_every_note() {
        let catalog = NoteCatalog::new(&[custom("swap")]);
        let list = catalog.list();
        assert_eq!(list.len(), 4);
        assert!(list.contains(&("swap".to_string(), "custom swap".to_string())));
        assert!(catalog.contains("1557506"));
        assert!(!catalog.contains("nope"));
    }
}
