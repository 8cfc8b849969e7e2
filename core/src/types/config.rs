use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A note defined entirely in `settings.yaml`: parameter identifiers mapped
/// to the values it tunes them to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CustomNoteDef {
    pub id: String,
    pub name: String,
    pub values: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Holds `parameter/`, `applied.json` and the run lock.
    pub state_dir: PathBuf,
    /// Per-note `KEY=value` override files, one per note ID.
    pub override_dir: PathBuf,
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
    pub cpupower: PathBuf,
    /// Replaces the value read from `/proc/meminfo`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_total_mb: Option<u64>,
    pub log_level: String,
    /// Extra solutions, or replacements for built-in ones.
    pub solutions: BTreeMap<String, Vec<String>>,
    pub notes: Vec<CustomNoteDef>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            state_dir: PathBuf::from("/var/lib/hosttune"),
            override_dir: PathBuf::from("/etc/hosttune/override"),
            proc_root: PathBuf::from("/proc"),
            sys_root: PathBuf::from("/sys"),
            cpupower: PathBuf::from("/usr/bin/cpupower"),
            mem_total_mb: None,
            log_level: "info".into(),
            solutions: BTreeMap::new(),
            notes: Vec::new(),
        }
    }
}

impl Settings {
    /// Settings rooted at `state_dir`, everything else default.
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Settings {
            state_dir: state_dir.into(),
            ..Settings::default()
        }
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.state_dir.join("parameter")
    }

    pub fn applied_path(&self) -> PathBuf {
        self.state_dir.join("applied.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("hosttune.lock")
    }

    pub fn override_path(&self, note_id: &str) -> PathBuf {
        self.override_dir.join(note_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip() {
        let mut settings = Settings::with_state_dir("/tmp/hosttune");
        settings.mem_total_mb = Some(65536);
        settings
            .solutions
            .insert("BOBJ".into(), vec!["1557506".into()]);
        settings.notes.push(CustomNoteDef {
            id: "swap".into(),
            name: "Swappiness".into(),
            values: BTreeMap::from([("vm.swappiness".into(), "10".into())]),
            reminder: None,
        });
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn derived_paths_live_under_state_dir() {
        let settings = Settings::with_state_dir("/srv/tune");
        assert_eq!(settings.ledger_dir(), PathBuf::from("/srv/tune/parameter"));
        assert_eq!(settings.applied_path(), PathBuf::from("/srv/tune/applied.json"));
        assert_eq!(settings.lock_path(), PathBuf::from("/srv/tune/hosttune.lock"));
    }

    #[test]
    fn override_path_is_per_note() {
        let settings = Settings::default();
        assert_eq!(
            settings.override_path("1557506"),
            PathBuf::from("/etc/hosttune/override/1557506")
        );
    }
}
