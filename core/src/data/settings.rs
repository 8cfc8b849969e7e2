use std::collections::HashSet;
use std::path::Path;

use crate::error::{Result, TuneError};
use crate::types::config::Settings;

/// Where the binary looks when no `--config` is given.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/hosttune/settings.yaml";

/// Load `Settings` from a YAML file. A missing file yields defaults; a file
/// that exists but cannot be parsed is `ConfigInvalid`.
pub fn load(path: &Path) -> Result<Settings> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Settings::default());
        }
        Err(e) => return Err(TuneError::io(path, e)),
    };
    parse(path, &content)
}

/// Parse settings text. `path` only labels errors.
pub fn parse(path: &Path, content: &str) -> Result<Settings> {
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    let settings: Settings =
        serde_yaml::from_str(content).map_err(|e| TuneError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    validate(path, &settings)?;
    Ok(settings)
}

fn validate(path: &Path, settings: &Settings) -> Result<()> {
    let invalid = |reason: String| TuneError::ConfigInvalid {
        path: path.to_path_buf(),
        reason,
    };

    let mut seen = HashSet::new();
    for note in &settings.notes {
        if note.id.trim().is_empty() {
            return Err(invalid("custom note with empty id".into()));
        }
        if !seen.insert(note.id.as_str()) {
            return Err(invalid(format!("custom note '{}' defined twice", note.id)));
        }
        if note.values.is_empty() {
            return Err(invalid(format!("custom note '{}' sets no values", note.id)));
        }
    }
    for (name, notes) in &settings.solutions {
        if notes.is_empty() {
            return Err(invalid(format!("solution '{}' lists no notes", name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn p() -> PathBuf {
        PathBuf::from("/etc/hosttune/settings.yaml")
    }

    #[test]
    fn missing_file_gives_defaults() {
        let settings = load(Path::new("/tmp/hosttune_no_such_settings_4711.yaml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(parse(&p(), "\n").unwrap(), Settings::default());
    }

    #[test]
    fn parse_partial_keeps_other_defaults() {
        let settings = parse(&p(), "state_dir: /srv/tune\nmem_total_mb: 8192\n").unwrap();
        assert_eq!(settings.state_dir, PathBuf::from("/srv/tune"));
        assert_eq!(settings.mem_total_mb, Some(8192));
        assert_eq!(settings.sys_root, PathBuf::from("/sys"));
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn parse_solutions_and_custom_notes() {
        let yaml = "\
solutions:
  BOBJ: [\"1557506\", swap]
notes:
  - id: swap
    name: Lower swappiness
    values:
      vm.swappiness: \"10\"
    reminder: check swap size
";
        let settings = parse(&p(), yaml).unwrap();
        assert_eq!(settings.solutions["BOBJ"], vec!["1557506", "swap"]);
        assert_eq!(settings.notes[0].values["vm.swappiness"], "10");
        assert_eq!(settings.notes[0].reminder.as_deref(), Some("check swap size"));
    }

    #[test]
    fn unknown_key_is_config_invalid() {
        let err = parse(&p(), "stat_dir: /typo\n").unwrap_err();
        assert!(matches!(err, TuneError::ConfigInvalid { .. }));
        assert!(err.to_string().contains("settings.yaml"));
    }

    #[test]
    fn duplicate_custom_note_rejected() {
        let yaml = "\
notes:
  - {id: a, name: A, values: {vm.swappiness: \"1\"}}
  - {id: a, name: B, values: {vm.swappiness: \"2\"}}
";
        let err = parse(&p(), yaml).unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn empty_solution_rejected() {
        let err = parse(&p(), "solutions:\n  EMPTY: []\n").unwrap_err();
        assert!(err.to_string().contains("EMPTY"));
    }
}
