//! Per-note override files.
//!
//! Plain `KEY=value` lines, `#` comments, values optionally quoted. An
//! operator drops one file per note ID into the override directory to steer
//! what that note optimises to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, TuneError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SysconfigFile {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl SysconfigFile {
    /// An override set with no entries.
    pub fn empty() -> Self {
        SysconfigFile::default()
    }

    /// Read `path`. A missing file means no overrides.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => SysconfigFile::parse(path, &content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SysconfigFile {
                path: path.to_path_buf(),
                values: BTreeMap::new(),
            }),
            Err(e) => Err(TuneError::io(path, e)),
        }
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let mut values = BTreeMap::new();
        for (lineno, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| TuneError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: format!("line {}: expected KEY=value, got '{}'", lineno + 1, line),
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(TuneError::ConfigInvalid {
                    path: path.to_path_buf(),
                    reason: format!("line {}: empty key", lineno + 1),
                });
            }
            values.insert(key.to_string(), unquote(value));
        }
        Ok(SysconfigFile {
            path: path.to_path_buf(),
            values,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Non-empty string value of `key`.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// `yes`/`true`/`1` or `no`/`false`/`0`, case-insensitive. Missing or
    /// empty gives `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        let value = match self.get_string(key) {
            Some(v) => v,
            None => return Ok(default),
        };
        match value.to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Ok(true),
            "no" | "false" | "0" => Ok(false),
            _ => Err(self.invalid(key, value, "a boolean")),
        }
    }

    pub fn get_int(&self, key: &str, default: u64) -> Result<u64> {
        match self.get_string(key) {
            Some(v) => v.parse().map_err(|_| self.invalid(key, v, "a non-negative integer")),
            None => Ok(default),
        }
    }

    fn invalid(&self, key: &str, value: &str, expected: &str) -> TuneError {
        TuneError::ConfigInvalid {
            path: self.path.clone(),
            reason: format!("{} is '{}', expected {}", key, value, expected),
        }
    }
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"'))
            || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> SysconfigFile {
        SysconfigFile::parse(Path::new("/etc/hosttune/override/1557506"), content).unwrap()
    }

    #[test]
    fn parses_pairs_comments_and_quotes() {
        let conf = parse(
            "# paging\n\nENABLE_PAGECACHE_LIMIT=\"yes\"\nOVERRIDE_PAGECACHE_LIMIT_MB = 641\nGOVERNOR='powersave'\n",
        );
        assert_eq!(conf.get("ENABLE_PAGECACHE_LIMIT"), Some("yes"));
        assert_eq!(conf.get("OVERRIDE_PAGECACHE_LIMIT_MB"), Some("641"));
        assert_eq!(conf.get("GOVERNOR"), Some("powersave"));
        assert_eq!(conf.get("MISSING"), None);
    }

    #[test]
    fn missing_file_is_empty() {
        let conf = SysconfigFile::load(Path::new("/tmp/hosttune_no_such_override_4711")).unwrap();
        assert_eq!(conf, SysconfigFile {
            path: PathBuf::from("/tmp/hosttune_no_such_override_4711"),
            values: BTreeMap::new(),
        });
    }

    #[test]
    fn line_without_equals_is_invalid() {
        let err = SysconfigFile::parse(Path::new("/o/x"), "GOOD=1\nbroken line\n").unwrap_err();
        assert!(matches!(err, TuneError::ConfigInvalid { .. }));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn bool_values_and_defaults() {
        let conf = parse("A=yes\nB=No\nC=1\nD=\nE=maybe\n");
        assert!(conf.get_bool("A", false).unwrap());
        assert!(!conf.get_bool("B", true).unwrap());
        assert!(conf.get_bool("C", false).unwrap());
        assert!(conf.get_bool("D", true).unwrap());
        assert!(!conf.get_bool("MISSING", false).unwrap());
        assert!(conf.get_bool("E", false).is_err());
    }

    #[test]
    fn int_values_and_defaults() {
        let conf = parse("N=4096\nBAD=lots\n");
        assert_eq!(conf.get_int("N", 0).unwrap(), 4096);
        assert_eq!(conf.get_int("MISSING", 7).unwrap(), 7);
        let err = conf.get_int("BAD", 0).unwrap_err();
        assert!(err.to_string().contains("BAD is 'lots'"));
    }

    #[test]
    fn unquote_leaves_lone_quote() {
        assert_eq!(unquote("\""), "\"");
        assert_eq!(unquote(" \"x\" "), "x");
    }
}
