//! File-backed ledger storage.
//!
//! One JSON file per parameter under the state directory's `parameter/`
//! folder. Writes go to a dot-prefixed temp file in the same directory and
//! are renamed into place, so a crash leaves either the old or the new file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TuneError};

use super::backend::LedgerBackend;

/// Stores ledgers as `<dir>/<encoded-param>`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// The directory is created on first save, so read-only commands work
    /// on a pristine host.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileBackend { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, param: &str) -> PathBuf {
        self.dir.join(encode_file_name(param))
    }
}

impl LedgerBackend for FileBackend {
    fn load_raw(&self, param: &str) -> Result<Option<String>> {
        let path = self.path_for(param);
        match fs::read_to_string(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TuneError::io(path, e)),
        }
    }

    fn save_raw(&mut self, param: &str, data: &str) -> Result<()> {
        write_atomic(&self.path_for(param), data)
    }

    fn delete(&mut self, param: &str) -> Result<()> {
        let path = self.path_for(param);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TuneError::io(path, e)),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TuneError::io(&self.dir, e)),
        };

        let mut params = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TuneError::io(&self.dir, e))?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            // Temp files from an interrupted write.
            if name.starts_with('.') {
                continue;
            }
            params.push(decode_file_name(&name));
        }
        params.sort();
        Ok(params)
    }
}

/// Write `contents` to `path` via temp file and rename.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| TuneError::io(path, std::io::Error::other("path has no parent")))?;
    fs::create_dir_all(parent).map_err(|e| TuneError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(".{}.tmp", file_name));
    fs::write(&tmp_path, contents).map_err(|e| TuneError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| TuneError::io(path, e))?;
    Ok(())
}

/// Parameter identifiers such as `sys:kernel/mm/ksm/run` contain `/`.
fn encode_file_name(param: &str) -> String {
    param.replace('%', "%25").replace('/', "%2F")
}

fn decode_file_name(name: &str) -> String {
    name.replace("%2F", "/").replace("%25", "%")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, FileBackend) {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(tmp.path().join("parameter"));
        (tmp, backend)
    }

    #[test]
    fn missing_ledger_loads_as_none() {
        let (_tmp, backend) = backend();
        assert_eq!(backend.load_raw("THP").unwrap(), None);
    }

    #[test]
    fn save_creates_directory_and_file() {
        let (_tmp, mut backend) = backend();
        backend.save_raw("THP", "{\"AllNotes\":[]}").unwrap();
        assert!(backend.path_for("THP").exists());
        assert_eq!(
            backend.load_raw("THP").unwrap().as_deref(),
            Some("{\"AllNotes\":[]}")
        );
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let (_tmp, mut backend) = backend();
        backend.save_raw("KSM", "one").unwrap();
        backend.save_raw("KSM", "two").unwrap();
        let names: Vec<String> = fs::read_dir(backend.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["KSM"]);
        assert_eq!(backend.load_raw("KSM").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn slashes_in_identifiers_are_encoded() {
        let (_tmp, mut backend) = backend();
        let param = "sys:kernel/mm/transparent_hugepage/enabled";
        backend.save_raw(param, "x").unwrap();
        assert_eq!(
            backend.path_for(param).file_name().unwrap(),
            "sys:kernel%2Fmm%2Ftransparent_hugepage%2Fenabled"
        );
        assert_eq!(backend.list().unwrap(), vec![param.to_string()]);
    }

    #[test]
    fn list_skips_temp_files_and_handles_missing_dir() {
        let (_tmp, mut backend) = backend();
        assert!(backend.list().unwrap().is_empty());
        backend.save_raw("vm.swappiness", "x").unwrap();
        fs::write(backend.dir().join(".vm.swappiness.tmp"), "partial").unwrap();
        assert_eq!(backend.list().unwrap(), vec!["vm.swappiness"]);
    }

    #[test]
    fn delete_removes_file_and_tolerates_missing() {
        let (_tmp, mut backend) = backend();
        backend.save_raw("THP", "x").unwrap();
        backend.delete("THP").unwrap();
        assert!(!backend.path_for("THP").exists());
        backend.delete("THP").unwrap();
    }

    #[test]
    fn percent_round_trips() {
        assert_eq!(decode_file_name(&encode_file_name("a%2Fb/c")), "a%2Fb/c");
    }
}
