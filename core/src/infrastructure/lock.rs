//! Process-wide run lock.
//!
//! Apply and revert runs hold an exclusive `flock` on the lock file for
//! their whole duration. A second run fails at once instead of waiting.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TuneError};

/// Held lock. Released on drop; the file itself stays in place.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}


impl RunLock {
    /// Take the lock at `path`, writing our PID into it.
    pub fn acquire(path: &Path) -> Result<RunLock> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TuneError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| TuneError::io(path, e))?;

        try_lock(&mut file, path)?;

        file.set_len(0).map_err(|e| TuneError::io(path, e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| TuneError::io(path, e))?;
        write!(file, "{}", std::process::id()).map_err(|e| TuneError::io(path, e))?;
        debug!(path = %path.display(), "run lock acquired");

        Ok(RunLock {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a lock file left by a crashed run. Returns whether a file was
    /// removed. A lock still held by a live run is contention, not stale.
    pub fn force_release(path: &Path) -> Result<bool> {
        let mut file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(TuneError::io(path, e)),
        };
        try_lock(&mut file, path)?;
        std::fs::remove_file(path).map_err(|e| TuneError::io(path, e))?;
        info!(path = %path.display(), "removed lock file");
        Ok(true)
    }
}


/// Non-blocking exclusive `flock`. On contention, reports the PID recorded
/// in the file.
fn try_lock(file: &mut File, path: &Path) -> Result<()> {
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret == 0 {
        return Ok(());
    }
    let mut holder = String::new();
    let _ = file.read_to_string(&mut holder);
    let holder = holder.trim();
    Err(TuneError::LockContention {
        path: path.to_path_buf(),
        holder: if holder.is_empty() {
            "unknown".to_string()
        } else {
            holder.to_string()
        },
    })
}


impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_pid_and_drop_keeps_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hosttune.lock");
        {
            let lock = RunLock::acquire(&path).unwrap();
            assert_eq!(lock.path(), path.as_path());
            let pid = std::fs::read_to_string(&path).unwrap();
            assert_eq!(pid, std::process::id().to_string());
        }
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn second_acquire_is_contention() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hosttune.lock");
        let _held = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        match err {
            TuneError::LockContention { holder, .. } => {
                assert_eq!(holder, std::process::id().to_string())
            }
            other => panic!("expected contention, got {:?}", other),
        }
    }

    #[test]
    fn reacquire_after_release() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/hosttune.lock");
        drop(RunLock::acquire(&path).unwrap());
        assert!(RunLock::acquire(&path).is_ok());
    }

    #[test]
    fn force_release_stale_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hosttune.lock");
        std::fs::write(&path, "4711").unwrap();
        assert!(RunLock::force_release(&path).unwrap());
        assert!(!RunLock::force_release(&path).unwrap());
    }

    #[test]
    fn waiter_on_old_handle_still_excludes_new_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hosttune.lock");
        let first = RunLock::acquire(&path).unwrap();
        let waiter = File::open(&path).unwrap();
        drop(first);

        let ret = unsafe { libc::flock(waiter.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        assert_eq!(ret, 0);
        assert!(matches!(
            RunLock::acquire(&path),
            Err(TuneError::LockContention { .. })
        ));
    }

    #[test]
    fn force_release_refuses_live_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hosttune.lock");
        let _held = RunLock::acquire(&path).unwrap();
        assert!(matches!(
            RunLock::force_release(&path),
            Err(TuneError::LockContention { .. })
        ));
        assert!(path.exists());
    }
}
