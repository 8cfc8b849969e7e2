//! Error types for hosttune operations.
//!
//! Field-level kinds (`ReadFailure`, `WriteFailure`) are isolated by the
//! lifecycle and logged. Note-level failures skip that note in a batch.
//! `LockContention` aborts the whole run before anything is written.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TuneError {
    #[error("cannot read '{param}': {reason}")]
    ReadFailure { param: String, reason: String },

    #[error("cannot write '{value}' to '{param}': {reason}")]
    WriteFailure {
        param: String,
        value: String,
        reason: String,
    },

    #[error("ledger for parameter '{param}' is corrupt: {reason}")]
    StoreCorrupt { param: String, reason: String },

    #[error("no ledger for parameter '{param}' (start value was never captured)")]
    LedgerMissing { param: String },

    #[error("invalid configuration in {}: {reason}", path.display())]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("another tuning run holds the lock {} (pid {holder})", path.display())]
    LockContention { path: PathBuf, holder: String },

    #[error("unknown note '{0}'")]
    UnknownNote(String),

    #[error("unknown solution '{0}'")]
    UnknownSolution(String),

    #[error("note '{note}': cannot {action} while {state}")]
    InvalidTransition {
        note: String,
        action: &'static str,
        state: &'static str,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TuneError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TuneError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error must abort the whole run rather than one note or field.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TuneError::LockContention { .. })
    }
}

pub type Result<T> = std::result::Result<T, TuneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_failure_names_parameter_and_value() {
        let err = TuneError::WriteFailure {
            param: "vm.swappiness".into(),
            value: "10".into(),
            reason: "permission denied".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("vm.swappiness"));
        assert!(msg.contains("'10'"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn lock_contention_is_fatal() {
        let err = TuneError::LockContention {
            path: PathBuf::from("/var/lib/hosttune/hosttune.lock"),
            holder: "4711".into(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("4711"));
    }

    #[test]
    fn override_errors_are_not_fatal() {
        let err = TuneError::ConfigInvalid {
            path: PathBuf::from("/etc/hosttune/override/1557506"),
            reason: "line 1: empty key".into(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn field_errors_are_not_fatal() {
        let err = TuneError::ReadFailure {
            param: "sys:kernel/mm/ksm/run".into(),
            reason: "no such file".into(),
        };
        assert!(!err.is_fatal());
    }
}
