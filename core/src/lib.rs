//! hosttune core: parameter ledger, note lifecycle and compliance comparison.

pub mod compare;
pub mod data;
pub mod error;
pub mod infrastructure;
pub mod ledger;
pub mod note;
pub mod report;
pub mod solution;
pub mod tuner;
pub mod types;

pub use compare::ComparisonReport;
pub use error::{Result, TuneError};
pub use ledger::ParameterStore;
pub use tuner::{BatchOutcome, Status, Tuner, VerifyOutcome};
pub use types::config::Settings;
