//! Access to the live system.
//!
//! Provides the `SystemAccessor` trait and implementations for the real host
//! (`LiveSystem`) and for testing (`MockSystem`). Notes never touch files or
//! commands directly; they name parameters by identifier and go through an
//! accessor.

pub mod live;
pub mod lock;
pub mod mock;
pub mod runner;

use crate::error::Result;

pub use live::LiveSystem;
pub use lock::RunLock;
pub use mock::MockSystem;
pub use runner::{CommandRunner, MockRunner, ProcessRunner};

/// Uniform read/write of system parameters by identifier.
///
/// Identifiers are `sys:<path>` for sysfs files, `cpu:<setting>` for CPU
/// settings driven through `cpupower`, and plain sysctl keys otherwise.
pub trait SystemAccessor {
    /// Current value of `id`. Parameters the platform does not have read as
    /// `NA`; unsupported CPU features read as `all:none`.
    fn read_value(&self, id: &str) -> Result<String>;

    fn write_value(&self, id: &str, value: &str) -> Result<()>;

    /// Total main memory in MiB.
    fn mem_total_mb(&self) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_implements_system_accessor() {
        let system = MockSystem::new();
        let _: &dyn SystemAccessor = &system;
    }
}
