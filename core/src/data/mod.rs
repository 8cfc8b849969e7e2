pub mod applied;
pub mod settings;
pub mod sysconfig;

pub use applied::AppliedNotes;
pub use sysconfig::SysconfigFile;
