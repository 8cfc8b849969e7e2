pub mod comparison;
pub mod config;
pub mod parameter;

pub use comparison::{FieldComparison, FieldValue, NoteField, ValueKind};
pub use config::{CustomNoteDef, Settings};
pub use parameter::{ParameterNoteEntry, ParameterNotes, START_ID};
