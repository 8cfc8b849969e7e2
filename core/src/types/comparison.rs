//! Field schema declared by notes, and the comparison record built from it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Live value reported when a feature is not supported on this platform.
pub const UNSUPPORTED: &str = "all:none";
/// Live value reported when a parameter does not apply to this platform.
pub const NOT_APPLICABLE: &str = "NA";
/// Map key of free-text hints that need manual attention.
pub const REMINDER_KEY: &str = "reminder";
/// Field name of auxiliary context attached to a primary field.
pub const INFORM_FIELD: &str = "Inform";
/// Field name of override values a note picked up during optimise.
pub const OVERRIDE_FIELD: &str = "Override";

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// Machine representation of one side of a comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FieldValue {
    Number(u64),
    Text(String),
    Absent,
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    /// The string written to, or read from, the live system.
    pub fn as_value_string(&self) -> String {
        match self {
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Absent => String::new(),
        }
    }

    /// Absent, or text that is blank.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Absent => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// `all:none` or `NA`.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, FieldValue::Text(s) if is_sentinel(s))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, FieldValue::Text(s) if s.trim() == UNSUPPORTED)
    }

    pub fn is_not_applicable(&self) -> bool {
        matches!(self, FieldValue::Text(s) if s.trim() == NOT_APPLICABLE)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_value_string())
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        FieldValue::Number(n)
    }
}

pub fn is_sentinel(s: &str) -> bool {
    let s = s.trim();
    s == UNSUPPORTED || s == NOT_APPLICABLE
}

// ---------------------------------------------------------------------------
// ValueKind
// ---------------------------------------------------------------------------

/// How two values of a field are compared.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Trimmed string equality.
    #[default]
    Scalar,
    /// Whitespace- or comma-separated elements; order is insignificant.
    Set,
}

// ---------------------------------------------------------------------------
// NoteField
// ---------------------------------------------------------------------------

/// One comparable unit a note declares about itself.
///
/// `param` is the live-system identifier for tunable fields; hint fields
/// (reminders, inform context, overrides) leave it empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteField {
    pub field: &'static str,
    pub key: String,
    pub value: FieldValue,
    pub kind: ValueKind,
    pub param: Option<String>,
}

impl NoteField {
    pub fn tunable(
        field: &'static str,
        key: &str,
        param: &str,
        value: impl Into<FieldValue>,
        kind: ValueKind,
    ) -> Self {
        NoteField {
            field,
            key: key.to_string(),
            value: value.into(),
            kind,
            param: Some(param.to_string()),
        }
    }

    /// Compared like a tunable field but never written: the value follows
    /// from other parameters.
    pub fn observed(
        field: &'static str,
        key: &str,
        value: impl Into<FieldValue>,
        kind: ValueKind,
    ) -> Self {
        NoteField {
            field,
            key: key.to_string(),
            value: value.into(),
            kind,
            param: None,
        }
    }

    pub fn reminder(field: &'static str, text: &str) -> Self {
        NoteField {
            field,
            key: REMINDER_KEY.to_string(),
            value: FieldValue::text(text),
            kind: ValueKind::Scalar,
            param: None,
        }
    }

    pub fn inform(key: &str, text: &str) -> Self {
        NoteField {
            field: INFORM_FIELD,
            key: key.to_string(),
            value: FieldValue::text(text),
            kind: ValueKind::Scalar,
            param: None,
        }
    }

    pub fn override_for(key: &str, value: &str) -> Self {
        NoteField {
            field: OVERRIDE_FIELD,
            key: key.to_string(),
            value: FieldValue::text(value),
            kind: ValueKind::Scalar,
            param: None,
        }
    }

    pub fn is_reminder(&self) -> bool {
        self.key == REMINDER_KEY
    }

    pub fn is_inform(&self) -> bool {
        self.field == INFORM_FIELD
    }

    pub fn is_override(&self) -> bool {
        self.field == OVERRIDE_FIELD
    }
}

// ---------------------------------------------------------------------------
// FieldComparison
// ---------------------------------------------------------------------------

/// Expected-versus-actual verdict for one field or map entry of a note.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldComparison {
    #[serde(rename = "ReflectFieldName")]
    pub field_name: String,
    #[serde(rename = "ReflectMapKey")]
    pub map_key: String,
    #[serde(rename = "ExpectedValue")]
    pub expected_value: FieldValue,
    #[serde(rename = "ActualValue")]
    pub actual_value: FieldValue,
    #[serde(rename = "ExpectedValueJS")]
    pub expected_display: String,
    #[serde(rename = "ActualValueJS")]
    pub actual_display: String,
    #[serde(rename = "MatchExpectation")]
    pub match_expectation: bool,
}

impl FieldComparison {
    pub fn is_reminder(&self) -> bool {
        self.map_key == REMINDER_KEY
    }

    pub fn is_inform(&self) -> bool {
        self.field_name == INFORM_FIELD
    }

    /// Whether this entry takes part in the compliant/non-compliant verdict.
    pub fn counts_toward_verdict(&self) -> bool {
        !self.is_reminder()
            && !self.is_inform()
            && !self.actual_value.is_sentinel()
            && !self.expected_value.is_sentinel()
    }
}
