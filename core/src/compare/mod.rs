//! Field-by-field compliance check of a note against the live system.
//!
//! `compare` walks the expected note's fields in declared order and pairs
//! each with the live note's field of the same name and key. The result is
//! a flat list of `FieldComparison` records; `ComparisonReport` folds it into
//! a verdict with reminders and override values pulled out.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::note::Note;
use crate::types::comparison::{FieldComparison, FieldValue, NoteField, ValueKind};

/// Shown for a value that is empty or absent.
pub const EMPTY_PLACEHOLDER: &str = "(empty)";

/// Whether two values are equal under `kind`.
///
/// Sentinels (`all:none`, `NA`) on either side always match.
pub fn values_match(kind: ValueKind, expected: &FieldValue, actual: &FieldValue) -> bool {
    if expected.is_sentinel() || actual.is_sentinel() {
        return true;
    }
    let e = expected.as_value_string();
    let a = actual.as_value_string();
    match kind {
        ValueKind::Scalar => e.trim() == a.trim(),
        ValueKind::Set => element_set(&e) == element_set(&a),
    }
}

fn element_set(s: &str) -> BTreeSet<&str> {
    s.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|e| !e.is_empty())
        .collect()
}

/// Human-readable form: tabs flattened, blanks replaced by the placeholder.
pub fn display(value: &FieldValue) -> String {
    if value.is_empty() {
        return EMPTY_PLACEHOLDER.to_string();
    }
    value.as_value_string().replace('\t', " ")
}

fn comparison(field: &NoteField, actual: FieldValue, matched: bool) -> FieldComparison {
    FieldComparison {
        field_name: field.field.to_string(),
        map_key: field.key.clone(),
        expected_display: display(&field.value),
        actual_display: display(&actual),
        expected_value: field.value.clone(),
        actual_value: actual,
        match_expectation: matched,
    }
}

/// Compare `expected` (optimised) against `actual` (freshly initialised).
///
/// Override fields are not compared. Reminder and inform entries are always
/// reported as matching; inform entries that only the live side carries are
/// appended after the declared fields.
pub fn compare(expected: &dyn Note, actual: &dyn Note) -> Vec<FieldComparison> {
    let actual_fields = actual.fields();
    let lookup = |field: &NoteField| {
        actual_fields
            .iter()
            .find(|f| f.field == field.field && f.key == field.key)
            .map(|f| f.value.clone())
            .unwrap_or(FieldValue::Absent)
    };

    let expected_fields = expected.fields();
    let mut out = Vec::new();
    for field in expected_fields.iter().filter(|f| !f.is_override()) {
        let live = lookup(field);
        let matched = if field.is_reminder() || field.is_inform() {
            true
        } else {
            values_match(field.kind, &field.value, &live)
        };
        out.push(comparison(field, live, matched));
    }

    for field in actual_fields.iter().filter(|f| f.is_inform()) {
        let declared = expected_fields
            .iter()
            .any(|f| f.field == field.field && f.key == field.key);
        if !declared {
            let mut cmp = comparison(field, field.value.clone(), true);
            cmp.expected_value = FieldValue::Absent;
            cmp.expected_display = EMPTY_PLACEHOLDER.to_string();
            out.push(cmp);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// ComparisonReport
// ---------------------------------------------------------------------------

/// Compliance verdict of one note.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComparisonReport {
    pub note_id: String,
    pub note_name: String,
    pub comparisons: Vec<FieldComparison>,
    /// Free-text hints to check by hand.
    pub reminders: Vec<String>,
    /// Override values keyed by the parameter they steer.
    pub overrides: BTreeMap<String, String>,
    pub compliant: bool,
}

impl ComparisonReport {
    pub fn build(expected: &dyn Note, actual: &dyn Note) -> Self {
        let comparisons = compare(expected, actual);
        let reminders = comparisons
            .iter()
            .filter(|c| c.is_reminder())
            .map(|c| c.expected_value.as_value_string())
            .filter(|text| !text.trim().is_empty())
            .collect();
        let overrides = expected
            .fields()
            .into_iter()
            .filter(|f| f.is_override())
            .map(|f| (f.key, f.value.as_value_string()))
            .collect();
        let compliant = comparisons
            .iter()
            .filter(|c| c.counts_toward_verdict())
            .all(|c| c.match_expectation);
        ComparisonReport {
            note_id: expected.id().to_string(),
            note_name: expected.name().to_string(),
            comparisons,
            reminders,
            overrides,
            compliant,
        }
    }

    /// Entries shown as table rows: everything except reminders and inform.
    pub fn rows(&self) -> impl Iterator<Item = &FieldComparison> {
        self.comparisons
            .iter()
            .filter(|c| !c.is_reminder() && !c.is_inform())
    }

    /// Inform text attached to the row keyed `map_key`.
    pub fn inform_for(&self, map_key: &str) -> Option<&str> {
        self.comparisons
            .iter()
            .find(|c| c.is_inform() && c.map_key == map_key)
            .map(|c| {
                if c.actual_value.is_empty() {
                    c.expected_display.as_str()
                } else {
                    c.actual_display.as_str()
                }
            })
    }

    /// Rows whose live value differs.
    pub fn mismatches(&self) -> Vec<&FieldComparison> {
        self.rows()
            .filter(|c| c.counts_toward_verdict() && !c.match_expectation)
            .collect()
    }
}
