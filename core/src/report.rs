//! Text rendering of comparison reports, outcomes and status.
//!
//! Column widths grow to fit the widest cell, starting from a fixed minimum.
//! Cells get footnote markers for unsupported (`[1]`), not applicable
//! (`[2]`) and unset (`[7]`) parameters, and for Inform context (`[10]`).

use std::collections::BTreeMap;

use crate::compare::ComparisonReport;
use crate::tuner::{BatchOutcome, NoteResult, Status};
use crate::types::comparison::FieldComparison;

const FOOTNOTE_UNSUPPORTED: &str = "[1] setting is not supported by the system";
const FOOTNOTE_NOT_APPLICABLE: &str = "[2] setting is not available on the system";
const FOOTNOTE_NO_VALUE: &str =
    "[7] parameter value is untouched by default and no override value is set";

const VERIFY_MIN_WIDTHS: [usize; 5] = [16, 12, 9, 9, 7];
const SIMULATE_MIN_WIDTHS: [usize; 4] = [12, 10, 15, 9];

/// Footnotes collected while rendering, printed once below the table.
#[derive(Default)]
struct Footnotes {
    unsupported: bool,
    not_applicable: bool,
    no_value: bool,
    inform: Vec<String>,
}


impl Footnotes {
    /// Marker suffix for one row, recording which notes are needed.
    fn mark(&mut self, report: &ComparisonReport, cmp: &FieldComparison) -> String {
        let mut marks = String::new();
        if cmp.actual_value.is_unsupported() {
            self.unsupported = true;
            marks.push_str(" [1]");
        }
        if cmp.actual_value.is_not_applicable() {
            self.not_applicable = true;
            marks.push_str(" [2]");
        }
        if cmp.expected_value.is_empty() {
            self.no_value = true;
            marks.push_str(" [7]");
        }
        if let Some(info) = report.inform_for(&cmp.map_key) {
            let line = format!("[10] {}: {}", cmp.map_key, info);
            if !self.inform.contains(&line) {
                self.inform.push(line);
            }
            marks.push_str(" [10]");
        }
        marks
    }

    fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.unsupported {
            lines.push(format!(" {}", FOOTNOTE_UNSUPPORTED));
        }
        if self.not_applicable {
            lines.push(format!(" {}", FOOTNOTE_NOT_APPLICABLE));
        }
        if self.no_value {
            lines.push(format!(" {}", FOOTNOTE_NO_VALUE));
        }
        for line in &self.inform {
            lines.push(format!(" {}", line));
        }
        lines
    }
}


fn one_line(s: &str) -> String {
    s.replace('\t', " ")
}


fn override_for(report: &ComparisonReport, cmp: &FieldComparison) -> String {
    report
        .overrides
        .get(&cmp.map_key)
        .map(|v| one_line(v))
        .unwrap_or_default()
}


/// Rows formatted as `   a | b | c`, with a `---+---` rule under the header.
fn table(widths: &[usize], header: &[&str], rows: &[Vec<String>]) -> Vec<String> {
    let line = |cells: &[String]| -> String {
        let last = cells.len() - 1;
        let body: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if i == last {
                    c.clone()
                } else {
                    format!("{:<width$}", c, width = widths[i])
                }
            })
            .collect();
        format!("   {}", body.join(" | "))
    };

    let header: Vec<String> = header.iter().map(|s| s.to_string()).collect();
    let head = line(&header);
    let mut rule: String = head
        .chars()
        .map(|c| if c == '|' { '+' } else { '-' })
        .collect();
    let total = 3 + widths.iter().map(|w| w + 3).sum::<usize>();
    while rule.chars().count() < total {
        rule.push('-');
    }

    let mut lines = vec![head, rule];
    lines.extend(rows.iter().map(|r| line(r)));
    lines
}


fn fit(widths: &mut [usize], cells: &[String]) {
    for (w, c) in widths.iter_mut().zip(cells) {
        *w = (*w).max(c.chars().count());
    }
}


fn reminder_lines(reports: &[&ComparisonReport]) -> Vec<String> {
    let mut lines = Vec::new();
    for report in reports {
        if report.reminders.is_empty() {
            continue;
        }
        lines.push(String::new());
        lines.push(format!("Attention for note {}:", report.note_id));
        lines.push(
            "Hints or values not handled automatically. Read carefully, check and set manually if needed:"
                .into(),
        );
        lines.extend(report.reminders.iter().map(|r| one_line(r)));
    }
    lines
}


/// Verify table over one or more notes: Note, Parameter, Expected,
/// Override, Actual, Compliant.
pub fn render_verify(reports: &[ComparisonReport]) -> String {
    if reports.is_empty() {
        return "No notes to verify".into();
    }
    let mut footnotes = Footnotes::default();
    let mut rows = Vec::new();
    for report in reports {
        for cmp in report.rows() {
            let compliant = if cmp.actual_value.is_unsupported() {
                " - "
            } else if cmp.match_expectation {
                "yes"
            } else {
                "no "
            };
            rows.push(vec![
                report.note_id.clone(),
                cmp.map_key.clone(),
                one_line(&cmp.expected_display),
                override_for(report, cmp),
                one_line(&cmp.actual_display),
                format!("{}{}", compliant, footnotes.mark(report, cmp)),
            ]);
        }
    }

    let mut widths = VERIFY_MIN_WIDTHS.to_vec();
    for row in &rows {
        fit(&mut widths, &row[..5]);
    }
    let mut lines = table(
        &widths,
        &["Note", "Parameter", "Expected", "Override", "Actual", "Compliant"],
        &rows,
    );

    let notes = footnotes.lines();
    if !notes.is_empty() {
        lines.push(String::new());
        lines.extend(notes);
    }
    let refs: Vec<&ComparisonReport> = reports.iter().collect();
    lines.extend(reminder_lines(&refs));

    let failing: Vec<&str> = reports
        .iter()
        .filter(|r| !r.compliant)
        .map(|r| r.note_id.as_str())
        .collect();
    lines.push(String::new());
    if failing.is_empty() {
        lines.push("The system fully conforms to the checked notes.".into());
    } else {
        lines.push(format!(
            "The parameters listed above deviate from notes: {}",
            failing.join(", ")
        ));
    }
    lines.join("\n")
}


/// What applying each note would change: Parameter, Value set, Value
/// expected, Override, Comment. One table per note.
pub fn render_simulate(reports: &[ComparisonReport]) -> String {
    let mut lines = Vec::new();
    for report in reports {
        let mut footnotes = Footnotes::default();
        let rows: Vec<Vec<String>> = report
            .rows()
            .map(|cmp| {
                vec![
                    cmp.map_key.clone(),
                    one_line(&cmp.actual_display),
                    one_line(&cmp.expected_display),
                    override_for(report, cmp),
                    footnotes.mark(report, cmp).trim_start().to_string(),
                ]
            })
            .collect();

        let mut widths = SIMULATE_MIN_WIDTHS.to_vec();
        for row in &rows {
            fit(&mut widths, &row[..4]);
        }

        lines.push(String::new());
        lines.push(format!("{} - {}", report.note_id, report.note_name));
        lines.push(String::new());
        lines.extend(table(
            &widths,
            &["Parameter", "Value set", "Value expected", "Override", "Comment"],
            &rows,
        ));
        if report.compliant {
            lines.push(String::new());
            lines.push("   (no change)".into());
        }
        let notes = footnotes.lines();
        if !notes.is_empty() {
            lines.push(String::new());
            lines.extend(notes);
        }
        lines.extend(reminder_lines(&[report]));
    }
    lines.join("\n")
}


/// One line per note, then the skipped fields indented below it.
pub fn render_outcomes(batch: &BatchOutcome) -> String {
    if batch.notes.is_empty() {
        return "Nothing to do".into();
    }
    let mut lines = Vec::new();
    for note in &batch.notes {
        match &note.result {
            NoteResult::Applied(o) => {
                lines.push(format!(
                    "{:<12} applied   {} changed, {} skipped",
                    note.note_id,
                    o.changed.len(),
                    o.skipped.len()
                ));
                for c in &o.changed {
                    lines.push(format!("    {}: {} -> {}", c.param, c.old_value, c.new_value));
                }
                for s in &o.skipped {
                    lines.push(format!("    skipped {}: {}", s.param, s.reason));
                }
            }
            NoteResult::Reverted(o) => {
                lines.push(format!(
                    "{:<12} reverted  {} restored, {} skipped",
                    note.note_id,
                    o.restored.len(),
                    o.skipped.len()
                ));
                for c in &o.restored {
                    lines.push(format!("    {}: {} -> {}", c.param, c.old_value, c.new_value));
                }
                for s in &o.skipped {
                    lines.push(format!("    skipped {}: {}", s.param, s.reason));
                }
            }
            NoteResult::Failed { error } => {
                lines.push(format!("{:<12} failed    {}", note.note_id, error));
            }
        }
    }
    lines.join("\n")
}


pub fn render_status(status: &Status) -> String {
    let mut lines = Vec::new();
    if status.applied.is_empty() {
        lines.push("Applied notes: none".into());
    } else {
        lines.push(format!("Applied notes: {}", status.applied.join(" ")));
    }
    if status.ledgers.is_empty() {
        lines.push("No parameters changed".into());
        return lines.join("\n");
    }
    lines.push(String::new());
    lines.push(format!(
        "{:<44} {:<16} {:<16} {}",
        "Parameter", "Start", "Current", "Notes"
    ));
    lines.push("-".repeat(92));
    for l in &status.ledgers {
        lines.push(format!(
            "{:<44} {:<16} {:<16} {}",
            l.param,
            one_line(&l.start_value),
            one_line(&l.effective_value),
            l.notes.join(" ")
        ));
    }
    lines.join("\n")
}


/// `(id, name)` pairs, marking applied notes with `*`.
pub fn render_note_list(notes: &[(String, String)], applied: &[String]) -> String {
    notes
        .iter()
        .map(|(id, name)| {
            let mark = if applied.contains(id) { "*" } else { " " };
            format!(" {} {:<12} {}", mark, id, name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}


pub fn render_solution_list(solutions: &BTreeMap<String, Vec<String>>) -> String {
    solutions
        .iter()
        .map(|(name, notes)| format!("   {:<16} {}", name, notes.join(" ")))
        .collect::<Vec<_>>()
        .join("\n")
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::live::{ENERGY_PERF_BIAS, GOVERNOR};
    use crate::infrastructure::MockSystem;
    use crate::note::cpu::CpuPerformance;
    use crate::note::custom::CustomNote;
    use crate::note::hana::{HanaOsSettings, KSM, NUMA_BALANCING, THP};
    use crate::note::lifecycle::{ApplyOutcome, ParamChange, SkippedField};
    use crate::note::{Note, TuningContext};
    use crate::tuner::{LedgerStatus, NoteOutcome};
    use crate::types::config::CustomNoteDef;

    fn report(note: &dyn Note, system: &MockSystem) -> ComparisonReport {
        let current = note.initialise(system).unwrap();
        let desired = current.optimise(&TuningContext::new(65536)).unwrap();
        ComparisonReport::build(desired.as_ref(), current.as_ref())
    }

    fn hana(thp: &str) -> ComparisonReport {
        let system = MockSystem::new()
            .with(THP, thp)
            .with(KSM, "0")
            .with(NUMA_BALANCING, "0");
        report(&HanaOsSettings::default(), &system)
    }

    // --- verify ---

    #[test]
    fn verify_table_has_header_rule_and_rows() {
        let out = render_verify(&[hana("always")]);
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].contains("Note"));
        assert!(lines[0].contains("Compliant"));
        assert!(lines[1].starts_with("---"));
        assert!(lines[1].contains('+'));
        assert!(out.contains("THP"));
        assert!(out.contains("no "));
        assert!(out.contains("deviate from notes: 2205917"));
    }

    #[test]
    fn verify_compliant_system() {
        let out = render_verify(&[hana("never")]);
        assert!(out.contains("fully conforms"));
        assert!(!out.contains("no  "));
    }

    #[test]
    fn verify_columns_align() {
        let out = render_verify(&[hana("always")]);
        let pipes: Vec<Vec<usize>> = out
            .lines()
            .take_while(|l| !l.is_empty())
            .filter(|l| l.contains(" | "))
            .map(|l| l.match_indices('|').map(|(i, _)| i).collect())
            .collect();
        assert!(pipes.len() > 2);
        assert!(pipes.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn unsupported_cpu_is_marked() {
        let system = MockSystem::new()
            .with(ENERGY_PERF_BIAS, "all:none")
            .with(GOVERNOR, "all:performance");
        let out = render_verify(&[report(&CpuPerformance::default(), &system)]);
        assert!(out.contains(" -  [1]"));
        assert!(out.contains(FOOTNOTE_UNSUPPORTED));
    }

    #[test]
    fn inform_becomes_footnote() {
        let system = MockSystem::new()
            .with(ENERGY_PERF_BIAS, "cpu0:0 cpu1:6")
            .with(GOVERNOR, "all:performance");
        let out = render_verify(&[report(&CpuPerformance::default(), &system)]);
        assert!(out.contains("[10] energy_perf_bias: hasDiffs"));
    }

    #[test]
    fn reminders_follow_table() {
        let out = render_verify(&[hana("never")]);
        assert!(out.contains("Attention for note 2205917:"));
    }

    // --- simulate ---

    #[test]
    fn simulate_shows_current_and_expected() {
        let out = render_simulate(&[hana("always")]);
        assert!(out.contains("2205917 - "));
        assert!(out.contains("Value expected"));
        let thp = out.lines().find(|l| l.contains("THP")).unwrap();
        let always = thp.find("always").unwrap();
        let never = thp.find("never").unwrap();
        assert!(always < never);
        assert!(!out.contains("(no change)"));
    }

    #[test]
    fn simulate_no_change() {
        assert!(render_simulate(&[hana("never")]).contains("(no change)"));
    }

    #[test]
    fn simulate_marks_missing_parameter() {
        let note = CustomNote::new(CustomNoteDef {
            id: "x".into(),
            name: "x".into(),
            values: BTreeMap::from([("vm.nope".to_string(), "1".to_string())]),
            reminder: None,
        });
        let out = render_simulate(&[report(&note, &MockSystem::new())]);
        let row = out.lines().find(|l| l.contains("vm.nope")).unwrap();
        assert!(row.trim_end().ends_with("[2]"));
        assert!(out.contains(FOOTNOTE_NOT_APPLICABLE));
    }

    // --- outcomes / status ---

    #[test]
    fn outcomes_list_changes_and_skips() {
        let batch = BatchOutcome {
            notes: vec![
                NoteOutcome {
                    note_id: "2205917".into(),
                    result: NoteResult::Applied(ApplyOutcome {
                        changed: vec![ParamChange {
                            param: THP.into(),
                            old_value: "always".into(),
                            new_value: "never".into(),
                        }],
                        skipped: vec![SkippedField {
                            param: KSM.into(),
                            reason: "unsupported (NA)".into(),
                        }],
                    }),
                },
                NoteOutcome {
                    note_id: "1557506".into(),
                    result: NoteResult::Failed { error: "boom".into() },
                },
            ],
        };
        let out = render_outcomes(&batch);
        assert!(out.contains("1 changed, 1 skipped"));
        assert!(out.contains("always -> never"));
        assert!(out.contains("skipped sys:kernel/mm/ksm/run: unsupported (NA)"));
        assert!(out.contains("failed    boom"));
    }

    #[test]
    fn status_table() {
        let status = Status {
            applied: vec!["swap".into()],
            ledgers: vec![LedgerStatus {
                param: "vm.swappiness".into(),
                start_value: "60".into(),
                effective_value: "10".into(),
                notes: vec!["swap".into()],
            }],
        };
        let out = render_status(&status);
        assert!(out.starts_with("Applied notes: swap"));
        assert!(out.lines().any(|l| l.starts_with("vm.swappiness") && l.ends_with("swap")));
        assert!(render_status(&Status::default()).contains("No parameters changed"));
    }

    #[test]
    fn note_list_marks_applied() {
        let out = render_note_list(
            &[("a".into(), "A".into()), ("b".into(), "B".into())],
            &["b".to_string()],
        );
        assert_eq!(out.lines().nth(1).unwrap(), " * b            B");
    }
}
