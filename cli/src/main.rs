//! hosttune CLI: the command-line entry point.
//!
//! # Usage
//!
//! ```text
//! hosttune note list
//! hosttune note apply 2205917
//! hosttune solution simulate HANA
//! hosttune verify
//! hosttune revert all
//! hosttune --format json status
//! ```
//!
//! Exit status: 0 on success, 1 when the run finished with warnings
//! (skipped fields, failed notes, non-compliant verify), 2 when it could
//! not run at all.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use hosttune_core::data::settings::{self, DEFAULT_SETTINGS_PATH};
use hosttune_core::infrastructure::RunLock;
use hosttune_core::report;
use hosttune_core::tuner::{BatchOutcome, NoteOutcome, NoteResult, Tuner, VerifyOutcome};
use hosttune_core::{Settings, TuneError};

const EXIT_OK: i32 = 0;
const EXIT_WARNINGS: i32 = 1;
const EXIT_FAILED: i32 = 2;

/// Tune kernel and CPU parameters to vendor notes, and undo it again.
#[derive(Parser, Debug)]
#[command(name = "hosttune", version, about, long_about = None)]
struct Cli {
    /// Settings file (default: $HOSTTUNE_CONFIG, then /etc/hosttune/settings.yaml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log progress at info level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log everything
    #[arg(long, global = true)]
    debug: bool,

    #[arg(long, global = true, value_enum, default_value = "table")]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Json,
}


#[derive(Subcommand, Debug)]
enum Commands {
    /// Work with single notes
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },
    /// Work with solutions (groups of notes)
    Solution {
        #[command(subcommand)]
        action: SolutionAction,
    },
    /// Verify every applied note against the live system
    Verify,
    /// Revert everything hosttune has changed
    Revert {
        #[command(subcommand)]
        target: RevertTarget,
    },
    /// Show applied notes and changed parameters
    Status,
    /// Manage the run lock
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
}


#[derive(Subcommand, Debug)]
enum NoteAction {
    List,
    Apply { id: String },
    Revert { id: String },
    Verify { id: String },
    Simulate { id: String },
}


#[derive(Subcommand, Debug)]
enum SolutionAction {
    List,
    Apply { name: String },
    Revert { name: String },
    Verify { name: String },
    Simulate { name: String },
}


#[derive(Subcommand, Debug)]
enum RevertTarget {
    All,
}


#[derive(Subcommand, Debug)]
enum LockAction {
    /// Remove a lock left behind by a crashed run
    Remove,
}


fn main() {
    let cli = Cli::parse();

    let path = resolve_settings_path(cli.config.clone());
    let settings = match settings::load(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("hosttune: {}", e);
            process::exit(EXIT_FAILED);
        }
    };

    let filter = log_filter(
        std::env::var("HOSTTUNE_LOG").ok(),
        cli.verbose,
        cli.debug,
        &settings.log_level,
    );
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    tracing::debug!(path = %path.display(), "settings loaded");

    let mut stdout = std::io::stdout();
    let code = match run(&cli, settings, &mut stdout) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("hosttune: {:#}", e);
            EXIT_FAILED
        }
    };
    process::exit(code);
}


fn resolve_settings_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("HOSTTUNE_CONFIG") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(DEFAULT_SETTINGS_PATH)
}


fn log_filter(env: Option<String>, verbose: bool, debug: bool, configured: &str) -> String {
    match env {
        Some(f) if !f.trim().is_empty() => f,
        _ if debug => "debug".into(),
        _ if verbose => "info".into(),
        _ => configured.to_string(),
    }
}


/// Run one command, writing its report to `out`. Returns the exit status.
fn run(cli: &Cli, settings: Settings, out: &mut dyn Write) -> anyhow::Result<i32> {
    let json = cli.format == Format::Json;

    if let Commands::Lock { action: LockAction::Remove } = &cli.command {
        let path = settings.lock_path();
        let removed = RunLock::force_release(&path)
            .with_context(|| format!("removing {}", path.display()))?;
        let msg = if removed { "Lock removed" } else { "No lock present" };
        writeln!(out, "{}", msg)?;
        return Ok(EXIT_OK);
    }

    let mut tuner = Tuner::open(settings);

    match &cli.command {
        Commands::Note { action } => match action {
            NoteAction::List => {
                let notes = tuner.notes().list();
                let applied = tuner.applied_notes();
                if json {
                    let rows: Vec<NoteRow> = notes
                        .iter()
                        .map(|(id, name)| NoteRow {
                            id,
                            name,
                            applied: applied.contains(id),
                        })
                        .collect();
                    print_json(out, &rows)?;
                } else {
                    writeln!(out, "{}", report::render_note_list(&notes, applied))?;
                }
                Ok(EXIT_OK)
            }
            NoteAction::Apply { id } => {
                let _lock = tuner.lock()?;
                let mut batch = BatchOutcome::default();
                match tuner.apply_note(id) {
                    Ok(o) => batch.notes.push(outcome(id, NoteResult::Applied(o))),
                    Err(e) => batch.notes.push(outcome(id, failed_or_abort(e)?)),
                }
                print_batch(out, json, &batch)
            }
            NoteAction::Revert { id } => {
                let _lock = tuner.lock()?;
                let mut batch = BatchOutcome::default();
                match tuner.revert_note(id) {
                    Ok(o) => batch.notes.push(outcome(id, NoteResult::Reverted(o))),
                    Err(e) => batch.notes.push(outcome(id, failed_or_abort(e)?)),
                }
                print_batch(out, json, &batch)
            }
            NoteAction::Verify { id } => {
                known_note(&tuner, id)?;
                let checked = tuner.verify_notes(std::slice::from_ref(id));
                print_verify(out, json, &checked, false)
            }
            NoteAction::Simulate { id } => {
                known_note(&tuner, id)?;
                let checked = tuner.verify_notes(std::slice::from_ref(id));
                print_verify(out, json, &checked, true)
            }
        },
        Commands::Solution { action } => match action {
            SolutionAction::List => {
                let solutions: BTreeMap<String, Vec<String>> = tuner
                    .solutions()
                    .iter()
                    .map(|(name, notes)| (name.to_string(), notes.to_vec()))
                    .collect();
                if json {
                    print_json(out, &solutions)?;
                } else {
                    writeln!(out, "{}", report::render_solution_list(&solutions))?;
                }
                Ok(EXIT_OK)
            }
            SolutionAction::Apply { name } => {
                let _lock = tuner.lock()?;
                let batch = tuner.apply_solution(name)?;
                print_batch(out, json, &batch)
            }
            SolutionAction::Revert { name } => {
                let _lock = tuner.lock()?;
                let batch = tuner.revert_solution(name)?;
                print_batch(out, json, &batch)
            }
            SolutionAction::Verify { name } => {
                let checked = tuner.verify_solution(name)?;
                print_verify(out, json, &checked, false)
            }
            SolutionAction::Simulate { name } => {
                let checked = tuner.simulate_solution(name)?;
                print_verify(out, json, &checked, true)
            }
        },
        Commands::Verify => {
            let checked = tuner.verify_all();
            if !json && checked.reports.is_empty() && checked.failures.is_empty() {
                writeln!(out, "No notes applied")?;
                return Ok(EXIT_OK);
            }
            print_verify(out, json, &checked, false)
        }
        Commands::Revert { target: RevertTarget::All } => {
            let _lock = tuner.lock()?;
            let batch = tuner.revert_all()?;
            print_batch(out, json, &batch)
        }
        Commands::Status => {
            let status = tuner.status()?;
            if json {
                print_json(out, &status)?;
            } else {
                writeln!(out, "{}", report::render_status(&status))?;
            }
            Ok(EXIT_OK)
        }
        Commands::Lock { .. } => Ok(EXIT_OK),
    }
}


#[derive(Serialize)]
struct NoteRow<'a> {
    id: &'a str,
    name: &'a str,
    applied: bool,
}


fn outcome(id: &str, result: NoteResult) -> NoteOutcome {
    NoteOutcome {
        note_id: id.to_string(),
        result,
    }
}


/// Unknown notes and fatal errors end the run; anything else fails the note.
fn failed_or_abort(e: TuneError) -> anyhow::Result<NoteResult> {
    match e {
        TuneError::UnknownNote(_) => Err(e.into()),
        e if e.is_fatal() => Err(e.into()),
        e => Ok(NoteResult::Failed {
            error: e.to_string(),
        }),
    }
}


fn known_note(tuner: &Tuner, id: &str) -> anyhow::Result<()> {
    if tuner.notes().contains(id) {
        Ok(())
    } else {
        Err(TuneError::UnknownNote(id.to_string()).into())
    }
}


fn print_json<T: Serialize>(out: &mut dyn Write, value: &T) -> anyhow::Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}


fn print_batch(out: &mut dyn Write, json: bool, batch: &BatchOutcome) -> anyhow::Result<i32> {
    if json {
        print_json(out, batch)?;
    } else {
        writeln!(out, "{}", report::render_outcomes(batch))?;
    }
    Ok(if batch.has_warnings() { EXIT_WARNINGS } else { EXIT_OK })
}


fn print_verify(
    out: &mut dyn Write,
    json: bool,
    checked: &VerifyOutcome,
    simulate: bool,
) -> anyhow::Result<i32> {
    if json {
        print_json(out, checked)?;
    } else {
        if !checked.reports.is_empty() {
            let text = if simulate {
                report::render_simulate(&checked.reports)
            } else {
                report::render_verify(&checked.reports)
            };
            writeln!(out, "{}", text)?;
        }
        for f in &checked.failures {
            if let NoteResult::Failed { error } = &f.result {
                eprintln!("hosttune: note {}: {}", f.note_id, error);
            }
        }
    }
    let warn = if simulate {
        !checked.failures.is_empty()
    } else {
        !checked.compliant()
    };
    Ok(if warn { EXIT_WARNINGS } else { EXIT_OK })
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// A host with one sysctl under a temporary proc root.
    struct Host {
        tmp: tempfile::TempDir,
        config: PathBuf,
    }

    impl Host {
        fn new() -> Host {
            let tmp = tempfile::tempdir().unwrap();
            let root = tmp.path();
            std::fs::create_dir_all(root.join("proc/sys/vm")).unwrap();
            std::fs::write(root.join("proc/sys/vm/swappiness"), "60\n").unwrap();
            let config = root.join("settings.yaml");
            let yaml = format!(
                "state_dir: {root}/state\n\
                 override_dir: {root}/override\n\
                 proc_root: {root}/proc\n\
                 sys_root: {root}/sys\n\
                 mem_total_mb: 16384\n\
                 solutions:\n  DB: [swap]\n\
                 notes:\n  - id: swap\n    name: Lower swappiness\n    values:\n      vm.swappiness: \"10\"\n",
                root = root.display()
            );
            std::fs::write(&config, yaml).unwrap();
            Host { tmp, config }
        }

        fn swappiness(&self) -> String {
            std::fs::read_to_string(self.tmp.path().join("proc/sys/vm/swappiness"))
                .unwrap()
                .trim()
                .to_string()
        }

        fn run(&self, args: &[&str]) -> (i32, String) {
            let mut argv = vec!["hosttune", "--config", self.config.to_str().unwrap()];
            argv.extend_from_slice(args);
            let cli = Cli::try_parse_from(argv).unwrap();
            let settings = settings::load(Path::new(&self.config)).unwrap();
            let mut out = Vec::new();
            let code = match run(&cli, settings, &mut out) {
                Ok(code) => code,
                Err(_) => EXIT_FAILED,
            };
            (code, String::from_utf8(out).unwrap())
        }
    }

    // --- argument handling ---

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["hosttune", "note", "apply", "2205917", "--format", "json"])
            .unwrap();
        assert_eq!(cli.format, Format::Json);
        assert!(matches!(
            cli.command,
            Commands::Note { action: NoteAction::Apply { ref id } } if id == "2205917"
        ));
    }

    #[test]
    fn revert_requires_target() {
        assert!(Cli::try_parse_from(["hosttune", "revert"]).is_err());
        assert!(Cli::try_parse_from(["hosttune", "revert", "all"]).is_ok());
    }

    #[test]
    fn settings_path_resolution() {
        let flag = resolve_settings_path(Some(PathBuf::from("/tmp/x.yaml")));
        assert_eq!(flag, PathBuf::from("/tmp/x.yaml"));

        let old = std::env::var("HOSTTUNE_CONFIG").ok();
        std::env::set_var("HOSTTUNE_CONFIG", "/tmp/test-hosttune.yaml");
        assert_eq!(resolve_settings_path(None), PathBuf::from("/tmp/test-hosttune.yaml"));
        std::env::remove_var("HOSTTUNE_CONFIG");
        assert_eq!(resolve_settings_path(None), PathBuf::from(DEFAULT_SETTINGS_PATH));
        if let Some(v) = old {
            std::env::set_var("HOSTTUNE_CONFIG", v);
        }
    }

    #[test]
    fn log_filter_priority() {
        assert_eq!(log_filter(Some("hosttune=trace".into()), true, true, "warn"), "hosttune=trace");
        assert_eq!(log_filter(None, true, true, "warn"), "debug");
        assert_eq!(log_filter(None, true, false, "warn"), "info");
        assert_eq!(log_filter(Some("  ".into()), false, false, "warn"), "warn");
    }

    // --- commands ---

    #[test]
    fn apply_verify_revert_note() {
        let host = Host::new();
        let (code, out) = host.run(&["note", "apply", "swap"]);
        assert_eq!(code, EXIT_OK);
        assert!(out.contains("60 -> 10"));
        assert_eq!(host.swappiness(), "10");

        let (code, out) = host.run(&["verify"]);
        assert_eq!(code, EXIT_OK);
        assert!(out.contains("fully conforms"));

        let (code, _) = host.run(&["note", "revert", "swap"]);
        assert_eq!(code, EXIT_OK);
        assert_eq!(host.swappiness(), "60");
    }

    #[test]
    fn verify_reports_drift_with_exit_one() {
        let host = Host::new();
        host.run(&["note", "apply", "swap"]);
        std::fs::write(host.tmp.path().join("proc/sys/vm/swappiness"), "30\n").unwrap();
        let (code, out) = host.run(&["verify"]);
        assert_eq!(code, EXIT_WARNINGS);
        assert!(out.contains("deviate from notes: swap"));
    }

    #[test]
    fn unknown_note_fails_to_run() {
        let host = Host::new();
        assert_eq!(host.run(&["note", "apply", "4711"]).0, EXIT_FAILED);
        assert_eq!(host.run(&["note", "verify", "4711"]).0, EXIT_FAILED);
        assert_eq!(host.run(&["solution", "apply", "S4"]).0, EXIT_FAILED);
    }

    #[test]
    fn simulate_changes_nothing() {
        let host = Host::new();
        let (code, out) = host.run(&["note", "simulate", "swap"]);
        assert_eq!(code, EXIT_OK);
        assert!(out.contains("vm.swappiness"));
        assert_eq!(host.swappiness(), "60");
    }

    #[test]
    fn solution_and_revert_all() {
        let host = Host::new();
        let (code, _) = host.run(&["solution", "apply", "DB"]);
        assert_eq!(code, EXIT_OK);
        assert_eq!(host.swappiness(), "10");

        let (_, out) = host.run(&["--format", "json", "status"]);
        let status: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(status["applied"][0], "swap");
        assert_eq!(status["ledgers"][0]["start_value"], "60");

        let (code, _) = host.run(&["revert", "all"]);
        assert_eq!(code, EXIT_OK);
        assert_eq!(host.swappiness(), "60");
        let (_, out) = host.run(&["status"]);
        assert!(out.contains("Applied notes: none"));
    }

    #[test]
    fn held_lock_fails_apply() {
        let host = Host::new();
        let settings = settings::load(&host.config).unwrap();
        let _held = RunLock::acquire(&settings.lock_path()).unwrap();
        assert_eq!(host.run(&["note", "apply", "swap"]).0, EXIT_FAILED);
        assert_eq!(host.swappiness(), "60");
    }

    #[test]
    fn lock_remove_clears_stale_lock() {
        let host = Host::new();
        let settings = settings::load(&host.config).unwrap();
        std::fs::create_dir_all(&settings.state_dir).unwrap();
        std::fs::write(settings.lock_path(), "12345").unwrap();
        let (code, out) = host.run(&["lock", "remove"]);
        assert_eq!(code, EXIT_OK);
        assert!(out.contains("Lock removed"));
        assert!(!settings.lock_path().exists());
    }

    #[test]
    fn lock_remove_leaves_live_lock_alone() {
        let host = Host::new();
        let settings = settings::load(&host.config).unwrap();
        let _held = RunLock::acquire(&settings.lock_path()).unwrap();
        assert_eq!(host.run(&["lock", "remove"]).0, EXIT_FAILED);
        assert!(settings.lock_path().exists());
    }

    #[test]
    fn note_list_in_json() {
        let host = Host::new();
        let (_, out) = host.run(&["--format", "json", "note", "list"]);
        let rows: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(rows.as_array().unwrap().len(), 4);
        assert_eq!(rows[3]["id"], "swap");
        assert_eq!(rows[3]["applied"], false);
    }
}
