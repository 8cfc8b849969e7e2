//! Orchestration of notes and solutions over the ledger and the live system.
//!
//! The `Tuner` owns everything a run needs: settings, both catalogs, the
//! parameter store, the applied-note order and the system accessor. Mutating
//! operations expect the caller to hold the run lock (see [`Tuner::lock`]).

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::compare::ComparisonReport;
use crate::data::applied::AppliedNotes;
use crate::data::sysconfig::SysconfigFile;
use crate::error::{Result, TuneError};
use crate::infrastructure::{LiveSystem, RunLock, SystemAccessor};
use crate::ledger::{FileBackend, ParameterStore};
use crate::note::custom::CustomNote;
use crate::note::{ApplyOutcome, Note, NoteCatalog, NoteRun, RevertOutcome, TuningContext};
use crate::solution::SolutionCatalog;
use crate::types::config::{CustomNoteDef, Settings};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum NoteResult {
    Applied(ApplyOutcome),
    Reverted(RevertOutcome),
    Failed { error: String },
}


#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteOutcome {
    pub note_id: String,
    #[serde(flatten)]
    pub result: NoteResult,
}


impl NoteOutcome {
    /// Failed, or done with skipped fields.
    pub fn has_warnings(&self) -> bool {
        match &self.result {
            NoteResult::Applied(o) => o.is_partial(),
            NoteResult::Reverted(o) => !o.skipped.is_empty(),
            NoteResult::Failed { .. } => true,
        }
    }
}


/// Per-note results of a multi-note operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchOutcome {
    pub notes: Vec<NoteOutcome>,
}


impl BatchOutcome {
    pub fn has_warnings(&self) -> bool {
        self.notes.iter().any(|n| n.has_warnings())
    }

    fn push(&mut self, note_id: &str, result: NoteResult) {
        self.notes.push(NoteOutcome {
            note_id: note_id.to_string(),
            result,
        });
    }
}


/// Reports of every note checked, plus notes that could not be checked.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub reports: Vec<ComparisonReport>,
    pub failures: Vec<NoteOutcome>,
}


impl VerifyOutcome {
    pub fn compliant(&self) -> bool {
        self.failures.is_empty() && self.reports.iter().all(|r| r.compliant)
    }
}


#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerStatus {
    pub param: String,
    pub start_value: String,
    pub effective_value: String,
    /// Notes that changed the parameter, oldest first.
    pub notes: Vec<String>,
}


#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Status {
    pub applied: Vec<String>,
    pub ledgers: Vec<LedgerStatus>,
}


// ---------------------------------------------------------------------------
// Tuner
// ---------------------------------------------------------------------------

pub struct Tuner {
    settings: Settings,
    notes: NoteCatalog,
    solutions: SolutionCatalog,
    store: ParameterStore,
    applied: AppliedNotes,
    system: Box<dyn SystemAccessor>,
}


impl Tuner {
    /// Tuner over the real host and the on-disk state directory.
    pub fn open(settings: Settings) -> Self {
        let store = ParameterStore::new(Box::new(FileBackend::new(settings.ledger_dir())));
        let system = Box::new(LiveSystem::new(&settings));
        Tuner::with_parts(settings, store, system)
    }

    pub fn with_parts(
        settings: Settings,
        store: ParameterStore,
        system: Box<dyn SystemAccessor>,
    ) -> Self {
        Tuner {
            notes: NoteCatalog::new(&settings.notes),
            solutions: SolutionCatalog::new(&settings.solutions),
            applied: AppliedNotes::load(&settings.applied_path()),
            settings,
            store,
            system,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn notes(&self) -> &NoteCatalog {
        &self.notes
    }

    pub fn solutions(&self) -> &SolutionCatalog {
        &self.solutions
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    /// Applied note IDs, oldest first.
    pub fn applied_notes(&self) -> &[String] {
        self.applied.order()
    }

    /// Take the run lock for this state directory.
    pub fn lock(&self) -> Result<RunLock> {
        RunLock::acquire(&self.settings.lock_path())
    }

    fn context(&self, note_id: &str) -> Result<TuningContext> {
        let mem_total_mb = match self.settings.mem_total_mb {
            Some(mb) => mb,
            None => self.system.mem_total_mb()?,
        };
        let overrides = SysconfigFile::load(&self.settings.override_path(note_id))?;
        Ok(TuningContext::new(mem_total_mb).with_overrides(overrides))
    }

    /// Initialised and optimised run of `note_id`.
    fn prepare(&self, note_id: &str) -> Result<NoteRun> {
        let mut run = NoteRun::new(self.notes.get(note_id)?);
        run.initialise(self.system.as_ref())?;
        run.optimise(&self.context(note_id)?)?;
        Ok(run)
    }

    /// A note that can be reverted. Notes dropped from settings since they
    /// were applied are still known to the ledger by ID.
    fn revertible(&self, note_id: &str) -> Result<Box<dyn Note>> {
        match self.notes.get(note_id) {
            Ok(note) => Ok(note),
            Err(TuneError::UnknownNote(_))
                if self.applied.contains(note_id)
                    || !self.store.params_of(note_id)?.is_empty() =>
            {
                Ok(Box::new(CustomNote::new(CustomNoteDef {
                    id: note_id.to_string(),
                    name: note_id.to_string(),
                    values: Default::default(),
                    reminder: None,
                })))
            }
            Err(e) => Err(e),
        }
    }

    // -------------------------------------------------------------------
    // apply
    // -------------------------------------------------------------------

    pub fn apply_note(&mut self, note_id: &str) -> Result<ApplyOutcome> {
        let mut run = self.prepare(note_id)?;
        let outcome = run.apply(&mut self.store, self.system.as_ref())?;
        self.applied.mark_applied(note_id)?;
        info!(
            note = note_id,
            changed = outcome.changed.len(),
            skipped = outcome.skipped.len(),
            "note applied"
        );
        Ok(outcome)
    }

    pub fn apply_solution(&mut self, name: &str) -> Result<BatchOutcome> {
        let ids = self.solutions.notes(name)?.to_vec();
        let mut batch = BatchOutcome::default();
        for id in ids {
            match self.apply_note(&id) {
                Ok(outcome) => batch.push(&id, NoteResult::Applied(outcome)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(solution = name, note = id.as_str(), error = %e, "note not applied");
                    batch.push(&id, NoteResult::Failed { error: e.to_string() });
                }
            }
        }
        Ok(batch)
    }

    // -------------------------------------------------------------------
    // revert
    // -------------------------------------------------------------------

    pub fn revert_note(&mut self, note_id: &str) -> Result<RevertOutcome> {
        let mut run = NoteRun::new(self.revertible(note_id)?);
        let outcome = run.revert(&mut self.store, self.system.as_ref())?;
        self.applied.mark_reverted(note_id)?;
        info!(
            note = note_id,
            restored = outcome.restored.len(),
            skipped = outcome.skipped.len(),
            "note reverted"
        );
        Ok(outcome)
    }

    fn revert_each(&mut self, ids: &[String], batch: &mut BatchOutcome) -> Result<()> {
        for id in ids {
            match self.revert_note(id) {
                Ok(outcome) => batch.push(id, NoteResult::Reverted(outcome)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(note = id.as_str(), error = %e, "note not reverted");
                    batch.push(id, NoteResult::Failed { error: e.to_string() });
                }
            }
        }
        Ok(())
    }

    /// Revert the notes of `name`, last one first.
    pub fn revert_solution(&mut self, name: &str) -> Result<BatchOutcome> {
        let mut ids = self.solutions.notes(name)?.to_vec();
        ids.reverse();
        let mut batch = BatchOutcome::default();
        self.revert_each(&ids, &mut batch)?;
        Ok(batch)
    }

    /// Revert every applied note, newest first, then any note the ledgers
    /// still mention, then drop whatever ledgers remain.
    pub fn revert_all(&mut self) -> Result<BatchOutcome> {
        let mut batch = BatchOutcome::default();
        let mut ids = self.applied.order().to_vec();
        ids.reverse();
        self.revert_each(&ids, &mut batch)?;

        let mut leftover: Vec<String> = Vec::new();
        for notes in self.store.enumerate()?.values() {
            for id in notes.note_ids().into_iter().rev() {
                if !leftover.iter().any(|l| l == id) {
                    leftover.push(id.to_string());
                }
            }
        }
        if !leftover.is_empty() {
            warn!(notes = ?leftover, "reverting notes missing from the applied list");
            self.revert_each(&leftover, &mut batch)?;
        }

        for param in self.store.enumerate()?.into_keys() {
            warn!(param = param.as_str(), "dropping leftover ledger");
            self.store.discard(&param)?;
        }
        self.applied.clear()?;
        Ok(batch)
    }

    // -------------------------------------------------------------------
    // verify / simulate
    // -------------------------------------------------------------------

    /// Compare the live system against what `note_id` tunes to.
    pub fn verify_note(&self, note_id: &str) -> Result<ComparisonReport> {
        let run = self.prepare(note_id)?;
        match (run.desired(), run.current()) {
            (Some(desired), Some(current)) => Ok(ComparisonReport::build(desired, current)),
            _ => Err(TuneError::InvalidTransition {
                note: note_id.to_string(),
                action: "verify",
                state: run.state().as_str(),
            }),
        }
    }

    /// What applying `note_id` would change. Writes nothing.
    pub fn simulate_note(&self, note_id: &str) -> Result<ComparisonReport> {
        self.verify_note(note_id)
    }

    pub fn verify_notes(&self, ids: &[String]) -> VerifyOutcome {
        let mut out = VerifyOutcome::default();
        for id in ids {
            match self.verify_note(id) {
                Ok(report) => out.reports.push(report),
                Err(e) => {
                    warn!(note = id.as_str(), error = %e, "note not verified");
                    out.failures.push(NoteOutcome {
                        note_id: id.clone(),
                        result: NoteResult::Failed { error: e.to_string() },
                    });
                }
            }
        }
        out
    }

    /// Verify every applied note.
    pub fn verify_all(&self) -> VerifyOutcome {
        self.verify_notes(self.applied.order())
    }

    pub fn verify_solution(&self, name: &str) -> Result<VerifyOutcome> {
        let ids = self.solutions.notes(name)?.to_vec();
        Ok(self.verify_notes(&ids))
    }

    pub fn simulate_solution(&self, name: &str) -> Result<VerifyOutcome> {
        self.verify_solution(name)
    }

    // -------------------------------------------------------------------
    // status
    // -------------------------------------------------------------------

    pub fn status(&self) -> Result<Status> {
        let ledgers = self
            .store
            .enumerate()?
            .into_iter()
            .map(|(param, notes)| LedgerStatus {
                start_value: notes.start_value().unwrap_or_default().to_string(),
                effective_value: notes.effective_value().unwrap_or_default().to_string(),
                notes: notes.note_ids().iter().map(|s| s.to_string()).collect(),
                param,
            })
            .collect();
        Ok(Status {
            applied: self.applied.order().to_vec(),
            ledgers,
        })
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
