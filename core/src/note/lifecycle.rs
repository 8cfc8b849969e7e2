//! Per-note lifecycle: initialise, optimise, apply, revert.
//!
//! ```text
//! Uninitialised -> Initialised -> Optimised -> Applied -> Reverted
//!       |                                                    ^
//!       +----------------------------------------------------+
//! ```
//!
//! Reverting straight from `Uninitialised` is how a later run undoes a note
//! applied by an earlier one: the ledger already knows what to restore.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::compare::values_match;
use crate::error::{Result, TuneError};
use crate::infrastructure::SystemAccessor;
use crate::ledger::ParameterStore;
use crate::types::comparison::NoteField;
use crate::types::parameter::START_ID;

use super::{Note, TuningContext};

// ---------------------------------------------------------------------------
// NoteState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteState {
    Uninitialised,
    Initialised,
    Optimised,
    Applied,
    Reverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Initialise,
    Optimise,
    Apply,
    Revert,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Initialise => "initialise",
            Action::Optimise => "optimise",
            Action::Apply => "apply",
            Action::Revert => "revert",
        }
    }
}

impl NoteState {
    pub fn as_str(self) -> &'static str {
        match self {
            NoteState::Uninitialised => "uninitialised",
            NoteState::Initialised => "initialised",
            NoteState::Optimised => "optimised",
            NoteState::Applied => "applied",
            NoteState::Reverted => "reverted",
        }
    }

    fn next(self, note: &str, action: Action) -> Result<NoteState> {
        match (self, action) {
            (NoteState::Uninitialised, Action::Initialise) => Ok(NoteState::Initialised),
            (NoteState::Initialised, Action::Optimise) => Ok(NoteState::Optimised),
            (NoteState::Optimised, Action::Apply) => Ok(NoteState::Applied),
            (NoteState::Applied, Action::Revert) => Ok(NoteState::Reverted),
            (NoteState::Uninitialised, Action::Revert) => Ok(NoteState::Reverted),
            (state, action) => Err(TuneError::InvalidTransition {
                note: note.to_string(),
                action: action.as_str(),
                state: state.as_str(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// A live value that was changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParamChange {
    pub param: String,
    pub old_value: String,
    pub new_value: String,
}

/// A field that was left alone, and why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedField {
    pub param: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub changed: Vec<ParamChange>,
    /// Unsupported parameters and failed writes. Non-empty means the note
    /// was only partly applied.
    pub skipped: Vec<SkippedField>,
}

impl ApplyOutcome {
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevertOutcome {
    pub restored: Vec<ParamChange>,
    pub skipped: Vec<SkippedField>,
}

// ---------------------------------------------------------------------------
// NoteRun
// ---------------------------------------------------------------------------

/// One note going through its lifecycle within a single run.
pub struct NoteRun {
    template: Box<dyn Note>,
    state: NoteState,
    current: Option<Box<dyn Note>>,
    desired: Option<Box<dyn Note>>,
}

impl NoteRun {
    pub fn new(note: Box<dyn Note>) -> Self {
        NoteRun {
            template: note,
            state: NoteState::Uninitialised,
            current: None,
            desired: None,
        }
    }

    pub fn id(&self) -> &str {
        self.template.id()
    }

    pub fn name(&self) -> &str {
        self.template.name()
    }

    pub fn state(&self) -> NoteState {
        self.state
    }

    /// Live values captured at initialise.
    pub fn current(&self) -> Option<&dyn Note> {
        self.current.as_deref()
    }

    /// Values computed by optimise.
    pub fn desired(&self) -> Option<&dyn Note> {
        self.desired.as_deref()
    }

    pub fn initialise(&mut self, system: &dyn SystemAccessor) -> Result<()> {
        let next = self.state.next(self.id(), Action::Initialise)?;
        let current = self.template.initialise(system)?;
        debug!(note = self.id(), "initialised");
        self.current = Some(current);
        self.state = next;
        Ok(())
    }

    pub fn optimise(&mut self, ctx: &TuningContext) -> Result<()> {
        let next = self.state.next(self.id(), Action::Optimise)?;
        let desired = match &self.current {
            Some(current) => current.optimise(ctx)?,
            None => return Err(self.invalid(Action::Optimise)),
        };
        debug!(note = self.id(), "optimised");
        self.desired = Some(desired);
        self.state = next;
        Ok(())
    }

    /// Write every field that differs from its captured value, recording the
    /// change in the ledger. Failures skip the field; the run goes on.
    pub fn apply(
        &mut self,
        store: &mut ParameterStore,
        system: &dyn SystemAccessor,
    ) -> Result<ApplyOutcome> {
        let next = self.state.next(self.id(), Action::Apply)?;
        let (current, desired) = match (&self.current, &self.desired) {
            (Some(c), Some(d)) => (c.fields(), d.fields()),
            _ => return Err(self.invalid(Action::Apply)),
        };
        let note_id = self.id().to_string();

        let mut outcome = ApplyOutcome::default();
        for field in desired.iter().filter(|f| f.param.is_some()) {
            let param = match &field.param {
                Some(p) => p.as_str(),
                None => continue,
            };
            if field.value.is_empty() {
                continue;
            }
            let captured = match captured_field(&current, field) {
                Some(c) => c,
                None => {
                    outcome.skipped.push(skip(param, "no captured value"));
                    continue;
                }
            };
            if captured.value.is_sentinel() {
                debug!(note = note_id.as_str(), param, value = %captured.value, "unsupported, skipping");
                outcome
                    .skipped
                    .push(skip(param, &format!("unsupported ({})", captured.value)));
                continue;
            }
            if values_match(field.kind, &field.value, &captured.value) {
                continue;
            }

            let old_value = captured.value.as_value_string();
            let new_value = field.value.as_value_string();
            if let Err(e) = store.init_start(param, &old_value) {
                warn!(note = note_id.as_str(), param, error = %e, "cannot record start value, skipping");
                outcome.skipped.push(skip(param, &e.to_string()));
                continue;
            }
            if let Err(e) = system.write_value(param, &new_value) {
                warn!(note = note_id.as_str(), param, error = %e, "write failed, skipping");
                outcome.skipped.push(skip(param, &e.to_string()));
                if store.load(param).only_start() {
                    if let Err(e) = store.revert(param, START_ID) {
                        warn!(param, error = %e, "cannot drop unused ledger");
                    }
                }
                continue;
            }
            if let Err(e) = store.push(param, &new_value, &note_id) {
                warn!(note = note_id.as_str(), param, error = %e, "value written but not recorded");
                outcome.skipped.push(skip(param, &e.to_string()));
                continue;
            }
            info!(note = note_id.as_str(), param, from = old_value.as_str(), to = new_value.as_str(), "applied");
            outcome.changed.push(ParamChange {
                param: param.to_string(),
                old_value,
                new_value,
            });
        }

        self.state = next;
        Ok(outcome)
    }

    /// Pop this note from every ledger that holds it and write back the value
    /// that preceded it. Each ledger is consulted on its own, so notes need
    /// not be reverted in reverse order.
    pub fn revert(
        &mut self,
        store: &mut ParameterStore,
        system: &dyn SystemAccessor,
    ) -> Result<RevertOutcome> {
        let next = self.state.next(self.id(), Action::Revert)?;
        let note_id = self.id().to_string();

        let mut outcome = RevertOutcome::default();
        for param in store.params_of(&note_id)? {
            let old_value = store.effective_value(&param).unwrap_or_default();
            let restored = match store.revert(&param, &note_id) {
                Ok(Some(v)) => v,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        note = note_id.as_str(),
                        param = param.as_str(),
                        error = %e,
                        "ledger update failed, not restored"
                    );
                    outcome.skipped.push(skip(&param, &e.to_string()));
                    continue;
                }
            };
            if let Err(e) = system.write_value(&param, &restored) {
                warn!(note = note_id.as_str(), param = param.as_str(), error = %e, "restore failed");
                outcome.skipped.push(skip(&param, &e.to_string()));
                continue;
            }
            info!(note = note_id.as_str(), param = param.as_str(), to = restored.as_str(), "restored");
            outcome.restored.push(ParamChange {
                param,
                old_value,
                new_value: restored,
            });
        }

        self.state = next;
        Ok(outcome)
    }

    fn invalid(&self, action: Action) -> TuneError {
        TuneError::InvalidTransition {
            note: self.id().to_string(),
            action: action.as_str(),
            state: self.state.as_str(),
        }
    }
}

fn captured_field<'a>(current: &'a [NoteField], desired: &NoteField) -> Option<&'a NoteField> {
    current
        .iter()
        .find(|f| f.param == desired.param && f.field == desired.field && f.key == desired.key)
}

fn skip(param: &str, reason: &str) -> SkippedField {
    SkippedField {
        param: param.to_string(),
        reason: reason.to_string(),
    }
}
