//! 2684254: CPU performance settings.
//!
//! Energy/performance bias and the frequency governor, both driven through
//! `cpupower`. Values are per CPU (`all:<v>` or `cpuN:<v> ...`), so they
//! compare as sets.
//!
//! Force latency is tuned through the idle-state `disable` flags: every
//! state slower than the bound is switched off. The ledger keeps the full
//! flag list, so a revert puts back exactly the states that were enabled.

use std::collections::BTreeMap;

use crate::error::{Result, TuneError};
use crate::infrastructure::live::{
    effective_latency, split_idle_value, ENERGY_PERF_BIAS, FORCE_LATENCY, GOVERNOR, IDLE_LATENCY,
    IDLE_STATES,
};
use crate::infrastructure::SystemAccessor;
use crate::types::comparison::{FieldValue, NoteField, ValueKind};

use super::{Note, TuningContext};

pub const ID: &str = "2684254";
const NAME: &str = "CPU performance settings for SAP workloads";

pub const OVERRIDE_PERF_BIAS: &str = "ENERGY_PERF_BIAS";
pub const OVERRIDE_GOVERNOR: &str = "GOVERNOR";
pub const OVERRIDE_FORCE_LATENCY: &str = "FORCE_LATENCY";

/// Microseconds.
const DEFAULT_FORCE_LATENCY: u64 = 70;

const PERF_BIAS_KEY: &str = "energy_perf_bias";
const GOVERNOR_KEY: &str = "governor";
const FORCE_LATENCY_KEY: &str = "force_latency";
const IDLE_STATES_KEY: &str = "idle_states";
const HAS_DIFFS: &str = "hasDiffs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuPerformance {
    perf_bias: FieldValue,
    governor: FieldValue,
    force_latency: FieldValue,
    idle_states: FieldValue,
    /// `cpuN:stateM:<latency>` as captured; not compared.
    idle_latency: String,
    perf_bias_override: Option<String>,
    governor_override: Option<String>,
    force_latency_override: Option<u64>,
}

impl Default for CpuPerformance {
    fn default() -> Self {
        CpuPerformance {
            perf_bias: FieldValue::Absent,
            governor: FieldValue::Absent,
            force_latency: FieldValue::Absent,
            idle_states: FieldValue::Absent,
            idle_latency: String::new(),
            perf_bias_override: None,
            governor_override: None,
            force_latency_override: None,
        }
    }
}

/// Whether a per-CPU value lists CPUs that disagree.
fn has_diffs(value: &FieldValue) -> bool {
    match value {
        FieldValue::Text(s) => !s.trim().is_empty() && !s.trim().starts_with("all:"),
        _ => false,
    }
}

/// Desired value: unsupported stays unsupported, otherwise every CPU gets
/// the same setting.
fn desired(current: &FieldValue, setting: &str) -> FieldValue {
    if current.is_sentinel() {
        current.clone()
    } else {
        FieldValue::text(format!("all:{}", setting))
    }
}

/// Whether CPUs carry different idle-state flag patterns.
fn states_differ(value: &FieldValue) -> bool {
    let text = match value {
        FieldValue::Text(s) if !value.is_sentinel() => s,
        _ => return false,
    };
    let mut per_cpu: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (cpu, state, flag) in split_idle_value(text) {
        per_cpu.entry(cpu).or_default().push(format!("{}:{}", state, flag));
    }
    let mut patterns = per_cpu.values();
    match patterns.next() {
        Some(first) => patterns.any(|p| p != first),
        None => false,
    }
}

/// Idle-state flags for latency bound `bound`, plus the latency the host
/// will then report. `None` when idle states are not supported.
fn desired_idle(
    states: &FieldValue,
    latencies: &str,
    bound: u64,
) -> Option<(FieldValue, FieldValue)> {
    let text = match states {
        FieldValue::Text(s) if !states.is_sentinel() => s,
        _ => return None,
    };
    let latency: BTreeMap<(String, String), u64> = split_idle_value(latencies)
        .into_iter()
        .filter_map(|(cpu, state, lat)| lat.parse::<u64>().ok().map(|lat| ((cpu, state), lat)))
        .collect();

    let mut flags = Vec::new();
    let mut effective = Vec::new();
    for (cpu, state, current) in split_idle_value(text) {
        let lat = latency.get(&(cpu.clone(), state.clone())).copied();
        let flag = match lat {
            Some(lat) if lat > bound => "1".to_string(),
            Some(_) => "0".to_string(),
            None => current,
        };
        effective.push((lat.unwrap_or(0), flag == "1"));
        flags.push(format!("{}:{}:{}", cpu, state, flag));
    }
    Some((
        FieldValue::text(flags.join(" ")),
        FieldValue::text(effective_latency(&effective).to_string()),
    ))
}

impl Note for CpuPerformance {
    fn id(&self) -> &str {
        ID
    }

    fn name(&self) -> &str {
        NAME
    }

    fn initialise(&self, system: &dyn SystemAccessor) -> Result<Box<dyn Note>> {
        Ok(Box::new(CpuPerformance {
            perf_bias: system.read_value(ENERGY_PERF_BIAS)?.into(),
            governor: system.read_value(GOVERNOR)?.into(),
            force_latency: system.read_value(FORCE_LATENCY)?.into(),
            idle_states: system.read_value(IDLE_STATES)?.into(),
            idle_latency: system.read_value(IDLE_LATENCY)?,
            ..CpuPerformance::default()
        }))
    }

    fn optimise(&self, ctx: &TuningContext) -> Result<Box<dyn Note>> {
        let conf = &ctx.overrides;

        let bias_override = match conf.get_string(OVERRIDE_PERF_BIAS) {
            Some(v) => match v.parse::<u8>() {
                Ok(n) if n <= 15 => Some(n.to_string()),
                _ => {
                    return Err(TuneError::ConfigInvalid {
                        path: conf.path().to_path_buf(),
                        reason: format!(
                            "{} is '{}', expected an integer 0..15",
                            OVERRIDE_PERF_BIAS, v
                        ),
                    })
                }
            },
            None => None,
        };
        let governor_override = match conf.get_string(OVERRIDE_GOVERNOR) {
            Some(v) if v.split_whitespace().count() == 1 => Some(v.to_string()),
            Some(v) => {
                return Err(TuneError::ConfigInvalid {
                    path: conf.path().to_path_buf(),
                    reason: format!("{} is '{}', expected one governor name", OVERRIDE_GOVERNOR, v),
                })
            }
            None => None,
        };
        let latency_override = match conf.get_string(OVERRIDE_FORCE_LATENCY) {
            Some(_) => Some(conf.get_int(OVERRIDE_FORCE_LATENCY, DEFAULT_FORCE_LATENCY)?),
            None => None,
        };
        let (idle_states, force_latency) = desired_idle(
            &self.idle_states,
            &self.idle_latency,
            latency_override.unwrap_or(DEFAULT_FORCE_LATENCY),
        )
        .unwrap_or_else(|| (self.idle_states.clone(), self.force_latency.clone()));

        Ok(Box::new(CpuPerformance {
            perf_bias: desired(&self.perf_bias, bias_override.as_deref().unwrap_or("0")),
            governor: desired(
                &self.governor,
                governor_override.as_deref().unwrap_or("performance"),
            ),
            force_latency,
            idle_states,
            idle_latency: self.idle_latency.clone(),
            perf_bias_override: bias_override,
            governor_override,
            force_latency_override: latency_override,
        }))
    }

    fn fields(&self) -> Vec<NoteField> {
        let mut fields = vec![
            NoteField::tunable(
                "EnergyPerfBias",
                PERF_BIAS_KEY,
                ENERGY_PERF_BIAS,
                self.perf_bias.clone(),
                ValueKind::Set,
            ),
            NoteField::tunable(
                "Governor",
                GOVERNOR_KEY,
                GOVERNOR,
                self.governor.clone(),
                ValueKind::Set,
            ),
            NoteField::observed(
                "ForceLatency",
                FORCE_LATENCY_KEY,
                self.force_latency.clone(),
                ValueKind::Scalar,
            ),
            NoteField::tunable(
                "IdleStates",
                IDLE_STATES_KEY,
                IDLE_STATES,
                self.idle_states.clone(),
                ValueKind::Set,
            ),
        ];
        if has_diffs(&self.perf_bias) {
            fields.push(NoteField::inform(PERF_BIAS_KEY, HAS_DIFFS));
        }
        if has_diffs(&self.governor) {
            fields.push(NoteField::inform(GOVERNOR_KEY, HAS_DIFFS));
        }
        if states_differ(&self.idle_states) {
            fields.push(NoteField::inform(FORCE_LATENCY_KEY, HAS_DIFFS));
        }
        if let Some(v) = &self.perf_bias_override {
            fields.push(NoteField::override_for(PERF_BIAS_KEY, &format!("all:{}", v)));
        }
        if let Some(v) = &self.governor_override {
            fields.push(NoteField::override_for(GOVERNOR_KEY, &format!("all:{}", v)));
        }
        if let Some(v) = self.force_latency_override {
            fields.push(NoteField::override_for(FORCE_LATENCY_KEY, &v.to_string()));
        }
        fields
    }
}
