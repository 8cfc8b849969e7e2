//! Accessor for the real host: sysfs, procfs and `cpupower`.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Result, TuneError};
use crate::types::comparison::{is_sentinel, NOT_APPLICABLE, UNSUPPORTED};
use crate::types::config::Settings;

use super::runner::{CommandRunner, ProcessRunner};
use super::SystemAccessor;

pub const ENERGY_PERF_BIAS: &str = "cpu:energy_perf_bias";
pub const GOVERNOR: &str = "cpu:governor";
/// Wake-up latency bound implied by the enabled idle states.
pub const FORCE_LATENCY: &str = "cpu:force_latency";
/// `cpuN:stateM:<disable>` for every idle state of every online CPU.
pub const IDLE_STATES: &str = "cpu:idle_states";
/// `cpuN:stateM:<latency>`, read-only.
pub const IDLE_LATENCY: &str = "cpu:idle_latency";
const SYS_PREFIX: &str = "sys:";
const CPU_DIR: &str = "devices/system/cpu";
const EFI_VARS_DIR: &str = "firmware/efi/efivars";

const PERF_BIAS_UNSUPPORTED: [&str; 2] = [
    "System does not support Intel's performance bias setting",
    "Subcommand not supported on POWER.",
];

pub struct LiveSystem {
    proc_root: PathBuf,
    sys_root: PathBuf,
    cpupower: PathBuf,
    runner: Box<dyn CommandRunner>,
}

impl LiveSystem {
    pub fn new(settings: &Settings) -> Self {
        LiveSystem::with_runner(settings, Box::new(ProcessRunner))
    }

    pub fn with_runner(settings: &Settings, runner: Box<dyn CommandRunner>) -> Self {
        LiveSystem {
            proc_root: settings.proc_root.clone(),
            sys_root: settings.sys_root.clone(),
            cpupower: settings.cpupower.clone(),
            runner,
        }
    }

    fn sysctl_path(&self, key: &str) -> PathBuf {
        self.proc_root.join("sys").join(key.replace('.', "/"))
    }

    fn cpu_dir(&self) -> PathBuf {
        self.sys_root.join(CPU_DIR)
    }

    // -------------------------------------------------------------------
    // plain files
    // -------------------------------------------------------------------

    /// Trimmed file content, or `NA` when the file does not exist.
    fn read_file(&self, id: &str, path: &Path) -> Result<String> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(content.trim().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(param = id, path = %path.display(), "parameter not present");
                Ok(NOT_APPLICABLE.to_string())
            }
            Err(e) => Err(TuneError::ReadFailure {
                param: id.to_string(),
                reason: format!("{}: {}", path.display(), e),
            }),
        }
    }

    fn write_file(&self, id: &str, path: &Path, value: &str) -> Result<()> {
        fs::write(path, value).map_err(|e| TuneError::WriteFailure {
            param: id.to_string(),
            value: value.to_string(),
            reason: format!("{}: {}", path.display(), e),
        })
    }

    // -------------------------------------------------------------------
    // cpupower
    // -------------------------------------------------------------------

    fn cpupower(&self, args: &[&str]) -> std::result::Result<String, String> {
        self.runner.run(&self.cpupower, args)
    }

    fn read_perf_bias(&self) -> Result<String> {
        if !self.cpupower.exists() {
            warn!(cmd = %self.cpupower.display(), "cpupower not found");
            return Ok(UNSUPPORTED.to_string());
        }
        let output = match self.cpupower(&["-c", "all", "info", "-b"]) {
            Ok(out) if !PERF_BIAS_UNSUPPORTED.iter().any(|m| out.contains(m)) => out,
            Ok(_) => {
                self.warn_perf_bias_unsupported("not supported by the cpu");
                return Ok(UNSUPPORTED.to_string());
            }
            Err(e) => {
                self.warn_perf_bias_unsupported(&e);
                return Ok(UNSUPPORTED.to_string());
            }
        };
        parse_perf_bias(&output).map_err(|reason| TuneError::ReadFailure {
            param: ENERGY_PERF_BIAS.to_string(),
            reason,
        })
    }

    fn warn_perf_bias_unsupported(&self, cause: &str) {
        if self.secure_boot_enabled() {
            warn!(cause, "cannot set perf bias while SecureBoot is enabled, skipping");
        } else {
            warn!(cause, "perf bias settings not supported by the system");
        }
    }

    /// Lockdown check: the first `SecureBoot-*` EFI variable ends in 1.
    fn secure_boot_enabled(&self) -> bool {
        let dir = self.sys_root.join(EFI_VARS_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => {
                debug!(dir = %dir.display(), "no EFI variables, assuming legacy boot");
                return false;
            }
        };
        let pattern = match Regex::new(r"^SecureBoot-\w[\w-]+") {
            Ok(re) => re,
            Err(_) => return false,
        };
        let mut names: Vec<String> = entries
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| pattern.is_match(name))
            .collect();
        names.sort();
        let name = match names.first() {
            Some(name) => name,
            None => {
                debug!(dir = %dir.display(), "no SecureBoot variable, assuming legacy boot");
                return false;
            }
        };
        match fs::read(dir.join(name)) {
            Ok(content) => content.last() == Some(&1),
            Err(e) => {
                debug!(file = name.as_str(), error = %e, "cannot read SecureBoot variable");
                false
            }
        }
    }

    fn write_perf_bias(&self, value: &str) -> Result<()> {
        for (cpu, bias) in split_cpu_value(value) {
            if bias == "none" {
                continue;
            }
            self.cpupower(&["-c", cpu.as_str(), "set", "-b", bias.as_str()])
                .map_err(|reason| TuneError::WriteFailure {
                    param: ENERGY_PERF_BIAS.to_string(),
                    value: value.to_string(),
                    reason,
                })?;
        }
        Ok(())
    }

    /// Online CPUs by number. cpu0 has no `online` file and is always up.
    fn online_cpus(&self, id: &str) -> Result<Vec<u32>> {
        let dir = self.cpu_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(TuneError::ReadFailure {
                    param: id.to_string(),
                    reason: format!("{}: {}", dir.display(), e),
                })
            }
        };
        let mut cpus = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let num = match name.strip_prefix("cpu").and_then(|n| n.parse::<u32>().ok()) {
                Some(num) => num,
                None => continue,
            };
            let online = num == 0
                || fs::read_to_string(dir.join(&name).join("online"))
                    .map(|v| v.trim() == "1")
                    .unwrap_or(false);
            if online {
                cpus.push(num);
            } else {
                debug!(cpu = name.as_str(), "skipping offline cpu");
            }
        }
        cpus.sort_unstable();
        Ok(cpus)
    }

    fn governor_file(&self, cpu: &str, file: &str) -> PathBuf {
        self.cpu_dir().join(cpu).join("cpufreq").join(file)
    }

    fn read_governor(&self) -> Result<String> {
        if !self.governor_file("cpu0", "scaling_governor").exists() {
            return Ok(UNSUPPORTED.to_string());
        }
        let mut per_cpu = BTreeMap::new();
        for num in self.online_cpus(GOVERNOR)? {
            let path = self.governor_file(&format!("cpu{}", num), "scaling_governor");
            let gov = match fs::read_to_string(&path) {
                Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
                _ => "none".to_string(),
            };
            per_cpu.insert(num, gov);
        }
        if per_cpu.is_empty() {
            return Ok(UNSUPPORTED.to_string());
        }
        Ok(join_cpu_values(&per_cpu))
    }

    fn write_governor(&self, value: &str) -> Result<()> {
        for (cpu, gov) in split_cpu_value(value) {
            if gov == "none" {
                continue;
            }
            let sample_cpu = if cpu == "all" {
                "cpu0".to_string()
            } else {
                format!("cpu{}", cpu)
            };
            let available =
                fs::read_to_string(self.governor_file(&sample_cpu, "scaling_available_governors"))
                    .unwrap_or_default();
            if !available.split_whitespace().any(|g| g == gov) {
                return Err(TuneError::WriteFailure {
                    param: GOVERNOR.to_string(),
                    value: value.to_string(),
                    reason: format!("'{}' is not an available governor for {}", gov, sample_cpu),
                });
            }
            self.cpupower(&["-c", cpu.as_str(), "frequency-set", "-g", gov.as_str()])
                .map_err(|reason| TuneError::WriteFailure {
                    param: GOVERNOR.to_string(),
                    value: value.to_string(),
                    reason,
                })?;
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------
// idle states
// -----------------------------------------------------------------------

struct IdleState {
    cpu: u32,
    state: u32,
    latency: u64,
    disable: String,
}

impl IdleState {
    fn name(&self) -> String {
        format!("cpu{}:state{}", self.cpu, self.state)
    }
}

impl LiveSystem {
    fn idle_state_dir(&self, cpu: &str, state: &str) -> PathBuf {
        self.cpu_dir().join(cpu).join("cpuidle").join(state)
    }

    /// Whether idle states can be steered at all: an x86-style cpuidle
    /// driver is active and cpu0 is present.
    fn supports_idle_states(&self) -> bool {
        if cfg!(target_arch = "powerpc64") {
            debug!("latency settings not relevant on this architecture");
            return false;
        }
        if !self.cpu_dir().join("cpu0").exists() {
            warn!("latency settings not supported by the system");
            return false;
        }
        let driver_file = self.cpu_dir().join("cpuidle").join("current_driver");
        match fs::read_to_string(&driver_file) {
            Ok(driver) if !driver.trim().is_empty() && driver.trim() != "none" => true,
            _ => {
                warn!("latency settings not supported by the system, no active cpuidle driver");
                false
            }
        }
    }

    /// Idle states of the online CPUs, or `None` when unsupported.
    fn idle_states(&self, id: &str) -> Result<Option<Vec<IdleState>>> {
        if !self.supports_idle_states() {
            return Ok(None);
        }
        let mut states = Vec::new();
        for cpu in self.online_cpus(id)? {
            let dir = self.cpu_dir().join(format!("cpu{}", cpu)).join("cpuidle");
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                let state = match name.strip_prefix("state").and_then(|n| n.parse::<u32>().ok()) {
                    Some(state) => state,
                    None => continue,
                };
                let path = entry.path();
                let disable = fs::read_to_string(path.join("disable"))
                    .map(|v| v.trim().to_string())
                    .unwrap_or_default();
                let latency = fs::read_to_string(path.join("latency"))
                    .ok()
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0);
                states.push(IdleState {
                    cpu,
                    state,
                    latency,
                    disable,
                });
            }
        }
        if states.is_empty() {
            return Ok(None);
        }
        states.sort_by_key(|s| (s.cpu, s.state));
        Ok(Some(states))
    }

    fn read_idle(&self, id: &str, column: impl Fn(&IdleState) -> String) -> Result<String> {
        Ok(match self.idle_states(id)? {
            Some(states) => states
                .iter()
                .map(|s| format!("{}:{}", s.name(), column(s)))
                .collect::<Vec<_>>()
                .join(" "),
            None => UNSUPPORTED.to_string(),
        })
    }

    fn read_force_latency(&self) -> Result<String> {
        Ok(match self.idle_states(FORCE_LATENCY)? {
            Some(states) => effective_latency(
                &states
                    .iter()
                    .map(|s| (s.latency, s.disable == "1"))
                    .collect::<Vec<_>>(),
            )
            .to_string(),
            None => UNSUPPORTED.to_string(),
        })
    }

    /// Disable every idle state slower than `value` microseconds and
    /// re-enable the faster ones.
    fn write_force_latency(&self, value: &str) -> Result<()> {
        let bound: u64 = value.trim().parse().map_err(|_| TuneError::WriteFailure {
            param: FORCE_LATENCY.to_string(),
            value: value.to_string(),
            reason: "expected a latency in microseconds".to_string(),
        })?;
        let states = match self.idle_states(FORCE_LATENCY)? {
            Some(states) => states,
            None => return Ok(()),
        };
        for s in states {
            let flag = if s.latency > bound {
                "1"
            } else if s.disable == "1" {
                "0"
            } else {
                continue;
            };
            let path = self
                .idle_state_dir(&format!("cpu{}", s.cpu), &format!("state{}", s.state))
                .join("disable");
            self.write_file(FORCE_LATENCY, &path, flag)?;
        }
        Ok(())
    }

    /// Write back `cpuN:stateM:<disable>` entries. States of CPUs that have
    /// gone offline are left alone.
    fn write_idle_states(&self, value: &str) -> Result<()> {
        if is_sentinel(value) {
            return Ok(());
        }
        for (cpu, state, flag) in split_idle_value(value) {
            let valid = cpu.strip_prefix("cpu").map_or(false, |n| n.parse::<u32>().is_ok())
                && state.strip_prefix("state").map_or(false, |n| n.parse::<u32>().is_ok());
            if !valid {
                return Err(TuneError::WriteFailure {
                    param: IDLE_STATES.to_string(),
                    value: value.to_string(),
                    reason: format!("bad idle state '{}:{}'", cpu, state),
                });
            }
            let dir = self.idle_state_dir(&cpu, &state);
            if !dir.exists() {
                debug!(cpu = cpu.as_str(), state = state.as_str(), "idle state gone, skipping");
                continue;
            }
            self.write_file(IDLE_STATES, &dir.join("disable"), &flag)?;
        }
        Ok(())
    }
}

impl SystemAccessor for LiveSystem {
    fn read_value(&self, id: &str) -> Result<String> {
        match id {
            ENERGY_PERF_BIAS => self.read_perf_bias(),
            GOVERNOR => self.read_governor(),
            FORCE_LATENCY => self.read_force_latency(),
            IDLE_STATES => self.read_idle(id, |s| s.disable.clone()),
            IDLE_LATENCY => self.read_idle(id, |s| s.latency.to_string()),
            _ => match id.strip_prefix(SYS_PREFIX) {
                Some(rel) => {
                    let raw = self.read_file(id, &self.sys_root.join(rel))?;
                    Ok(selected_choice(&raw))
                }
                None => self.read_file(id, &self.sysctl_path(id)),
            },
        }
    }

    fn write_value(&self, id: &str, value: &str) -> Result<()> {
        debug!(param = id, value, "writing live value");
        match id {
            ENERGY_PERF_BIAS => self.write_perf_bias(value),
            GOVERNOR => self.write_governor(value),
            FORCE_LATENCY => self.write_force_latency(value),
            IDLE_STATES => self.write_idle_states(value),
            IDLE_LATENCY => Err(TuneError::WriteFailure {
                param: id.to_string(),
                value: value.to_string(),
                reason: "read-only".to_string(),
            }),
            _ => match id.strip_prefix(SYS_PREFIX) {
                Some(rel) => self.write_file(id, &self.sys_root.join(rel), value),
                None => self.write_file(id, &self.sysctl_path(id), value),
            },
        }
    }

    fn mem_total_mb(&self) -> Result<u64> {
        let path = self.proc_root.join("meminfo");
        let content = fs::read_to_string(&path).map_err(|e| TuneError::io(&path, e))?;
        parse_mem_total_mb(&content).ok_or_else(|| TuneError::ReadFailure {
            param: "MemTotal".to_string(),
            reason: format!("no MemTotal line in {}", path.display()),
        })
    }
}

/// `always madvise [never]` reads as `never`; anything else as-is.
pub fn selected_choice(raw: &str) -> String {
    match (raw.find('['), raw.find(']')) {
        (Some(open), Some(close)) if open < close => raw[open + 1..close].to_string(),
        _ => raw.trim().to_string(),
    }
}

/// Split `all:v` or `cpu0:a cpu1:b` into (cpu selector, value) pairs, where
/// the selector is `all` or the bare CPU number.
pub fn split_cpu_value(value: &str) -> Vec<(String, String)> {
    value
        .split_whitespace()
        .filter_map(|entry| entry.split_once(':'))
        .map(|(cpu, v)| {
            let cpu = cpu.strip_prefix("cpu").unwrap_or(cpu);
            (cpu.to_string(), v.to_string())
        })
        .collect()
}

/// `all:v` when every CPU agrees, else `cpu0:a cpu1:b ...`.
pub fn join_cpu_values(per_cpu: &BTreeMap<u32, String>) -> String {
    let mut values = per_cpu.values();
    if let Some(first) = values.next() {
        if values.all(|v| v == first) {
            return format!("all:{}", first);
        }
    }
    per_cpu
        .iter()
        .map(|(cpu, v)| format!("cpu{}:{}", cpu, v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split `cpu0:state1:0 cpu0:state2:1` into (cpu, state, value) triples.
pub fn split_idle_value(value: &str) -> Vec<(String, String, String)> {
    value
        .split_whitespace()
        .filter_map(|entry| {
            let mut parts = entry.splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(cpu), Some(state), Some(v)) => {
                    Some((cpu.to_string(), state.to_string(), v.to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

/// Latency bound implied by `(latency, disabled)` idle states in CPU/state
/// order: the last enabled state's latency once anything is disabled, the
/// largest latency otherwise.
pub fn effective_latency(states: &[(u64, bool)]) -> u64 {
    if !states.iter().any(|&(_, disabled)| disabled) {
        return states.iter().map(|&(lat, _)| lat).max().unwrap_or(0);
    }
    states
        .iter()
        .filter(|&&(_, disabled)| !disabled)
        .map(|&(lat, _)| lat)
        .last()
        .unwrap_or(0)
}

fn parse_perf_bias(output: &str) -> std::result::Result<String, String> {
    let cpu_re = Regex::new(r"analyzing CPU (\d+)").map_err(|e| e.to_string())?;
    let bias_re = Regex::new(r"perf-bias:\s*(\d+)").map_err(|e| e.to_string())?;

    let mut per_cpu = BTreeMap::new();
    let mut current: Option<u32> = None;
    for line in output.lines() {
        if let Some(caps) = cpu_re.captures(line) {
            current = caps[1].parse().ok();
        } else if let Some(caps) = bias_re.captures(line) {
            let cpu = current.unwrap_or(per_cpu.len() as u32);
            per_cpu.insert(cpu, caps[1].to_string());
        }
    }
    if per_cpu.is_empty() {
        return Err(format!("unexpected cpupower output: '{}'", output.trim()));
    }
    Ok(join_cpu_values(&per_cpu))
}

fn parse_mem_total_mb(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|l| l.starts_with("MemTotal:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb / 1024)
}
