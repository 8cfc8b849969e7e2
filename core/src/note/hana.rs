//! 2205917: recommended OS settings for SAP HANA.
//!
//! Turns off kernel memory management features that add overhead for
//! in-memory databases: transparent huge pages, KSM and automatic NUMA
//! balancing.

use crate::error::Result;
use crate::infrastructure::SystemAccessor;
use crate::types::comparison::{FieldValue, NoteField, ValueKind};

use super::{Note, TuningContext};

pub const ID: &str = "2205917";
const NAME: &str = "SAP HANA DB: Recommended OS settings";

pub const THP: &str = "sys:kernel/mm/transparent_hugepage/enabled";
pub const KSM: &str = "sys:kernel/mm/ksm/run";
pub const NUMA_BALANCING: &str = "kernel.numa_balancing";

const REMINDER: &str = "Check that NUMA is enabled in the BIOS and that the \
    SAP HANA instance memory fits the local NUMA nodes.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HanaOsSettings {
    thp: FieldValue,
    ksm: FieldValue,
    numa_balancing: FieldValue,
}

impl Default for HanaOsSettings {
    fn default() -> Self {
        HanaOsSettings {
            thp: FieldValue::Absent,
            ksm: FieldValue::Absent,
            numa_balancing: FieldValue::Absent,
        }
    }
}

impl Note for HanaOsSettings {
    fn id(&self) -> &str {
        ID
    }

    fn name(&self) -> &str {
        NAME
    }

    fn initialise(&self, system: &dyn SystemAccessor) -> Result<Box<dyn Note>> {
        Ok(Box::new(HanaOsSettings {
            thp: system.read_value(THP)?.into(),
            ksm: system.read_value(KSM)?.into(),
            numa_balancing: system.read_value(NUMA_BALANCING)?.into(),
        }))
    }

    fn optimise(&self, _ctx: &TuningContext) -> Result<Box<dyn Note>> {
        Ok(Box::new(HanaOsSettings {
            thp: FieldValue::text("never"),
            ksm: FieldValue::Number(0),
            numa_balancing: FieldValue::Number(0),
        }))
    }

    fn fields(&self) -> Vec<NoteField> {
        vec![
            NoteField::tunable(
                "KernelMMTransparentHugepage",
                "THP",
                THP,
                self.thp.clone(),
                ValueKind::Scalar,
            ),
            NoteField::tunable("KernelMMKsm", "KSM", KSM, self.ksm.clone(), ValueKind::Scalar),
            NoteField::tunable(
                "KernelNumaBalancing",
                NUMA_BALANCING,
                NUMA_BALANCING,
                self.numa_balancing.clone(),
                ValueKind::Scalar,
            ),
            NoteField::reminder("Reminder", REMINDER),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::ComparisonReport;
    use crate::infrastructure::MockSystem;

    fn untuned() -> MockSystem {
        MockSystem::new()
            .with(THP, "always")
            .with(KSM, "1")
            .with(NUMA_BALANCING, "1")
    }

    #[test]
    fn initialise_reads_live_values() {
        let current = HanaOsSettings::default().initialise(&untuned()).unwrap();
        let fields = current.fields();
        assert_eq!(fields[0].value, FieldValue::text("always"));
        assert_eq!(fields[1].value, FieldValue::text("1"));
    }

    #[test]
    fn optimise_disables_everything() {
        let current = HanaOsSettings::default().initialise(&untuned()).unwrap();
        let desired = current.optimise(&TuningContext::new(65536)).unwrap();
        let values: Vec<String> = desired
            .fields()
            .iter()
            .filter(|f| f.param.is_some())
            .map(|f| f.value.as_value_string())
            .collect();
        assert_eq!(values, vec!["never", "0", "0"]);
    }

    #[test]
    fn untuned_host_is_not_compliant_and_carries_reminder() {
        let current = HanaOsSettings::default().initialise(&untuned()).unwrap();
        let desired = current.optimise(&TuningContext::new(65536)).unwrap();
        let report = ComparisonReport::build(desired.as_ref(), current.as_ref());
        assert!(!report.compliant);
        assert_eq!(report.mismatches().len(), 3);
        assert_eq!(report.reminders.len(), 1);
    }

    #[test]
    fn missing_ksm_is_not_a_mismatch() {
        let system = MockSystem::new()
            .with(THP, "never")
            .with(NUMA_BALANCING, "0");
        let current = HanaOsSettings::default().initialise(&system).unwrap();
        let desired = current.optimise(&TuningContext::new(65536)).unwrap();
        assert!(ComparisonReport::build(desired.as_ref(), current.as_ref()).compliant);
    }
}
