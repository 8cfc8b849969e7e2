//! Notes defined in settings: a plain map of parameter to target value.
//!
//! The note's override file may retarget any of its parameters with a
//! `<param>=<value>` line.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::infrastructure::SystemAccessor;
use crate::types::comparison::{FieldValue, NoteField, ValueKind};
use crate::types::config::CustomNoteDef;

use super::{Note, TuningContext};

const FIELD: &str = "Values";

#[derive(Debug, Clone)]
pub struct CustomNote {
    def: CustomNoteDef,
    values: BTreeMap<String, FieldValue>,
    overrides: BTreeMap<String, String>,
}

impl CustomNote {
    pub fn new(def: CustomNoteDef) -> Self {
        CustomNote {
            def,
            values: BTreeMap::new(),
            overrides: BTreeMap::new(),
        }
    }

    fn with_values(&self, values: BTreeMap<String, FieldValue>) -> Self {
        CustomNote {
            def: self.def.clone(),
            values,
            overrides: BTreeMap::new(),
        }
    }
}

impl Note for CustomNote {
    fn id(&self) -> &str {
        &self.def.id
    }

    fn name(&self) -> &str {
        &self.def.name
    }

    fn initialise(&self, system: &dyn SystemAccessor) -> Result<Box<dyn Note>> {
        let mut values = BTreeMap::new();
        for param in self.def.values.keys() {
            values.insert(param.clone(), system.read_value(param)?.into());
        }
        Ok(Box::new(self.with_values(values)))
    }

    fn optimise(&self, ctx: &TuningContext) -> Result<Box<dyn Note>> {
        let mut desired = self.with_values(BTreeMap::new());
        for (param, target) in &self.def.values {
            let value = match ctx.overrides.get(param) {
                Some(v) => {
                    desired.overrides.insert(param.clone(), v.to_string());
                    v.to_string()
                }
                None => target.clone(),
            };
            desired.values.insert(param.clone(), FieldValue::text(value));
        }
        Ok(Box::new(desired))
    }

    fn fields(&self) -> Vec<NoteField> {
        let mut fields: Vec<NoteField> = self
            .values
            .iter()
            .map(|(param, value)| {
                NoteField::tunable(FIELD, param, param, value.clone(), ValueKind::Scalar)
            })
            .collect();
        if let Some(text) = &self.def.reminder {
            fields.push(NoteField::reminder(FIELD, text));
        }
        for (param, value) in &self.overrides {
            fields.push(NoteField::override_for(param, value));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::ComparisonReport;
    use crate::data::sysconfig::SysconfigFile;
    use crate::infrastructure::MockSystem;
    use std::path::Path;

    fn def() -> CustomNoteDef {
        CustomNoteDef {
            id: "db-host".into(),
            name: "Database host sysctls".into(),
            values: BTreeMap::from([
                ("vm.swappiness".to_string(), "10".to_string()),
                ("vm.dirty_ratio".to_string(), "15".to_string()),
            ]),
            reminder: Some("size swap to 2x RAM".into()),
        }
    }

    #[test]
    fn fields_follow_definition() {
        let system = MockSystem::new()
            .with("vm.swappiness", "60")
            .with("vm.dirty_ratio", "20");
        let current = CustomNote::new(def()).initialise(&system).unwrap();
        let desired = current.optimise(&TuningContext::new(1024)).unwrap();
        let report = ComparisonReport::build(desired.as_ref(), current.as_ref());
        assert_eq!(report.note_id, "db-host");
        assert_eq!(report.mismatches().len(), 2);
        assert_eq!(report.reminders, vec!["size swap to 2x RAM"]);
    }

    #[test]
    fn override_file_retargets_parameter() {
        let system = MockSystem::new()
            .with("vm.swappiness", "1")
            .with("vm.dirty_ratio", "15");
        let conf = SysconfigFile::parse(Path::new("/o/db-host"), "vm.swappiness=1\n").unwrap();
        let current = CustomNote::new(def()).initialise(&system).unwrap();
        let desired = current
            .optimise(&TuningContext::new(1024).with_overrides(conf))
            .unwrap();
        let report = ComparisonReport::build(desired.as_ref(), current.as_ref());
        assert!(report.compliant);
        assert_eq!(report.overrides["vm.swappiness"], "1");
    }
}
