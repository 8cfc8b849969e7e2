//! 1557506: Linux paging improvements.
//!
//! Limits the page cache so it cannot push application memory into swap.
//! The limit is off unless the override file enables it. When on, it is 2%
//! of memory for HANA hosts and 1/16 of memory clamped to 512..4096 MiB
//! otherwise; an explicit `OVERRIDE_PAGECACHE_LIMIT_MB` wins over both.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::infrastructure::SystemAccessor;
use crate::types::comparison::{FieldValue, NoteField, ValueKind};

use super::{Note, TuningContext};

pub const ID: &str = "1557506";
const NAME: &str = "Linux paging improvements";

pub const PAGECACHE_LIMIT_MB: &str = "vm.pagecache_limit_mb";
pub const PAGECACHE_LIMIT_IGNORE_DIRTY: &str = "vm.pagecache_limit_ignore_dirty";

pub const ENABLE_PAGECACHE_LIMIT: &str = "ENABLE_PAGECACHE_LIMIT";
pub const OVERRIDE_PAGECACHE_LIMIT_MB: &str = "OVERRIDE_PAGECACHE_LIMIT_MB";
pub const TUNE_FOR_HANA: &str = "TUNE_FOR_HANA";
pub const IGNORE_DIRTY: &str = "PAGECACHE_LIMIT_IGNORE_DIRTY";

const MIN_LIMIT_MB: u64 = 512;
const MAX_LIMIT_MB: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingImprovements {
    limit_mb: FieldValue,
    ignore_dirty: FieldValue,
    /// Override values that steered optimise, by parameter.
    overrides: BTreeMap<String, String>,
}

impl Default for PagingImprovements {
    fn default() -> Self {
        PagingImprovements {
            limit_mb: FieldValue::Absent,
            ignore_dirty: FieldValue::Absent,
            overrides: BTreeMap::new(),
        }
    }
}

/// Page cache limit for a host with `mem_total_mb` of memory.
pub fn pagecache_limit_mb(mem_total_mb: u64, for_hana: bool) -> u64 {
    if for_hana {
        (u128::from(mem_total_mb) * 2 / 100) as u64
    } else {
        (mem_total_mb / 16).clamp(MIN_LIMIT_MB, MAX_LIMIT_MB)
    }
}

impl Note for PagingImprovements {
    fn id(&self) -> &str {
        ID
    }

    fn name(&self) -> &str {
        NAME
    }

    fn initialise(&self, system: &dyn SystemAccessor) -> Result<Box<dyn Note>> {
        Ok(Box::new(PagingImprovements {
            limit_mb: system.read_value(PAGECACHE_LIMIT_MB)?.into(),
            ignore_dirty: system.read_value(PAGECACHE_LIMIT_IGNORE_DIRTY)?.into(),
            overrides: BTreeMap::new(),
        }))
    }

    fn optimise(&self, ctx: &TuningContext) -> Result<Box<dyn Note>> {
        let conf = &ctx.overrides;
        let enable = conf.get_bool(ENABLE_PAGECACHE_LIMIT, false)?;
        let override_mb = conf.get_int(OVERRIDE_PAGECACHE_LIMIT_MB, 0)?;
        let for_hana = conf.get_bool(TUNE_FOR_HANA, false)?;
        let ignore_dirty = conf.get_int(IGNORE_DIRTY, 1)?;

        let mut overrides = BTreeMap::new();
        let mut limit = pagecache_limit_mb(ctx.mem_total_mb, for_hana);
        if override_mb != 0 {
            limit = override_mb;
            overrides.insert(PAGECACHE_LIMIT_MB.to_string(), override_mb.to_string());
        }
        if !enable {
            limit = 0;
        }
        if conf.get_string(IGNORE_DIRTY).is_some() {
            overrides.insert(
                PAGECACHE_LIMIT_IGNORE_DIRTY.to_string(),
                ignore_dirty.to_string(),
            );
        }

        Ok(Box::new(PagingImprovements {
            limit_mb: FieldValue::Number(limit),
            ignore_dirty: FieldValue::Number(ignore_dirty),
            overrides,
        }))
    }

    fn fields(&self) -> Vec<NoteField> {
        let mut fields = vec![
            NoteField::tunable(
                "VMPagecacheLimitMB",
                PAGECACHE_LIMIT_MB,
                PAGECACHE_LIMIT_MB,
                self.limit_mb.clone(),
                ValueKind::Scalar,
            ),
            NoteField::tunable(
                "VMPagecacheLimitIgnoreDirty",
                PAGECACHE_LIMIT_IGNORE_DIRTY,
                PAGECACHE_LIMIT_IGNORE_DIRTY,
                self.ignore_dirty.clone(),
                ValueKind::Scalar,
            ),
        ];
        for (key, value) in &self.overrides {
            fields.push(NoteField::override_for(key, value));
        }
        fields
    }
}
