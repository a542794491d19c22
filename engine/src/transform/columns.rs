//! Per-student column naming.
//!
//! Survey exports number student groups as `{prefix}{slot}_{field}`. They
//! are renamed to `{field}_v{slot}` and then resolved, against the declared
//! field list, into an explicit `field -> slot -> column` index.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

use crate::models::Table;

static SLOT_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<field>.+)_v(?P<slot>\d+)$").unwrap());

/// Name of one field's column for one student slot.
pub fn slot_column_name(field: &str, slot: u32) -> String {
    format!("{field}_v{slot}")
}

/// Split `{field}_v{slot}` into its parts.
pub fn parse_slot_column(name: &str) -> Option<(&str, u32)> {
    let caps = SLOT_COLUMN.captures(name)?;
    let field = caps.name("field")?.as_str();
    let slot = caps.name("slot")?.as_str().parse().ok()?;
    Some((field, slot))
}

/// Rename `{prefix}{slot}_{field}` columns to `{field}_v{slot}`.
///
/// Columns not matching the layout are left alone. Returns how many
/// columns were renamed.
pub fn rename_pupil_columns(table: &mut Table, prefix: &str) -> usize {
    let pattern = format!(r"^{}(\d+)_(.+)$", regex::escape(prefix));
    let Ok(re) = Regex::new(&pattern) else {
        return 0;
    };

    let mut renamed = 0;
    for header in table.headers.iter_mut() {
        let new_name = re.captures(header).and_then(|caps| {
            let slot: u32 = caps.get(1)?.as_str().parse().ok()?;
            Some(slot_column_name(caps.get(2)?.as_str(), slot))
        });
        if let Some(name) = new_name {
            *header = name;
            renamed += 1;
        }
    }
    renamed
}

/// Resolved `field -> slot -> column index` mapping for declared fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotIndex {
    columns: BTreeMap<String, BTreeMap<u32, usize>>,
}

impl SlotIndex {
    /// Index the columns of `table` that belong to one of `fields`.
    pub fn build<S: AsRef<str>>(table: &Table, fields: &[S]) -> Self {
        let declared: HashSet<&str> = fields.iter().map(AsRef::as_ref).collect();
        let mut columns: BTreeMap<String, BTreeMap<u32, usize>> = BTreeMap::new();

        for (idx, header) in table.headers.iter().enumerate() {
            if let Some((field, slot)) = parse_slot_column(header) {
                if declared.contains(field) {
                    columns.entry(field.to_string()).or_default().insert(slot, idx);
                }
            }
        }
        Self { columns }
    }

    /// Columns for `field`, ordered by slot.
    pub fn slots(&self, field: &str) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.columns
            .get(field)
            .into_iter()
            .flat_map(|m| m.iter().map(|(s, i)| (*s, *i)))
    }

    pub fn column(&self, field: &str, slot: u32) -> Option<usize> {
        self.columns.get(field)?.get(&slot).copied()
    }
}
