//! Wide-to-long pivot.
//!
//! Each declared field's `{field}_v{slot}` column family is pivoted against
//! the response key `(respondent, _row_number)` and outer-joined onto the
//! accumulating long table, so one long row exists per occupied slot.

use std::collections::{BTreeMap, HashMap};

use crate::config::PipelineConfig;
use crate::error::{ExtractError, ExtractResult};
use crate::models::Table;
use crate::transform::columns::SlotIndex;
use crate::transform::unify::ROW_NUMBER_COLUMN;

/// Identity of one long row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PivotKey {
    pub respondent: String,
    pub row_number: usize,
    pub slot: u32,
}

/// One student slot of one response.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRow {
    pub key: PivotKey,
    /// Carried response-level fields and this slot's values; nulls omitted.
    pub values: BTreeMap<String, String>,
}

impl LongRow {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Long rows in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct LongTable {
    pub rows: Vec<LongRow>,
    index: HashMap<PivotKey, usize>,
}

impl LongTable {
    pub fn from_rows(rows: Vec<LongRow>) -> Self {
        let index = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.key.clone(), i))
            .collect();
        Self { rows, index }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn upsert(&mut self, key: PivotKey, carried: &BTreeMap<String, String>) -> &mut LongRow {
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                self.rows.push(LongRow {
                    key: key.clone(),
                    values: carried.clone(),
                });
                self.index.insert(key, self.rows.len() - 1);
                self.rows.len() - 1
            }
        };
        &mut self.rows[idx]
    }
}

/// Pivot the unified wide table into one row per occupied student slot.
///
/// `fields` are the per-student field names; `carried` are the
/// response-level columns copied onto every long row. A slot is occupied
/// when any of its field cells is non-empty.
pub fn wide_to_long<S: AsRef<str>>(
    wide: &Table,
    fields: &[S],
    carried: &[S],
    config: &PipelineConfig,
) -> ExtractResult<LongTable> {
    let respondent_idx = wide
        .column_index(&config.respondent_id_column)
        .ok_or_else(|| ExtractError::MissingColumn(config.respondent_id_column.clone()))?;
    let row_number_idx = wide.column_index(ROW_NUMBER_COLUMN);

    let slots = SlotIndex::build(wide, fields);
    let carried_columns: Vec<(&str, usize)> = carried
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            wide.column_index(name).map(|idx| (name, idx))
        })
        .collect();

    // Response-level values, computed once per wide row.
    let response_values: Vec<BTreeMap<String, String>> = wide
        .rows
        .iter()
        .map(|row| {
            carried_columns
                .iter()
                .filter_map(|(name, idx)| row[*idx].clone().map(|v| (name.to_string(), v)))
                .collect()
        })
        .collect();

    let mut long = LongTable::default();
    for field in fields {
        let field = field.as_ref();
        for (position, row) in wide.rows.iter().enumerate() {
            let Some(respondent) = row[respondent_idx].as_deref() else {
                continue;
            };
            let row_number = row_number_idx
                .and_then(|i| row[i].as_deref())
                .and_then(|v| v.parse().ok())
                .unwrap_or(position);

            for (slot, col) in slots.slots(field) {
                let Some(value) = row[col].as_deref() else {
                    continue;
                };
                let key = PivotKey {
                    respondent: respondent.to_string(),
                    row_number,
                    slot,
                };
                long.upsert(key, &response_values[position])
                    .values
                    .insert(field.to_string(), value.to_string());
            }
        }
    }

    tracing::debug!(
        responses = wide.len(),
        long_rows = long.len(),
        "pivoted wide table"
    );

    Ok(long)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide() -> Table {
        Table::from_rows(
            [
                "rrcp_rr_id",
                "_row_number",
                "school_id",
                "reg_rr_title",
                "entry_date_v1",
                "entry_date_v2",
                "entry_date_v3",
                "exit_date_v1",
                "exit_date_v3",
                "entry_dob_v4",
            ],
            vec![
                // three students
                vec![
                    "T1",
                    "0",
                    "RRS100",
                    "Teacher",
                    "2021-09-01",
                    "2021-09-02",
                    "",
                    "",
                    "2022-01-10",
                    "",
                ],
                // one student, on slot 4 only
                vec!["T2", "4", "RRS101", "Teacher", "", "", "", "", "", "2015-06-01"],
                // same respondent again on a later response
                vec!["T1", "7", "RRS100", "Teacher", "2021-11-01", "", "", "2022-03-01", "", ""],
            ],
        )
    }

    fn pivot() -> LongTable {
        wide_to_long(
            &wide(),
            &["entry_date", "exit_date", "entry_dob"],
            &["school_id", "reg_rr_title"],
            &PipelineConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_row_count_is_sum_of_occupied_slots() {
        let long = pivot();
        assert_eq!(long.len(), 3 + 1 + 1);
    }

    #[test]
    fn test_outer_join_across_fields() {
        let long = pivot();
        let slot3 = long
            .rows
            .iter()
            .find(|r| r.key.respondent == "T1" && r.key.row_number == 0 && r.key.slot == 3)
            .unwrap();
        assert_eq!(slot3.get("entry_date"), None);
        assert_eq!(slot3.get("exit_date"), Some("2022-01-10"));
        assert_eq!(slot3.get("school_id"), Some("RRS100"));
    }

    #[test]
    fn test_row_number_separates_repeat_respondents() {
        let long = pivot();
        let t1_slot1: Vec<_> = long
            .rows
            .iter()
            .filter(|r| r.key.respondent == "T1" && r.key.slot == 1)
            .collect();
        assert_eq!(t1_slot1.len(), 2);
        assert_eq!(t1_slot1[1].get("exit_date"), Some("2022-03-01"));
    }

    #[test]
    fn test_first_seen_order() {
        let long = pivot();
        let keys: Vec<_> = long
            .rows
            .iter()
            .map(|r| (r.key.respondent.as_str(), r.key.row_number, r.key.slot))
            .collect();
        assert_eq!(
            keys,
            vec![("T1", 0, 1), ("T1", 0, 2), ("T1", 7, 1), ("T1", 0, 3), ("T2", 4, 4)]
        );
    }
}
