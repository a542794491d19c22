//! Computed fields for one survey period.

use std::collections::BTreeMap;

use crate::config::PipelineConfig;
use crate::models::{parse_date, LongPupilRecord, Summer, ONGOING_OUTCOME};
use crate::transform::pivot::{LongRow, LongTable};

const ENTRY_DOB: &str = "entry_dob";
const ENTRY_DATE: &str = "entry_date";
const EXIT_DATE: &str = "exit_date";
const EXIT_OUTCOME: &str = "exit_outcome";

/// Aggregate counts from deriving one period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeriveStats {
    /// Rows with neither an entry nor an exit date.
    pub without_dates: usize,
    /// Date cells that could not be parsed and were treated as empty.
    pub unparsable_dates: usize,
    pub ongoing: usize,
}

/// Turn pivoted rows into pupil records for `survey_period`.
///
/// Rows with neither an entry date nor an exit date are dropped.
pub fn derive_records(
    long: LongTable,
    survey_period: &str,
    config: &PipelineConfig,
) -> (Vec<LongPupilRecord>, DeriveStats) {
    let mut stats = DeriveStats::default();
    let mut records = Vec::with_capacity(long.len());

    for row in long.rows {
        let record = derive_row(row, survey_period, config, &mut stats);
        if record.entry_date.is_none() && record.exit_date.is_none() {
            stats.without_dates += 1;
            continue;
        }
        records.push(record);
    }

    tracing::debug!(
        period = survey_period,
        records = records.len(),
        without_dates = stats.without_dates,
        unparsable_dates = stats.unparsable_dates,
        "derived computed fields"
    );

    (records, stats)
}

fn derive_row(
    row: LongRow,
    survey_period: &str,
    config: &PipelineConfig,
    stats: &mut DeriveStats,
) -> LongPupilRecord {
    let LongRow { key, mut values } = row;

    let entry_year = coalesce_entry_year(&mut values, &config.entry_year_fields);

    let mut take_date = |values: &mut BTreeMap<String, String>, name: &str| {
        let raw = values.remove(name)?;
        let date = parse_date(&raw);
        if date.is_none() {
            stats.unparsable_dates += 1;
        }
        date
    };
    let entry_date = take_date(&mut values, ENTRY_DATE);
    let exit_date = take_date(&mut values, EXIT_DATE);

    let summer = values
        .get(ENTRY_DOB)
        .and_then(|dob| parse_date(dob))
        .map(Summer::from_birth_date);

    let exit_outcome = match values.remove(EXIT_OUTCOME) {
        Some(outcome) => Some(outcome),
        None if entry_date.is_some() && exit_date.is_none() => {
            stats.ongoing += 1;
            Some(ONGOING_OUTCOME.to_string())
        }
        None => None,
    };

    LongPupilRecord {
        pupil_no: LongPupilRecord::pupil_no(key.slot, survey_period),
        rred_user_id: key.respondent,
        school_id: values.remove(&config.school_id_column),
        school_name: None,
        teacher_title: values.remove(&config.teacher_title_column),
        entry_date,
        exit_date,
        entry_year,
        summer,
        exit_outcome,
        fields: values,
    }
}

/// First non-empty locale variant wins; the variant columns are removed.
fn coalesce_entry_year(
    values: &mut BTreeMap<String, String>,
    variants: &[String],
) -> Option<String> {
    let mut entry_year = None;
    for variant in variants {
        if let Some(value) = values.remove(variant) {
            entry_year.get_or_insert(value);
        }
    }
    entry_year
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::pivot::PivotKey;
    use chrono::NaiveDate;

    fn long_row(slot: u32, values: &[(&str, &str)]) -> LongRow {
        LongRow {
            key: PivotKey {
                respondent: "T1".into(),
                row_number: 0,
                slot,
            },
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn derive(rows: Vec<LongRow>) -> (Vec<LongPupilRecord>, DeriveStats) {
        derive_records(
            LongTable::from_rows(rows),
            "2021-22",
            &PipelineConfig::default(),
        )
    }

    #[test]
    fn test_ongoing_outcome_synthesised() {
        let (records, stats) = derive(vec![long_row(1, &[("entry_date", "2021-09-14")])]);
        assert_eq!(records[0].exit_outcome.as_deref(), Some("Ongoing"));
        assert_eq!(stats.ongoing, 1);
    }

    #[test]
    fn test_recorded_outcome_kept() {
        let (records, _) = derive(vec![
            long_row(1, &[("entry_date", "2021-09-14"), ("exit_outcome", "Incomplete")]),
            long_row(2, &[("entry_date", "2021-09-14"), ("exit_date", "2022-02-01")]),
        ]);
        assert_eq!(records[0].exit_outcome.as_deref(), Some("Incomplete"));
        assert_eq!(records[1].exit_outcome, None);
    }

    #[test]
    fn test_summer_from_dob() {
        let (records, _) = derive(vec![
            long_row(1, &[("entry_date", "2021-09-14"), ("entry_dob", "2015-06-03")]),
            long_row(2, &[("entry_date", "2021-09-14"), ("entry_dob", "2015-11-20")]),
            long_row(3, &[("entry_date", "2021-09-14")]),
        ]);
        assert_eq!(records[0].summer, Some(Summer::Yes));
        assert_eq!(records[1].summer, Some(Summer::No));
        assert_eq!(records[2].summer, None);
        assert_eq!(records[0].field("entry_dob"), Some("2015-06-03"));
    }

    #[test]
    fn test_entry_year_precedence_and_columns_dropped() {
        let (records, _) = derive(vec![long_row(
            1,
            &[
                ("entry_date", "2021-09-14"),
                ("entry_year_ire", "Senior Infants"),
                ("entry_year_sco", "P2"),
            ],
        )]);
        let record = &records[0];
        assert_eq!(record.entry_year.as_deref(), Some("Senior Infants"));
        assert!(record.fields.keys().all(|k| !k.starts_with("entry_year_")));
    }

    #[test]
    fn test_rows_without_dates_dropped() {
        let (records, stats) = derive(vec![
            long_row(1, &[("entry_gender", "Female")]),
            long_row(2, &[("exit_date", "2022-03-01")]),
        ]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pupil_no, "2_2021-22");
        assert_eq!(records[0].exit_date, NaiveDate::from_ymd_opt(2022, 3, 1));
        assert_eq!(stats.without_dates, 1);
    }

    #[test]
    fn test_carried_fields_typed() {
        let (records, _) = derive(vec![long_row(
            4,
            &[
                ("entry_date", "2021-09-14"),
                ("school_id", "RRS100"),
                ("reg_rr_title", "Teacher"),
                ("rrcp_country", "England"),
            ],
        )]);
        let record = &records[0];
        assert_eq!(record.rred_user_id, "T1");
        assert_eq!(record.school_id.as_deref(), Some("RRS100"));
        assert_eq!(record.teacher_title.as_deref(), Some("Teacher"));
        assert_eq!(record.field("rrcp_country"), Some("England"));
        assert!(record.field("school_id").is_none());
    }

    #[test]
    fn test_unparsable_date_counted() {
        let (records, stats) = derive(vec![long_row(
            1,
            &[("entry_date", "soon"), ("exit_date", "2022-01-01")],
        )]);
        assert_eq!(records[0].entry_date, None);
        assert_eq!(stats.unparsable_dates, 1);
    }
}
