//! Extract unification.
//!
//! Merges the coded and labelled exports of one survey into a single wide
//! table, then drops non-respondent and test rows and normalises the
//! per-student column names.

use crate::config::PipelineConfig;
use crate::error::{ExtractError, ExtractResult};
use crate::models::{format_date, parse_date, Cell, Table};
use crate::transform::columns::rename_pupil_columns;

/// Positional row index assigned before any filtering.
pub const ROW_NUMBER_COLUMN: &str = "_row_number";

/// Row counts removed by each filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnifyStats {
    pub input_rows: usize,
    pub without_participants: usize,
    pub without_respondent: usize,
    pub test_records: usize,
    pub renamed_columns: usize,
}

impl UnifyStats {
    pub fn dropped(&self) -> usize {
        self.without_participants + self.without_respondent + self.test_records
    }
}

/// Unified wide table plus what happened to it.
#[derive(Debug, Clone)]
pub struct UnifiedExtract {
    pub table: Table,
    pub stats: UnifyStats,
}

/// Unify a coded and a labelled export of the same responses.
///
/// Labels are preferred everywhere except identity columns and the school
/// code, which always come from the coded export. Running this again on its
/// own output with both arguments equal changes nothing.
pub fn unify_extracts(
    coded: &Table,
    labelled: &Table,
    config: &PipelineConfig,
) -> ExtractResult<UnifiedExtract> {
    if coded.len() != labelled.len() || coded.width() != labelled.width() {
        return Err(ExtractError::ShapeMismatch {
            coded_rows: coded.len(),
            coded_columns: coded.width(),
            labelled_rows: labelled.len(),
            labelled_columns: labelled.width(),
        });
    }

    let mut table = Table {
        headers: coded.headers.clone(),
        rows: labelled.rows.clone(),
    };
    let mut stats = UnifyStats {
        input_rows: table.len(),
        ..Default::default()
    };

    for name in &config.identity_columns {
        if let Some(values) = coded.column(name) {
            table.set_column(name, values);
        }
    }

    // Headers are shared, so coded indices address the overlaid table too.
    let school_columns = coded.columns_with_prefix(&config.school_id_prefix);
    for (row, coded_row) in table.rows.iter_mut().zip(&coded.rows) {
        for &idx in &school_columns {
            row[idx] = coded_row[idx].clone();
        }
    }
    if !school_columns.is_empty() {
        table.set_column(&config.school_id_column, coded.coalesce(&school_columns));
    }

    let region_columns = table.columns_with_prefix(&config.region_prefix);
    if !region_columns.is_empty() {
        let regions = table.coalesce(&region_columns);
        table.set_column(&config.region_column, regions);
    }

    convert_timestamps(&mut table, config);

    if !table.has_column(ROW_NUMBER_COLUMN) {
        let numbers = (0..table.len()).map(|i| Some(i.to_string())).collect();
        table.set_column(ROW_NUMBER_COLUMN, numbers);
    }

    let participants = table
        .column_index(&config.participants_column)
        .ok_or_else(|| ExtractError::MissingColumn(config.participants_column.clone()))?;
    let respondent = table
        .column_index(&config.respondent_id_column)
        .ok_or_else(|| ExtractError::MissingColumn(config.respondent_id_column.clone()))?;

    stats.without_participants = table.retain_rows(|row| has_participants(&row[participants]));
    stats.without_respondent = table.retain_rows(|row| row[respondent].is_some());

    if let Some(record_id) = table.column_index(&config.record_id_column) {
        stats.test_records = table.retain_rows(|row| {
            row[record_id]
                .as_deref()
                .map_or(true, |id| !config.is_test_record(id))
        });
    }

    stats.renamed_columns = rename_pupil_columns(&mut table, &config.pupil_prefix);

    tracing::debug!(
        rows = table.len(),
        dropped = stats.dropped(),
        renamed = stats.renamed_columns,
        "unified extract"
    );

    Ok(UnifiedExtract { table, stats })
}

/// Null and numeric zero both mean no participating students.
fn has_participants(value: &Cell) -> bool {
    match value.as_deref() {
        None => false,
        Some(v) => v.parse::<f64>().map_or(true, |n| n != 0.0),
    }
}

fn convert_timestamps(table: &mut Table, config: &PipelineConfig) {
    for idx in table.columns_with_suffix(&config.timestamp_suffix) {
        for row in table.rows.iter_mut() {
            let date = row[idx]
                .as_deref()
                .and_then(parse_date)
                .map(format_date)
                .unwrap_or_else(|| config.timestamp_sentinel.clone());
            row[idx] = Some(date);
        }
    }
}
