//! Domain models for the RRED extraction pipeline.
//!
//! This module contains the core data structures used throughout the pipeline:
//!
//! - [`Table`] - Untyped tabular data (headers + nullable string cells)
//! - [`LongPupilRecord`] - One pupil in one survey period
//! - [`TeacherRecord`] - Teacher identity, title and school
//! - [`SchoolRecord`] - School identity, canonical name and region
//! - [`Summer`] - Summer-born flag derived from the date of birth

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// A single nullable cell. Empty strings are stored as `None`.
pub type Cell = Option<String>;

/// Normalise raw text into a cell: trimmed, empty becomes `None`.
pub fn cell(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Output format for every date written by the pipeline.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const DATE_INPUT_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];
const DATETIME_INPUT_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%d/%m/%Y %H:%M"];

/// Parse a calendar date from the formats found in survey exports.
///
/// Date-time values are accepted and truncated to their date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_INPUT_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_INPUT_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

// =============================================================================
// Table
// =============================================================================

/// Column-ordered tabular data with nullable string cells.
///
/// Column order is significant: coalescing walks candidate columns
/// left to right.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Build a table from string literals; empty strings become nulls.
    pub fn from_rows<H, R, C>(headers: H, rows: R) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        let headers: Vec<String> = headers.into_iter().map(Into::into).collect();
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|row| {
                let mut cells: Vec<Cell> = row.into_iter().map(|c| cell(c.as_ref())).collect();
                cells.resize(width, None);
                cells
            })
            .collect();
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Indices of all columns whose name starts with `prefix`, in column order.
    pub fn columns_with_prefix(&self, prefix: &str) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.starts_with(prefix))
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of all columns whose name ends with `suffix`, in column order.
    pub fn columns_with_suffix(&self, suffix: &str) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.ends_with(suffix))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }

    pub fn column(&self, name: &str) -> Option<Vec<Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].clone()).collect())
    }

    /// First non-null value per row across `columns`, left to right.
    pub fn coalesce(&self, columns: &[usize]) -> Vec<Cell> {
        self.rows
            .iter()
            .map(|row| columns.iter().find_map(|&i| row.get(i).cloned().flatten()))
            .collect()
    }

    /// Replace a column's values, appending the column if it does not exist.
    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) {
        debug_assert_eq!(values.len(), self.rows.len());
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.headers.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
    }

    pub fn rename_column(&mut self, index: usize, name: impl Into<String>) {
        if let Some(h) = self.headers.get_mut(index) {
            *h = name.into();
        }
    }

    pub fn retain_rows<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&[Cell]) -> bool,
    {
        let before = self.rows.len();
        self.rows.retain(|row| keep(row));
        before - self.rows.len()
    }
}

// =============================================================================
// Summer flag
// =============================================================================

/// Whether a pupil is summer-born (birthday April through August).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Summer {
    Yes,
    No,
}

impl Summer {
    pub const FIRST_MONTH: u32 = 4;
    pub const LAST_MONTH: u32 = 8;

    pub fn from_birth_date(dob: NaiveDate) -> Self {
        if (Self::FIRST_MONTH..=Self::LAST_MONTH).contains(&dob.month()) {
            Summer::Yes
        } else {
            Summer::No
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Summer::Yes => "Yes",
            Summer::No => "No",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Yes" => Some(Summer::Yes),
            "No" => Some(Summer::No),
            _ => None,
        }
    }
}

impl fmt::Display for Summer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Long pupil record
// =============================================================================

/// Exit outcome synthesised for pupils still in the programme.
pub const ONGOING_OUTCOME: &str = "Ongoing";

/// Separator between the student slot and the survey period in `pupil_no`.
pub const PUPIL_NO_SEPARATOR: char = '_';

/// One pupil (student slot) in one survey period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongPupilRecord {
    /// `{slot}_{period}`, unique per period.
    pub pupil_no: String,
    pub rred_user_id: String,
    pub school_id: Option<String>,
    /// Canonical roster name, attached by the school-name join.
    pub school_name: Option<String>,
    /// The respondent's role title (`reg_rr_title`).
    pub teacher_title: Option<String>,
    pub entry_date: Option<NaiveDate>,
    pub exit_date: Option<NaiveDate>,
    pub entry_year: Option<String>,
    pub summer: Option<Summer>,
    pub exit_outcome: Option<String>,
    /// Every other measurement or carried field, by column name.
    pub fields: BTreeMap<String, String>,
}

impl LongPupilRecord {
    pub fn pupil_no(slot: u32, survey_period: &str) -> String {
        format!("{slot}{PUPIL_NO_SEPARATOR}{survey_period}")
    }

    /// The student slot and period tokens of `pupil_no`.
    pub fn pupil_no_parts(&self) -> (&str, &str) {
        self.pupil_no
            .split_once(PUPIL_NO_SEPARATOR)
            .unwrap_or((self.pupil_no.as_str(), ""))
    }

    pub fn period(&self) -> &str {
        self.pupil_no_parts().1
    }

    /// Numeric entry number (student slot); unparsable tokens sort last.
    pub fn entry_number(&self) -> u32 {
        self.pupil_no_parts().0.parse().unwrap_or(u32::MAX)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Value of a canonical output column.
    pub fn value(&self, column: &str) -> Option<Cow<'_, str>> {
        match column {
            "pupil_no" => Some(Cow::Borrowed(self.pupil_no.as_str())),
            "rred_user_id" => Some(Cow::Borrowed(self.rred_user_id.as_str())),
            "school_id" => self.school_id.as_deref().map(Cow::Borrowed),
            "rrcp_school" => self.school_name.as_deref().map(Cow::Borrowed),
            "reg_rr_title" => self.teacher_title.as_deref().map(Cow::Borrowed),
            "entry_date" => self.entry_date.map(|d| Cow::Owned(format_date(d))),
            "exit_date" => self.exit_date.map(|d| Cow::Owned(format_date(d))),
            "entry_year" => self.entry_year.as_deref().map(Cow::Borrowed),
            "summer" => self.summer.map(|s| Cow::Borrowed(s.as_str())),
            "exit_outcome" => self.exit_outcome.as_deref().map(Cow::Borrowed),
            other => self.field(other).map(Cow::Borrowed),
        }
    }

    /// Parse a date-valued field such as `month3_testdate`.
    pub fn date_field(&self, name: &str) -> Option<NaiveDate> {
        match name {
            "entry_date" => self.entry_date,
            "exit_date" => self.exit_date,
            other => self.field(other).and_then(parse_date),
        }
    }
}

// =============================================================================
// Teacher and school records
// =============================================================================

/// Teacher information; links to pupils by `rred_user_id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TeacherRecord {
    pub rred_user_id: String,
    pub title: Option<String>,
    pub school_id: Option<String>,
}

impl TeacherRecord {
    /// Supervisory roles are excluded from pupil linkage.
    pub fn is_teacher_leader(&self, leader_prefix: &str) -> bool {
        self.title
            .as_deref()
            .is_some_and(|t| t.trim_start().starts_with(leader_prefix))
    }
}

/// School information; links to teachers by `school_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolRecord {
    pub school_id: String,
    pub name: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_normalisation() {
        assert_eq!(cell("  RRS180 "), Some("RRS180".to_string()));
        assert_eq!(cell("   "), None);
        assert_eq!(cell(""), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2021, 9, 14);
        assert_eq!(parse_date("2021-09-14"), expected);
        assert_eq!(parse_date("14/09/2021"), expected);
        assert_eq!(parse_date("2021-09-14 10:22:01"), expected);
        assert_eq!(parse_date("2021-09-14 10:22"), expected);
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_coalesce_left_to_right() {
        let table = Table::from_rows(
            ["a", "b", "c"],
            vec![vec!["", "x", "y"], vec!["z", "", "w"], vec!["", "", ""]],
        );
        let values = table.coalesce(&[0, 1, 2]);
        assert_eq!(
            values,
            vec![Some("x".to_string()), Some("z".to_string()), None]
        );
    }

    #[test]
    fn test_set_column_appends_and_replaces() {
        let mut table = Table::from_rows(["a"], vec![vec!["1"], vec!["2"]]);
        table.set_column("b", vec![Some("x".into()), None]);
        assert_eq!(table.headers, vec!["a", "b"]);
        assert_eq!(table.get(0, "b"), Some("x"));

        table.set_column("a", vec![None, Some("3".into())]);
        assert_eq!(table.get(0, "a"), None);
        assert_eq!(table.get(1, "a"), Some("3"));
    }

    #[test]
    fn test_summer_month_window() {
        let june = NaiveDate::from_ymd_opt(2015, 6, 30).unwrap();
        let november = NaiveDate::from_ymd_opt(2015, 11, 2).unwrap();
        let april = NaiveDate::from_ymd_opt(2015, 4, 1).unwrap();
        let august = NaiveDate::from_ymd_opt(2015, 8, 31).unwrap();
        let march = NaiveDate::from_ymd_opt(2015, 3, 31).unwrap();
        assert_eq!(Summer::from_birth_date(june), Summer::Yes);
        assert_eq!(Summer::from_birth_date(november), Summer::No);
        assert_eq!(Summer::from_birth_date(april), Summer::Yes);
        assert_eq!(Summer::from_birth_date(august), Summer::Yes);
        assert_eq!(Summer::from_birth_date(march), Summer::No);
    }

    #[test]
    fn test_pupil_no_parts() {
        let record = LongPupilRecord {
            pupil_no: LongPupilRecord::pupil_no(12, "2021-22"),
            rred_user_id: "T1".into(),
            school_id: None,
            school_name: None,
            teacher_title: None,
            entry_date: None,
            exit_date: None,
            entry_year: None,
            summer: None,
            exit_outcome: None,
            fields: BTreeMap::new(),
        };
        assert_eq!(record.pupil_no, "12_2021-22");
        assert_eq!(record.period(), "2021-22");
        assert_eq!(record.entry_number(), 12);
    }

    #[test]
    fn test_teacher_leader_variants() {
        let teacher = |title: &str| TeacherRecord {
            rred_user_id: "T1".into(),
            title: Some(title.into()),
            school_id: None,
        };
        assert!(teacher("Teacher Leader").is_teacher_leader("Teacher Leader"));
        assert!(teacher("Teacher Leader in Training").is_teacher_leader("Teacher Leader"));
        assert!(!teacher("Reading Recovery Teacher").is_teacher_leader("Teacher Leader"));
    }
}
