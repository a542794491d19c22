//! Reconciliation of the masterfile against the dispatch list.
//!
//! Every school/teacher identity mismatch is classified into exactly one
//! category. Classifiers run in a fixed order; each returns the keys it
//! explained so later classifiers skip them:
//!
//! 1. `multiple_ids` - a teacher appears under more than one school code
//! 2. `school_mismatch` - a rostered teacher's rows carry no resolvable school name
//! 3. `not_in_masterfile` - a roster school code has no masterfile rows
//! 4. `not_in_dispatch_list` - a masterfile school code is not on the roster
//!
//! Issues are advisory. Nothing here fails the run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::config::{survey_period, RosterColumns};
use crate::error::OutputResult;
use crate::logs::log_warning;
use crate::masterfile::Masterfile;
use crate::models::{Cell, Table};
use crate::parser::{write_workbook_file, Sheet};
use crate::report::{filter_by_entry_and_exit, ReportingWindow};
use crate::roster::Roster;

/// Column prefix legend written under issue descriptions.
pub const KEY_FOR_COLUMNS: &str = "---\nkey:\nDL_ = Dispatch List, MF_ = Master File\n---\n";

pub const MULTIPLE_IDS: &str = "multiple_ids";
pub const SCHOOL_MISMATCH: &str = "school_mismatch";
pub const NOT_IN_MASTERFILE: &str = "not_in_masterfile";
pub const NOT_IN_DISPATCH_LIST: &str = "not_in_dispatch_list";

/// One category of findings, for human review.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub title: String,
    pub description: String,
    pub rows: Table,
}

impl ValidationIssue {
    fn new(title: &str, description: String, rows: Table) -> Self {
        Self {
            title: title.to_string(),
            description,
            rows,
        }
    }

    pub fn description_lines(&self) -> Vec<&str> {
        self.description.split('\n').collect()
    }
}

/// Keys accounted for by earlier classifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Explained {
    pub teachers: BTreeSet<String>,
    pub roster_codes: BTreeSet<String>,
    pub masterfile_codes: BTreeSet<String>,
}

impl Explained {
    fn merge(&mut self, other: Explained) {
        self.teachers.extend(other.teachers);
        self.roster_codes.extend(other.roster_codes);
        self.masterfile_codes.extend(other.masterfile_codes);
    }
}

fn dl(name: &str) -> String {
    format!("DL_{name}")
}

fn joined<'a>(values: impl IntoIterator<Item = &'a str>) -> Cell {
    let values: BTreeSet<&str> = values.into_iter().collect();
    if values.is_empty() {
        None
    } else {
        Some(values.into_iter().collect::<Vec<_>>().join("; "))
    }
}

// =============================================================================
// Classifiers
// =============================================================================

/// Teachers seen under more than one school code, one row per teacher.
pub fn multiple_ids(
    masterfile: &Masterfile,
    roster: &Roster,
    columns: &RosterColumns,
) -> (Option<ValidationIssue>, Explained) {
    let mut schools_by_teacher: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for row in &masterfile.rows {
        let Some(school) = row.school_id() else {
            continue;
        };
        let schools = schools_by_teacher.entry(row.pupil.rred_user_id.as_str()).or_default();
        if !schools.contains(&school) {
            schools.push(school);
        }
    }
    schools_by_teacher.retain(|_, schools| schools.len() > 1);

    let mut explained = Explained::default();
    if schools_by_teacher.is_empty() {
        return (None, explained);
    }

    let width = schools_by_teacher.values().map(Vec::len).max().unwrap_or(0);
    let mut headers = vec![
        "rred_user_id".to_string(),
        dl(&columns.school_id),
        dl(&columns.school_name),
    ];
    headers.extend((1..=width).map(|i| format!("MF_school_id_{i}")));
    let mut table = Table::new(headers);

    for (teacher, schools) in &schools_by_teacher {
        let rostered: Vec<_> = roster.entries_for_user(teacher).collect();
        let mut row: Vec<Cell> = vec![
            Some(teacher.to_string()),
            joined(rostered.iter().map(|e| e.school_id.as_str())),
            joined(rostered.iter().filter_map(|e| e.school_name.as_deref())),
        ];
        row.extend(schools.iter().map(|s| Some(s.to_string())));
        row.resize(table.width(), None);
        table.rows.push(row);

        explained.teachers.insert(teacher.to_string());
        explained
            .roster_codes
            .extend(rostered.iter().map(|e| e.school_id.clone()));
        explained
            .masterfile_codes
            .extend(schools.iter().map(|s| s.to_string()));
    }

    let description = format!(
        "{} Users were found with multiple school IDs in the masterfile:\n{KEY_FOR_COLUMNS}",
        table.len()
    );
    (Some(ValidationIssue::new(MULTIPLE_IDS, description, table)), explained)
}

/// Rostered teachers whose masterfile rows have no resolvable school name.
pub fn school_mismatch(
    masterfile: &Masterfile,
    roster: &Roster,
    columns: &RosterColumns,
    already: &Explained,
) -> (Option<ValidationIssue>, Explained) {
    let mut pairs: BTreeSet<(String, String, Cell, Cell)> = BTreeSet::new();
    for row in &masterfile.rows {
        let teacher = row.pupil.rred_user_id.as_str();
        if row.school_name().is_some() || already.teachers.contains(teacher) {
            continue;
        }
        for entry in roster.entries_for_user(teacher) {
            pairs.insert((
                teacher.to_string(),
                entry.school_id.clone(),
                entry.school_name.clone(),
                row.school_id().map(str::to_string),
            ));
        }
    }

    let mut explained = Explained::default();
    if pairs.is_empty() {
        return (None, explained);
    }

    let mut table = Table::new(vec![
        dl(&columns.user_id),
        dl(&columns.school_id),
        dl(&columns.school_name),
        "rred_user_id".to_string(),
        "MF_school_id".to_string(),
    ]);
    for (teacher, roster_code, label, mf_code) in pairs {
        explained.teachers.insert(teacher.clone());
        explained.roster_codes.insert(roster_code.clone());
        if let Some(code) = &mf_code {
            explained.masterfile_codes.insert(code.clone());
        }
        table.rows.push(vec![
            Some(teacher.clone()),
            Some(roster_code),
            label,
            Some(teacher),
            mf_code,
        ]);
    }

    let description = format!(
        "{} Users were found with different school IDs in dispatch list compared to masterfile:\n{KEY_FOR_COLUMNS}",
        table.len()
    );
    (Some(ValidationIssue::new(SCHOOL_MISMATCH, description, table)), explained)
}

/// Roster school codes with no masterfile rows.
pub fn not_in_masterfile(
    masterfile: &Masterfile,
    roster: &Roster,
    columns: &RosterColumns,
    already: &Explained,
) -> (Option<ValidationIssue>, Explained) {
    let present = masterfile.school_ids();
    let mut explained = Explained::default();

    let mut table = Table::new(vec![dl(&columns.school_id), dl(&columns.school_name)]);
    for (code, name) in roster.schools() {
        if present.contains(code.as_str()) || already.roster_codes.contains(code) {
            continue;
        }
        explained.roster_codes.insert(code.clone());
        table.rows.push(vec![Some(code.clone()), name.clone()]);
    }

    if table.is_empty() {
        return (None, explained);
    }
    let description = format!(
        "{} School IDs were not found in masterfile:\n{KEY_FOR_COLUMNS}",
        table.len()
    );
    (Some(ValidationIssue::new(NOT_IN_MASTERFILE, description, table)), explained)
}

/// Masterfile school codes missing from the roster, tagged with whether
/// the code has rows in `current_period`.
pub fn not_in_dispatch_list(
    masterfile: &Masterfile,
    roster: &Roster,
    current_period: &str,
    already: &Explained,
) -> (Option<ValidationIssue>, Explained) {
    let mut current: BTreeMap<&str, bool> = BTreeMap::new();
    for row in &masterfile.rows {
        let Some(code) = row.school_id() else {
            continue;
        };
        if roster.contains_school(code) || already.masterfile_codes.contains(code) {
            continue;
        }
        *current.entry(code).or_default() |= row.pupil.period() == current_period;
    }

    let mut explained = Explained::default();
    if current.is_empty() {
        return (None, explained);
    }

    let mut table = Table::new(vec!["school_id".to_string(), "in_current_survey".to_string()]);
    for (code, in_current) in current {
        explained.masterfile_codes.insert(code.to_string());
        table
            .rows
            .push(vec![Some(code.to_string()), Some(in_current.to_string())]);
    }

    let description = format!("{} School IDs were not found in dispatch list:", table.len());
    (Some(ValidationIssue::new(NOT_IN_DISPATCH_LIST, description, table)), explained)
}

// =============================================================================
// Engine
// =============================================================================

/// Classify all mismatches between `masterfile` and `roster`.
///
/// `masterfile` should already be restricted to the reporting window.
pub fn reconcile(
    masterfile: &Masterfile,
    roster: &Roster,
    columns: &RosterColumns,
    current_period: &str,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut explained = Explained::default();

    let (issue, found) = multiple_ids(masterfile, roster, columns);
    issues.extend(issue);
    explained.merge(found);

    let (issue, found) = school_mismatch(masterfile, roster, columns, &explained);
    issues.extend(issue);
    explained.merge(found);

    // Codes reported under 3 and 4 are disjoint by construction, so neither
    // needs to see the other's keys.
    let (missing_from_masterfile, _) = not_in_masterfile(masterfile, roster, columns, &explained);
    let (missing_from_roster, _) =
        not_in_dispatch_list(masterfile, roster, current_period, &explained);
    issues.extend(missing_from_masterfile);
    issues.extend(missing_from_roster);

    for issue in &issues {
        log_warning(format!(
            "{} ({} rows)",
            issue.description.lines().next().unwrap_or(&issue.title),
            issue.rows.len()
        ));
    }
    issues
}

/// Restrict to the reporting year starting in `year`, then reconcile.
pub fn reconcile_year(
    masterfile: &Masterfile,
    roster: &Roster,
    columns: &RosterColumns,
    year: i32,
) -> Vec<ValidationIssue> {
    let in_window = match ReportingWindow::for_year(year) {
        Some(window) => filter_by_entry_and_exit(masterfile, &window),
        None => Masterfile::default(),
    };
    reconcile(&in_window, roster, columns, &survey_period(year))
}

/// Write an `.xlsx` workbook with one sheet per issue, named by its
/// title, description lines above the data.
///
/// Nothing is created when `issues` is empty. Returns the workbook path
/// written to, if any.
pub fn write_issues_if_exist(
    issues: &[ValidationIssue],
    path: &Path,
) -> OutputResult<Option<PathBuf>> {
    if issues.is_empty() {
        return Ok(None);
    }
    log_warning(format!("Writing issues to {}", path.display()));
    let sheets: Vec<Sheet<'_>> = issues
        .iter()
        .map(|issue| Sheet {
            name: &issue.title,
            preamble: issue.description_lines(),
            table: &issue.rows,
        })
        .collect();
    write_workbook_file(path, &sheets)?;
    Ok(Some(path.to_path_buf()))
}
