//! Reporting-year filters and per-school report data.
//!
//! A reporting year runs from August to July. Everything here works on an
//! assembled [`Masterfile`] and produces the tables a school report is
//! populated from.

use chrono::NaiveDate;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeSet;

use crate::masterfile::{Masterfile, MasterfileRow};
use crate::models::Table;

pub const DISCONTINUED: &str = "Discontinued";
pub const REFERRED_TO_SCHOOL: &str = "Referred to school";
pub const INCOMPLETE: &str = "Incomplete";
pub const LEFT_SCHOOL: &str = "Left school";
pub const ONGOING: &str = crate::models::ONGOING_OUTCOME;

const LOST_LESSON_FIELDS: &[&str] = &[
    "exit_lessons_missed_ca",
    "exit_lessons_missed_cu",
    "exit_lessons_missed_ta",
    "exit_lessons_missed_tu",
];

pub const TOTAL_LOST_LESSONS: &str = "total_lost_lessons";

/// Open date interval `(start, end)` of one reporting year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportingWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportingWindow {
    /// Window for the reporting year starting in `year`: after 31 July,
    /// before 1 August of the following year.
    pub fn for_year(year: i32) -> Option<Self> {
        Some(Self {
            start: NaiveDate::from_ymd_opt(year, 7, 31)?,
            end: NaiveDate::from_ymd_opt(year + 1, 8, 1)?,
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start < date && date < self.end
    }

    fn contains_opt(&self, date: Option<NaiveDate>) -> bool {
        date.is_some_and(|d| self.contains(d))
    }

    /// Entry or exit date falls inside the window.
    pub fn includes(&self, row: &MasterfileRow) -> bool {
        self.contains_opt(row.pupil.entry_date) || self.contains_opt(row.pupil.exit_date)
    }
}

fn is_exited(row: &MasterfileRow) -> bool {
    matches!(
        row.pupil.exit_outcome.as_deref(),
        Some(DISCONTINUED) | Some(REFERRED_TO_SCHOOL)
    )
}

/// Rows with an entry or exit date inside the window.
pub fn filter_by_entry_and_exit(masterfile: &Masterfile, window: &ReportingWindow) -> Masterfile {
    masterfile.filtered(|r| window.includes(r))
}

/// Discontinued or referred pupils whose exit date is inside the window.
pub fn filter_exited(masterfile: &Masterfile, window: &ReportingWindow) -> Masterfile {
    masterfile.filtered(|r| is_exited(r) && window.contains_opt(r.pupil.exit_date))
}

/// Discontinued or referred pupils with a 3- or 6-month follow-up test in the window.
pub fn filter_follow_up(masterfile: &Masterfile, window: &ReportingWindow) -> Masterfile {
    masterfile.filtered(|r| {
        is_exited(r)
            && (window.contains_opt(r.pupil.date_field("month3_testdate"))
                || window.contains_opt(r.pupil.date_field("month6_testdate")))
    })
}

/// One school's rows, teacher leaders excluded.
pub fn school_filter(masterfile: &Masterfile, school_id: &str, leader_prefix: &str) -> Masterfile {
    masterfile.filtered(|r| r.school_id() == Some(school_id) && !r.is_teacher_leader(leader_prefix))
}

/// Sum of the lessons-missed fields; absent or non-numeric values count as 0.
pub fn total_lost_lessons(row: &MasterfileRow) -> u32 {
    LOST_LESSON_FIELDS
        .iter()
        .filter_map(|f| row.pupil.field(f))
        .filter_map(|v| v.trim().parse::<f64>().ok())
        .map(|n| n.max(0.0) as u32)
        .sum()
}

/// Headline numbers for one school in one reporting year.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchoolSummary {
    pub school_id: String,
    pub school_name: Option<String>,
    pub number_of_rr_teachers: usize,
    pub number_of_pupils_served: usize,
    pub po_discontinued: usize,
    pub po_referred_to_school: usize,
    pub po_incomplete: usize,
    pub po_left_school: usize,
    pub po_ongoing: usize,
}

impl SchoolSummary {
    pub fn for_school(
        masterfile: &Masterfile,
        school_id: &str,
        window: &ReportingWindow,
        leader_prefix: &str,
    ) -> Self {
        let rows =
            filter_by_entry_and_exit(&school_filter(masterfile, school_id, leader_prefix), window);
        let outcome = |name: &str| {
            rows.rows
                .iter()
                .filter(|r| r.pupil.exit_outcome.as_deref() == Some(name))
                .count()
        };

        Self {
            school_id: school_id.to_string(),
            school_name: rows.rows.iter().find_map(|r| r.school_name().map(str::to_string)),
            number_of_rr_teachers: rows
                .rows
                .iter()
                .map(|r| r.pupil.rred_user_id.as_str())
                .collect::<BTreeSet<_>>()
                .len(),
            number_of_pupils_served: rows
                .rows
                .iter()
                .map(|r| r.pupil.pupil_no.as_str())
                .collect::<BTreeSet<_>>()
                .len(),
            po_discontinued: outcome(DISCONTINUED),
            po_referred_to_school: outcome(REFERRED_TO_SCHOOL),
            po_incomplete: outcome(INCOMPLETE),
            po_left_school: outcome(LEFT_SCHOOL),
            po_ongoing: outcome(ONGOING),
        }
    }
}

// =============================================================================
// Report tables
// =============================================================================

/// The data tables of a school report, in template order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportTable {
    Demographics,
    SenStatus,
    Exits,
    LostLessons,
    Assessments,
    FollowUp,
}

impl ReportTable {
    pub const ALL: [ReportTable; 6] = [
        ReportTable::Demographics,
        ReportTable::SenStatus,
        ReportTable::Exits,
        ReportTable::LostLessons,
        ReportTable::Assessments,
        ReportTable::FollowUp,
    ];

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            ReportTable::Demographics => &[
                "rred_user_id",
                "pupil_no",
                "entry_year",
                "entry_gender",
                "summer",
                "entry_ethnicity",
                "entry_language",
                "entry_poverty",
                "entry_special_cohort",
                "exit_outcome",
            ],
            ReportTable::SenStatus => &[
                "rred_user_id",
                "pupil_no",
                "entry_sen_status",
                "exit_outcome",
            ],
            ReportTable::Exits => &[
                "rred_user_id",
                "pupil_no",
                "entry_date",
                "exit_date",
                "exit_num_weeks",
                "exit_num_lessons",
                "exit_outcome",
            ],
            ReportTable::LostLessons => &[
                "rred_user_id",
                "pupil_no",
                "exit_lessons_missed_ca",
                "exit_lessons_missed_cu",
                "exit_lessons_missed_ta",
                "exit_lessons_missed_tu",
                TOTAL_LOST_LESSONS,
                "exit_outcome",
            ],
            ReportTable::Assessments => &[
                "rred_user_id",
                "pupil_no",
                "entry_year",
                "entry_bl_result",
                "exit_bl_result",
                "entry_li_result",
                "exit_li_result",
                "entry_cap_result",
                "exit_cap_result",
                "entry_wt_result",
                "exit_wt_result",
                "entry_wv_result",
                "exit_wv_result",
                "entry_hrsw_result",
                "exit_hrsw_result",
                "entry_bas_result",
                "exit_bas_result",
                "exit_outcome",
            ],
            ReportTable::FollowUp => &[
                "rred_user_id",
                "pupil_no",
                "exit_bl_result",
                "month3_bl_result",
                "month6_bl_result",
                "exit_wv_result",
                "month3_wv_result",
                "month6_wv_result",
                "exit_bas_result",
                "month3_bas_result",
                "month6_bas_result",
                "exit_outcome",
            ],
        }
    }

    fn select(&self, masterfile: &Masterfile, window: &ReportingWindow) -> Masterfile {
        match self {
            ReportTable::Exits | ReportTable::LostLessons => filter_exited(masterfile, window),
            ReportTable::FollowUp => filter_follow_up(masterfile, window),
            _ => filter_by_entry_and_exit(masterfile, window),
        }
    }

    /// This table's rows for one school's data.
    pub fn build(&self, school: &Masterfile, window: &ReportingWindow) -> Table {
        let columns = self.columns();
        let rows = self
            .select(school, window)
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| match *c {
                        TOTAL_LOST_LESSONS => Some(total_lost_lessons(row).to_string()),
                        other => row.value(other).map(Cow::into_owned),
                    })
                    .collect()
            })
            .collect();
        Table {
            headers: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }
}
