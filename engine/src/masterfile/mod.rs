//! Masterfile assembly.
//!
//! Pupil records are joined to the deduplicated teacher table (teacher
//! leaders removed) and then to the school table, flattened into the fixed
//! output column order and sorted by school, period and entry number.
//!
//! ```text
//! pupils ──(rred_user_id, school_id, title)──▶ teachers ──(school_id)──▶ schools
//! ```

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::PipelineConfig;
use crate::error::{AssemblyError, AssemblyResult, OutputResult};
use crate::models::{parse_date, Cell, LongPupilRecord, SchoolRecord, Summer, Table, TeacherRecord};
use crate::parser::write_table_file;

/// Pupil columns in output order.
pub const PUPIL_COLUMNS: &[&str] = &[
    "pupil_no",
    "rred_user_id",
    "assessi_engtest2",
    "assessi_iretest1",
    "assessi_iretype1",
    "assessi_maltest1",
    "assessi_outcome",
    "assessi_scotest1",
    "assessi_scotest2",
    "assessi_scotest3",
    "assessii_engcheck1",
    "assessii_engtest4",
    "assessii_engtest5",
    "assessii_engtest6",
    "assessii_engtest7",
    "assessii_engtest8",
    "assessii_scotest4",
    "assessii_iretest2",
    "assessii_iretype2",
    "assessiii_engtest10",
    "assessiii_engtest11",
    "assessiii_engtest9",
    "assessiii_iretest4",
    "entry_dob",
    "summer",
    "entry_date",
    "entry_testdate",
    "exit_date",
    "exit_outcome",
    "entry_year",
    "entry_gender",
    "entry_ethnicity",
    "entry_language",
    "entry_poverty",
    "entry_sen_status",
    "entry_special_cohort",
    "entry_bl_result",
    "entry_li_result",
    "entry_cap_result",
    "entry_wt_result",
    "entry_wv_result",
    "entry_hrsw_result",
    "entry_bas_result",
    "exit_num_weeks",
    "exit_num_lessons",
    "exit_lessons_missed_ca",
    "exit_lessons_missed_cu",
    "exit_lessons_missed_ta",
    "exit_lessons_missed_tu",
    "exit_bl_result",
    "exit_li_result",
    "exit_cap_result",
    "exit_wt_result",
    "exit_wv_result",
    "exit_hrsw_result",
    "exit_bas_result",
    "month3_testdate",
    "month3_bl_result",
    "month3_wv_result",
    "month3_bas_result",
    "month6_testdate",
    "month6_bl_result",
    "month6_wv_result",
    "month6_bas_result",
    "rred_qc_parameters",
];

pub const TEACHER_TITLE_COLUMN: &str = "reg_rr_title";
pub const SCHOOL_NAME_COLUMN: &str = "rrcp_school";
pub const REGION_COLUMN: &str = "rrcp_area";
pub const COUNTRY_COLUMN: &str = "rrcp_country";
pub const SCHOOL_ID_COLUMN: &str = "school_id";

/// Full output header: pupil fields, teacher title, school fields, school code last.
pub fn masterfile_columns() -> Vec<&'static str> {
    let mut columns = PUPIL_COLUMNS.to_vec();
    columns.extend([
        TEACHER_TITLE_COLUMN,
        SCHOOL_NAME_COLUMN,
        REGION_COLUMN,
        COUNTRY_COLUMN,
        SCHOOL_ID_COLUMN,
    ]);
    columns
}

/// One joined output row.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterfileRow {
    pub pupil: LongPupilRecord,
    pub teacher: TeacherRecord,
    pub school: Option<SchoolRecord>,
}

impl MasterfileRow {
    pub fn value(&self, column: &str) -> Option<Cow<'_, str>> {
        let school = self.school.as_ref();
        match column {
            TEACHER_TITLE_COLUMN => self.teacher.title.as_deref().map(Cow::Borrowed),
            SCHOOL_NAME_COLUMN => school.and_then(|s| s.name.as_deref()).map(Cow::Borrowed),
            REGION_COLUMN => school.and_then(|s| s.region.as_deref()).map(Cow::Borrowed),
            COUNTRY_COLUMN => school.and_then(|s| s.country.as_deref()).map(Cow::Borrowed),
            other => self.pupil.value(other),
        }
    }

    pub fn school_id(&self) -> Option<&str> {
        self.pupil.school_id.as_deref()
    }

    pub fn school_name(&self) -> Option<&str> {
        self.school.as_ref().and_then(|s| s.name.as_deref())
    }

    pub fn is_teacher_leader(&self, leader_prefix: &str) -> bool {
        self.teacher.is_teacher_leader(leader_prefix)
    }
}

/// The canonical long dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Masterfile {
    pub rows: Vec<MasterfileRow>,
}

impl Masterfile {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct school codes present.
    pub fn school_ids(&self) -> BTreeSet<&str> {
        self.rows.iter().filter_map(MasterfileRow::school_id).collect()
    }

    /// Rows for which `keep` holds, in order.
    pub fn filtered<F>(&self, keep: F) -> Masterfile
    where
        F: Fn(&MasterfileRow) -> bool,
    {
        Masterfile {
            rows: self.rows.iter().filter(|r| keep(*r)).cloned().collect(),
        }
    }

    pub fn to_table(&self) -> Table {
        let columns = masterfile_columns();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.value(c).map(Cow::into_owned))
                    .collect()
            })
            .collect();
        Table {
            headers: columns.into_iter().map(String::from).collect(),
            rows,
        }
    }

    pub fn write(&self, path: &Path) -> OutputResult<()> {
        write_table_file(path, &self.to_table())
    }

    /// Read a written masterfile back into rows.
    pub fn from_table(table: &Table) -> AssemblyResult<Self> {
        let required = |name: &str| {
            table
                .column_index(name)
                .ok_or_else(|| AssemblyError::MissingColumn(name.to_string()))
        };
        let pupil_idx = required("pupil_no")?;
        let user_idx = required("rred_user_id")?;
        let school_idx = required(SCHOOL_ID_COLUMN)?;

        let typed: BTreeSet<&str> = [
            "pupil_no",
            "rred_user_id",
            "summer",
            "entry_date",
            "exit_date",
            "entry_year",
            "exit_outcome",
            TEACHER_TITLE_COLUMN,
            SCHOOL_NAME_COLUMN,
            REGION_COLUMN,
            COUNTRY_COLUMN,
            SCHOOL_ID_COLUMN,
        ]
        .into_iter()
        .collect();

        let get = |row: &[Cell], name: &str| -> Option<String> {
            table.column_index(name).and_then(|i| row[i].clone())
        };

        let mut rows = Vec::with_capacity(table.len());
        for row in &table.rows {
            let (Some(pupil_no), Some(user)) = (row[pupil_idx].clone(), row[user_idx].clone())
            else {
                continue;
            };
            let school = row[school_idx].clone();
            let title = get(row, TEACHER_TITLE_COLUMN);
            let fields: BTreeMap<String, String> = table
                .headers
                .iter()
                .zip(row)
                .filter(|(h, _)| !typed.contains(h.as_str()))
                .filter_map(|(h, c)| c.clone().map(|v| (h.clone(), v)))
                .collect();

            let pupil = LongPupilRecord {
                pupil_no,
                rred_user_id: user.clone(),
                school_id: school.clone(),
                school_name: get(row, SCHOOL_NAME_COLUMN),
                teacher_title: title.clone(),
                entry_date: get(row, "entry_date").as_deref().and_then(parse_date),
                exit_date: get(row, "exit_date").as_deref().and_then(parse_date),
                entry_year: get(row, "entry_year"),
                summer: get(row, "summer").as_deref().and_then(Summer::parse),
                exit_outcome: get(row, "exit_outcome"),
                fields,
            };
            rows.push(MasterfileRow {
                teacher: TeacherRecord {
                    rred_user_id: user,
                    title,
                    school_id: school.clone(),
                },
                school: school.map(|id| SchoolRecord {
                    school_id: id,
                    name: get(row, SCHOOL_NAME_COLUMN),
                    region: get(row, REGION_COLUMN),
                    country: get(row, COUNTRY_COLUMN),
                }),
                pupil,
            });
        }
        Ok(Self { rows })
    }
}

// =============================================================================
// Assembly
// =============================================================================

fn teacher_of(record: &LongPupilRecord) -> TeacherRecord {
    TeacherRecord {
        rred_user_id: record.rred_user_id.clone(),
        title: record.teacher_title.clone(),
        school_id: record.school_id.clone(),
    }
}

/// Deduplicated teachers, teacher leaders excluded.
pub fn teacher_table(
    records: &[LongPupilRecord],
    config: &PipelineConfig,
) -> BTreeSet<TeacherRecord> {
    records
        .iter()
        .map(teacher_of)
        .filter(|t| !t.is_teacher_leader(&config.teacher_leader_prefix))
        .collect()
}

/// One record per school code.
///
/// Fails when a code is seen with two different names; region and country
/// are taken from the first record seen.
pub fn school_table(records: &[LongPupilRecord]) -> AssemblyResult<BTreeMap<String, SchoolRecord>> {
    let mut schools: BTreeMap<String, SchoolRecord> = BTreeMap::new();
    for record in records {
        let Some(id) = record.school_id.as_deref() else {
            continue;
        };
        match schools.get(id) {
            Some(existing) if existing.name != record.school_name => {
                return Err(AssemblyError::ConflictingSchool {
                    school_id: id.to_string(),
                    first: existing.name.clone(),
                    second: record.school_name.clone(),
                });
            }
            Some(_) => {}
            None => {
                schools.insert(
                    id.to_string(),
                    SchoolRecord {
                        school_id: id.to_string(),
                        name: record.school_name.clone(),
                        region: record.field(REGION_COLUMN).map(str::to_string),
                        country: record.field(COUNTRY_COLUMN).map(str::to_string),
                    },
                );
            }
        }
    }
    Ok(schools)
}

/// Join pupils, teachers and schools into the sorted masterfile.
pub fn assemble(
    records: Vec<LongPupilRecord>,
    config: &PipelineConfig,
) -> AssemblyResult<Masterfile> {
    let teachers = teacher_table(&records, config);
    let schools = school_table(&records)?;

    let mut rows: Vec<MasterfileRow> = records
        .into_iter()
        .filter_map(|pupil| {
            let teacher = teacher_of(&pupil);
            if !teachers.contains(&teacher) {
                return None;
            }
            let school = pupil.school_id.as_deref().and_then(|id| schools.get(id)).cloned();
            Some(MasterfileRow { pupil, teacher, school })
        })
        .collect();

    // Missing school codes sort last.
    rows.sort_by(|a, b| {
        let key = |r: &MasterfileRow| {
            (
                r.pupil.school_id.is_none(),
                r.pupil.school_id.clone(),
                r.pupil.period().to_string(),
                r.pupil.entry_number(),
            )
        };
        key(a).cmp(&key(b))
    });

    tracing::debug!(
        rows = rows.len(),
        teachers = teachers.len(),
        schools = schools.len(),
        "assembled masterfile"
    );

    Ok(Masterfile { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;
    use chrono::NaiveDate;

    fn pupil(no: &str, user: &str, school: Option<&str>, title: &str) -> LongPupilRecord {
        LongPupilRecord {
            pupil_no: no.into(),
            rred_user_id: user.into(),
            school_id: school.map(String::from),
            school_name: school.map(|s| format!("{s} School")),
            teacher_title: Some(title.into()),
            entry_date: NaiveDate::from_ymd_opt(2021, 9, 14),
            exit_date: None,
            entry_year: Some("Year 1".into()),
            summer: Some(Summer::No),
            exit_outcome: Some("Ongoing".into()),
            fields: BTreeMap::from([
                ("rrcp_area".to_string(), "North".to_string()),
                ("entry_gender".to_string(), "Female".to_string()),
            ]),
        }
    }

    #[test]
    fn test_sort_order_and_leaders_removed() {
        let records = vec![
            pupil("10_2021-22", "T1", Some("B"), "Teacher"),
            pupil("2_2021-22", "T1", Some("B"), "Teacher"),
            pupil("1_2021-22", "T2", Some("A"), "Teacher"),
            pupil("3_2020-21", "T2", Some("A"), "Teacher"),
            pupil("1_2021-22", "TL", Some("A"), "Teacher Leader"),
            pupil("1_2021-22", "T3", None, "Teacher"),
        ];
        let masterfile = assemble(records, &PipelineConfig::default()).unwrap();
        let order: Vec<_> = masterfile
            .rows
            .iter()
            .map(|r| (r.pupil.rred_user_id.as_str(), r.pupil.pupil_no.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("T2", "3_2020-21"),
                ("T2", "1_2021-22"),
                ("T1", "2_2021-22"),
                ("T1", "10_2021-22"),
                ("T3", "1_2021-22"),
            ]
        );
    }

    #[test]
    fn test_conflicting_school_names_fail() {
        let mut renamed = pupil("2_2021-22", "T2", Some("A"), "Teacher");
        renamed.school_name = Some("Another Name".into());
        let records = vec![pupil("1_2021-22", "T1", Some("A"), "Teacher"), renamed];
        assert!(matches!(
            assemble(records, &PipelineConfig::default()),
            Err(AssemblyError::ConflictingSchool { .. })
        ));
    }

    #[test]
    fn test_teacher_at_two_schools_not_duplicated() {
        let records = vec![
            pupil("1_2021-22", "T1", Some("A"), "Teacher"),
            pupil("2_2021-22", "T1", Some("B"), "Teacher"),
        ];
        let masterfile = assemble(records, &PipelineConfig::default()).unwrap();
        assert_eq!(masterfile.len(), 2);
        assert_eq!(masterfile.school_ids().len(), 2);
    }

    #[test]
    fn test_column_order_and_values() {
        let masterfile = assemble(
            vec![pupil("1_2021-22", "T1", Some("A"), "Teacher")],
            &PipelineConfig::default(),
        )
        .unwrap();
        let table = masterfile.to_table();

        assert_eq!(table.headers.first().map(String::as_str), Some("pupil_no"));
        assert_eq!(table.headers.last().map(String::as_str), Some("school_id"));
        assert_eq!(table.width(), PUPIL_COLUMNS.len() + 5);
        assert_eq!(table.get(0, "rrcp_school"), Some("A School"));
        assert_eq!(table.get(0, "rrcp_area"), Some("North"));
        assert_eq!(table.get(0, "entry_date"), Some("2021-09-14"));
        assert_eq!(table.get(0, "summer"), Some("No"));
        assert_eq!(table.get(0, "reg_rr_title"), Some("Teacher"));
    }

    #[test]
    fn test_written_masterfile_reads_back() {
        let masterfile = assemble(
            vec![pupil("1_2021-22", "T1", Some("A"), "Teacher")],
            &PipelineConfig::default(),
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/masterfile_2021-22.csv");
        masterfile.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let reread = Masterfile::from_table(&parse_str(&text, ',').unwrap()).unwrap();
        assert_eq!(reread.len(), 1);
        let row = &reread.rows[0];
        assert_eq!(row.school_name(), Some("A School"));
        assert_eq!(row.pupil.entry_date, NaiveDate::from_ymd_opt(2021, 9, 14));
        assert_eq!(row.pupil.field("entry_gender"), Some("Female"));
        assert_eq!(row.teacher.title.as_deref(), Some("Teacher"));
    }
}
