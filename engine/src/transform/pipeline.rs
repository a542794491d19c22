//! End-to-end extraction for one reporting year.
//!
//! Each survey period runs unify → pivot → derive → school names on its own;
//! the current and previous periods are then concatenated, assembled into
//! the masterfile and reconciled against the dispatch list.
//!
//! # Example
//!
//! ```rust,ignore
//! use rred::config::ConfigFile;
//! use rred::transform::pipeline::run_year;
//! use std::path::Path;
//!
//! let config = ConfigFile::load(Path::new("redcap_config.toml"))?;
//! let plan = config.plan_for_year(2021)?;
//! let summary = run_year(&plan, &config.settings, Path::new("output"))?;
//! println!("{} rows written to {}", summary.rows, summary.masterfile_path.display());
//! ```

use std::path::{Path, PathBuf};

use crate::config::{ExtractInput, PipelineConfig, YearPlan};
use crate::error::{PipelineError, PipelineResult};
use crate::logs::{
    log_error, log_info, log_info_indent, log_success, log_success_indent, log_warning,
};
use crate::masterfile::{assemble, Masterfile};
use crate::models::{LongPupilRecord, Table};
use crate::parser::read_table;
use crate::roster::Roster;
use crate::transform::derive::derive_records;
use crate::transform::pivot::wide_to_long;
use crate::transform::unify::unify_extracts;
use crate::validation::{reconcile_year, write_issues_if_exist, ValidationIssue};

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub survey_period: String,
    pub masterfile_path: PathBuf,
    pub rows: usize,
    pub issues: Vec<ValidationIssue>,
    pub issues_path: Option<PathBuf>,
}

fn require_file(path: &Path) -> PipelineResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::MissingInput(path.to_path_buf()))
    }
}

/// Load and check the dispatch list.
pub fn load_roster(path: &Path, config: &PipelineConfig) -> PipelineResult<Roster> {
    require_file(path)?;
    let roster = Roster::load(path, &config.roster).map_err(|err| {
        log_error(format!("Dispatch list {} rejected: {err}", path.display()));
        err
    })?;
    log_success(format!(
        "Dispatch list: {} schools, {} rows",
        roster.school_count(),
        roster.entries().len()
    ));
    Ok(roster)
}

/// Left-join roster school names onto records by school code.
pub fn attach_school_names(records: &mut [LongPupilRecord], roster: &Roster) {
    for record in records.iter_mut() {
        record.school_name = record
            .school_id
            .as_deref()
            .and_then(|id| roster.school_name(id))
            .map(str::to_string);
    }
}

/// Run one survey period's coded and labelled exports through to pupil records.
pub fn process_period(
    coded: &Table,
    labelled: &Table,
    survey_period: &str,
    roster: &Roster,
    config: &PipelineConfig,
) -> PipelineResult<Vec<LongPupilRecord>> {
    let unified = unify_extracts(coded, labelled, config)?;
    let stats = unified.stats;
    log_info_indent(
        format!(
            "{} of {} responses kept ({} without participating students, {} without respondent id, {} test records)",
            unified.table.len(),
            stats.input_rows,
            stats.without_participants,
            stats.without_respondent,
            stats.test_records
        ),
        1,
    );

    let long = wide_to_long(
        &unified.table,
        &config.pivot_fields(),
        &config.non_wide_fields,
        config,
    )?;
    log_info_indent(format!("{} student slots occupied", long.len()), 1);

    let (mut records, derived) = derive_records(long, survey_period, config);
    if derived.unparsable_dates > 0 {
        log_warning(format!(
            "{} entry/exit dates could not be parsed and were left empty",
            derived.unparsable_dates
        ));
    }

    attach_school_names(&mut records, roster);
    log_success_indent(
        format!(
            "{} pupils for {} ({} ongoing, {} without dates dropped)",
            records.len(),
            survey_period,
            derived.ongoing,
            derived.without_dates
        ),
        1,
    );
    Ok(records)
}

/// Read one period's pair of exports and process them.
pub fn read_single_period(
    input: &ExtractInput,
    roster: &Roster,
    config: &PipelineConfig,
) -> PipelineResult<Vec<LongPupilRecord>> {
    require_file(&input.coded_data_path)?;
    require_file(&input.labelled_data_path)?;

    log_info(format!("Reading {} extracts", input.survey_period));
    let coded = read_table(&input.coded_data_path)?;
    let labelled = read_table(&input.labelled_data_path)?;
    process_period(&coded, &labelled, &input.survey_period, roster, config)
}

/// Current and previous periods, concatenated.
pub fn read_extracts(
    plan: &YearPlan,
    roster: &Roster,
    config: &PipelineConfig,
) -> PipelineResult<Vec<LongPupilRecord>> {
    let mut records = read_single_period(&plan.current, roster, config)?;
    records.extend(read_single_period(&plan.previous, roster, config)?);
    Ok(records)
}

/// Load everything for `plan` and assemble the masterfile.
pub fn build_masterfile(
    plan: &YearPlan,
    config: &PipelineConfig,
) -> PipelineResult<(Masterfile, Roster)> {
    let roster = load_roster(&plan.dispatch_list, config)?;
    let records = read_extracts(plan, &roster, config)?;
    let masterfile = assemble(records, config)?;
    Ok((masterfile, roster))
}

/// Full run: write `masterfile_{period}.csv`, reconcile, and write
/// `issues_{period}.xlsx` when anything was found.
pub fn run_year(
    plan: &YearPlan,
    config: &PipelineConfig,
    output_dir: &Path,
) -> PipelineResult<RunSummary> {
    let period = plan.current_period().to_string();
    let (masterfile, roster) = build_masterfile(plan, config)?;

    let masterfile_path = output_dir.join(format!("masterfile_{period}.csv"));
    masterfile.write(&masterfile_path)?;
    log_success(format!(
        "Masterfile written: {} rows to {}",
        masterfile.len(),
        masterfile_path.display()
    ));

    log_info("Checking school and teacher ids against the dispatch list");
    let issues = reconcile_year(&masterfile, &roster, &config.roster, plan.year);
    let issues_path =
        write_issues_if_exist(&issues, &output_dir.join(format!("issues_{period}.xlsx")))?;
    if issues.is_empty() {
        log_success("No school id issues found");
    }

    Ok(RunSummary {
        survey_period: period,
        masterfile_path,
        rows: masterfile.len(),
        issues,
        issues_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use crate::parser::parse_str;
    use std::fs;

    const CODED: &str = "\
record_id,rrcp_rr_id,reg_rr_title,no_rr_children,entry_school_1,entry_school_2,rrcp_area_1,rrcp_country,survey_timestamp,pupil_1_entry_date,pupil_1_exit_date,pupil_1_entry_dob,pupil_1_exit_outcome,pupil_2_entry_date,pupil_2_exit_date,pupil_2_entry_dob,pupil_2_exit_outcome,pupil_3_entry_date,pupil_3_exit_date,pupil_3_entry_dob,pupil_3_exit_outcome,pupil_1_entry_year_eng,pupil_2_entry_year_eng,pupil_3_entry_year_eng
AB1,T1,1,3,RRS100,,1,1,2021-10-01 09:00:00,2021-09-01,2022-01-10,2015-06-02,1,2021-09-02,,2015-11-03,,2021-09-03,,2015-08-01,,1,1,2
AB2,T2,1,0,RRS101,,1,1,2021-10-01 09:00:00,,,,,,,,,,,,,,,
AB3,T3,1,1,,RRS999,2,1,,2021-09-05,,2015-04-01,,,,,,,,,,1,,
TEST4,T4,1,1,RRS100,,1,1,,2021-09-05,,2015-04-01,,,,,,,,,,1,,
AB5,TL,2,1,RRS100,,1,1,,2021-09-06,,2015-04-01,,,,,,,,,,1,,
";

    const LABELLED: &str = "\
Record ID,RR ID,Title,Children,School A,School B,Area,Country,Timestamp,P1 entry,P1 exit,P1 dob,P1 outcome,P2 entry,P2 exit,P2 dob,P2 outcome,P3 entry,P3 exit,P3 dob,P3 outcome,P1 year,P2 year,P3 year
AB1,T1,Teacher,3,Oak,,North,England,2021-10-01 09:00:00,2021-09-01,2022-01-10,2015-06-02,Discontinued,2021-09-02,,2015-11-03,,2021-09-03,,2015-08-01,,Year 1,Year 1,Year 2
AB2,T2,Teacher,0,Elm,,North,England,2021-10-01 09:00:00,,,,,,,,,,,,,,,
AB3,T3,Teacher,1,,Nowhere,South,England,,2021-09-05,,2015-04-01,,,,,,,,,,Year 1,,
TEST4,T4,Teacher,1,Oak,,North,England,,2021-09-05,,2015-04-01,,,,,,,,,,Year 1,,
AB5,TL,Teacher Leader,1,Oak,,North,England,,2021-09-06,,2015-04-01,,,,,,,,,,Year 1,,
";

    const PREVIOUS_CODED: &str = "\
record_id,rrcp_rr_id,reg_rr_title,no_rr_children,entry_school_1,rrcp_area_1,rrcp_country,pupil_1_entry_date,pupil_1_exit_date,pupil_1_exit_outcome
AB9,T1,1,1,RRS100,1,1,2020-09-01,2021-03-01,2
";

    const PREVIOUS_LABELLED: &str = "\
Record ID,RR ID,Title,Children,School,Area,Country,P1 entry,P1 exit,P1 outcome
AB9,T1,Teacher,1,Oak,North,England,2020-09-01,2021-03-01,Referred to school
";

    const DISPATCH: &str = "\
School Label,RRED School ID,UserID,Email,TL Email
Oak School,RRS100,T1,t1@x.org,
Elm School,RRS101,T2,t2@x.org,
Elm School,RRS101,T2,t2@x.org,
";

    fn table(text: &str) -> Table {
        parse_str(text, ',').unwrap()
    }

    fn roster() -> Roster {
        Roster::from_table(&table(DISPATCH), &PipelineConfig::default().roster).unwrap()
    }

    #[test]
    fn test_process_period_cardinality_and_derivations() {
        let records = process_period(
            &table(CODED),
            &table(LABELLED),
            "2021-22",
            &roster(),
            &PipelineConfig::default(),
        )
        .unwrap();

        // AB1: three students, AB3 and AB5: one each; AB2 has none, TEST4 is a test record.
        assert_eq!(records.len(), 5);

        let first = records
            .iter()
            .find(|r| r.rred_user_id == "T1" && r.pupil_no == "1_2021-22")
            .unwrap();
        assert_eq!(first.exit_outcome.as_deref(), Some("Discontinued"));
        assert_eq!(first.summer, Some(crate::models::Summer::Yes));
        assert_eq!(first.school_name.as_deref(), Some("Oak School"));
        assert_eq!(first.entry_year.as_deref(), Some("Year 1"));
        assert_eq!(first.teacher_title.as_deref(), Some("Teacher"));
        assert_eq!(first.field("rrcp_area"), Some("North"));

        let second = records
            .iter()
            .find(|r| r.rred_user_id == "T1" && r.pupil_no == "2_2021-22")
            .unwrap();
        assert_eq!(second.exit_outcome.as_deref(), Some("Ongoing"));
        assert_eq!(second.summer, Some(crate::models::Summer::No));
    }

    #[test]
    fn test_school_identity_round_trip() {
        let roster = roster();
        let records = process_period(
            &table(CODED),
            &table(LABELLED),
            "2021-22",
            &roster,
            &PipelineConfig::default(),
        )
        .unwrap();
        for record in &records {
            let id = record.school_id.as_deref().unwrap();
            if roster.contains_school(id) {
                assert!(record.school_name.is_some(), "{id} has no name");
            } else {
                assert!(record.school_name.is_none());
            }
        }
    }

    fn write_inputs(dir: &Path) -> PathBuf {
        fs::create_dir_all(dir.join("2021")).unwrap();
        fs::create_dir_all(dir.join("2020")).unwrap();
        fs::write(dir.join("dispatch.csv"), DISPATCH).unwrap();
        fs::write(dir.join("2021/extract.csv"), CODED).unwrap();
        fs::write(dir.join("2021/labels.csv"), LABELLED).unwrap();
        fs::write(dir.join("2020/extract.csv"), PREVIOUS_CODED).unwrap();
        fs::write(dir.join("2020/labels.csv"), PREVIOUS_LABELLED).unwrap();

        let config_path = dir.join("redcap_config.toml");
        fs::write(
            &config_path,
            r#"
[2021]
dispatch_list = "dispatch.csv"

[2021.current_year]
coded_data_file = "2021/extract.csv"
label_data_file = "2021/labels.csv"

[2021.previous_year]
coded_data_file = "2020/extract.csv"
label_data_file = "2020/labels.csv"
"#,
        )
        .unwrap();
        config_path
    }

    #[test]
    fn test_run_year_writes_masterfile_and_issues() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigFile::load(&write_inputs(dir.path())).unwrap();
        let plan = config.plan_for_year(2021).unwrap();
        let output = dir.path().join("output");

        let summary = run_year(&plan, &config.settings, &output).unwrap();

        // 4 current-period pupils (teacher leader excluded) + 1 previous.
        assert_eq!(summary.rows, 5);
        assert_eq!(summary.masterfile_path, output.join("masterfile_2021-22.csv"));
        assert!(summary.masterfile_path.exists());

        // RRS101 had no participating students; RRS999 is not on the roster.
        let titles: Vec<_> = summary.issues.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["not_in_masterfile", "not_in_dispatch_list"]);
        assert_eq!(summary.issues_path, Some(output.join("issues_2021-22.xlsx")));
        assert!(output.join("issues_2021-22.xlsx").is_file());
        assert!(!output.join("issues_2021-22").exists());

        let written = read_table(&summary.masterfile_path).unwrap();
        assert_eq!(written.get(0, "school_id"), Some("RRS100"));
        assert_eq!(written.get(0, "pupil_no"), Some("1_2020-21"));
        assert_eq!(written.get(4, "school_id"), Some("RRS999"));
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_inputs(dir.path());
        fs::remove_file(dir.path().join("2020/labels.csv")).unwrap();

        let config = ConfigFile::load(&config_path).unwrap();
        let plan = config.plan_for_year(2021).unwrap();
        let err = run_year(&plan, &config.settings, &dir.path().join("output")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(p) if p.ends_with("2020/labels.csv")));
    }
}
