//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is built once per run and passed by reference to
//! every component. The config file is TOML, keyed by survey start year:
//!
//! ```toml
//! [settings]
//! test_record_prefixes = ["TEST", "DEMO"]
//!
//! [2021]
//! dispatch_list = "input/dispatch_list.csv"
//!
//! [2021.current_year]
//! coded_data_file = "input/2021/extract.csv"
//! label_data_file = "input/2021/extract_labels.csv"
//!
//! [2021.previous_year]
//! coded_data_file = "input/2020/extract.csv"
//! label_data_file = "input/2020/extract_labels.csv"
//! ```
//!
//! Relative paths resolve against the directory holding the config file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

/// Environment variable naming the default config file.
pub const CONFIG_ENV_VAR: &str = "RRED_CONFIG";

/// Per-student fields repeated once per slot in the survey export.
pub const DEFAULT_WIDE_FIELDS: &[&str] = &[
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
    "entry_date",
    "entry_testdate",
    "exit_date",
    "exit_outcome",
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
];

/// Response-level fields carried unchanged onto every long row.
pub const DEFAULT_NON_WIDE_FIELDS: &[&str] = &[
    "reg_rr_title",
    "rrcp_country",
    "rrcp_area",
    "school_id",
    "rred_qc_parameters",
];

/// Entry-year variants in coalescing precedence (England, Ireland, Malta, Scotland).
pub const DEFAULT_ENTRY_YEAR_FIELDS: &[&str] = &[
    "entry_year_eng",
    "entry_year_ire",
    "entry_year_mal",
    "entry_year_sco",
];

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Settings
// =============================================================================

/// Column names of the dispatch list (roster).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RosterColumns {
    pub school_name: String,
    pub school_id: String,
    pub user_id: String,
    pub email: String,
    pub tl_email: String,
}

impl Default for RosterColumns {
    fn default() -> Self {
        Self {
            school_name: "School Label".to_string(),
            school_id: "RRED School ID".to_string(),
            user_id: "UserID".to_string(),
            email: "Email".to_string(),
            tl_email: "TL Email".to_string(),
        }
    }
}

/// Schema and business-rule settings shared by every pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fields that occur once per student slot.
    pub wide_fields: Vec<String>,
    /// Fields carried through the pivot unchanged.
    pub non_wide_fields: Vec<String>,
    /// Locale variants of the entry year, in precedence order.
    pub entry_year_fields: Vec<String>,

    pub record_id_column: String,
    pub respondent_id_column: String,
    pub participants_column: String,
    pub teacher_title_column: String,

    /// Prefix of the split school-id sub-fields in the coded export.
    pub school_id_prefix: String,
    pub school_id_column: String,
    /// Prefix of the split region sub-fields.
    pub region_prefix: String,
    pub region_column: String,

    /// Prefix of per-student columns: `{prefix}{slot}_{field}`.
    pub pupil_prefix: String,
    pub timestamp_suffix: String,
    /// Written in place of unparsable or missing timestamps.
    pub timestamp_sentinel: String,

    /// Columns always taken from the coded export, never the labels.
    pub identity_columns: Vec<String>,
    /// Case-sensitive record id prefixes marking test submissions.
    pub test_record_prefixes: Vec<String>,
    /// Titles starting with this are supervisory roles.
    pub teacher_leader_prefix: String,

    pub roster: RosterColumns,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wide_fields: strings(DEFAULT_WIDE_FIELDS),
            non_wide_fields: strings(DEFAULT_NON_WIDE_FIELDS),
            entry_year_fields: strings(DEFAULT_ENTRY_YEAR_FIELDS),
            record_id_column: "record_id".to_string(),
            respondent_id_column: "rrcp_rr_id".to_string(),
            participants_column: "no_rr_children".to_string(),
            teacher_title_column: "reg_rr_title".to_string(),
            school_id_prefix: "entry_school_".to_string(),
            school_id_column: "school_id".to_string(),
            region_prefix: "rrcp_area_".to_string(),
            region_column: "rrcp_area".to_string(),
            pupil_prefix: "pupil_".to_string(),
            timestamp_suffix: "_timestamp".to_string(),
            timestamp_sentinel: "0001-01-01".to_string(),
            identity_columns: strings(&["record_id", "rrcp_rr_id"]),
            test_record_prefixes: strings(&["TEST", "DEMO"]),
            teacher_leader_prefix: "Teacher Leader".to_string(),
            roster: RosterColumns::default(),
        }
    }
}

impl PipelineConfig {
    /// All fields pivoted from wide to long: the wide list plus entry-year variants.
    pub fn pivot_fields(&self) -> Vec<String> {
        self.wide_fields
            .iter()
            .chain(self.entry_year_fields.iter())
            .cloned()
            .collect()
    }

    pub fn is_test_record(&self, record_id: &str) -> bool {
        self.test_record_prefixes
            .iter()
            .any(|p| !p.is_empty() && record_id.starts_with(p.as_str()))
    }

    fn check(&self) -> ConfigResult<()> {
        let non_empty = [
            ("pupil_prefix", &self.pupil_prefix),
            ("school_id_prefix", &self.school_id_prefix),
            ("region_prefix", &self.region_prefix),
            ("respondent_id_column", &self.respondent_id_column),
            ("participants_column", &self.participants_column),
        ];
        for (name, value) in non_empty {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidSetting {
                    name: name.to_string(),
                    message: "must not be empty".to_string(),
                });
            }
        }
        if self.wide_fields.is_empty() {
            return Err(ConfigError::InvalidSetting {
                name: "wide_fields".to_string(),
                message: "at least one field is required".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Survey periods
// =============================================================================

/// Label of the survey period starting in `year`, e.g. `2021-22`.
pub fn survey_period(year: i32) -> String {
    format!("{}-{:02}", year, (year + 1).rem_euclid(100))
}

/// One survey period's pair of exports.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractInput {
    pub coded_data_path: PathBuf,
    pub labelled_data_path: PathBuf,
    pub survey_period: String,
}

/// Everything needed to run one reporting year.
#[derive(Debug, Clone, PartialEq)]
pub struct YearPlan {
    pub year: i32,
    pub dispatch_list: PathBuf,
    pub current: ExtractInput,
    pub previous: ExtractInput,
}

impl YearPlan {
    pub fn current_period(&self) -> &str {
        &self.current.survey_period
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ExtractFiles {
    coded_data_file: PathBuf,
    label_data_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
struct YearSection {
    dispatch_list: PathBuf,
    current_year: ExtractFiles,
    previous_year: ExtractFiles,
}

/// A parsed config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub settings: PipelineConfig,
    #[serde(flatten)]
    years: BTreeMap<String, YearSection>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl ConfigFile {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_toml(&content, base_dir)
    }

    pub fn from_toml(content: &str, base_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let mut config: ConfigFile = toml::from_str(content)?;
        config.base_dir = base_dir.into();
        config.settings.check()?;
        Ok(config)
    }

    /// Survey years with a section in this file.
    pub fn years(&self) -> Vec<i32> {
        self.years.keys().filter_map(|k| k.parse().ok()).collect()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Inputs for the reporting year starting in `year` and the year before it.
    pub fn plan_for_year(&self, year: i32) -> ConfigResult<YearPlan> {
        let section = self
            .years
            .get(&year.to_string())
            .ok_or(ConfigError::UnknownYear(year))?;

        let input = |files: &ExtractFiles, period: String| ExtractInput {
            coded_data_path: self.resolve(&files.coded_data_file),
            labelled_data_path: self.resolve(&files.label_data_file),
            survey_period: period,
        };

        Ok(YearPlan {
            year,
            dispatch_list: self.resolve(&section.dispatch_list),
            current: input(&section.current_year, survey_period(year)),
            previous: input(&section.previous_year, survey_period(year - 1)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[2021]
dispatch_list = "dispatch.csv"

[2021.current_year]
coded_data_file = "2021/extract.csv"
label_data_file = "2021/extract_labels.csv"

[2021.previous_year]
coded_data_file = "/data/2020/extract.csv"
label_data_file = "/data/2020/extract_labels.csv"
"#;

    #[test]
    fn test_survey_period_labels() {
        assert_eq!(survey_period(2021), "2021-22");
        assert_eq!(survey_period(2020), "2020-21");
        assert_eq!(survey_period(2099), "2099-00");
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.wide_fields.len(), 60);
        assert_eq!(config.entry_year_fields[0], "entry_year_eng");
        assert_eq!(config.pivot_fields().len(), 64);
        assert!(config.is_test_record("TEST-001"));
        assert!(!config.is_test_record("test-001"));
        assert!(!config.is_test_record("AB100"));
    }

    #[test]
    fn test_plan_for_year_resolves_paths() {
        let config = ConfigFile::from_toml(SAMPLE, "/srv/rred").unwrap();
        let plan = config.plan_for_year(2021).unwrap();

        assert_eq!(plan.dispatch_list, PathBuf::from("/srv/rred/dispatch.csv"));
        assert_eq!(plan.current.survey_period, "2021-22");
        assert_eq!(
            plan.current.coded_data_path,
            PathBuf::from("/srv/rred/2021/extract.csv")
        );
        assert_eq!(plan.previous.survey_period, "2020-21");
        assert_eq!(
            plan.previous.labelled_data_path,
            PathBuf::from("/data/2020/extract_labels.csv")
        );
        assert_eq!(config.years(), vec![2021]);
    }

    #[test]
    fn test_unknown_year() {
        let config = ConfigFile::from_toml(SAMPLE, ".").unwrap();
        assert!(matches!(
            config.plan_for_year(1999),
            Err(ConfigError::UnknownYear(1999))
        ));
    }

    #[test]
    fn test_settings_override() {
        let content = format!(
            "[settings]\ntest_record_prefixes = [\"SANDBOX\"]\n\n[settings.roster]\nschool_name = \"School Name\"\n{SAMPLE}"
        );
        let config = ConfigFile::from_toml(&content, ".").unwrap();
        assert_eq!(config.settings.test_record_prefixes, vec!["SANDBOX"]);
        assert_eq!(config.settings.roster.school_name, "School Name");
        assert_eq!(config.settings.roster.school_id, "RRED School ID");
        assert_eq!(config.settings.pupil_prefix, "pupil_");
    }

    #[test]
    fn test_invalid_setting_rejected() {
        let content = format!("[settings]\npupil_prefix = \"\"\n{SAMPLE}");
        assert!(matches!(
            ConfigFile::from_toml(&content, "."),
            Err(ConfigError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redcap_config.toml");
        fs::write(&path, SAMPLE).unwrap();

        let plan = ConfigFile::load(&path).unwrap().plan_for_year(2021).unwrap();
        assert_eq!(plan.dispatch_list, dir.path().join("dispatch.csv"));
    }
}
