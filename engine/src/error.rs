//! Error types for the RRED extraction pipeline.
//!
//! - [`CsvError`] - Tabular file reading and decoding
//! - [`RosterError`] - Dispatch list loading and lookups
//! - [`ExtractError`] - Coded/labelled extract processing
//! - [`AssemblyError`] - Masterfile integrity checks
//! - [`ConfigError`] - Configuration loading
//! - [`OutputError`] - Writing the masterfile and issue report
//! - [`PipelineError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// CSV Errors
// =============================================================================

/// Errors while reading tabular input.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Failed to read file.
    #[error("Failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed record.
    #[error("Invalid CSV at line {line}: {message}")]
    ParseError { line: u64, message: String },

    /// Empty file.
    #[error("CSV file is empty")]
    EmptyFile,

    /// No headers found.
    #[error("No headers found in CSV")]
    NoHeaders,
}

// =============================================================================
// Roster Errors
// =============================================================================

/// A school code mapped to more than one name in the dispatch list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchoolNameConflict {
    pub school_id: String,
    pub names: Vec<String>,
}

impl fmt::Display for SchoolNameConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.school_id, self.names.join(" | "))
    }
}

fn join_conflicts(conflicts: &[SchoolNameConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors from the dispatch list (roster).
#[derive(Debug, Error)]
pub enum RosterError {
    /// Underlying CSV error.
    #[error(transparent)]
    Csv(#[from] CsvError),

    /// Required column absent from the dispatch list.
    #[error("Dispatch list is missing column '{0}'")]
    MissingColumn(String),

    /// Same school code, different names.
    #[error("Schools of the same ID which have different names: {}", join_conflicts(.0))]
    DuplicateSchoolNames(Vec<SchoolNameConflict>),

    /// School code not present in the dispatch list.
    #[error("School not found in dispatch list: {0}")]
    SchoolNotFound(String),

    /// Neither a teacher nor a teacher-leader address is recorded.
    #[error("Missing contact email for schools with RRED IDs: {}", .0.join(", "))]
    MissingContact(Vec<String>),

    /// Rows for one code carry different labels.
    #[error("Multiple school labels found for school {0}")]
    AmbiguousLabel(String),
}

impl RosterError {
    /// School codes named by this error, if any.
    pub fn school_ids(&self) -> Vec<&str> {
        match self {
            RosterError::DuplicateSchoolNames(conflicts) => {
                conflicts.iter().map(|c| c.school_id.as_str()).collect()
            }
            RosterError::SchoolNotFound(id) | RosterError::AmbiguousLabel(id) => vec![id.as_str()],
            RosterError::MissingContact(ids) => ids.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

// =============================================================================
// Extract Errors
// =============================================================================

/// Errors while unifying and reshaping survey extracts.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Underlying CSV error.
    #[error(transparent)]
    Csv(#[from] CsvError),

    /// Coded and labelled exports must describe the same responses.
    #[error(
        "Coded and labelled extracts differ in shape: coded {coded_rows}x{coded_columns}, labelled {labelled_rows}x{labelled_columns}"
    )]
    ShapeMismatch {
        coded_rows: usize,
        coded_columns: usize,
        labelled_rows: usize,
        labelled_columns: usize,
    },

    /// Missing required column.
    #[error("Extract is missing required column '{0}'")]
    MissingColumn(String),
}

// =============================================================================
// Assembly Errors
// =============================================================================

/// Integrity errors while assembling the masterfile.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Two school records share a code but not a name.
    #[error("School {school_id} appears with different names: {first:?} and {second:?}")]
    ConflictingSchool {
        school_id: String,
        first: Option<String>,
        second: Option<String>,
    },

    /// Required masterfile column absent when reading one back.
    #[error("Masterfile is missing column '{0}'")]
    MissingColumn(String),
}

// =============================================================================
// Config Errors
// =============================================================================

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file unreadable.
    #[error("Failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for the expected layout.
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// No section for the requested survey year.
    #[error("No configuration found for survey year {0}")]
    UnknownYear(i32),

    /// Setting present but unusable.
    #[error("Invalid setting '{name}': {message}")]
    InvalidSetting { name: String, message: String },
}

// =============================================================================
// Output Errors
// =============================================================================

/// Errors while writing pipeline output.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Filesystem error.
    #[error("Failed to write '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV serialisation error.
    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    /// Buffered output could not be flushed.
    #[error("Failed to flush output: {0}")]
    Flush(#[from] std::io::Error),

    /// Workbook could not be built or saved.
    #[error("Failed to write workbook: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline errors. All of these are fatal for a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input file does not exist.
    #[error("Input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),

    #[error("Dispatch list error: {0}")]
    Roster(#[from] RosterError),

    #[error("Extract error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Masterfile error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for CSV operations.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for roster operations.
pub type RosterResult<T> = Result<T, RosterError>;

/// Result type for extract operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Result type for masterfile assembly.
pub type AssemblyResult<T> = Result<T, AssemblyError>;

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for output writers.
pub type OutputResult<T> = Result<T, OutputError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
