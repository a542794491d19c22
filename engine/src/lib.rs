//! # rred - Reading Recovery survey extraction and reconciliation
//!
//! Turns periodic survey exports (one row per teacher response, with
//! repeated per-student column groups) into a canonical long masterfile of
//! one row per pupil per survey period, and reconciles its school and
//! teacher ids against the dispatch list.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ coded +     │────▶│   Unify     │────▶│   Pivot +   │────▶│ Masterfile  │
//! │ labelled    │     │ (filter,    │     │   Derive    │     │ (sorted)    │
//! │ exports     │     │  coalesce)  │     │             │     │             │
//! └─────────────┘     └─────────────┘     └─────────────┘     └──────┬──────┘
//!                                                ▲                   │
//! ┌─────────────┐                                │ school names      ▼
//! │  Dispatch   │────────────────────────────────┴──────────▶ ┌─────────────┐
//! │  list       │                                             │ Reconcile   │
//! └─────────────┘                                             │ (issues)    │
//!                                                             └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rred::{run_year, ConfigFile};
//! use std::path::Path;
//!
//! let config = ConfigFile::load(Path::new("redcap_config.toml"))?;
//! let plan = config.plan_for_year(2021)?;
//! let summary = run_year(&plan, &config.settings, Path::new("output"))?;
//! println!("{} rows, {} issues", summary.rows, summary.issues.len());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`config`] - Pipeline configuration and survey periods
//! - [`logs`] - Step logging and subscriber setup
//! - [`models`] - Domain models (Table, LongPupilRecord, TeacherRecord, SchoolRecord)
//! - [`parser`] - CSV reading and writing with auto-detection
//! - [`roster`] - Dispatch list loading and mailing lookup
//! - [`transform`] - Unify, pivot, derive and the yearly pipeline
//! - [`masterfile`] - Masterfile assembly and output
//! - [`validation`] - Reconciliation against the dispatch list
//! - [`report`] - Reporting-year filters and school summaries

// Core modules
pub mod config;
pub mod error;
pub mod logs;
pub mod models;

// Input and output
pub mod parser;
pub mod roster;

// Transformation
pub mod masterfile;
pub mod transform;

// Reconciliation and reporting
pub mod report;
pub mod validation;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    AssemblyError, ConfigError, CsvError, ExtractError, OutputError, PipelineError,
    PipelineResult, RosterError, SchoolNameConflict,
};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::{survey_period, ConfigFile, ExtractInput, PipelineConfig, RosterColumns, YearPlan};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{LongPupilRecord, SchoolRecord, Summer, Table, TeacherRecord};

// =============================================================================
// Re-exports - CSV Parsing
// =============================================================================

pub use parser::{
    decode_content, detect_delimiter, detect_encoding, parse_bytes_auto, parse_csv_file_auto,
    parse_str, read_table, ParseResult,
};

// =============================================================================
// Re-exports - Roster
// =============================================================================

pub use roster::{MailingInfo, Roster, RosterEntry};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use masterfile::{assemble, Masterfile, MasterfileRow};
pub use transform::pipeline::{build_masterfile, process_period, run_year, RunSummary};

// =============================================================================
// Re-exports - Reconciliation and reporting
// =============================================================================

pub use report::{ReportTable, ReportingWindow, SchoolSummary};
pub use validation::{reconcile, reconcile_year, write_issues_if_exist, ValidationIssue};
