//! Transformation module.
//!
//! Survey exports to pupil records, one step per module:
//! - Unify: coded + labelled exports into one filtered wide table
//! - Columns: per-student column renaming and the slot index
//! - Pivot: wide to long, one row per occupied student slot
//! - Derive: computed fields and the entry/exit date filter
//! - Pipeline: per-period orchestration and the full yearly run

pub mod columns;
pub mod derive;
pub mod pipeline;
pub mod pivot;
pub mod unify;

pub use columns::{rename_pupil_columns, slot_column_name, SlotIndex};
pub use derive::{derive_records, DeriveStats};
pub use pipeline::{
    attach_school_names, build_masterfile, load_roster, process_period, read_extracts,
    read_single_period, run_year, RunSummary,
};
pub use pivot::{wide_to_long, LongRow, LongTable, PivotKey};
pub use unify::{unify_extracts, UnifiedExtract, UnifyStats, ROW_NUMBER_COLUMN};
