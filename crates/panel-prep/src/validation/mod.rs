//! Validation of cleaned tables.
//!
//! This module provides:
//! - Structural checks (unique index and columns, one missing encoding,
//!   no all-missing columns)
//! - Sum-to-constant invariants with optional row filters

mod checks;
mod query;
mod sum_check;

pub use checks::{
    check_no_empty_columns, check_unique_columns, check_unique_index, check_unique_keys,
    normalize_missing, StructuralChecks,
};
pub use query::RowQuery;
pub use sum_check::{check_sums, run_sum_check, SUM_TOLERANCE};
