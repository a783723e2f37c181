//! Column cleaning stages.
//!
//! This module provides:
//! - Schema-driven renaming and dropping of raw columns
//! - Sentinel code replacement
//! - Configured value replacement
//! - Declared and inferred type coercion

mod converters;
mod renamer;
mod replacer;
mod sentinels;
mod type_coercer;

pub use renamer::ColumnRenamer;
pub use replacer::{strip_label_code, ValueReplacer};
pub use sentinels::SentinelNormalizer;
pub use type_coercer::TypeCoercer;
