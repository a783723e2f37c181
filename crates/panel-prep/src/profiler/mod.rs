//! Column profiling.
//!
//! This module provides:
//! - The pure column classifier used by inferred typing
//! - Summary statistics of cleaned variables

mod statistics;
mod type_inference;

pub use statistics::SummaryStatistics;
pub use type_inference::{
    classify, Classification, InferenceOptions, SMALL_CODE_RANGE, SURVEY_YEAR_RANGE,
};
