//! Shared utilities for the cleaning pipeline.
//!
//! Helpers for reading cell values out of series regardless of their physical
//! type, so the stages can reason about values rather than dtypes.

use polars::prelude::*;

// =============================================================================
// Data Type Utilities
// =============================================================================

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    is_integer_dtype(dtype) || is_float_dtype(dtype)
}

/// Check if a DataType is an integer type.
#[inline]
pub fn is_integer_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

/// Check if a DataType is a floating point type.
#[inline]
pub fn is_float_dtype(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Float32 | DataType::Float64)
}

// =============================================================================
// String Parsing Utilities
// =============================================================================

/// String spellings of a missing cell found in raw extracts.
pub const MISSING_MARKERS: [&str; 6] = ["", "nan", "na", "n/a", "null", "none"];

/// Common boolean true representations.
pub const BOOLEAN_TRUE_VALUES: [&str; 4] = ["true", "t", "yes", "y"];

/// Common boolean false representations.
pub const BOOLEAN_FALSE_VALUES: [&str; 4] = ["false", "f", "no", "n"];

/// Check if a string is a textual missing marker.
///
/// # Example
///
/// ```rust,ignore
/// use panel_prep::utils::is_missing_marker;
///
/// assert!(is_missing_marker(" NaN "));
/// assert!(!is_missing_marker("0"));
/// ```
pub fn is_missing_marker(s: &str) -> bool {
    let lower = s.trim().to_ascii_lowercase();
    MISSING_MARKERS.iter().any(|&marker| lower == marker)
}

/// Spellings of a missing cell in text and label columns. Words such as
/// `"NA"` or `"None"` are legitimate text there.
pub const TEXT_MISSING_MARKERS: [&str; 2] = ["", "nan"];

/// Check if a string marks a missing cell of a text column.
pub fn is_text_missing(s: &str) -> bool {
    let lower = s.trim().to_ascii_lowercase();
    TEXT_MISSING_MARKERS.iter().any(|&marker| lower == marker)
}

/// Try to parse a string as a finite number.
pub fn parse_numeric_string(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if is_missing_marker(trimmed) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a boolean token (`true`, `no`, ...). Digits are not booleans here.
pub fn parse_boolean_token(s: &str) -> Option<bool> {
    let lower = s.trim().to_ascii_lowercase();
    if BOOLEAN_TRUE_VALUES.contains(&lower.as_str()) {
        Some(true)
    } else if BOOLEAN_FALSE_VALUES.contains(&lower.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Whether a value has no fractional part.
#[inline]
pub fn is_integral(value: f64) -> bool {
    value.is_finite() && value.fract() == 0.0
}

/// Render a number the way it appears in survey codebooks: integral values
/// without a decimal point.
pub fn format_number(value: f64) -> String {
    if is_integral(value) && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Round half away from zero to a number of decimals.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

// =============================================================================
// Series Value Extraction
// =============================================================================

/// Read a series as optional floats.
///
/// Numeric columns are cast, booleans become 1.0/0.0, strings are parsed.
/// NaN and unparsable strings are reported as missing.
pub fn f64_values(series: &Series) -> PolarsResult<Vec<Option<f64>>> {
    let dtype = series.dtype();
    if is_numeric_dtype(dtype) {
        let cast = series.cast(&DataType::Float64)?;
        let values = cast
            .f64()?
            .into_iter()
            .map(|v| v.filter(|x| !x.is_nan()))
            .collect();
        return Ok(values);
    }

    match dtype {
        DataType::Boolean => Ok(series
            .bool()?
            .into_iter()
            .map(|v| v.map(|b| if b { 1.0 } else { 0.0 }))
            .collect()),
        DataType::String => Ok(series
            .str()?
            .into_iter()
            .map(|v| v.and_then(parse_numeric_string))
            .collect()),
        DataType::Null => Ok(vec![None; series.len()]),
        other => Err(PolarsError::ComputeError(
            format!("cannot read column '{}' of type {other} as numbers", series.name()).into(),
        )),
    }
}

/// Read a series as optional strings, rendering numbers without spurious
/// decimals.
pub fn string_values(series: &Series) -> PolarsResult<Vec<Option<String>>> {
    let dtype = series.dtype();
    if dtype == &DataType::String {
        return Ok(series
            .str()?
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect());
    }
    if is_numeric_dtype(dtype) {
        return Ok(f64_values(series)?
            .into_iter()
            .map(|v| v.map(format_number))
            .collect());
    }
    if dtype == &DataType::Boolean {
        return Ok(series
            .bool()?
            .into_iter()
            .map(|v| v.map(|b| b.to_string()))
            .collect());
    }

    let cast = series.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// Count NaN cells in a float series. Zero for any other type.
pub fn count_nan(series: &Series) -> usize {
    match series.dtype() {
        DataType::Float64 => series
            .f64()
            .map(|ca| ca.into_iter().flatten().filter(|v| v.is_nan()).count())
            .unwrap_or(0),
        DataType::Float32 => series
            .f32()
            .map(|ca| ca.into_iter().flatten().filter(|v| v.is_nan()).count())
            .unwrap_or(0),
        _ => 0,
    }
}

/// Whether every cell of a series is missing (null or NaN).
pub fn is_all_missing(series: &Series) -> bool {
    series.null_count() + count_nan(series) == series.len()
}

// =============================================================================
// Tests
// =============================================================================
