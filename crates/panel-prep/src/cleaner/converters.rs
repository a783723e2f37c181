//! Type conversion functions used by the type coercer.
//!
//! Every converter produces the storage type of its target kind. Failures are
//! returned as [`CastError`] so the caller can downgrade them to warnings.

use crate::types::CategoryLevels;
use crate::utils::{
    f64_values, format_number, is_integral, is_missing_marker, is_numeric_dtype,
    is_text_missing, parse_boolean_token, parse_numeric_string, string_values,
};
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap};

/// Why a column could not be converted.
#[derive(Debug, thiserror::Error)]
pub enum CastError {
    #[error("value '{0}' is not numeric")]
    NotNumeric(String),

    #[error("value {0} is not integral")]
    NotIntegral(f64),

    #[error("value '{0}' is not a boolean")]
    NotBoolean(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Read numbers strictly: any non-missing string that does not parse is an
/// error instead of silently becoming missing.
pub(crate) fn strict_numbers(series: &Series) -> Result<Vec<Option<f64>>, CastError> {
    if series.dtype() != &DataType::String {
        return Ok(f64_values(series)?);
    }

    let str_series = series.str()?;
    let mut values = Vec::with_capacity(str_series.len());
    for opt_val in str_series.into_iter() {
        match opt_val {
            Some(val) if is_missing_marker(val) => values.push(None),
            Some(val) => match parse_numeric_string(val) {
                Some(num) => values.push(Some(num)),
                None => return Err(CastError::NotNumeric(val.to_string())),
            },
            None => values.push(None),
        }
    }
    Ok(values)
}

/// Convert to Float64.
pub(crate) fn to_float(series: &Series) -> Result<Series, CastError> {
    let values = strict_numbers(series)?;
    Ok(Series::new(series.name().clone(), values))
}

/// Convert to Int64, rejecting fractional values.
pub(crate) fn to_integer(series: &Series) -> Result<Series, CastError> {
    let values = strict_numbers(series)?;
    let mut result_vec: Vec<Option<i64>> = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Some(v) if is_integral(v) => result_vec.push(Some(v as i64)),
            Some(v) => return Err(CastError::NotIntegral(v)),
            None => result_vec.push(None),
        }
    }
    Ok(Series::new(series.name().clone(), result_vec))
}

/// Convert to Boolean. Numbers must be 0 or 1.
pub(crate) fn to_boolean(series: &Series) -> Result<Series, CastError> {
    let dtype = series.dtype();
    if dtype == &DataType::Boolean {
        return Ok(series.clone());
    }

    let mut result_vec: Vec<Option<bool>> = Vec::with_capacity(series.len());
    if is_numeric_dtype(dtype) {
        for value in f64_values(series)? {
            match value {
                Some(v) if v == 1.0 => result_vec.push(Some(true)),
                Some(v) if v == 0.0 => result_vec.push(Some(false)),
                Some(v) => return Err(CastError::NotBoolean(format_number(v))),
                None => result_vec.push(None),
            }
        }
    } else {
        for value in string_values(series)? {
            match value {
                Some(v) if is_missing_marker(&v) => result_vec.push(None),
                Some(v) => {
                    let parsed = match v.trim() {
                        "1" => Some(true),
                        "0" => Some(false),
                        other => parse_boolean_token(other),
                    };
                    match parsed {
                        Some(b) => result_vec.push(Some(b)),
                        None => return Err(CastError::NotBoolean(v)),
                    }
                }
                None => result_vec.push(None),
            }
        }
    }
    Ok(Series::new(series.name().clone(), result_vec))
}

/// Convert to String. Blank and `nan` cells become null.
pub(crate) fn to_text(series: &Series) -> Result<Series, CastError> {
    let values: Vec<Option<String>> = string_values(series)?
        .into_iter()
        .map(|v| v.filter(|s| !is_text_missing(s)))
        .collect();
    Ok(Series::new(series.name().clone(), values))
}

/// Map values onto category levels.
///
/// Returns the converted series and the number of non-missing values that
/// were not among the levels (and became missing).
pub(crate) fn to_category(
    series: &Series,
    levels: &CategoryLevels,
) -> Result<(Series, usize), CastError> {
    let name = series.name().clone();
    match levels {
        CategoryLevels::Codes(codes) => {
            let mut dropped = 0;
            let values: Vec<Option<f64>> = strict_numbers(series)?
                .into_iter()
                .map(|value| match value {
                    Some(v) if is_integral(v) && codes.contains(&(v as i64)) => Some(v),
                    Some(_) => {
                        dropped += 1;
                        None
                    }
                    None => None,
                })
                .collect();
            Ok((Series::new(name, values), dropped))
        }
        CategoryLevels::Labels(labels) => {
            let mut dropped = 0;
            let values: Vec<Option<String>> = string_values(series)?
                .into_iter()
                .map(|value| match value {
                    Some(v) if is_text_missing(&v) => None,
                    Some(v) if labels.iter().any(|l| l == v.trim()) => Some(v.trim().to_string()),
                    Some(_) => {
                        dropped += 1;
                        None
                    }
                    None => None,
                })
                .collect();
            Ok((Series::new(name, values), dropped))
        }
    }
}

/// Levels observed in the data, sorted. Integer codes when every value is an
/// integral number, labels otherwise.
pub(crate) fn observed_levels(series: &Series) -> Result<CategoryLevels, CastError> {
    let present: Vec<String> = string_values(series)?
        .into_iter()
        .flatten()
        .filter(|v| !is_text_missing(v))
        .map(|v| v.trim().to_string())
        .collect();

    let codes: Option<BTreeSet<i64>> = present
        .iter()
        .map(|v| parse_numeric_string(v).filter(|n| is_integral(*n)).map(|n| n as i64))
        .collect();
    Ok(match codes {
        Some(codes) => CategoryLevels::Codes(codes.into_iter().collect()),
        None => {
            let labels: BTreeSet<String> = present.into_iter().collect();
            CategoryLevels::Labels(labels.into_iter().collect())
        }
    })
}

/// Recode values to the position of their level (0-based).
///
/// Returns the codes and the number of values outside the levels.
pub(crate) fn to_positional_codes(
    series: &Series,
    levels: &CategoryLevels,
) -> Result<(Vec<Option<i64>>, usize), CastError> {
    let positions: HashMap<String, i64> = levels
        .rendered()
        .into_iter()
        .enumerate()
        .map(|(i, level)| (level, i as i64))
        .collect();

    let mut dropped = 0;
    let codes = string_values(series)?
        .into_iter()
        .map(|value| match value {
            Some(v) if is_text_missing(&v) => None,
            Some(v) => match positions.get(v.trim()) {
                Some(code) => Some(*code),
                None => {
                    dropped += 1;
                    None
                }
            },
            None => None,
        })
        .collect();
    Ok((codes, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Helper function to check if a value at index is null
    fn is_null_at(series: &Series, idx: usize) -> bool {
        matches!(series.get(idx).unwrap(), AnyValue::Null)
    }

    // ========================================================================
    // Numeric conversions
    // ========================================================================

    #[test]
    fn test_to_integer_from_strings() {
        let series = Series::new("n".into(), &[Some("1"), Some(" 2 "), None, Some("nan")]);
        let result = to_integer(&series).unwrap();

        assert_eq!(result.dtype(), &DataType::Int64);
        assert_eq!(result.i64().unwrap().get(1), Some(2));
        assert!(is_null_at(&result, 2));
        assert!(is_null_at(&result, 3));
    }

    #[test]
    fn test_to_integer_rejects_fractions() {
        let series = Series::new("n".into(), &[1.0, 2.5]);
        let err = to_integer(&series).unwrap_err();
        assert!(matches!(err, CastError::NotIntegral(v) if v == 2.5));
    }

    #[test]
    fn test_to_float_rejects_text() {
        let series = Series::new("n".into(), &["1.5", "abc"]);
        let err = to_float(&series).unwrap_err();
        assert_eq!(err.to_string(), "value 'abc' is not numeric");
    }

    // ========================================================================
    // Boolean conversions
    // ========================================================================

    #[test]
    fn test_to_boolean_from_numbers() {
        let series = Series::new("b".into(), &[Some(1i64), Some(0), None]);
        let result = to_boolean(&series).unwrap();
        assert_eq!(result.bool().unwrap().get(0), Some(true));
        assert_eq!(result.bool().unwrap().get(1), Some(false));
        assert!(is_null_at(&result, 2));
    }

    #[test]
    fn test_to_boolean_rejects_other_codes() {
        let series = Series::new("b".into(), &[1i64, 2]);
        assert!(to_boolean(&series).is_err());
    }

    #[test]
    fn test_to_boolean_from_tokens() {
        let series = Series::new("b".into(), &["yes", "No", "TRUE"]);
        let result = to_boolean(&series).unwrap();
        assert_eq!(result.bool().unwrap().get(1), Some(false));
        assert_eq!(result.bool().unwrap().get(2), Some(true));
    }

    // ========================================================================
    // Category conversions
    // ========================================================================

    #[test]
    fn test_to_category_codes_drops_unknown_values() {
        let series = Series::new("c".into(), &[Some(1.0), Some(3.0), Some(9.0), None]);
        let (result, dropped) = to_category(&series, &CategoryLevels::Codes(vec![1, 2, 3])).unwrap();

        assert_eq!(dropped, 1);
        assert_eq!(result.dtype(), &DataType::Float64);
        assert_eq!(result.f64().unwrap().get(1), Some(3.0));
        assert!(is_null_at(&result, 2));
    }

    #[test]
    fn test_to_category_labels() {
        let series = Series::new("c".into(), &["full", "part", "other"]);
        let levels = CategoryLevels::Labels(vec!["full".into(), "part".into()]);
        let (result, dropped) = to_category(&series, &levels).unwrap();

        assert_eq!(dropped, 1);
        assert_eq!(result.str().unwrap().get(0), Some("full"));
        assert!(is_null_at(&result, 2));
    }

    #[test]
    fn test_observed_levels() {
        let codes = Series::new("c".into(), &[Some("2"), Some("1"), None, Some("2")]);
        assert_eq!(observed_levels(&codes).unwrap(), CategoryLevels::Codes(vec![1, 2]));

        let labels = Series::new("c".into(), &["b", "a", "1"]);
        assert_eq!(
            observed_levels(&labels).unwrap(),
            CategoryLevels::Labels(vec!["1".into(), "a".into(), "b".into()])
        );
    }

    #[test]
    fn test_positional_codes() {
        let series = Series::new("s".into(), &[Some("low"), Some("high"), Some("mid"), None]);
        let levels = CategoryLevels::Labels(vec!["low".into(), "mid".into(), "high".into()]);
        let (codes, dropped) = to_positional_codes(&series, &levels).unwrap();

        assert_eq!(codes, vec![Some(0), Some(2), Some(1), None]);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_to_text_normalizes_markers() {
        let series = Series::new("t".into(), &[Some("a"), Some(""), None, Some(" NaN")]);
        let result = to_text(&series).unwrap();
        assert_eq!(result.null_count(), 3);
    }

    #[test]
    fn test_to_text_keeps_word_values() {
        let series = Series::new("t".into(), &["NA", "None", "null"]);
        let result = to_text(&series).unwrap();
        assert_eq!(result.null_count(), 0);
        assert_eq!(result.str().unwrap().get(1), Some("None"));
    }

    #[test]
    fn test_labels_may_spell_missing_words() {
        let series = Series::new("c".into(), &[Some("NA"), Some("eu"), Some(""), None]);
        let levels = CategoryLevels::Labels(vec!["NA".into(), "eu".into()]);
        let (result, dropped) = to_category(&series, &levels).unwrap();

        assert_eq!(dropped, 0);
        assert_eq!(result.str().unwrap().get(0), Some("NA"));
        assert_eq!(result.null_count(), 2);
    }
}
