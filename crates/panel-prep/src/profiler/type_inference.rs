//! Column classification for inferred typing.
//!
//! [`classify`] is a pure function of a column's values: it never mutates the
//! series and does not depend on any other column.

use crate::config::PipelineConfig;
use crate::types::{CategoryLevels, CategorySpec, ColumnKind};
use crate::utils::{
    is_integral, is_missing_marker, is_numeric_dtype, parse_boolean_token, parse_numeric_string,
};
use polars::prelude::*;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;

/// Small code range of answer scales.
pub const SMALL_CODE_RANGE: RangeInclusive<i64> = 0..=10;

/// Survey years treated as categorical codes.
pub const SURVEY_YEAR_RANGE: RangeInclusive<i64> = 1990..=2024;

/// Knobs of the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferenceOptions {
    pub int_to_float: bool,
    pub bool_to_float: bool,
    pub max_string_categories: usize,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for InferenceOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            int_to_float: config.int_to_float,
            bool_to_float: config.bool_to_float,
            max_string_categories: config.max_string_categories,
        }
    }
}

/// Result of classifying one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: ColumnKind,
    /// The column mixes numeric and non-numeric values and was left as text.
    pub mixed: bool,
}

impl Classification {
    fn clean(kind: ColumnKind) -> Self {
        Self { kind, mixed: false }
    }
}

/// Classify a column by its value set.
///
/// Rules, in order:
/// 1. Native booleans and boolean tokens are Boolean (Float with widening).
/// 2. An all-missing column is Float.
/// 3. Numbers, including numeric-looking strings: integral values are
///    Integer (Float with widening) unless every value lies in the small code
///    range or the survey-year range, which makes them a Category.
///    Fractional values are Float.
/// 4. Non-numeric strings are a Category up to the distinct-value limit,
///    Text beyond it.
/// 5. Strings mixing numbers and words are Text, flagged as mixed.
pub fn classify(series: &Series, options: &InferenceOptions) -> Classification {
    let dtype = series.dtype();

    if dtype == &DataType::Boolean {
        return Classification::clean(boolean_kind(options));
    }

    if is_numeric_dtype(dtype) {
        let values: Vec<f64> = match crate::utils::f64_values(series) {
            Ok(values) => values.into_iter().flatten().collect(),
            Err(_) => return Classification::clean(ColumnKind::Text),
        };
        return Classification::clean(numeric_kind(&values, options));
    }

    if dtype == &DataType::Null {
        return Classification::clean(ColumnKind::Float);
    }

    if dtype != &DataType::String {
        return Classification::clean(ColumnKind::Text);
    }

    let Ok(str_series) = series.str() else {
        return Classification::clean(ColumnKind::Text);
    };
    let present: Vec<&str> = str_series
        .into_iter()
        .flatten()
        .filter(|v| !is_missing_marker(v))
        .collect();

    if present.is_empty() {
        return Classification::clean(ColumnKind::Float);
    }

    let numbers: Vec<f64> = present
        .iter()
        .filter_map(|v| parse_numeric_string(v))
        .collect();
    if numbers.len() == present.len() {
        return Classification::clean(numeric_kind(&numbers, options));
    }

    if present.iter().all(|v| parse_boolean_token(v).is_some()) {
        return Classification::clean(boolean_kind(options));
    }

    if !numbers.is_empty() {
        return Classification {
            kind: ColumnKind::Text,
            mixed: true,
        };
    }

    let distinct: BTreeSet<&str> = present.iter().map(|v| v.trim()).collect();
    if distinct.len() <= options.max_string_categories {
        let labels = distinct.into_iter().map(str::to_string).collect();
        Classification::clean(ColumnKind::Category(CategorySpec::labels(labels)))
    } else {
        Classification::clean(ColumnKind::Text)
    }
}

fn boolean_kind(options: &InferenceOptions) -> ColumnKind {
    if options.bool_to_float {
        ColumnKind::Float
    } else {
        ColumnKind::Boolean
    }
}

fn numeric_kind(values: &[f64], options: &InferenceOptions) -> ColumnKind {
    if values.is_empty() {
        return ColumnKind::Float;
    }
    if !values.iter().all(|v| is_integral(*v)) {
        return ColumnKind::Float;
    }

    let codes: BTreeSet<i64> = values.iter().map(|v| *v as i64).collect();
    let in_range = |range: &RangeInclusive<i64>| codes.iter().all(|c| range.contains(c));
    if in_range(&SMALL_CODE_RANGE) || in_range(&SURVEY_YEAR_RANGE) {
        return ColumnKind::Category(CategorySpec {
            levels: CategoryLevels::Codes(codes.into_iter().collect()),
            ordered: false,
        });
    }

    if options.int_to_float {
        ColumnKind::Float
    } else {
        ColumnKind::Integer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kind_of(series: &Series) -> ColumnKind {
        classify(series, &InferenceOptions::default()).kind
    }

    #[test]
    fn test_large_integers_are_integer() {
        let series = Series::new("income".into(), &[Some(1200i64), Some(3400), None]);
        assert_eq!(kind_of(&series), ColumnKind::Integer);
    }

    #[test]
    fn test_integer_widening() {
        let series = Series::new("income".into(), &[1200i64, 3400]);
        let options = InferenceOptions {
            int_to_float: true,
            ..InferenceOptions::default()
        };
        assert_eq!(classify(&series, &options).kind, ColumnKind::Float);
    }

    #[test]
    fn test_small_codes_are_category() {
        let series = Series::new("satisfaction".into(), &[Some(0.0), Some(10.0), Some(3.0), None]);
        assert_eq!(
            kind_of(&series),
            ColumnKind::Category(CategorySpec::codes(vec![0, 3, 10]))
        );
    }

    #[test]
    fn test_survey_years_are_category() {
        let series = Series::new("year".into(), &[1990i64, 2011, 2024]);
        assert_eq!(
            kind_of(&series),
            ColumnKind::Category(CategorySpec::codes(vec![1990, 2011, 2024]))
        );
    }

    #[test]
    fn test_year_outside_range_is_integer() {
        let series = Series::new("birth".into(), &[1950i64, 2011]);
        assert_eq!(kind_of(&series), ColumnKind::Integer);
    }

    #[test]
    fn test_fractions_are_float() {
        let series = Series::new("hours".into(), &[1.5, 40.0]);
        assert_eq!(kind_of(&series), ColumnKind::Float);
    }

    #[test]
    fn test_numeric_strings_are_coerced_first() {
        let series = Series::new("n".into(), &[Some("12"), Some("250"), Some("nan"), None]);
        assert_eq!(kind_of(&series), ColumnKind::Integer);
    }

    #[test]
    fn test_boolean_tokens() {
        let series = Series::new("b".into(), &["yes", "no", "Yes"]);
        assert_eq!(kind_of(&series), ColumnKind::Boolean);

        let options = InferenceOptions {
            bool_to_float: true,
            ..InferenceOptions::default()
        };
        assert_eq!(classify(&series, &options).kind, ColumnKind::Float);
    }

    #[test]
    fn test_few_labels_are_category() {
        let series = Series::new("city".into(), &["bonn", "berlin", "bonn"]);
        assert_eq!(
            kind_of(&series),
            ColumnKind::Category(CategorySpec::labels(vec![
                "berlin".to_string(),
                "bonn".to_string()
            ]))
        );
    }

    #[test]
    fn test_many_labels_are_text() {
        let labels: Vec<String> = (0..19).map(|i| format!("label {i}")).collect();
        let series = Series::new("comment".into(), labels);
        assert_eq!(kind_of(&series), ColumnKind::Text);
    }

    #[test]
    fn test_mixed_values_are_flagged() {
        let series = Series::new("odd".into(), &["1", "two", "3"]);
        let classification = classify(&series, &InferenceOptions::default());
        assert_eq!(classification.kind, ColumnKind::Text);
        assert!(classification.mixed);
    }

    #[test]
    fn test_all_missing_is_float() {
        let series = Series::new("empty".into(), &[None::<f64>, None]);
        assert_eq!(kind_of(&series), ColumnKind::Float);
    }
}
