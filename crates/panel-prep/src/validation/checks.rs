//! Structural checks run after every mutating stage.

use crate::error::{PanelError, PipelineWarning, Result};
use crate::types::{ActionType, CleaningAction, PanelFrame, StageLog};
use crate::utils::{count_nan, is_all_missing, is_float_dtype, string_values};
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Number of offending items spelled out in an error message.
const MAX_LISTED: usize = 10;

/// Render each row's key tuple, e.g. `(101, 2011)`. Without keys, rows are
/// labelled by position.
pub(crate) fn row_labels(df: &DataFrame, keys: &[String]) -> Result<Vec<String>> {
    if keys.is_empty() {
        return Ok((0..df.height()).map(|i| format!("row {i}")).collect());
    }

    let mut rendered = Vec::with_capacity(keys.len());
    for key in keys {
        let column = df
            .column(key)
            .map_err(|_| PanelError::ColumnNotFound(key.clone()))?;
        rendered.push(string_values(column.as_materialized_series())?);
    }

    Ok((0..df.height())
        .map(|row| {
            let parts: Vec<&str> = rendered
                .iter()
                .map(|values| values[row].as_deref().unwrap_or("null"))
                .collect();
            format!("({})", parts.join(", "))
        })
        .collect())
}

fn listed(items: &[String]) -> String {
    let mut text = items
        .iter()
        .take(MAX_LISTED)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if items.len() > MAX_LISTED {
        text.push_str(&format!(" and {} more", items.len() - MAX_LISTED));
    }
    text
}

/// Fail if any key tuple occurs more than once.
pub fn check_unique_keys(df: &DataFrame, keys: &[String]) -> Result<()> {
    if keys.is_empty() {
        return Ok(());
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order = Vec::new();
    for label in row_labels(df, keys)? {
        let count = counts.entry(label.clone()).or_insert(0);
        *count += 1;
        if *count == 2 {
            order.push(label);
        }
    }

    if !order.is_empty() {
        return Err(PanelError::Integrity(format!(
            "duplicate index tuples on [{}]: {}",
            keys.join(", "),
            listed(&order)
        )));
    }
    Ok(())
}

/// Fail if the frame's index has duplicate tuples.
pub fn check_unique_index(frame: &PanelFrame) -> Result<()> {
    check_unique_keys(frame.data(), frame.index())
}

/// Fail if a column name occurs more than once.
pub fn check_unique_columns(frame: &PanelFrame) -> Result<()> {
    let mut seen = HashSet::new();
    let duplicated: Vec<String> = frame
        .column_names()
        .into_iter()
        .filter(|name| !seen.insert(name.clone()))
        .collect();
    if !duplicated.is_empty() {
        return Err(PanelError::Integrity(format!(
            "duplicate column names: {}",
            listed(&duplicated)
        )));
    }
    Ok(())
}

/// Fail if any column outside `allowed` has no observed value.
pub fn check_no_empty_columns(frame: &PanelFrame, allowed: &[String]) -> Result<()> {
    if frame.height() == 0 {
        return Ok(());
    }

    let mut empty = Vec::new();
    for name in frame.column_names() {
        if allowed.contains(&name) {
            continue;
        }
        if is_all_missing(frame.series(&name)?) {
            empty.push(name);
        }
    }

    if !empty.is_empty() {
        return Err(PanelError::Integrity(format!(
            "columns without any observed value: {}",
            listed(&empty)
        )));
    }
    Ok(())
}

/// Convert the second missing encoding (float NaN, empty strings) to null.
///
/// A warning is raised only for columns that held both encodings at once.
pub fn normalize_missing(frame: PanelFrame) -> Result<(PanelFrame, StageLog)> {
    let mut frame = frame;
    let mut log = StageLog::new();

    for name in frame.column_names() {
        let series = frame.series(&name)?;
        let nulls = series.null_count();

        let (normalized, count) = if is_float_dtype(series.dtype()) {
            let count = count_nan(series);
            if count == 0 {
                continue;
            }
            let values: Vec<Option<f64>> = series
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .map(|v| v.filter(|x| !x.is_nan()))
                .collect();
            let normalized = Series::new(name.as_str().into(), values).cast(series.dtype())?;
            (normalized, count)
        } else if series.dtype() == &DataType::String {
            let str_series = series.str()?;
            let count = str_series
                .into_iter()
                .flatten()
                .filter(|v| v.trim().is_empty())
                .count();
            if count == 0 {
                continue;
            }
            let values: Vec<Option<&str>> = str_series
                .into_iter()
                .map(|v| v.filter(|s| !s.trim().is_empty()))
                .collect();
            (Series::new(name.as_str().into(), values), count)
        } else {
            continue;
        };

        debug!("{}: {} cells normalized to null", name, count);
        if nulls > 0 {
            log.warn(PipelineWarning::MissingRepresentation {
                column: name.clone(),
                normalized: count,
            });
        }
        frame.replace_values(normalized)?;
        log.action(CleaningAction::new(
            ActionType::MissingNormalized,
            name.as_str(),
            format!("{count} cells normalized to null"),
        ));
    }

    Ok((frame, log))
}

/// The structural checks run between stages.
#[derive(Debug, Clone, Default)]
pub struct StructuralChecks {
    /// Columns allowed to be entirely missing.
    pub allow_all_missing: Vec<String>,
}

impl StructuralChecks {
    pub fn new(allow_all_missing: Vec<String>) -> Self {
        Self { allow_all_missing }
    }

    /// Uniqueness, missing representation, then empty columns.
    pub fn run(&self, frame: PanelFrame) -> Result<(PanelFrame, StageLog)> {
        check_unique_columns(&frame)?;
        check_unique_index(&frame)?;
        let (frame, log) = normalize_missing(frame)?;
        check_no_empty_columns(&frame, &self.allow_all_missing)?;
        Ok((frame, log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_row_labels() {
        let df = df! {
            "pid" => &[Some(1i64), None],
            "year" => &[2011.0, 2012.0],
        }
        .unwrap();
        let labels = row_labels(&df, &["pid".to_string(), "year".to_string()]).unwrap();
        assert_eq!(labels, vec!["(1, 2011)", "(null, 2012)"]);
    }

    #[test]
    fn test_duplicate_index_is_listed() {
        let df = df! {
            "pid" => &[1i64, 1, 2, 1],
            "year" => &[2011i64, 2011, 2011, 2012],
        }
        .unwrap();
        let frame = PanelFrame::new(df).with_index(["pid", "year"]);

        let err = check_unique_index(&frame).unwrap_err();

        assert_eq!(err.error_code(), "INTEGRITY_ERROR");
        assert!(err.to_string().contains("(1, 2011)"));
        assert!(!err.to_string().contains("(2, 2011)"));
    }

    #[test]
    fn test_unique_index_passes() {
        let df = df! { "pid" => &[1i64, 2], "year" => &[2011i64, 2011] }.unwrap();
        let frame = PanelFrame::new(df).with_index(["pid", "year"]);
        assert!(check_unique_index(&frame).is_ok());
    }

    #[test]
    fn test_empty_column_respects_allow_list() {
        let df = df! {
            "a" => &[Some(1i64), None],
            "b" => &[None::<f64>, Some(f64::NAN)],
        }
        .unwrap();
        let frame = PanelFrame::new(df);

        let err = check_no_empty_columns(&frame, &[]).unwrap_err();
        assert!(err.to_string().ends_with("value: b"));
        assert!(check_no_empty_columns(&frame, &["b".to_string()]).is_ok());
    }

    #[test]
    fn test_normalize_missing_warns_on_mixed_encodings() {
        let df = df! {
            "mixed" => &[Some(1.0), Some(f64::NAN), None],
            "nan_only" => &[Some(1.0), Some(f64::NAN), Some(2.0)],
            "text" => &[Some("a"), Some(" "), None],
        }
        .unwrap();

        let (frame, log) = normalize_missing(PanelFrame::new(df)).unwrap();

        assert_eq!(frame.series("mixed").unwrap().null_count(), 2);
        assert_eq!(frame.series("nan_only").unwrap().null_count(), 1);
        assert_eq!(frame.series("text").unwrap().null_count(), 2);
        assert_eq!(log.actions.len(), 3);
        assert_eq!(
            log.warnings,
            vec![
                PipelineWarning::MissingRepresentation {
                    column: "mixed".to_string(),
                    normalized: 1,
                },
                PipelineWarning::MissingRepresentation {
                    column: "text".to_string(),
                    normalized: 1,
                },
            ]
        );
    }

    #[test]
    fn test_structural_checks_are_idempotent() {
        let df = df! { "a" => &[Some(1.0), Some(f64::NAN), Some(3.0)] }.unwrap();
        let checks = StructuralChecks::default();

        let (once, _) = checks.run(PanelFrame::new(df)).unwrap();
        let (twice, log) = checks.run(once.clone()).unwrap();

        assert!(once.data().equals_missing(twice.data()));
        assert!(log.actions.is_empty());
    }
}
