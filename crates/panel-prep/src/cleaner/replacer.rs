//! Configured value replacement.
//!
//! Runs between sentinel normalization and type coercion. Each rule works on
//! one column at a time; a rule that cannot be applied leaves its column
//! unchanged and records a warning. Value maps that match nothing in a column
//! leave it untouched.

use crate::error::{PipelineWarning, Result};
use crate::schema::{DatasetSchema, DeclaredType, ReplaceSpec};
use crate::types::{ActionType, CleaningAction, PanelFrame, StageLog};
use crate::utils::{f64_values, format_number, is_integer_dtype, is_numeric_dtype, string_values};
use chrono::NaiveTime;
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

/// Bracketed answer-code prefix of a value label, e.g. `"[-1] "`.
static LABEL_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[-?\d*\] ").expect("Invalid regex: label code"));

type ValueMap = BTreeMap<String, serde_json::Value>;
type RuleResult = std::result::Result<Option<Series>, String>;

/// Remove every bracketed code prefix from a label.
pub fn strip_label_code(value: &str) -> String {
    LABEL_CODE.replace_all(value, "").into_owned()
}

/// Applies a dataset's [`ReplaceSpec`].
pub struct ValueReplacer<'a> {
    spec: &'a ReplaceSpec,
    schema: &'a DatasetSchema,
}

impl<'a> ValueReplacer<'a> {
    /// `schema` resolves the columns of type-wide value maps.
    pub fn new(spec: &'a ReplaceSpec, schema: &'a DatasetSchema) -> Self {
        Self { spec, schema }
    }

    /// Apply every rule in order: lowercase, numeric, label codes, type maps,
    /// column-group maps, column maps, table-wide map, fill values, clock times.
    pub fn apply(&self, frame: PanelFrame) -> Result<(PanelFrame, StageLog)> {
        let mut frame = frame;
        let mut log = StageLog::new();

        for column in &self.spec.lowercase {
            self.apply_rule(&mut frame, &mut log, column, "Lower-cased values", |s| {
                map_strings(s, |v| v.to_lowercase()).map(Some)
            })?;
        }

        for column in &self.spec.numeric {
            self.apply_rule(&mut frame, &mut log, column, "Coerced to numbers", |s| {
                let values = f64_values(s).map_err(|e| e.to_string())?;
                Ok(Some(Series::new(s.name().clone(), values)))
            })?;
        }

        for column in &self.spec.strip_label_codes {
            self.apply_rule(&mut frame, &mut log, column, "Stripped label codes", |s| {
                map_strings(s, strip_label_code).map(Some)
            })?;
        }

        for (token, map) in &self.spec.by_type {
            let Some(declared) = DeclaredType::parse(token)? else {
                continue;
            };
            let description = format!(
                "Applied {} value replacements for type {declared}",
                map.len()
            );
            for column in self.columns_of_type(declared) {
                if !frame.has_column(&column) {
                    debug!("Type replacement: '{}' not in table", column);
                    continue;
                }
                self.apply_rule(&mut frame, &mut log, &column, &description, |s| {
                    replace_mapped(s, map)
                })?;
            }
        }

        for (group, replace) in &self.spec.multicolumn {
            let description = format!(
                "Applied {} value replacements of group {group}",
                replace.values.len()
            );
            for column in &replace.columns {
                self.apply_rule(&mut frame, &mut log, column, &description, |s| {
                    replace_mapped(s, &replace.values)
                })?;
            }
        }

        for (column, map) in &self.spec.columns {
            self.apply_rule(
                &mut frame,
                &mut log,
                column,
                &format!("Applied {} value replacements", map.len()),
                |s| replace_mapped(s, map),
            )?;
        }

        if !self.spec.all_columns.is_empty() {
            let description = format!(
                "Applied {} table-wide value replacements",
                self.spec.all_columns.len()
            );
            for column in frame.column_names() {
                self.apply_rule(&mut frame, &mut log, &column, &description, |s| {
                    replace_mapped(s, &self.spec.all_columns)
                })?;
            }
        }

        for (column, value) in &self.spec.fillna {
            self.apply_rule(&mut frame, &mut log, column, "Filled missing values", |s| {
                fill_missing(s, value).map(Some)
            })?;
        }

        for column in &self.spec.time_columns {
            self.apply_rule(&mut frame, &mut log, column, "Rendered seconds as clock times", |s| {
                seconds_to_clock(s).map(Some)
            })?;
        }

        Ok((frame, log))
    }

    /// Canonical names the rename table declares with `declared`.
    fn columns_of_type(&self, declared: DeclaredType) -> Vec<String> {
        self.schema
            .entries
            .iter()
            .filter(|e| e.declared_type == Some(declared))
            .filter_map(|e| e.new_name.clone())
            .collect()
    }

    fn apply_rule<F>(
        &self,
        frame: &mut PanelFrame,
        log: &mut StageLog,
        column: &str,
        description: &str,
        rule: F,
    ) -> Result<()>
    where
        F: FnOnce(&Series) -> RuleResult,
    {
        let Ok(series) = frame.series(column) else {
            log.warn(PipelineWarning::Replacement {
                column: column.to_string(),
                reason: "column not present".to_string(),
            });
            return Ok(());
        };

        match rule(series) {
            Ok(Some(replaced)) => {
                debug!("{}: {}", column, description);
                frame.replace_values(replaced)?;
                log.action(CleaningAction::new(
                    ActionType::ValueReplaced,
                    column,
                    description,
                ));
            }
            Ok(None) => debug!("{}: no value matched", column),
            Err(reason) => log.warn(PipelineWarning::Replacement {
                column: column.to_string(),
                reason,
            }),
        }
        Ok(())
    }
}

fn map_strings<F>(series: &Series, f: F) -> std::result::Result<Series, String>
where
    F: Fn(&str) -> String,
{
    if series.dtype() != &DataType::String {
        return Err(format!("expected text values, found {}", series.dtype()));
    }
    let str_series = series.str().map_err(|e| e.to_string())?;
    let values: Vec<Option<String>> = str_series.into_iter().map(|v| v.map(&f)).collect();
    Ok(Series::new(series.name().clone(), values))
}

/// Replace cells whose rendered value is a key of `map`. `None` when no cell
/// matches.
///
/// Numeric columns stay numeric when every replacement is a number or null;
/// otherwise the column becomes text.
fn replace_mapped(series: &Series, map: &ValueMap) -> RuleResult {
    let name = series.name().clone();
    let numeric_targets = map
        .values()
        .all(|v| v.is_number() || v.is_null());
    let mut hits = 0usize;

    if is_numeric_dtype(series.dtype()) && numeric_targets {
        let values: Vec<Option<f64>> = f64_values(series)
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|cell| match cell {
                Some(v) => match map.get(&format_number(v)) {
                    Some(target) => {
                        hits += 1;
                        target.as_f64()
                    }
                    None => Some(v),
                },
                None => None,
            })
            .collect();
        return Ok((hits > 0).then(|| Series::new(name, values)));
    }

    let values: Vec<Option<String>> = string_values(series)
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|cell| match cell {
            Some(v) => match map.get(&v) {
                Some(target) => {
                    hits += 1;
                    json_to_cell(target)
                }
                None => Some(v),
            },
            None => None,
        })
        .collect();
    Ok((hits > 0).then(|| Series::new(name, values)))
}

fn json_to_cell(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => n.as_f64().map(format_number),
        other => Some(other.to_string()),
    }
}

/// Fill missing cells with a value of the column's own type.
fn fill_missing(
    series: &Series,
    value: &serde_json::Value,
) -> std::result::Result<Series, String> {
    let name = series.name().clone();
    let dtype = series.dtype();

    match value {
        serde_json::Value::Number(n) if is_numeric_dtype(dtype) => {
            let fill = n.as_f64().ok_or_else(|| format!("invalid fill value {n}"))?;
            let values: Vec<Option<f64>> = f64_values(series)
                .map_err(|e| e.to_string())?
                .into_iter()
                .map(|v| v.or(Some(fill)))
                .collect();
            let filled = Series::new(name, values);
            if is_integer_dtype(dtype) && fill.fract() == 0.0 {
                filled.cast(dtype).map_err(|e| e.to_string())
            } else {
                Ok(filled)
            }
        }
        serde_json::Value::String(s) if dtype == &DataType::String => {
            let values: Vec<Option<String>> = string_values(series)
                .map_err(|e| e.to_string())?
                .into_iter()
                .map(|v| v.or_else(|| Some(s.clone())))
                .collect();
            Ok(Series::new(name, values))
        }
        serde_json::Value::Bool(b) if dtype == &DataType::Boolean => {
            let values: Vec<Option<bool>> = series
                .bool()
                .map_err(|e| e.to_string())?
                .into_iter()
                .map(|v| v.or(Some(*b)))
                .collect();
            Ok(Series::new(name, values))
        }
        other => Err(format!("fill value {other} does not match column type {dtype}")),
    }
}

/// Render whole seconds since midnight as `HH:MM:SS`. Fractions are floored.
fn seconds_to_clock(series: &Series) -> std::result::Result<Series, String> {
    if !is_numeric_dtype(series.dtype()) {
        return Err(format!("expected seconds, found {}", series.dtype()));
    }

    let values = f64_values(series)
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|cell| {
            cell.map(|seconds| {
                let out_of_day =
                    || format!("{} seconds is not a time of day", format_number(seconds));
                let whole = seconds.floor();
                if !(0.0..86_400.0).contains(&whole) {
                    return Err(out_of_day());
                }
                NaiveTime::from_num_seconds_from_midnight_opt(whole as u32, 0)
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .ok_or_else(out_of_day)
            })
            .transpose()
        })
        .collect::<std::result::Result<Vec<Option<String>>, String>>()?;
    Ok(Series::new(series.name().clone(), values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaEntry;
    use serde_json::json;

    fn spec() -> ReplaceSpec {
        serde_json::from_value(json!({
            "lowercase": ["city"],
            "numeric": ["income"],
            "strip_label_codes": ["answer"],
            "columns": { "sex": { "1": 0, "2": 1 }, "city": { "bonn": "cologne" } },
            "fillna": { "children": 0 }
        }))
        .unwrap()
    }

    #[test]
    fn test_strip_label_code() {
        assert_eq!(strip_label_code("[-1] no answer"), "no answer");
        assert_eq!(strip_label_code("[3] often"), "often");
        assert_eq!(strip_label_code("plain"), "plain");
    }

    #[test]
    fn test_apply_all_rules() {
        let df = df! {
            "city" => &["Bonn", "BERLIN"],
            "income" => &["1200", "n/a"],
            "answer" => &["[1] yes", "[2] no"],
            "sex" => &[1i64, 2],
            "children" => &[Some(2i64), None],
        }
        .unwrap();

        let schema = DatasetSchema::default();
        let (frame, log) = ValueReplacer::new(&spec(), &schema)
            .apply(PanelFrame::new(df))
            .unwrap();

        let city = frame.series("city").unwrap().str().unwrap();
        assert_eq!(city.get(0), Some("cologne"));
        assert_eq!(city.get(1), Some("berlin"));

        let income = frame.series("income").unwrap().f64().unwrap();
        assert_eq!(income.get(0), Some(1200.0));
        assert_eq!(income.get(1), None);

        assert_eq!(frame.series("answer").unwrap().str().unwrap().get(1), Some("no"));

        let sex = frame.series("sex").unwrap().f64().unwrap();
        assert_eq!(sex.get(0), Some(0.0));
        assert_eq!(sex.get(1), Some(1.0));

        let children = frame.series("children").unwrap();
        assert_eq!(children.dtype(), &DataType::Int64);
        assert_eq!(children.i64().unwrap().get(1), Some(0));

        assert!(log.warnings.is_empty());
        assert_eq!(log.actions.len(), 6);
    }

    #[test]
    fn test_failing_rule_leaves_column_unchanged() {
        let spec: ReplaceSpec = serde_json::from_value(json!({
            "lowercase": ["age", "absent"],
            "fillna": { "age": "unknown" }
        }))
        .unwrap();
        let df = df! { "age" => &[Some(30i64), None] }.unwrap();

        let schema = DatasetSchema::default();
        let (frame, log) = ValueReplacer::new(&spec, &schema)
            .apply(PanelFrame::new(df))
            .unwrap();

        assert_eq!(frame.series("age").unwrap().dtype(), &DataType::Int64);
        assert_eq!(frame.series("age").unwrap().null_count(), 1);
        assert_eq!(log.warnings.len(), 3);
        assert!(log.actions.is_empty());
    }

    #[test]
    fn test_type_group_and_table_wide_maps() {
        let schema = DatasetSchema::new(vec![
            SchemaEntry::rename("A", "agree_1").with_type(DeclaredType::Bool),
            SchemaEntry::rename("B", "agree_2").with_type(DeclaredType::Bool),
            SchemaEntry::rename("C", "city"),
            SchemaEntry::rename("D", "gone").with_type(DeclaredType::Bool),
        ]);
        let spec: ReplaceSpec = serde_json::from_value(json!({
            "by_type": { "bool": { "yes": 1, "no": 0 } },
            "multicolumn": { "agreement": {
                "columns": ["q1", "q2"],
                "values": { "fully agree": 4, "disagree": 1 }
            } },
            "all_columns": { "refused": null }
        }))
        .unwrap();
        let df = df! {
            "agree_1" => &["yes", "no"],
            "agree_2" => &["no", "refused"],
            "q1" => &["fully agree", "disagree"],
            "q2" => &["disagree", "refused"],
            "city" => &["bonn", "refused"],
            "count" => &[1i64, 2],
        }
        .unwrap();

        let (frame, log) = ValueReplacer::new(&spec, &schema)
            .apply(PanelFrame::new(df))
            .unwrap();

        let agree_1 = frame.series("agree_1").unwrap().str().unwrap();
        assert_eq!(agree_1.get(0), Some("1"));
        assert_eq!(agree_1.get(1), Some("0"));
        assert_eq!(frame.series("agree_2").unwrap().null_count(), 1);
        assert_eq!(frame.series("q1").unwrap().str().unwrap().get(0), Some("4"));
        assert_eq!(frame.series("q2").unwrap().str().unwrap().get(1), None);
        assert_eq!(frame.series("city").unwrap().str().unwrap().get(1), None);
        assert_eq!(frame.series("count").unwrap().dtype(), &DataType::Int64);

        assert!(log.warnings.is_empty());
        assert_eq!(log.actions.len(), 7);
    }

    #[test]
    fn test_unmatched_map_leaves_column_untouched() {
        let spec: ReplaceSpec =
            serde_json::from_value(json!({ "columns": { "sex": { "9": "other" } } })).unwrap();
        let df = df! { "sex" => &[1i64, 2] }.unwrap();
        let schema = DatasetSchema::default();

        let (frame, log) = ValueReplacer::new(&spec, &schema)
            .apply(PanelFrame::new(df))
            .unwrap();

        assert_eq!(frame.series("sex").unwrap().dtype(), &DataType::Int64);
        assert!(log.actions.is_empty());
        assert!(log.warnings.is_empty());
    }

    #[test]
    fn test_seconds_render_as_clock_times() {
        let spec: ReplaceSpec =
            serde_json::from_value(json!({ "time_columns": ["start", "late", "label"] }))
                .unwrap();
        let df = df! {
            "start" => &[Some(3600.0), Some(45296.7), None],
            "late" => &[Some(90000.0), Some(1.0), None],
            "label" => &["a", "b", "c"],
        }
        .unwrap();
        let schema = DatasetSchema::default();

        let (frame, log) = ValueReplacer::new(&spec, &schema)
            .apply(PanelFrame::new(df))
            .unwrap();

        let start = frame.series("start").unwrap().str().unwrap();
        assert_eq!(start.get(0), Some("01:00:00"));
        assert_eq!(start.get(1), Some("12:34:56"));
        assert_eq!(start.get(2), None);
        assert_eq!(frame.series("late").unwrap().dtype(), &DataType::Float64);
        assert_eq!(log.actions.len(), 1);
        assert_eq!(log.warnings.len(), 2);
    }
}
