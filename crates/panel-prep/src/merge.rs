//! Joining entity tables with their weights and with each other.

use crate::error::{PanelError, Result, ResultExt};
use crate::types::{
    ActionType, CategorySpec, CleaningAction, ColumnKind, PanelFrame, StageLog,
};
use crate::utils::{f64_values, is_float_dtype, is_integer_dtype, is_integral};
use crate::validation::check_unique_keys;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Provenance column added by [`PanelMerger::merge`].
pub const MERGE_INDICATOR: &str = "_merge";

const LEFT_MARKER: &str = "__merge_left";
const RIGHT_MARKER: &str = "__merge_right";

/// Names of the panel key columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeKeys {
    pub wave: String,
    pub person: String,
    pub household: String,
}

impl Default for MergeKeys {
    fn default() -> Self {
        Self {
            wave: "wave".to_string(),
            person: "person_id".to_string(),
            household: "household_id".to_string(),
        }
    }
}

/// Joins cleaned tables on the panel keys.
#[derive(Debug, Clone, Default)]
pub struct PanelMerger {
    keys: MergeKeys,
}

impl PanelMerger {
    pub fn new(keys: MergeKeys) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &MergeKeys {
        &self.keys
    }

    /// Left-join a weight table on `(wave, entity_key)`.
    ///
    /// Weight keys must be unique, so the row count of `table` is unchanged.
    pub fn attach_weights(
        &self,
        table: PanelFrame,
        weights: &DataFrame,
        entity_key: &str,
    ) -> Result<(PanelFrame, StageLog)> {
        let mut log = StageLog::new();
        let keys = vec![self.keys.wave.clone(), entity_key.to_string()];

        let (data, index, mut kinds) = table.into_parts();
        let rows_before = data.height();
        let data = integer_keys(data, &keys, "table")?;
        let weights = integer_keys(weights.clone(), &keys, "weights")?;
        check_unique_keys(&weights, &keys).context("Weight table")?;

        let weight_columns: Vec<String> = weights
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .filter(|name| !keys.contains(name))
            .collect();
        if let Some(clash) = weight_columns.iter().find(|c| data.column(c).is_ok()) {
            return Err(PanelError::Integrity(format!(
                "weight column {clash} already exists in the table"
            )));
        }
        let weights = storage_types(weights, &weight_columns)?;
        for name in &weight_columns {
            if let Some(kind) = kind_for_dtype(weights.column(name)?.dtype()) {
                kinds.insert(name.clone(), kind);
            }
        }
        for key in &keys {
            kinds.insert(key.clone(), ColumnKind::Integer);
        }

        let on: Vec<Expr> = keys.iter().map(|k| col(k.as_str())).collect();
        let joined = data
            .lazy()
            .join(weights.lazy(), on.clone(), on, JoinArgs::new(JoinType::Left))
            .collect()?;
        if joined.height() != rows_before {
            return Err(PanelError::Integrity(format!(
                "weight join changed the row count from {rows_before} to {}",
                joined.height()
            )));
        }

        debug!("Attached {} weight columns on [{}]", weight_columns.len(), keys.join(", "));
        log.action(
            CleaningAction::new(
                ActionType::TablesMerged,
                "dataset",
                format!("Attached {} weight columns", weight_columns.len()),
            )
            .with_details(weight_columns.join(", ")),
        );

        let mut frame = PanelFrame::from_parts(joined, index, kinds);
        frame.sort_by_index()?;
        Ok((frame, log))
    }

    /// Outer-join the personal and household tables on
    /// `(wave, household, shared...)`, tagging each row's provenance in
    /// [`MERGE_INDICATOR`].
    ///
    /// The result is indexed by `(person, household, wave, shared...)`;
    /// duplicate index tuples are an integrity error.
    pub fn merge(
        &self,
        personal: PanelFrame,
        household: PanelFrame,
        shared: &[String],
    ) -> Result<(PanelFrame, StageLog)> {
        let mut log = StageLog::new();
        let mut join_keys = vec![self.keys.wave.clone(), self.keys.household.clone()];
        for key in shared {
            if !join_keys.contains(key) {
                join_keys.push(key.clone());
            }
        }

        let (left, _, left_kinds) = personal.into_parts();
        let (right, _, right_kinds) = household.into_parts();
        for (side, df) in [("personal", &left), ("household", &right)] {
            if df.column(MERGE_INDICATOR).is_ok() {
                return Err(PanelError::Integrity(format!(
                    "{side} table already has a {MERGE_INDICATOR} column"
                )));
            }
        }
        if left.column(&self.keys.person).is_err() {
            return Err(PanelError::ColumnNotFound(self.keys.person.clone()));
        }

        let mut left = integer_keys(left, &join_keys, "personal")?;
        let mut right = integer_keys(right, &join_keys, "household")?;
        check_unique_keys(&right, &join_keys).context("Household table")?;

        let mut kinds: HashMap<String, ColumnKind> = left_kinds;
        for (name, kind) in right_kinds {
            if join_keys.contains(&name) {
                continue;
            }
            let target = if left.column(&name).is_ok() {
                format!("{name}_right")
            } else {
                name
            };
            kinds.insert(target, kind);
        }

        left.with_column(Series::new(LEFT_MARKER.into(), vec![true; left.height()]))?;
        right.with_column(Series::new(RIGHT_MARKER.into(), vec![true; right.height()]))?;

        let on: Vec<Expr> = join_keys.iter().map(|k| col(k.as_str())).collect();
        let args = JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns);
        let mut joined = left
            .lazy()
            .join(right.lazy(), on.clone(), on, args)
            .collect()?;

        let provenance = provenance(&joined)?;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for tag in provenance.iter().copied() {
            *counts.entry(tag).or_insert(0) += 1;
        }
        joined = joined.drop_many([LEFT_MARKER, RIGHT_MARKER]);
        joined.with_column(Series::new(MERGE_INDICATOR.into(), provenance))?;

        for key in &join_keys {
            kinds.insert(key.clone(), ColumnKind::Integer);
        }
        kinds.insert(
            MERGE_INDICATOR.to_string(),
            ColumnKind::Category(CategorySpec::labels(vec![
                "both".to_string(),
                "left_only".to_string(),
                "right_only".to_string(),
            ])),
        );

        let mut index = vec![
            self.keys.person.clone(),
            self.keys.household.clone(),
            self.keys.wave.clone(),
        ];
        for key in shared {
            if !index.contains(key) {
                index.push(key.clone());
            }
        }
        check_unique_keys(&joined, &index).context("After merge")?;

        let both = counts.get("both").copied().unwrap_or(0);
        let left_only = counts.get("left_only").copied().unwrap_or(0);
        let right_only = counts.get("right_only").copied().unwrap_or(0);
        info!(
            "Merged on [{}]: {} both, {} left only, {} right only",
            join_keys.join(", "),
            both,
            left_only,
            right_only
        );
        log.action(
            CleaningAction::new(
                ActionType::TablesMerged,
                "dataset",
                format!("Outer join on [{}]", join_keys.join(", ")),
            )
            .with_details(format!(
                "both: {both}, left_only: {left_only}, right_only: {right_only}"
            )),
        );

        let mut frame = PanelFrame::from_parts(joined, index, kinds);
        frame.sort_by_index()?;
        Ok((frame, log))
    }
}

/// Which side(s) each joined row came from.
fn provenance(joined: &DataFrame) -> Result<Vec<&'static str>> {
    let left = joined.column(LEFT_MARKER)?.as_materialized_series().is_not_null();
    let right = joined.column(RIGHT_MARKER)?.as_materialized_series().is_not_null();
    Ok(left
        .into_iter()
        .zip(right.into_iter())
        .map(|(l, r)| match (l.unwrap_or(false), r.unwrap_or(false)) {
            (true, true) => "both",
            (true, false) => "left_only",
            _ => "right_only",
        })
        .collect())
}

/// Replace key columns by complete Int64 columns.
fn integer_keys(mut df: DataFrame, keys: &[String], side: &str) -> Result<DataFrame> {
    for key in keys {
        let series = df
            .column(key)
            .map_err(|_| PanelError::ColumnNotFound(key.clone()))?
            .as_materialized_series();
        let mut ints = Vec::with_capacity(series.len());
        for value in f64_values(series)? {
            match value {
                Some(v) if is_integral(v) => ints.push(v as i64),
                Some(v) => {
                    return Err(PanelError::Integrity(format!(
                        "{side} key {key} holds the non-integral value {v}"
                    )));
                }
                None => {
                    return Err(PanelError::Integrity(format!(
                        "{side} key {key} has missing values"
                    )));
                }
            }
        }
        df.replace(key, Series::new(key.as_str().into(), ints))?;
    }
    Ok(df)
}

/// Widen numeric columns to the storage types of their kinds.
fn storage_types(mut df: DataFrame, columns: &[String]) -> Result<DataFrame> {
    for name in columns {
        let series = df.column(name)?.as_materialized_series();
        let dtype = series.dtype();
        let target = if is_integer_dtype(dtype) {
            DataType::Int64
        } else if is_float_dtype(dtype) {
            DataType::Float64
        } else {
            continue;
        };
        if dtype != &target {
            let cast = series.cast(&target)?;
            df.replace(name, cast)?;
        }
    }
    Ok(df)
}

fn kind_for_dtype(dtype: &DataType) -> Option<ColumnKind> {
    match dtype {
        DataType::Int64 => Some(ColumnKind::Integer),
        DataType::Float64 => Some(ColumnKind::Float),
        DataType::Boolean => Some(ColumnKind::Boolean),
        DataType::String => Some(ColumnKind::Text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn personal() -> PanelFrame {
        let df = df! {
            "person_id" => &[1i64, 2, 3],
            "household_id" => &[10i64, 10, 11],
            "wave" => &[2011i64, 2011, 2011],
            "age" => &[30i64, 28, 50],
        }
        .unwrap();
        let mut frame = PanelFrame::new(df).with_index(["person_id", "wave"]);
        frame.set_kind("age", ColumnKind::Integer);
        frame
    }

    fn household() -> PanelFrame {
        let df = df! {
            "household_id" => &[10.0, 12.0],
            "wave" => &[2011i64, 2011],
            "rooms" => &[4i64, 2],
            "age" => &[7i64, 3],
        }
        .unwrap();
        let mut frame = PanelFrame::new(df).with_index(["household_id", "wave"]);
        frame.set_kind("rooms", ColumnKind::Integer);
        frame
    }

    fn merge_counts(frame: &PanelFrame) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for tag in frame.series(MERGE_INDICATOR).unwrap().str().unwrap().into_iter() {
            *counts.entry(tag.unwrap().to_string()).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_attach_weights_keeps_rows() {
        let weights = df! {
            "wave" => &[2011i32, 2012],
            "person_id" => &[1i32, 1],
            "weight" => &[1.5f32, 1.7],
        }
        .unwrap();

        let (frame, log) = PanelMerger::default()
            .attach_weights(personal(), &weights, "person_id")
            .unwrap();

        assert_eq!(frame.height(), 3);
        let weight = frame.series("weight").unwrap();
        assert_eq!(weight.dtype(), &DataType::Float64);
        assert_eq!(weight.null_count(), 2);
        assert_eq!(frame.kind("weight"), Some(&ColumnKind::Float));
        assert_eq!(log.actions.len(), 1);
    }

    #[test]
    fn test_duplicate_weights_are_rejected() {
        let weights = df! {
            "wave" => &[2011i64, 2011],
            "person_id" => &[1i64, 1],
            "weight" => &[1.0, 2.0],
        }
        .unwrap();

        let err = PanelMerger::default()
            .attach_weights(personal(), &weights, "person_id")
            .unwrap_err();
        assert_eq!(err.error_code(), "INTEGRITY_ERROR");
    }

    #[test]
    fn test_merge_tags_provenance_and_keeps_index_unique() {
        let (frame, log) = PanelMerger::default()
            .merge(personal(), household(), &[])
            .unwrap();

        assert_eq!(frame.height(), 4);
        assert_eq!(
            frame.index(),
            &["person_id".to_string(), "household_id".to_string(), "wave".to_string()]
        );
        let counts = merge_counts(&frame);
        assert_eq!(counts.get("both"), Some(&2));
        assert_eq!(counts.get("left_only"), Some(&1));
        assert_eq!(counts.get("right_only"), Some(&1));

        assert!(frame.has_column("age_right"));
        assert_eq!(frame.kind("rooms"), Some(&ColumnKind::Integer));
        assert_eq!(frame.kind("age"), Some(&ColumnKind::Integer));
        assert!(check_unique_keys(frame.data(), frame.index()).is_ok());
        assert_eq!(log.actions.len(), 1);
    }

    #[test]
    fn test_duplicate_household_rows_fail() {
        let df = df! {
            "household_id" => &[10i64, 10],
            "wave" => &[2011i64, 2011],
        }
        .unwrap();

        let err = PanelMerger::default()
            .merge(personal(), PanelFrame::new(df), &[])
            .unwrap_err();
        assert_eq!(err.error_code(), "INTEGRITY_ERROR");
    }

    #[test]
    fn test_missing_key_values_fail() {
        let df = df! {
            "household_id" => &[Some(10i64), None],
            "wave" => &[2011i64, 2011],
        }
        .unwrap();

        let err = PanelMerger::default()
            .merge(personal(), PanelFrame::new(df), &[])
            .unwrap_err();
        assert!(err.to_string().contains("missing values"));
    }
}
