//! Integration tests for the panel cleaning pipeline.
//!
//! These tests run the pipeline end to end on the fixture extract and feed
//! its output into the merger.

use panel_prep::derive::{observed_anchor, reverse_with_anchor};
use panel_prep::schema::SumCheckSpec;
use panel_prep::validation::check_unique_keys;
use panel_prep::{
    ActionType, CategoryLevels, CleaningOutcome, ColumnKind, DatasetSchema, DatasetSpec,
    MergeKeys, PanelError, PanelFrame, PanelMerger, Pipeline, PipelineConfig, PipelineStage,
    PipelineWarning, SummaryStatistics, MERGE_INDICATOR,
};
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

// ============================================================================
// Helper Functions
// ============================================================================

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load_csv(filename: &str) -> DataFrame {
    let path = fixtures_path().join(filename);
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path))
        .expect("Failed to create CSV reader")
        .finish()
        .expect("Failed to read CSV file")
}

fn load_schema() -> DatasetSchema {
    DatasetSchema::load(&fixtures_path().join("health_schema.csv")).expect("Failed to load schema")
}

fn load_spec() -> DatasetSpec {
    DatasetSpec::load(&fixtures_path().join("specs.json"), "health").expect("Failed to load spec")
}

fn run_health(spec: DatasetSpec) -> Result<CleaningOutcome, PanelError> {
    Pipeline::builder()
        .dataset("health")
        .schema(load_schema())
        .spec(spec)
        .build()?
        .process(load_csv("health_raw.csv"))
}

fn f64_column(frame: &PanelFrame, name: &str) -> Vec<Option<f64>> {
    frame
        .series(name)
        .unwrap()
        .cast(&DataType::Float64)
        .unwrap()
        .f64()
        .unwrap()
        .into_iter()
        .collect()
}

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("expected a value, found missing");
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

// ============================================================================
// End-to-end pipeline
// ============================================================================

#[test]
fn test_sentinel_and_reversal_end_to_end() {
    let outcome = run_health(load_spec()).unwrap();
    let frame = &outcome.frame;

    assert_eq!(frame.kind("item_neg"), Some(&ColumnKind::Integer));
    let item_neg = frame.series("item_neg").unwrap();
    assert_eq!(item_neg.dtype(), &DataType::Int64);
    let item_neg: Vec<Option<i64>> = item_neg.i64().unwrap().into_iter().collect();
    assert_eq!(item_neg, vec![Some(5), None, Some(2), Some(4)]);

    let item: Vec<Option<i64>> = frame
        .series("item")
        .unwrap()
        .i64()
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(item, vec![Some(1), None, Some(4), Some(2)]);
    assert!(frame.has_column("item_id"));
}

#[test]
fn test_schema_drives_columns_and_types() {
    let outcome = run_health(load_spec()).unwrap();
    let frame = &outcome.frame;

    assert!(!frame.has_column("NOTES"));
    assert!(!frame.has_column("EXTRA"));
    assert!(!frame.has_column("PID"));
    assert_eq!(frame.index(), &["person_id".to_string(), "year".to_string()]);
    assert_eq!(frame.kind("person_id"), Some(&ColumnKind::Integer));
    assert_eq!(frame.kind("sat_a"), Some(&ColumnKind::Float));

    match frame.kind("health_state") {
        Some(ColumnKind::Category(spec)) => {
            assert!(spec.ordered);
            assert_eq!(
                spec.levels,
                CategoryLevels::Labels(vec![
                    "very good".to_string(),
                    "good".to_string(),
                    "poor".to_string(),
                ])
            );
        }
        other => panic!("unexpected kind for health_state: {other:?}"),
    }

    let report = &outcome.report;
    assert_eq!(report.intentionally_dropped, vec!["NOTES".to_string()]);
    assert_eq!(report.columns_before, 14);
    assert_eq!(report.rows_after, 4);
    assert!(report.warnings.iter().any(|w| matches!(
        w,
        PipelineWarning::Completeness { columns, .. } if columns == &vec!["EXTRA".to_string()]
    )));
    assert_eq!(report.count_actions(ActionType::CheckPassed), 1);
}

#[test]
fn test_composite_ignores_missing_items() {
    let outcome = run_health(load_spec()).unwrap();
    let frame = &outcome.frame;

    let sat_c = f64_column(frame, "sat_c");
    assert_eq!(sat_c, vec![None, None, Some(1.0), Some(3.0)]);

    let satisfaction = f64_column(frame, "satisfaction");
    assert_close(satisfaction[0], 3.0);
    assert_eq!(satisfaction[1], None);
    assert_close(satisfaction[2], 7.0 / 3.0);
    assert_close(satisfaction[3], 7.0 / 3.0);
}

#[test]
fn test_dummy_preserves_missing() {
    let outcome = run_health(load_spec()).unwrap();
    let frame = &outcome.frame;

    let smoker = f64_column(frame, "smoker");
    let dummy = f64_column(frame, "smoker_dummy");
    assert_eq!(dummy, vec![Some(1.0), None, Some(0.0), Some(1.0)]);
    for (source, derived) in smoker.iter().zip(&dummy) {
        if source.is_none() {
            assert_eq!(derived, &None);
        }
    }
}

#[test]
fn test_progress_reaches_completion() {
    let stages = Arc::new(Mutex::new(Vec::new()));
    let stages_clone = stages.clone();

    Pipeline::builder()
        .schema(load_schema())
        .spec(load_spec())
        .on_progress(move |update| {
            stages_clone.lock().unwrap().push(update.stage);
        })
        .build()
        .unwrap()
        .process(load_csv("health_raw.csv"))
        .unwrap();

    let stages = stages.lock().unwrap();
    assert_eq!(stages.first(), Some(&PipelineStage::Renaming));
    assert_eq!(stages.last(), Some(&PipelineStage::Complete));
    assert!(!stages.contains(&PipelineStage::ValueReplacement));
}

#[test]
fn test_strict_renaming_rejects_unmapped_columns() {
    let config = PipelineConfig::builder()
        .renaming_complete(true)
        .build()
        .unwrap();
    let err = Pipeline::builder()
        .config(config)
        .schema(load_schema())
        .build()
        .unwrap()
        .process(load_csv("health_raw.csv"))
        .unwrap_err();

    assert!(err.is_config_error());
    assert!(err.to_string().contains("EXTRA"));
}

// ============================================================================
// Sum checks
// ============================================================================

#[test]
fn test_sum_check_boundary() {
    // Row 4 sums to 0.99: accepted with rounding to one decimal.
    assert!(run_health(load_spec()).is_ok());

    let mut strict = load_spec();
    strict.checks.sum_checks = vec![SumCheckSpec::with_prefix("share_", 1.0)];
    let err = run_health(strict).unwrap_err();
    assert_eq!(err.error_code(), "SUM_CHECK_FAILED");
    let message = err.to_string();
    assert!(message.contains("(4, 2011)"));
    assert!(!message.contains("(1, 2011)"));
    assert!(!message.contains("(2, 2011)"));

    let mut unrelated = load_spec();
    unrelated.checks.sum_checks = vec![SumCheckSpec::with_prefix("share_", 2.0).round(1)];
    let err = run_health(unrelated).unwrap_err();
    assert!(err.to_string().contains("(1, 2011)"));
}

#[test]
fn test_filtered_sum_check() {
    let mut spec = load_spec();
    spec.checks.sum_checks =
        vec![SumCheckSpec::with_prefix("share_", 1.0).query("household_id != 12")];
    assert!(run_health(spec).is_ok());
}

// ============================================================================
// Reverse coding
// ============================================================================

#[test]
fn test_reversal_round_trip() {
    let original = Series::new("x_neg".into(), &[Some(1.0), Some(3.5), None, Some(7.0)]);
    let anchor = observed_anchor(&original).unwrap().unwrap();
    assert_close(Some(anchor), 8.0);

    let reversed = reverse_with_anchor(&original, anchor, "x").unwrap();
    let restored = reverse_with_anchor(&reversed, anchor, "x_neg").unwrap();

    let before: Vec<Option<f64>> = original.f64().unwrap().into_iter().collect();
    let after: Vec<Option<f64>> = restored.f64().unwrap().into_iter().collect();
    for (b, a) in before.iter().zip(&after) {
        match (b, a) {
            (Some(b), Some(a)) => assert!((a - b).abs() < 1e-9),
            (None, None) => {}
            other => panic!("missingness changed: {other:?}"),
        }
    }
}

// ============================================================================
// Merging
// ============================================================================

fn panel_keys() -> MergeKeys {
    MergeKeys {
        wave: "year".to_string(),
        ..MergeKeys::default()
    }
}

fn household_frame() -> PanelFrame {
    let df = df! {
        "household_id" => &[10i64, 11, 13],
        "year" => &[2011i64, 2011, 2011],
        "rooms" => &[4i64, 3, 2],
    }
    .unwrap();
    let mut frame = PanelFrame::new(df).with_index(["household_id", "year"]);
    frame.set_kind("rooms", ColumnKind::Integer);
    frame
}

#[test]
fn test_merge_keeps_index_unique() {
    let personal = run_health(load_spec()).unwrap().frame;
    let merger = PanelMerger::new(panel_keys());

    let weights = df! {
        "year" => &[2011i64, 2011, 2011, 2011],
        "person_id" => &[1i64, 2, 3, 4],
        "phrf" => &[1.2, 0.8, 1.0, 1.1],
    }
    .unwrap();
    let (personal, _) = merger
        .attach_weights(personal, &weights, "person_id")
        .unwrap();
    assert_eq!(personal.height(), 4);
    assert_eq!(personal.series("phrf").unwrap().null_count(), 0);

    let (merged, log) = merger.merge(personal, household_frame(), &[]).unwrap();

    assert_eq!(merged.height(), 5);
    assert!(check_unique_keys(merged.data(), merged.index()).is_ok());
    assert_eq!(log.actions[0].action_type, ActionType::TablesMerged);

    let tags: Vec<String> = merged
        .series(MERGE_INDICATOR)
        .unwrap()
        .str()
        .unwrap()
        .into_iter()
        .map(|t| t.unwrap().to_string())
        .collect();
    assert_eq!(tags.iter().filter(|t| *t == "both").count(), 3);
    assert_eq!(tags.iter().filter(|t| *t == "left_only").count(), 1);
    assert_eq!(tags.iter().filter(|t| *t == "right_only").count(), 1);
}

#[test]
fn test_merge_rejects_duplicate_households() {
    let personal = run_health(load_spec()).unwrap().frame;
    let df = df! {
        "household_id" => &[10i64, 10],
        "year" => &[2011i64, 2011],
        "rooms" => &[4i64, 5],
    }
    .unwrap();

    let err = PanelMerger::new(panel_keys())
        .merge(personal, PanelFrame::new(df), &[])
        .unwrap_err();
    assert_eq!(err.error_code(), "INTEGRITY_ERROR");
}

// ============================================================================
// Summary statistics
// ============================================================================

#[test]
fn test_summary_statistics_of_cleaned_table() {
    let spec = load_spec();
    let outcome = run_health(spec.clone()).unwrap();

    let table = SummaryStatistics::describe(&outcome.frame, &spec.summary).unwrap();
    assert_eq!(table.height(), 2);

    let labels: Vec<Option<&str>> = table
        .column("variable")
        .unwrap()
        .as_materialized_series()
        .str()
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(labels, vec![Some("Reversed item"), Some("Life satisfaction")]);

    let means: Vec<Option<f64>> = table
        .column("mean")
        .unwrap()
        .as_materialized_series()
        .f64()
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(means[0], Some(2.33));
}
