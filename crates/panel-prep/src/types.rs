//! Core table and report types shared by every pipeline stage.

use crate::error::{PanelError, PipelineWarning, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

// ============================================================================
// Column kinds
// ============================================================================

/// Levels of a categorical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryLevels {
    /// Integer-coded levels, stored as Float64 codes.
    Codes(Vec<i64>),
    /// String labels, stored as String.
    Labels(Vec<String>),
}

impl CategoryLevels {
    /// Number of levels.
    pub fn len(&self) -> usize {
        match self {
            Self::Codes(codes) => codes.len(),
            Self::Labels(labels) => labels.len(),
        }
    }

    /// Whether there are no levels at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Levels rendered as strings, in level order.
    pub fn rendered(&self) -> Vec<String> {
        match self {
            Self::Codes(codes) => codes.iter().map(|c| c.to_string()).collect(),
            Self::Labels(labels) => labels.clone(),
        }
    }
}

/// Levels and ordering of a categorical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub levels: CategoryLevels,
    pub ordered: bool,
}

impl CategorySpec {
    /// Unordered category with integer codes.
    pub fn codes(codes: Vec<i64>) -> Self {
        Self {
            levels: CategoryLevels::Codes(codes),
            ordered: false,
        }
    }

    /// Unordered category with string labels.
    pub fn labels(labels: Vec<String>) -> Self {
        Self {
            levels: CategoryLevels::Labels(labels),
            ordered: false,
        }
    }

    /// Set the ordered flag.
    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }
}

/// The closed set of column kinds a cleaned column can have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Category(CategorySpec),
    Text,
}

impl ColumnKind {
    /// Physical polars type used to store a column of this kind.
    pub fn storage_dtype(&self) -> DataType {
        match self {
            Self::Integer => DataType::Int64,
            Self::Float => DataType::Float64,
            Self::Boolean => DataType::Boolean,
            Self::Category(spec) => match spec.levels {
                CategoryLevels::Codes(_) => DataType::Float64,
                CategoryLevels::Labels(_) => DataType::String,
            },
            Self::Text => DataType::String,
        }
    }

    /// Short name used in logs and warnings.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Category(_) => "category",
            Self::Text => "text",
        }
    }

    /// Whether the column supports arithmetic.
    pub fn is_numeric(&self) -> bool {
        match self {
            Self::Integer | Self::Float => true,
            Self::Category(spec) => matches!(spec.levels, CategoryLevels::Codes(_)),
            Self::Boolean | Self::Text => false,
        }
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Category(spec) if spec.ordered => write!(f, "ordered category"),
            other => write!(f, "{}", other.name()),
        }
    }
}

// ============================================================================
// PanelFrame
// ============================================================================

/// An in-memory panel table: a polars frame, its index columns and the kind
/// of every typed column.
///
/// Columns without a registered kind are untyped (raw ingestion state, or a
/// column whose cast failed).
#[derive(Debug, Clone)]
pub struct PanelFrame {
    data: DataFrame,
    index: Vec<String>,
    kinds: HashMap<String, ColumnKind>,
}

impl PanelFrame {
    /// Wrap a raw frame. No column is typed yet.
    pub fn new(data: DataFrame) -> Self {
        Self {
            data,
            index: Vec::new(),
            kinds: HashMap::new(),
        }
    }

    /// Set the index (key) columns.
    pub fn with_index<I, S>(mut self, index: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index = index.into_iter().map(Into::into).collect();
        self
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn set_index(&mut self, index: Vec<String>) {
        self.index = index;
    }

    pub fn height(&self) -> usize {
        self.data.height()
    }

    pub fn width(&self) -> usize {
        self.data.width()
    }

    /// Column names in table order.
    pub fn column_names(&self) -> Vec<String> {
        self.data
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.data.column(name).is_ok()
    }

    /// Borrow a column as a series.
    pub fn series(&self, name: &str) -> Result<&Series> {
        self.data
            .column(name)
            .map(|c| c.as_materialized_series())
            .map_err(|_| PanelError::ColumnNotFound(name.to_string()))
    }

    pub fn kind(&self, name: &str) -> Option<&ColumnKind> {
        self.kinds.get(name)
    }

    pub fn kinds(&self) -> &HashMap<String, ColumnKind> {
        &self.kinds
    }

    pub fn set_kind(&mut self, name: impl Into<String>, kind: ColumnKind) {
        self.kinds.insert(name.into(), kind);
    }

    /// Forget the kind of a column, leaving it untyped.
    pub fn clear_kind(&mut self, name: &str) {
        self.kinds.remove(name);
    }

    /// Replace an existing column or append a new one, recording its kind.
    pub fn put_column(&mut self, series: Series, kind: Option<ColumnKind>) -> Result<()> {
        let name = series.name().to_string();
        if self.has_column(&name) {
            self.data.replace(&name, series)?;
        } else {
            self.data.with_column(series)?;
        }
        match kind {
            Some(kind) => self.set_kind(name, kind),
            None => self.clear_kind(&name),
        }
        Ok(())
    }

    /// Replace the values of an existing column, keeping its kind.
    pub fn replace_values(&mut self, series: Series) -> Result<()> {
        let name = series.name().to_string();
        if !self.has_column(&name) {
            return Err(PanelError::ColumnNotFound(name));
        }
        self.data.replace(&name, series)?;
        Ok(())
    }

    /// Sort rows by the index columns. No-op without an index.
    pub fn sort_by_index(&mut self) -> Result<()> {
        if self.index.is_empty() {
            return Ok(());
        }
        let keys: Vec<PlSmallStr> = self.index.iter().map(|k| k.as_str().into()).collect();
        self.data = self.data.sort(keys, SortMultipleOptions::default())?;
        Ok(())
    }

    /// Split into the raw frame plus metadata.
    pub fn into_parts(self) -> (DataFrame, Vec<String>, HashMap<String, ColumnKind>) {
        (self.data, self.index, self.kinds)
    }

    /// Reassemble from a frame and metadata, keeping only kinds of columns
    /// that still exist.
    pub fn from_parts(
        data: DataFrame,
        index: Vec<String>,
        kinds: HashMap<String, ColumnKind>,
    ) -> Self {
        let kinds = kinds
            .into_iter()
            .filter(|(name, _)| data.column(name).is_ok())
            .collect();
        Self { data, index, kinds }
    }
}

// ============================================================================
// Cleaning report
// ============================================================================

/// Kinds of actions recorded in the cleaning report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// A raw column was renamed to its canonical name.
    ColumnRenamed,
    /// A column was dropped (unmapped or intentionally excluded).
    ColumnDropped,
    /// Sentinel codes were replaced with missing.
    SentinelReplaced,
    /// Configured value replacements were applied.
    ValueReplaced,
    /// A column received its declared or inferred kind.
    TypeCoerced,
    /// A reversed item was flipped into its sibling column.
    ItemReversed,
    /// A composite score was computed.
    CompositeCreated,
    /// A dummy column was created.
    DummyCreated,
    /// A second missing encoding was normalized.
    MissingNormalized,
    /// Two tables were joined.
    TablesMerged,
    /// A validation check passed.
    CheckPassed,
}

impl ActionType {
    /// Get a human-readable display name for the action type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ColumnRenamed => "Column Renamed",
            Self::ColumnDropped => "Column Dropped",
            Self::SentinelReplaced => "Sentinel Replaced",
            Self::ValueReplaced => "Value Replaced",
            Self::TypeCoerced => "Type Coerced",
            Self::ItemReversed => "Item Reversed",
            Self::CompositeCreated => "Composite Created",
            Self::DummyCreated => "Dummy Created",
            Self::MissingNormalized => "Missing Normalized",
            Self::TablesMerged => "Tables Merged",
            Self::CheckPassed => "Check Passed",
        }
    }
}

/// A single action taken during cleaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningAction {
    pub action_type: ActionType,
    /// Column name or "dataset".
    pub target: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CleaningAction {
    pub fn new(
        action_type: ActionType,
        target: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            action_type,
            target: target.into(),
            description: description.into(),
            details: None,
        }
    }

    /// Add details to the action.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Audit trail of a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleaningReport {
    /// Dataset name the run was configured for.
    pub dataset: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub rows_before: usize,
    pub rows_after: usize,
    pub columns_before: usize,
    pub columns_after: usize,
    /// Raw columns the schema explicitly excludes.
    pub intentionally_dropped: Vec<String>,
    pub actions: Vec<CleaningAction>,
    pub warnings: Vec<PipelineWarning>,
}

impl CleaningReport {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            ..Self::default()
        }
    }

    pub fn add_action(&mut self, action: CleaningAction) {
        self.actions.push(action);
    }

    pub fn add_warning(&mut self, warning: PipelineWarning) {
        self.warnings.push(warning);
    }

    /// Count of actions of a given type.
    pub fn count_actions(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }
}

/// Actions and warnings produced by a single stage.
#[derive(Debug, Clone, Default)]
pub struct StageLog {
    pub actions: Vec<CleaningAction>,
    pub warnings: Vec<PipelineWarning>,
}

impl StageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(&mut self, action: CleaningAction) {
        self.actions.push(action);
    }

    /// Record a warning and emit it through `tracing`.
    pub fn warn(&mut self, warning: PipelineWarning) {
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, other: StageLog) {
        self.actions.extend(other.actions);
        self.warnings.extend(other.warnings);
    }

    /// Move everything into a report.
    pub fn merge_into(self, report: &mut CleaningReport) {
        report.actions.extend(self.actions);
        report.warnings.extend(self.warnings);
    }
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct CleaningOutcome {
    pub frame: PanelFrame,
    pub report: CleaningReport,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_dtype_per_kind() {
        assert_eq!(ColumnKind::Integer.storage_dtype(), DataType::Int64);
        assert_eq!(ColumnKind::Float.storage_dtype(), DataType::Float64);
        assert_eq!(
            ColumnKind::Category(CategorySpec::codes(vec![1, 2])).storage_dtype(),
            DataType::Float64
        );
        assert_eq!(
            ColumnKind::Category(CategorySpec::labels(vec!["a".into()])).storage_dtype(),
            DataType::String
        );
        assert_eq!(ColumnKind::Text.storage_dtype(), DataType::String);
    }

    #[test]
    fn test_kind_display() {
        let ordered = ColumnKind::Category(CategorySpec::codes(vec![1, 2]).with_ordered(true));
        assert_eq!(ordered.to_string(), "ordered category");
        assert_eq!(ColumnKind::Integer.to_string(), "integer");
    }

    #[test]
    fn test_put_column_appends_and_replaces() {
        let df = df! { "a" => &[1i64, 2] }.unwrap();
        let mut frame = PanelFrame::new(df);

        frame
            .put_column(Series::new("b".into(), &[0.5, 1.5]), Some(ColumnKind::Float))
            .unwrap();
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.kind("b"), Some(&ColumnKind::Float));

        frame
            .put_column(Series::new("b".into(), &["x", "y"]), None)
            .unwrap();
        assert_eq!(frame.width(), 2);
        assert!(frame.kind("b").is_none());
    }

    #[test]
    fn test_report_counts_actions() {
        let mut report = CleaningReport::new("pl");
        report.add_action(CleaningAction::new(ActionType::DummyCreated, "a_dummy", "created"));
        report.add_action(CleaningAction::new(ActionType::DummyCreated, "b_dummy", "created"));
        report.add_action(
            CleaningAction::new(ActionType::ColumnDropped, "x", "dropped").with_details("unmapped"),
        );

        assert_eq!(report.count_actions(ActionType::DummyCreated), 2);
        assert_eq!(report.count_actions(ActionType::ColumnDropped), 1);
    }

    #[test]
    fn test_report_serialization() {
        let mut report = CleaningReport::new("hl");
        report.add_warning(PipelineWarning::MixedTypes {
            column: "income".to_string(),
        });
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"dataset\":\"hl\""));
        assert!(json.contains("mixed_types"));
    }
}
