//! Error types for the panel cleaning pipeline.
//!
//! Fatal conditions are variants of [`PanelError`]. Non-fatal conditions
//! (cast failures, incomplete schemas, missing-value diagnostics) are
//! [`PipelineWarning`]s: they are logged and collected in the run report
//! instead of aborting the run.
//!
//! Errors serialize as `{code, message}` so they can be embedded in JSON
//! reports next to the warnings.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for the cleaning pipeline.
#[derive(Error, Debug)]
pub enum PanelError {
    /// Schema or specification is malformed. Reported before data is touched.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duplicate keys or columns, all-missing columns and similar defects.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// A declared sum invariant was violated.
    #[error(
        "Sum check failed: columns {columns:?} do not add up to {target} in rows:\n\t{}",
        .rows.join("\n\t")
    )]
    SumCheck {
        columns: Vec<String>,
        target: f64,
        rows: Vec<String>,
    },

    /// Column was not found in the table.
    #[error("Column '{0}' not found in table")]
    ColumnNotFound(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema CSV could not be read.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A column pattern did not compile.
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PanelError>,
    },
}

impl PanelError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PanelError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stable error code for reports and exit messages.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Integrity(_) => "INTEGRITY_ERROR",
            Self::SumCheck { .. } => "SUM_CHECK_FAILED",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Csv(_) => "CSV_ERROR",
            Self::Regex(_) => "CONFIG_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Whether the error stems from a malformed schema or specification.
    pub fn is_config_error(&self) -> bool {
        self.error_code() == "CONFIG_ERROR"
    }
}

impl Serialize for PanelError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PanelError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PanelError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PanelError::Polars(e).with_context(context))
    }
}

/// Which side of the schema/data comparison is incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    /// Declared in the schema but absent from the raw data.
    MissingFromData,
    /// Present in the raw data but absent from the schema.
    MissingFromSchema,
}

/// Non-fatal conditions collected while the pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// A column could not be cast to its declared or inferred type and was
    /// left in its raw representation.
    Cast {
        column: String,
        target: String,
        reason: String,
    },
    /// Schema and raw data disagree about which columns exist.
    Completeness {
        side: Completeness,
        columns: Vec<String>,
    },
    /// A column mixed two missing encodings and was normalized.
    MissingRepresentation { column: String, normalized: usize },
    /// Values outside the declared levels were set to missing.
    CategoryValuesDropped { column: String, dropped: usize },
    /// A column holds an irreducible mix of value types.
    MixedTypes { column: String },
    /// A configured value replacement could not be applied.
    Replacement { column: String, reason: String },
    /// A derived column could not be produced as configured.
    Derivation { column: String, reason: String },
}

impl PipelineWarning {
    /// The column the warning refers to, if it refers to exactly one.
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Cast { column, .. }
            | Self::MissingRepresentation { column, .. }
            | Self::CategoryValuesDropped { column, .. }
            | Self::MixedTypes { column }
            | Self::Replacement { column, .. }
            | Self::Derivation { column, .. } => Some(column),
            Self::Completeness { .. } => None,
        }
    }
}

impl std::fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cast {
                column,
                target,
                reason,
            } => write!(f, "{column} cannot be converted to {target}: {reason}"),
            Self::Completeness { side, columns } => match side {
                Completeness::MissingFromData => write!(
                    f,
                    "the following variables are specified in the renaming file, but not in the dataset: {}",
                    columns.join(", ")
                ),
                Completeness::MissingFromSchema => write!(
                    f,
                    "the following variables are not in the renaming table and are dropped: {}",
                    columns.join(", ")
                ),
            },
            Self::MissingRepresentation { column, normalized } => write!(
                f,
                "{column} contains two types of missing values; {normalized} cells normalized"
            ),
            Self::CategoryValuesDropped { column, dropped } => write!(
                f,
                "{column}: {dropped} values outside the declared categories set to missing"
            ),
            Self::MixedTypes { column } => write!(
                f,
                "{column} contains bad combination of values; further cleaning is required"
            ),
            Self::Replacement { column, reason } => {
                write!(f, "replacement in {column} skipped: {reason}")
            }
            Self::Derivation { column, reason } => write!(f, "{column}: {reason}"),
        }
    }
}
