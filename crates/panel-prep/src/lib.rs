//! Panel Survey Cleaning Library
//!
//! A typed cleaning and transformation pipeline for household and personal
//! panel survey extracts, built on Polars.
//!
//! # Overview
//!
//! - **Renaming**: Raw column names are mapped to canonical names through a
//!   rename table; unmapped columns are dropped and reported
//! - **Missing values**: Negative survey codes become the single missing
//!   marker
//! - **Typing**: Declared types from the rename table, or inference
//! - **Derived variables**: Reversed items, composite scores and dummies
//! - **Merging**: Weight attachment and personal/household outer joins
//! - **Validation**: Structural checks after every stage and sum-to-constant
//!   invariants
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use panel_prep::{DatasetSchema, DatasetSpec, Pipeline};
//! use std::path::Path;
//!
//! let outcome = Pipeline::builder()
//!     .dataset("health")
//!     .schema(DatasetSchema::load(Path::new("schemas/health.csv"))?)
//!     .spec(DatasetSpec::load(Path::new("specs.json"), "health")?)
//!     .on_progress(|update| {
//!         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
//!     })
//!     .build()?
//!     .process(raw)?;
//!
//! for warning in &outcome.report.warnings {
//!     println!("{warning}");
//! }
//! ```
//!
//! # Merging
//!
//! Merging consumes the outputs of two runs and is done through
//! [`PanelMerger`]:
//!
//! ```rust,ignore
//! use panel_prep::PanelMerger;
//!
//! let merger = PanelMerger::default();
//! let (personal, _) = merger.attach_weights(personal, &person_weights, "person_id")?;
//! let (merged, log) = merger.merge(personal, household, &[])?;
//! ```

pub mod cleaner;
pub mod config;
pub mod derive;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod profiler;
pub mod schema;
pub mod types;
pub mod utils;
pub mod validation;

// Re-exports for convenient access
pub use cleaner::{ColumnRenamer, SentinelNormalizer, TypeCoercer, ValueReplacer};
pub use config::{ConfigValidationError, PipelineConfig, PipelineConfigBuilder};
pub use derive::{CompositeAggregator, DummyEncoder, ReverseCoder};
pub use error::{PanelError, PipelineWarning, Result as PanelResult, ResultExt};
pub use merge::{MergeKeys, PanelMerger, MERGE_INDICATOR};
pub use pipeline::{
    ClosureProgressReporter, Pipeline, PipelineBuilder, PipelineStage, ProgressReporter,
    ProgressUpdate,
};
pub use profiler::{classify, SummaryStatistics};
pub use schema::{DatasetSchema, DatasetSpec, DeclaredType, SchemaEntry};
pub use types::{
    ActionType, CategoryLevels, CategorySpec, CleaningAction, CleaningOutcome, CleaningReport,
    ColumnKind, PanelFrame, StageLog,
};
pub use validation::{check_sums, RowQuery, StructuralChecks};
