//! Progress reporting for the cleaning pipeline.
//!
//! # Example
//!
//! ```rust,ignore
//! use panel_prep::Pipeline;
//!
//! let outcome = Pipeline::builder()
//!     .schema(schema)
//!     .on_progress(|update| {
//!         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
//!     })
//!     .build()?
//!     .process(df)?;
//! ```

use serde::{Deserialize, Serialize};

/// Stages of the cleaning pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Renaming raw columns and dropping unmapped ones
    Renaming,
    /// Replacing sentinel codes with missing
    SentinelNormalization,
    /// Applying configured value replacements
    ValueReplacement,
    /// Declared and inferred type coercion
    TypeCoercion,
    /// Flipping reverse-coded items
    ReverseCoding,
    /// Composite scores
    Aggregation,
    /// Dummy variables
    DummyEncoding,
    /// Sum checks and final sort
    Validation,
    /// Pipeline completed successfully
    Complete,
    /// Pipeline failed with an error
    Failed,
}

impl PipelineStage {
    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Renaming => "Renaming Columns",
            Self::SentinelNormalization => "Normalizing Sentinels",
            Self::ValueReplacement => "Replacing Values",
            Self::TypeCoercion => "Coercing Types",
            Self::ReverseCoding => "Reversing Items",
            Self::Aggregation => "Aggregating Composites",
            Self::DummyEncoding => "Encoding Dummies",
            Self::Validation => "Validating",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }

    /// Share of the overall run attributed to this stage (0.0 - 1.0).
    pub fn weight(&self) -> f32 {
        match self {
            Self::Renaming => 0.10,
            Self::SentinelNormalization => 0.10,
            Self::ValueReplacement => 0.10,
            Self::TypeCoercion => 0.30,
            Self::ReverseCoding => 0.05,
            Self::Aggregation => 0.10,
            Self::DummyEncoding => 0.10,
            Self::Validation => 0.15,
            Self::Complete => 0.0,
            Self::Failed => 0.0,
        }
    }

    /// Cumulative progress at the start of this stage.
    pub fn base_progress(&self) -> f32 {
        match self {
            Self::Renaming => 0.0,
            Self::SentinelNormalization => 0.10,
            Self::ValueReplacement => 0.20,
            Self::TypeCoercion => 0.30,
            Self::ReverseCoding => 0.60,
            Self::Aggregation => 0.65,
            Self::DummyEncoding => 0.75,
            Self::Validation => 0.85,
            Self::Complete => 1.0,
            Self::Failed => 0.0,
        }
    }
}

/// A single progress notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: PipelineStage,

    /// Overall progress (0.0 - 1.0)
    pub progress: f32,

    /// Progress within current stage (0.0 - 1.0)
    pub stage_progress: f32,

    pub message: String,
}

impl ProgressUpdate {
    pub fn new(stage: PipelineStage, stage_progress: f32, message: impl Into<String>) -> Self {
        let progress = stage.base_progress() + (stage.weight() * stage_progress);
        Self {
            stage,
            progress: progress.clamp(0.0, 1.0),
            stage_progress: stage_progress.clamp(0.0, 1.0),
            message: message.into(),
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            stage: PipelineStage::Complete,
            progress: 1.0,
            stage_progress: 1.0,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            stage: PipelineStage::Failed,
            progress: 0.0,
            stage_progress: 0.0,
            message: message.into(),
        }
    }
}

/// Receives progress updates during a run.
///
/// Implementations must be `Send + Sync` so a pipeline can be moved to a
/// worker thread together with its reporter.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Wrapper that implements [`ProgressReporter`] using a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ORDER: [PipelineStage; 8] = [
        PipelineStage::Renaming,
        PipelineStage::SentinelNormalization,
        PipelineStage::ValueReplacement,
        PipelineStage::TypeCoercion,
        PipelineStage::ReverseCoding,
        PipelineStage::Aggregation,
        PipelineStage::DummyEncoding,
        PipelineStage::Validation,
    ];

    #[test]
    fn test_stage_weights_sum_to_one() {
        let total: f32 = ORDER.iter().map(|s| s.weight()).sum();
        assert!((total - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_base_progress_is_cumulative() {
        let mut expected = 0.0;
        for stage in ORDER {
            assert!(
                (stage.base_progress() - expected).abs() < 0.001,
                "{} starts at {}",
                stage.display_name(),
                stage.base_progress()
            );
            expected += stage.weight();
        }
    }

    #[test]
    fn test_progress_update_is_clamped() {
        let update = ProgressUpdate::new(PipelineStage::Validation, 2.0, "overflow");
        assert_eq!(update.stage_progress, 1.0);
        assert!(update.progress <= 1.0);

        let update = ProgressUpdate::new(PipelineStage::TypeCoercion, 0.5, "half");
        assert!((update.progress - 0.45).abs() < 0.001);
    }

    #[test]
    fn test_terminal_updates() {
        assert_eq!(ProgressUpdate::complete("done").progress, 1.0);
        let failed = ProgressUpdate::failed("boom");
        assert_eq!(failed.stage, PipelineStage::Failed);
        assert_eq!(failed.message, "boom");
    }

    #[test]
    fn test_closure_reporter_is_called() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let reporter = ClosureProgressReporter::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        reporter.report(ProgressUpdate::new(PipelineStage::Renaming, 0.0, "a"));
        reporter.report(ProgressUpdate::complete("b"));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_update_serialization() {
        let update = ProgressUpdate::new(PipelineStage::DummyEncoding, 1.0, "done");
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"stage\":\"dummy_encoding\""));
    }
}
