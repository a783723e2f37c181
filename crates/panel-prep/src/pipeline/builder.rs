//! Main cleaning pipeline module.
//!
//! This module provides the core `Pipeline` struct and builder for
//! orchestrating the cleaning of one dataset.

use crate::cleaner::{ColumnRenamer, SentinelNormalizer, TypeCoercer, ValueReplacer};
use crate::config::PipelineConfig;
use crate::derive::{CompositeAggregator, DummyEncoder, ReverseCoder};
use crate::error::{PanelError, Result, ResultExt};
use crate::pipeline::progress::{
    ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate,
};
use crate::schema::{DatasetSchema, DatasetSpec};
use crate::types::{CleaningOutcome, CleaningReport, PanelFrame, StageLog};
use crate::validation::{check_sums, StructuralChecks};
use chrono::Local;
use polars::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The cleaning pipeline of one dataset.
///
/// Use [`Pipeline::builder()`] to create a new pipeline.
///
/// # Example
///
/// ```rust,ignore
/// use panel_prep::{DatasetSchema, DatasetSpec, Pipeline, PipelineConfig};
///
/// let outcome = Pipeline::builder()
///     .dataset("health")
///     .schema(DatasetSchema::load(Path::new("health.csv"))?)
///     .spec(DatasetSpec::load(Path::new("specs.json"), "health")?)
///     .config(PipelineConfig::default())
///     .build()?
///     .process(raw)?;
///
/// println!("{} warnings", outcome.report.warnings.len());
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    dataset: String,
    schema: DatasetSchema,
    spec: DatasetSpec,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

static_assertions::assert_impl_all!(Pipeline: Send);

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    /// Clean a raw table.
    ///
    /// Stages run in a fixed order; the structural checks run after each
    /// mutating stage and any failure aborts the whole run.
    pub fn process(&self, df: DataFrame) -> Result<CleaningOutcome> {
        match self.process_internal(df) {
            Ok(outcome) => {
                self.report_progress(ProgressUpdate::complete("Pipeline completed successfully"));
                Ok(outcome)
            }
            Err(e) => {
                self.report_progress(ProgressUpdate::failed(e.to_string()));
                error!("Pipeline error: {}", e);
                Err(e)
            }
        }
    }

    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }

    fn allow_all_missing(&self) -> Vec<String> {
        let mut allowed = self.config.allow_all_missing.clone();
        for column in &self.spec.checks.nan_cols {
            if !allowed.contains(column) {
                allowed.push(column.clone());
            }
        }
        allowed
    }

    /// Record a stage's log and re-run the structural checks.
    fn finish_stage(
        &self,
        stage: PipelineStage,
        frame: PanelFrame,
        log: StageLog,
        checks: &StructuralChecks,
        report: &mut CleaningReport,
    ) -> Result<PanelFrame> {
        log.merge_into(report);
        let (frame, check_log) = checks
            .run(frame)
            .context(format!("Structural checks after {}", stage.display_name()))?;
        check_log.merge_into(report);
        self.report_progress(ProgressUpdate::new(
            stage,
            1.0,
            format!("{} complete", stage.display_name()),
        ));
        Ok(frame)
    }

    fn process_internal(&self, df: DataFrame) -> Result<CleaningOutcome> {
        let start_time = Instant::now();
        let mut report = CleaningReport::new(&self.dataset);
        report.started_at = Local::now().format(TIMESTAMP_FORMAT).to_string();
        report.rows_before = df.height();
        report.columns_before = df.width();
        report.intentionally_dropped = self
            .schema
            .intentionally_dropped()
            .into_iter()
            .map(String::from)
            .collect();

        let checks = StructuralChecks::new(self.allow_all_missing());

        info!("Starting cleaning pipeline for '{}'...", self.dataset);

        // Step 1: Rename
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Renaming,
            0.0,
            "Renaming columns...",
        ));
        info!("Step 1: Renaming columns...");
        let (mut frame, log) = ColumnRenamer
            .rename(PanelFrame::new(df), &self.schema, &self.config)
            .context("Renaming")?;
        frame.set_index(self.spec.index.clone());
        let frame = self.finish_stage(PipelineStage::Renaming, frame, log, &checks, &mut report)?;

        // Step 2: Sentinel codes
        self.report_progress(ProgressUpdate::new(
            PipelineStage::SentinelNormalization,
            0.0,
            "Replacing sentinel codes...",
        ));
        info!("Step 2: Replacing sentinel codes...");
        let (frame, log) = SentinelNormalizer::new(&self.config.sentinel_codes)
            .normalize(frame)
            .context("Sentinel normalization")?;
        let frame = self.finish_stage(
            PipelineStage::SentinelNormalization,
            frame,
            log,
            &checks,
            &mut report,
        )?;

        // Step 3: Value replacement (optional)
        let frame = if self.spec.replacing.is_empty() {
            info!("Step 3: Skipping value replacement (nothing configured)");
            frame
        } else {
            self.report_progress(ProgressUpdate::new(
                PipelineStage::ValueReplacement,
                0.0,
                "Replacing values...",
            ));
            info!("Step 3: Replacing values...");
            let (frame, log) = ValueReplacer::new(&self.spec.replacing, &self.schema)
                .apply(frame)
                .context("Value replacement")?;
            self.finish_stage(
                PipelineStage::ValueReplacement,
                frame,
                log,
                &checks,
                &mut report,
            )?
        };

        // Step 4: Types
        self.report_progress(ProgressUpdate::new(
            PipelineStage::TypeCoercion,
            0.0,
            "Coercing column types...",
        ));
        info!("Step 4: Coercing column types...");
        let (frame, log) = TypeCoercer::new(&self.config)
            .coerce(frame, &self.schema)
            .context("Type coercion")?;
        let frame =
            self.finish_stage(PipelineStage::TypeCoercion, frame, log, &checks, &mut report)?;

        // Step 5: Reversed items
        self.report_progress(ProgressUpdate::new(
            PipelineStage::ReverseCoding,
            0.0,
            "Reversing items...",
        ));
        info!("Step 5: Reversing items...");
        let (frame, log) = ReverseCoder::new(&self.config.reverse_marker)
            .reverse(frame)
            .context("Reverse coding")?;
        let frame =
            self.finish_stage(PipelineStage::ReverseCoding, frame, log, &checks, &mut report)?;

        // Step 6: Composites
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Aggregation,
            0.0,
            "Aggregating composite scores...",
        ));
        info!("Step 6: Aggregating composite scores...");
        let (frame, log) =
            CompositeAggregator::new(&self.spec.composites, &self.config.reverse_marker)
                .aggregate(frame)
                .context("Aggregation")?;
        let frame =
            self.finish_stage(PipelineStage::Aggregation, frame, log, &checks, &mut report)?;

        // Step 7: Dummies
        self.report_progress(ProgressUpdate::new(
            PipelineStage::DummyEncoding,
            0.0,
            "Encoding dummy variables...",
        ));
        info!("Step 7: Encoding dummy variables...");
        let (frame, log) = DummyEncoder::new(&self.spec.dummies)
            .encode(frame)
            .context("Dummy encoding")?;
        let mut frame =
            self.finish_stage(PipelineStage::DummyEncoding, frame, log, &checks, &mut report)?;

        // Step 8: Sum checks and final ordering
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Validation,
            0.0,
            "Running sum checks...",
        ));
        info!("Step 8: Running sum checks...");
        check_sums(&frame, &self.spec.checks.sum_checks)?.merge_into(&mut report);
        frame.sort_by_index()?;
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Validation,
            1.0,
            "Validation complete",
        ));

        report.rows_after = frame.height();
        report.columns_after = frame.width();
        report.finished_at = Local::now().format(TIMESTAMP_FORMAT).to_string();
        report.duration_ms = start_time.elapsed().as_millis() as u64;

        info!(
            "Pipeline complete: {} rows x {} columns, {} actions, {} warnings",
            report.rows_after,
            report.columns_after,
            report.actions.len(),
            report.warnings.len()
        );

        Ok(CleaningOutcome { frame, report })
    }
}

/// Builder for creating a [`Pipeline`] instance.
///
/// Use [`Pipeline::builder()`] to get started. A schema is required; the
/// dataset specification defaults to an empty one (no index, no derived
/// variables, no checks).
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    dataset: Option<String>,
    schema: Option<DatasetSchema>,
    spec: Option<DatasetSpec>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Name of the dataset, used in the report.
    pub fn dataset(mut self, name: impl Into<String>) -> Self {
        self.dataset = Some(name.into());
        self
    }

    /// Set the rename table.
    pub fn schema(mut self, schema: DatasetSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Set the dataset specification.
    pub fn spec(mut self, spec: DatasetSpec) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Set a progress reporter for receiving updates during processing.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    ///
    /// For more complex scenarios, use [`progress_reporter`](Self::progress_reporter).
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Build the pipeline.
    ///
    /// Configuration, schema and specification are all validated here, so
    /// malformed inputs are reported before any data is touched.
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config.unwrap_or_default();
        config
            .validate()
            .map_err(|e| PanelError::Config(e.to_string()))?;

        let schema = self
            .schema
            .ok_or_else(|| PanelError::Config("a rename schema is required".to_string()))?;
        schema.validate(&config)?;

        let spec = self.spec.unwrap_or_default();
        spec.validate()?;

        Ok(Pipeline {
            config,
            dataset: self.dataset.unwrap_or_else(|| "dataset".to_string()),
            schema,
            spec,
            progress_reporter: self.progress_reporter,
        })
    }
}
