//! Binary and deprivation dummy encoding.
//!
//! Every dummy is a Float64 column of 1.0 / 0.0 / missing. A missing source
//! cell always yields a missing dummy.

use crate::error::{PanelError, PipelineWarning, Result};
use crate::schema::{BinaryDummy, DeprivationDummy, DummyRule, DummySpecs};
use crate::types::{ActionType, CleaningAction, ColumnKind, PanelFrame, StageLog};
use crate::utils::{f64_values, format_number, is_numeric_dtype};
use polars::prelude::*;
use tracing::debug;

/// Encode one binary dummy. Returns the dummy and the number of observed
/// values matching neither code.
pub fn binary_dummy(series: &Series, spec: &BinaryDummy) -> Result<(Series, usize)> {
    let positive = spec.effective_positive();
    let negative = spec.effective_negative();
    let mut unmatched = 0;

    let values: Vec<Option<f64>> = f64_values(series)?
        .into_iter()
        .map(|value| {
            let v = value?;
            match spec.rule {
                DummyRule::AboveZero => Some(if v > 0.0 { 1.0 } else { 0.0 }),
                DummyRule::Codes if v == positive => Some(1.0),
                DummyRule::Codes if v == negative => Some(0.0),
                DummyRule::Codes => {
                    unmatched += 1;
                    None
                }
            }
        })
        .collect();

    Ok((Series::new(spec.output_name().into(), values), unmatched))
}

/// Encode a deprivation indicator from its flag pair.
///
/// Flag B = 1 gives 1 and flag B = 2 gives 0; flag A = 1 forces 0 whatever
/// flag B says. Everything else is missing.
pub fn deprivation_dummy(flag_a: &Series, flag_b: &Series, name: &str) -> Result<Series> {
    let a = f64_values(flag_a)?;
    let b = f64_values(flag_b)?;

    let values: Vec<Option<f64>> = a
        .into_iter()
        .zip(b)
        .map(|(a, b)| match (a, b) {
            (Some(a), _) if a == 1.0 => Some(0.0),
            (_, Some(b)) if b == 1.0 => Some(1.0),
            (_, Some(b)) if b == 2.0 => Some(0.0),
            _ => None,
        })
        .collect();

    Ok(Series::new(name.into(), values))
}

/// Adds the configured dummies to a table.
pub struct DummyEncoder<'a> {
    specs: &'a DummySpecs,
}

impl<'a> DummyEncoder<'a> {
    pub fn new(specs: &'a DummySpecs) -> Self {
        Self { specs }
    }

    pub fn encode(&self, frame: PanelFrame) -> Result<(PanelFrame, StageLog)> {
        let mut frame = frame;
        let mut log = StageLog::new();

        for spec in &self.specs.others {
            let output = spec.output_name();
            Self::ensure_new(&frame, &output)?;

            let source = frame.series(&spec.variable)?;
            if !Self::is_numeric_source(&frame, &spec.variable, source) {
                log.warn(PipelineWarning::Derivation {
                    column: output,
                    reason: format!("source {} is not numeric", spec.variable),
                });
                continue;
            }

            let (dummy, unmatched) = binary_dummy(source, spec)?;
            if unmatched > 0 {
                log.warn(PipelineWarning::Derivation {
                    column: output.clone(),
                    reason: format!(
                        "{unmatched} values of {} match neither {} nor {} and are missing",
                        spec.variable,
                        format_number(spec.effective_positive()),
                        format_number(spec.effective_negative())
                    ),
                });
            }

            debug!("Dummy '{}' from '{}'", output, spec.variable);
            frame.put_column(dummy, Some(ColumnKind::Float))?;
            let description = match spec.rule {
                DummyRule::AboveZero => format!("1 if {} > 0", spec.variable),
                DummyRule::Codes => format!(
                    "1 if {} == {}, 0 if {}",
                    spec.variable,
                    format_number(spec.effective_positive()),
                    format_number(spec.effective_negative())
                ),
            };
            log.action(CleaningAction::new(
                ActionType::DummyCreated,
                output.as_str(),
                description,
            ));
        }

        for spec in &self.specs.deprivation {
            self.encode_deprivation(&mut frame, &mut log, spec)?;
        }

        Ok((frame, log))
    }

    fn encode_deprivation(
        &self,
        frame: &mut PanelFrame,
        log: &mut StageLog,
        spec: &DeprivationDummy,
    ) -> Result<()> {
        let output = spec.output_name();
        Self::ensure_new(frame, &output)?;

        let (flag_a, flag_b) = (spec.flag_a(), spec.flag_b());
        let dummy = deprivation_dummy(frame.series(&flag_a)?, frame.series(&flag_b)?, &output)?;

        debug!("Deprivation dummy '{}' from '{}'/'{}'", output, flag_a, flag_b);
        frame.put_column(dummy, Some(ColumnKind::Float))?;
        log.action(
            CleaningAction::new(ActionType::DummyCreated, output.as_str(), "Deprivation indicator")
                .with_details(format!("{flag_b} (1 -> 1, 2 -> 0), overridden by {flag_a} == 1")),
        );
        Ok(())
    }

    /// Dummies are never overwritten.
    fn ensure_new(frame: &PanelFrame, output: &str) -> Result<()> {
        if frame.has_column(output) {
            return Err(PanelError::Integrity(format!(
                "dummy column {output} already exists"
            )));
        }
        Ok(())
    }

    fn is_numeric_source(frame: &PanelFrame, name: &str, series: &Series) -> bool {
        match frame.kind(name) {
            Some(kind) => kind.is_numeric() || kind == &ColumnKind::Boolean,
            None => is_numeric_dtype(series.dtype()) || series.dtype() == &DataType::Boolean,
        }
    }
}
