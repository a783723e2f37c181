//! Sentinel code replacement.

use crate::error::Result;
use crate::types::{ActionType, CleaningAction, PanelFrame, StageLog};
use crate::utils::{is_float_dtype, is_integer_dtype, parse_numeric_string};
use polars::prelude::*;
use std::collections::HashSet;
use tracing::debug;

/// Replaces negative survey codes with the missing marker in every column.
#[derive(Debug, Clone)]
pub struct SentinelNormalizer {
    codes: HashSet<i64>,
}

impl SentinelNormalizer {
    pub fn new(codes: &[i64]) -> Self {
        Self {
            codes: codes.iter().copied().collect(),
        }
    }

    /// Replace sentinel cells in every column, keeping each column's dtype.
    pub fn normalize(&self, frame: PanelFrame) -> Result<(PanelFrame, StageLog)> {
        let mut frame = frame;
        let mut log = StageLog::new();
        let mut touched = Vec::new();
        let mut total_replacements = 0;

        debug!("Replacing sentinel codes with missing...");

        for col_name in frame.column_names() {
            let series = frame.series(&col_name)?;
            let (cleaned, count) = self.replace_in_series(series)?;
            if count > 0 {
                debug!("{}: replaced {} sentinel cells", col_name, count);
                frame.replace_values(cleaned)?;
                touched.push(format!("{col_name} ({count})"));
                total_replacements += count;
            }
        }

        if total_replacements > 0 {
            log.action(
                CleaningAction::new(
                    ActionType::SentinelReplaced,
                    "dataset",
                    format!(
                        "Replaced {} sentinel cells in {} columns",
                        total_replacements,
                        touched.len()
                    ),
                )
                .with_details(touched.join(", ")),
            );
        }

        Ok((frame, log))
    }

    fn is_sentinel(&self, value: f64) -> bool {
        value.fract() == 0.0 && self.codes.contains(&(value as i64))
    }

    /// Replace sentinel cells of one series. Returns the series and the number
    /// of replaced cells.
    pub(crate) fn replace_in_series(&self, series: &Series) -> Result<(Series, usize)> {
        let dtype = series.dtype().clone();
        let name = series.name().clone();
        let mut count = 0;

        if is_integer_dtype(&dtype) {
            let ints = series.cast(&DataType::Int64)?;
            let values: Vec<Option<i64>> = ints
                .i64()?
                .into_iter()
                .map(|v| match v {
                    Some(x) if self.codes.contains(&x) => {
                        count += 1;
                        None
                    }
                    other => other,
                })
                .collect();
            if count == 0 {
                return Ok((series.clone(), 0));
            }
            let replaced = Series::new(name, values).cast(&dtype)?;
            return Ok((replaced, count));
        }

        if is_float_dtype(&dtype) {
            let floats = series.cast(&DataType::Float64)?;
            let values: Vec<Option<f64>> = floats
                .f64()?
                .into_iter()
                .map(|v| match v {
                    Some(x) if self.is_sentinel(x) => {
                        count += 1;
                        None
                    }
                    other => other,
                })
                .collect();
            if count == 0 {
                return Ok((series.clone(), 0));
            }
            let replaced = Series::new(name, values).cast(&dtype)?;
            return Ok((replaced, count));
        }

        if dtype == DataType::String {
            let values: Vec<Option<String>> = series
                .str()?
                .into_iter()
                .map(|v| match v {
                    Some(s) if parse_numeric_string(s).is_some_and(|x| self.is_sentinel(x)) => {
                        count += 1;
                        None
                    }
                    other => other.map(str::to_string),
                })
                .collect();
            if count == 0 {
                return Ok((series.clone(), 0));
            }
            return Ok((Series::new(name, values), count));
        }

        Ok((series.clone(), 0))
    }
}
