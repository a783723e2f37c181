//! Summary statistics for cleaned panel tables.

use crate::error::{PanelError, Result};
use crate::types::PanelFrame;
use crate::utils::{is_numeric_dtype, round_to};
use polars::prelude::*;
use std::collections::BTreeMap;
use tracing::debug;

/// Descriptive statistics of selected variables.
pub struct SummaryStatistics;

impl SummaryStatistics {
    /// Describe `variables` (column name to display label).
    ///
    /// Produces one row per variable with columns `variable`, `mean`, `std`,
    /// `min`, `median`, `max`, rounded to two decimals. Missing cells are
    /// ignored; a variable without observations yields missing statistics.
    pub fn describe(frame: &PanelFrame, variables: &BTreeMap<String, String>) -> Result<DataFrame> {
        let mut labels = Vec::with_capacity(variables.len());
        let mut means = Vec::with_capacity(variables.len());
        let mut stds = Vec::with_capacity(variables.len());
        let mut mins = Vec::with_capacity(variables.len());
        let mut medians = Vec::with_capacity(variables.len());
        let mut maxs = Vec::with_capacity(variables.len());

        for (column, label) in variables {
            let series = frame.series(column)?;
            let numeric = match frame.kind(column) {
                Some(kind) => kind.is_numeric(),
                None => is_numeric_dtype(series.dtype()) || series.dtype() == &DataType::Boolean,
            };
            if !numeric {
                return Err(PanelError::Config(format!(
                    "summary variable {column} is not numeric"
                )));
            }
            let values = series
                .cast(&DataType::Float64)?
                .drop_nulls();
            debug!("Describing {} ({} observations)", column, values.len());

            let rounded = |v: Option<f64>| v.filter(|x| x.is_finite()).map(|x| round_to(x, 2));
            labels.push(label.clone());
            means.push(rounded(values.mean()));
            stds.push(rounded(values.std(1)));
            mins.push(rounded(values.min::<f64>()?));
            medians.push(rounded(values.median()));
            maxs.push(rounded(values.max::<f64>()?));
        }

        let table = df! {
            "variable" => labels,
            "mean" => means,
            "std" => stds,
            "min" => mins,
            "median" => medians,
            "max" => maxs,
        }?;
        Ok(table)
    }
}
