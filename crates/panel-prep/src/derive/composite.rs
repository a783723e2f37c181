//! Row-mean composites over item batteries.

use crate::error::{PipelineWarning, Result};
use crate::schema::CompositeSpec;
use crate::types::{ActionType, CleaningAction, ColumnKind, PanelFrame, StageLog};
use crate::utils::is_numeric_dtype;
use polars::prelude::*;
use regex::Regex;
use tracing::debug;

/// Mean of each row across `columns`, ignoring missing cells. A row without
/// any observed cell is missing.
pub fn row_mean(df: &DataFrame, name: &str, columns: &[String]) -> Result<Series> {
    let items: Vec<Expr> = columns
        .iter()
        .map(|c| col(c.as_str()).cast(DataType::Float64))
        .collect();
    let means = df
        .clone()
        .lazy()
        .select([mean_horizontal(items, true)?.alias(name)])
        .collect()?;
    Ok(means.column(name)?.as_materialized_series().clone())
}

/// Builds the composite scores of a dataset.
pub struct CompositeAggregator<'a> {
    specs: &'a [CompositeSpec],
    marker: &'a str,
}

impl<'a> CompositeAggregator<'a> {
    /// `marker` identifies reversed items, which never feed a composite.
    pub fn new(specs: &'a [CompositeSpec], marker: &'a str) -> Self {
        Self { specs, marker }
    }

    pub fn aggregate(&self, frame: PanelFrame) -> Result<(PanelFrame, StageLog)> {
        let mut frame = frame;
        let mut log = StageLog::new();

        for spec in self.specs {
            for (output, pattern) in spec.targets() {
                let re = Regex::new(&pattern)?;
                let members = self.members(&frame, &re, &output)?;

                if members.is_empty() {
                    log.warn(PipelineWarning::Derivation {
                        column: output.clone(),
                        reason: format!("no numeric columns match '{pattern}'"),
                    });
                    continue;
                }

                let composite = row_mean(frame.data(), &output, &members)?;

                debug!("Composite '{}' from {} items", output, members.len());
                frame.put_column(composite, Some(ColumnKind::Float))?;
                log.action(
                    CleaningAction::new(
                        ActionType::CompositeCreated,
                        output.as_str(),
                        format!("Mean of {} items", members.len()),
                    )
                    .with_details(members.join(", ")),
                );
            }
        }

        Ok((frame, log))
    }

    /// Numeric, non-reversed columns matching `re`, other than the output.
    fn members(&self, frame: &PanelFrame, re: &Regex, output: &str) -> Result<Vec<String>> {
        let mut members = Vec::new();
        for name in frame.column_names() {
            if name == output || name.contains(self.marker) || !re.is_match(&name) {
                continue;
            }
            let numeric = match frame.kind(&name) {
                Some(kind) => kind.is_numeric(),
                None => is_numeric_dtype(frame.series(&name)?.dtype()),
            };
            if numeric {
                members.push(name);
            } else {
                debug!("Skipping non-numeric '{}' for '{}'", name, output);
            }
        }
        Ok(members)
    }
}
