//! Sum-to-constant invariants.

use super::checks::row_labels;
use super::query::RowQuery;
use crate::error::{PanelError, Result};
use crate::schema::SumCheckSpec;
use crate::types::{ActionType, CleaningAction, PanelFrame, StageLog};
use crate::utils::{format_number, round_to};
use polars::prelude::*;
use tracing::debug;

/// Absolute tolerance of the sum comparison.
pub const SUM_TOLERANCE: f64 = 1e-9;

/// Columns selected by a check, in table order for prefixes.
fn selected_columns(frame: &PanelFrame, spec: &SumCheckSpec) -> Result<Vec<String>> {
    let Some(prefix) = spec.starts.as_deref() else {
        let vars = spec.vars.clone().unwrap_or_default();
        for var in &vars {
            if !frame.has_column(var) {
                return Err(PanelError::ColumnNotFound(var.clone()));
            }
        }
        return Ok(vars);
    };

    let columns: Vec<String> = frame
        .column_names()
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .collect();
    if columns.is_empty() {
        return Err(PanelError::Config(format!(
            "sum check: no columns start with '{prefix}'"
        )));
    }
    Ok(columns)
}

/// Check that every (filtered) row of the selected columns sums to zero or to
/// the declared target.
pub fn run_sum_check(frame: &PanelFrame, spec: &SumCheckSpec) -> Result<()> {
    spec.validate()?;
    let columns = selected_columns(frame, spec)?;

    let mask = match &spec.query {
        Some(query) => Some(RowQuery::parse(query)?.mask(frame.data())?),
        None => None,
    };

    let items: Vec<Expr> = columns
        .iter()
        .map(|c| col(c.as_str()).cast(DataType::Float64))
        .collect();
    let summed = frame
        .data()
        .clone()
        .lazy()
        .select([sum_horizontal(items, true)?.alias("__row_sum")])
        .collect()?;
    let sums: Vec<Option<f64>> = summed
        .column("__row_sum")?
        .as_materialized_series()
        .f64()?
        .into_iter()
        .collect();

    let labels = row_labels(frame.data(), frame.index())?;
    let mut failing = Vec::new();
    for (row, sum) in sums.into_iter().enumerate() {
        if mask.as_ref().is_some_and(|m| !m[row]) {
            continue;
        }
        let sum = sum.unwrap_or(0.0);
        let sum = match spec.round {
            Some(decimals) => round_to(sum, decimals),
            None => sum,
        };
        let passes = sum.abs() < SUM_TOLERANCE || (sum - spec.sum).abs() < SUM_TOLERANCE;
        if !passes {
            failing.push(format!("{}: {}", labels[row], format_number(sum)));
        }
    }

    if !failing.is_empty() {
        return Err(PanelError::SumCheck {
            columns,
            target: spec.sum,
            rows: failing,
        });
    }
    debug!("Sum check over {} columns passed", columns.len());
    Ok(())
}

/// Run every configured sum check; the first violation aborts.
pub fn check_sums(frame: &PanelFrame, specs: &[SumCheckSpec]) -> Result<StageLog> {
    let mut log = StageLog::new();
    for spec in specs {
        run_sum_check(frame, spec)?;
        let selector = match (&spec.starts, &spec.vars) {
            (Some(prefix), _) => format!("{prefix}*"),
            (None, Some(vars)) => vars.join(", "),
            (None, None) => String::new(),
        };
        let mut action = CleaningAction::new(
            ActionType::CheckPassed,
            "dataset",
            format!("Rows of [{selector}] sum to 0 or {}", format_number(spec.sum)),
        );
        if let Some(query) = &spec.query {
            action = action.with_details(format!("where {query}"));
        }
        log.action(action);
    }
    Ok(log)
}
