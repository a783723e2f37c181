//! Reverse coding of flagged items.

use crate::error::{PipelineWarning, Result};
use crate::types::{
    ActionType, CategoryLevels, CategorySpec, CleaningAction, ColumnKind, PanelFrame, StageLog,
};
use crate::utils::{f64_values, format_number, is_integer_dtype, is_numeric_dtype};
use polars::prelude::*;
use tracing::debug;

/// Largest observed value plus one, over non-missing cells.
pub fn observed_anchor(series: &Series) -> Result<Option<f64>> {
    let max = f64_values(series)?
        .into_iter()
        .flatten()
        .reduce(f64::max);
    Ok(max.map(|m| m + 1.0))
}

/// `anchor - value` for every non-missing cell, renamed to `name`.
///
/// Integer inputs stay Int64 when the anchor is integral.
pub fn reverse_with_anchor(series: &Series, anchor: f64, name: &str) -> Result<Series> {
    let values: Vec<Option<f64>> = f64_values(series)?
        .into_iter()
        .map(|v| v.map(|x| anchor - x))
        .collect();
    let reversed = Series::new(name.into(), values);
    if is_integer_dtype(series.dtype()) && anchor.fract() == 0.0 {
        Ok(reversed.cast(&DataType::Int64)?)
    } else {
        Ok(reversed)
    }
}

/// Creates the un-reversed sibling of every column carrying the reversed
/// marker.
pub struct ReverseCoder<'a> {
    marker: &'a str,
}

impl<'a> ReverseCoder<'a> {
    pub fn new(marker: &'a str) -> Self {
        Self { marker }
    }

    /// Add `{name without marker}` = `max + 1 - value` for each marked column.
    pub fn reverse(&self, frame: PanelFrame) -> Result<(PanelFrame, StageLog)> {
        let mut frame = frame;
        let mut log = StageLog::new();

        let marked: Vec<String> = frame
            .column_names()
            .into_iter()
            .filter(|name| name.contains(self.marker))
            .collect();

        for source in marked {
            let target = source.replace(self.marker, "");
            if target.is_empty() {
                log.warn(PipelineWarning::Derivation {
                    column: source.clone(),
                    reason: "name consists only of the reversed marker".to_string(),
                });
                continue;
            }

            let series = frame.series(&source)?;
            let kind = frame.kind(&source).cloned();
            let numeric = match &kind {
                Some(kind) => kind.is_numeric(),
                None => is_numeric_dtype(series.dtype()),
            };
            if !numeric {
                log.warn(PipelineWarning::Derivation {
                    column: source.clone(),
                    reason: "cannot reverse a non-numeric column".to_string(),
                });
                continue;
            }

            let Some(anchor) = observed_anchor(series)? else {
                log.warn(PipelineWarning::Derivation {
                    column: source.clone(),
                    reason: "cannot reverse a column without observations".to_string(),
                });
                continue;
            };

            let reversed = reverse_with_anchor(series, anchor, &target)?;
            let reversed_kind = kind.map(|k| reversed_kind(k, anchor));

            if frame.has_column(&target) {
                log.warn(PipelineWarning::Derivation {
                    column: target.clone(),
                    reason: format!("overwritten by the reversal of {source}"),
                });
            }

            debug!("Reversed '{}' into '{}' (anchor {})", source, target, anchor);
            frame.put_column(reversed, reversed_kind)?;
            log.action(
                CleaningAction::new(
                    ActionType::ItemReversed,
                    target.as_str(),
                    format!("Reversed from {source}"),
                )
                .with_details(format!("{} - value", format_number(anchor))),
            );
        }

        Ok((frame, log))
    }
}

/// Kind of a reversed column. Code levels are mirrored around the anchor.
fn reversed_kind(kind: ColumnKind, anchor: f64) -> ColumnKind {
    match kind {
        ColumnKind::Category(CategorySpec {
            levels: CategoryLevels::Codes(codes),
            ordered,
        }) => {
            let anchor = anchor as i64;
            let mut mirrored: Vec<i64> = codes.iter().map(|c| anchor - c).collect();
            mirrored.sort_unstable();
            ColumnKind::Category(CategorySpec {
                levels: CategoryLevels::Codes(mirrored),
                ordered,
            })
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_anchor_ignores_missing() {
        let series = Series::new("x".into(), &[Some(2i64), None, Some(5)]);
        assert_eq!(observed_anchor(&series).unwrap(), Some(6.0));

        let empty = Series::new("x".into(), &[None::<i64>, None]);
        assert_eq!(observed_anchor(&empty).unwrap(), None);
    }

    #[test]
    fn test_reversal_round_trip() {
        let series = Series::new("x".into(), &[Some(1.0), Some(2.5), None, Some(7.0)]);
        let anchor = observed_anchor(&series).unwrap().unwrap();

        let once = reverse_with_anchor(&series, anchor, "x").unwrap();
        let twice = reverse_with_anchor(&once, anchor, "x").unwrap();

        let original = series.f64().unwrap();
        let back = twice.f64().unwrap();
        for (a, b) in original.into_iter().zip(back.into_iter()) {
            match (a, b) {
                (Some(a), Some(b)) => assert!((a - b).abs() < 1e-12),
                (None, None) => {}
                other => panic!("missingness changed: {other:?}"),
            }
        }
    }

    #[test]
    fn test_reverse_creates_sibling() {
        let df = df! {
            "item_neg" => &[Some(1i64), Some(5), None, Some(3)],
            "other" => &[1i64, 2, 3, 4],
        }
        .unwrap();
        let mut frame = PanelFrame::new(df);
        frame.set_kind("item_neg", ColumnKind::Integer);

        let (frame, log) = ReverseCoder::new("_neg").reverse(frame).unwrap();

        let item = frame.series("item").unwrap();
        assert_eq!(item.dtype(), &DataType::Int64);
        let values: Vec<Option<i64>> = item.i64().unwrap().into_iter().collect();
        assert_eq!(values, vec![Some(5), Some(1), None, Some(3)]);
        assert_eq!(frame.kind("item"), Some(&ColumnKind::Integer));
        assert!(frame.has_column("item_neg"));
        assert_eq!(log.actions.len(), 1);
        assert!(log.warnings.is_empty());
    }

    #[test]
    fn test_reverse_mirrors_category_levels() {
        let df = df! { "trust_neg" => &[Some(1.0), Some(4.0), None] }.unwrap();
        let mut frame = PanelFrame::new(df);
        frame.set_kind(
            "trust_neg",
            ColumnKind::Category(CategorySpec::codes(vec![1, 2, 3, 4]).with_ordered(true)),
        );

        let (frame, _) = ReverseCoder::new("_neg").reverse(frame).unwrap();

        assert_eq!(
            frame.kind("trust"),
            Some(&ColumnKind::Category(
                CategorySpec::codes(vec![1, 2, 3, 4]).with_ordered(true)
            ))
        );
        assert_eq!(frame.series("trust").unwrap().f64().unwrap().get(0), Some(4.0));
    }

    #[test]
    fn test_non_numeric_and_empty_columns_are_skipped() {
        let df = df! {
            "label_neg" => &["a", "b"],
            "empty_neg" => &[None::<f64>, None],
        }
        .unwrap();
        let mut frame = PanelFrame::new(df);
        frame.set_kind("label_neg", ColumnKind::Text);

        let (frame, log) = ReverseCoder::new("_neg").reverse(frame).unwrap();

        assert!(!frame.has_column("label"));
        assert!(!frame.has_column("empty"));
        assert_eq!(log.warnings.len(), 2);
    }

    #[test]
    fn test_existing_sibling_is_overwritten_with_warning() {
        let df = df! {
            "x_neg" => &[1i64, 2],
            "x" => &[9i64, 9],
        }
        .unwrap();

        let (frame, log) = ReverseCoder::new("_neg").reverse(PanelFrame::new(df)).unwrap();

        assert_eq!(frame.series("x").unwrap().i64().unwrap().get(0), Some(2));
        assert_eq!(log.warnings.len(), 1);
    }
}
