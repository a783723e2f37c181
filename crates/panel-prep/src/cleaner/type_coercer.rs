//! Declared and inferred column typing.

use super::converters::{
    observed_levels, to_boolean, to_category, to_float, to_integer, to_positional_codes, to_text,
    CastError,
};
use crate::config::PipelineConfig;
use crate::error::{PanelError, PipelineWarning, Result};
use crate::profiler::{classify, InferenceOptions};
use crate::schema::{DatasetSchema, DeclaredType, SchemaEntry};
use crate::types::{
    ActionType, CategoryLevels, CategorySpec, CleaningAction, ColumnKind, PanelFrame, StageLog,
};
use polars::prelude::*;
use tracing::debug;

/// How a single column is converted.
#[derive(Debug, Clone, PartialEq)]
enum CoercionPlan {
    /// Convert straight to the kind's storage type.
    Direct(ColumnKind),
    /// Recode scale labels to their positions, then store as `kind`.
    Positional {
        levels: CategoryLevels,
        kind: ColumnKind,
    },
    /// Categorical without a declared level list.
    ObservedCategory { ordered: bool },
}

/// Assigns every column its [`ColumnKind`].
///
/// Columns with a declared schema type use it; all others are classified
/// from their values. A column that fails its cast is left raw and untyped
/// with a warning.
pub struct TypeCoercer<'a> {
    config: &'a PipelineConfig,
}

impl<'a> TypeCoercer<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Type every column, then force the key columns to integers.
    pub fn coerce(
        &self,
        frame: PanelFrame,
        schema: &DatasetSchema,
    ) -> Result<(PanelFrame, StageLog)> {
        let mut frame = frame;
        let mut log = StageLog::new();
        let options = InferenceOptions::from(self.config);

        debug!("Coercing column types...");

        for col_name in frame.column_names() {
            if self.config.integer_keys.contains(&col_name) {
                continue;
            }

            let entry = schema.entry_for_canonical(&col_name);
            let declared = entry.and_then(|e| e.declared_type.map(|t| (e, t)));
            let (plan, source) = match declared {
                Some((entry, declared_type)) => {
                    (self.declared_plan(entry, declared_type), "declared")
                }
                None => {
                    let classification = classify(frame.series(&col_name)?, &options);
                    if classification.mixed {
                        log.warn(PipelineWarning::MixedTypes {
                            column: col_name.clone(),
                        });
                        frame.clear_kind(&col_name);
                        continue;
                    }
                    (CoercionPlan::Direct(classification.kind), "inferred")
                }
            };

            match Self::apply_plan(frame.series(&col_name)?, plan) {
                Ok((series, kind, dropped)) => {
                    debug!("{}: {} type {}", col_name, source, kind);
                    if dropped > 0 {
                        log.warn(PipelineWarning::CategoryValuesDropped {
                            column: col_name.clone(),
                            dropped,
                        });
                    }
                    log.action(
                        CleaningAction::new(
                            ActionType::TypeCoerced,
                            col_name.as_str(),
                            format!("Coerced to {kind}"),
                        )
                        .with_details(source),
                    );
                    frame.put_column(series, Some(kind))?;
                }
                Err((target, e)) => {
                    log.warn(PipelineWarning::Cast {
                        column: col_name.clone(),
                        target,
                        reason: e.to_string(),
                    });
                    frame.clear_kind(&col_name);
                }
            }
        }

        self.enforce_integer_keys(&mut frame, &mut log)?;

        Ok((frame, log))
    }

    fn integer_kind(&self) -> ColumnKind {
        if self.config.int_to_float {
            ColumnKind::Float
        } else {
            ColumnKind::Integer
        }
    }

    fn declared_plan(&self, entry: &SchemaEntry, declared: DeclaredType) -> CoercionPlan {
        let separator = &self.config.category_separator;
        match declared {
            DeclaredType::Int => CoercionPlan::Direct(self.integer_kind()),
            DeclaredType::Float => CoercionPlan::Direct(ColumnKind::Float),
            DeclaredType::Bool => {
                if self.config.bool_to_float {
                    CoercionPlan::Direct(ColumnKind::Float)
                } else {
                    CoercionPlan::Direct(ColumnKind::Boolean)
                }
            }
            DeclaredType::Text => CoercionPlan::Direct(ColumnKind::Text),
            DeclaredType::Categorical => match entry.category_spec(separator) {
                Some(spec) => CoercionPlan::Direct(ColumnKind::Category(spec)),
                None => CoercionPlan::ObservedCategory {
                    ordered: entry.ordered.unwrap_or(false),
                },
            },
            DeclaredType::Scale => match entry.category_levels(separator) {
                Some(levels) if self.config.scale_as_category => {
                    CoercionPlan::Direct(ColumnKind::Category(CategorySpec {
                        levels,
                        ordered: entry.ordered.unwrap_or(true),
                    }))
                }
                Some(levels) => CoercionPlan::Positional {
                    levels,
                    kind: self.integer_kind(),
                },
                // Rejected by schema validation; treat like an undeclared category.
                None => CoercionPlan::ObservedCategory {
                    ordered: entry.ordered.unwrap_or(true),
                },
            },
        }
    }

    /// Run a plan. On failure, returns the target name and the cast error.
    fn apply_plan(
        series: &Series,
        plan: CoercionPlan,
    ) -> std::result::Result<(Series, ColumnKind, usize), (String, CastError)> {
        match plan {
            CoercionPlan::Direct(kind) => {
                let target = kind.to_string();
                convert(series, &kind)
                    .map(|(s, dropped)| (s, kind, dropped))
                    .map_err(|e| (target, e))
            }
            CoercionPlan::Positional { levels, kind } => {
                let target = kind.to_string();
                let (codes, dropped) =
                    to_positional_codes(series, &levels).map_err(|e| (target.clone(), e))?;
                let recoded = Series::new(series.name().clone(), codes);
                convert(&recoded, &kind)
                    .map(|(s, _)| (s, kind, dropped))
                    .map_err(|e| (target, e))
            }
            CoercionPlan::ObservedCategory { ordered } => {
                let target = "category".to_string();
                let levels = observed_levels(series).map_err(|e| (target.clone(), e))?;
                let kind = ColumnKind::Category(CategorySpec { levels, ordered });
                convert(series, &kind)
                    .map(|(s, dropped)| (s, kind, dropped))
                    .map_err(|e| (target, e))
            }
        }
    }

    /// Key columns must be complete integers.
    fn enforce_integer_keys(&self, frame: &mut PanelFrame, log: &mut StageLog) -> Result<()> {
        for key in &self.config.integer_keys {
            if !frame.has_column(key) {
                continue;
            }
            let series = frame.series(key)?;
            let converted = to_integer(series).map_err(|e| {
                PanelError::Integrity(format!("key column {key} is not integral: {e}"))
            })?;
            let missing = converted.null_count();
            if missing > 0 {
                return Err(PanelError::Integrity(format!(
                    "key column {key} has {missing} missing values"
                )));
            }
            frame.put_column(converted, Some(ColumnKind::Integer))?;
            log.action(
                CleaningAction::new(ActionType::TypeCoerced, key.as_str(), "Coerced to integer")
                    .with_details("key"),
            );
        }
        Ok(())
    }
}

/// Convert a series to a kind's storage type. Returns the number of values
/// dropped for lying outside the category levels.
fn convert(series: &Series, kind: &ColumnKind) -> std::result::Result<(Series, usize), CastError> {
    match kind {
        ColumnKind::Integer => Ok((to_integer(series)?, 0)),
        ColumnKind::Float => Ok((to_float(series)?, 0)),
        ColumnKind::Boolean => Ok((to_boolean(series)?, 0)),
        ColumnKind::Category(spec) => to_category(series, &spec.levels),
        ColumnKind::Text => Ok((to_text(series)?, 0)),
    }
}
