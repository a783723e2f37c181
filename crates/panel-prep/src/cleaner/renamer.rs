//! Schema-driven column renaming.

use crate::config::PipelineConfig;
use crate::error::{Completeness, PanelError, PipelineWarning, Result};
use crate::schema::DatasetSchema;
use crate::types::{ActionType, CleaningAction, PanelFrame, StageLog};
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Renames raw columns to their canonical names and drops everything the
/// schema does not keep.
pub struct ColumnRenamer;

impl ColumnRenamer {
    /// Rename `frame` according to `schema`.
    ///
    /// Output columns keep the raw column order. Raw columns without a schema
    /// row are dropped with a completeness warning, or rejected when
    /// `renaming_complete` is set.
    pub fn rename(
        &self,
        frame: PanelFrame,
        schema: &DatasetSchema,
        config: &PipelineConfig,
    ) -> Result<(PanelFrame, StageLog)> {
        schema.validate(config)?;

        let mut log = StageLog::new();
        let raw_columns = frame.column_names();
        let raw_set: HashSet<&str> = raw_columns.iter().map(String::as_str).collect();
        let known: HashSet<&str> = schema.entries.iter().map(|e| e.raw_name.as_str()).collect();
        let mapping: HashMap<&str, &str> = schema.mapping().collect();

        let unmapped: Vec<String> = raw_columns
            .iter()
            .filter(|c| !known.contains(c.as_str()))
            .cloned()
            .collect();
        if !unmapped.is_empty() {
            if config.renaming_complete {
                return Err(PanelError::Config(format!(
                    "the following variables are not in the renaming table: {}",
                    unmapped.join(", ")
                )));
            }
            log.warn(PipelineWarning::Completeness {
                side: Completeness::MissingFromSchema,
                columns: unmapped.clone(),
            });
        }

        let absent: Vec<String> = schema
            .mapping()
            .filter(|(raw, _)| !raw_set.contains(raw))
            .map(|(raw, _)| raw.to_string())
            .collect();
        if !absent.is_empty() {
            log.warn(PipelineWarning::Completeness {
                side: Completeness::MissingFromData,
                columns: absent,
            });
        }

        for raw in schema.intentionally_dropped() {
            if raw_set.contains(raw) {
                debug!("Dropping '{}' as listed without a new name", raw);
                log.action(
                    CleaningAction::new(ActionType::ColumnDropped, raw, "Excluded by schema")
                        .with_details("no new name"),
                );
            }
        }

        let (data, index, mut kinds) = frame.into_parts();
        let mut columns: Vec<Column> = Vec::with_capacity(mapping.len());
        let mut renamed_kinds = HashMap::new();
        for raw in &raw_columns {
            let Some(new_name) = mapping.get(raw.as_str()) else {
                continue;
            };
            let mut series = data.column(raw)?.as_materialized_series().clone();
            series.rename((*new_name).into());
            columns.push(series.into_column());
            if let Some(kind) = kinds.remove(raw) {
                renamed_kinds.insert(new_name.to_string(), kind);
            }

            if raw.as_str() != *new_name {
                debug!("Renamed '{}' -> '{}'", raw, new_name);
                log.action(CleaningAction::new(
                    ActionType::ColumnRenamed,
                    *new_name,
                    format!("Renamed from {raw}"),
                ));
            }
        }

        if !unmapped.is_empty() {
            log.action(
                CleaningAction::new(
                    ActionType::ColumnDropped,
                    "dataset",
                    format!("Dropped {} columns missing from the schema", unmapped.len()),
                )
                .with_details(unmapped.join(", ")),
            );
        }

        let renamed = DataFrame::new(columns)?;
        let index = index
            .into_iter()
            .map(|k| mapping.get(k.as_str()).map(|n| n.to_string()).unwrap_or(k))
            .collect();

        Ok((PanelFrame::from_parts(renamed, index, renamed_kinds), log))
    }
}
