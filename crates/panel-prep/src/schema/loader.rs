//! Rename-table loading and validation.
//!
//! A dataset's schema file is a `;`-delimited table with the header
//! `raw_name;new_name;type;categories;ordered`. Only the first two columns
//! are mandatory.

use crate::config::PipelineConfig;
use crate::error::{PanelError, Result, ResultExt};
use crate::types::{CategoryLevels, CategorySpec};
use crate::utils::parse_boolean_token;
use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

/// Declared type token of a schema row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredType {
    Int,
    Float,
    Bool,
    Categorical,
    Scale,
    Text,
}

impl DeclaredType {
    /// Parse a type token. An empty token means "infer" and yields `None`.
    pub fn parse(token: &str) -> Result<Option<Self>> {
        let lower = token.trim().to_ascii_lowercase();
        let parsed = match lower.as_str() {
            "" => return Ok(None),
            "int" | "int64" => Self::Int,
            "float" | "float64" => Self::Float,
            "bool" | "boolean" => Self::Bool,
            "categorical" | "category" => Self::Categorical,
            "scale" => Self::Scale,
            "str" | "string" | "object" => Self::Text,
            _ => {
                return Err(PanelError::Config(format!(
                    "unknown type token '{}'",
                    token.trim()
                )));
            }
        };
        Ok(Some(parsed))
    }
}

impl std::fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Categorical => "categorical",
            Self::Scale => "scale",
            Self::Text => "str",
        };
        f.write_str(token)
    }
}

/// CSV row structure of a schema file.
#[derive(Debug, Deserialize)]
struct SchemaRow {
    raw_name: String,
    new_name: Option<String>,
    #[serde(default, rename = "type")]
    type_token: Option<String>,
    #[serde(default)]
    categories: Option<String>,
    #[serde(default)]
    ordered: Option<String>,
}

/// One row of the rename table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub raw_name: String,
    /// `None` marks an intentional drop.
    pub new_name: Option<String>,
    pub declared_type: Option<DeclaredType>,
    /// Category list as written in the file, unsplit.
    pub categories: Option<String>,
    pub ordered: Option<bool>,
}

impl SchemaEntry {
    /// Entry that only renames, leaving the type to inference.
    pub fn rename(raw_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self {
            raw_name: raw_name.into(),
            new_name: Some(new_name.into()),
            declared_type: None,
            categories: None,
            ordered: None,
        }
    }

    /// Entry that excludes a raw column on purpose.
    pub fn drop(raw_name: impl Into<String>) -> Self {
        Self {
            raw_name: raw_name.into(),
            new_name: None,
            declared_type: None,
            categories: None,
            ordered: None,
        }
    }

    pub fn with_type(mut self, declared: DeclaredType) -> Self {
        self.declared_type = Some(declared);
        self
    }

    pub fn with_categories(mut self, categories: impl Into<String>, ordered: bool) -> Self {
        self.categories = Some(categories.into());
        self.ordered = Some(ordered);
        self
    }

    /// Split the category list. Integer levels are tried first; if any level
    /// fails to parse, all levels are kept as labels.
    pub fn category_levels(&self, separator: &str) -> Option<CategoryLevels> {
        let raw = self.categories.as_deref()?;
        let labels: Vec<String> = raw
            .split(separator)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if labels.is_empty() {
            return None;
        }

        let codes: std::result::Result<Vec<i64>, _> =
            labels.iter().map(|l| l.parse::<i64>()).collect();
        Some(match codes {
            Ok(codes) => CategoryLevels::Codes(codes),
            Err(_) => CategoryLevels::Labels(labels),
        })
    }

    /// Category spec with the ordered flag applied.
    pub fn category_spec(&self, separator: &str) -> Option<CategorySpec> {
        self.category_levels(separator).map(|levels| CategorySpec {
            levels,
            ordered: self.ordered.unwrap_or(false),
        })
    }

    fn from_row(row: SchemaRow) -> Result<Self> {
        let raw_name = row.raw_name.trim().to_string();
        let new_name = non_empty(row.new_name);
        let declared_type = match row.type_token {
            Some(token) => DeclaredType::parse(&token)
                .context(format!("Schema row for '{raw_name}'"))?,
            None => None,
        };
        let ordered = match non_empty(row.ordered) {
            Some(flag) => Some(parse_ordered_flag(&flag).ok_or_else(|| {
                PanelError::Config(format!(
                    "Schema row for '{raw_name}': invalid ordered flag '{flag}'"
                ))
            })?),
            None => None,
        };

        Ok(Self {
            raw_name,
            new_name,
            declared_type,
            categories: non_empty(row.categories),
            ordered,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_ordered_flag(flag: &str) -> Option<bool> {
    match flag.trim() {
        "1" => Some(true),
        "0" => Some(false),
        other => parse_boolean_token(other),
    }
}

/// Strip the exempt suffixes and test the remaining name against the length
/// limit.
pub fn name_within_limit(name: &str, config: &PipelineConfig) -> bool {
    let mut stem = name;
    for suffix in &config.name_suffix_exceptions {
        stem = stem.strip_suffix(suffix.as_str()).unwrap_or(stem);
    }
    stem.chars().count() <= config.max_name_length
}

/// The rename table of one dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub entries: Vec<SchemaEntry>,
}

impl DatasetSchema {
    pub fn new(entries: Vec<SchemaEntry>) -> Self {
        Self { entries }
    }

    /// Read a schema from any reader holding `;`-delimited rows.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(true)
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut entries = Vec::new();
        for result in reader.deserialize::<SchemaRow>() {
            let row = result?;
            if row.raw_name.trim().is_empty() {
                continue;
            }
            entries.push(SchemaEntry::from_row(row)?);
        }
        Ok(Self { entries })
    }

    /// Load a schema file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(PanelError::from)
            .context(format!("Failed to open schema file {}", path.display()))?;
        Self::from_reader(file).context(format!("Failed to read schema file {}", path.display()))
    }

    /// Check the mapping is a partial injective function and every canonical
    /// name fits the legacy length limit.
    pub fn validate(&self, config: &PipelineConfig) -> Result<()> {
        let mut seen_raw = HashSet::new();
        let duplicated_raw: Vec<&str> = self
            .entries
            .iter()
            .filter(|e| !seen_raw.insert(e.raw_name.as_str()))
            .map(|e| e.raw_name.as_str())
            .collect();
        if !duplicated_raw.is_empty() {
            return Err(PanelError::Config(format!(
                "raw names listed more than once: {}",
                duplicated_raw.join(", ")
            )));
        }

        let mut targets: HashMap<&str, Vec<&str>> = HashMap::new();
        for entry in &self.entries {
            if let Some(new_name) = entry.new_name.as_deref() {
                targets
                    .entry(new_name)
                    .or_default()
                    .push(entry.raw_name.as_str());
            }
        }
        let mut collisions: Vec<String> = targets
            .iter()
            .filter(|(_, raws)| raws.len() > 1)
            .map(|(target, raws)| format!("{target} <- [{}]", raws.join(", ")))
            .collect();
        if !collisions.is_empty() {
            collisions.sort();
            return Err(PanelError::Config(format!(
                "canonical names produced by more than one raw column: {}",
                collisions.join("; ")
            )));
        }

        let mut too_long: Vec<&str> = self
            .entries
            .iter()
            .filter_map(|e| e.new_name.as_deref())
            .filter(|name| !name_within_limit(name, config))
            .collect();
        if !too_long.is_empty() {
            too_long.sort_unstable();
            return Err(PanelError::Config(format!(
                "canonical names longer than {} characters: {}",
                config.max_name_length,
                too_long.join(", ")
            )));
        }

        for entry in &self.entries {
            if entry.declared_type == Some(DeclaredType::Scale) && entry.categories.is_none() {
                return Err(PanelError::Config(format!(
                    "scale column '{}' declares no categories",
                    entry.raw_name
                )));
            }
        }

        Ok(())
    }

    /// `(raw_name, new_name)` pairs of rows that keep their column.
    pub fn mapping(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter_map(|e| e.new_name.as_deref().map(|n| (e.raw_name.as_str(), n)))
    }

    pub fn entry_for_raw(&self, raw_name: &str) -> Option<&SchemaEntry> {
        self.entries.iter().find(|e| e.raw_name == raw_name)
    }

    pub fn entry_for_canonical(&self, name: &str) -> Option<&SchemaEntry> {
        self.entries
            .iter()
            .find(|e| e.new_name.as_deref() == Some(name))
    }

    /// Raw names the schema excludes on purpose.
    pub fn intentionally_dropped(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.new_name.is_none())
            .map(|e| e.raw_name.as_str())
            .collect()
    }

    /// Whether any row declares a type.
    pub fn has_declared_types(&self) -> bool {
        self.entries.iter().any(|e| e.declared_type.is_some())
    }
}
