//! Dataset specification files.
//!
//! A specification file is a JSON object keyed by dataset name. Each dataset
//! declares its index, composite facet groups, dummy descriptors, validation
//! checks, value replacements and the variables of its summary table.

use super::loader::DeclaredType;
use crate::error::{PanelError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

// ============================================================================
// Composites
// ============================================================================

/// A group of row-mean composites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompositeSpec {
    /// One composite per facet, named `{prefix}_{facet}` and fed by the
    /// columns matching `{prefix}_{facet}`.
    Facets { prefix: String, facets: Vec<String> },
    /// A single composite fed by the columns matching `pattern`.
    Pattern { output: String, pattern: String },
}

impl CompositeSpec {
    /// `(output column, column pattern)` pairs.
    pub fn targets(&self) -> Vec<(String, String)> {
        match self {
            Self::Facets { prefix, facets } => facets
                .iter()
                .map(|facet| {
                    let name = format!("{prefix}_{facet}");
                    (name.clone(), name)
                })
                .collect(),
            Self::Pattern { output, pattern } => vec![(output.clone(), pattern.clone())],
        }
    }
}

// ============================================================================
// Dummies
// ============================================================================

/// How a binary dummy maps source values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DummyRule {
    /// Positive code → 1, negative code → 0.
    #[default]
    Codes,
    /// Any value above zero → 1, otherwise 0.
    AboveZero,
}

/// Polarity descriptor of a two-level dummy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BinaryDummyRepr")]
pub struct BinaryDummy {
    pub variable: String,
    pub positive: f64,
    pub negative: f64,
    /// Swap the positive and negative codes.
    pub inverted: bool,
    pub rule: DummyRule,
}

impl BinaryDummy {
    /// Descriptor with the survey's default codes (1.0 yes, 2.0 no).
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            positive: 1.0,
            negative: 2.0,
            inverted: false,
            rule: DummyRule::Codes,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    pub fn with_rule(mut self, rule: DummyRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_codes(mut self, positive: f64, negative: f64) -> Self {
        self.positive = positive;
        self.negative = negative;
        self
    }

    /// The code mapped to 1, after inversion.
    pub fn effective_positive(&self) -> f64 {
        if self.inverted {
            self.negative
        } else {
            self.positive
        }
    }

    /// The code mapped to 0, after inversion.
    pub fn effective_negative(&self) -> f64 {
        if self.inverted {
            self.positive
        } else {
            self.negative
        }
    }

    pub fn output_name(&self) -> String {
        format!("{}_dummy", self.variable)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BinaryDummyRepr {
    Name(String),
    Full {
        variable: String,
        #[serde(default = "default_positive")]
        positive: f64,
        #[serde(default = "default_negative")]
        negative: f64,
        #[serde(default)]
        inverted: bool,
        #[serde(default)]
        rule: DummyRule,
    },
}

fn default_positive() -> f64 {
    1.0
}

fn default_negative() -> f64 {
    2.0
}

impl From<BinaryDummyRepr> for BinaryDummy {
    fn from(repr: BinaryDummyRepr) -> Self {
        match repr {
            BinaryDummyRepr::Name(variable) => Self::new(variable),
            BinaryDummyRepr::Full {
                variable,
                positive,
                negative,
                inverted,
                rule,
            } => Self {
                variable,
                positive,
                negative,
                inverted,
                rule,
            },
        }
    }
}

/// Deprivation indicator built from an a/b flag pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DeprivationDummyRepr")]
pub struct DeprivationDummy {
    pub variable: String,
    pub flag_a: Option<String>,
    pub flag_b: Option<String>,
}

impl DeprivationDummy {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            flag_a: None,
            flag_b: None,
        }
    }

    /// Overriding flag, `{variable}a` unless configured.
    pub fn flag_a(&self) -> String {
        self.flag_a
            .clone()
            .unwrap_or_else(|| format!("{}a", self.variable))
    }

    /// Primary flag, `{variable}b` unless configured.
    pub fn flag_b(&self) -> String {
        self.flag_b
            .clone()
            .unwrap_or_else(|| format!("{}b", self.variable))
    }

    pub fn output_name(&self) -> String {
        format!("{}_dummy", self.variable)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeprivationDummyRepr {
    Name(String),
    Full {
        variable: String,
        #[serde(default)]
        flag_a: Option<String>,
        #[serde(default)]
        flag_b: Option<String>,
    },
}

impl From<DeprivationDummyRepr> for DeprivationDummy {
    fn from(repr: DeprivationDummyRepr) -> Self {
        match repr {
            DeprivationDummyRepr::Name(variable) => Self::new(variable),
            DeprivationDummyRepr::Full {
                variable,
                flag_a,
                flag_b,
            } => Self {
                variable,
                flag_a,
                flag_b,
            },
        }
    }
}

/// Both dummy families of a dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DummySpecs {
    pub others: Vec<BinaryDummy>,
    pub deprivation: Vec<DeprivationDummy>,
}

impl DummySpecs {
    pub fn is_empty(&self) -> bool {
        self.others.is_empty() && self.deprivation.is_empty()
    }
}

// ============================================================================
// Checks
// ============================================================================

/// A sum-to-constant invariant over a column group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumCheckSpec {
    /// Select columns by name prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts: Option<String>,
    /// Select columns explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<Vec<String>>,
    /// Target of every non-zero row sum.
    pub sum: f64,
    /// Row filter, e.g. `year >= 2015 and employed == 1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Decimals the row sum is rounded to before comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
}

impl SumCheckSpec {
    pub fn with_prefix(prefix: impl Into<String>, sum: f64) -> Self {
        Self {
            starts: Some(prefix.into()),
            vars: None,
            sum,
            query: None,
            round: None,
        }
    }

    pub fn with_vars<I, S>(vars: I, sum: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            starts: None,
            vars: Some(vars.into_iter().map(Into::into).collect()),
            sum,
            query: None,
            round: None,
        }
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn round(mut self, decimals: u32) -> Self {
        self.round = Some(decimals);
        self
    }

    pub fn validate(&self) -> Result<()> {
        match (&self.starts, &self.vars) {
            (None, None) => Err(PanelError::Config(
                "sum check needs either 'starts' or 'vars'".to_string(),
            )),
            (Some(_), Some(_)) => Err(PanelError::Config(
                "sum check sets both 'starts' and 'vars'; choose one".to_string(),
            )),
            (_, Some(vars)) if vars.is_empty() => Err(PanelError::Config(
                "sum check 'vars' must not be empty".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Validation settings of a dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksSpec {
    /// Columns allowed to be entirely missing.
    pub nan_cols: Vec<String>,
    pub sum_checks: Vec<SumCheckSpec>,
}

// ============================================================================
// Replacing
// ============================================================================

/// One value map shared by a list of columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiColumnReplace {
    pub columns: Vec<String>,
    #[serde(alias = "dictionary")]
    pub values: BTreeMap<String, serde_json::Value>,
}

/// Value replacement rules applied before type coercion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaceSpec {
    /// String columns converted to lower case.
    #[serde(alias = "mixed_case")]
    pub lowercase: Vec<String>,
    /// Columns coerced to numbers; unparsable cells become missing.
    pub numeric: Vec<String>,
    /// Columns whose values lose a leading `[code] ` label prefix.
    pub strip_label_codes: Vec<String>,
    /// Type token → value map, applied to every column the rename table
    /// declares with that type.
    #[serde(alias = "type renaming")]
    pub by_type: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    /// Named groups of columns sharing one value map.
    pub multicolumn: BTreeMap<String, MultiColumnReplace>,
    /// Per-column `rendered value → replacement` maps.
    pub columns: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    /// Value map applied to every column of the table.
    #[serde(alias = "full_df")]
    pub all_columns: BTreeMap<String, serde_json::Value>,
    /// Per-column fill value for missing cells.
    pub fillna: BTreeMap<String, serde_json::Value>,
    /// Columns holding seconds since midnight, rendered as `HH:MM:SS`.
    pub time_columns: Vec<String>,
}

impl ReplaceSpec {
    pub fn is_empty(&self) -> bool {
        self.lowercase.is_empty()
            && self.numeric.is_empty()
            && self.strip_label_codes.is_empty()
            && self.by_type.is_empty()
            && self.multicolumn.is_empty()
            && self.columns.is_empty()
            && self.all_columns.is_empty()
            && self.fillna.is_empty()
            && self.time_columns.is_empty()
    }

    /// Reject unknown type tokens and column groups without columns.
    pub fn validate(&self) -> Result<()> {
        for token in self.by_type.keys() {
            if DeclaredType::parse(token)?.is_none() {
                return Err(PanelError::Config(
                    "type replacement with an empty type token".to_string(),
                ));
            }
        }
        for (group, replace) in &self.multicolumn {
            if replace.columns.is_empty() {
                return Err(PanelError::Config(format!(
                    "replacement group '{group}' lists no columns"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Dataset specification
// ============================================================================

/// Everything the pipeline needs to know about one dataset besides its
/// rename table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSpec {
    /// Key columns that identify a row.
    pub index: Vec<String>,
    pub composites: Vec<CompositeSpec>,
    pub dummies: DummySpecs,
    pub checks: ChecksSpec,
    pub replacing: ReplaceSpec,
    /// Variable → label of the summary statistics table.
    pub summary: BTreeMap<String, String>,
}

impl DatasetSpec {
    /// Load the specification of one dataset from a JSON file keyed by
    /// dataset name.
    pub fn load(path: &Path, dataset: &str) -> Result<Self> {
        let mut all = load_dataset_specs(path)?;
        all.remove(dataset).ok_or_else(|| {
            PanelError::Config(format!(
                "dataset '{dataset}' not found in {}",
                path.display()
            ))
        })
    }

    /// Reject malformed checks, replacements and duplicated dummy targets.
    pub fn validate(&self) -> Result<()> {
        self.replacing.validate().context("Value replacement")?;

        for (position, check) in self.checks.sum_checks.iter().enumerate() {
            check
                .validate()
                .context(format!("Sum check #{}", position + 1))?;
        }

        for composite in &self.composites {
            if let CompositeSpec::Facets { prefix, facets } = composite
                && facets.is_empty()
            {
                return Err(PanelError::Config(format!(
                    "composite group '{prefix}' lists no facets"
                )));
            }
        }

        let mut outputs = HashSet::new();
        let dummy_outputs = self
            .dummies
            .others
            .iter()
            .map(BinaryDummy::output_name)
            .chain(
                self.dummies
                    .deprivation
                    .iter()
                    .map(DeprivationDummy::output_name),
            );
        for output in dummy_outputs {
            if !outputs.insert(output.clone()) {
                return Err(PanelError::Config(format!(
                    "dummy '{output}' is declared more than once"
                )));
            }
        }

        Ok(())
    }
}

/// Parse a specification document keyed by dataset name.
pub fn parse_dataset_specs(json: &str) -> Result<BTreeMap<String, DatasetSpec>> {
    Ok(serde_json::from_str(json)?)
}

/// Load a specification file keyed by dataset name.
pub fn load_dataset_specs(path: &Path) -> Result<BTreeMap<String, DatasetSpec>> {
    let text = std::fs::read_to_string(path)
        .map_err(PanelError::from)
        .context(format!("Failed to read specification file {}", path.display()))?;
    parse_dataset_specs(&text).context(format!("Invalid specification file {}", path.display()))
}
