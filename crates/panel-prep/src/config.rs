//! Configuration types for the cleaning pipeline.
//!
//! This module provides configuration options using the builder pattern
//! for flexible and ergonomic pipeline setup. The same struct deserializes
//! from JSON so a run can be driven entirely from files.

use serde::{Deserialize, Serialize};

/// Default sentinel codes: every integer from -1 through -10.
pub fn default_sentinel_codes() -> Vec<i64> {
    (-10..=-1).rev().collect()
}

/// Configuration for the cleaning pipeline.
///
/// Use [`PipelineConfig::builder()`] to create a new configuration
/// with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use panel_prep::config::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .int_to_float(true)
///     .renaming_complete(true)
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Negative survey codes replaced by the missing marker.
    /// Default: -1 through -10
    pub sentinel_codes: Vec<i64>,

    /// Separator of the category list in the schema file.
    /// Default: ", "
    pub category_separator: String,

    /// Type integer columns as floats.
    /// Default: false
    pub int_to_float: bool,

    /// Type boolean columns as floats (1.0 / 0.0).
    /// Default: false
    pub bool_to_float: bool,

    /// Treat declared `scale` columns as ordered categories instead of
    /// recoding them to positional integers.
    /// Default: true
    pub scale_as_category: bool,

    /// Maximum number of distinct values for a non-numeric column to be
    /// inferred as a category.
    /// Default: 18
    pub max_string_categories: usize,

    /// Escalate raw columns that are missing from the schema to a
    /// configuration error.
    /// Default: false
    pub renaming_complete: bool,

    /// Columns always coerced to a non-nullable integer after typing.
    /// Default: ["person_id", "year"]
    pub integer_keys: Vec<String>,

    /// Name marker of reverse-coded items.
    /// Default: "_neg"
    pub reverse_marker: String,

    /// Longest allowed canonical name (legacy statistical-format limit).
    /// Default: 31
    pub max_name_length: usize,

    /// Suffixes stripped before the name length check.
    /// Default: ["_merge", "_202002", "_update"]
    pub name_suffix_exceptions: Vec<String>,

    /// Columns allowed to be entirely missing, in addition to the dataset's
    /// own `nan_cols` list.
    /// Default: empty
    pub allow_all_missing: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sentinel_codes: default_sentinel_codes(),
            category_separator: ", ".to_string(),
            int_to_float: false,
            bool_to_float: false,
            scale_as_category: true,
            max_string_categories: 18,
            renaming_complete: false,
            integer_keys: vec!["person_id".to_string(), "year".to_string()],
            reverse_marker: "_neg".to_string(),
            max_name_length: 31,
            name_suffix_exceptions: vec![
                "_merge".to_string(),
                "_202002".to_string(),
                "_update".to_string(),
            ],
            allow_all_missing: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.category_separator.is_empty() {
            return Err(ConfigValidationError::EmptyField(
                "category_separator".to_string(),
            ));
        }

        if self.reverse_marker.is_empty() {
            return Err(ConfigValidationError::EmptyField(
                "reverse_marker".to_string(),
            ));
        }

        if let Some(code) = self.sentinel_codes.iter().find(|code| **code >= 0) {
            return Err(ConfigValidationError::NonNegativeSentinel(*code));
        }

        if self.max_name_length == 0 {
            return Err(ConfigValidationError::InvalidNameLength(
                self.max_name_length,
            ));
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Configuration field '{0}' must not be empty")]
    EmptyField(String),

    #[error("Sentinel code {0} is not negative")]
    NonNegativeSentinel(i64),

    #[error("Invalid maximum name length: {0} (must be at least 1)")]
    InvalidNameLength(usize),
}

/// Builder for [`PipelineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    sentinel_codes: Option<Vec<i64>>,
    category_separator: Option<String>,
    int_to_float: Option<bool>,
    bool_to_float: Option<bool>,
    scale_as_category: Option<bool>,
    max_string_categories: Option<usize>,
    renaming_complete: Option<bool>,
    integer_keys: Option<Vec<String>>,
    reverse_marker: Option<String>,
    max_name_length: Option<usize>,
    name_suffix_exceptions: Option<Vec<String>>,
    allow_all_missing: Option<Vec<String>>,
}

impl PipelineConfigBuilder {
    /// Set the negative codes replaced by the missing marker.
    pub fn sentinel_codes(mut self, codes: impl IntoIterator<Item = i64>) -> Self {
        self.sentinel_codes = Some(codes.into_iter().collect());
        self
    }

    /// Set the separator of category lists in the schema file.
    pub fn category_separator(mut self, separator: impl Into<String>) -> Self {
        self.category_separator = Some(separator.into());
        self
    }

    /// Type integer columns as floats.
    pub fn int_to_float(mut self, enable: bool) -> Self {
        self.int_to_float = Some(enable);
        self
    }

    /// Type boolean columns as floats.
    pub fn bool_to_float(mut self, enable: bool) -> Self {
        self.bool_to_float = Some(enable);
        self
    }

    /// Treat declared scales as ordered categories.
    pub fn scale_as_category(mut self, enable: bool) -> Self {
        self.scale_as_category = Some(enable);
        self
    }

    /// Set the distinct-value limit for inferring string categories.
    pub fn max_string_categories(mut self, limit: usize) -> Self {
        self.max_string_categories = Some(limit);
        self
    }

    /// Fail when raw columns have no schema row.
    pub fn renaming_complete(mut self, strict: bool) -> Self {
        self.renaming_complete = Some(strict);
        self
    }

    /// Set the columns forced to non-nullable integers.
    pub fn integer_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.integer_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Set the name marker of reverse-coded items.
    pub fn reverse_marker(mut self, marker: impl Into<String>) -> Self {
        self.reverse_marker = Some(marker.into());
        self
    }

    /// Set the longest allowed canonical name.
    pub fn max_name_length(mut self, length: usize) -> Self {
        self.max_name_length = Some(length);
        self
    }

    /// Set the suffixes ignored by the name length check.
    pub fn name_suffix_exceptions<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.name_suffix_exceptions = Some(suffixes.into_iter().map(Into::into).collect());
        self
    }

    /// Set the columns allowed to be entirely missing.
    pub fn allow_all_missing<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_all_missing = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `PipelineConfig` or an error if validation fails.
    pub fn build(self) -> Result<PipelineConfig, ConfigValidationError> {
        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            sentinel_codes: self.sentinel_codes.unwrap_or(defaults.sentinel_codes),
            category_separator: self
                .category_separator
                .unwrap_or(defaults.category_separator),
            int_to_float: self.int_to_float.unwrap_or(defaults.int_to_float),
            bool_to_float: self.bool_to_float.unwrap_or(defaults.bool_to_float),
            scale_as_category: self.scale_as_category.unwrap_or(defaults.scale_as_category),
            max_string_categories: self
                .max_string_categories
                .unwrap_or(defaults.max_string_categories),
            renaming_complete: self.renaming_complete.unwrap_or(defaults.renaming_complete),
            integer_keys: self.integer_keys.unwrap_or(defaults.integer_keys),
            reverse_marker: self.reverse_marker.unwrap_or(defaults.reverse_marker),
            max_name_length: self.max_name_length.unwrap_or(defaults.max_name_length),
            name_suffix_exceptions: self
                .name_suffix_exceptions
                .unwrap_or(defaults.name_suffix_exceptions),
            allow_all_missing: self.allow_all_missing.unwrap_or(defaults.allow_all_missing),
        };

        config.validate()?;
        Ok(config)
    }
}
