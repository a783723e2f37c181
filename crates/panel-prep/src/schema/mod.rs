//! Schema and specification loading.
//!
//! This module provides:
//! - Rename tables (`raw_name;new_name;type;categories;ordered`)
//! - Per-dataset specifications (index, composites, dummies, checks)

mod loader;
mod specs;

pub use loader::{name_within_limit, DatasetSchema, DeclaredType, SchemaEntry};
pub use specs::{
    load_dataset_specs, parse_dataset_specs, BinaryDummy, ChecksSpec, CompositeSpec,
    DatasetSpec, DeprivationDummy, DummyRule, DummySpecs, MultiColumnReplace, ReplaceSpec,
    SumCheckSpec,
};
