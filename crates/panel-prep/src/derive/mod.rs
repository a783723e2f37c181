//! Derived columns.
//!
//! This module provides:
//! - Reverse coding of marked items
//! - Row-mean composites over facet groups
//! - Binary and deprivation dummies

mod composite;
mod dummy_encoder;
mod reverse_coder;

pub use composite::{row_mean, CompositeAggregator};
pub use dummy_encoder::{binary_dummy, deprivation_dummy, DummyEncoder};
pub use reverse_coder::{observed_anchor, reverse_with_anchor, ReverseCoder};
