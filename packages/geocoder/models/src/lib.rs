#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the waymark geocoder.
//!
//! This crate contains only data types, constants, and small pure helpers.
//! It has no I/O and no async runtime dependency, so the text, spatial, and
//! geocoder crates can all share it.
//!
//! - [`constants`]: query-resolution cutoffs
//! - [`mask`]: token-position bitmask helpers
//! - [`properties`]: typed `carmen:*` feature properties
//! - [`feature`]: stored features and per-request context features
//! - [`options`]: raw and validated query options
//! - [`output`]: the public `FeatureCollection` shape

pub mod constants;
pub mod feature;
pub mod mask;
pub mod options;
pub mod output;
pub mod properties;

pub use feature::{AddressMatch, ContextFeature, FeatureKind, FeatureMeta, StoredFeature};
pub use mask::TokenMask;
pub use options::{LanguageMode, QueryOptions, ReverseMode, ValidatedOptions};
pub use properties::FeatureProperties;

/// Multiplier used to combine an index ordinal and a feature id into a
/// request-unique `tmpid`.
pub const TMPID_INDEX_FACTOR: u64 = 1 << 25;

/// Feature ids are folded into this many bits when building a `tmpid`.
pub const FEATURE_ID_MODULUS: u64 = 1 << 20;

/// Folds a feature id into the 20-bit space used by grid entries.
#[must_use]
pub const fn feature_hash(id: u64) -> u64 {
    id % FEATURE_ID_MODULUS
}

/// Builds the `tmpid` for feature `id` in index `idx`.
#[must_use]
pub const fn tmpid(idx: usize, id: u64) -> u64 {
    idx as u64 * TMPID_INDEX_FACTOR + feature_hash(id)
}

/// Recovers the index ordinal from a `tmpid`.
#[must_use]
pub const fn tmpid_index(tmpid: u64) -> usize {
    #[allow(clippy::cast_possible_truncation)]
    let idx = (tmpid / TMPID_INDEX_FACTOR) as usize;
    idx
}
