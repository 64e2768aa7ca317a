//! Query-resolution cutoffs shared by every pipeline stage.
//!
//! These values shape result quality and worst-case combinatorics.
//! Coordinate changes with the relevance test corpus.

/// Maximum number of characters accepted in a query string.
pub const MAX_QUERY_CHARS: usize = 256;

/// Maximum number of tokens accepted after tokenization.
pub const MAX_QUERY_TOKENS: usize = 20;

/// Token bitmasks are `u32`, so no query may address more positions.
pub const MAX_MASK_TOKENS: usize = 32;

/// Proximity radius (miles) for features indexed at zoom 6 and below.
pub const Z6_PROXIMITY_RADIUS: f64 = 1800.0;

/// Proximity radius (miles) for features indexed at zoom 12.
pub const Z12_PROXIMITY_RADIUS: f64 = 600.0;

/// Proximity radius (miles) for features indexed at zoom 14 and above.
pub const Z14_PROXIMITY_RADIUS: f64 = 100.0;

/// Single-token phrases shorter than this never accept a fuzzy correction.
pub const MIN_CORRECTION_LENGTH: usize = 4;

/// Queries with more tokens than this are matched without fuzzy edits.
pub const MAX_CORRECTION_LENGTH: usize = 8;

/// Stack combinations kept by `stackable` before type filtering.
pub const STACKABLE_LIMIT: usize = 100;

/// Stacks retained for coalescing.
pub const SPATIALMATCH_STACK_LIMIT: usize = 30;

/// Good stacks to load features for.
pub const VERIFYMATCH_STACK_LIMIT: usize = 20;

/// Maximum features loaded while looking for `VERIFYMATCH_STACK_LIMIT` good stacks.
pub const VERIFYMATCH_MAX_FEATURES_LIMIT: usize = 50;

/// Maximum contexts loaded while looking for `limit_verify` good ones.
pub const MAX_CONTEXTS_LIMIT: usize = 20;

/// Default number of verified contexts kept per forward query.
pub const DEFAULT_LIMIT_VERIFY: usize = 10;

/// Default forward result limit.
pub const DEFAULT_LIMIT: usize = 5;

/// Hard cap on the forward result limit.
pub const MAX_FORWARD_LIMIT: usize = 10;

/// Hard cap on the reverse result limit (single type only).
pub const MAX_REVERSE_LIMIT: usize = 5;

/// Maximum number of requested languages.
pub const MAX_LANGUAGES: usize = 20;

/// Maximum number of results returned by coalesce for a single stack.
pub const COALESCE_RESULT_LIMIT: usize = 40;

/// Relevance multiplier applied when a grid entry does not match the
/// requested language.
pub const LANGUAGE_MISMATCH_PENALTY: f64 = 0.96;

/// Relevance multiplier applied to address features that fell back to a
/// street result.
pub const STREET_FALLBACK_PENALTY: f64 = 0.99;

/// Relevance adjustment applied to any stack with a detectable direction.
pub const DIRECTION_PENALTY: f64 = 0.01;

/// Relevance adjustment granted when the direction matches the index's
/// declared address order.
pub const ADDRESS_ORDER_BONUS: f64 = 0.01;

/// Search radius (meters) for point-in-tile feature lookups.
pub const CONTEXT_QUERY_RADIUS: f64 = 1000.0;

/// Maximum candidate points returned by `nearest`.
pub const NEAREST_POINTS_LIMIT: usize = 50;

/// Maximum house-number gap allowed for the omitted-endpoint interpolation
/// fallback.
pub const ITP_OMITTED_THRESHOLD: f64 = 400.0;

/// Interpolated reverse results are only preferred over cluster points
/// when the two are further apart than this (kilometers).
pub const ITP_PREFERENCE_DISTANCE_KM: f64 = 0.2;

/// Maximum address points derived from a single cluster match.
pub const ADDRESS_CLUSTER_MATCH_LIMIT: usize = 10;

/// Upper bound of the 3-bit log score scale.
pub const SCORE_SCALE_MAX: u8 = 7;

/// Default tile cache capacity.
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 1024;
