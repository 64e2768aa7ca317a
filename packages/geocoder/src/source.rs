//! Collaborator interfaces an index is built from.
//!
//! The engine never touches storage directly. Each index hands it five
//! collaborators, bundled in an [`IndexSource`]:
//!
//! 1. [`PhraseSet`]: fuzzy phrase lookup over the index's phrases
//! 2. [`GridStore`]: phrase to grid entries (tile cell, feature id, score)
//! 3. [`TileSource`]: raw, possibly compressed tile payloads
//! 4. [`TileQuery`]: point queries against a decoded tile payload
//! 5. [`FeatureStore`]: full stored features by id

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use waymark_geocoder_models::{FeatureProperties, StoredFeature};

use crate::error::SourceError;

/// How the last token of a phrase lookup may match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EndingType {
    /// Whole words only.
    #[default]
    NonPrefix,
    /// The last word may be a prefix of an indexed word.
    AnyPrefix,
    /// The last word matches whole, but the phrase may continue.
    WordBoundaryPrefix,
}

impl EndingType {
    /// Whether any prefix scanning is allowed.
    #[must_use]
    pub const fn is_prefix(self) -> bool {
        !matches!(self, Self::NonPrefix)
    }
}

/// A phrase found by a fuzzy lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseMatch {
    /// The indexed words matched, as stored.
    pub phrase: Vec<String>,
    /// Position of the first query token of the window.
    pub start_position: usize,
    /// Number of edits needed to match.
    pub edit_distance: u8,
    /// How the last word matched.
    pub ending_type: EndingType,
}

/// Fuzzy phrase lookup over one index.
pub trait PhraseSet: Send + Sync {
    /// Every contiguous window of `tokens` that matches an indexed phrase
    /// within `max_edits`. Only windows ending at the last token may use
    /// `ending_type` prefix matching.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the lookup fails.
    fn fuzzy_match_windows(
        &self,
        tokens: &[String],
        max_edits: u8,
        ending_type: EndingType,
    ) -> Result<Vec<PhraseMatch>, SourceError>;

    /// Matches each whole permutation, returning one result list per input.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the lookup fails.
    fn fuzzy_match_multi(
        &self,
        permutations: &[(Vec<String>, EndingType)],
        max_edits: u8,
    ) -> Result<Vec<Vec<PhraseMatch>>, SourceError>;
}

/// A feature's presence in one grid cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridEntry {
    /// Tile column at the index grid zoom.
    pub x: u32,
    /// Tile row at the index grid zoom.
    pub y: u32,
    /// Feature id.
    pub id: u64,
    /// Phrase relevance for the feature, `0..=1`.
    pub relev: f64,
    /// 3-bit log-scaled score.
    pub score: u8,
    /// Whether the phrase is valid in the requested language.
    pub matches_language: bool,
}

/// Phrase to grid lookup over one index.
pub trait GridStore: Send + Sync {
    /// Grid entries of every feature indexed under `phrase`, or under any
    /// phrase it is a word prefix of when `prefix` is set.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the lookup fails.
    fn grids(&self, phrase: &str, prefix: bool, language: &str) -> Result<Vec<GridEntry>, SourceError>;
}

/// Raw tile payloads.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// The payload of tile `z/x/y`, `None` when the tile is empty.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the fetch fails.
    async fn get_tile(&self, z: u8, x: u32, y: u32) -> Result<Option<Vec<u8>>, SourceError>;
}

/// A feature found by a tile point query.
#[derive(Debug, Clone, PartialEq)]
pub struct TileHit {
    /// Feature id.
    pub id: u64,
    /// Distance in meters from the query point, zero inside polygons.
    pub distance: f64,
    /// Nearest point of the feature's tile geometry.
    pub point: [f64; 2],
    /// Whether the tile geometry is a polygon.
    pub polygon: bool,
    /// Tile-level properties.
    pub properties: FeatureProperties,
}

/// Point queries against decoded tile payloads.
pub trait TileQuery: Send + Sync {
    /// Features within `radius` meters of `point`, nearest first.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Decode`] if `tile` is malformed.
    fn query(&self, tile: &[u8], point: [f64; 2], radius: f64) -> Result<Vec<TileHit>, SourceError>;
}

/// Full features by id.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// The stored feature with `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the lookup fails.
    async fn get_feature(&self, id: u64) -> Result<Option<StoredFeature>, SourceError>;
}

/// Everything the engine needs from one index.
#[derive(Clone)]
pub struct IndexSource {
    /// Fuzzy phrase lookup.
    pub phrases: Arc<dyn PhraseSet>,
    /// Phrase to grid lookup.
    pub grids: Arc<dyn GridStore>,
    /// Tile payloads.
    pub tiles: Arc<dyn TileSource>,
    /// Tile point queries.
    pub tile_query: Arc<dyn TileQuery>,
    /// Full features.
    pub features: Arc<dyn FeatureStore>,
    /// Lowest feature score in the index.
    pub min_score: f64,
    /// Highest feature score in the index.
    pub max_score: f64,
}

impl fmt::Debug for IndexSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSource")
            .field("min_score", &self.min_score)
            .field("max_score", &self.max_score)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_modes() {
        assert!(!EndingType::NonPrefix.is_prefix());
        assert!(EndingType::AnyPrefix.is_prefix());
        assert!(EndingType::WordBoundaryPrefix.is_prefix());
        assert_eq!(EndingType::default(), EndingType::NonPrefix);
    }
}
