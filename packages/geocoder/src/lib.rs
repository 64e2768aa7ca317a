#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Forward, reverse and id geocoding over an ordered set of indexes.
//!
//! Each index holds one kind of place (countries, regions, addresses, ...)
//! and is served by pluggable collaborators defined in [`source`]: a fuzzy
//! phrase set, a phrase to grid store, vector tiles with a point query and
//! a feature store. [`memory::MemoryIndex`] implements all of them over
//! `GeoJSON` loaded at startup.
//!
//! A forward query runs through four stages:
//!
//! 1. [`phrasematch`]: match query windows against each index's phrases
//! 2. [`spatialmatch`]: stack matches from different indexes and coalesce
//!    their grids into spatially consistent candidates
//! 3. [`verifymatch`]: load candidate features and check them against the
//!    hierarchy found at their location
//! 4. [`format`]: fill place-name templates and remove duplicates
//!
//! Reverse queries skip straight to [`context`].

pub mod cache;
pub mod coalesce;
pub mod config;
pub mod context;
pub mod dedupe;
pub mod error;
pub mod filter;
pub mod format;
pub mod geocode;
pub mod index;
pub mod memory;
pub mod phrasematch;
pub mod source;
pub mod spatialmatch;
pub mod verifymatch;

#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;

use futures::future::try_join_all;
use waymark_geocoder_models::QueryOptions;
use waymark_geocoder_models::output::FeatureCollection;

pub use config::{GeocoderConfig, IndexConfig, demo_config, load_config, parse_config};
pub use error::{ConfigError, ErrorCode, GeocodeError, SourceError};

use crate::cache::TileCache;
use crate::config::DEMO_FEATURES;
use crate::index::IndexSet;
use crate::memory::MemoryIndex;
use crate::source::IndexSource;

/// A loaded set of indexes with its tile cache.
///
/// Cheap to clone; clones share indexes and cache.
#[derive(Debug, Clone)]
pub struct Geocoder {
    pub(crate) indexes: Arc<IndexSet>,
    pub(crate) cache: Arc<TileCache>,
}

impl Geocoder {
    /// Compiles `sources`, given in the same order as `config.indexes`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration is inconsistent or a
    /// replacement rule does not compile.
    pub fn new(config: &GeocoderConfig, sources: Vec<IndexSource>) -> Result<Self, ConfigError> {
        let indexes = IndexSet::new(config, sources)?;
        log::info!("Geocoder ready with {} indexes", indexes.len());
        Ok(Self {
            indexes: Arc::new(indexes),
            cache: Arc::new(TileCache::new(config.tile_cache_capacity)),
        })
    }

    /// The bundled demo indexes.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a bundled fixture fails to build.
    pub fn demo() -> Result<Self, ConfigError> {
        let config = demo_config();
        let sources = config
            .indexes
            .iter()
            .map(|index| {
                let document = DEMO_FEATURES
                    .iter()
                    .find_map(|(id, document)| (*id == index.id).then_some(*document))
                    .ok_or_else(|| {
                        ConfigError::invalid(format!("No demo features for index {}", index.id))
                    })?;
                Ok(
                    MemoryIndex::from_geojson(index, &config.global_tokens, document)?
                        .into_source(),
                )
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Self::new(&config, sources)
    }

    /// Loads a TOML configuration and the `GeoJSON` feature collection
    /// each index names in `features`.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Invalid`] if an index names no features file
    /// * [`ConfigError::Io`] if a file cannot be read
    /// * Anything [`parse_config`] or [`Geocoder::new`] returns
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = load_config(path)?;
        let sources = config
            .indexes
            .iter()
            .map(|index| {
                let features = index.features.as_ref().ok_or_else(|| {
                    ConfigError::invalid(format!("Index {} has no features file", index.id))
                })?;
                let document = std::fs::read_to_string(features)?;
                log::debug!("Indexing {} from {}", index.id, features.display());
                Ok(
                    MemoryIndex::from_geojson(index, &config.global_tokens, &document)?
                        .into_source(),
                )
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Self::new(&config, sources)
    }

    /// Geocodes one query.
    ///
    /// # Errors
    ///
    /// See [`geocode::geocode`].
    pub async fn geocode(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> Result<FeatureCollection, GeocodeError> {
        geocode::geocode(&self.indexes, &self.cache, query, options).await
    }

    /// Geocodes several queries concurrently, sharing the tile cache.
    ///
    /// # Errors
    ///
    /// Returns the first query's error.
    pub async fn geocode_many(
        &self,
        queries: &[&str],
        options: &QueryOptions,
    ) -> Result<Vec<FeatureCollection>, GeocodeError> {
        try_join_all(queries.iter().map(|query| self.geocode(query, options))).await
    }

    /// Drops every cached tile.
    pub async fn reset_cache(&self) {
        self.cache.reset().await;
    }

    /// The compiled indexes, least specific first.
    #[must_use]
    pub fn indexes(&self) -> &IndexSet {
        &self.indexes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::demo;

    #[tokio::test]
    async fn geocodes_many_queries() {
        let geocoder = demo();
        let results = geocoder
            .geocode_many(&["boston", "place.1"], &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].features.iter().any(|f| f.id == "place.2"));
        assert_eq!(results[1].features[0].id, "place.1");
    }

    #[tokio::test]
    async fn reset_cache_empties_it() {
        let geocoder = demo();
        geocoder
            .geocode("-71.0022,42.251", &QueryOptions::default())
            .await
            .unwrap();
        assert!(!geocoder.cache.is_empty().await);
        geocoder.reset_cache().await;
        assert!(geocoder.cache.is_empty().await);
    }

    #[test]
    fn loads_a_configuration_from_disk() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/demo.toml");
        let geocoder = Geocoder::load(&path).unwrap();
        assert_eq!(geocoder.indexes().len(), DEMO_FEATURES.len());
    }

    #[test]
    fn missing_features_file_is_a_config_error() {
        let dir = std::env::temp_dir().join("waymark-missing-features");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("geocoder.toml");
        std::fs::write(&path, "[[index]]\nid = \"place\"\nzoom = 12\n").unwrap();

        let err = Geocoder::load(&path).unwrap_err();
        assert!(err.to_string().contains("has no features file"), "{err}");
    }
}
