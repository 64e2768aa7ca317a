//! Index configuration loaded from TOML.
//!
//! A geocoder is configured with one `[[index]]` table per source. Each
//! table names the index, its zoom, the types and stacks it serves, its
//! token replacements, and how its results are formatted. The bundled
//! demo configuration is embedded at compile time and exposed via
//! [`demo_config`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use strum_macros::{AsRefStr, Display, EnumString};
use waymark_geocoder_models::constants::DEFAULT_TILE_CACHE_CAPACITY;
use waymark_text::ReplacementTarget;

use crate::error::ConfigError;

/// Maximum number of distinct index names; each gets one bit of a `u64`.
pub const MAX_INDEX_NAMES: usize = 64;

/// Top-level geocoder configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GeocoderConfig {
    /// One entry per index, in hierarchy order (least specific first).
    #[serde(rename = "index", default)]
    pub indexes: Vec<IndexConfig>,
    /// Raw-text rewrites applied to every query before tokenizing.
    #[serde(default)]
    pub global_tokens: BTreeMap<String, String>,
    /// Number of decoded tiles kept in the shared cache.
    #[serde(default = "default_tile_cache_capacity")]
    pub tile_cache_capacity: usize,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            indexes: Vec::new(),
            global_tokens: BTreeMap::new(),
            tile_cache_capacity: DEFAULT_TILE_CACHE_CAPACITY,
        }
    }
}

/// Which way house numbers and places are conventionally written.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AddressOrder {
    /// Most specific first: `9 Fake Street, Springfield`.
    #[default]
    Ascending,
    /// Least specific first: `Springfield, Fake Street 9`.
    Descending,
}

/// Configuration of a single index.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Unique identifier, also used in `waste` and `indexes` output.
    pub id: String,
    /// Index name. Indexes sharing a name never stack together.
    /// Defaults to `id`.
    #[serde(default)]
    pub name: Option<String>,
    /// Primary feature type. Defaults to `id`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Every type the index serves. Defaults to `[type]`.
    #[serde(default)]
    pub types: Option<Vec<String>>,
    /// Tile zoom the index is stored at.
    pub zoom: u8,
    /// Extra zoom levels of grid resolution below `zoom`.
    #[serde(default)]
    pub resolution: u8,
    /// `[w, s, e, n]` extent of the data.
    #[serde(default = "default_bounds")]
    pub bounds: [f64; 4],
    /// Stacks (usually country codes) the index belongs to.
    #[serde(default)]
    pub stack: Vec<String>,
    /// Whether features carry address clusters or ranges.
    #[serde(default)]
    pub address: bool,
    /// Exempt from the out-of-order relevance penalty.
    #[serde(default)]
    pub ignore_order: bool,
    /// Features take the score of identically-named parents.
    #[serde(default)]
    pub inherit_score: bool,
    /// Features lend their score to identically-named children.
    #[serde(default)]
    pub grant_score: bool,
    /// Conventional address direction.
    #[serde(default)]
    pub address_order: AddressOrder,
    /// Features carry routable points.
    #[serde(default)]
    pub routable: bool,
    /// Score-mode reverse queries rank this index's features by score
    /// over distance instead of distance alone.
    #[serde(default)]
    pub reverse_mode: bool,
    /// Place name template, e.g. `"{address._number} {address._name}"`.
    #[serde(default)]
    pub format: Option<String>,
    /// Per-language place name templates.
    #[serde(default)]
    pub formats: BTreeMap<String, String>,
    /// Subtype score ranges as fractions of `maxscore`.
    #[serde(default)]
    pub scoreranges: BTreeMap<String, [f64; 2]>,
    /// Lowest feature score, required with `scoreranges`.
    #[serde(default)]
    pub minscore: Option<f64>,
    /// Highest feature score, required with `scoreranges`.
    #[serde(default)]
    pub maxscore: Option<f64>,
    /// Category phrases (lowercased) matched as categories.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Token replacements.
    #[serde(default)]
    pub tokens: BTreeMap<String, ReplacementTarget>,
    /// Languages with their own text in this index.
    #[serde(default)]
    pub languages: Vec<String>,
    /// Text is the same in every language.
    #[serde(default)]
    pub universal_text: bool,
    /// GeoJSON feature collection to load into the in-memory backend,
    /// relative to the configuration file.
    #[serde(default)]
    pub features: Option<PathBuf>,
}

const fn default_tile_cache_capacity() -> usize {
    DEFAULT_TILE_CACHE_CAPACITY
}

const fn default_bounds() -> [f64; 4] {
    [-180.0, -85.0511, 180.0, 85.0511]
}

impl IndexConfig {
    /// A configuration with every optional field at its default.
    #[must_use]
    pub fn new(id: impl Into<String>, zoom: u8) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind: None,
            types: None,
            zoom,
            resolution: 0,
            bounds: default_bounds(),
            stack: Vec::new(),
            address: false,
            ignore_order: false,
            inherit_score: false,
            grant_score: false,
            address_order: AddressOrder::default(),
            routable: false,
            reverse_mode: false,
            format: None,
            formats: BTreeMap::new(),
            scoreranges: BTreeMap::new(),
            minscore: None,
            maxscore: None,
            categories: Vec::new(),
            tokens: BTreeMap::new(),
            languages: Vec::new(),
            universal_text: false,
            features: None,
        }
    }

    /// Index name, defaulting to the id.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Primary type, defaulting to the id.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.id)
    }

    /// Every type served, the primary type included.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        match &self.types {
            Some(types) if !types.is_empty() => types.clone(),
            _ => vec![self.kind().to_string()],
        }
    }

    /// Zoom of grid entries.
    #[must_use]
    pub const fn grid_zoom(&self) -> u8 {
        self.zoom.saturating_add(self.resolution)
    }

    /// Stacks, lowercased.
    #[must_use]
    pub fn stacks(&self) -> Vec<String> {
        self.stack.iter().map(|s| s.to_lowercase()).collect()
    }

    /// Template for `language`, falling back to the default format.
    #[must_use]
    pub fn format_for(&self, language: Option<&str>) -> Option<&str> {
        language
            .and_then(|lang| {
                self.formats
                    .get(lang)
                    .or_else(|| self.formats.get(&lang.replace('-', "_")))
            })
            .or(self.format.as_ref())
            .map(String::as_str)
    }
}

/// Parses and validates a configuration document.
///
/// # Errors
///
/// * [`ConfigError::Toml`] if the document does not parse
/// * [`ConfigError::Invalid`] if index ids repeat, too many names are
///   used, or `scoreranges` is set without `minscore`/`maxscore`
pub fn parse_config(document: &str) -> Result<GeocoderConfig, ConfigError> {
    let config: GeocoderConfig = toml::de::from_str(document)?;
    validate(&config)?;
    Ok(config)
}

/// Reads a configuration file. Relative `features` paths are resolved
/// against the file's directory.
///
/// # Errors
///
/// * [`ConfigError::Io`] if the file cannot be read
/// * Anything [`parse_config`] returns
pub fn load_config(path: &Path) -> Result<GeocoderConfig, ConfigError> {
    let document = std::fs::read_to_string(path)?;
    let mut config = parse_config(&document)?;
    if let Some(dir) = path.parent() {
        for index in &mut config.indexes {
            if let Some(features) = index.features.as_mut()
                && features.is_relative()
            {
                *features = dir.join(&*features);
            }
        }
    }
    log::debug!(
        "Loaded {} index configurations from {}",
        config.indexes.len(),
        path.display()
    );
    Ok(config)
}

fn validate(config: &GeocoderConfig) -> Result<(), ConfigError> {
    let mut ids = BTreeSet::new();
    let mut names = BTreeSet::new();
    for index in &config.indexes {
        if !ids.insert(index.id.as_str()) {
            return Err(ConfigError::invalid(format!(
                "Duplicate index id: {}",
                index.id
            )));
        }
        names.insert(index.name());
        if !index.scoreranges.is_empty() && (index.minscore.is_none() || index.maxscore.is_none())
        {
            return Err(ConfigError::invalid(
                "Indexes using scoreranges must also provide min/maxscore attribute",
            ));
        }
        let [w, s, e, n] = index.bounds;
        if w > e || s > n {
            return Err(ConfigError::invalid(format!(
                "Index {} has inverted bounds",
                index.id
            )));
        }
    }
    if names.len() > MAX_INDEX_NAMES {
        return Err(ConfigError::invalid(format!(
            "At most {MAX_INDEX_NAMES} index names are supported, got {}",
            names.len()
        )));
    }
    if config.tile_cache_capacity == 0 {
        return Err(ConfigError::invalid("tile_cache_capacity must be positive"));
    }
    Ok(())
}

// ── Compile-time embedded demo data ─────────────────────────────────

const DEMO_TOML: &str = include_str!("../fixtures/demo.toml");

/// Feature collections for the demo configuration, keyed by index id.
pub const DEMO_FEATURES: &[(&str, &str)] = &[
    ("country", include_str!("../fixtures/country.geojson")),
    ("region", include_str!("../fixtures/region.geojson")),
    ("place", include_str!("../fixtures/place.geojson")),
    ("address", include_str!("../fixtures/address.geojson")),
    ("poi", include_str!("../fixtures/poi.geojson")),
];

/// The bundled demo configuration.
///
/// # Panics
///
/// Panics if the embedded TOML is malformed, which the tests below rule
/// out.
#[must_use]
pub fn demo_config() -> GeocoderConfig {
    parse_config(DEMO_TOML).unwrap_or_else(|e| panic!("Failed to parse demo configuration: {e}"))
}
