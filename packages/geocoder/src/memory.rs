//! In-memory index backend.
//!
//! [`MemoryIndex`] builds every collaborator an index needs from a list of
//! stored features: a phrase set searched word by word through an `fst`
//! word set and Levenshtein automata, a phrase to grid posting map,
//! gzip-compressed JSON tiles at the index zoom, and a feature store. It backs the CLI demo and the pipeline tests; it is not
//! a storage engine.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use fst::automaton::Str;
use fst::{Automaton, IntoStreamer as _, Set, Streamer as _};
use geojson::Value as GeoValue;
use levenshtein_automata::{DFA, Distance, LevenshteinAutomatonBuilder, SINK_STATE};
use waymark_geocoder_models::StoredFeature;
use waymark_spatial::bbox::{self, BBox};
use waymark_spatial::index::GeometryIndex;
use waymark_spatial::mercator::{bbox_to_tile_range, point_to_tile};
use waymark_spatial::to_geo;
use waymark_text::replacer::categorize;
use waymark_text::termops::{
    ALL_LANGUAGES, IndexReplacers, encode_3bit_log_scale, indexable_text,
};
use waymark_text::{ComplexReplacer, GlobalReplacer, SimpleReplacer};

use crate::config::IndexConfig;
use crate::error::{ConfigError, SourceError};
use crate::source::{
    EndingType, FeatureStore, GridEntry, GridStore, IndexSource, PhraseMatch, PhraseSet,
    TileHit, TileQuery, TileSource,
};

/// Largest per-word edit distance the fuzzy automata are built for.
const MAX_FUZZY_EDITS: u8 = 2;

/// Automata builders for one and two edits, transpositions counting as
/// one. Shared by every index.
static FUZZY: LazyLock<[LevenshteinAutomatonBuilder; 2]> = LazyLock::new(|| {
    [
        LevenshteinAutomatonBuilder::new(1, true),
        LevenshteinAutomatonBuilder::new(2, true),
    ]
});

/// Walks the word set with a Levenshtein DFA.
struct Fuzzy<'a>(&'a DFA);

impl Automaton for Fuzzy<'_> {
    type State = u32;

    fn start(&self) -> u32 {
        self.0.initial_state()
    }

    fn is_match(&self, state: &u32) -> bool {
        matches!(self.0.distance(*state), Distance::Exact(_))
    }

    fn can_match(&self, state: &u32) -> bool {
        *state != SINK_STATE
    }

    fn accept(&self, state: &u32, byte: u8) -> u32 {
        self.0.transition(*state, byte)
    }
}

/// Features spanning more cells than this are indexed at their center.
const MAX_FEATURE_CELLS: u64 = 10_000;

/// Tiles also hold features within this many degrees of their edge, so
/// point queries near a tile border still see them.
const TILE_BUFFER_DEGREES: f64 = 0.01;

#[derive(Debug, Clone)]
struct Posting {
    id: u64,
    languages: BTreeSet<String>,
}

/// An index held entirely in memory.
#[derive(Debug)]
pub struct MemoryIndex {
    tile_zoom: u8,
    phrases: BTreeSet<Vec<String>>,
    replacements: BTreeMap<String, String>,
    words: Set<Vec<u8>>,
    postings: BTreeMap<String, Vec<Posting>>,
    cells: BTreeMap<u64, Vec<(u32, u32)>>,
    scores: BTreeMap<u64, f64>,
    tiles: BTreeMap<(u32, u32), Vec<u8>>,
    features: BTreeMap<u64, StoredFeature>,
    min_score: f64,
    max_score: f64,
}

impl MemoryIndex {
    /// Indexes `features` under `config`.
    ///
    /// Features are normalized first (default types, address geometry
    /// collections), then every indexable phrase of every text is posted.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Text`] if a replacement rule does not compile or a
    ///   text language is unknown
    /// * [`ConfigError::Feature`] if address data does not match geometry
    /// * [`ConfigError::Io`] if a tile cannot be compressed
    pub fn build(
        config: &IndexConfig,
        global_tokens: &BTreeMap<String, String>,
        features: Vec<StoredFeature>,
    ) -> Result<Self, ConfigError> {
        let categorized = categorize(&config.tokens);
        let simple = SimpleReplacer::new(
            categorized
                .simple
                .iter()
                .map(|(from, to)| (from.as_str(), to.as_str())),
        );
        let complex = ComplexReplacer::new(&categorized.complex, true)?;
        let global = GlobalReplacer::new(global_tokens)?;
        let categories: BTreeSet<String> =
            config.categories.iter().map(|c| c.to_lowercase()).collect();
        let replacers = IndexReplacers {
            simple: &simple,
            complex: &complex,
            global: &global,
        };

        let mut index = Self {
            tile_zoom: config.zoom,
            phrases: BTreeSet::new(),
            replacements: categorized.simple.iter().cloned().collect(),
            words: Set::from_iter(std::iter::empty::<&str>())?,
            postings: BTreeMap::new(),
            cells: BTreeMap::new(),
            scores: BTreeMap::new(),
            tiles: BTreeMap::new(),
            features: BTreeMap::new(),
            min_score: 0.0,
            max_score: 0.0,
        };

        let grid_zoom = config.grid_zoom();
        let mut tile_members: BTreeMap<(u32, u32), Vec<u64>> = BTreeMap::new();

        for mut feature in features {
            feature.normalize(config.kind(), config.universal_text)?;
            fill_extent(&mut feature);

            let cells = grid_cells(&feature, grid_zoom);
            if cells.is_empty() {
                log::warn!(
                    "Skipping feature {} of index {}: no geometry, center or zxy",
                    feature.id,
                    config.id
                );
                continue;
            }

            for text in indexable_text(replacers, &feature.properties, &config.languages, &categories)? {
                index.phrases.insert(text.tokens.clone());
                index
                    .postings
                    .entry(text.tokens.join(" "))
                    .or_default()
                    .push(Posting {
                        id: feature.id,
                        languages: text.languages,
                    });
            }

            for cell in tile_cells(&feature, config.zoom) {
                tile_members.entry(cell).or_default().push(feature.id);
            }

            let score = feature.properties.score_or_zero();
            index.min_score = index.min_score.min(score);
            index.max_score = index.max_score.max(score);
            index.scores.insert(feature.id, score);
            index.cells.insert(feature.id, cells);
            index.features.insert(feature.id, feature);
        }

        let words: BTreeSet<&str> = index
            .phrases
            .iter()
            .flatten()
            .chain(index.replacements.keys())
            .map(String::as_str)
            .collect();
        index.words = Set::from_iter(words)?;

        if let Some(max) = config.maxscore {
            index.max_score = max;
        }
        if let Some(min) = config.minscore {
            index.min_score = min;
        }

        for (cell, ids) in tile_members {
            let members: Vec<&StoredFeature> =
                ids.iter().filter_map(|id| index.features.get(id)).collect();
            let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
            encoder.write_all(&serde_json::to_vec(&members)?)?;
            index.tiles.insert(cell, encoder.finish()?);
        }

        log::debug!(
            "Built in-memory index {}: {} features, {} phrases, {} words, {} tiles",
            config.id,
            index.features.len(),
            index.phrases.len(),
            index.words.len(),
            index.tiles.len()
        );
        Ok(index)
    }

    /// Indexes a `GeoJSON` `FeatureCollection` document.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Json`] if the document is not a feature collection
    /// * Anything [`MemoryIndex::build`] returns
    pub fn from_geojson(
        config: &IndexConfig,
        global_tokens: &BTreeMap<String, String>,
        document: &str,
    ) -> Result<Self, ConfigError> {
        #[derive(serde::Deserialize)]
        struct Collection {
            features: Vec<StoredFeature>,
        }
        let collection: Collection = serde_json::from_str(document)?;
        Self::build(config, global_tokens, collection.features)
    }

    /// Number of indexed features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Every indexed phrase, joined by spaces.
    pub fn phrases(&self) -> impl Iterator<Item = String> + '_ {
        self.phrases.iter().map(|p| p.join(" "))
    }

    /// Wraps the index as the collaborators of one index.
    #[must_use]
    pub fn into_source(self) -> IndexSource {
        let min_score = self.min_score;
        let max_score = self.max_score;
        let index = Arc::new(self);
        IndexSource {
            phrases: index.clone(),
            grids: index.clone(),
            tiles: index.clone(),
            tile_query: index.clone(),
            features: index,
            min_score,
            max_score,
        }
    }

    /// Indexed words `query` can stand for, with the edits each costs, up
    /// to `budget`. A hit on a replacement source credits its target.
    fn word_hits(&self, query: &str, prefix: bool, budget: u8) -> BTreeMap<String, u8> {
        let mut hits: BTreeMap<String, u8> = BTreeMap::new();
        let mut credit = |word: &str, edits: u8| {
            for indexed in std::iter::once(word).chain(self.replacements.get(word).map(String::as_str)) {
                let best = hits.entry(indexed.to_string()).or_insert(edits);
                *best = (*best).min(edits);
            }
        };

        if self.words.contains(query) {
            credit(query, 0);
        }
        if prefix {
            let mut stream = self.words.search(Str::new(query).starts_with()).into_stream();
            while let Some(key) = stream.next() {
                if let Ok(word) = std::str::from_utf8(key) {
                    credit(word, 0);
                }
            }
        }
        if budget == 0 || query.contains('#') {
            return hits;
        }

        let dfa = FUZZY[usize::from(budget.min(MAX_FUZZY_EDITS)) - 1].build_dfa(query);
        let mut stream = self.words.search(Fuzzy(&dfa)).into_stream();
        while let Some(key) = stream.next() {
            let Ok(word) = std::str::from_utf8(key) else {
                continue;
            };
            if let Distance::Exact(edits) = dfa.eval(key)
                && (edits == 0 || !word.contains('#'))
            {
                credit(word, edits);
            }
        }
        hits
    }

    fn match_all(
        &self,
        query: &[String],
        start_position: usize,
        mode: EndingType,
        max_edits: u8,
        found: &mut BTreeMap<(usize, Vec<String>, EndingType), u8>,
    ) {
        let n = query.len();
        if n == 0 {
            return;
        }
        let hits: Vec<BTreeMap<String, u8>> = query
            .iter()
            .enumerate()
            .map(|(i, word)| {
                let prefix = i == n - 1 && mode == EndingType::AnyPrefix;
                self.word_hits(word, prefix, max_edits)
            })
            .collect();

        for first in hits[0].keys() {
            let candidates = self
                .phrases
                .range(vec![first.clone()]..)
                .take_while(|phrase| phrase.first() == Some(first));
            for phrase in candidates {
                if n > phrase.len() || (n < phrase.len() && !mode.is_prefix()) {
                    continue;
                }
                let edits = hits
                    .iter()
                    .zip(phrase)
                    .map(|(hits, word)| hits.get(word).copied())
                    .try_fold(0_u8, |used, edits| edits.map(|e| used.saturating_add(e)));
                let Some(edits) = edits.filter(|edits| *edits <= max_edits) else {
                    continue;
                };
                let key = (start_position, phrase[..n].to_vec(), mode);
                let best = found.entry(key).or_insert(edits);
                *best = (*best).min(edits);
            }
        }
    }
}

fn to_matches(found: BTreeMap<(usize, Vec<String>, EndingType), u8>) -> Vec<PhraseMatch> {
    found
        .into_iter()
        .map(|((start_position, phrase, ending_type), edit_distance)| PhraseMatch {
            phrase,
            start_position,
            edit_distance,
            ending_type,
        })
        .collect()
}

impl PhraseSet for MemoryIndex {
    fn fuzzy_match_windows(
        &self,
        tokens: &[String],
        max_edits: u8,
        ending_type: EndingType,
    ) -> Result<Vec<PhraseMatch>, SourceError> {
        let mut found = BTreeMap::new();
        for start in 0..tokens.len() {
            for end in start + 1..=tokens.len() {
                let mode = if end == tokens.len() {
                    ending_type
                } else {
                    EndingType::NonPrefix
                };
                self.match_all(&tokens[start..end], start, mode, max_edits, &mut found);
            }
        }
        Ok(to_matches(found))
    }

    fn fuzzy_match_multi(
        &self,
        permutations: &[(Vec<String>, EndingType)],
        max_edits: u8,
    ) -> Result<Vec<Vec<PhraseMatch>>, SourceError> {
        Ok(permutations
            .iter()
            .map(|(tokens, mode)| {
                let mut found = BTreeMap::new();
                self.match_all(tokens, 0, *mode, max_edits, &mut found);
                to_matches(found)
            })
            .collect())
    }
}

impl GridStore for MemoryIndex {
    fn grids(&self, phrase: &str, prefix: bool, language: &str) -> Result<Vec<GridEntry>, SourceError> {
        let mut best: BTreeMap<(u64, u32, u32), GridEntry> = BTreeMap::new();
        let matching = self
            .postings
            .range(phrase.to_string()..)
            .take_while(|(key, _)| key.starts_with(phrase))
            .filter(|(key, _)| key.len() == phrase.len() || (prefix && key[phrase.len()..].starts_with(' ')));

        for (_, postings) in matching {
            for posting in postings {
                let matches_language = posting.languages.contains(language)
                    || posting.languages.contains(ALL_LANGUAGES);
                let score = encode_3bit_log_scale(
                    self.scores.get(&posting.id).copied().unwrap_or(0.0),
                    self.max_score,
                );
                for &(x, y) in self.cells.get(&posting.id).into_iter().flatten() {
                    let entry = best.entry((posting.id, x, y)).or_insert(GridEntry {
                        x,
                        y,
                        id: posting.id,
                        relev: 1.0,
                        score,
                        matches_language,
                    });
                    entry.matches_language |= matches_language;
                }
            }
        }
        Ok(best.into_values().collect())
    }
}

#[async_trait]
impl TileSource for MemoryIndex {
    async fn get_tile(&self, z: u8, x: u32, y: u32) -> Result<Option<Vec<u8>>, SourceError> {
        if z != self.tile_zoom {
            return Ok(None);
        }
        Ok(self.tiles.get(&(x, y)).cloned())
    }
}

impl TileQuery for MemoryIndex {
    fn query(&self, tile: &[u8], point: [f64; 2], radius: f64) -> Result<Vec<TileHit>, SourceError> {
        let features: Vec<StoredFeature> = serde_json::from_slice(tile)?;
        let geometries = GeometryIndex::build(features.iter().filter_map(|feature| {
            let geometry = match &feature.geometry {
                Some(g) => to_geo(g)?,
                None => {
                    let [lon, lat] = feature.properties.center?;
                    geo::Geometry::Point(geo::Point::new(lon, lat))
                }
            };
            Some((feature, geometry))
        }));

        Ok(geometries
            .query(point, radius)
            .into_iter()
            .map(|hit| TileHit {
                id: hit.payload.id,
                distance: hit.distance,
                point: nearest_vertex(hit.geometry, point)
                    .or(hit.payload.properties.center)
                    .unwrap_or(point),
                polygon: hit.payload.is_polygon(),
                properties: hit.payload.properties.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl FeatureStore for MemoryIndex {
    async fn get_feature(&self, id: u64) -> Result<Option<StoredFeature>, SourceError> {
        Ok(self.features.get(&id).cloned())
    }
}

/// Nearest point of a point or multipoint geometry.
fn nearest_vertex(geometry: &geo::Geometry<f64>, query: [f64; 2]) -> Option<[f64; 2]> {
    let points: Vec<[f64; 2]> = match geometry {
        geo::Geometry::Point(p) => vec![[p.x(), p.y()]],
        geo::Geometry::MultiPoint(mp) => mp.iter().map(|p| [p.x(), p.y()]).collect(),
        geo::Geometry::GeometryCollection(gc) => {
            return gc.iter().filter_map(|g| nearest_vertex(g, query)).min_by(|a, b| {
                waymark_spatial::proximity::distance_meters(query, *a)
                    .total_cmp(&waymark_spatial::proximity::distance_meters(query, *b))
            });
        }
        _ => return None,
    };
    points.into_iter().min_by(|a, b| {
        waymark_spatial::proximity::distance_meters(query, *a)
            .total_cmp(&waymark_spatial::proximity::distance_meters(query, *b))
    })
}

/// Sets a missing bbox (non-point features) and center from the geometry.
fn fill_extent(feature: &mut StoredFeature) {
    let Some(geometry) = feature.geometry.as_ref().and_then(to_geo) else {
        return;
    };
    let Some(extent) = bbox::of_geometry(&geometry) else {
        return;
    };
    let is_point = matches!(
        feature.geometry.as_ref().map(|g| &g.value),
        Some(GeoValue::Point(_))
    );
    if feature.bbox.is_none() && !is_point {
        feature.bbox = bbox::cross_antimeridian(&geometry);
    }
    if feature.properties.center.is_none() {
        feature.properties.center = Some([
            f64::midpoint(extent[0], extent[2]),
            f64::midpoint(extent[1], extent[3]),
        ]);
    }
}

fn feature_extent(feature: &StoredFeature) -> Option<BBox> {
    feature
        .geometry
        .as_ref()
        .and_then(to_geo)
        .and_then(|g| bbox::of_geometry(&g))
        .or_else(|| feature.properties.center.map(|[x, y]| [x, y, x, y]))
}

fn cells_in(extent: &BBox, zoom: u8, center: Option<[f64; 2]>) -> Vec<(u32, u32)> {
    let range = bbox_to_tile_range(extent, zoom);
    let count = u64::from(range.max_x - range.min_x + 1) * u64::from(range.max_y - range.min_y + 1);
    if count > MAX_FEATURE_CELLS {
        log::warn!("Feature spans {count} tiles at z{zoom}; indexing its center only");
        return center
            .map(|[lon, lat]| {
                let tile = point_to_tile(lon, lat, zoom);
                vec![(tile.x, tile.y)]
            })
            .unwrap_or_default();
    }
    (range.min_x..=range.max_x)
        .flat_map(|x| (range.min_y..=range.max_y).map(move |y| (x, y)))
        .collect()
}

/// Grid cells at `zoom`: from `carmen:zxy` when present, else the
/// geometry extent, else the center.
fn grid_cells(feature: &StoredFeature, zoom: u8) -> Vec<(u32, u32)> {
    let mut cells = BTreeSet::new();
    for zxy in &feature.properties.zxy {
        let parts: Vec<u32> = zxy.split('/').filter_map(|p| p.parse().ok()).collect();
        let [z, x, y] = parts.as_slice() else {
            log::warn!("Ignoring malformed zxy {zxy} on feature {}", feature.id);
            continue;
        };
        let Ok(z) = u8::try_from(*z) else { continue };
        if z >= zoom {
            let shift = z - zoom;
            cells.insert((x >> shift, y >> shift));
        } else {
            let shift = zoom - z;
            let (x0, y0) = (x << shift, y << shift);
            for dx in 0..1u32 << shift {
                for dy in 0..1u32 << shift {
                    cells.insert((x0 + dx, y0 + dy));
                }
            }
        }
    }
    if !cells.is_empty() {
        return cells.into_iter().collect();
    }
    feature_extent(feature)
        .map(|extent| cells_in(&extent, zoom, feature.properties.center))
        .unwrap_or_default()
}

/// Tiles at `zoom` that hold the feature, with a small buffer.
fn tile_cells(feature: &StoredFeature, zoom: u8) -> Vec<(u32, u32)> {
    feature_extent(feature)
        .map(|[w, s, e, n]| {
            let buffered = [
                w - TILE_BUFFER_DEGREES,
                s - TILE_BUFFER_DEGREES,
                e + TILE_BUFFER_DEGREES,
                n + TILE_BUFFER_DEGREES,
            ];
            cells_in(&buffered, zoom, feature.properties.center)
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waymark_geocoder_models::FeatureProperties;

    fn feature(id: u64, text: &str) -> StoredFeature {
        let mut props = FeatureProperties::with_text(text);
        props.score = Some(100.0);
        props.zxy = vec!["6/32/32".into()];
        props.center = Some([0.0, 0.0]);
        StoredFeature {
            id,
            properties: props,
            geometry: None,
            bbox: None,
        }
    }

    fn poi_index() -> MemoryIndex {
        let mut config = IndexConfig::new("poi", 6);
        for (from, to) in [("Street", "St"), ("Station", "Stn"), ("Fort", "Ft")] {
            config
                .tokens
                .insert(from.into(), waymark_text::ReplacementTarget::Text(to.into()));
        }
        MemoryIndex::build(
            &config,
            &BTreeMap::new(),
            vec![
                feature(1, "30th Street Station"),
                feature(2, "Fort Wayne Stadium"),
                feature(3, "Ft Sumpter Museum"),
                feature(4, "Fortenberry Coffee"),
            ],
        )
        .unwrap()
    }

    fn words(text: &str) -> Vec<String> {
        text.split(' ').map(ToString::to_string).collect()
    }

    fn phrases(matches: &[PhraseMatch]) -> BTreeSet<String> {
        matches.iter().map(|m| m.phrase.join(" ")).collect()
    }

    #[test]
    fn indexes_replaced_phrases() {
        let index = poi_index();
        let all: BTreeSet<String> = index.phrases().collect();
        assert!(all.contains("30th st stn"), "{all:?}");
        assert!(all.contains("ft wayne stadium"), "{all:?}");
        assert!(all.contains("fortenberry coffee"), "{all:?}");
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn prefix_scan_matches_words_and_replacement_sources() {
        let index = poi_index();
        let matches = index
            .fuzzy_match_windows(&words("fo"), 0, EndingType::AnyPrefix)
            .unwrap();
        assert_eq!(
            phrases(&matches),
            BTreeSet::from(["fortenberry".to_string(), "ft".to_string()])
        );
    }

    #[test]
    fn whole_phrase_required_without_prefix() {
        let index = poi_index();
        let matches = index
            .fuzzy_match_windows(&words("fort"), 0, EndingType::NonPrefix)
            .unwrap();
        assert!(matches.is_empty(), "{matches:?}");

        let matches = index
            .fuzzy_match_windows(&words("fort wayne stadium"), 0, EndingType::NonPrefix)
            .unwrap();
        assert_eq!(phrases(&matches), BTreeSet::from(["ft wayne stadium".to_string()]));
    }

    #[test]
    fn fuzzy_matches_through_replacements() {
        let index = poi_index();
        let matches = index
            .fuzzy_match_windows(&words("30th strete"), 1, EndingType::AnyPrefix)
            .unwrap();
        let full = matches
            .iter()
            .find(|m| m.phrase == words("30th st"))
            .expect("30th st matched");
        assert_eq!(full.edit_distance, 1);
        assert_eq!(full.start_position, 0);

        let matches = index
            .fuzzy_match_windows(&words("forp"), 1, EndingType::AnyPrefix)
            .unwrap();
        assert_eq!(phrases(&matches), BTreeSet::from(["ft".to_string()]));
    }

    #[test]
    fn multi_matches_each_permutation() {
        let index = poi_index();
        let results = index
            .fuzzy_match_multi(
                &[
                    (words("ft wayne"), EndingType::AnyPrefix),
                    (words("wayne ft"), EndingType::NonPrefix),
                ],
                0,
            )
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(phrases(&results[0]), BTreeSet::from(["ft wayne".to_string()]));
        assert!(results[1].is_empty());
    }

    #[test]
    fn prefix_grids_stop_at_word_boundaries() {
        let index = poi_index();
        let ids = |phrase: &str, prefix: bool| -> BTreeSet<u64> {
            index
                .grids(phrase, prefix, "default")
                .unwrap()
                .into_iter()
                .map(|g| g.id)
                .collect()
        };
        assert_eq!(ids("ft", true), BTreeSet::from([2, 3]));
        assert!(ids("ft", false).is_empty());
        assert_eq!(ids("fortenberry coffee", false), BTreeSet::from([4]));

        let grid = index.grids("fortenberry coffee", false, "default").unwrap()[0];
        assert_eq!((grid.x, grid.y), (32, 32));
        assert_eq!(grid.score, 7);
        assert!(grid.matches_language);
    }

    #[tokio::test]
    async fn tiles_round_trip_through_the_cache_codec() {
        let config = IndexConfig::new("place", 6);
        let index = MemoryIndex::from_geojson(
            &config,
            &BTreeMap::new(),
            &json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "id": 7,
                    "properties": { "carmen:text": "Square", "carmen:score": 3 },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.1, 0.1], [1.0, 0.1], [1.0, 1.0], [0.1, 1.0], [0.1, 0.1]]]
                    }
                }]
            })
            .to_string(),
        )
        .unwrap();

        let tile = point_to_tile(0.5, 0.5, 6);
        let raw = index.get_tile(6, tile.x, tile.y).await.unwrap().unwrap();
        let decoded = crate::cache::decompress(&raw).unwrap();
        let hits = index.query(&decoded, [0.5, 0.5], 1000.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 7);
        assert!(hits[0].polygon);
        assert!(hits[0].distance.abs() < f64::EPSILON);

        let stored = index.get_feature(7).await.unwrap().unwrap();
        assert_eq!(stored.properties.center, Some([0.55, 0.55]));
        assert_eq!(stored.bbox, Some([0.1, 0.1, 1.0, 1.0]));
        assert_eq!(stored.properties.types, vec!["place".to_string()]);
        assert!(index.get_tile(5, tile.x, tile.y).await.unwrap().is_none());
    }

    #[test]
    fn word_hits_count_transpositions_and_credit_replacement_targets() {
        let index = poi_index();
        let hits = index.word_hits("strete", false, 1);
        assert_eq!(hits.get("street"), Some(&1));
        assert_eq!(hits.get("st"), Some(&1));

        let hits = index.word_hits("fort", false, 0);
        assert_eq!(hits.get("ft"), Some(&0));

        assert!(index.word_hits("forten", false, 1).is_empty());
        assert_eq!(
            index.word_hits("fort", true, 0).keys().collect::<Vec<_>>(),
            ["fort", "fortenberry", "ft"]
        );
    }
}
