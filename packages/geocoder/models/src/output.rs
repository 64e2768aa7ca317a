//! Public result shapes.
//!
//! These serialize to the GeoJSON-flavoured `FeatureCollection` callers see.
//! Per-language fields (`text_en`, `place_name_en`, `language_en`) are kept
//! in flattened maps so the set of languages can vary per request.

use std::collections::BTreeMap;

use geojson::Geometry;
use serde::Serialize;
use serde_json::{Map, Value};

/// What was asked: normalized tokens for forward and id queries, a point
/// for reverse queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryEcho {
    /// Normalized query tokens.
    Tokens(Vec<String>),
    /// Reverse query point.
    Point([f64; 2]),
}

/// Output geometry with the interpolation markers the formatter attaches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputGeometry {
    /// The geometry itself.
    #[serde(flatten)]
    pub geometry: Geometry,
    /// Set when the point was interpolated along an address range.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub interpolated: bool,
    /// Set when the point was synthesized from an omitted range endpoint.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub omitted: bool,
}

impl OutputGeometry {
    /// Wraps a geometry with no markers.
    #[must_use]
    pub const fn plain(geometry: Geometry) -> Self {
        Self {
            geometry,
            interpolated: false,
            omitted: false,
        }
    }
}

/// A parent feature in a result's context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    /// Typed id, `<type>.<id>`.
    pub id: String,
    /// Display text.
    pub text: String,
    /// Language of `text`, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// `text_<lang>` and `language_<lang>` per requested language.
    #[serde(flatten)]
    pub localized: BTreeMap<String, String>,
    /// Non-internal feature properties.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

/// A single geocoding result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    /// Typed id, `<type>.<id>`.
    pub id: String,
    /// Always `Feature`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Types this feature represents.
    pub place_type: Vec<String>,
    /// Relevance in `[0, 1]`.
    pub relevance: f64,
    /// Non-internal feature properties.
    pub properties: Map<String, Value>,
    /// Display text.
    pub text: String,
    /// Language of `text`, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Formatted place name.
    pub place_name: String,
    /// `text_<lang>`, `language_<lang>` and `place_name_<lang>` for every
    /// requested language.
    #[serde(flatten)]
    pub localized: BTreeMap<String, String>,
    /// The synonym that matched, when it is not the display text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching_text: Option<String>,
    /// Language of `matching_text`, when it differs from `language`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching_language: Option<String>,
    /// `place_name` rebuilt around `matching_text`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching_place_name: Option<String>,
    /// `[w, s, e, n]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    /// `[lon, lat]`.
    pub center: [f64; 2],
    /// Feature geometry.
    pub geometry: OutputGeometry,
    /// Matched house number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Parent features, most specific first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<ContextEntry>>,
    /// Routable points, when routing was requested on a routable index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routable_points: Option<Value>,
}

/// Timing and count for one pipeline stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageStats {
    /// Wall time in milliseconds.
    pub time: u128,
    /// Number of items the stage produced.
    pub count: usize,
}

/// Per-stage statistics, returned when `stats` is requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Phrase matching.
    pub phrasematch: StageStats,
    /// Stack assembly.
    pub spatialmatch: StageStats,
    /// Verification and context loading.
    pub verifymatch: StageStats,
    /// Output formatting.
    pub feature: StageStats,
}

/// Top-level geocoding response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureCollection {
    /// Always `FeatureCollection`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// The query as understood.
    pub query: QueryEcho,
    /// Ranked results.
    pub features: Vec<Feature>,
    /// Stage statistics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
    /// Ids of the indexes that produced results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexes: Option<Vec<String>>,
    /// Index ids of stacks that produced no spatial matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waste: Option<Vec<Vec<String>>>,
    /// Phrasematch diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<Value>,
}

impl FeatureCollection {
    /// An empty collection for `query`.
    #[must_use]
    pub const fn empty(query: QueryEcho) -> Self {
        Self {
            kind: "FeatureCollection",
            query,
            features: Vec::new(),
            stats: None,
            indexes: None,
            waste: None,
            debug: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geojson::Value as GeoValue;
    use serde_json::json;

    #[test]
    fn empty_collection_serializes_minimally() {
        let fc = FeatureCollection::empty(QueryEcho::Tokens(vec!["main".into()]));
        assert_eq!(
            serde_json::to_value(&fc).unwrap(),
            json!({ "type": "FeatureCollection", "query": ["main"], "features": [] })
        );
    }

    #[test]
    fn reverse_query_echo_is_a_point() {
        let fc = FeatureCollection::empty(QueryEcho::Point([1.0, 2.0]));
        assert_eq!(serde_json::to_value(&fc).unwrap()["query"], json!([1.0, 2.0]));
    }

    #[test]
    fn geometry_markers_flatten_into_geometry() {
        let geometry = OutputGeometry {
            geometry: Geometry::new(GeoValue::Point(vec![1.0, 2.0])),
            interpolated: true,
            omitted: false,
        };
        let value = serde_json::to_value(&geometry).unwrap();
        assert_eq!(value["type"], json!("Point"));
        assert_eq!(value["interpolated"], json!(true));
        assert!(value.get("omitted").is_none());
    }

    #[test]
    fn context_entry_flattens_languages_and_properties() {
        let mut localized = BTreeMap::new();
        localized.insert("text_fr".to_string(), "Allemagne".to_string());
        let mut properties = Map::new();
        properties.insert("short_code".to_string(), json!("de"));
        let entry = ContextEntry {
            id: "country.1".into(),
            text: "Germany".into(),
            language: Some("en".into()),
            localized,
            properties,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["text_fr"], json!("Allemagne"));
        assert_eq!(value["short_code"], json!("de"));
        assert_eq!(value["language"], json!("en"));
    }
}
