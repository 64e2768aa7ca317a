//! Stored and request-scoped feature shapes.
//!
//! A [`StoredFeature`] is what an index hands back: id, typed properties,
//! and geometry. During a query each loaded feature is wrapped in a
//! [`ContextFeature`] that carries the per-request bookkeeping (ids, scores,
//! matched address number, tie-break distances) in [`FeatureMeta`].

use geojson::{Geometry, Value as GeoValue};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::properties::{FeatureProperties, UNIVERSAL_LANGUAGE};

/// Errors raised while normalizing a stored feature.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// Address data does not line up with the geometry.
    #[error("{0}")]
    AddressGeometry(&'static str),
}

/// A feature as stored in an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFeature {
    /// Numeric feature id, unique within its index.
    #[serde(deserialize_with = "deserialize_id")]
    pub id: u64,
    /// Typed properties.
    #[serde(default)]
    pub properties: FeatureProperties,
    /// Full geometry, if stored.
    #[serde(default)]
    pub geometry: Option<Geometry>,
    /// `[w, s, e, n]` bounding box, if stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(n) => Ok(n),
        RawId::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

impl StoredFeature {
    /// Builds a point feature.
    #[must_use]
    pub fn point(id: u64, properties: FeatureProperties, lon: f64, lat: f64) -> Self {
        Self {
            id,
            properties,
            geometry: Some(Geometry::new(GeoValue::Point(vec![lon, lat]))),
            bbox: None,
        }
    }

    /// Whether the stored geometry is a polygon or multipolygon.
    #[must_use]
    pub fn is_polygon(&self) -> bool {
        matches!(
            self.geometry.as_ref().map(|g| &g.value),
            Some(GeoValue::Polygon(_) | GeoValue::MultiPolygon(_))
        )
    }

    /// Fills index-level defaults and converts address data to its
    /// collection form.
    ///
    /// * Missing `carmen:types` default to the index type.
    /// * Universal-text indexes mirror `carmen:text` as `universal` text.
    /// * Address clusters on a `MultiPoint` become a one-member
    ///   `GeometryCollection`; every non-null cluster must parallel a
    ///   `MultiPoint` of the same length.
    /// * Interpolation ranges on a `LineString`/`MultiLineString` become a
    ///   one-member `GeometryCollection` of `MultiLineString`.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::AddressGeometry`] when address numbers or
    /// ranges do not line up with the geometry.
    pub fn normalize(&mut self, index_type: &str, universal_text: bool) -> Result<(), FeatureError> {
        if self.properties.types.is_empty() {
            self.properties.types.push(index_type.to_string());
        }
        if universal_text {
            self.properties
                .localized_text
                .insert(UNIVERSAL_LANGUAGE.to_string(), self.properties.text.clone());
        }
        self.normalize_address_cluster()?;
        self.normalize_ranges()
    }

    fn normalize_address_cluster(&mut self) -> Result<(), FeatureError> {
        let Some(numbers) = self.properties.address_numbers.as_ref() else {
            return Ok(());
        };
        let Some(geometry) = self.geometry.as_mut() else {
            return Ok(());
        };

        match &geometry.value {
            GeoValue::MultiPoint(_) => {
                let inner = Geometry::new(geometry.value.clone());
                geometry.value = GeoValue::GeometryCollection(vec![inner]);
            }
            GeoValue::GeometryCollection(_) => {}
            _ => {
                return Err(FeatureError::AddressGeometry(
                    "carmen:addressnumber must be MultiPoint or GeometryCollection",
                ));
            }
        }

        let GeoValue::GeometryCollection(members) = &geometry.value else {
            return Ok(());
        };
        if numbers.len() != members.len() {
            return Err(FeatureError::AddressGeometry(
                "carmen:addressnumber array must be equal to geometry.geometries array",
            ));
        }
        for (cluster, member) in numbers.iter().zip(members) {
            let Some(cluster) = cluster.as_ref().filter(|c| !c.is_empty()) else {
                continue;
            };
            let GeoValue::MultiPoint(points) = &member.value else {
                return Err(FeatureError::AddressGeometry(
                    "non-null carmen:addressnumbers must parallel with MultiPoint geometries in GeometryCollection",
                ));
            };
            if points.len() != cluster.len() {
                return Err(FeatureError::AddressGeometry(
                    "carmen:addressnumber[i] array must be equal to geometry.geometries[i] array",
                ));
            }
        }
        Ok(())
    }

    fn normalize_ranges(&mut self) -> Result<(), FeatureError> {
        let Some(ranges) = self.properties.ranges.as_mut() else {
            return Ok(());
        };
        let Some(geometry) = self.geometry.as_mut() else {
            return Ok(());
        };

        match &geometry.value {
            GeoValue::LineString(line) => {
                let inner = Geometry::new(GeoValue::MultiLineString(vec![line.clone()]));
                geometry.value = GeoValue::GeometryCollection(vec![inner]);
            }
            GeoValue::MultiLineString(lines) => {
                let inner = Geometry::new(GeoValue::MultiLineString(lines.clone()));
                geometry.value = GeoValue::GeometryCollection(vec![inner]);
            }
            GeoValue::GeometryCollection(members) => {
                if members
                    .iter()
                    .any(|m| matches!(m.value, GeoValue::LineString(_)))
                {
                    return Err(FeatureError::AddressGeometry(
                        "ITP geometries in a GeometryCollection must be MultiLineStrings",
                    ));
                }
            }
            _ => {
                return Err(FeatureError::AddressGeometry(
                    "ITP results must be a LineString, MultiLineString, or GeometryCollection",
                ));
            }
        }

        if let GeoValue::GeometryCollection(members) = &geometry.value {
            ranges.pad_to(members.len());
        }
        Ok(())
    }
}

/// How a context feature was produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeatureKind {
    /// Built from tile-query attributes only.
    #[default]
    Light,
    /// Loaded in full from the feature store.
    Full,
    /// Synthesized from an `override:<type>` property.
    Override,
}

/// The address number state of a result.
///
/// Address indexes distinguish "no number was queried" (a street result)
/// from "a number was queried but not found" (a street fallback).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AddressMatch {
    /// Not an address result.
    #[default]
    NotApplicable,
    /// An address index result with no queried number.
    Street,
    /// A number was queried but matched no point or range.
    Unmatched,
    /// The matched or interpolated house number.
    Number(String),
}

impl AddressMatch {
    /// The matched house number, if any.
    #[must_use]
    pub fn number(&self) -> Option<&str> {
        match self {
            Self::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Whether this is an address-index result with no number at all.
    #[must_use]
    pub const fn is_street(&self) -> bool {
        matches!(self, Self::Street)
    }
}

/// Request-scoped bookkeeping attached to a loaded feature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMeta {
    /// How the feature was produced.
    pub kind: FeatureKind,
    /// Id of the index the feature came from.
    pub index_id: String,
    /// Ordinal of that index.
    pub idx: usize,
    /// Typed id, `<type>.<id>`.
    pub extid: String,
    /// Request-unique id combining `idx` and the feature id.
    pub tmpid: u64,
    /// Matched address number state.
    pub address: AddressMatch,
    /// Query token position of the matched address number.
    pub address_pos: Option<usize>,
    /// Distance (miles) to the proximity point.
    pub distance: f64,
    /// Whether `distance` is within the zoom-scaled proximity radius.
    pub inside_radius: bool,
    /// Position in verification order.
    pub position: usize,
    /// Relevance of the spatial match the feature came from.
    pub spatialmatch_relev: f64,
    /// Text of each cover in that spatial match.
    pub cover_texts: Vec<String>,
    /// Cover relevance.
    pub relev: f64,
    /// Index zoom.
    pub zoom: u8,
    /// Blended score and distance.
    pub scoredist: f64,
    /// Final relevance.
    pub relevance: f64,
    /// Whether the matched phrase was in the requested language.
    pub matches_language: bool,
    /// Whether the match used prefix (autocomplete) scanning.
    pub prefix: bool,
    /// The query text that matched this feature.
    pub query_text: Option<String>,
    /// Distance from the query point reported by the tile query.
    pub vtquerydist: f64,
    /// Whether the tile geometry was a polygon.
    pub polygon: bool,
    /// Alternate type name used for conflict resolution.
    pub conflict: Option<String>,
    /// Stacks of the originating index.
    pub stack: Vec<String>,
    /// Geometry was interpolated along a range.
    pub interpolated: bool,
    /// Geometry was synthesized from an omitted range endpoint.
    pub omitted: bool,
}

/// A feature taking part in a context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextFeature {
    /// Feature id within its index.
    pub id: u64,
    /// Typed properties.
    pub properties: FeatureProperties,
    /// Geometry, possibly replaced by a resolved address point.
    pub geometry: Option<Geometry>,
    /// Bounding box.
    pub bbox: Option<[f64; 4]>,
    /// Per-request bookkeeping.
    pub meta: FeatureMeta,
}

impl ContextFeature {
    /// Wraps a stored feature with fresh metadata.
    #[must_use]
    pub fn new(feature: StoredFeature, meta: FeatureMeta) -> Self {
        Self {
            id: feature.id,
            properties: feature.properties,
            geometry: feature.geometry,
            bbox: feature.bbox,
            meta,
        }
    }

    /// The type part of the typed id.
    #[must_use]
    pub fn extid_type(&self) -> &str {
        self.meta.extid.split('.').next().unwrap_or("")
    }

    /// Rewrites the typed id to claim `kind`, keeping the feature id.
    pub fn set_extid_type(&mut self, kind: &str) {
        self.meta.extid = format!("{kind}.{}", self.id);
    }

    /// Center from a point geometry, else from `carmen:center`.
    #[must_use]
    pub fn center(&self) -> Option<[f64; 2]> {
        if let Some(GeoValue::Point(coords)) = self.geometry.as_ref().map(|g| &g.value)
            && let [lon, lat, ..] = coords.as_slice()
        {
            return Some([*lon, *lat]);
        }
        self.properties.center
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature(value: serde_json::Value) -> StoredFeature {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn accepts_string_ids() {
        let f = feature(json!({
            "id": "12",
            "type": "Feature",
            "properties": { "carmen:text": "x" },
            "geometry": { "type": "Point", "coordinates": [0, 0] }
        }));
        assert_eq!(f.id, 12);
    }

    #[test]
    fn normalize_fills_types_and_universal_text() {
        let mut f = feature(json!({
            "id": 1,
            "properties": { "carmen:text": "10001" },
            "geometry": { "type": "Point", "coordinates": [0, 0] }
        }));
        f.normalize("postcode", true).unwrap();
        assert_eq!(f.properties.types, vec!["postcode"]);
        assert_eq!(f.properties.text_for("universal"), Some("10001"));
    }

    #[test]
    fn normalize_wraps_multipoint_cluster() {
        let mut f = feature(json!({
            "id": 1,
            "properties": {
                "carmen:text": "fake street",
                "carmen:addressnumber": ["9", "10", "7"]
            },
            "geometry": { "type": "MultiPoint", "coordinates": [[0, 0], [1, 1], [2, 2]] }
        }));
        f.normalize("address", false).unwrap();
        let Some(GeoValue::GeometryCollection(members)) = f.geometry.map(|g| g.value) else {
            panic!("expected a geometry collection");
        };
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn normalize_rejects_mismatched_cluster() {
        let mut f = feature(json!({
            "id": 1,
            "properties": {
                "carmen:text": "fake street",
                "carmen:addressnumber": ["9", "10"]
            },
            "geometry": { "type": "MultiPoint", "coordinates": [[0, 0]] }
        }));
        assert!(f.normalize("address", false).is_err());
    }

    #[test]
    fn normalize_wraps_linestring_ranges() {
        let mut f = feature(json!({
            "id": 1,
            "properties": {
                "carmen:text": "main st",
                "carmen:rangetype": "tiger",
                "carmen:lfromhn": "1",
                "carmen:ltohn": "99"
            },
            "geometry": { "type": "LineString", "coordinates": [[0, 0], [0, 1]] }
        }));
        f.normalize("address", false).unwrap();
        let ranges = f.properties.ranges.as_ref().unwrap();
        assert_eq!(ranges.left_from, vec![vec![Some("1".to_string())]]);
        assert_eq!(ranges.right_from.len(), 1);
        assert!(matches!(
            f.geometry.map(|g| g.value),
            Some(GeoValue::GeometryCollection(_))
        ));
    }

    #[test]
    fn extid_rewrites_type() {
        let stored = StoredFeature::point(7, FeatureProperties::with_text("x"), 1.0, 2.0);
        let mut f = ContextFeature::new(
            stored,
            FeatureMeta {
                extid: "place.7".to_string(),
                ..FeatureMeta::default()
            },
        );
        assert_eq!(f.extid_type(), "place");
        f.set_extid_type("region");
        assert_eq!(f.meta.extid, "region.7");
        assert_eq!(f.center(), Some([1.0, 2.0]));
    }

    #[test]
    fn address_match_accessors() {
        assert_eq!(AddressMatch::Number("9".into()).number(), Some("9"));
        assert!(AddressMatch::Street.is_street());
        assert_eq!(AddressMatch::Unmatched.number(), None);
    }
}
