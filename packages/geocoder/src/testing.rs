//! Fixtures shared by unit tests.

use std::collections::BTreeMap;

use waymark_geocoder_models::{FeatureProperties, StoredFeature};

use crate::Geocoder;
use crate::config::{GeocoderConfig, IndexConfig};
use crate::index::IndexSet;
use crate::memory::MemoryIndex;

/// A point feature with a score of 1.
pub fn feature(id: u64, text: &str, center: [f64; 2]) -> StoredFeature {
    let mut props = FeatureProperties::with_text(text);
    props.center = Some(center);
    props.score = Some(1.0);
    StoredFeature::point(id, props, center[0], center[1])
}

/// A polygon feature covering `[w, s, e, n]`, centered in the middle.
pub fn area(id: u64, text: &str, extent: [f64; 4]) -> StoredFeature {
    let [w, s, e, n] = extent;
    let mut props = FeatureProperties::with_text(text);
    props.center = Some([f64::midpoint(w, e), f64::midpoint(s, n)]);
    props.score = Some(1.0);
    StoredFeature {
        id,
        properties: props,
        geometry: Some(geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
            vec![w, s],
            vec![e, s],
            vec![e, n],
            vec![w, n],
            vec![w, s],
        ]]))),
        bbox: None,
    }
}

fn config_of(indexes: &[(IndexConfig, Vec<StoredFeature>)]) -> GeocoderConfig {
    GeocoderConfig {
        indexes: indexes.iter().map(|(c, _)| c.clone()).collect(),
        ..GeocoderConfig::default()
    }
}

/// Compiles in-memory indexes, in order.
pub fn index_set(indexes: Vec<(IndexConfig, Vec<StoredFeature>)>) -> IndexSet {
    let config = config_of(&indexes);
    let sources = indexes
        .into_iter()
        .map(|(c, features)| {
            MemoryIndex::build(&c, &BTreeMap::new(), features)
                .unwrap()
                .into_source()
        })
        .collect();
    IndexSet::new(&config, sources).unwrap()
}

/// A geocoder over in-memory indexes, in order.
pub fn geocoder(indexes: Vec<(IndexConfig, Vec<StoredFeature>)>) -> Geocoder {
    let config = config_of(&indexes);
    let sources = indexes
        .into_iter()
        .map(|(c, features)| {
            MemoryIndex::build(&c, &BTreeMap::new(), features)
                .unwrap()
                .into_source()
        })
        .collect();
    Geocoder::new(&config, sources).unwrap()
}

/// The bundled demo geocoder.
pub fn demo() -> Geocoder {
    Geocoder::demo().unwrap()
}
