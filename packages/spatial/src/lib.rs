#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial primitives for the waymark geocoder.
//!
//! - [`bbox`]: `[w, s, e, n]` bounding box tests and antimeridian handling
//! - [`mercator`]: web-mercator tile coordinates
//! - [`proximity`]: great-circle distances and the score/distance blend
//! - [`index`]: an R-tree of geometries answering radius queries at a point
//! - [`address_cluster`]: exact and prefix house-number lookup in point clusters
//! - [`address_itp`]: house-number interpolation along address ranges

pub mod address_cluster;
pub mod address_itp;
pub mod bbox;
pub mod index;
pub mod mercator;
pub mod proximity;

pub use bbox::BBox;
pub use mercator::TileCoord;

/// Converts a `GeoJSON` geometry into a `geo` geometry.
///
/// Returns `None` for geometries `geo` cannot represent.
#[must_use]
pub fn to_geo(geometry: &geojson::Geometry) -> Option<geo::Geometry<f64>> {
    geo::Geometry::<f64>::try_from(geometry.clone()).ok()
}

/// Rounds a coordinate to six decimal places.
#[must_use]
pub fn round_coord(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}
