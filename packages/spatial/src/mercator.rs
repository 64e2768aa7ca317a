//! Web-mercator tile math for 256px tiles.

use std::f64::consts::PI;

use crate::bbox::BBox;

/// Latitude limit of the web-mercator projection.
pub const MAX_LATITUDE: f64 = 85.051_1;

/// A tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileCoord {
    /// Zoom level.
    pub z: u8,
    /// Column.
    pub x: u32,
    /// Row, counted from the north.
    pub y: u32,
}

impl TileCoord {
    /// Builds a tile address.
    #[must_use]
    pub const fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// The four corners as `[lon, lat]`, NW first.
    #[must_use]
    pub fn corners(&self) -> [[f64; 2]; 4] {
        let (x, y) = (f64::from(self.x), f64::from(self.y));
        [
            tile_to_lon_lat(x, y, self.z),
            tile_to_lon_lat(x, y + 1.0, self.z),
            tile_to_lon_lat(x + 1.0, y, self.z),
            tile_to_lon_lat(x + 1.0, y + 1.0, self.z),
        ]
    }

    /// `[w, s, e, n]` of the tile.
    #[must_use]
    pub fn bbox(&self) -> BBox {
        let (x, y) = (f64::from(self.x), f64::from(self.y));
        let [w, n] = tile_to_lon_lat(x, y, self.z);
        let [e, s] = tile_to_lon_lat(x + 1.0, y + 1.0, self.z);
        [w, s, e, n]
    }
}

/// Number of tiles along one axis at `z`.
#[must_use]
pub fn tile_count(z: u8) -> f64 {
    2f64.powi(i32::from(z))
}

/// Fractional tile position of a point, clamped to the projection limits.
#[must_use]
pub fn lon_lat_to_tile(lon: f64, lat: f64, z: u8) -> [f64; 2] {
    let lon = lon.clamp(-180.0, 180.0);
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let n = tile_count(z);
    let x = (lon + 180.0) / 360.0 * n;
    let sin = lat.to_radians().sin();
    let y = (0.5 - 0.25 * ((1.0 + sin) / (1.0 - sin)).ln() / PI) * n;
    [x, y]
}

/// The tile containing a point.
#[must_use]
pub fn point_to_tile(lon: f64, lat: f64, z: u8) -> TileCoord {
    let [x, y] = lon_lat_to_tile(lon, lat, z);
    let max = tile_count(z) - 1.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |v: f64| v.floor().clamp(0.0, max) as u32;
    TileCoord::new(z, clamp(x), clamp(y))
}

/// `[lon, lat]` of a fractional tile position (the NW corner for whole
/// numbers).
#[must_use]
pub fn tile_to_lon_lat(x: f64, y: f64, z: u8) -> [f64; 2] {
    let n = tile_count(z);
    let lon = x / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();
    [lon, lat]
}

/// Inclusive tile ranges covering a bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    /// Zoom level.
    pub z: u8,
    /// Westmost column.
    pub min_x: u32,
    /// Northmost row.
    pub min_y: u32,
    /// Eastmost column.
    pub max_x: u32,
    /// Southmost row.
    pub max_y: u32,
}

impl TileRange {
    /// Whether a tile lies in the range.
    #[must_use]
    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Tiles at `z` overlapping `bbox`.
#[must_use]
pub fn bbox_to_tile_range(bbox: &BBox, z: u8) -> TileRange {
    let nw = point_to_tile(bbox[0], bbox[3], z);
    let se = point_to_tile(bbox[2], bbox[1], z);
    TileRange {
        z,
        min_x: nw.x,
        min_y: nw.y,
        max_x: se.x,
        max_y: se.y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_tiles() {
        assert_eq!(point_to_tile(0.0, 0.0, 0), TileCoord::new(0, 0, 0));
        assert_eq!(point_to_tile(0.0, 0.0, 1), TileCoord::new(1, 1, 1));
        assert_eq!(point_to_tile(-1.0, 1.0, 1), TileCoord::new(1, 0, 0));
    }

    #[test]
    fn clamps_extremes() {
        assert_eq!(point_to_tile(180.0, -90.0, 2), TileCoord::new(2, 3, 3));
        assert_eq!(point_to_tile(-180.0, 90.0, 2), TileCoord::new(2, 0, 0));
    }

    #[test]
    fn tile_corners_round_trip() {
        let [lon, lat] = tile_to_lon_lat(1.0, 1.0, 1);
        assert!(lon.abs() < 1e-9);
        assert!(lat.abs() < 1e-9);
        let bbox = TileCoord::new(1, 0, 0).bbox();
        assert!((bbox[0] + 180.0).abs() < 1e-9);
        assert!(bbox[1].abs() < 1e-9);
        assert!((bbox[3] - 85.051_128).abs() < 1e-5);
    }

    #[test]
    fn bbox_ranges() {
        let range = bbox_to_tile_range(&[-10.0, -10.0, 10.0, 10.0], 1);
        assert_eq!((range.min_x, range.min_y, range.max_x, range.max_y), (0, 0, 1, 1));
        assert!(range.contains(1, 0));
        assert!(!bbox_to_tile_range(&[1.0, 1.0, 2.0, 2.0], 1).contains(0, 0));
    }
}
