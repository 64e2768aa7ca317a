//! Bounding boxes in `[min_x, min_y, max_x, max_y]` (`[w, s, e, n]`) order.

use geo::{BoundingRect, CoordsIter};

/// `[w, s, e, n]` in degrees.
pub type BBox = [f64; 4];

/// The whole world.
pub const WORLD: BBox = [-180.0, -90.0, 180.0, 90.0];

/// Whether `point` lies inside `bbox`, edges included.
#[must_use]
pub fn inside(point: [f64; 2], bbox: &BBox) -> bool {
    !(point[0] < bbox[0] || point[0] > bbox[2] || point[1] < bbox[1] || point[1] > bbox[3])
}

/// Whether two boxes share any area or edge.
#[must_use]
pub fn intersect(a: &BBox, b: &BBox) -> bool {
    !(a[0] > b[2] || a[2] < b[0] || a[1] > b[3] || a[3] < b[1])
}

/// Collapses a box that wraps the antimeridian (`w > e`) onto its larger
/// side, clipped at +/-179.9.
#[must_use]
pub fn clip_antimeridian(bbox: BBox) -> BBox {
    let [mut w, s, mut e, n] = bbox;
    if w < e {
        return bbox;
    }
    if w.abs() > e.abs() {
        w = -179.9;
    } else {
        e = 179.9;
    }
    [w, s, e, n]
}

/// Bounding box of a geometry.
#[must_use]
pub fn of_geometry(geometry: &geo::Geometry<f64>) -> Option<BBox> {
    geometry
        .bounding_rect()
        .map(|rect| [rect.min().x, rect.min().y, rect.max().x, rect.max().y])
}

fn extent(coords: impl Iterator<Item = geo::Coord<f64>>) -> Option<BBox> {
    coords.fold(None, |acc: Option<BBox>, c| {
        Some(acc.map_or([c.x, c.y, c.x, c.y], |[w, s, e, n]| {
            [w.min(c.x), s.min(c.y), e.max(c.x), n.max(c.y)]
        }))
    })
}

/// The tighter of the two boxes a geometry spanning both hemispheres can
/// have: straight across the prime meridian or wrapped across the
/// antimeridian (`w > e`).
#[must_use]
pub fn cross_antimeridian(geometry: &geo::Geometry<f64>) -> Option<BBox> {
    let total = of_geometry(geometry)?;
    let east = extent(geometry.coords_iter().filter(|c| c.x >= 0.0));
    let west = extent(geometry.coords_iter().filter(|c| c.x < 0.0));
    let (Some(east), Some(west)) = (east, west) else {
        return Some(total);
    };

    let prime_width = east[2] + west[0].abs();
    let anti_width = (180.0 - east[0]) + (180.0 - west[2].abs());
    if prime_width > anti_width {
        Some([east[0], total[1], west[2], total[3]])
    } else {
        Some([west[0], total[1], east[2], total[3]])
    }
}
