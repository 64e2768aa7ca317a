//! In-memory R-tree of geometries.
//!
//! Answers "which geometries lie within `radius` meters of this point",
//! the lookup a vector-tile point query performs. Polygons containing the
//! point are at distance zero.

use geo::{Contains, Coord, Geometry, LineString, Point, Polygon};
use rstar::{AABB, RTree, RTreeObject};

use crate::proximity::distance_meters;

/// Meters per degree of latitude.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// A geometry stored in the R-tree with its payload.
#[derive(Debug, Clone)]
pub struct IndexedGeometry<T> {
    /// Caller data, typically a feature id.
    pub payload: T,
    /// The geometry itself.
    pub geometry: Geometry<f64>,
    envelope: AABB<[f64; 2]>,
}

impl<T> RTreeObject for IndexedGeometry<T> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// A hit from [`GeometryIndex::query`].
#[derive(Debug, Clone, Copy)]
pub struct Hit<'a, T> {
    /// The stored payload.
    pub payload: &'a T,
    /// The stored geometry.
    pub geometry: &'a Geometry<f64>,
    /// Distance in meters from the query point, zero inside polygons.
    pub distance: f64,
}

/// R-tree over geometries with attached payloads.
#[derive(Debug)]
pub struct GeometryIndex<T> {
    tree: RTree<IndexedGeometry<T>>,
}

impl<T> Default for GeometryIndex<T> {
    fn default() -> Self {
        Self { tree: RTree::new() }
    }
}

impl<T> GeometryIndex<T> {
    /// Bulk-loads an index. Geometries without a bounding box (empty
    /// collections) are skipped.
    #[must_use]
    pub fn build(entries: impl IntoIterator<Item = (T, Geometry<f64>)>) -> Self {
        let entries: Vec<IndexedGeometry<T>> = entries
            .into_iter()
            .filter_map(|(payload, geometry)| {
                let Some([w, s, e, n]) = crate::bbox::of_geometry(&geometry) else {
                    log::warn!("Skipping geometry with no extent");
                    return None;
                };
                Some(IndexedGeometry {
                    payload,
                    geometry,
                    envelope: AABB::from_corners([w, s], [e, n]),
                })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of stored geometries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Every stored entry, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexedGeometry<T>> {
        self.tree.iter()
    }

    /// Geometries within `radius` meters of `point`, nearest first.
    #[must_use]
    pub fn query(&self, point: [f64; 2], radius: f64) -> Vec<Hit<'_, T>> {
        let dlat = radius / METERS_PER_DEGREE;
        let dlon = radius / (METERS_PER_DEGREE * point[1].to_radians().cos().max(1e-6));
        let envelope = AABB::from_corners(
            [point[0] - dlon, point[1] - dlat],
            [point[0] + dlon, point[1] + dlat],
        );

        let mut hits: Vec<Hit<'_, T>> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .filter_map(|entry| {
                let distance = distance_to_geometry(point, &entry.geometry);
                (distance <= radius).then_some(Hit {
                    payload: &entry.payload,
                    geometry: &entry.geometry,
                    distance,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }
}

/// Distance in meters from `point` to the nearest part of `geometry`.
#[must_use]
pub fn distance_to_geometry(point: [f64; 2], geometry: &Geometry<f64>) -> f64 {
    match geometry {
        Geometry::Point(p) => distance_meters(point, [p.x(), p.y()]),
        Geometry::MultiPoint(mp) => mp
            .iter()
            .map(|p| distance_meters(point, [p.x(), p.y()]))
            .fold(f64::INFINITY, f64::min),
        Geometry::Line(line) => distance_to_segment(point, line.start, line.end),
        Geometry::LineString(ls) => distance_to_line_string(point, ls),
        Geometry::MultiLineString(mls) => mls
            .iter()
            .map(|ls| distance_to_line_string(point, ls))
            .fold(f64::INFINITY, f64::min),
        Geometry::Polygon(polygon) => distance_to_polygon(point, polygon),
        Geometry::MultiPolygon(mp) => mp
            .iter()
            .map(|polygon| distance_to_polygon(point, polygon))
            .fold(f64::INFINITY, f64::min),
        Geometry::GeometryCollection(gc) => gc
            .iter()
            .map(|g| distance_to_geometry(point, g))
            .fold(f64::INFINITY, f64::min),
        Geometry::Rect(rect) => distance_to_polygon(point, &rect.to_polygon()),
        Geometry::Triangle(triangle) => distance_to_polygon(point, &triangle.to_polygon()),
    }
}

fn distance_to_polygon(point: [f64; 2], polygon: &Polygon<f64>) -> f64 {
    if polygon.contains(&Point::new(point[0], point[1])) {
        return 0.0;
    }
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| distance_to_line_string(point, ring))
        .fold(f64::INFINITY, f64::min)
}

fn distance_to_line_string(point: [f64; 2], ls: &LineString<f64>) -> f64 {
    match ls.0.as_slice() {
        [] => f64::INFINITY,
        [only] => distance_meters(point, [only.x, only.y]),
        coords => coords
            .windows(2)
            .map(|pair| distance_to_segment(point, pair[0], pair[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Planar projection onto the segment, measured on the sphere.
fn distance_to_segment(point: [f64; 2], start: Coord<f64>, end: Coord<f64>) -> f64 {
    let [x, y] = closest_on_segment(point, [start.x, start.y], [end.x, end.y]);
    distance_meters(point, [x, y])
}

/// Closest point to `point` on the segment `start`..`end`, in degrees.
#[must_use]
pub fn closest_on_segment(point: [f64; 2], start: [f64; 2], end: [f64; 2]) -> [f64; 2] {
    let dx = end[0] - start[0];
    let dy = end[1] - start[1];
    let len2 = dx.mul_add(dx, dy * dy);
    if len2 == 0.0 {
        return start;
    }
    let t = ((point[0] - start[0]).mul_add(dx, (point[1] - start[1]) * dy) / len2).clamp(0.0, 1.0);
    [t.mul_add(dx, start[0]), t.mul_add(dy, start[1])]
}
