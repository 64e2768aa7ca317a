//! House-number interpolation along address ranges.
//!
//! A range feature stores `MultiLineString` members; line `i` of member `k`
//! carries left/right from/to numbers and a parity (`O`, `E`, `B` or
//! empty) per side. Forward lookups place a number along the line in
//! proportion to where it falls in the range. Reverse lookups do the
//! opposite from the nearest point on the nearest line.

use geojson::{Geometry, Value as GeoValue};
use waymark_geocoder_models::{FeatureProperties, constants::ITP_OMITTED_THRESHOLD};
use waymark_text::termops::parse_semi_number;

use crate::{index::closest_on_segment, proximity::distance_miles, round_coord};

/// Only this range type is understood.
pub const TIGER_RANGE_TYPE: &str = "tiger";

/// One side of the street.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Left of the line's direction of travel.
    Left,
    /// Right of it, or on the line.
    Right,
}

impl Side {
    const fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

/// House-number range of one line.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    /// Position of the line within its `MultiLineString`.
    pub line_index: usize,
    /// Left from-number.
    pub left_from: Option<u64>,
    /// Left to-number.
    pub left_to: Option<u64>,
    /// Right from-number.
    pub right_from: Option<u64>,
    /// Right to-number.
    pub right_to: Option<u64>,
    /// Left parity.
    pub parity_left: String,
    /// Right parity.
    pub parity_right: String,
    /// Line coordinates.
    pub line: Vec<[f64; 2]>,
}

impl Range {
    fn side(&self, side: Side) -> (Option<u64>, Option<u64>, &str) {
        match side {
            Side::Left => (self.left_from, self.left_to, &self.parity_left),
            Side::Right => (self.right_from, self.right_to, &self.parity_right),
        }
    }

    fn has_numbers(&self) -> bool {
        [self.left_from, self.right_from, self.left_to, self.right_to]
            .iter()
            .any(|n| n.is_some_and(|n| n != 0))
    }
}

/// A point placed along a range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolated {
    /// `[lon, lat]`, rounded to six decimals.
    pub point: [f64; 2],
    /// The number fell outside every range and was placed at a nearby
    /// endpoint, or matched a range of the wrong parity.
    pub omitted: bool,
}

/// The result of a reverse lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverseItp {
    /// Nearest point on the nearest line.
    pub point: [f64; 2],
    /// Interpolated house number, when the matched side has data.
    pub number: Option<u64>,
    /// Distance in miles from the query.
    pub distance: f64,
}

fn value_at(values: &[Vec<Option<String>>], member: usize, line: usize) -> Option<u64> {
    values
        .get(member)
        .and_then(|lines| lines.get(line))
        .and_then(Option::as_deref)
        .and_then(parse_semi_number)
}

fn parity_at(values: &[Vec<Option<String>>], member: usize, line: usize) -> String {
    values
        .get(member)
        .and_then(|lines| lines.get(line))
        .and_then(Clone::clone)
        .unwrap_or_default()
}

/// Ranges of collection member `member`, in a stable order.
///
/// Empty unless the feature is a `tiger` range feature and the member is a
/// `MultiLineString`.
#[must_use]
pub fn standardize(props: &FeatureProperties, geometry: Option<&Geometry>, member: usize) -> Vec<Range> {
    let Some(ranges) = props
        .ranges
        .as_ref()
        .filter(|r| r.range_type == TIGER_RANGE_TYPE)
    else {
        return Vec::new();
    };
    let Some(GeoValue::GeometryCollection(members)) = geometry.map(|g| &g.value) else {
        return Vec::new();
    };
    let Some(GeoValue::MultiLineString(lines)) = members.get(member).map(|m| &m.value) else {
        return Vec::new();
    };

    let mut out: Vec<Range> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| Range {
            line_index: i,
            left_from: value_at(&ranges.left_from, member, i),
            left_to: value_at(&ranges.left_to, member, i),
            right_from: value_at(&ranges.right_from, member, i),
            right_to: value_at(&ranges.right_to, member, i),
            parity_left: parity_at(&ranges.parity_left, member, i),
            parity_right: parity_at(&ranges.parity_right, member, i),
            line: line
                .iter()
                .filter_map(|c| match c.as_slice() {
                    [lon, lat, ..] => Some([*lon, *lat]),
                    _ => None,
                })
                .collect(),
        })
        .collect();

    out.sort_by(|a, b| {
        a.left_from
            .cmp(&b.left_from)
            .then(a.right_from.cmp(&b.right_from))
            .then(a.left_to.cmp(&b.left_to))
            .then(a.right_to.cmp(&b.right_to))
            .then(a.line.len().cmp(&b.line.len()))
            .then(a.line_index.cmp(&b.line_index))
    });
    out
}

fn members_len(geometry: Option<&Geometry>) -> usize {
    match geometry.map(|g| &g.value) {
        Some(GeoValue::GeometryCollection(members)) => members.len(),
        _ => 0,
    }
}

fn within(address: f64, from: Option<u64>, to: Option<u64>) -> Option<(f64, f64)> {
    #[allow(clippy::cast_precision_loss)]
    let (from, to) = (from? as f64, to? as f64);
    (address >= from.min(to) && address <= from.max(to)).then_some((from, to))
}

fn parity_allows(parity: &str, even: bool) -> bool {
    match parity {
        "" | "B" => true,
        "E" => even,
        "O" => !even,
        _ => false,
    }
}

/// Places `address` along the feature's ranges.
///
/// A range containing the number with matching parity wins outright.
/// Otherwise the last range containing it regardless of parity is used,
/// then the nearest range endpoint within
/// [`ITP_OMITTED_THRESHOLD`] numbers.
#[must_use]
pub fn forward(props: &FeatureProperties, geometry: Option<&Geometry>, address: &str) -> Option<Interpolated> {
    let number: u64 = strip_first_non_digit(address).parse().ok()?;
    #[allow(clippy::cast_precision_loss)]
    let address = number as f64;
    let even = number % 2 == 0;

    let mut loose: Option<(f64, f64, Vec<[f64; 2]>)> = None;
    let mut nearest: Option<(f64, [f64; 2])> = None;

    for member in 0..members_len(geometry) {
        for range in standardize(props, geometry, member).iter().rev() {
            if !range.has_numbers() {
                continue;
            }
            let left = within(address, range.left_from, range.left_to);
            let right = within(address, range.right_from, range.right_to);

            if let Some((from, to)) = left.filter(|_| parity_allows(&range.parity_left, even)) {
                return Some(set_point(address, from, to, &range.line, false));
            }
            if let Some((from, to)) = right.filter(|_| parity_allows(&range.parity_right, even)) {
                return Some(set_point(address, from, to, &range.line, false));
            }
            if let Some((from, to)) = left.or(right) {
                loose = Some((from, to, range.line.clone()));
                continue;
            }

            let (Some(&first), Some(&last)) = (range.line.first(), range.line.last()) else {
                continue;
            };
            let endpoints = [
                (range.left_from, first),
                (range.left_to, last),
                (range.right_from, first),
                (range.right_to, last),
            ];
            for (hn, point) in endpoints {
                #[allow(clippy::cast_precision_loss)]
                let Some(hn) = hn.map(|n| n as f64) else {
                    continue;
                };
                if nearest.is_some_and(|(best, _)| (address - best).abs() < (address - hn).abs()) {
                    continue;
                }
                nearest = Some((hn, point));
            }
        }
    }

    if let Some((from, to, line)) = loose {
        return Some(set_point(address, from, to, &line, true));
    }
    let (hn, point) = nearest?;
    ((address - hn).abs() <= ITP_OMITTED_THRESHOLD)
        .then(|| set_point(address, hn, hn, &[point, point], true))
}

fn strip_first_non_digit(text: &str) -> String {
    match text.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((pos, c)) => format!("{}{}", &text[..pos], &text[pos + c.len_utf8()..]),
        None => text.to_string(),
    }
}

/// Interpolates `address` between `start` and `end` along `line`, using
/// planar distances in degrees.
#[must_use]
pub fn set_point(address: f64, start: f64, end: f64, line: &[[f64; 2]], omitted: bool) -> Interpolated {
    let mut coords = line.to_vec();
    let (start, end) = if start > end {
        coords.reverse();
        (end, start)
    } else {
        (start, end)
    };

    let point = match coords.as_slice() {
        [] => [0.0, 0.0],
        [only] => *only,
        _ => {
            let part = if (end - start).abs() > 0.0 {
                (address - start) / (end - start)
            } else {
                0.0
            };
            let mut cumulative = Vec::with_capacity(coords.len());
            let mut total = 0.0;
            cumulative.push(0.0);
            for pair in coords.windows(2) {
                total += (pair[0][0] - pair[1][0]).hypot(pair[0][1] - pair[1][1]);
                cumulative.push(total);
            }
            let target = part * total;

            let mut stop = 1;
            while stop < coords.len() - 1 && cumulative[stop] <= target {
                stop += 1;
            }
            let span = cumulative[stop] - cumulative[stop - 1];
            let t = if span > 0.0 {
                (target - cumulative[stop - 1]) / span
            } else {
                1.0
            };
            let (a, b) = (coords[stop - 1], coords[stop]);
            [
                b[0].mul_add(t, a[0] * (1.0 - t)),
                b[1].mul_add(t, a[1] * (1.0 - t)),
            ]
        }
    };

    Interpolated {
        point: [round_coord(point[0]), round_coord(point[1])],
        omitted,
    }
}

/// The point of a line nearest a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestPoint {
    /// `[lon, lat]` on the line.
    pub point: [f64; 2],
    /// Distance in miles from the query.
    pub distance: f64,
    /// Miles along the line from its start to `point`.
    pub travelled: f64,
    /// Index of the segment containing `point`.
    pub segment: usize,
    /// Total line length in miles.
    pub length: f64,
}

/// Finds the point of `line` nearest `query`.
#[must_use]
pub fn closest_point(query: [f64; 2], line: &[[f64; 2]]) -> Option<ClosestPoint> {
    let mut closest: Option<ClosestPoint> = None;
    let mut travelled = 0.0;

    for (segment, pair) in line.windows(2).enumerate() {
        let (start, stop) = (pair[0], pair[1]);
        let segment_length = distance_miles(start, stop);
        let projected = closest_on_segment(query, start, stop);
        let interior = projected != start && projected != stop;

        let mut candidates = vec![(start, travelled), (stop, travelled + segment_length)];
        if interior {
            candidates.push((projected, travelled + distance_miles(start, projected)));
        }
        for (point, along) in candidates {
            let distance = distance_miles(query, point);
            if closest.is_none_or(|c| distance < c.distance) {
                closest = Some(ClosestPoint {
                    point,
                    distance,
                    travelled: along,
                    segment,
                    length: 0.0,
                });
            }
        }
        travelled += segment_length;
    }

    closest.map(|c| ClosestPoint { length: travelled, ..c })
}

/// Twice the signed area of the triangle; positive when `query` is left of
/// `start -> end`.
#[must_use]
pub fn det2d(start: [f64; 2], end: [f64; 2], query: [f64; 2]) -> f64 {
    (end[0] - start[0]).mul_add(query[1] - start[1], -((end[1] - start[1]) * (query[0] - start[0])))
}

/// House number at `closest` on `side` of `range`.
///
/// A side with no parity falls back to the other side once; with `strict`
/// it yields nothing. Results snap to the side's parity.
#[must_use]
pub fn match_side(range: &Range, side: Side, closest: &ClosestPoint, strict: bool) -> Option<u64> {
    let (from, to, parity) = range.side(side);
    if parity.is_empty() {
        return if strict {
            None
        } else {
            match_side(range, side.opposite(), closest, true)
        };
    }

    #[allow(clippy::cast_precision_loss)]
    let (from, to) = (from? as f64, to? as f64);
    let ratio = if closest.length > 0.0 {
        closest.travelled / closest.length
    } else {
        0.0
    };
    let num = (to - from).mul_add(ratio, from);
    let num = match parity {
        "O" => ((num + 1.0) / 2.0).round().mul_add(2.0, -1.0),
        "E" => (num / 2.0).round() * 2.0,
        _ => num.round(),
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let num = num.max(0.0) as u64;
    (num != 0).then_some(num)
}

/// House number and point on the range line nearest `query`.
#[must_use]
pub fn reverse(props: &FeatureProperties, geometry: Option<&Geometry>, query: [f64; 2]) -> Option<ReverseItp> {
    let mut best: Option<(ClosestPoint, Range)> = None;
    for member in 0..members_len(geometry) {
        for range in standardize(props, geometry, member).into_iter().rev() {
            let Some(closest) = closest_point(query, &range.line) else {
                continue;
            };
            if best.as_ref().is_none_or(|(b, _)| closest.distance < b.distance) {
                best = Some((closest, range));
            }
        }
    }

    let (closest, range) = best?;
    let start = range.line[closest.segment];
    let end = range.line[closest.segment + 1];
    let side = if det2d(start, end, query) > 0.0 {
        Side::Left
    } else {
        Side::Right
    };

    Some(ReverseItp {
        point: closest.point,
        number: match_side(&range, side, &closest, false),
        distance: closest.distance,
    })
}
