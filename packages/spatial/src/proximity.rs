//! Distances and the score/proximity blend used to rank results.
//!
//! `scoredist` mixes a feature's static importance with how close it is to
//! the requested proximity point. The proximity term falls off
//! logarithmically over a radius that shrinks as the index zoom grows, so
//! a very important feature can outrank a nearby minor one only up to a
//! bounded distance.

use geo::{Distance as _, Haversine, Point};
use waymark_geocoder_models::constants::{
    Z6_PROXIMITY_RADIUS, Z12_PROXIMITY_RADIUS, Z14_PROXIMITY_RADIUS,
};

use crate::mercator::TileCoord;

const KM_PER_MILE: f64 = 1.609_344;

/// Great-circle distance in meters between two `[lon, lat]` points.
#[must_use]
pub fn distance_meters(a: [f64; 2], b: [f64; 2]) -> f64 {
    Haversine.distance(Point::from(a), Point::from(b))
}

/// Great-circle distance in kilometers.
#[must_use]
pub fn distance_km(a: [f64; 2], b: [f64; 2]) -> f64 {
    distance_meters(a, b) / 1000.0
}

/// Great-circle distance in miles.
#[must_use]
pub fn distance_miles(a: [f64; 2], b: [f64; 2]) -> f64 {
    distance_km(a, b) / KM_PER_MILE
}

/// Distance in miles from `proximity` to a feature known to lie partly in
/// `cover`: the distance to its center, bounded by the distance to the
/// furthest corner of the cover tile. Zero without a proximity point.
#[must_use]
pub fn distance_to_cover(proximity: Option<[f64; 2]>, center: [f64; 2], cover: TileCoord) -> f64 {
    let Some(proximity) = proximity else {
        return 0.0;
    };
    let to_center = distance_miles(proximity, center);
    let to_far_corner = cover
        .corners()
        .iter()
        .map(|corner| distance_miles(proximity, *corner))
        .fold(0.0, f64::max);
    to_center.min(to_far_corner)
}

/// Radius of proximity influence in miles for an index zoom.
#[must_use]
pub fn scale_radius(zoom: u8) -> f64 {
    let z = f64::from(zoom);
    if zoom <= 6 {
        Z6_PROXIMITY_RADIUS
    } else if zoom <= 12 {
        Z6_PROXIMITY_RADIUS + (Z12_PROXIMITY_RADIUS - Z6_PROXIMITY_RADIUS) * (z - 6.0) / 6.0
    } else if zoom <= 14 {
        Z12_PROXIMITY_RADIUS + (Z14_PROXIMITY_RADIUS - Z12_PROXIMITY_RADIUS) * (z - 12.0) / 2.0
    } else {
        Z14_PROXIMITY_RADIUS
    }
}

/// Blends score and distance into `0..=1`.
///
/// `min_score`/`max_score` bound the scores of the candidate set; ghosts
/// and flat ranges contribute no score term.
#[must_use]
pub fn scoredist(score: f64, min_score: f64, max_score: f64, dist: f64, zoom: u8) -> f64 {
    let prox = (1.0 - (1.0 + 9.0 * dist / scale_radius(zoom)).log10()).max(0.0);
    let norm_score = if score < 0.0 || max_score <= min_score {
        0.0
    } else {
        ((score - min_score) / (max_score - min_score)).clamp(0.0, 1.0)
    };
    0.75f64.mul_add(prox, 0.25 * norm_score)
}

/// Ranking key combining textual relevance with `scoredist`.
///
/// Address-index results without a resolved number and ghost features
/// are demoted.
#[must_use]
pub fn relevance_score(relev: f64, scoredist: f64, address_missing: bool, ghost: bool) -> f64 {
    let mut value = 0.8f64.mul_add(relev, 0.2 * scoredist);
    if address_missing {
        value *= 0.9;
    }
    if ghost {
        value *= 0.5;
    }
    value
}

/// Reverse-query ranking blend of score and distance in meters.
#[must_use]
pub fn distscore(dist: f64, score: f64) -> f64 {
    round4(score * (1000.0 / dist.max(50.0)))
}

/// Rounds to four decimal places.
#[must_use]
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
