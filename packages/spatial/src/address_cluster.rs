//! House-number lookup in address-point clusters.
//!
//! An address feature stores a `GeometryCollection` whose `MultiPoint`
//! members parallel the `carmen:addressnumber` clusters: point `i` of
//! member `c` is the location of number `i` of cluster `c`.
//!
//! Numbers are compared per address style. A lower match rank is better;
//! once a better rank is seen every worse candidate is dropped.

use std::str::FromStr as _;

use geojson::{Geometry, Value as GeoValue};
use strum_macros::{AsRefStr, Display, EnumString};
use waymark_geocoder_models::FeatureProperties;

use crate::{mercator::TileCoord, proximity, round_coord};

/// How house numbers are written and compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum AddressStyle {
    /// Plain numbers, optionally with a unit suffix (`12a`).
    #[default]
    Standard,
    /// Hyphenated block-lot numbers (`12-34`).
    Queens,
}

impl AddressStyle {
    /// Parses a style label, falling back to [`AddressStyle::Standard`].
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        Self::from_str(label).unwrap_or_default()
    }

    /// Whether results in this style report the stored number instead of
    /// the queried one.
    #[must_use]
    pub const fn reports_stored_number(self) -> bool {
        matches!(self, Self::Queens)
    }

    /// Rank of a stored number against a queried one, `None` when they do
    /// not match. With `prefix`, the stored number only has to start with
    /// the query form.
    #[must_use]
    pub fn rank(self, query: &str, stored: &str, prefix: bool) -> Option<u8> {
        let query = MatchStrings::new(query);
        let stored = MatchStrings::new(stored);
        let matches = |stored: &str, query: &str| {
            if prefix {
                stored.starts_with(query)
            } else {
                stored == query
            }
        };

        match self {
            Self::Standard => {
                if matches(&stored.raw, &query.raw) {
                    Some(0)
                } else if matches(&stored.raw, &query.numeric) {
                    Some(1)
                } else {
                    None
                }
            }
            Self::Queens => {
                if matches(&stored.raw, &query.raw) {
                    Some(0)
                } else if matches(&stored.hyphenated, &query.hyphenated) {
                    Some(1)
                } else if !query.contains_hyphen && matches(&stored.numeric, &query.numeric) {
                    Some(2)
                } else {
                    None
                }
            }
        }
    }
}

struct MatchStrings {
    raw: String,
    numeric: String,
    hyphenated: String,
    contains_hyphen: bool,
}

impl MatchStrings {
    fn new(number: &str) -> Self {
        let raw = number.to_lowercase();
        Self {
            numeric: remove_first(&raw, |c| c.is_ascii_digit()),
            hyphenated: remove_first(&raw, |c| c.is_ascii_digit() || c == '-'),
            contains_hyphen: raw.contains('-'),
            raw,
        }
    }
}

/// Drops the first character rejected by `keep`.
fn remove_first(text: &str, keep: impl Fn(char) -> bool) -> String {
    match text.char_indices().find(|(_, c)| !keep(*c)) {
        Some((pos, c)) => {
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..pos]);
            out.push_str(&text[pos + c.len_utf8()..]);
            out
        }
        None => text.to_string(),
    }
}

/// A matched address point.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMatch {
    /// Collection member the point belongs to.
    pub cluster: usize,
    /// Position of the point within its cluster.
    pub index: usize,
    /// The stored house number.
    pub number: String,
    /// `[lon, lat]` of the point.
    pub point: [f64; 2],
    /// Style the point was matched with.
    pub style: AddressStyle,
    /// Distance in miles to the proximity point, when one was used.
    pub distance: Option<f64>,
}

impl ClusterMatch {
    /// Properties of the matched point: the feature's properties with the
    /// per-point `carmen:addressprops` overrides applied.
    #[must_use]
    pub fn properties(&self, props: &FeatureProperties) -> FeatureProperties {
        let mut props = props.clone();
        props.apply_address_props(self.index);
        props
    }

    /// The number to report: the stored one for styles that rewrite
    /// numbers, else the queried one.
    #[must_use]
    pub fn reported_number<'a>(&'a self, query: &'a str) -> &'a str {
        if self.style.reports_stored_number() {
            &self.number
        } else {
            query
        }
    }

    /// The point as a `GeoJSON` geometry.
    #[must_use]
    pub fn geometry(&self) -> Geometry {
        Geometry::new(GeoValue::Point(self.point.to_vec()))
    }
}

fn collection(geometry: Option<&Geometry>) -> Option<&[Geometry]> {
    match &geometry?.value {
        GeoValue::GeometryCollection(members) => Some(members),
        _ => None,
    }
}

fn position(coords: &[Vec<f64>], index: usize) -> Option<[f64; 2]> {
    match coords.get(index)?.as_slice() {
        [lon, lat, ..] => Some([*lon, *lat]),
        _ => None,
    }
}

/// Walks every numbered point, keeping only those with the best rank seen.
fn scan(
    props: &FeatureProperties,
    geometry: Option<&Geometry>,
    address: &str,
    prefix: bool,
    limit: usize,
) -> Vec<ClusterMatch> {
    let (Some(members), Some(clusters)) = (collection(geometry), props.address_numbers.as_ref())
    else {
        return Vec::new();
    };

    let mut matched: Vec<ClusterMatch> = Vec::new();
    let mut best = u8::MAX;

    for (c, cluster) in clusters.iter().enumerate() {
        let Some(cluster) = cluster else { continue };
        let Some(GeoValue::MultiPoint(coords)) = members.get(c).map(|m| &m.value) else {
            continue;
        };

        for (index, number) in cluster.iter().enumerate() {
            let style = AddressStyle::from_label(props.address_style_at(index));
            let Some(rank) = style.rank(address, number, prefix) else {
                continue;
            };
            if rank < best {
                best = rank;
                matched.clear();
            } else if rank > best {
                continue;
            }
            let Some(point) = position(coords, index) else {
                log::warn!("Address point {index} of cluster {c} has no coordinates");
                continue;
            };
            matched.push(ClusterMatch {
                cluster: c,
                index,
                number: number.clone(),
                point,
                style,
                distance: None,
            });
            if matched.len() >= limit {
                return matched;
            }
        }
    }
    matched
}

/// Points whose number matches `address` exactly (or by numeric form),
/// at most `limit` of them. Coordinates are rounded to six decimals.
#[must_use]
pub fn forward(
    props: &FeatureProperties,
    geometry: Option<&Geometry>,
    address: &str,
    limit: usize,
) -> Vec<ClusterMatch> {
    let mut matched = scan(props, geometry, address, false, limit);
    for m in &mut matched {
        m.point = [round_coord(m.point[0]), round_coord(m.point[1])];
    }
    matched
}

/// Points whose number starts with `address`.
#[must_use]
pub fn forward_prefix(
    props: &FeatureProperties,
    geometry: Option<&Geometry>,
    address: &str,
) -> Vec<ClusterMatch> {
    scan(props, geometry, address, true, usize::MAX)
}

/// A single representative prefix match.
///
/// Candidates are sorted numerically; of the lowest, highest and middle
/// numbers the one nearest `proximity` (bounded by `cover`) wins.
#[must_use]
pub fn forward_prefix_filtered(
    props: &FeatureProperties,
    geometry: Option<&Geometry>,
    address: &str,
    proximity: Option<[f64; 2]>,
    cover: TileCoord,
) -> Option<ClusterMatch> {
    let mut matched = forward_prefix(props, geometry, address);
    if matched.is_empty() {
        return None;
    }
    matched.sort_by_key(|m| leading_number(&m.number).unwrap_or(u64::MAX));

    let last = matched.len() - 1;
    let mut picks = vec![0];
    if last > 0 {
        picks.push(last);
    }
    if matched.len() > 2 {
        picks.push(matched.len() >> 1);
    }

    let mut candidates: Vec<ClusterMatch> = picks
        .into_iter()
        .map(|i| {
            let mut m = matched[i].clone();
            m.distance = Some(proximity::distance_to_cover(proximity, m.point, cover));
            m
        })
        .collect();
    candidates.sort_by(|a, b| {
        a.distance
            .unwrap_or(0.0)
            .total_cmp(&b.distance.unwrap_or(0.0))
    });
    candidates.into_iter().next()
}

fn leading_number(number: &str) -> Option<u64> {
    let end = number
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(number.len(), |(i, _)| i);
    number[..end].parse().ok()
}

/// The address point nearest `query`; `distance` is in kilometers.
#[must_use]
pub fn reverse(
    props: &FeatureProperties,
    geometry: Option<&Geometry>,
    query: [f64; 2],
) -> Option<ClusterMatch> {
    let members = collection(geometry)?;
    let clusters = props.address_numbers.as_ref()?;

    let mut closest: Option<ClusterMatch> = None;
    for (c, cluster) in clusters.iter().enumerate() {
        let Some(cluster) = cluster else { continue };
        let Some(GeoValue::MultiPoint(coords)) = members.get(c).map(|m| &m.value) else {
            continue;
        };
        for (index, number) in cluster.iter().enumerate().rev() {
            let Some(point) = position(coords, index) else {
                continue;
            };
            let distance = proximity::distance_km(query, point);
            if closest
                .as_ref()
                .and_then(|m| m.distance)
                .is_none_or(|d| distance < d)
            {
                closest = Some(ClusterMatch {
                    cluster: c,
                    index,
                    number: number.clone(),
                    point,
                    style: AddressStyle::from_label(props.address_style_at(index)),
                    distance: Some(distance),
                });
            }
        }
    }
    closest
}
