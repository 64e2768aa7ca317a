//! Point contexts.
//!
//! Resolves the features around a point: at most one per index, queried
//! from the index's tile at its native zoom, then stacked into a single
//! list, most specific first, in which no type is claimed twice.

use std::collections::BTreeSet;

use futures::future::try_join_all;
use waymark_geocoder_models::constants::{CONTEXT_QUERY_RADIUS, ITP_PREFERENCE_DISTANCE_KM};
use waymark_geocoder_models::{
    AddressMatch, ContextFeature, FeatureKind, FeatureMeta, ReverseMode, tmpid,
};
use waymark_spatial::mercator::point_to_tile;
use waymark_spatial::proximity::{distance_km, distscore};
use waymark_spatial::{address_cluster, address_itp, bbox};

use crate::cache::TileCache;
use crate::coalesce::Spatialmatch;
use crate::error::GeocodeError;
use crate::index::{Index, IndexSet};
use crate::source::TileHit;

/// A result together with the features containing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    /// Most specific first; the first one is the result itself.
    pub features: Vec<ContextFeature>,
    /// Relevance after context verification.
    pub relevance: f64,
    /// Name ordinal of the result's index.
    pub typeindex: usize,
    /// The spatial match the result came from, for forward results.
    pub spatialmatch: Option<Spatialmatch>,
}

impl Context {
    /// A context with no spatial match, as built for reverse results.
    #[must_use]
    pub const fn new(features: Vec<ContextFeature>, relevance: f64, typeindex: usize) -> Self {
        Self {
            features,
            relevance,
            typeindex,
            spatialmatch: None,
        }
    }

    /// The result feature.
    #[must_use]
    pub fn head(&self) -> Option<&ContextFeature> {
        self.features.first()
    }
}

/// A result feature whose index alone answers for its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Ordinal of the result's index.
    pub idx: usize,
    /// Request-unique id of the result.
    pub tmpid: u64,
}

/// Knobs for [`context`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextOptions<'a> {
    /// Only indexes below this ordinal are queried.
    pub maxidx: Option<usize>,
    /// Type already claimed by the result, never claimed again.
    pub maxtype: Option<&'a str>,
    /// Load full features (with geometry) instead of tile attributes.
    pub full: bool,
    /// Features matched by the forward query, preferred over nearer ones.
    pub matched: Option<&'a BTreeSet<u64>>,
    /// The result feature, when resolving a reverse result's context.
    pub target: Option<Target>,
    /// Type filter applied to the first claimed type of full contexts.
    pub types: Option<&'a [String]>,
    /// Stack filter applied to the first claimed type of full contexts.
    pub stacks: Option<&'a [String]>,
    /// Ranking of candidate features within an index.
    pub reverse_mode: ReverseMode,
}

#[derive(Debug, Clone, Copy)]
enum Matched<'a> {
    Any(Option<&'a BTreeSet<u64>>),
    Exclusive(u64),
}

impl Matched<'_> {
    fn contains(&self, tmpid: u64) -> bool {
        match self {
            Self::Any(set) => set.is_some_and(|s| s.contains(&tmpid)),
            Self::Exclusive(target) => *target == tmpid,
        }
    }
}

/// Bookkeeping shared by every feature loaded from `index`.
#[must_use]
pub fn meta_for(index: &Index, id: u64) -> FeatureMeta {
    FeatureMeta {
        index_id: index.config.id.clone(),
        idx: index.idx,
        extid: format!("{}.{id}", index.kind),
        tmpid: tmpid(index.idx, id),
        stack: index.stacks.clone(),
        conflict: (index.name != index.kind).then(|| index.name.clone()),
        zoom: index.zoom(),
        ..FeatureMeta::default()
    }
}

/// Absolute score bounds of a requested `type.subtype` served by `index`.
fn score_range(index: &Index, types: Option<&[String]>) -> Option<[f64; 2]> {
    let sub = types?.iter().find_map(|wanted| {
        let (parent, sub) = wanted.split_once('.')?;
        (parent == index.kind).then_some(sub)
    })?;
    let [lo, hi] = index.config.scoreranges.get(sub)?;
    let max = index.source.max_score;
    Some([lo * max, hi * max])
}

fn outside_range(score: f64, range: Option<[f64; 2]>) -> bool {
    range.is_some_and(|[lo, hi]| score <= lo || score > hi)
}

/// Tile-query hits of `index` around `point`, nearest first.
async fn tile_hits(
    index: &Index,
    cache: &TileCache,
    point: [f64; 2],
) -> Result<Vec<TileHit>, GeocodeError> {
    let z = index.tile_zoom();
    let tile = point_to_tile(point[0], point[1], z);
    let Some(payload) = cache
        .get_or_fetch((index.idx, z, tile.x, tile.y), index.source.tiles.as_ref())
        .await?
    else {
        return Ok(Vec::new());
    };
    Ok(index
        .source
        .tile_query
        .query(&payload, point, CONTEXT_QUERY_RADIUS)?)
}

/// The features containing `point`, most specific first.
///
/// # Errors
///
/// Returns the first tile, tile query or feature store error.
pub async fn context(
    indexes: &IndexSet,
    cache: &TileCache,
    point: [f64; 2],
    options: &ContextOptions<'_>,
) -> Result<Vec<ContextFeature>, GeocodeError> {
    let maxidx = options.maxidx.unwrap_or(indexes.len()).min(indexes.len());
    let target_kind = options
        .target
        .and_then(|t| indexes.get(t.idx))
        .map(|i| i.kind.as_str());

    let mut lookups = Vec::new();
    for index in indexes.iter().take(maxidx) {
        if !bbox::inside(point, &index.bounds()) {
            continue;
        }
        let matched = match options.target {
            Some(target) if target_kind == Some(index.kind.as_str()) => {
                if index.idx != target.idx {
                    continue;
                }
                Matched::Exclusive(target.tmpid)
            }
            _ => Matched::Any(options.matched),
        };
        let range = if options.full {
            score_range(index, options.types)
        } else {
            None
        };
        lookups.push(context_vector(index, cache, point, options, matched, range));
    }

    let loaded = try_join_all(lookups).await?;
    Ok(stack_features(loaded, options))
}

async fn context_vector(
    index: &Index,
    cache: &TileCache,
    point: [f64; 2],
    options: &ContextOptions<'_>,
    matched: Matched<'_>,
    range: Option<[f64; 2]>,
) -> Result<Option<ContextFeature>, GeocodeError> {
    let mut hits = tile_hits(index, cache, point).await?;
    hits.retain(|h| h.distance <= CONTEXT_QUERY_RADIUS);

    let by_score =
        options.full && options.reverse_mode == ReverseMode::Score && index.config.reverse_mode;
    let chosen = if by_score {
        hits.sort_by(|a, b| {
            distscore(b.distance, b.properties.score_or_zero())
                .total_cmp(&distscore(a.distance, a.properties.score_or_zero()))
        });
        hits.into_iter().next()
    } else {
        pick(hits, index.idx, matched, range)
    };

    let Some(hit) = chosen else {
        return Ok(None);
    };
    if options.full {
        full_feature(index, hit, point).await
    } else {
        Ok(light_feature(index, hit))
    }
}

/// The hit to use for an index: a forward-matched feature, else a matched
/// ghost, else the nearest eligible feature. Equidistant hits resolve to
/// the lowest id.
fn pick(
    hits: Vec<TileHit>,
    idx: usize,
    matched: Matched<'_>,
    range: Option<[f64; 2]>,
) -> Option<TileHit> {
    let mut best: Option<TileHit> = None;
    let mut ghost: Option<TileHit> = None;
    let mut dist = f64::INFINITY;

    for hit in hits {
        if hit.distance > dist || best.as_ref().is_some_and(|b| hit.id > b.id) {
            continue;
        }
        let is_matched = matched.contains(tmpid(idx, hit.id));
        if let Matched::Exclusive(_) = matched {
            if is_matched {
                return Some(hit);
            }
            continue;
        }

        let score = hit.properties.score_or_zero();
        if score < 0.0 {
            if !is_matched {
                continue;
            }
            if ghost.is_none() {
                ghost = Some(hit);
                continue;
            }
        }
        if outside_range(score, range) {
            continue;
        }

        dist = hit.distance;
        if is_matched {
            return Some(hit);
        }
        best = Some(hit);
    }
    ghost.or(best)
}

/// A context feature built from tile attributes alone.
fn light_feature(index: &Index, hit: TileHit) -> Option<ContextFeature> {
    if hit.properties.text.is_empty() {
        return None;
    }
    let mut properties = hit.properties;
    if properties.types.is_empty() {
        properties.types = vec![index.kind.clone()];
    }
    Some(ContextFeature {
        id: hit.id,
        properties,
        geometry: None,
        bbox: None,
        meta: FeatureMeta {
            kind: FeatureKind::Light,
            vtquerydist: hit.distance,
            polygon: hit.polygon,
            ..meta_for(index, hit.id)
        },
    })
}

/// A context feature loaded from the feature store, with its address
/// resolved against `point` when the index holds addresses.
async fn full_feature(
    index: &Index,
    hit: TileHit,
    point: [f64; 2],
) -> Result<Option<ContextFeature>, GeocodeError> {
    let Some(stored) = index.source.features.get_feature(hit.id).await? else {
        log::debug!("Tile hit {} missing from the feature store of {}", hit.id, index.config.id);
        return Ok(None);
    };
    let meta = FeatureMeta {
        kind: FeatureKind::Full,
        vtquerydist: hit.distance,
        polygon: hit.polygon,
        ..meta_for(index, stored.id)
    };
    let mut feature = ContextFeature::new(stored, meta);
    if feature.properties.types.is_empty() {
        feature.properties.types = vec![index.kind.clone()];
    }
    if index.is_address() {
        reverse_address(&mut feature, point);
    }
    Ok(Some(feature))
}

/// Replaces an address feature's geometry with the point nearest `query`,
/// from its cluster or its interpolation ranges.
pub fn reverse_address(feature: &mut ContextFeature, query: [f64; 2]) {
    let geometry = feature.geometry.as_ref();
    let cluster = feature
        .properties
        .has_address_cluster()
        .then(|| address_cluster::reverse(&feature.properties, geometry, query))
        .flatten();
    let itp = feature
        .properties
        .ranges
        .is_some()
        .then(|| address_itp::reverse(&feature.properties, geometry, query))
        .flatten();

    match (cluster, itp) {
        (Some(pt), Some(itp))
            if distance_km(query, itp.point) < distance_km(query, pt.point)
                && distance_km(pt.point, itp.point) > ITP_PREFERENCE_DISTANCE_KM =>
        {
            apply_interpolated(feature, &itp);
        }
        (Some(pt), _) => {
            feature.properties = pt.properties(&feature.properties);
            feature.geometry = Some(pt.geometry());
            feature.properties.center = Some(pt.point);
            feature.bbox = None;
            feature.meta.address = AddressMatch::Number(pt.number);
        }
        (None, Some(itp)) => apply_interpolated(feature, &itp),
        (None, None) => {}
    }
}

fn apply_interpolated(feature: &mut ContextFeature, itp: &address_itp::ReverseItp) {
    feature.geometry = Some(geojson::Geometry::new(geojson::Value::Point(
        itp.point.to_vec(),
    )));
    feature.properties.center = Some(itp.point);
    feature.bbox = None;
    feature.meta.interpolated = true;
    feature.meta.address = itp
        .number
        .map_or(AddressMatch::Street, |n| AddressMatch::Number(n.to_string()));
}

fn nonzero(score: Option<f64>) -> Option<f64> {
    score.filter(|s| *s != 0.0)
}

fn parent_types(types: Option<&[String]>) -> Option<BTreeSet<&str>> {
    types.map(|types| {
        types
            .iter()
            .map(|t| t.split_once('.').map_or(t.as_str(), |(parent, _)| parent))
            .collect()
    })
}

/// Stacks loaded per-index features, most specific first, so that each
/// type (or conflict name) is claimed by one feature.
///
/// A non-polygon feature may displace an earlier claim when it is nearer
/// the query point, or in score mode when the claimant has no score.
#[must_use]
pub fn stack_features(
    loaded: Vec<Option<ContextFeature>>,
    options: &ContextOptions<'_>,
) -> Vec<ContextFeature> {
    let wanted = parent_types(options.types);
    let mut pool: Vec<Option<ContextFeature>> = Vec::new();
    let mut memo: Vec<(String, usize)> = Vec::new();
    let mut first_type = false;

    let lookup = |memo: &[(String, usize)], key: &str| {
        memo.iter().find(|(k, _)| k == key).map(|(_, slot)| *slot)
    };

    for mut feature in loaded.into_iter().rev().flatten() {
        let slot = pool.len();
        let mut claim: Option<(String, String)> = None;

        for kind in feature.properties.types.iter().rev() {
            if options.maxtype == Some(kind.as_str()) {
                continue;
            }
            if options.full && !first_type {
                if let Some(stacks) = options.stacks
                    && !feature.meta.stack.is_empty()
                    && !feature.meta.stack.iter().any(|s| stacks.contains(s))
                {
                    break;
                }
                if wanted.as_ref().is_some_and(|w| !w.contains(kind.as_str())) {
                    continue;
                }
            }
            let conflict = feature.meta.conflict.clone().unwrap_or_else(|| kind.clone());

            match lookup(&memo, kind) {
                None => {
                    first_type = true;
                    claim = Some((kind.clone(), conflict));
                    break;
                }
                Some(current) => {
                    if feature.meta.polygon {
                        continue;
                    }
                    let Some(incumbent) = pool[current].as_ref() else {
                        continue;
                    };
                    if options.reverse_mode == ReverseMode::Score {
                        let (mine, theirs) = (nonzero(feature.properties.score), nonzero(incumbent.properties.score));
                        match (mine, theirs) {
                            (None, Some(_)) => continue,
                            (Some(mine), Some(theirs)) if theirs >= mine => continue,
                            _ => {}
                        }
                    }
                    if feature.meta.vtquerydist >= incumbent.meta.vtquerydist {
                        continue;
                    }
                    if options.full && wanted.as_ref().is_some_and(|w| !w.contains(kind.as_str())) {
                        continue;
                    }
                    memo.retain(|(_, s)| *s != current);
                    claim = Some((kind.clone(), conflict));
                    break;
                }
            }
        }

        let Some((kind, conflict)) = claim else {
            continue;
        };
        feature.set_extid_type(&kind);
        for key in [kind, conflict] {
            match memo.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = slot,
                None => memo.push((key, slot)),
            }
        }
        pool.push(Some(feature));
    }

    let mut stacked = Vec::new();
    for (_, slot) in memo {
        if let Some(feature) = pool[slot].take() {
            stacked.push(feature);
        }
    }
    stacked
}

/// A candidate point for multi-result reverse geocoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoint {
    /// The feature's point nearest the query.
    pub point: [f64; 2],
    /// Meters from the query.
    pub distance: f64,
    /// Ordinal of the feature's index.
    pub idx: usize,
    /// Request-unique id of the feature.
    pub tmpid: u64,
}

/// Up to `limit` features of `kind` nearest `point`, nearest first.
///
/// Ghost features are skipped; a `type.subtype` kind applies the
/// subtype's score range.
///
/// # Errors
///
/// Returns the first tile or tile query error.
pub async fn nearest(
    indexes: &IndexSet,
    cache: &TileCache,
    point: [f64; 2],
    kind: &str,
    limit: usize,
) -> Result<Vec<NearestPoint>, GeocodeError> {
    let (parent, sub) = kind.split_once('.').map_or((kind, None), |(p, s)| (p, Some(s)));

    let lookups = indexes
        .iter()
        .filter(|index| index.kind == parent && bbox::inside(point, &index.bounds()))
        .map(|index| async move {
            let range = sub
                .and_then(|s| index.config.scoreranges.get(s))
                .map(|[lo, hi]| [lo * index.source.max_score, hi * index.source.max_score]);
            let hits = tile_hits(index, cache, point).await?;
            Ok::<_, GeocodeError>(
                hits.into_iter()
                    .filter(|hit| {
                        let score = hit.properties.score_or_zero();
                        score >= 0.0 && !outside_range(score, range)
                    })
                    .map(|hit| NearestPoint {
                        point: hit.point,
                        distance: hit.distance,
                        idx: index.idx,
                        tmpid: tmpid(index.idx, hit.id),
                    })
                    .collect::<Vec<_>>(),
            )
        });

    let mut points: Vec<NearestPoint> = try_join_all(lookups).await?.into_iter().flatten().collect();
    points.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.tmpid.cmp(&b.tmpid))
    });
    points.truncate(limit);
    Ok(points)
}

#[cfg(test)]
mod tests {
    use waymark_geocoder_models::{FeatureProperties, StoredFeature};

    use super::*;
    use crate::config::IndexConfig;
    use crate::testing::{demo, feature, geocoder};

    const HANCOCK: [f64; 2] = [-71.0022, 42.251];

    fn kinds(features: &[ContextFeature]) -> Vec<&str> {
        features.iter().map(ContextFeature::extid_type).collect()
    }

    #[tokio::test]
    async fn stacks_most_specific_first() {
        let geocoder = demo();
        let options = ContextOptions {
            full: true,
            ..ContextOptions::default()
        };
        let features = context(&geocoder.indexes, &geocoder.cache, HANCOCK, &options)
            .await
            .unwrap();

        assert_eq!(kinds(&features), ["poi", "address", "place", "region", "country"]);
        assert_eq!(features[0].properties.display_text(), "Adams Coffee");
        assert_eq!(features[1].meta.address.number(), Some("1415"));
        assert_eq!(features[2].properties.display_text(), "Quincy");
        assert_eq!(features[4].meta.kind, FeatureKind::Full);
    }

    #[tokio::test]
    async fn light_contexts_skip_the_claimed_type_and_maxidx() {
        let geocoder = demo();
        let options = ContextOptions {
            maxidx: Some(3),
            maxtype: Some("place"),
            ..ContextOptions::default()
        };
        let features = context(&geocoder.indexes, &geocoder.cache, HANCOCK, &options)
            .await
            .unwrap();

        assert_eq!(kinds(&features), ["region", "country"]);
        assert!(features.iter().all(|f| f.geometry.is_none()));
        assert!(features.iter().all(|f| f.meta.kind == FeatureKind::Light));
    }

    fn hit(id: u64, distance: f64) -> TileHit {
        TileHit {
            id,
            distance,
            point: [0.0, 0.0],
            polygon: false,
            properties: FeatureProperties::with_text(format!("F{id}")),
        }
    }

    #[test]
    fn forward_matches_are_taken_first() {
        let hits = || vec![hit(5, 0.0), hit(1, 0.0)];
        let unmatched = pick(hits(), 0, Matched::Any(None), None).unwrap();
        assert_eq!(unmatched.id, 1);

        let matched = BTreeSet::from([tmpid(0, 5)]);
        let chosen = pick(hits(), 0, Matched::Any(Some(&matched)), None).unwrap();
        assert_eq!(chosen.id, 5);

        let exclusive = pick(hits(), 0, Matched::Exclusive(tmpid(0, 1)), None).unwrap();
        assert_eq!(exclusive.id, 1);
        assert!(pick(hits(), 0, Matched::Exclusive(tmpid(0, 9)), None).is_none());
    }

    #[test]
    fn score_ranges_filter_candidates() {
        let mut low = hit(1, 0.0);
        low.properties.score = Some(10.0);
        let mut high = hit(2, 20.0);
        high.properties.score = Some(600.0);
        let chosen = pick(vec![low, high], 0, Matched::Any(None), Some([500.0, 1000.0])).unwrap();
        assert_eq!(chosen.id, 2);
    }

    #[tokio::test]
    async fn ghosts_only_surface_when_matched() {
        let mut ghost = feature(2, "Old Town", [0.0, 0.0]);
        ghost.properties.score = Some(-1.0);
        let geocoder = geocoder(vec![(
            IndexConfig::new("place", 12),
            vec![ghost, feature(3, "Newtown", [0.002, 0.0])],
        )]);

        let plain = context(
            &geocoder.indexes,
            &geocoder.cache,
            [0.0, 0.0],
            &ContextOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(plain[0].properties.display_text(), "Newtown");

        let matched = BTreeSet::from([tmpid(0, 2)]);
        let options = ContextOptions {
            matched: Some(&matched),
            ..ContextOptions::default()
        };
        let with_ghost = context(&geocoder.indexes, &geocoder.cache, [0.0, 0.0], &options)
            .await
            .unwrap();
        assert_eq!(with_ghost[0].properties.display_text(), "Old Town");
    }

    #[tokio::test]
    async fn target_is_exclusive_within_its_type() {
        let geocoder = demo();
        let poi = geocoder.indexes.by_name("poi")[0];
        let station = tmpid(poi, 1);
        let options = ContextOptions {
            full: true,
            target: Some(Target { idx: poi, tmpid: station }),
            ..ContextOptions::default()
        };
        let features = context(&geocoder.indexes, &geocoder.cache, HANCOCK, &options)
            .await
            .unwrap();
        assert_eq!(features[0].meta.tmpid, station);
        assert_eq!(features[0].properties.display_text(), "Quincy Center Station");
    }

    fn loaded(
        id: u64,
        kind: &str,
        distance: f64,
        polygon: bool,
        conflict: Option<&str>,
    ) -> Option<ContextFeature> {
        let mut stored: StoredFeature = feature(id, &format!("F{id}"), [0.0, 0.0]);
        stored.properties.types = vec![kind.to_string()];
        Some(ContextFeature::new(
            stored,
            FeatureMeta {
                extid: format!("{kind}.{id}"),
                vtquerydist: distance,
                polygon,
                conflict: conflict.map(ToString::to_string),
                ..FeatureMeta::default()
            },
        ))
    }

    #[test]
    fn only_nearer_points_displace_claims() {
        let stacked = stack_features(
            vec![loaded(1, "place", 0.0, true, None), loaded(2, "place", 10.0, false, None)],
            &ContextOptions::default(),
        );
        assert_eq!(stacked.len(), 1);
        assert_eq!(stacked[0].id, 2);

        let stacked = stack_features(
            vec![loaded(1, "place", 5.0, false, None), loaded(2, "place", 10.0, true, None)],
            &ContextOptions::default(),
        );
        assert_eq!(stacked.len(), 1);
        assert_eq!(stacked[0].id, 1);
    }

    #[test]
    fn polygons_never_displace_a_claim() {
        let stacked = stack_features(
            vec![
                loaded(1, "region", 0.0, true, None),
                loaded(2, "region", 900.0, false, None),
            ],
            &ContextOptions::default(),
        );
        assert_eq!(stacked.iter().map(|f| f.id).collect::<Vec<_>>(), [2]);
    }

    #[test]
    fn conflicts_block_later_features_of_that_type() {
        let locality = |distance| loaded(2, "locality", distance, true, Some("place"));

        let stacked = stack_features(
            vec![loaded(1, "place", 0.0, true, None), locality(0.0)],
            &ContextOptions::default(),
        );
        assert_eq!(kinds(&stacked), ["locality"]);

        let stacked = stack_features(
            vec![loaded(1, "place", 0.0, true, None), loaded(2, "locality", 0.0, true, None)],
            &ContextOptions::default(),
        );
        assert_eq!(kinds(&stacked), ["locality", "place"]);

        // A nearer point takes the slot and drops every claim of the old one.
        let stacked = stack_features(
            vec![loaded(1, "place", 0.0, false, None), locality(50.0)],
            &ContextOptions::default(),
        );
        assert_eq!(kinds(&stacked), ["place"]);
    }

    #[tokio::test]
    async fn score_mode_applies_only_to_opted_in_indexes() {
        let build = |opt_in: bool| {
            let mut config = IndexConfig::new("poi", 14);
            config.reverse_mode = opt_in;
            let mut mall = feature(2, "Big Mall", [10.005, 10.001]);
            mall.properties.score = Some(100.0);
            geocoder(vec![(
                config,
                vec![feature(1, "Corner Shop", [10.0011, 10.001]), mall],
            )])
        };
        let options = ContextOptions {
            full: true,
            reverse_mode: ReverseMode::Score,
            ..ContextOptions::default()
        };
        let point = [10.001, 10.001];

        let opted_in = build(true);
        let features = context(&opted_in.indexes, &opted_in.cache, point, &options)
            .await
            .unwrap();
        assert_eq!(features[0].properties.display_text(), "Big Mall");

        let opted_out = build(false);
        let features = context(&opted_out.indexes, &opted_out.cache, point, &options)
            .await
            .unwrap();
        assert_eq!(features[0].properties.display_text(), "Corner Shop");
    }

    #[tokio::test]
    async fn nearest_orders_by_distance() {
        let geocoder = demo();
        let points = nearest(&geocoder.indexes, &geocoder.cache, HANCOCK, "poi", 5)
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
        assert!(points[0].distance <= points[1].distance);
        let poi = geocoder.indexes.by_name("poi")[0];
        assert_eq!(points[0].tmpid, tmpid(poi, 2));
    }
}
