//! Verification of spatial matches.
//!
//! Loads the feature behind each spatial match, resolves queried house
//! numbers against address clusters and interpolation ranges, and scores
//! the result against the proximity point. The best results then get
//! their contexts loaded and are rescored by how well the context explains
//! the query: each context feature that was part of the match contributes
//! its cover relevance, halved when it appears out of order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use futures::future::try_join_all;
use waymark_geocoder_models::constants::{
    ADDRESS_CLUSTER_MATCH_LIMIT, ADDRESS_ORDER_BONUS, DIRECTION_PENALTY, MAX_CONTEXTS_LIMIT,
    MAX_QUERY_TOKENS, STREET_FALLBACK_PENALTY, VERIFYMATCH_MAX_FEATURES_LIMIT,
    VERIFYMATCH_STACK_LIMIT,
};
use waymark_geocoder_models::properties::first_synonym;
use waymark_geocoder_models::{
    AddressMatch, ContextFeature, FeatureKind, FeatureMeta, FeatureProperties, TokenMask,
    ValidatedOptions,
};
use waymark_spatial::address_cluster::{self, ClusterMatch};
use waymark_spatial::address_itp::{self, Interpolated};
use waymark_spatial::bbox;
use waymark_spatial::mercator::TileCoord;
use waymark_spatial::proximity::{distance_to_cover, relevance_score, scale_radius, scoredist};
use waymark_text::closest_lang::closest_text_label;
use waymark_text::termops::mask_address;

use crate::cache::TileCache;
use crate::coalesce::{Cover, Spatialmatch};
use crate::config::AddressOrder;
use crate::context::{Context, ContextOptions, context, meta_for};
use crate::error::GeocodeError;
use crate::filter::{feature_allowed, source_allowed};
use crate::index::{Index, IndexSet};

/// Relevance weight of a context member matched out of query order.
const OUT_OF_ORDER_WEIGHT: f64 = 0.5;

/// Cover bonus when a peer result matched a context override's text.
#[allow(clippy::cast_precision_loss)]
const PEER_OVERRIDE_BONUS: f64 = 1.0 / MAX_QUERY_TOKENS as f64;

/// Share of a verification batch that partial house numbers may take.
const PARTIAL_NUMBER_SHARE: usize = VERIFYMATCH_STACK_LIMIT * 4 / 5;

/// A loaded and scored result feature, with the match it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Verified {
    /// The result feature.
    pub feature: ContextFeature,
    /// Its spatial match.
    pub spatialmatch: Spatialmatch,
}

/// Verifies `spatialmatches` and returns at most `limit_verify` scored
/// contexts, best first.
///
/// `sets` holds the best cover per matched feature; covers of results
/// that fall back to the street are penalized in place.
///
/// # Errors
///
/// Returns the first feature store, tile or tile query error.
pub async fn verifymatch(
    indexes: &IndexSet,
    cache: &TileCache,
    query: &[String],
    spatialmatches: Vec<Spatialmatch>,
    sets: &mut BTreeMap<u64, Cover>,
    options: &ValidatedOptions,
) -> Result<Vec<Context>, GeocodeError> {
    let verified = verify_chunks(indexes, query, spatialmatches, sets, options).await?;
    log::debug!("Verified {} features", verified.len());

    let limit = options.limit_verify.max(1);
    let matched: BTreeSet<u64> = sets.keys().copied().collect();
    let mut remaining = verified.into_iter();
    let mut results: Vec<Context> = Vec::new();
    let mut good = 0;
    loop {
        let batch: Vec<Verified> = remaining.by_ref().take(limit).collect();
        let loaded = load_contexts(indexes, cache, batch, &matched).await?;
        let contexts = verify_contexts(indexes, loaded, sets, options);
        good += contexts
            .iter()
            .filter(|c| c.spatialmatch.as_ref().is_some_and(|s| c.relevance >= s.relev))
            .count();
        results.extend(contexts);

        if remaining.as_slice().is_empty() || good > limit || results.len() >= MAX_CONTEXTS_LIMIT {
            break;
        }
    }

    results.sort_by(sort_context);
    results.truncate(limit);
    Ok(results)
}

/// Verifies features batch by batch until enough are found, the matches
/// run out, or too many features have been loaded.
async fn verify_chunks(
    indexes: &IndexSet,
    query: &[String],
    spatialmatches: Vec<Spatialmatch>,
    sets: &mut BTreeMap<u64, Cover>,
    options: &ValidatedOptions,
) -> Result<Vec<Verified>, GeocodeError> {
    let filtered = options.types.is_some() || options.stacks.is_some() || options.is_strict_language();
    let mut pending = spatialmatches;
    let mut batch = VERIFYMATCH_STACK_LIMIT;
    let mut verified = Vec::new();
    let mut seen = 0;

    loop {
        let (chunk, backfill) = next_chunk(indexes, pending, batch, options);
        let loaded = try_join_all(chunk.iter().map(|sm| load_feature(indexes, sm))).await?;
        seen += loaded.len();

        let mut candidates = Vec::with_capacity(chunk.len());
        for (position, (spatialmatch, feature)) in chunk.into_iter().zip(loaded).enumerate() {
            let Some(feature) = feature else {
                continue;
            };
            if filtered
                && !indexes
                    .get(feature.meta.idx)
                    .is_some_and(|index| feature_allowed(index, &feature.properties, options))
            {
                continue;
            }
            candidates.push((position, spatialmatch, feature));
        }
        verified.extend(verify_features(indexes, query, candidates, sets, options));

        if backfill.is_empty()
            || verified.len() >= VERIFYMATCH_STACK_LIMIT
            || seen >= VERIFYMATCH_MAX_FEATURES_LIMIT
        {
            return Ok(verified);
        }
        batch = VERIFYMATCH_STACK_LIMIT - verified.len();
        pending = backfill;
    }
}

/// Splits off the next batch. Matches from disallowed sources are
/// dropped, and partial house numbers beyond their share wait for a
/// later batch.
fn next_chunk(
    indexes: &IndexSet,
    pending: Vec<Spatialmatch>,
    batch: usize,
    options: &ValidatedOptions,
) -> (Vec<Spatialmatch>, Vec<Spatialmatch>) {
    if pending.len() <= batch {
        return (pending, Vec::new());
    }
    let filtered = options.types.is_some() || options.stacks.is_some();
    let mut chunk = Vec::with_capacity(batch);
    let mut backfill = Vec::new();
    let mut partials = 0;

    let mut rest = pending.into_iter();
    for spatialmatch in rest.by_ref() {
        if filtered
            && !indexes
                .get(spatialmatch.feature_cover().idx)
                .is_some_and(|index| source_allowed(index, options))
        {
            continue;
        }
        if spatialmatch.partial_number {
            partials += 1;
            if partials > PARTIAL_NUMBER_SHARE {
                backfill.push(spatialmatch);
                continue;
            }
        }
        chunk.push(spatialmatch);
        if chunk.len() >= batch {
            break;
        }
    }
    backfill.extend(rest);
    (chunk, backfill)
}

async fn load_feature(
    indexes: &IndexSet,
    spatialmatch: &Spatialmatch,
) -> Result<Option<ContextFeature>, GeocodeError> {
    let cover = spatialmatch.feature_cover();
    let Some(index) = indexes.get(cover.idx) else {
        return Err(GeocodeError::Integrity {
            message: format!("No index at position {}", cover.idx),
        });
    };
    let Some(stored) = index.source.features.get_feature(cover.id).await? else {
        log::debug!("Feature {} of {} is gridded but not stored", cover.id, index.config.id);
        return Ok(None);
    };
    Ok(Some(ContextFeature::new(
        stored,
        FeatureMeta {
            kind: FeatureKind::Full,
            ..meta_for(index, cover.id)
        },
    )))
}

/// Resolves, scores and ranks loaded features. `position` is each
/// feature's place in its batch.
pub fn verify_features(
    indexes: &IndexSet,
    query: &[String],
    candidates: Vec<(usize, Spatialmatch, ContextFeature)>,
    sets: &mut BTreeMap<u64, Cover>,
    options: &ValidatedOptions,
) -> Vec<Verified> {
    let mut result = Vec::new();

    for (position, mut spatialmatch, feature) in candidates {
        let cover = spatialmatch.feature_cover().clone();
        let Some(index) = indexes.get(cover.idx) else {
            continue;
        };
        let feats = if index.is_address() {
            resolve_address(feature, &spatialmatch, query, options)
        } else {
            vec![feature]
        };
        if feats
            .first()
            .is_some_and(|f| f.meta.address == AddressMatch::Unmatched)
        {
            spatialmatch.covers[0].relev *= STREET_FALLBACK_PENALTY;
            if let Some(set) = sets.get_mut(&cover.tmpid) {
                set.relev *= STREET_FALLBACK_PENALTY;
            }
        }
        let relev = spatialmatch.covers[0].relev;
        let tile = TileCoord::new(cover.zoom, cover.x, cover.y);

        for mut feat in feats {
            let Some(center) = feat.center() else {
                continue;
            };
            if options.bbox.is_some_and(|b| !bbox::inside(center, &b)) {
                continue;
            }
            let last_type = feat
                .properties
                .types
                .last()
                .cloned()
                .unwrap_or_else(|| index.kind.clone());
            let distance = if feat.meta.distance > 0.0 {
                feat.meta.distance
            } else {
                distance_to_cover(options.proximity, center, tile)
            };
            let score = feat.properties.score_or_zero();

            feat.meta = FeatureMeta {
                extid: format!("{last_type}.{}", feat.id),
                tmpid: cover.tmpid,
                distance,
                inside_radius: options.proximity.is_some() && distance < scale_radius(cover.zoom),
                position,
                spatialmatch_relev: spatialmatch.relev,
                cover_texts: spatialmatch.covers.iter().map(|c| c.text.clone()).collect(),
                relev,
                zoom: cover.zoom,
                ..feat.meta
            };
            if options.proximity.is_some() {
                feat.meta.scoredist =
                    scoredist(score, indexes.min_score(), indexes.max_score(), distance, cover.zoom);
                feat.meta.relevance = relevance_score(
                    spatialmatch.relev,
                    feat.meta.scoredist,
                    feat.meta.address.is_street(),
                    score < 0.0,
                );
            } else {
                feat.meta.scoredist = score;
            }
            result.push(Verified {
                feature: feat,
                spatialmatch: spatialmatch.clone(),
            });
        }
    }

    result.sort_by(|a, b| sort_feature(&a.feature, &b.feature));

    let mut texts = BTreeSet::new();
    result.retain(|v| {
        let fresh = texts.insert(language_text(&v.feature.properties, options).to_string());
        v.feature.meta.scoredist >= 0.0 || fresh
    });
    result
}

fn language_text<'a>(props: &'a FeatureProperties, options: &ValidatedOptions) -> &'a str {
    options
        .primary_language()
        .and_then(|language| closest_text_label(props, language, false))
        .and_then(|label| props.text_for(label))
        .unwrap_or(props.text.as_str())
}

/// Resolves the house number of an address-index feature.
///
/// Yields one feature per matched address point, the feature itself
/// marked as a street (no number queried) or as unmatched, or nothing
/// when a partial number matches no point.
fn resolve_address(
    mut feature: ContextFeature,
    spatialmatch: &Spatialmatch,
    query: &[String],
    options: &ValidatedOptions,
) -> Vec<ContextFeature> {
    let cover = spatialmatch.feature_cover();
    let has_cluster = feature.properties.has_address_cluster();
    let has_ranges = feature.properties.ranges.is_some();
    if !has_cluster && !has_ranges {
        feature.meta.address = AddressMatch::Street;
        return vec![feature];
    }
    let geometry = feature.geometry.as_ref();

    let mut points = Vec::new();
    if spatialmatch.partial_number {
        let Some(first) = query.first().filter(|_| has_cluster) else {
            return Vec::new();
        };
        let tile = TileCoord::new(cover.zoom, cover.x, cover.y);
        let Some(found) = address_cluster::forward_prefix_filtered(
            &feature.properties,
            geometry,
            first,
            options.proximity,
            tile,
        ) else {
            return Vec::new();
        };
        points.push(cluster_point(&feature, &found, &found.number));
    } else if let Some((number, position)) = mask_address(query, &cover.text, cover.mask) {
        feature.meta.address = AddressMatch::Number(number.clone());
        feature.meta.address_pos = Some(position);
        let geometry = feature.geometry.as_ref();
        if has_cluster {
            points = address_cluster::forward(
                &feature.properties,
                geometry,
                &number,
                ADDRESS_CLUSTER_MATCH_LIMIT,
            )
            .iter()
            .map(|found| cluster_point(&feature, found, found.reported_number(&number)))
            .collect();
        }
        if points.is_empty()
            && has_ranges
            && let Some(itp) = address_itp::forward(&feature.properties, geometry, &number)
        {
            points.push(interpolated_point(&feature, &itp, &number));
        }
    } else {
        feature.meta.address = AddressMatch::Street;
        return vec![feature];
    }

    if points.is_empty() {
        feature.meta.address = AddressMatch::Unmatched;
        return vec![feature];
    }
    points.truncate(ADDRESS_CLUSTER_MATCH_LIMIT);
    points
}

fn cluster_point(feature: &ContextFeature, found: &ClusterMatch, number: &str) -> ContextFeature {
    let mut properties = found.properties(&feature.properties);
    properties.center = Some(found.point);
    ContextFeature {
        id: feature.id,
        properties,
        geometry: Some(found.geometry()),
        bbox: None,
        meta: FeatureMeta {
            address: AddressMatch::Number(number.to_string()),
            distance: found.distance.unwrap_or(0.0),
            ..feature.meta.clone()
        },
    }
}

fn interpolated_point(feature: &ContextFeature, itp: &Interpolated, number: &str) -> ContextFeature {
    let mut properties = feature.properties.clone();
    properties.center = Some(itp.point);
    ContextFeature {
        id: feature.id,
        properties,
        geometry: Some(geojson::Geometry::new(geojson::Value::Point(
            itp.point.to_vec(),
        ))),
        bbox: None,
        meta: FeatureMeta {
            address: AddressMatch::Number(number.to_string()),
            interpolated: true,
            omitted: itp.omitted,
            ..feature.meta.clone()
        },
    }
}

/// Orders verified features: relevance, match relevance, numbered before
/// street results, exact before omitted geometry, scoredist, position.
#[must_use]
pub fn sort_feature(a: &ContextFeature, b: &ContextFeature) -> Ordering {
    let (a, b) = (&a.meta, &b.meta);
    b.relevance
        .total_cmp(&a.relevance)
        .then(b.spatialmatch_relev.total_cmp(&a.spatialmatch_relev))
        .then(a.address.is_street().cmp(&b.address.is_street()))
        .then(a.omitted.cmp(&b.omitted))
        .then(b.scoredist.total_cmp(&a.scoredist))
        .then(a.position.cmp(&b.position))
}

/// Orders scored contexts, best first.
#[must_use]
pub fn sort_context(a: &Context, b: &Context) -> Ordering {
    let by_relevance = b.relevance.total_cmp(&a.relevance);
    let (Some(fa), Some(fb)) = (a.head(), b.head()) else {
        return by_relevance;
    };
    let (ma, mb) = (&fa.meta, &fb.meta);
    let omitted = ma.omitted.cmp(&mb.omitted);

    by_relevance
        .then(mb.relevance.total_cmp(&ma.relevance))
        .then(if ma.inside_radius == mb.inside_radius {
            omitted
        } else {
            Ordering::Equal
        })
        .then(mb.scoredist.total_cmp(&ma.scoredist))
        .then(omitted)
        .then(a.typeindex.cmp(&b.typeindex))
        .then_with(|| {
            if ma.address.number().is_some() && mb.address.number().is_some() {
                ma.address_pos
                    .cmp(&mb.address_pos)
                    .then(ma.interpolated.cmp(&mb.interpolated))
            } else {
                Ordering::Equal
            }
        })
        .then(ma.position.cmp(&mb.position))
        .then(fa.id.cmp(&fb.id))
}

async fn load_contexts(
    indexes: &IndexSet,
    cache: &TileCache,
    batch: Vec<Verified>,
    matched: &BTreeSet<u64>,
) -> Result<Vec<(Verified, Vec<ContextFeature>)>, GeocodeError> {
    let lookups = batch.into_iter().map(|verified| async move {
        let Some(center) = verified.feature.center() else {
            return Ok((verified, Vec::new()));
        };
        let maxidx = indexes
            .get(verified.feature.meta.idx)
            .and_then(|index| indexes.by_name(&index.name).first().copied());
        let maxtype = verified.feature.extid_type().to_string();
        let options = ContextOptions {
            maxidx,
            maxtype: Some(&maxtype),
            matched: Some(matched),
            ..ContextOptions::default()
        };
        let features = context(indexes, cache, center, &options).await?;
        Ok::<_, GeocodeError>((verified, features))
    });
    try_join_all(lookups).await
}

/// What a context needs to know about another result of the same query.
struct Peer {
    kind: String,
    text: String,
    score: f64,
}

/// The tmpid a context feature is matched by; synthetic entries have none.
const fn match_id(feature: &ContextFeature) -> Option<u64> {
    match feature.meta.kind {
        FeatureKind::Override => None,
        FeatureKind::Light | FeatureKind::Full => Some(feature.meta.tmpid),
    }
}

/// Scores each result by its context and sorts them.
pub fn verify_contexts(
    indexes: &IndexSet,
    loaded: Vec<(Verified, Vec<ContextFeature>)>,
    sets: &mut BTreeMap<u64, Cover>,
    options: &ValidatedOptions,
) -> Vec<Context> {
    let peers: BTreeMap<u64, Peer> = loaded
        .iter()
        .map(|(v, _)| {
            let kind = indexes
                .get(v.feature.meta.idx)
                .map(|i| i.kind.clone())
                .unwrap_or_default();
            let peer = Peer {
                kind,
                text: v.feature.properties.text.clone(),
                score: v.feature.properties.score_or_zero(),
            };
            (v.feature.meta.tmpid, peer)
        })
        .collect();

    let mut contexts = Vec::with_capacity(loaded.len());
    for (verified, rest) in loaded {
        let Verified {
            feature: head,
            spatialmatch,
        } = verified;
        let typeindex = indexes.get(head.meta.idx).map_or(0, |i| i.ndx);

        let mut features = Vec::with_capacity(rest.len() + 1);
        features.push(head);
        features.extend(rest);
        apply_overrides(indexes, &mut features, &peers, sets);

        let covers: BTreeMap<u64, &Cover> =
            spatialmatch.covers.iter().map(|c| (c.tmpid, c)).collect();
        for feature in &mut features {
            if let Some(cover) = match_id(feature).and_then(|id| covers.get(&id)) {
                feature.meta.matches_language = cover.matches_language;
                feature.meta.prefix = cover.prefix;
                feature.meta.query_text = Some(cover.text.clone());
            }
        }

        let (strict, _) = verify_context(indexes, &features, &peers, &covers, None);
        let (loose, squishy) = verify_context(indexes, &features, &peers, &covers, Some(&*sets));
        apply_squishy(indexes, &mut features[0], squishy, options);

        let relevance = ((strict.max(loose) * 1e6).round() / 1e6).min(1.0);
        contexts.push(Context {
            features,
            relevance,
            typeindex,
            spatialmatch: Some(spatialmatch),
        });
    }

    contexts.sort_by(sort_context);
    contexts
}

/// Swaps context entries for the result's `override:<type>` texts.
fn apply_overrides(
    indexes: &IndexSet,
    features: &mut [ContextFeature],
    peers: &BTreeMap<u64, Peer>,
    sets: &mut BTreeMap<u64, Cover>,
) {
    let Some((head, rest)) = features.split_first_mut() else {
        return;
    };
    for entry in rest {
        let Some(kind) = indexes.get(entry.meta.idx).map(|i| i.kind.as_str()) else {
            continue;
        };
        let Some((_, text)) = head.properties.overrides().find(|(k, _)| *k == kind) else {
            continue;
        };
        if entry.properties.text == text {
            continue;
        }

        let mut properties = FeatureProperties::with_text(text);
        properties.types = vec![kind.to_string()];
        properties.center = head.properties.center;
        *entry = ContextFeature {
            id: head.id,
            properties,
            geometry: None,
            bbox: None,
            meta: FeatureMeta {
                kind: FeatureKind::Override,
                index_id: entry.meta.index_id.clone(),
                idx: entry.meta.idx,
                extid: format!("{kind}.{}", head.id),
                ..FeatureMeta::default()
            },
        };

        for peer in peers.values() {
            if peer.kind == kind
                && peer.text == text
                && let Some(set) = sets.get_mut(&head.meta.tmpid)
            {
                set.relev = (set.relev + PEER_OVERRIDE_BONUS).min(1.0);
            }
        }
    }
}

/// Relevance of a context given the covers it may claim, and the score
/// the result inherits from peers with alike text.
///
/// Covers are looked up in `strict` (the result's own match) and then in
/// `loose` (every matched feature). Each claimed cover must use tokens
/// no earlier one used; the first two claimed fix the reading direction,
/// and later covers against it count half.
fn verify_context(
    indexes: &IndexSet,
    context: &[ContextFeature],
    peers: &BTreeMap<u64, Peer>,
    strict: &BTreeMap<u64, &Cover>,
    loose: Option<&BTreeMap<u64, Cover>>,
) -> (f64, f64) {
    let Some(head) = context.first() else {
        return (0.0, 0.0);
    };
    let head_index = indexes.get(head.meta.idx);
    let address_order = head_index.map(|i| i.config.address_order);
    let squishy_target = head_index
        .filter(|i| i.config.inherit_score)
        .map(|_| &head.properties);

    let mut usedmask: TokenMask = 0;
    let mut lastmask: Option<TokenMask> = None;
    let mut last_index: Option<&Index> = None;
    let mut direction: Option<AddressOrder> = None;
    let mut relevance = 0.0;
    let mut squishy = 0.0;

    for (c, feature) in context.iter().enumerate() {
        let Some(tmpid) = match_id(feature) else {
            continue;
        };
        let Some((mask, relev)) = strict
            .get(&tmpid)
            .map(|cover| (cover.mask, cover.relev))
            .or_else(|| loose.and_then(|l| l.get(&tmpid)).map(|cover| (cover.mask, cover.relev)))
        else {
            continue;
        };
        let index = indexes.get(feature.meta.idx);
        let ignore_order = last_index.is_some_and(|last| {
            last.config.ignore_order || index.is_some_and(|i| i.config.ignore_order)
        });

        if let Some(target) = squishy_target
            && c > 0
            && index.is_some_and(|i| i.config.grant_score)
            && text_alike(target, &feature.properties)
            && let Some(peer) = peers.get(&tmpid)
        {
            squishy += peer.score.max(0.0);
        }

        if usedmask & mask != 0 {
            continue;
        }
        if direction.is_none() && !ignore_order && c > 0 {
            direction = Some(if lastmask.is_none_or(|last| last < mask) {
                AddressOrder::Ascending
            } else {
                AddressOrder::Descending
            });
        }
        let backy = match (lastmask, direction) {
            (Some(last), Some(AddressOrder::Ascending)) => last > mask,
            (Some(last), Some(AddressOrder::Descending)) => last < mask,
            _ => false,
        };

        usedmask |= mask;
        lastmask = Some(mask);
        last_index = index;
        relevance += if backy && !ignore_order {
            relev * OUT_OF_ORDER_WEIGHT
        } else {
            relev
        };
    }

    if direction.is_some() {
        relevance -= DIRECTION_PENALTY;
        if direction == address_order {
            relevance += ADDRESS_ORDER_BONUS;
        }
    }
    (relevance.max(0.0), squishy)
}

/// Promotes a result by the score inherited from its peers.
fn apply_squishy(indexes: &IndexSet, head: &mut ContextFeature, squishy: f64, options: &ValidatedOptions) {
    if squishy <= 0.0 {
        return;
    }
    if options.proximity.is_some() {
        let own = head.properties.score_or_zero();
        let score = (own + squishy).min(indexes.max_score());
        head.meta.scoredist = scoredist(
            score,
            indexes.min_score(),
            indexes.max_score(),
            head.meta.distance,
            head.meta.zoom,
        );
        head.meta.relevance = relevance_score(
            head.meta.spatialmatch_relev,
            head.meta.scoredist,
            head.meta.address.is_street(),
            own < 0.0,
        );
    } else {
        head.meta.scoredist += squishy;
    }
}

/// Whether any text of `candidate` contains the same-language text of
/// `target`, comparing first synonyms.
#[must_use]
pub fn text_alike(target: &FeatureProperties, candidate: &FeatureProperties) -> bool {
    let alike = |t: &str, c: &str| {
        let (t, c) = (first_synonym(t), first_synonym(c));
        !t.is_empty() && !c.is_empty() && c.contains(t)
    };
    alike(&target.text, &candidate.text)
        || target.localized_text.iter().any(|(label, text)| {
            candidate
                .localized_text
                .get(label)
                .is_some_and(|c| alike(text, c))
        })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use waymark_geocoder_models::{StoredFeature, tmpid};
    use waymark_text::tokenize;

    use super::*;
    use crate::config::IndexConfig;
    use crate::testing::{feature, index_set};

    fn cover(idx: usize, id: u64, mask: TokenMask, relev: f64, text: &str) -> Cover {
        Cover {
            x: 0,
            y: 0,
            relev,
            id,
            idx,
            tmpid: tmpid(idx, id),
            distance: 0.0,
            score: 1.0,
            scoredist: 1.0,
            scorefactor: 1.0,
            matches_language: true,
            prefix: false,
            mask,
            text: text.to_string(),
            zoom: 14,
            cat_match: false,
        }
    }

    fn member(idx: usize, stored: StoredFeature) -> ContextFeature {
        let id = stored.id;
        ContextFeature::new(
            stored,
            FeatureMeta {
                kind: FeatureKind::Full,
                idx,
                tmpid: tmpid(idx, id),
                ..FeatureMeta::default()
            },
        )
    }

    fn hierarchy() -> IndexSet {
        index_set(vec![
            (
                IndexConfig::new("country", 6),
                vec![feature(1, "United States", [-98.0, 39.0])],
            ),
            (
                IndexConfig::new("place", 12),
                vec![feature(1, "Springfield", [-72.5, 43.3])],
            ),
            (
                IndexConfig {
                    address: true,
                    ..IndexConfig::new("address", 14)
                },
                vec![feature(1, "Fake Street", [-72.5, 43.3])],
            ),
        ])
    }

    fn street(numbers: &[&str]) -> StoredFeature {
        let mut stored: StoredFeature = serde_json::from_value(serde_json::json!({
            "type": "Feature",
            "id": 1,
            "properties": {
                "carmen:text": "fake street",
                "carmen:center": [0.0, 0.0],
                "carmen:addressnumber": [numbers],
            },
            "geometry": {
                "type": "MultiPoint",
                "coordinates": [[0.0, 0.0], [0.001, 0.0], [0.002, 0.0]],
            },
        }))
        .unwrap();
        stored.normalize("address", false).unwrap();
        stored
    }

    fn spatialmatch(covers: Vec<Cover>) -> Spatialmatch {
        Spatialmatch {
            relev: covers.iter().map(|c| c.relev).sum(),
            covers,
            partial_number: false,
        }
    }

    #[test]
    fn in_order_contexts_keep_full_relevance() {
        let set = hierarchy();
        let address = cover(2, 1, 0b0111, 0.75, "fake street");
        let place = cover(1, 1, 0b1000, 0.25, "springfield");
        let context = [
            member(2, feature(1, "Fake Street", [0.0, 0.0])),
            member(1, feature(1, "Springfield", [0.0, 0.0])),
        ];
        let strict = BTreeMap::from([(address.tmpid, &address), (place.tmpid, &place)]);

        let (relevance, squishy) = verify_context(&set, &context, &BTreeMap::new(), &strict, None);
        assert!((relevance - 1.0).abs() < 1e-9);
        assert!(squishy.abs() < f64::EPSILON);
    }

    #[test]
    fn reversed_order_loses_the_direction_bonus() {
        let set = hierarchy();
        let address = cover(2, 1, 0b1110, 0.75, "fake street");
        let place = cover(1, 1, 0b0001, 0.25, "springfield");
        let context = [
            member(2, feature(1, "Fake Street", [0.0, 0.0])),
            member(1, feature(1, "Springfield", [0.0, 0.0])),
        ];
        let strict = BTreeMap::from([(address.tmpid, &address), (place.tmpid, &place)]);

        let (relevance, _) = verify_context(&set, &context, &BTreeMap::new(), &strict, None);
        assert!((relevance - 0.99).abs() < 1e-9);
    }

    #[test]
    fn out_of_order_members_count_half() {
        let set = hierarchy();
        let address = cover(2, 1, 0b0011, 0.5, "fake street");
        let place = cover(1, 1, 0b1000, 0.25, "springfield");
        let country = cover(0, 1, 0b0100, 0.25, "usa");
        let context = [
            member(2, feature(1, "Fake Street", [0.0, 0.0])),
            member(1, feature(1, "Springfield", [0.0, 0.0])),
            member(0, feature(1, "United States", [0.0, 0.0])),
        ];
        let strict = BTreeMap::from([
            (address.tmpid, &address),
            (place.tmpid, &place),
            (country.tmpid, &country),
        ]);

        let (relevance, _) = verify_context(&set, &context, &BTreeMap::new(), &strict, None);
        assert!((relevance - 0.875).abs() < 1e-9);
    }

    #[test]
    fn loose_covers_fill_in_for_unmatched_members() {
        let set = hierarchy();
        let address = cover(2, 1, 0b01, 0.5, "fake street");
        let place = cover(1, 1, 0b10, 0.5, "springfield");
        let context = [
            member(2, feature(1, "Fake Street", [0.0, 0.0])),
            member(1, feature(1, "Springfield", [0.0, 0.0])),
        ];
        let strict = BTreeMap::from([(address.tmpid, &address)]);
        let loose = BTreeMap::from([(place.tmpid, place.clone())]);

        let (alone, _) = verify_context(&set, &context, &BTreeMap::new(), &strict, None);
        let (with_loose, _) = verify_context(&set, &context, &BTreeMap::new(), &strict, Some(&loose));
        assert!((alone - 0.5).abs() < 1e-9);
        assert!((with_loose - 1.0).abs() < 1e-9);
    }

    #[test]
    fn queried_numbers_resolve_to_address_points() {
        let set = hierarchy();
        let query = tokenize("9 fake street").tokens;
        let candidates = vec![(
            0,
            spatialmatch(vec![cover(2, 1, 0b111, 1.0, "fake street")]),
            member(2, street(&["9", "10", "7"])),
        )];
        let mut sets = BTreeMap::new();

        let verified = verify_features(&set, &query, candidates, &mut sets, &ValidatedOptions::default());
        assert_eq!(verified.len(), 1);
        let meta = &verified[0].feature.meta;
        assert_eq!(meta.address, AddressMatch::Number("9".into()));
        assert_eq!(meta.address_pos, Some(0));
        assert_eq!(meta.extid, "address.1");
        assert_eq!(verified[0].feature.center(), Some([0.0, 0.0]));
    }

    #[test]
    fn missing_numbers_fall_back_to_the_street() {
        let set = hierarchy();
        let query = tokenize("11 fake street").tokens;
        let fallback = cover(2, 1, 0b111, 1.0, "fake street");
        let candidates = vec![(
            0,
            spatialmatch(vec![fallback.clone()]),
            member(2, street(&["9", "10", "7"])),
        )];
        let mut sets = BTreeMap::from([(fallback.tmpid, fallback)]);

        let verified = verify_features(&set, &query, candidates, &mut sets, &ValidatedOptions::default());
        assert_eq!(verified[0].feature.meta.address, AddressMatch::Unmatched);
        assert!((verified[0].feature.meta.relev - STREET_FALLBACK_PENALTY).abs() < 1e-9);
        assert!((sets[&tmpid(2, 1)].relev - STREET_FALLBACK_PENALTY).abs() < 1e-9);
    }

    #[test]
    fn bbox_drops_features_outside() {
        let set = hierarchy();
        let query = tokenize("springfield").tokens;
        let candidates = vec![(
            0,
            spatialmatch(vec![cover(1, 1, 0b1, 1.0, "springfield")]),
            member(1, feature(1, "Springfield", [-72.5, 43.3])),
        )];
        let options = ValidatedOptions {
            bbox: Some([0.0, 0.0, 1.0, 1.0]),
            ..ValidatedOptions::default()
        };
        let verified = verify_features(&set, &query, candidates, &mut BTreeMap::new(), &options);
        assert!(verified.is_empty());
    }

    #[test]
    fn numbered_results_sort_before_streets() {
        let mut numbered = member(2, feature(1, "Fake Street", [0.0, 0.0]));
        numbered.meta.address = AddressMatch::Number("9".into());
        let mut plain = member(2, feature(2, "Fake Street", [0.0, 0.0]));
        plain.meta.address = AddressMatch::Street;
        plain.meta.scoredist = 10.0;

        assert_eq!(sort_feature(&numbered, &plain), Ordering::Less);
        plain.meta.relevance = 0.5;
        assert_eq!(sort_feature(&numbered, &plain), Ordering::Greater);
    }

    #[test]
    fn contexts_sort_by_relevance_then_type() {
        let head = |idx: usize, id: u64| vec![member(idx, feature(id, "X", [0.0, 0.0]))];
        let mut contexts = vec![
            Context::new(head(1, 1), 0.9, 1),
            Context::new(head(2, 2), 1.0, 2),
            Context::new(head(0, 3), 0.9, 0),
        ];
        contexts.sort_by(sort_context);
        let ids: Vec<u64> = contexts.iter().map(|c| c.features[0].id).collect();
        assert_eq!(ids, [2, 3, 1]);
    }

    #[test]
    fn alike_texts_compare_first_synonyms() {
        let target = FeatureProperties::with_text("Springfield,Sprfld");
        assert!(text_alike(&target, &FeatureProperties::with_text("Springfield Township")));
        assert!(!text_alike(&target, &FeatureProperties::with_text("Shelbyville,Springfield")));
    }
}
