//! Query orchestration.
//!
//! A query is validated, then dispatched on its shape:
//!
//! * `<type>.<id>` looks the feature up directly
//! * `lon,lat` resolves the features around the point
//! * anything else runs phrasematch, spatialmatch, verifymatch and output
//!   formatting
//!
//! Validation never does I/O and its messages are stable.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use serde_json::{Map, Value, json};
use waymark_geocoder_models::constants::{
    DEFAULT_LIMIT, DEFAULT_LIMIT_VERIFY, MAX_FORWARD_LIMIT, MAX_LANGUAGES, MAX_QUERY_CHARS,
    MAX_QUERY_TOKENS, MAX_REVERSE_LIMIT, NEAREST_POINTS_LIMIT,
};
use waymark_geocoder_models::output::{FeatureCollection, QueryEcho, StageStats, Stats};
use waymark_geocoder_models::{
    AddressMatch, ContextFeature, LanguageMode, QueryOptions, ReverseMode, ValidatedOptions,
};
use waymark_text::closest_lang::has_language;
use waymark_text::termops::id_query;
use waymark_text::tokenize::as_reverse;
use waymark_text::tokenize;

use crate::cache::TileCache;
use crate::context::{Context, ContextOptions, Target, context, meta_for, nearest};
use crate::error::GeocodeError;
use crate::format::{FeatureSet, to_features};
use crate::index::IndexSet;
use crate::phrasematch::{PhrasematchResult, phrasematch};
use crate::spatialmatch::spatialmatch;
use crate::verifymatch::verifymatch;

fn check_range(value: f64, limit: f64, message: &str) -> Result<(), GeocodeError> {
    if value.is_finite() && (-limit..=limit).contains(&value) {
        Ok(())
    } else {
        Err(GeocodeError::invalid(message))
    }
}

fn validate_types(indexes: &IndexSet, types: &[String]) -> Result<Vec<String>, GeocodeError> {
    if types.is_empty() {
        return Err(GeocodeError::invalid(
            "options.types must be an array with at least 1 type",
        ));
    }
    let requested: BTreeSet<&str> = types.iter().map(String::as_str).collect();
    let mut kept = BTreeSet::new();
    for kind in types {
        if !indexes.is_known_type(kind) {
            return Err(GeocodeError::invalid(format!(
                "Type \"{kind}\" is not a known type. Must be one of: {}",
                indexes.known_types().join(", ")
            )));
        }
        let implied = kind
            .split_once('.')
            .is_some_and(|(parent, _)| requested.contains(parent));
        if !implied {
            kept.insert(kind.clone());
        }
    }
    Ok(kept.into_iter().collect())
}

fn validate_stacks(indexes: &IndexSet, stacks: &[String]) -> Result<Vec<String>, GeocodeError> {
    if stacks.is_empty() {
        return Err(GeocodeError::invalid(
            "options.stacks must be an array with at least 1 stack",
        ));
    }
    stacks
        .iter()
        .map(|stack| {
            let stack = stack.to_lowercase();
            if indexes.is_known_stack(&stack) {
                Ok(stack)
            } else {
                Err(GeocodeError::invalid(format!(
                    "Stack \"{stack}\" is not a known stack. Must be one of: {}",
                    indexes.known_stacks().join(", ")
                )))
            }
        })
        .collect()
}

fn validate_proximity(proximity: &[f64]) -> Result<[f64; 2], GeocodeError> {
    let &[lon, lat] = proximity else {
        return Err(GeocodeError::invalid(
            "Proximity must be an array in the form [lon, lat]",
        ));
    };
    check_range(lon, 180.0, "Proximity lon value must be a number between -180 and 180")?;
    check_range(lat, 90.0, "Proximity lat value must be a number between -90 and 90")?;
    Ok([lon, lat])
}

fn validate_bbox(bbox: &[f64]) -> Result<[f64; 4], GeocodeError> {
    let &[w, s, e, n] = bbox else {
        return Err(GeocodeError::invalid(
            "BBox is not valid. Must be an array of format [minX, minY, maxX, maxY]",
        ));
    };
    check_range(w, 180.0, "BBox minX value must be a number between -180 and 180")?;
    check_range(s, 90.0, "BBox minY value must be a number between -90 and 90")?;
    check_range(e, 180.0, "BBox maxX value must be a number between -180 and 180")?;
    check_range(n, 90.0, "BBox maxY value must be a number between -90 and 90")?;
    if w > e {
        return Err(GeocodeError::invalid(
            "BBox minX value cannot be greater than maxX value",
        ));
    }
    if s > n {
        return Err(GeocodeError::invalid(
            "BBox minY value cannot be greater than maxY value",
        ));
    }
    Ok([w, s, e, n])
}

fn validate_languages(language: &str) -> Result<Vec<String>, GeocodeError> {
    let languages: Vec<&str> = language.split(',').collect();
    let invalid: Vec<&str> = languages
        .iter()
        .copied()
        .filter(|l| !has_language(l))
        .collect();
    if !invalid.is_empty() {
        return Err(GeocodeError::invalid(format!(
            "'{}' is not a valid language code",
            invalid.join(",")
        )));
    }
    if languages.len() > MAX_LANGUAGES {
        return Err(GeocodeError::invalid(format!(
            "options.language should be a list of no more than {MAX_LANGUAGES} languages"
        )));
    }
    let unique: BTreeSet<&str> = languages.iter().copied().collect();
    if unique.len() != languages.len() {
        return Err(GeocodeError::invalid(
            "options.language should be a list of unique language codes",
        ));
    }
    Ok(languages.into_iter().map(|l| l.replace('-', "_")).collect())
}

/// Validates caller options against the loaded indexes.
///
/// # Errors
///
/// Returns [`GeocodeError::Invalid`] with a stable message for the first
/// option that fails.
pub fn validate(indexes: &IndexSet, raw: &QueryOptions) -> Result<ValidatedOptions, GeocodeError> {
    let types = raw
        .types
        .as_deref()
        .map(|types| validate_types(indexes, types))
        .transpose()?;
    let stacks = raw
        .stacks
        .as_deref()
        .map(|stacks| validate_stacks(indexes, stacks))
        .transpose()?;
    let proximity = raw.proximity.as_deref().map(validate_proximity).transpose()?;
    let languages = raw
        .language
        .as_deref()
        .filter(|l| !l.is_empty())
        .map(validate_languages)
        .transpose()?
        .unwrap_or_default();
    let language_mode = raw
        .language_mode
        .as_deref()
        .map(|mode| {
            LanguageMode::from_str(mode)
                .map_err(|_| GeocodeError::invalid(format!("'{mode}' is not a valid language mode")))
        })
        .transpose()?;
    let bbox = raw.bbox.as_deref().map(validate_bbox).transpose()?;
    let reverse_mode = raw
        .reverse_mode
        .as_deref()
        .map(|mode| {
            ReverseMode::from_str(mode).map_err(|_| {
                GeocodeError::invalid(format!(
                    "{mode} is not a valid reverseMode. Must be one of: score, distance"
                ))
            })
        })
        .transpose()?
        .unwrap_or_default();

    Ok(ValidatedOptions {
        proximity,
        types,
        stacks,
        languages,
        language_mode,
        bbox,
        limit: raw
            .limit
            .filter(|l| *l > 0)
            .map_or(DEFAULT_LIMIT, |l| l.min(MAX_FORWARD_LIMIT)),
        limit_verify: raw
            .limit_verify
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_LIMIT_VERIFY),
        allow_dupes: raw.allow_dupes,
        debug: raw.debug,
        stats: raw.stats,
        indexes: raw.indexes,
        autocomplete: raw.autocomplete.unwrap_or(true),
        fuzzy_match: raw.fuzzy_match.unwrap_or(true),
        reverse_mode,
        routing: raw.routing,
        clip_bbox: raw.clip_bbox,
    })
}

/// Runs one query.
///
/// # Errors
///
/// * [`GeocodeError::Invalid`] if the query or its options are invalid
/// * [`GeocodeError::Source`] if a collaborator fails
/// * [`GeocodeError::Integrity`] if a result is missing required data
/// * [`GeocodeError::Join`] if a worker task fails
pub async fn geocode(
    indexes: &Arc<IndexSet>,
    cache: &TileCache,
    query: &str,
    raw: &QueryOptions,
) -> Result<FeatureCollection, GeocodeError> {
    let chars = query.chars().count();
    if chars > MAX_QUERY_CHARS {
        return Err(GeocodeError::invalid(format!(
            "Query too long - {chars}/{MAX_QUERY_CHARS} characters"
        )));
    }
    let options = validate(indexes, raw)?;

    if let Some((kind, id)) = id_query(query)
        && indexes.is_known_type(kind)
    {
        return id_lookup(indexes, kind, id, &options).await;
    }

    let tokens = tokenize(query).len();
    if tokens > MAX_QUERY_TOKENS {
        return Err(GeocodeError::invalid(format!(
            "Query too long - {tokens}/{MAX_QUERY_TOKENS} tokens"
        )));
    }

    if let Some(point) = as_reverse(query) {
        return reverse(indexes, cache, point, raw.limit, &options).await;
    }
    forward(indexes, cache, query, &options).await
}

async fn id_lookup(
    indexes: &IndexSet,
    kind: &str,
    id: u64,
    options: &ValidatedOptions,
) -> Result<FeatureCollection, GeocodeError> {
    let extid = format!("{kind}.{id}");
    log::debug!("Looking up {extid}");

    let lookups = indexes
        .by_type(kind)
        .iter()
        .filter_map(|idx| indexes.get(*idx))
        .map(|index| async move {
            let stored = index.source.features.get_feature(id).await?;
            Ok::<_, GeocodeError>(stored.map(|stored| {
                let feature = ContextFeature::new(stored, meta_for(index, id));
                Context::new(vec![feature], 1.0, index.ndx)
            }))
        });
    let contexts: Vec<Context> = try_join_all(lookups).await?.into_iter().flatten().collect();

    let lookup_options = ValidatedOptions {
        allow_dupes: true,
        types: None,
        stacks: None,
        ..options.clone()
    };
    let set = to_features(indexes, &contexts, &lookup_options, usize::MAX)?;
    let mut collection = FeatureCollection::empty(QueryEcho::Tokens(vec![extid]));
    collection.features = set.features;
    if options.indexes {
        collection.indexes = Some(set.indexes);
    }
    Ok(collection)
}

/// Highest index ordinal (exclusive) serving one of the requested parent
/// types, or every index.
fn reverse_maxidx(indexes: &IndexSet, options: &ValidatedOptions) -> usize {
    let Some(types) = &options.types else {
        return indexes.len();
    };
    types
        .iter()
        .map(|t| t.split('.').next().unwrap_or(t))
        .flat_map(|parent| indexes.by_type(parent).iter().copied())
        .map(|idx| idx + 1)
        .max()
        .unwrap_or(0)
}

async fn reverse(
    indexes: &IndexSet,
    cache: &TileCache,
    point: [f64; 2],
    limit: Option<usize>,
    options: &ValidatedOptions,
) -> Result<FeatureCollection, GeocodeError> {
    let single_type = options.types.as_deref().filter(|t| t.len() == 1);
    let limit = match (limit.filter(|l| *l > 0), single_type) {
        (Some(limit), Some(_)) => Some(limit.min(MAX_REVERSE_LIMIT)),
        (Some(limit), None) if limit > 1 => {
            return Err(GeocodeError::invalid(
                "limit must be combined with a single type parameter when reverse geocoding",
            ));
        }
        (limit, _) => limit,
    };

    let contexts = match (limit, single_type) {
        (Some(limit), Some([kind])) if limit > 1 => {
            reverse_many(indexes, cache, point, kind, options).await?
        }
        _ => reverse_one(indexes, cache, point, options).await?,
    };
    log::debug!("Reverse {point:?}: {} contexts", contexts.len());

    let set = to_features(indexes, &contexts, options, limit.unwrap_or(usize::MAX))?;
    let mut collection = FeatureCollection::empty(QueryEcho::Point(point));
    collection.features = set.features;
    if options.indexes {
        collection.indexes = Some(set.indexes);
    }
    Ok(collection)
}

/// The full context at `point`, split into one result per level.
async fn reverse_one(
    indexes: &IndexSet,
    cache: &TileCache,
    point: [f64; 2],
    options: &ValidatedOptions,
) -> Result<Vec<Context>, GeocodeError> {
    let context_options = ContextOptions {
        full: true,
        maxidx: Some(reverse_maxidx(indexes, options)),
        types: options.types.as_deref(),
        stacks: options.stacks.as_deref(),
        reverse_mode: options.reverse_mode,
        ..ContextOptions::default()
    };
    let mut features = context(indexes, cache, point, &context_options).await?;

    let mut contexts = Vec::with_capacity(features.len());
    while !features.is_empty() {
        let typeindex = indexes.get(features[0].meta.idx).map_or(0, |i| i.ndx);
        contexts.push(Context::new(features.clone(), 1.0, typeindex));
        features.remove(0);
    }
    Ok(contexts)
}

/// Full contexts for the features of `kind` nearest to `point`, one per
/// feature and house number.
async fn reverse_many(
    indexes: &IndexSet,
    cache: &TileCache,
    point: [f64; 2],
    kind: &str,
    options: &ValidatedOptions,
) -> Result<Vec<Context>, GeocodeError> {
    let points = nearest(indexes, cache, point, kind, NEAREST_POINTS_LIMIT).await?;
    let lookups = points.iter().map(|candidate| {
        let context_options = ContextOptions {
            full: true,
            types: options.types.as_deref(),
            stacks: options.stacks.as_deref(),
            target: Some(Target {
                idx: candidate.idx,
                tmpid: candidate.tmpid,
            }),
            ..ContextOptions::default()
        };
        async move { context(indexes, cache, candidate.point, &context_options).await }
    });
    let loaded = try_join_all(lookups).await?;

    let mut seen: BTreeSet<(u64, Option<String>)> = BTreeSet::new();
    let mut contexts = Vec::with_capacity(loaded.len());
    for features in loaded {
        let Some(head) = features.first() else {
            continue;
        };
        let address = match &head.meta.address {
            AddressMatch::Number(n) => Some(n.clone()),
            _ => None,
        };
        if !seen.insert((head.meta.tmpid, address)) {
            continue;
        }
        let typeindex = indexes.get(head.meta.idx).map_or(0, |i| i.ndx);
        contexts.push(Context::new(features, 1.0, typeindex));
    }
    Ok(contexts)
}

fn elapsed(since: Instant) -> u128 {
    since.elapsed().as_millis()
}

async fn forward(
    indexes: &Arc<IndexSet>,
    cache: &TileCache,
    query: &str,
    options: &ValidatedOptions,
) -> Result<FeatureCollection, GeocodeError> {
    let replaced = indexes.global_replacer().replace(query);
    let tokenized = tokenize(&replaced);
    let mut collection = FeatureCollection::empty(QueryEcho::Tokens(tokenized.tokens.clone()));
    let mut stats = Stats::default();

    let allowed_idx: Option<BTreeSet<usize>> = options.types.as_ref().map(|types| {
        types
            .iter()
            .flat_map(|t| indexes.by_type(t).iter().copied())
            .collect()
    });
    let maxidx = allowed_idx
        .as_ref()
        .map_or(indexes.len(), |allowed| allowed.iter().max().map_or(0, |m| m + 1));

    let started = Instant::now();
    let tasks = (0..maxidx).map(|idx| {
        let indexes = indexes.clone();
        let tokenized = tokenized.clone();
        let options = options.clone();
        tokio::task::spawn_blocking(move || {
            indexes
                .get(idx)
                .map(|index| phrasematch(index, &tokenized, &options))
                .transpose()
        })
    });
    let mut results: Vec<PhrasematchResult> = Vec::with_capacity(maxidx);
    for result in try_join_all(tasks).await? {
        if let Some(result) = result? {
            results.push(result);
        }
    }
    stats.phrasematch = StageStats {
        time: elapsed(started),
        count: results.iter().map(|r| r.phrasematches.len()).sum(),
    };

    if options.debug {
        collection.debug = Some(json!({ "phrasematch": phrasematch_debug(indexes, &results) }));
    }
    results.retain(|r| !r.is_empty());

    let started = Instant::now();
    let matched = spatialmatch(
        indexes.clone(),
        tokenized.len(),
        &results,
        options,
        allowed_idx.as_ref(),
    )
    .await?;
    stats.spatialmatch = StageStats {
        time: elapsed(started),
        count: matched.results.len(),
    };
    if !matched.waste.is_empty() {
        collection.waste = Some(
            matched
                .waste
                .iter()
                .map(|idxs| {
                    idxs.iter()
                        .filter_map(|idx| indexes.get(*idx).map(|i| i.config.id.clone()))
                        .collect()
                })
                .collect(),
        );
    }

    let started = Instant::now();
    let mut sets = matched.sets;
    let contexts = verifymatch(
        indexes,
        cache,
        &tokenized.tokens,
        matched.results,
        &mut sets,
        options,
    )
    .await?;
    stats.verifymatch = StageStats {
        time: elapsed(started),
        count: contexts.len(),
    };

    let started = Instant::now();
    let FeatureSet {
        features,
        indexes: used,
    } = to_features(indexes, &contexts, options, options.limit)?;
    stats.feature = StageStats {
        time: elapsed(started),
        count: features.len(),
    };
    log::debug!(
        "Forward {query:?}: {} phrasematch results, {} contexts, {} features",
        results.len(),
        contexts.len(),
        features.len()
    );

    collection.features = features;
    if options.indexes {
        collection.indexes = Some(used);
    }
    if options.stats {
        collection.stats = Some(stats);
    }
    Ok(collection)
}

/// Phrase weights per index id.
fn phrasematch_debug(indexes: &IndexSet, results: &[PhrasematchResult]) -> Value {
    let mut by_index: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
    for result in results {
        let Some(index) = indexes.get(result.idx) else {
            continue;
        };
        let entry = by_index.entry(index.config.id.clone()).or_default();
        for pm in &result.phrasematches {
            entry.insert(pm.subquery.join(" "), json!(pm.weight));
        }
    }
    json!(by_index)
}
