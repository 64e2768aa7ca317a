//! Output formatting.
//!
//! Turns a verified context into the public [`Feature`]: display text and
//! place name per requested language, the synonym that actually matched,
//! geometry, and the parent features stripped of internal properties.
//!
//! Place names come from the index's format template when it has one.
//! `{type._name}`, `{type._number}` and `{type.<property>}` are filled from
//! the first context feature of `type`; fragments nothing fills are dropped
//! along with the punctuation they leave behind.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use geojson::{Geometry, Value as GeoValue};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use waymark_geocoder_models::output::{ContextEntry, Feature, OutputGeometry};
use waymark_geocoder_models::properties::{CARMEN_PREFIX, first_synonym};
use waymark_geocoder_models::{AddressMatch, ContextFeature, FeatureProperties, ValidatedOptions};
use waymark_spatial::bbox::clip_antimeridian;
use waymark_text::closest_lang::{closest_lang_label, closest_text_label, get_text};
use waymark_text::termops::{IndexReplacers, indexable_text};

use crate::context::Context;
use crate::dedupe::{Candidate, dedupe};
use crate::error::GeocodeError;
use crate::filter::{feature_allowed, feature_matches_language};
use crate::index::{Index, IndexSet};

static TEMPLATE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}.]+)\.([^{}]+)\}").expect("valid regex"));

static TEMPLATE_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}.]+)\.").expect("valid regex"));

static NUMBER_TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]*#+ ").expect("valid regex"));

static SHORT_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d#]+\s*\S{0,2}$").expect("valid regex"));

/// Formatted results and the ids of the indexes behind them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    /// Features, best first.
    pub features: Vec<Feature>,
    /// Ids of every index that contributed a context feature.
    pub indexes: Vec<String>,
}

/// A synonym that matched the query in place of the display text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Matched {
    text: String,
    language: Option<String>,
}

/// Types named by a format template.
#[must_use]
pub fn types_in_format(format: &str) -> BTreeSet<String> {
    TEMPLATE_TYPE
        .captures_iter(format)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Whether a feature can be shown in `language` under strict filtering.
fn shown_in(props: &FeatureProperties, language: Option<&str>, strict: bool) -> bool {
    !strict || language.is_none_or(|lang| closest_text_label(props, lang, true).is_some())
}

/// The template for `language`. A localized template is only used when
/// some context feature has text in that language.
fn format_string<'a>(index: &'a Index, context: &[ContextFeature], language: Option<&str>) -> Option<&'a str> {
    let default = index.config.format_for(None);
    let Some(lang) = language else {
        return default;
    };
    let localized = index.config.format_for(Some(lang));
    if localized == default {
        return default;
    }
    let served = context.iter().any(|f| {
        closest_text_label(&f.properties, lang, false).is_some()
            || f.properties.extra.get("language").and_then(Value::as_str) == Some(lang)
    });
    if served { localized } else { default }
}

fn property_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(true)) => "true".to_string(),
        _ => String::new(),
    }
}

fn clean_place_name(expanded: &str) -> String {
    let cleaned = expanded
        .replace(" , ", ", ")
        .replace("  ", " ")
        .replacen(", -", ",", 1)
        .replace(", ,", "");
    let cleaned = cleaned.strip_prefix(',').unwrap_or(&cleaned).replacen(",,", ",", 1);
    let cleaned = cleaned.trim();
    cleaned.strip_suffix(',').unwrap_or(cleaned).to_string()
}

/// Builds the place name of `context` in `language`.
///
/// With `matched`, features whose synonym matched the query are named by
/// that synonym and the language filter is skipped for untemplated names.
fn place_name(
    context: &[ContextFeature],
    format: Option<&str>,
    language: Option<&str>,
    strict: bool,
    matched: Option<&[Option<Matched>]>,
) -> Result<String, GeocodeError> {
    let matching = |k: usize| {
        matched
            .and_then(|m| m.get(k))
            .and_then(Option::as_ref)
            .map(|m| m.text.as_str())
    };

    let Some(format) = format.filter(|f| !f.trim().is_empty()) else {
        let prefix = context
            .first()
            .and_then(|f| f.meta.address.number())
            .map(|n| format!("{n} "))
            .unwrap_or_default();
        let mut names = Vec::with_capacity(context.len());
        for (k, f) in context.iter().enumerate() {
            if matched.is_none() && !shown_in(&f.properties, language, strict) {
                continue;
            }
            match matching(k) {
                Some(text) => names.push(text.to_string()),
                None => names.push(get_text(language, &f.properties)?.text),
            }
        }
        return Ok(format!("{prefix}{}", names.join(", ")).trim().to_string());
    };

    let mut slots: BTreeMap<&str, (usize, &ContextFeature)> = BTreeMap::new();
    for (k, f) in context.iter().enumerate() {
        if f.properties.text.is_empty() {
            return Err(GeocodeError::integrity("Feature has no carmen:text"));
        }
        if !shown_in(&f.properties, language, strict) {
            continue;
        }
        slots.entry(f.extid_type()).or_insert((k, f));
    }

    let mut failure = None;
    let expanded = TEMPLATE_TOKEN.replace_all(format, |caps: &Captures<'_>| {
        let Some((k, f)) = slots.get(&caps[1]) else {
            return String::new();
        };
        match &caps[2] {
            "_name" => match matching(*k) {
                Some(text) => text.to_string(),
                None => match get_text(language, &f.properties) {
                    Ok(text) => text.text,
                    Err(err) => {
                        failure = Some(err);
                        String::new()
                    }
                },
            },
            "_number" => f
                .meta
                .address
                .number()
                .map(|n| n.split(',').next().unwrap_or_default().to_string())
                .unwrap_or_default(),
            property => property_text(f.properties.extra.get(property)),
        }
    });
    if let Some(err) = failure {
        return Err(err.into());
    }
    Ok(clean_place_name(&expanded))
}

/// The synonym of `feature` its query text matched, when that is not the
/// text it would be displayed with.
fn matching_text(indexes: &IndexSet, feature: &ContextFeature, language: Option<&str>) -> Option<Matched> {
    let query = feature.meta.query_text.as_deref()?.trim();
    let index = indexes.get(feature.meta.idx)?;
    let props = &feature.properties;

    let closest = language.and_then(|lang| closest_text_label(props, lang, false));
    let closest_full = closest.and_then(|label| props.text_for(label)).unwrap_or(props.text.as_str());
    let closest_text = first_synonym(closest_full);
    if feature.meta.matches_language
        && language.is_none_or(|lang| closest == Some(lang))
        && !closest_full.contains(',')
    {
        return None;
    }

    let replacers = IndexReplacers {
        simple: &index.simple_replacer,
        complex: &index.query_replacer,
        global: indexes.global_replacer(),
    };
    let texts = std::iter::once((None, props.text.as_str())).chain(
        props
            .localized_text
            .iter()
            .filter(|(_, text)| !text.is_empty())
            .map(|(label, text)| (Some(label.as_str()), text.as_str())),
    );
    let mut phrases: Vec<(String, Option<&str>, &str)> = Vec::new();
    for (label, text) in texts {
        for synonym in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let Ok(indexable) = indexable_text(
                replacers,
                &FeatureProperties::with_text(synonym),
                &[],
                &BTreeSet::new(),
            ) else {
                continue;
            };
            if let Some(first) = indexable.first() {
                phrases.push((first.tokens.join(" "), label, synonym));
            }
        }
    }

    let mut matches = synonyms_matching(&phrases, query, feature.meta.prefix);
    if matches.is_empty() {
        let bare = NUMBER_TEMPLATE.replace(query, "");
        matches = synonyms_matching(&phrases, &bare, feature.meta.prefix);
    }

    let best = match language {
        Some(lang) => {
            let labels: Vec<&str> = matches.keys().flatten().copied().collect();
            closest_lang_label(lang, &labels, false).map(Some)
        }
        None => matches.contains_key(&None).then_some(None),
    };
    let best = best.or_else(|| {
        if matches.len() == 1 && matches.contains_key(&None) {
            Some(None)
        } else {
            matches.keys().flatten().next().map(|label| Some(*label))
        }
    })?;

    let text = matches.get(&best)?.trim();
    if best.is_none() && index.categories.contains(&text.to_lowercase()) {
        return None;
    }
    if text.is_empty() || text == closest_text {
        return None;
    }
    Some(Matched {
        text: text.to_string(),
        language: best
            .filter(|label| Some(*label) != closest)
            .map(|label| label.replacen('_', "-", 1)),
    })
}

/// First synonym per text label whose indexed phrase matches `query`.
fn synonyms_matching<'p>(
    phrases: &'p [(String, Option<&'p str>, &'p str)],
    query: &str,
    prefix: bool,
) -> BTreeMap<Option<&'p str>, &'p str> {
    let mut matches = BTreeMap::new();
    for (phrase, label, synonym) in phrases {
        let hit = if prefix {
            phrase.starts_with(query)
        } else {
            phrase == query
        };
        if hit {
            matches.entry(*label).or_insert(*synonym);
        }
    }
    matches
}

/// Non-internal properties; internal ones too when debugging.
fn public_properties(props: &FeatureProperties, debug: bool) -> Map<String, Value> {
    let mut map: Map<String, Value> = props.clone().into();
    map.retain(|key, _| key != "id" && (debug || !key.starts_with(CARMEN_PREFIX)));
    map
}

fn requested_languages(options: &ValidatedOptions) -> Vec<Option<&str>> {
    if options.languages.is_empty() {
        vec![None]
    } else {
        options.languages.iter().map(|l| Some(l.as_str())).collect()
    }
}

fn context_entry(feature: &ContextFeature, options: &ValidatedOptions) -> Result<ContextEntry, GeocodeError> {
    let mut entry = ContextEntry {
        id: feature.meta.extid.clone(),
        text: String::new(),
        language: None,
        localized: BTreeMap::new(),
        properties: public_properties(&feature.properties, false),
    };
    for (i, language) in requested_languages(options).into_iter().enumerate() {
        let text = get_text(language, &feature.properties)?;
        if let Some(lang) = language {
            entry.localized.insert(format!("text_{lang}"), text.text.clone());
            if let Some(found) = &text.language {
                entry.localized.insert(format!("language_{lang}"), found.clone());
            }
        }
        if i == 0 {
            entry.text = text.text;
            entry.language = text.language;
        }
    }
    Ok(entry)
}

/// Formats one context as a public feature.
///
/// # Errors
///
/// Returns [`GeocodeError::Integrity`] when the result has no center or
/// typed id, or a context feature has no text.
pub fn to_feature(indexes: &IndexSet, context: &Context, options: &ValidatedOptions) -> Result<Feature, GeocodeError> {
    let head = context
        .head()
        .ok_or_else(|| GeocodeError::integrity("Context has no features"))?;
    let center = head
        .center()
        .ok_or_else(|| GeocodeError::integrity("Feature has no carmen:center"))?;
    if head.meta.extid.is_empty() {
        return Err(GeocodeError::integrity("Feature has no carmen:extid"));
    }
    let index = indexes
        .get(head.meta.idx)
        .ok_or_else(|| GeocodeError::integrity(format!("Unknown index {}", head.meta.idx)))?;
    let strict = options.is_strict_language();

    let mut feature = Feature {
        id: head.meta.extid.clone(),
        kind: "Feature",
        place_type: if head.properties.types.is_empty() {
            vec![index.kind.clone()]
        } else {
            head.properties.types.clone()
        },
        relevance: context.relevance,
        properties: public_properties(&head.properties, options.debug),
        text: String::new(),
        language: None,
        place_name: String::new(),
        localized: BTreeMap::new(),
        matching_text: None,
        matching_language: None,
        matching_place_name: None,
        bbox: if options.clip_bbox {
            head.bbox.map(clip_antimeridian)
        } else {
            head.bbox
        },
        center,
        geometry: OutputGeometry {
            geometry: head
                .geometry
                .clone()
                .unwrap_or_else(|| Geometry::new(GeoValue::Point(center.to_vec()))),
            interpolated: head.meta.interpolated,
            omitted: head.meta.omitted,
        },
        address: head.meta.address.number().map(str::to_string),
        context: None,
        routable_points: None,
    };

    for (i, language) in requested_languages(options).into_iter().enumerate() {
        let text = get_text(language, &head.properties)?;
        let format = format_string(index, &context.features, language);
        let name = place_name(&context.features, format, language, strict, None)?;
        if let Some(lang) = language {
            feature.localized.insert(format!("text_{lang}"), text.text.clone());
            if let Some(found) = &text.language {
                feature.localized.insert(format!("language_{lang}"), found.clone());
            }
            feature.localized.insert(format!("place_name_{lang}"), name.clone());
        }
        if i > 0 {
            continue;
        }
        feature.text = text.text;
        feature.language = text.language;
        feature.place_name = name;

        let matched: Vec<Option<Matched>> = context
            .features
            .iter()
            .map(|f| matching_text(indexes, f, language))
            .collect();
        if matched.iter().any(Option::is_some) {
            if let Some(own) = &matched[0] {
                feature.matching_text = Some(own.text.clone());
                feature.matching_language.clone_from(&own.language);
            }
            feature.matching_place_name = Some(place_name(
                &context.features,
                format,
                language,
                strict,
                Some(&matched),
            )?);
        }
    }

    if context.features.len() > 1 {
        let mut entries = Vec::with_capacity(context.features.len() - 1);
        for parent in &context.features[1..] {
            if parent.meta.extid.is_empty() {
                return Err(GeocodeError::integrity("Feature has no carmen:extid"));
            }
            if !feature_matches_language(&parent.properties, options) {
                continue;
            }
            entries.push(context_entry(parent, options)?);
        }
        feature.context = Some(entries);
    }

    if options.routing && index.config.routable {
        feature.routable_points.clone_from(&head.properties.routable_points);
    }
    Ok(feature)
}

/// Whether the matched text is only a house number, perhaps with a unit.
fn is_short_address_query(context: &Context) -> bool {
    context
        .spatialmatch
        .as_ref()
        .and_then(|m| m.covers.first())
        .is_some_and(|cover| SHORT_ADDRESS.is_match(&cover.text))
}

/// Key telling apart addresses that format to the same place name: the
/// matched texts plus the ids of the parents the format names.
fn unique_address_id(indexes: &IndexSet, context: &Context, types: &BTreeSet<String>) -> Option<String> {
    let head = context.head()?;
    let covers = &context.spatialmatch.as_ref()?.covers;
    let mut parts: Vec<(&str, String)> = vec![(
        head.meta.index_id.as_str(),
        covers.iter().map(|c| format!(" {}", c.text)).collect(),
    )];
    for parent in context.features.iter().skip(1) {
        if parts.iter().any(|(id, _)| *id == parent.meta.index_id) {
            continue;
        }
        let kind = indexes.get(parent.meta.idx).map(|i| i.kind.as_str());
        if kind.is_some_and(|k| types.contains(k)) {
            parts.push((parent.meta.index_id.as_str(), parent.meta.extid.clone()));
        }
    }
    let joined: Vec<String> = parts.into_iter().map(|(_, part)| part).collect();
    Some(format!("_{}", joined.join(":")))
}

fn address_id(indexes: &IndexSet, index: &Index, context: &Context) -> Option<String> {
    let head = context.head()?;
    if context.spatialmatch.is_none()
        || head.meta.address == AddressMatch::NotApplicable
        || is_short_address_query(context)
    {
        return None;
    }
    let types = types_in_format(index.config.format_for(None)?);
    unique_address_id(indexes, context, &types)
}

/// Formats `contexts`, dropping disallowed results and, unless dupes are
/// allowed, duplicates, then keeps the best `limit`.
///
/// # Errors
///
/// Returns the first formatting error.
pub fn to_features(
    indexes: &IndexSet,
    contexts: &[Context],
    options: &ValidatedOptions,
    limit: usize,
) -> Result<FeatureSet, GeocodeError> {
    let mut candidates = Vec::with_capacity(contexts.len());
    let mut used: BTreeSet<usize> = BTreeSet::new();
    for context in contexts {
        let Some(head) = context.head() else {
            continue;
        };
        let Some(index) = indexes.get(head.meta.idx) else {
            return Err(GeocodeError::integrity(format!("Unknown index {}", head.meta.idx)));
        };
        if !feature_allowed(index, &head.properties, options) {
            log::trace!("format: {} filtered out", head.meta.extid);
            continue;
        }
        candidates.push(Candidate {
            feature: to_feature(indexes, context, options)?,
            address_id: address_id(indexes, index, context),
        });
        used.extend(context.features.iter().map(|f| f.meta.idx));
    }

    if !options.allow_dupes {
        candidates = dedupe(candidates);
    }
    let features: Vec<Feature> = candidates
        .into_iter()
        .take(limit)
        .map(|c| c.feature)
        .collect();
    let ids = used
        .into_iter()
        .filter_map(|idx| indexes.get(idx).map(|i| i.config.id.clone()))
        .collect();
    Ok(FeatureSet {
        features,
        indexes: ids,
    })
}
