//! Type, stack and language filters.
//!
//! Sources are filtered before any lookup; features are filtered again
//! once loaded, since a source may serve types or stacks the caller did
//! not ask for.

use waymark_geocoder_models::{FeatureProperties, ValidatedOptions};
use waymark_text::closest_lang::closest_text_label;

use crate::index::Index;

/// Whether `index` belongs to one of `stacks`. Stackless indexes always
/// match.
#[must_use]
pub fn source_matches_stacks(index: &Index, stacks: &[String]) -> bool {
    index.stacks.is_empty() || index.stacks.iter().any(|s| stacks.contains(s))
}

/// Whether `index` serves one of `types`, directly or as a scored subtype.
#[must_use]
pub fn source_matches_types(index: &Index, types: &[String]) -> bool {
    index.types.iter().any(|kind| {
        types.iter().any(|wanted| {
            wanted == kind
                || wanted
                    .split_once('.')
                    .is_some_and(|(parent, _)| parent == kind)
        })
    })
}

/// Whether `index` may contribute results under `options`.
#[must_use]
pub fn source_allowed(index: &Index, options: &ValidatedOptions) -> bool {
    options
        .stacks
        .as_deref()
        .is_none_or(|stacks| source_matches_stacks(index, stacks))
        && options
            .types
            .as_deref()
            .is_none_or(|types| source_matches_types(index, types))
}

/// Whether a feature belongs to one of `stacks`. Features without a stack
/// always match.
#[must_use]
pub fn feature_matches_stacks(props: &FeatureProperties, stacks: &[String]) -> bool {
    props
        .geocoder_stack
        .as_deref()
        .is_none_or(|stack| stacks.iter().any(|s| s.eq_ignore_ascii_case(stack)))
}

/// Whether a feature of `index` has one of `types`.
///
/// A `type.subtype` filter matches features of `type` whose score falls
/// in the subtype's score range, scaled by the index's highest score.
#[must_use]
pub fn feature_matches_types(index: &Index, props: &FeatureProperties, types: &[String]) -> bool {
    let own_types: Vec<&str> = if props.types.is_empty() {
        vec![index.kind.as_str()]
    } else {
        props.types.iter().map(String::as_str).collect()
    };

    own_types.iter().any(|kind| {
        types.iter().any(|wanted| {
            if wanted == kind {
                return true;
            }
            let Some((parent, sub)) = wanted.split_once('.') else {
                return false;
            };
            if parent != *kind {
                return false;
            }
            index.config.scoreranges.get(sub).is_some_and(|[lo, hi]| {
                let score = props.score_or_zero();
                let max = index.source.max_score;
                score >= lo * max && score <= hi * max
            })
        })
    })
}

/// Whether a feature has text in the requested language when strict
/// language filtering is on.
#[must_use]
pub fn feature_matches_language(props: &FeatureProperties, options: &ValidatedOptions) -> bool {
    if !options.is_strict_language() {
        return true;
    }
    options
        .primary_language()
        .is_none_or(|language| closest_text_label(props, language, true).is_some())
}

/// Whether a loaded feature of `index` passes every filter in `options`.
#[must_use]
pub fn feature_allowed(index: &Index, props: &FeatureProperties, options: &ValidatedOptions) -> bool {
    options
        .stacks
        .as_deref()
        .is_none_or(|stacks| feature_matches_stacks(props, stacks))
        && options
            .types
            .as_deref()
            .is_none_or(|types| feature_matches_types(index, props, types))
        && feature_matches_language(props, options)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use waymark_geocoder_models::LanguageMode;

    use super::*;
    use crate::config::{GeocoderConfig, IndexConfig};
    use crate::index::IndexSet;
    use crate::memory::MemoryIndex;

    fn poi_set() -> IndexSet {
        let mut poi = IndexConfig::new("poi", 14);
        poi.types = Some(vec!["poi".into(), "poi.landmark".into()]);
        poi.stack = vec!["us".into()];
        poi.scoreranges.insert("landmark".into(), [0.5, 1.0]);
        poi.minscore = Some(0.0);
        poi.maxscore = Some(1000.0);
        let config = GeocoderConfig {
            indexes: vec![IndexConfig::new("place", 12), poi],
            ..GeocoderConfig::default()
        };
        let sources = config
            .indexes
            .iter()
            .map(|c| {
                MemoryIndex::build(c, &BTreeMap::new(), Vec::new())
                    .unwrap()
                    .into_source()
            })
            .collect();
        IndexSet::new(&config, sources).unwrap()
    }

    fn options(types: &[&str]) -> ValidatedOptions {
        ValidatedOptions {
            types: Some(types.iter().map(ToString::to_string).collect()),
            ..ValidatedOptions::default()
        }
    }

    #[test]
    fn sources_filter_by_type_and_subtype() {
        let set = poi_set();
        let poi = set.get(1).unwrap();
        assert!(source_allowed(poi, &options(&["poi"])));
        assert!(source_allowed(poi, &options(&["poi.landmark"])));
        assert!(!source_allowed(poi, &options(&["place"])));
        assert!(source_allowed(poi, &ValidatedOptions::default()));
    }

    #[test]
    fn stackless_sources_always_match() {
        let set = poi_set();
        let stacks = vec!["ca".to_string()];
        assert!(source_matches_stacks(set.get(0).unwrap(), &stacks));
        assert!(!source_matches_stacks(set.get(1).unwrap(), &stacks));
    }

    #[test]
    fn subtype_requires_score_in_range() {
        let set = poi_set();
        let poi = set.get(1).unwrap();
        let mut landmark = FeatureProperties::with_text("Quincy Center Station");
        landmark.types = vec!["poi".into()];
        landmark.score = Some(600.0);
        let mut cafe = landmark.clone();
        cafe.score = Some(20.0);

        let wanted = vec!["poi.landmark".to_string()];
        assert!(feature_matches_types(poi, &landmark, &wanted));
        assert!(!feature_matches_types(poi, &cafe, &wanted));
        assert!(feature_matches_types(poi, &cafe, &["poi".to_string()]));
    }

    #[test]
    fn feature_stacks_compare_case_insensitively() {
        let mut props = FeatureProperties::with_text("Quincy");
        assert!(feature_matches_stacks(&props, &["us".into()]));
        props.geocoder_stack = Some("US".into());
        assert!(feature_matches_stacks(&props, &["us".into()]));
        assert!(!feature_matches_stacks(&props, &["ca".into()]));
    }

    #[test]
    fn strict_language_requires_localized_text() {
        let mut props = FeatureProperties::with_text("United States");
        let options = ValidatedOptions {
            languages: vec!["es".into()],
            language_mode: Some(LanguageMode::Strict),
            ..ValidatedOptions::default()
        };
        assert!(!feature_matches_language(&props, &options));
        props
            .localized_text
            .insert("es".into(), "Estados Unidos".into());
        assert!(feature_matches_language(&props, &options));

        let loose = ValidatedOptions {
            language_mode: None,
            ..options
        };
        assert!(feature_matches_language(
            &FeatureProperties::with_text("United States"),
            &loose
        ));
    }
}
