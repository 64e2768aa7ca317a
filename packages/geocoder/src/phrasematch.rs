//! Phrase matching.
//!
//! For one index, finds every subquery of the query that matches an
//! indexed phrase and tags it with the query tokens it covers. Plain
//! indexes are window-matched; address indexes try every token
//! permutation so the house number may sit anywhere in the query.

use std::collections::{BTreeMap, BTreeSet};

use waymark_geocoder_models::constants::{MAX_CORRECTION_LENGTH, MIN_CORRECTION_LENGTH};
use waymark_geocoder_models::mask;
use waymark_geocoder_models::{TokenMask, ValidatedOptions};
use waymark_spatial::bbox;
use waymark_text::closest_lang::closest_lang_label;
use waymark_text::termops::{
    DEFAULT_LANGUAGE, address, is_address_number, num_tokenize, num_tokenize_prefix, permutations,
    uniq_permutations,
};
use waymark_text::{TokenizedQuery, normalize_query};

use crate::error::SourceError;
use crate::filter::source_matches_stacks;
use crate::index::Index;
use crate::source::{EndingType, PhraseMatch};

/// Floor of the edit-distance multiplier.
const MIN_EDIT_MULTIPLIER: f64 = 0.75;

/// A subquery matched against one index's phrases.
#[derive(Debug, Clone, PartialEq)]
pub struct Phrasematch {
    /// Query tokens the match was made from.
    pub subquery: Vec<String>,
    /// The indexed phrase, space-joined.
    pub phrase: String,
    /// Share of the query covered.
    pub weight: f64,
    /// Query token positions covered.
    pub mask: TokenMask,
    /// Penalty for fuzzy corrections, `0.75..=1`.
    pub edit_multiplier: f64,
    /// Highest score of the index, used to decode grid scores.
    pub scorefactor: f64,
    /// Ordinal of the index.
    pub idx: usize,
    /// Grid zoom of the index.
    pub zoom: u8,
    /// Whether the match may end in a prefix of the indexed text.
    pub prefix: bool,
    /// Whether grids should be scanned by word prefix.
    pub scan_prefix: bool,
    /// Whether the phrase is one of the index's categories.
    pub cat_match: bool,
    /// Whether this is a speculative house number prefix.
    pub partial_number: bool,
    /// Language label grids are checked against.
    pub language: String,
}

/// Every phrasematch of one index plus its stacking rules.
#[derive(Debug, Clone, PartialEq)]
pub struct PhrasematchResult {
    /// Matches, longest first.
    pub phrasematches: Vec<Phrasematch>,
    /// Ordinal of the index.
    pub idx: usize,
    /// Name bit of the index.
    pub nmask: u64,
    /// Indexes this one never stacks with.
    pub bmask: BTreeSet<usize>,
}

impl PhrasematchResult {
    /// A result with no matches for `index`.
    #[must_use]
    pub fn empty(index: &Index) -> Self {
        Self {
            phrasematches: Vec::new(),
            idx: index.idx,
            nmask: index.nmask,
            bmask: index.bmask.clone(),
        }
    }

    /// Whether nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phrasematches.is_empty()
    }
}

#[derive(Debug)]
struct Subquery {
    tokens: Vec<String>,
    phrase: Vec<String>,
    mask: TokenMask,
    edit_distance: u8,
    ending_type: EndingType,
    partial_number: bool,
}

/// Prefix scanning mode for a query.
///
/// The last word scans as a word prefix only when autocomplete is on and
/// the word was typed rather than produced by a replacement.
#[must_use]
pub const fn ending_type(autocomplete: bool, last_word: bool) -> EndingType {
    match (autocomplete, last_word) {
        (false, _) => EndingType::NonPrefix,
        (true, true) => EndingType::WordBoundaryPrefix,
        (true, false) => EndingType::AnyPrefix,
    }
}

/// `max(0.75, (len - edits / 2) / len)` over the characters of `subquery`.
#[must_use]
pub fn edit_multiplier(subquery: &[String], edit_distance: u8) -> f64 {
    let len = subquery.join(" ").chars().count();
    if len == 0 || edit_distance == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let len = len as f64;
    ((len - f64::from(edit_distance) / 2.0) / len).max(MIN_EDIT_MULTIPLIER)
}

/// The grid language label for `index` under `options`.
fn language_label(index: &Index, options: &ValidatedOptions) -> String {
    let Some(language) = options.primary_language() else {
        return DEFAULT_LANGUAGE.to_string();
    };
    let labels: Vec<&str> = index.config.languages.iter().map(String::as_str).collect();
    closest_lang_label(language, &labels, false)
        .unwrap_or(DEFAULT_LANGUAGE)
        .to_string()
}

/// Maps positions of the replaced query back to input tokens.
fn owner_mask(query: &TokenizedQuery, positions: impl IntoIterator<Item = usize>) -> TokenMask {
    positions
        .into_iter()
        .filter_map(|i| query.owner.get(i))
        .fold(0, |acc, &owner| acc | mask::bit(owner))
}

fn window_subqueries(
    index: &Index,
    query: &TokenizedQuery,
    max_edits: u8,
    ending: EndingType,
) -> Result<Vec<Subquery>, SourceError> {
    let matches = index
        .source
        .phrases
        .fuzzy_match_windows(&query.tokens, max_edits, ending)?;

    Ok(matches
        .into_iter()
        .filter_map(|m: PhraseMatch| {
            let len = m.phrase.len();
            let tokens = query.tokens.get(m.start_position..m.start_position + len)?.to_vec();
            if len == 1
                && m.edit_distance > 0
                && tokens[0].chars().count() < MIN_CORRECTION_LENGTH
            {
                log::trace!("Rejecting short correction {:?} -> {:?}", tokens[0], m.phrase[0]);
                return None;
            }
            Some(Subquery {
                mask: owner_mask(query, m.start_position..m.start_position + len),
                tokens,
                phrase: m.phrase,
                edit_distance: m.edit_distance,
                ending_type: m.ending_type,
                partial_number: false,
            })
        })
        .collect())
}

fn address_subqueries(
    index: &Index,
    query: &TokenizedQuery,
    options: &ValidatedOptions,
    max_edits: u8,
    ending: EndingType,
) -> Result<Vec<Subquery>, SourceError> {
    let tokens = &query.tokens;
    let mut perms = uniq_permutations(permutations(tokens, None, true));
    if tokens.len() > 1 {
        for variant in num_tokenize(tokens) {
            perms.extend(permutations(&variant, None, true));
        }
    }

    let mut to_match: Vec<(Vec<String>, EndingType)> = Vec::with_capacity(perms.len());
    let mut meta: Vec<(TokenMask, bool)> = Vec::with_capacity(perms.len());
    for perm in perms {
        let scan = if perm.ender && options.autocomplete {
            ending
        } else {
            EndingType::NonPrefix
        };
        let positions = (0..tokens.len()).filter(|&i| perm.mask & mask::bit(i) != 0);
        meta.push((owner_mask(query, positions), false));
        to_match.push((perm.tokens, scan));
    }

    let near_bare_number = tokens.len() == 1
        && address(&tokens[0]).is_some()
        && options
            .proximity
            .is_some_and(|p| bbox::inside(p, &index.bounds()));
    if near_bare_number {
        for variant in num_tokenize_prefix(tokens) {
            meta.push((owner_mask(query, [0]), true));
            to_match.push((variant, EndingType::WordBoundaryPrefix));
        }
    }

    let results = index.source.phrases.fuzzy_match_multi(&to_match, max_edits)?;
    let mut subqueries = Vec::new();
    for (((perm_tokens, _), (mask, partial_number)), matches) in
        to_match.into_iter().zip(meta).zip(results)
    {
        for m in matches {
            subqueries.push(Subquery {
                tokens: perm_tokens.clone(),
                phrase: m.phrase,
                mask,
                edit_distance: m.edit_distance,
                ending_type: m.ending_type,
                partial_number,
            });
        }
    }
    Ok(subqueries)
}

/// Matches `query` against the phrases of `index`.
///
/// Indexes outside the requested stacks or bbox yield an empty result.
///
/// # Errors
///
/// Returns the phrase lookup's [`SourceError`].
pub fn phrasematch(
    index: &Index,
    query: &TokenizedQuery,
    options: &ValidatedOptions,
) -> Result<PhrasematchResult, SourceError> {
    let mut result = PhrasematchResult::empty(index);

    if let Some(stacks) = &options.stacks
        && !source_matches_stacks(index, stacks)
    {
        return Ok(result);
    }
    if let Some(extent) = &options.bbox
        && !bbox::intersect(extent, &index.bounds())
    {
        return Ok(result);
    }

    let replaced = normalize_query(&index.query_replacer.replace(query));
    if replaced.is_empty() {
        return Ok(result);
    }

    let max_edits = u8::from(options.fuzzy_match && replaced.len() <= MAX_CORRECTION_LENGTH);
    let ending = ending_type(options.autocomplete, replaced.last_word);

    let subqueries = if index.is_address() {
        address_subqueries(index, &replaced, options, max_edits, ending)?
    } else {
        window_subqueries(index, &replaced, max_edits, ending)?
    };

    let language = language_label(index, options);
    let scorefactor = if index.source.max_score > 0.0 {
        index.source.max_score
    } else {
        1.0
    };
    #[allow(clippy::cast_precision_loss)]
    let query_len = replaced.len() as f64;

    let mut best: BTreeMap<(String, TokenMask, bool), Phrasematch> = BTreeMap::new();
    for sub in subqueries {
        let phrase = sub.phrase.join(" ");
        #[allow(clippy::cast_precision_loss)]
        let weight = sub.tokens.len() as f64 / query_len;
        let candidate = Phrasematch {
            weight,
            mask: sub.mask,
            edit_multiplier: edit_multiplier(&sub.tokens, sub.edit_distance),
            scorefactor,
            idx: index.idx,
            zoom: index.zoom(),
            prefix: sub.ending_type.is_prefix()
                && !(index.is_address() && is_address_number(&phrase)),
            scan_prefix: sub.ending_type.is_prefix(),
            cat_match: index.categories.contains(&phrase),
            partial_number: sub.partial_number,
            language: language.clone(),
            subquery: sub.tokens,
            phrase: phrase.clone(),
        };
        let key = (phrase, sub.mask, sub.partial_number);
        match best.get(&key) {
            Some(existing) if existing.edit_multiplier >= candidate.edit_multiplier => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }

    result.phrasematches = best.into_values().collect();
    result.phrasematches.sort_by(|a, b| {
        b.subquery
            .len()
            .cmp(&a.subquery.len())
            .then(a.mask.cmp(&b.mask))
            .then_with(|| a.phrase.cmp(&b.phrase))
    });

    log::debug!(
        "Index {} matched {} phrases (max edits {max_edits}, {ending:?})",
        index.config.id,
        result.phrasematches.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use waymark_text::tokenize;

    use super::*;
    use crate::config::IndexConfig;
    use crate::testing::{feature, index_set};

    fn options() -> ValidatedOptions {
        ValidatedOptions::default()
    }

    fn phrases(result: &PhrasematchResult) -> Vec<&str> {
        result.phrasematches.iter().map(|p| p.phrase.as_str()).collect()
    }

    fn poi_config() -> IndexConfig {
        let mut config = IndexConfig::new("poi", 6);
        for (from, to) in [("Street", "St"), ("Station", "Stn"), ("Fort", "Ft")] {
            config
                .tokens
                .insert(from.into(), waymark_text::ReplacementTarget::Text(to.into()));
        }
        config
    }

    fn poi_features() -> Vec<waymark_geocoder_models::StoredFeature> {
        [
            "30th Street Station",
            "Fort Wayne Stadium",
            "Ft Sumpter Museum",
            "Fortenberry Coffee",
        ]
        .iter()
        .enumerate()
        .map(|(i, text)| feature(i as u64 + 1, text, [0.0, 0.0]))
        .collect()
    }

    #[test]
    fn ending_types() {
        assert_eq!(ending_type(false, false), EndingType::NonPrefix);
        assert_eq!(ending_type(false, true), EndingType::NonPrefix);
        assert_eq!(ending_type(true, false), EndingType::AnyPrefix);
        assert_eq!(ending_type(true, true), EndingType::WordBoundaryPrefix);
    }

    #[test]
    fn edit_multiplier_is_floored() {
        let words = |s: &str| vec![s.to_string()];
        assert!((edit_multiplier(&words("strete"), 0) - 1.0).abs() < f64::EPSILON);
        assert!((edit_multiplier(&words("strete"), 1) - 11.0 / 12.0).abs() < 1e-9);
        assert!((edit_multiplier(&words("ab"), 1) - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn windows_carry_masks_and_weights() {
        let set = index_set(vec![(poi_config(), poi_features())]);
        let index = set.get(0).unwrap();

        let result = phrasematch(index, &tokenize("30th street station"), &options()).unwrap();
        let full = &result.phrasematches[0];
        assert_eq!(full.phrase, "30th st stn");
        assert_eq!(full.mask, 0b111);
        assert!((full.weight - 1.0).abs() < f64::EPSILON);
        assert!((full.edit_multiplier - 1.0).abs() < f64::EPSILON);
        assert!(full.scan_prefix);

        let result = phrasematch(index, &tokenize("ft wayne stadium museum"), &options()).unwrap();
        let head = result
            .phrasematches
            .iter()
            .find(|p| p.phrase == "ft wayne stadium")
            .unwrap();
        assert_eq!(head.mask, 0b0111);
        assert!((head.weight - 0.75).abs() < f64::EPSILON);
        assert!(!head.scan_prefix);
        assert!(!head.prefix);
    }

    #[test]
    fn short_corrections_are_rejected() {
        let set = index_set(vec![(
            IndexConfig::new("place", 6),
            vec![feature(1, "Kent", [0.0, 0.0]), feature(2, "Kentucky Fried", [0.0, 0.0])],
        )]);
        let index = set.get(0).unwrap();
        let no_prefix = ValidatedOptions {
            autocomplete: false,
            ..options()
        };
        // One edit from "kent", but too short to correct.
        let short = phrasematch(index, &tokenize("ken"), &no_prefix).unwrap();
        assert!(short.is_empty(), "{:?}", phrases(&short));
        // Same edit on a long enough word is accepted.
        let long = phrasematch(index, &tokenize("kentt"), &no_prefix).unwrap();
        assert_eq!(phrases(&long), vec!["kent"]);
        assert!(long.phrasematches[0].edit_multiplier < 1.0);
    }

    #[test]
    fn autocomplete_controls_prefix_scans() {
        let set = index_set(vec![(poi_config(), poi_features())]);
        let index = set.get(0).unwrap();

        let on = phrasematch(index, &tokenize("fo"), &options()).unwrap();
        let mut found = phrases(&on);
        found.sort_unstable();
        assert_eq!(found, vec!["fortenberry", "ft"]);
        assert!(on.phrasematches.iter().all(|p| p.prefix && p.scan_prefix));

        let off = ValidatedOptions {
            autocomplete: false,
            ..options()
        };
        assert!(phrasematch(index, &tokenize("fo"), &off).unwrap().is_empty());
    }

    #[test]
    fn excluded_stacks_and_bboxes_short_circuit() {
        let mut config = poi_config();
        config.stack = vec!["us".into()];
        config.bounds = [-10.0, -10.0, 10.0, 10.0];
        let set = index_set(vec![(config, poi_features())]);
        let index = set.get(0).unwrap();

        let other_stack = ValidatedOptions {
            stacks: Some(vec!["ca".into()]),
            ..options()
        };
        assert!(phrasematch(index, &tokenize("ft"), &other_stack).unwrap().is_empty());

        let far_bbox = ValidatedOptions {
            bbox: Some([20.0, 20.0, 30.0, 30.0]),
            ..options()
        };
        assert!(phrasematch(index, &tokenize("ft"), &far_bbox).unwrap().is_empty());
        assert!(!phrasematch(index, &tokenize("ft"), &options()).unwrap().is_empty());
    }

    fn address_set() -> crate::index::IndexSet {
        let mut config = IndexConfig::new("address", 14);
        config.address = true;
        config.bounds = [-1.0, -1.0, 1.0, 1.0];
        config
            .tokens
            .insert("Street".into(), waymark_text::ReplacementTarget::Text("St".into()));
        let mut fake = feature(1, "Fake Street", [0.0, 0.0]);
        fake.properties.address_numbers = Some(vec![Some(vec!["9".into(), "10".into(), "7".into()])]);
        fake.geometry = Some(geojson::Geometry::new(geojson::Value::MultiPoint(vec![
            vec![0.0, 0.0],
            vec![0.001, 0.0],
            vec![0.002, 0.0],
        ])));
        index_set(vec![(config, vec![fake])])
    }

    #[test]
    fn address_numbers_match_templates_in_any_position() {
        let set = address_set();
        let index = set.get(0).unwrap();

        let leading = phrasematch(index, &tokenize("9 fake street"), &options()).unwrap();
        let full = leading
            .phrasematches
            .iter()
            .find(|p| p.mask == 0b111)
            .unwrap();
        assert_eq!(full.phrase, "# fake st");
        assert!(full.prefix);

        let trailing = phrasematch(index, &tokenize("fake street 9"), &options()).unwrap();
        assert!(
            trailing
                .phrasematches
                .iter()
                .any(|p| p.mask == 0b111 && p.phrase == "# fake st"),
            "{:?}",
            phrases(&trailing)
        );
    }

    #[test]
    fn bare_numbers_near_proximity_guess_prefixes() {
        let set = address_set();
        let index = set.get(0).unwrap();
        let near = ValidatedOptions {
            proximity: Some([0.0, 0.0]),
            ..options()
        };
        let result = phrasematch(index, &tokenize("1"), &near).unwrap();
        let partial: Vec<&Phrasematch> = result
            .phrasematches
            .iter()
            .filter(|p| p.partial_number)
            .collect();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].phrase, "#");
        assert!(partial[0].scan_prefix);

        let far = ValidatedOptions {
            proximity: Some([50.0, 50.0]),
            ..options()
        };
        let result = phrasematch(index, &tokenize("1"), &far).unwrap();
        assert!(result.phrasematches.iter().all(|p| !p.partial_number));
    }

    #[test]
    fn languages_resolve_against_the_index() {
        let mut config = IndexConfig::new("country", 6);
        config.languages = vec!["es".into()];
        let set = index_set(vec![(config, vec![feature(1, "United States", [0.0, 0.0])])]);
        let index = set.get(0).unwrap();
        let with = |language: &str| ValidatedOptions {
            languages: vec![language.into()],
            ..options()
        };
        assert_eq!(language_label(index, &options()), "default");
        assert_eq!(language_label(index, &with("es")), "es");
        assert_eq!(language_label(index, &with("es-MX")), "es");
    }
}
