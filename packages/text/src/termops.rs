//! Term operations.
//!
//! Address-number detection and templating, token permutations, term
//! weights, the 3-bit log score scale, and the indexable-text expansion
//! that turns a feature's `carmen:text*` properties into phrases.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use waymark_geocoder_models::FeatureProperties;
use waymark_geocoder_models::TokenMask;
use waymark_geocoder_models::constants::SCORE_SCALE_MAX;
use waymark_geocoder_models::mask;
use waymark_geocoder_models::properties::UNIVERSAL_LANGUAGE;

use crate::TextError;
use crate::closest_lang::has_language;
use crate::replacer::{ComplexReplacer, GlobalReplacer, SimpleReplacer};
use crate::tokenize::{normalize_query, normalize_text, tokenize};

/// Language bucket for `carmen:text`.
pub const DEFAULT_LANGUAGE: &str = "default";

/// Language bucket for phrases valid in every language.
pub const ALL_LANGUAGES: &str = "all";

/// `all` permutations are only generated up to this many tokens.
pub const MAX_ALL_PERMUTATION_TOKENS: usize = 8;

static ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)\.([0-9]+)$").expect("valid regex"));

static ADDRESS_RES: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        // 10, 10a
        Regex::new(r"^\d+[a-z]?$").expect("valid regex"),
        // 10-19, 10-19a
        Regex::new(r"^(\d+)-(\d+)[a-z]?$").expect("valid regex"),
        // 6n23
        Regex::new(r"^(\d+)([nsew])(\d+)[a-z]?$").expect("valid regex"),
        // w350n5337, n453
        Regex::new(r"^([nesw])(\d+)([nesw]\d+)?$").expect("valid regex"),
    ]
});

/// Parses a `<type>.<id>` feature lookup.
#[must_use]
pub fn id_query(query: &str) -> Option<(&str, u64)> {
    let caps = ID_RE.captures(query)?;
    let kind = caps.get(1)?.as_str();
    let id = caps.get(2)?.as_str().parse().ok()?;
    Some((kind, id))
}

/// Returns `token` if it looks like a house number.
#[must_use]
pub fn address(token: &str) -> Option<&str> {
    ADDRESS_RES
        .iter()
        .any(|re| re.is_match(token))
        .then_some(token)
}

/// Parses the digits of a mixed string (`"12b"` -> 12, `"1-2"` -> 12).
#[must_use]
pub fn parse_semi_number(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Templates a number string: the leading digits are kept and the rest
/// become `#`, so `"123"` -> `"1##"` and `"1234"` -> `"12##"`.
#[must_use]
pub fn num_token(number: &str) -> String {
    let len = number.chars().count();
    match len {
        0 => String::new(),
        1 => "#".to_string(),
        2 => "##".to_string(),
        _ => {
            let lead = if len == 3 { 1 } else { 2 };
            let mut token: String = number.chars().take(lead).collect();
            token.extend(std::iter::repeat_n('#', len - lead));
            token
        }
    }
}

/// One variant of `tokens` per house-number token, with that token
/// templated.
#[must_use]
pub fn num_tokenize(tokens: &[String]) -> Vec<Vec<String>> {
    tokens
        .iter()
        .enumerate()
        .filter_map(|(i, token)| {
            let number = address(token).and_then(parse_semi_number)?;
            let mut replaced = tokens.to_vec();
            replaced[i] = num_token(&number.to_string());
            Some(replaced)
        })
        .collect()
}

/// Templates a bare number as a prefix of possibly longer numbers.
///
/// `"19"` may be the whole number (`##`) or the start of `190` (`1#`) or
/// `1900` (`19`); every distinct template other than the input itself is
/// returned. Only single-token queries produce variants.
#[must_use]
pub fn num_tokenize_prefix(tokens: &[String]) -> Vec<Vec<String>> {
    let [token] = tokens else {
        return Vec::new();
    };
    let Some(number) = address(token).and_then(parse_semi_number) else {
        return Vec::new();
    };
    let digits = number.to_string();
    let len = digits.len();

    let mut variants: Vec<String> = Vec::new();
    for suffix in ["", "0", "00"] {
        let waffled: String = num_token(&format!("{digits}{suffix}")).chars().take(len).collect();
        if !variants.contains(&waffled) {
            variants.push(waffled);
        }
    }
    variants
        .into_iter()
        .filter(|variant| variant != token)
        .map(|variant| vec![variant])
        .collect()
}

/// Whether a phrase is a lone templated house number.
#[must_use]
pub fn is_address_number(text: &str) -> bool {
    let leads_with_num_token = text.split(' ').next().is_some_and(|t| t.contains('#'));
    leads_with_num_token && !text.chars().any(char::is_whitespace)
}

/// Finds the house number in the masked part of a query that is not
/// explained by `cover_text`. Returns the number and its position.
#[must_use]
pub fn mask_address(query: &[String], cover_text: &str, mask: TokenMask) -> Option<(String, usize)> {
    let mut cover_tokens: BTreeSet<String> = tokenize(cover_text).tokens.into_iter().collect();
    for (i, token) in query.iter().enumerate() {
        if mask & mask::bit(i) == 0 {
            continue;
        }
        if cover_tokens.remove(token) {
            continue;
        }
        if let Some(addr) = address(token) {
            return Some((addr.to_string(), i));
        }
    }
    None
}

/// Every mask over `len` tokens, most tokens first, then lowest value.
#[must_use]
pub fn all_masks(len: usize) -> Vec<TokenMask> {
    let mut masks: Vec<TokenMask> = (1..=mask::full(len)).rev().collect();
    masks.sort_by(|a, b| b.count_ones().cmp(&a.count_ones()).then(a.cmp(b)));
    masks
}

/// Every contiguous mask over `len` tokens, longest first.
#[must_use]
pub fn continuous_masks(len: usize) -> Vec<TokenMask> {
    if len == 0 {
        return Vec::new();
    }
    let mut cover = mask::full(len);
    let mut masks = vec![cover];
    for i in 1..len {
        cover >>= 1;
        for j in 0..=i {
            masks.push(cover << j);
        }
    }
    masks
}

/// A subset of query tokens tried as one phrase.
#[derive(Debug, Clone, PartialEq)]
pub struct Permutation {
    /// Tokens in phrase order.
    pub tokens: Vec<String>,
    /// Query positions the tokens came from.
    pub mask: TokenMask,
    /// Whether the phrase includes the final query token.
    pub ender: bool,
    /// Summed token weight rounded to 0.2, when weights were given.
    pub relev: Option<f64>,
}

/// Generates token subsets of `terms`.
///
/// With `all` (and at most [`MAX_ALL_PERMUTATION_TOKENS`] terms) every
/// subset is generated, otherwise only contiguous windows. A trailing
/// templated number is moved to the front, since only the leading-number
/// form of a phrase is indexed.
#[must_use]
pub fn permutations(terms: &[String], weights: Option<&[f64]>, all: bool) -> Vec<Permutation> {
    let len = terms.len();
    let masks = if all && len <= MAX_ALL_PERMUTATION_TOKENS {
        all_masks(len)
    } else {
        continuous_masks(len)
    };

    masks
        .into_iter()
        .map(|mask| {
            let mut tokens = Vec::new();
            let mut relev = 0.0;
            for (j, term) in terms.iter().enumerate() {
                if mask & mask::bit(j) == 0 {
                    continue;
                }
                tokens.push(term.clone());
                if let Some(weights) = weights {
                    relev += weights.get(j).copied().unwrap_or(0.0);
                }
            }

            let mut ender = len > 0 && mask & mask::bit(len - 1) != 0;
            if tokens.len() > 1 && tokens.last().is_some_and(|t| t.contains('#')) {
                tokens.rotate_right(1);
                ender = false;
            }

            Permutation {
                tokens,
                mask,
                ender,
                relev: weights.map(|_| (relev * 5.0).round() / 5.0),
            }
        })
        .collect()
}

/// Drops duplicate permutations and those with a templated number in the
/// middle, then orders longest first.
#[must_use]
pub fn uniq_permutations(permutations: Vec<Permutation>) -> Vec<Permutation> {
    let mut seen = BTreeSet::new();
    let mut uniq: Vec<Permutation> = permutations
        .into_iter()
        .filter(|p| {
            let len = p.tokens.len();
            if len > 2 && p.tokens[1..len - 1].iter().any(|t| t.contains('#')) {
                return false;
            }
            let key = format!(
                "{}-{}-{}-{}",
                p.tokens.join(","),
                p.ender,
                p.mask,
                p.relev.unwrap_or(0.0)
            );
            seen.insert(key)
        })
        .collect();
    uniq.sort_by(|a, b| b.tokens.len().cmp(&a.tokens.len()));
    uniq
}

/// Relative term weights from index term frequencies.
///
/// Rare terms weigh more. Templated numbers take a fixed 0.2 and the
/// remaining terms share 0.8.
#[must_use]
pub fn weights(tokens: &[String], freq: &BTreeMap<String, u64>, total: u64) -> Vec<f64> {
    #[allow(clippy::cast_precision_loss)]
    let total = total.max(1) as f64;
    let mut has_num_tokens = false;
    let mut sum = 0.0;
    let raw: Vec<Option<f64>> = tokens
        .iter()
        .map(|token| {
            if token.contains('#') {
                has_num_tokens = true;
                return None;
            }
            #[allow(clippy::cast_precision_loss)]
            let term_freq = freq.get(token).copied().unwrap_or(1).max(1) as f64;
            let weight = (1.0 + total / term_freq).ln();
            sum += weight;
            Some(weight)
        })
        .collect();

    raw.into_iter()
        .map(|weight| match weight {
            None => 0.2,
            Some(w) if has_num_tokens => w / sum * 0.8,
            Some(w) => w / sum,
        })
        .collect()
}

/// A weighted phrase derived from a feature text.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexablePhrase {
    /// Combined weight of the phrase's terms.
    pub relev: f64,
    /// Normalized phrase text.
    pub text: String,
}

/// Sub-phrases of `tokens` carrying at least 0.8 of the total term weight.
#[must_use]
pub fn indexable_phrases(
    tokens: &[String],
    freq: &BTreeMap<String, u64>,
    total: u64,
) -> Vec<IndexablePhrase> {
    let weights = weights(tokens, freq, total);
    let mut perms = permutations(tokens, Some(&weights), true);
    perms.sort_by(|a, b| {
        b.relev
            .unwrap_or(0.0)
            .total_cmp(&a.relev.unwrap_or(0.0))
    });

    let mut seen = BTreeSet::new();
    let mut phrases = Vec::new();
    for perm in perms {
        let relev = perm.relev.unwrap_or(0.0);
        if relev < 0.8 {
            break;
        }
        let text = normalize_text(&perm.tokens.join(" "));
        if seen.insert(text.clone()) {
            phrases.push(IndexablePhrase { relev, text });
        }
    }
    phrases
}

/// Scales `num` against `max` onto `0..=7`, logarithmically.
#[must_use]
pub fn encode_3bit_log_scale(num: f64, max: f64) -> u8 {
    if num <= 0.0 || max <= 0.0 || num.is_nan() {
        return 0;
    }
    #[allow(clippy::float_cmp)]
    if num == 1.0 {
        return 1;
    }
    let scaled = (f64::from(SCORE_SCALE_MAX) * num.ln() / max.ln()).ceil();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let encoded = scaled.clamp(0.0, f64::from(SCORE_SCALE_MAX)) as u8;
    encoded
}

/// Inverse of [`encode_3bit_log_scale`].
#[must_use]
pub fn decode_3bit_log_scale(num: u8, max: f64) -> f64 {
    if num == 0 || max <= 0.0 {
        return 0.0;
    }
    max.powf(f64::from(num) / f64::from(SCORE_SCALE_MAX)).round()
}

/// Templated house-number prefixes for a feature's address points and
/// interpolation ranges, sorted.
///
/// Ranges are stepped by 10 below 10 and by 100 above, which is enough to
/// produce every distinct template in between.
#[must_use]
pub fn housenum_range(props: &FeatureProperties) -> Vec<String> {
    let mut out = BTreeSet::new();

    for cluster in props.address_numbers.iter().flatten().flatten() {
        for number in cluster {
            if let Some(n) = parse_semi_number(number) {
                out.insert(num_token(&n.to_string()));
            }
        }
    }

    if let Some(ranges) = &props.ranges {
        for (from, to) in [
            (&ranges.left_from, &ranges.left_to),
            (&ranges.right_from, &ranges.right_to),
        ] {
            for (from_lines, to_lines) in from.iter().zip(to) {
                for (a, b) in from_lines.iter().zip(to_lines) {
                    let (Some(a), Some(b)) = (
                        a.as_deref().and_then(parse_semi_number),
                        b.as_deref().and_then(parse_semi_number),
                    ) else {
                        continue;
                    };
                    let (min, max) = (a.min(b), a.max(b));
                    out.insert(num_token(&max.to_string()));
                    let mut value = min;
                    while value < max {
                        out.insert(num_token(&value.to_string()));
                        value += if value < 10 { 10 } else { 100 };
                    }
                }
            }
        }
    }

    out.into_iter().collect()
}

/// A phrase to index and the language buckets it is valid in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexableText {
    /// Phrase tokens.
    pub tokens: Vec<String>,
    /// `default`, `all`, or language labels.
    pub languages: BTreeSet<String>,
}

/// The replacement tables used at index time.
#[derive(Debug, Clone, Copy)]
pub struct IndexReplacers<'a> {
    /// Whole-word swaps.
    pub simple: &'a SimpleReplacer,
    /// Regex rules.
    pub complex: &'a ComplexReplacer,
    /// Raw-text rewrites.
    pub global: &'a GlobalReplacer,
}

/// Expands a feature's texts into the phrases it should be indexed under.
///
/// Every synonym of every language is rewritten by the global rules,
/// enumerated through the complex rules, normalized, and swapped through
/// the simple rules. Address features also get one phrase per templated
/// house-number prefix. `default_languages` without their own text inherit
/// the default text; category synonyms in a non-display position are valid
/// in every language.
///
/// # Errors
///
/// Returns [`TextError::InvalidLanguage`] for an unknown text language.
pub fn indexable_text(
    replacers: IndexReplacers<'_>,
    props: &FeatureProperties,
    default_languages: &[String],
    categories: &BTreeSet<String>,
) -> Result<Vec<IndexableText>, TextError> {
    let mut lang_texts: Vec<(&str, &str)> = vec![(DEFAULT_LANGUAGE, props.text.as_str())];
    for (label, text) in &props.localized_text {
        if !has_language(label) {
            return Err(TextError::InvalidLanguage(label.clone()));
        }
        if !text.is_empty() {
            lang_texts.push((label.as_str(), text.as_str()));
        }
    }

    let auto_populate: Vec<&str> = default_languages
        .iter()
        .map(String::as_str)
        .filter(|lang| !lang_texts.iter().any(|(label, _)| label == lang))
        .collect();

    let housenums = housenum_range(props);

    let mut texts: Vec<(String, Vec<String>)> = Vec::new();
    for (label, text) in &lang_texts {
        for (i, synonym) in text.split(',').map(str::trim).enumerate() {
            if synonym.is_empty() {
                continue;
            }
            let is_category = i > 0 && categories.contains(&synonym.to_lowercase());
            let lang = if *label == UNIVERSAL_LANGUAGE || is_category {
                ALL_LANGUAGES
            } else {
                *label
            };
            let position = texts.iter().position(|(t, _)| t == synonym).unwrap_or_else(|| {
                texts.push((synonym.to_string(), Vec::new()));
                texts.len() - 1
            });
            let langs = &mut texts[position].1;
            langs.push(lang.to_string());
            if lang == DEFAULT_LANGUAGE {
                langs.extend(auto_populate.iter().map(ToString::to_string));
            }
        }
    }

    let mut out: Vec<IndexableText> = Vec::new();
    let mut by_phrase: BTreeMap<String, usize> = BTreeMap::new();

    for (text, langs) in texts {
        let text = if replacers.global.is_empty() {
            text
        } else {
            replacers.global.replace(&text)
        };

        for variant in replacers.complex.enumerate(&tokenize(&text)) {
            let encoded = normalize_query(&tokenize(&variant)).tokens;
            let tokens = replacers.simple.replace(&encoded);
            if tokens.is_empty() {
                continue;
            }

            let mut keys = vec![tokens.clone()];
            for housenum in housenums.iter().rev() {
                let mut with_number = vec![housenum.clone()];
                with_number.extend(tokens.iter().cloned());
                keys.push(with_number);
            }

            for key in keys {
                let phrase = key.join(" ");
                let idx = *by_phrase.entry(phrase).or_insert_with(|| {
                    out.push(IndexableText {
                        tokens: key,
                        languages: BTreeSet::new(),
                    });
                    out.len() - 1
                });
                out[idx].languages.extend(langs.iter().cloned());
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_id_queries() {
        assert_eq!(id_query("place.123"), Some(("place", 123)));
        assert_eq!(id_query("poi.landmark.9"), Some(("poi.landmark", 9)));
        assert_eq!(id_query("place.abc"), None);
        assert_eq!(id_query("main street"), None);
    }

    #[test]
    fn detects_address_numbers() {
        for token in ["10", "10a", "10-19", "10-19a", "6n23", "w350n5337", "n453"] {
            assert_eq!(address(token), Some(token), "{token}");
        }
        for token in ["main", "10ab", "a10", ""] {
            assert_eq!(address(token), None, "{token}");
        }
    }

    #[test]
    fn parses_semi_numbers() {
        assert_eq!(parse_semi_number("12b"), Some(12));
        assert_eq!(parse_semi_number("1-2"), Some(12));
        assert_eq!(parse_semi_number("abc"), None);
    }

    #[test]
    fn templates_numbers() {
        assert_eq!(num_token(""), "");
        assert_eq!(num_token("1"), "#");
        assert_eq!(num_token("12"), "##");
        assert_eq!(num_token("123"), "1##");
        assert_eq!(num_token("1234"), "12##");
        assert_eq!(num_token("12345"), "12###");
    }

    #[test]
    fn num_tokenize_templates_each_number() {
        assert_eq!(
            num_tokenize(&strings(&["9", "fake", "street"])),
            vec![strings(&["#", "fake", "street"])]
        );
        assert!(num_tokenize(&strings(&["fake", "street"])).is_empty());
    }

    #[test]
    fn num_tokenize_prefix_waffles() {
        assert_eq!(
            num_tokenize_prefix(&strings(&["19"])),
            vec![strings(&["##"]), strings(&["1#"])]
        );
        assert!(num_tokenize_prefix(&strings(&["19", "main"])).is_empty());
    }

    #[test]
    fn address_number_phrases() {
        assert!(is_address_number("1##"));
        assert!(!is_address_number("1## main"));
        assert!(!is_address_number("main"));
    }

    #[test]
    fn mask_address_skips_cover_tokens() {
        let query = strings(&["9", "fake", "street"]);
        assert_eq!(mask_address(&query, "fake street", 0b111), Some(("9".to_string(), 0)));
        assert_eq!(mask_address(&query, "fake street", 0b110), None);
        let numbered = strings(&["route", "9", "9"]);
        assert_eq!(mask_address(&numbered, "route 9", 0b111), Some(("9".to_string(), 2)));
    }

    #[test]
    fn mask_orders() {
        assert_eq!(all_masks(2), vec![0b11, 0b01, 0b10]);
        assert_eq!(continuous_masks(3), vec![0b111, 0b011, 0b110, 0b001, 0b010, 0b100]);
        assert!(continuous_masks(0).is_empty());
    }

    #[test]
    fn permutations_move_trailing_number_first() {
        let perms = permutations(&strings(&["main", "1##"]), None, true);
        assert_eq!(perms[0].tokens, strings(&["1##", "main"]));
        assert!(!perms[0].ender);
        assert_eq!(perms[1].tokens, strings(&["main"]));
        assert!(!perms[1].ender);
        assert_eq!(perms[2].tokens, strings(&["1##"]));
        assert!(perms[2].ender);
    }

    #[test]
    fn uniq_drops_middle_numbers_and_sorts_by_length() {
        let perms = permutations(&strings(&["a", "1##", "b"]), None, true);
        let uniq = uniq_permutations(perms);
        assert!(uniq.iter().all(|p| p.tokens != strings(&["a", "1##", "b"])));
        assert!(uniq.windows(2).all(|w| w[0].tokens.len() >= w[1].tokens.len()));
    }

    #[test]
    fn weights_reserve_fixed_share_for_numbers() {
        let freq = BTreeMap::new();
        let w = weights(&strings(&["1##", "main", "street"]), &freq, 10);
        assert!((w[0] - 0.2).abs() < 1e-9);
        assert!((w[1] + w[2] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn indexable_phrases_keep_heavy_subsets() {
        let mut freq = BTreeMap::new();
        freq.insert("street".to_string(), 100);
        freq.insert("main".to_string(), 1);
        let phrases = indexable_phrases(&strings(&["main", "street"]), &freq, 100);
        assert_eq!(phrases[0].text, "main street");
        assert!(phrases.iter().any(|p| p.text == "main"));
        assert!(phrases.iter().all(|p| p.text != "street"));
    }

    #[test]
    fn three_bit_log_scale() {
        assert_eq!(encode_3bit_log_scale(0.0, 100.0), 0);
        assert_eq!(encode_3bit_log_scale(1.0, 100.0), 1);
        assert_eq!(encode_3bit_log_scale(100.0, 100.0), 7);
        assert_eq!(encode_3bit_log_scale(1000.0, 100.0), 7);
        assert!((decode_3bit_log_scale(7, 100.0) - 100.0).abs() < 1e-9);
        assert!((decode_3bit_log_scale(0, 100.0)).abs() < 1e-9);
    }

    #[test]
    fn housenum_range_covers_points_and_ranges() {
        let props: FeatureProperties = serde_json::from_value(json!({
            "carmen:text": "main st",
            "carmen:addressnumber": ["9", "105"],
            "carmen:rangetype": "tiger",
            "carmen:lfromhn": "1",
            "carmen:ltohn": "250"
        }))
        .unwrap();
        assert_eq!(housenum_range(&props), strings(&["#", "##", "1##", "2##"]));
    }

    #[test]
    fn indexable_text_expands_languages_and_numbers() {
        let props: FeatureProperties = serde_json::from_value(json!({
            "carmen:text": "Fake Street,Cafe",
            "carmen:text_es": "Calle Falsa",
            "carmen:addressnumber": ["9"]
        }))
        .unwrap();
        let simple = SimpleReplacer::default();
        let complex = ComplexReplacer::default();
        let global = GlobalReplacer::default();
        let replacers = IndexReplacers {
            simple: &simple,
            complex: &complex,
            global: &global,
        };
        let categories: BTreeSet<String> = ["cafe".to_string()].into_iter().collect();

        let texts = indexable_text(replacers, &props, &strings(&["en"]), &categories).unwrap();
        let find = |phrase: &str| texts.iter().find(|t| t.tokens.join(" ") == phrase);

        let fake = find("fake street").unwrap();
        assert!(fake.languages.contains("default"));
        assert!(fake.languages.contains("en"));
        assert!(find("# fake street").is_some());
        assert!(find("calle falsa").unwrap().languages.contains("es"));
        assert_eq!(
            find("cafe").unwrap().languages,
            BTreeSet::from(["all".to_string()])
        );
    }

    #[test]
    fn indexable_text_rejects_unknown_languages() {
        let props: FeatureProperties = serde_json::from_value(json!({
            "carmen:text": "x",
            "carmen:text_zz": "y"
        }))
        .unwrap();
        let simple = SimpleReplacer::default();
        let complex = ComplexReplacer::default();
        let global = GlobalReplacer::default();
        let replacers = IndexReplacers {
            simple: &simple,
            complex: &complex,
            global: &global,
        };
        assert!(matches!(
            indexable_text(replacers, &props, &[], &BTreeSet::new()),
            Err(TextError::InvalidLanguage(_))
        ));
    }
}
