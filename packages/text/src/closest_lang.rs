//! Localized text selection.
//!
//! Features carry per-language texts under `carmen:text_<label>` where the
//! label is a BCP-47-ish tag with `_` separators (`en`, `zh_Hant`,
//! `sr_Latn`). [`closest_lang_label`] picks the label that best serves a
//! requested language:
//!
//! 1. Exact match
//! 2. Case-insensitive match
//! 3. Configured fallbacks for the full tag (`zh_TW` -> `zh_Hant`)
//! 4. The primary language alone (`en_US` -> `en`)
//! 5. Configured fallbacks for the primary language
//! 6. Universal text
//! 7. A scored guess on language and script, accepted at 50 points
//!
//! In strict mode digraphic languages (Serbian) never fall back across
//! scripts.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use waymark_geocoder_models::FeatureProperties;
use waymark_geocoder_models::properties::{PropertiesError, UNIVERSAL_LANGUAGE, first_synonym};

/// ISO 639-1 codes plus the few three-letter codes seen in index data.
const LANGUAGES: &str = "aa ab ae af ak am an ar as av ay az ba be bg bh bi bm bn bo br bs \
    ca ce ch co cr cs cu cv cy da de dv dz ee el en eo es et eu fa ff fi fj fo fr fy ga gd gl \
    gn gu gv ha he hi ho hr ht hu hy hz ia id ie ig ii ik io is it iu ja jv ka kg ki kj kk kl \
    km kn ko kr ks ku kv kw ky la lb lg li ln lo lt lu lv mg mh mi mk ml mn mr ms mt my na nb \
    nd ne ng nl nn no nr nv ny oc oj om or os pa pi pl ps pt qu rm rn ro ru rw sa sc sd se sg \
    si sk sl sm sn so sq sr ss st su sv sw ta te tg th ti tk tl tn to tr ts tt tw ty ug uk ur \
    uz ve vi vo wa wo xh yi yo za zh zu ast fil haw nan yue";

const SCRIPTS: &str = "Arab Armn Beng Cyrl Deva Ethi Geor Grek Gujr Guru Hang Hani Hans \
    Hant Hebr Hira Jpan Kana Khmr Knda Kore Laoo Latn Mlym Mong Mymr Orya Sinh Taml Telu Thaa \
    Thai Tibt";

/// ISO 3166-1 alpha-2 codes and the UN M.49 Latin America area.
const REGIONS: &str = "AD AE AF AG AI AL AM AO AQ AR AS AT AU AW AX AZ BA BB BD BE BF BG BH \
    BI BJ BL BM BN BO BQ BR BS BT BV BW BY BZ CA CC CD CF CG CH CI CK CL CM CN CO CR CS CU CV \
    CW CX CY CZ DE DJ DK DM DO DZ EC EE EG EH ER ES ET FI FJ FK FM FO FR GA GB GD GE GF GG GH \
    GI GL GM GN GP GQ GR GS GT GU GW GY HK HM HN HR HT HU ID IE IL IM IN IO IQ IR IS IT JE JM \
    JO JP KE KG KH KI KM KN KP KR KW KY KZ LA LB LC LI LK LR LS LT LU LV LY MA MC MD ME MF MG \
    MH MK ML MM MN MO MP MQ MR MS MT MU MV MW MX MY MZ NA NC NE NF NG NI NL NO NP NR NU NZ OM \
    PA PE PF PG PH PK PL PM PN PR PS PT PW PY QA RE RO RS RU RW SA SB SC SD SE SG SH SI SJ SK \
    SL SM SN SO SR SS ST SV SX SY SZ TC TD TF TG TH TJ TK TL TM TN TO TR TT TV TW TZ UA UG UM \
    US UY UZ VA VC VE VG VI VN VU WF WS YE YT ZA ZM ZW 419";

/// Default script of a language, where it has one.
const SUPPRESS_SCRIPT: &[(&str, &str)] = &[
    ("af", "Latn"), ("am", "Ethi"), ("ar", "Arab"), ("as", "Beng"), ("ay", "Latn"),
    ("be", "Cyrl"), ("bg", "Cyrl"), ("bn", "Beng"), ("bs", "Latn"), ("ca", "Latn"),
    ("ch", "Latn"), ("cs", "Latn"), ("cy", "Latn"), ("da", "Latn"), ("de", "Latn"),
    ("dv", "Thaa"), ("dz", "Tibt"), ("el", "Grek"), ("en", "Latn"), ("eo", "Latn"),
    ("es", "Latn"), ("et", "Latn"), ("eu", "Latn"), ("fa", "Arab"), ("fi", "Latn"),
    ("fj", "Latn"), ("fo", "Latn"), ("fr", "Latn"), ("fy", "Latn"), ("ga", "Latn"),
    ("gl", "Latn"), ("gn", "Latn"), ("gu", "Gujr"), ("gv", "Latn"), ("he", "Hebr"),
    ("hi", "Deva"), ("hr", "Latn"), ("ht", "Latn"), ("hu", "Latn"), ("hy", "Armn"),
    ("id", "Latn"), ("is", "Latn"), ("it", "Latn"), ("ja", "Jpan"), ("ka", "Geor"),
    ("kk", "Cyrl"), ("kl", "Latn"), ("km", "Khmr"), ("kn", "Knda"), ("ko", "Kore"),
    ("la", "Latn"), ("lb", "Latn"), ("ln", "Latn"), ("lo", "Laoo"), ("lt", "Latn"),
    ("lv", "Latn"), ("mg", "Latn"), ("mh", "Latn"), ("mk", "Cyrl"), ("ml", "Mlym"),
    ("mr", "Deva"), ("ms", "Latn"), ("mt", "Latn"), ("my", "Mymr"), ("na", "Latn"),
    ("nb", "Latn"), ("nd", "Latn"), ("ne", "Deva"), ("nl", "Latn"), ("nn", "Latn"),
    ("no", "Latn"), ("nr", "Latn"), ("ny", "Latn"), ("om", "Latn"), ("or", "Orya"),
    ("pa", "Guru"), ("pl", "Latn"), ("ps", "Arab"), ("pt", "Latn"), ("qu", "Latn"),
    ("rm", "Latn"), ("rn", "Latn"), ("ro", "Latn"), ("ru", "Cyrl"), ("rw", "Latn"),
    ("sg", "Latn"), ("si", "Sinh"), ("sk", "Latn"), ("sl", "Latn"), ("sm", "Latn"),
    ("so", "Latn"), ("sq", "Latn"), ("ss", "Latn"), ("st", "Latn"), ("sv", "Latn"),
    ("sw", "Latn"), ("ta", "Taml"), ("te", "Telu"), ("th", "Thai"), ("ti", "Ethi"),
    ("tl", "Latn"), ("tn", "Latn"), ("to", "Latn"), ("tr", "Latn"), ("ts", "Latn"),
    ("uk", "Cyrl"), ("ur", "Arab"), ("ve", "Latn"), ("vi", "Latn"), ("xh", "Latn"),
    ("yi", "Hebr"), ("zu", "Latn"),
];

/// Display fallbacks, keyed by lowercased tag.
const FALLBACKS: &[(&str, &[&str])] = &[
    ("ar", &["en"]),
    ("nb", &["no"]),
    ("nn", &["no", "nb"]),
    ("no", &["nb"]),
    ("pt_br", &["pt"]),
    ("pt_pt", &["pt"]),
    ("sr_ba", &["sr_Latn", "hr", "bs"]),
    ("sr_cs", &["sr_Latn", "hr", "bs"]),
    ("sr_latn", &["hr", "bs"]),
    ("sr_me", &["sr_Latn", "hr", "bs"]),
    ("sr_rs", &["sr_Latn", "hr", "bs"]),
    ("zh_cn", &["zh_Hans", "zh"]),
    ("zh_hans", &["zh"]),
    ("zh_hk", &["zh_Hant", "zh"]),
    ("zh_mo", &["zh_Hant", "zh"]),
    ("zh_sg", &["zh_Hans", "zh"]),
    ("zh_tw", &["zh_Hant", "zh"]),
];

/// Languages whose variants use different scripts.
const DIGRAPHIC: &[&str] = &["sr"];

const LANGUAGE_BONUSES: &[(&str, f64)] = &[("ru", 2.0), ("en", 2.0), ("ar", 2.0), ("hi", 2.0)];
const SCRIPT_BONUSES: &[(&str, f64)] = &[("Hans", 1.0), ("Latn", 1.0)];

/// Minimum heuristic score for a label to be used.
const MIN_HEURISTIC_SCORE: f64 = 50.0;

/// Lowercased subtag to canonical form.
static SUBTAGS: LazyLock<Subtags> = LazyLock::new(|| {
    let index = |list: &'static str| -> BTreeMap<String, &'static str> {
        list.split_whitespace().map(|s| (s.to_lowercase(), s)).collect()
    };
    Subtags {
        languages: index(LANGUAGES),
        scripts: index(SCRIPTS),
        regions: index(REGIONS),
    }
});

struct Subtags {
    languages: BTreeMap<String, &'static str>,
    scripts: BTreeMap<String, &'static str>,
    regions: BTreeMap<String, &'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subtag {
    Language(&'static str),
    Script(&'static str),
    Region,
}

/// Recognized subtags of `tag`. The first part must be a language; later
/// parts count only when they are a known script or region.
fn parse_tag(tag: &str) -> Vec<Subtag> {
    let mut parts = tag.split(['_', '-']);
    let Some(language) = parts
        .next()
        .and_then(|p| SUBTAGS.languages.get(&p.to_lowercase()))
    else {
        return Vec::new();
    };
    let mut subtags = vec![Subtag::Language(*language)];
    for part in parts {
        let lower = part.to_lowercase();
        if let Some(script) = SUBTAGS.scripts.get(&lower) {
            subtags.push(Subtag::Script(*script));
        } else if SUBTAGS.regions.contains_key(&lower) {
            subtags.push(Subtag::Region);
        }
    }
    subtags
}

fn language_of(subtags: &[Subtag]) -> Option<&'static str> {
    subtags.iter().find_map(|s| match s {
        Subtag::Language(l) => Some(*l),
        _ => None,
    })
}

fn script_of(subtags: &[Subtag]) -> Option<&'static str> {
    subtags
        .iter()
        .find_map(|s| match s {
            Subtag::Script(script) => Some(*script),
            _ => None,
        })
        .or_else(|| {
            let language = language_of(subtags)?;
            SUPPRESS_SCRIPT
                .iter()
                .find(|(l, _)| *l == language)
                .map(|(_, script)| *script)
        })
}

fn lookup(table: &[(&str, f64)], key: &str) -> f64 {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map_or(0.0, |(_, bonus)| *bonus)
}

fn fallbacks(tag: &str) -> &'static [&'static str] {
    FALLBACKS
        .iter()
        .find(|(k, _)| *k == tag)
        .map_or(&[], |(_, fb)| *fb)
}

/// Whether `label` names a language (or is the universal label).
#[must_use]
pub fn has_language(label: &str) -> bool {
    label == UNIVERSAL_LANGUAGE || !parse_tag(label).is_empty()
}

/// The primary language of `label`, or `universal`.
#[must_use]
pub fn language_code(label: &str) -> Option<&'static str> {
    if label == UNIVERSAL_LANGUAGE {
        return Some(UNIVERSAL_LANGUAGE);
    }
    language_of(&parse_tag(label))
}

/// Scores `candidates` against `target`, best first.
fn scored_candidates<'a>(target: &str, candidates: &[&'a str]) -> Vec<(&'a str, f64)> {
    let target_tags = parse_tag(target);
    let Some(target_language) = language_of(&target_tags) else {
        return Vec::new();
    };
    let target_script = script_of(&target_tags);

    let mut scored: Vec<(&str, f64)> = candidates
        .iter()
        .map(|candidate| {
            let tags = parse_tag(candidate);
            let language = language_of(&tags);
            let script = script_of(&tags);
            let mut score = 0.0;

            if language == Some(target_language) {
                score += 100.0;
            }
            if let Some(script) = script.filter(|s| Some(*s) == target_script) {
                score += if script == "Latn" { 25.0 } else { 50.0 };
            }
            if let Some(language) = language {
                score += lookup(LANGUAGE_BONUSES, language);
            }
            if let Some(script) = script {
                score += lookup(SCRIPT_BONUSES, script);
            }
            if tags.len() > 1 {
                #[allow(clippy::cast_precision_loss)]
                let extra = (tags.len() - 1) as f64;
                score -= 0.5 * extra;
            }
            (*candidate, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored
}

/// Picks the candidate label best matching `target`.
///
/// `candidates` are labels with non-empty text. Returns `None` when
/// nothing is close enough.
#[must_use]
pub fn closest_lang_label<'a>(target: &str, candidates: &[&'a str], strict: bool) -> Option<&'a str> {
    let target = target.replacen('-', "_", 1);
    let lower = target.to_lowercase();
    let primary = lower.split('_').next().unwrap_or_default();
    let digraphic = DIGRAPHIC.contains(&primary);
    let find = |label: &str| candidates.iter().copied().find(|c| *c == label);

    if let Some(exact) = find(&target) {
        return Some(exact);
    }
    if let Some(found) = candidates.iter().copied().find(|c| c.to_lowercase() == lower) {
        return Some(found);
    }
    if let Some(found) = fallbacks(&lower).iter().find_map(|fb| find(*fb)) {
        return Some(found);
    }
    if !(strict && digraphic) {
        if let Some(found) = candidates.iter().copied().find(|c| c.to_lowercase() == primary) {
            return Some(found);
        }
    }
    if !strict && !digraphic {
        if let Some(found) = fallbacks(primary).iter().find_map(|fb| find(*fb)) {
            return Some(found);
        }
    }
    if let Some(universal) = find(UNIVERSAL_LANGUAGE) {
        return Some(universal);
    }

    let (winner, score) = scored_candidates(&target, candidates).into_iter().next()?;
    if score < MIN_HEURISTIC_SCORE || (strict && DIGRAPHIC.contains(&winner)) {
        return None;
    }
    Some(winner)
}

/// The localized label of `props` best matching `language`.
#[must_use]
pub fn closest_text_label<'a>(
    props: &'a FeatureProperties,
    language: &str,
    strict: bool,
) -> Option<&'a str> {
    let candidates: Vec<&str> = props
        .localized_text
        .iter()
        .filter(|(_, text)| !text.is_empty())
        .map(|(label, _)| label.as_str())
        .collect();
    closest_lang_label(language, &candidates, strict)
}

/// Display text chosen for a requested language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizedText {
    /// First synonym of the chosen text.
    pub text: String,
    /// Tag of the chosen text (`-` separated), unset for default and
    /// universal text.
    pub language: Option<String>,
}

/// Selects the display text of `props` for `language`.
///
/// # Errors
///
/// Returns [`PropertiesError::Missing`] if the feature has no `carmen:text`.
pub fn get_text(
    language: Option<&str>,
    props: &FeatureProperties,
) -> Result<LocalizedText, PropertiesError> {
    if props.text.is_empty() {
        return Err(PropertiesError::Missing("carmen:text"));
    }
    let Some(language) = language else {
        return Ok(LocalizedText {
            text: first_synonym(&props.text).to_string(),
            language: None,
        });
    };

    let label = closest_text_label(props, language, false);
    let localized = label.and_then(|l| props.localized_text.get(l));
    Ok(LocalizedText {
        text: first_synonym(localized.unwrap_or(&props.text)).to_string(),
        language: label
            .filter(|l| localized.is_some() && *l != UNIVERSAL_LANGUAGE)
            .map(|l| l.replacen('_', "-", 1)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn english_variants() {
        assert_eq!(closest_lang_label("en", &["en", "es"], false), Some("en"));
        assert_eq!(closest_lang_label("en-XX", &["en", "es"], false), Some("en"));
    }

    #[test]
    fn chinese_variants_are_case_and_separator_insensitive() {
        let candidates = ["zh", "zh_Hant"];
        assert_eq!(closest_lang_label("zh", &candidates, false), Some("zh"));
        assert_eq!(closest_lang_label("zh-xx", &candidates, false), Some("zh"));
        for target in ["zh-hant", "zh_hant", "zh-Hant", "zh_Hant", "zh-HANT", "zh_HANT"] {
            assert_eq!(closest_lang_label(target, &candidates, false), Some("zh_Hant"), "{target}");
        }
        assert_eq!(closest_lang_label("zh-TW", &["zh"], false), Some("zh"));
    }

    #[test]
    fn arabic_falls_back_to_english() {
        assert_eq!(closest_lang_label("ar", &["en"], false), Some("en"));
    }

    #[test]
    fn universal_text_is_last_resort() {
        assert_eq!(closest_lang_label("en", &["universal"], false), Some("universal"));
        assert_eq!(closest_lang_label("zh", &["universal"], false), Some("universal"));
    }

    #[test]
    fn serbian_strict_fallbacks() {
        let all = ["sr", "sr_Cyrl", "sr_Latn"];
        for target in ["sr-BA", "sr-CS", "sr-ME", "sr-RS", "sr-XX"] {
            assert_eq!(closest_lang_label(target, &all, true), Some("sr_Latn"), "{target}");
        }
        assert_eq!(closest_lang_label("sr-RS", &["bs", "hr", "sr", "sr_Cyrl"], true), Some("hr"));
        assert_eq!(closest_lang_label("sr-RS", &["bs", "sr", "sr_Cyrl"], true), Some("bs"));
        assert_eq!(closest_lang_label("sr-XX", &["bs", "hr", "sr", "sr_Cyrl"], true), None);
        assert_eq!(closest_lang_label("sr-Latn", &["sr"], true), None);
    }

    #[test]
    fn unknown_targets_match_nothing() {
        assert_eq!(closest_lang_label("عربى - السعودية", &["en"], false), None);
    }

    #[test]
    fn recognizes_languages() {
        assert!(has_language("en"));
        assert!(has_language("zh_Hant"));
        assert!(has_language("universal"));
        assert!(!has_language("zz"));
        assert_eq!(language_code("zh-Hant"), Some("zh"));
        assert_eq!(language_code("universal"), Some("universal"));
        assert_eq!(language_code("zz"), None);
    }

    #[test]
    fn get_text_picks_localized_text() {
        let props: FeatureProperties = serde_json::from_value(json!({
            "carmen:text": "Default,Alias",
            "carmen:text_en": "English",
            "carmen:text_universal": "Universal"
        }))
        .unwrap();

        assert_eq!(
            get_text(None, &props).unwrap(),
            LocalizedText { text: "Default".into(), language: None }
        );
        assert_eq!(
            get_text(Some("en"), &props).unwrap(),
            LocalizedText { text: "English".into(), language: Some("en".into()) }
        );
        assert_eq!(
            get_text(Some("zh"), &props).unwrap(),
            LocalizedText { text: "Universal".into(), language: None }
        );
    }

    #[test]
    fn get_text_requires_text() {
        let props = FeatureProperties::default();
        assert!(matches!(
            get_text(None, &props),
            Err(PropertiesError::Missing("carmen:text"))
        ));
    }
}
