//! Query options.
//!
//! [`QueryOptions`] is the caller-facing bag, deserializable from JSON or
//! TOML with every key optional. The geocoder validates it into an
//! immutable [`ValidatedOptions`] before any I/O happens.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::constants::{DEFAULT_LIMIT, DEFAULT_LIMIT_VERIFY};

/// How reverse results compete for a context slot.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReverseMode {
    /// Nearest feature wins.
    #[default]
    Distance,
    /// Higher-scored feature wins, distance breaks ties.
    Score,
}

/// Language filtering mode.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LanguageMode {
    /// Drop features with no text in the requested language.
    Strict,
}

/// Raw, caller-supplied query options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Bias results toward `[lon, lat]`.
    pub proximity: Option<Vec<f64>>,
    /// Restrict results to these types (`poi`, `poi.landmark`, ...).
    pub types: Option<Vec<String>>,
    /// Restrict results to these stacks (usually country codes).
    pub stacks: Option<Vec<String>>,
    /// Comma-joined language codes.
    pub language: Option<String>,
    /// `strict` to drop results without text in the requested language.
    #[serde(rename = "languageMode")]
    pub language_mode: Option<String>,
    /// Restrict results to `[w, s, e, n]`.
    pub bbox: Option<Vec<f64>>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of verified contexts to keep before output.
    pub limit_verify: Option<usize>,
    /// Keep results with duplicate place names.
    pub allow_dupes: bool,
    /// Include internal properties and phrasematch details.
    pub debug: bool,
    /// Include per-stage timings and counts.
    pub stats: bool,
    /// Include the ids of the indexes that produced results.
    pub indexes: bool,
    /// Allow the last token to match as a prefix. Defaults to `true`.
    pub autocomplete: Option<bool>,
    /// Allow single-edit fuzzy matches. Defaults to `true`.
    #[serde(rename = "fuzzyMatch")]
    pub fuzzy_match: Option<bool>,
    /// `distance` or `score`.
    #[serde(rename = "reverseMode")]
    pub reverse_mode: Option<String>,
    /// Pass routable points through on routable indexes.
    pub routing: bool,
    /// Collapse output boxes that wrap the antimeridian.
    #[serde(rename = "clipBBox")]
    pub clip_bbox: bool,
}

/// Options after validation. Immutable for the rest of the request.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOptions {
    /// Proximity point.
    pub proximity: Option<[f64; 2]>,
    /// Sorted type filter; subtypes implied by a parent type are dropped.
    pub types: Option<Vec<String>>,
    /// Lowercased stack filter.
    pub stacks: Option<Vec<String>>,
    /// Requested language labels (`-` folded to `_`), first is primary.
    pub languages: Vec<String>,
    /// Language filtering mode.
    pub language_mode: Option<LanguageMode>,
    /// Bounding box filter.
    pub bbox: Option<[f64; 4]>,
    /// Result limit.
    pub limit: usize,
    /// Verified-context limit.
    pub limit_verify: usize,
    /// Keep duplicate place names.
    pub allow_dupes: bool,
    /// Debug output.
    pub debug: bool,
    /// Stats output.
    pub stats: bool,
    /// Index usage output.
    pub indexes: bool,
    /// Prefix matching of the last token.
    pub autocomplete: bool,
    /// Single-edit fuzzy matching.
    pub fuzzy_match: bool,
    /// Reverse competition mode.
    pub reverse_mode: ReverseMode,
    /// Routable point pass-through.
    pub routing: bool,
    /// Antimeridian clipping of output boxes.
    pub clip_bbox: bool,
}

impl Default for ValidatedOptions {
    fn default() -> Self {
        Self {
            proximity: None,
            types: None,
            stacks: None,
            languages: Vec::new(),
            language_mode: None,
            bbox: None,
            limit: DEFAULT_LIMIT,
            limit_verify: DEFAULT_LIMIT_VERIFY,
            allow_dupes: false,
            debug: false,
            stats: false,
            indexes: false,
            autocomplete: true,
            fuzzy_match: true,
            reverse_mode: ReverseMode::Distance,
            routing: false,
            clip_bbox: false,
        }
    }
}

impl ValidatedOptions {
    /// The primary requested language, if any.
    #[must_use]
    pub fn primary_language(&self) -> Option<&str> {
        self.languages.first().map(String::as_str)
    }

    /// Whether strict language filtering is on.
    #[must_use]
    pub const fn is_strict_language(&self) -> bool {
        matches!(self.language_mode, Some(LanguageMode::Strict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn reverse_mode_parses_lowercase() {
        assert_eq!(ReverseMode::from_str("score").unwrap(), ReverseMode::Score);
        assert_eq!(ReverseMode::Distance.to_string(), "distance");
        assert!(ReverseMode::from_str("nearest").is_err());
    }

    #[test]
    fn language_mode_parses_strict_only() {
        assert_eq!(LanguageMode::from_str("strict").unwrap(), LanguageMode::Strict);
        assert!(LanguageMode::from_str("loose").is_err());
    }

    #[test]
    fn query_options_accept_mixed_key_styles() {
        let options: QueryOptions = serde_json::from_value(serde_json::json!({
            "proximity": [1.0, 2.0],
            "languageMode": "strict",
            "fuzzyMatch": false,
            "allow_dupes": true,
            "limit_verify": 3
        }))
        .unwrap();

        assert_eq!(options.proximity, Some(vec![1.0, 2.0]));
        assert_eq!(options.language_mode.as_deref(), Some("strict"));
        assert_eq!(options.fuzzy_match, Some(false));
        assert!(options.allow_dupes);
        assert_eq!(options.limit_verify, Some(3));
        assert_eq!(options.autocomplete, None);
    }

    #[test]
    fn validated_defaults() {
        let options = ValidatedOptions::default();
        assert_eq!(options.limit, DEFAULT_LIMIT);
        assert!(options.autocomplete);
        assert!(options.fuzzy_match);
        assert_eq!(options.primary_language(), None);
    }
}
