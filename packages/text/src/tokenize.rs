//! Query tokenization.
//!
//! A [`TokenizedQuery`] keeps three parallel arrays: the tokens themselves,
//! the separator that followed each token in the input, and an `owner`
//! index mapping every token back to the input token it came from. Token
//! replacement may collapse several tokens into one (leaving empty slots
//! owned by the first) or expand one token into several words; ownership
//! survives both so matched positions can be mapped back onto the query.

use std::sync::LazyLock;

use regex::Regex;

use crate::diacritics::strip_diacritics;

/// Joins `1-2`, `1/2`, `1-2a`, `1/2-3b` style numbers back into one token.
static NUMBER_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(-|/)(\d+)((-|/)(\d+))?[a-z]?$").expect("valid regex")
});

static EMOJI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"([#0-9]\x{20E3})",
        r"|[\x{A9}\x{AE}\x{203C}\x{2047}-\x{2049}\x{2122}\x{2139}\x{3030}\x{303D}\x{3297}\x{3299}][\x{FE00}-\x{FEFF}]?",
        r"|[\x{2190}-\x{21FF}][\x{FE00}-\x{FEFF}]?",
        r"|[\x{2300}-\x{23FF}][\x{FE00}-\x{FEFF}]?",
        r"|[\x{2460}-\x{24FF}][\x{FE00}-\x{FEFF}]?",
        r"|[\x{25A0}-\x{25FF}][\x{FE00}-\x{FEFF}]?",
        r"|[\x{2600}-\x{27BF}][\x{FE00}-\x{FEFF}]?",
        r"|[\x{2900}-\x{297F}][\x{FE00}-\x{FEFF}]?",
        r"|[\x{2B00}-\x{2BF0}][\x{FE00}-\x{FEFF}]?",
        r"|[\x{1F000}-\x{1F6FF}][\x{FE00}-\x{FEFF}]?",
    ))
    .expect("valid regex")
});

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// A tokenized query with separator and ownership tracking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenizedQuery {
    /// Normalized tokens. Replacement may leave empty slots.
    pub tokens: Vec<String>,
    /// The separator that followed each token.
    pub separators: Vec<String>,
    /// Input token each token derives from.
    pub owner: Vec<usize>,
    /// Whether the final token was produced by a replacement.
    pub last_word: bool,
}

impl TokenizedQuery {
    /// Number of tokens.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether there are no tokens.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokens joined by single spaces.
    #[must_use]
    pub fn text(&self) -> String {
        self.tokens.join(" ")
    }
}

/// Whether `c` splits words.
///
/// Covers whitespace, general and supplemental punctuation, ASCII
/// punctuation, and the fullwidth punctuation forms.
#[must_use]
pub const fn is_word_separator(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '\u{2000}'..='\u{206F}'
                | '\u{2E00}'..='\u{2E7F}'
                | '\u{21}'..='\u{2F}'
                | '\u{3A}'..='\u{40}'
                | '\u{5B}'..='\u{60}'
                | '\u{7B}'..='\u{7E}'
                | '\u{FF01}'..='\u{FF0F}'
                | '\u{FF1A}'..='\u{FF20}'
                | '\u{FF3B}'..='\u{FF40}'
                | '\u{FF5B}'..='\u{FF65}'
        )
}

const fn is_collapsed(c: char) -> bool {
    matches!(
        c,
        '\u{2018}' | '\u{2019}' | '\u{02BC}' | '\u{02BB}' | '\u{FF07}' | '\'' | '.' | '^'
    )
}

const fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}')
}

/// Removes emoji and pictographic symbols.
#[must_use]
pub fn strip_emoji(text: &str) -> String {
    EMOJI_RE.replace_all(text, "").into_owned()
}

/// Splits `text` into `(word, separator)` pairs. `text` must not start
/// with a separator.
fn split_words(text: &str) -> Vec<(&str, &str)> {
    let mut parts = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let word_end = rest.find(is_word_separator).unwrap_or(rest.len());
        let (word, after) = rest.split_at(word_end);
        let sep_end = after
            .find(|c: char| !is_word_separator(c))
            .unwrap_or(after.len());
        let (sep, next) = after.split_at(sep_end);
        parts.push((word, sep));
        rest = next;
    }
    parts
}

/// Tokenizes raw text into lowercase tokens.
///
/// 1. Lowercase and drop apostrophes, periods, and carets
/// 2. Split on word separators, remembering each separator
/// 3. Rejoin `-` or `/` separated house numbers (`1-2`, `12/3a`)
/// 4. Split CJK ideographs into one token each
/// 5. Drop tokens made only of emoji
#[must_use]
pub fn tokenize(query: &str) -> TokenizedQuery {
    let lowered: String = query
        .to_lowercase()
        .chars()
        .filter(|c| !is_collapsed(*c))
        .collect();
    let trimmed = lowered.trim_start_matches(is_word_separator);

    let mut tokens = Vec::new();
    let mut separators = Vec::new();
    let mut tail: Option<(String, &str)> = None;

    for (word, sep) in split_words(trimmed) {
        let mut token = word.to_string();

        if let Some((tail_token, tail_sep)) = tail.take() {
            let combined = format!("{tail_token}{tail_sep}{token}");
            if NUMBER_RANGE_RE.is_match(&combined) {
                token = combined;
            } else {
                tokens.push(tail_token);
                separators.push(tail_sep.to_string());
            }
        }

        if token.is_empty() || strip_emoji(&token).is_empty() {
            continue;
        }

        if token.chars().any(is_cjk) {
            let mut run = String::new();
            for c in token.chars() {
                if is_cjk(c) {
                    if !run.is_empty() {
                        tokens.push(std::mem::take(&mut run));
                        separators.push(String::new());
                    }
                    tokens.push(c.to_string());
                    separators.push(String::new());
                } else {
                    run.push(c);
                }
            }
            if !run.is_empty() {
                tokens.push(run);
                separators.push(String::new());
            }
            continue;
        }

        if sep == "-" || sep == "/" {
            tail = Some((token, sep));
        } else {
            tokens.push(token);
            separators.push(sep.to_string());
        }
    }

    if let Some((tail_token, tail_sep)) = tail {
        tokens.push(tail_token);
        separators.push(tail_sep.to_string());
    }

    let owner = (0..tokens.len()).collect();
    TokenizedQuery {
        tokens,
        separators,
        owner,
        last_word: false,
    }
}

/// Parses a `lon,lat` query. Exactly two finite numbers are required.
#[must_use]
pub fn as_reverse(query: &str) -> Option<[f64; 2]> {
    let parts: Vec<&str> = query.splitn(3, ',').collect();
    let [lon, lat] = parts.as_slice() else {
        return None;
    };
    let lon = lon.trim().parse::<f64>().ok().filter(|n| n.is_finite())?;
    let lat = lat.trim().parse::<f64>().ok().filter(|n| n.is_finite())?;
    Some([lon, lat])
}

/// Drops emoji and diacritics and collapses whitespace.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let folded = strip_emoji(&strip_diacritics(text));
    WHITESPACE_RE.replace_all(folded.trim(), " ").into_owned()
}

/// Cleans a replaced query for phrase matching.
///
/// Empty slots left by span replacements are removed and multi-word
/// replacement outputs are split into one token per word, each keeping the
/// owner of the token it came from. Never mutates `query`.
#[must_use]
pub fn normalize_query(query: &TokenizedQuery) -> TokenizedQuery {
    let mut normalized = TokenizedQuery {
        last_word: query.last_word,
        ..TokenizedQuery::default()
    };
    for ((token, sep), owner) in query
        .tokens
        .iter()
        .zip(&query.separators)
        .zip(&query.owner)
    {
        if token.is_empty() {
            continue;
        }
        if token.contains(' ') {
            for word in token.split(' ') {
                normalized.tokens.push(normalize_text(word));
                normalized.separators.push(" ".to_string());
                normalized.owner.push(*owner);
            }
        } else {
            normalized.tokens.push(normalize_text(token));
            normalized.separators.push(sep.clone());
            normalized.owner.push(*owner);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_simple_text() {
        let q = tokenize("Main Street, Springfield");
        assert_eq!(q.tokens, vec!["main", "street", "springfield"]);
        assert_eq!(q.separators, vec![" ", ", ", ""]);
        assert_eq!(q.owner, vec![0, 1, 2]);
        assert!(!q.last_word);
    }

    #[test]
    fn collapses_apostrophes_and_periods() {
        assert_eq!(tokenize("St. John's").tokens, vec!["st", "johns"]);
    }

    #[test]
    fn strips_leading_separators() {
        assert_eq!(tokenize("  ,, foo").tokens, vec!["foo"]);
    }

    #[test]
    fn joins_numeric_ranges() {
        assert_eq!(tokenize("1-2 main").tokens, vec!["1-2", "main"]);
        assert_eq!(tokenize("12/3a main").tokens, vec!["12/3a", "main"]);
        assert_eq!(tokenize("foo-bar").tokens, vec!["foo", "bar"]);
    }

    #[test]
    fn splits_cjk_ideographs() {
        let q = tokenize("北京市a1");
        assert_eq!(q.tokens, vec!["北", "京", "市", "a1"]);
        assert!(q.separators.iter().all(String::is_empty));
    }

    #[test]
    fn drops_emoji_only_tokens() {
        assert_eq!(tokenize("pizza 🍕").tokens, vec!["pizza"]);
    }

    #[test]
    fn empty_query_has_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize(" ,.").is_empty());
    }

    #[test]
    fn reverse_requires_two_numbers() {
        assert_eq!(as_reverse("-122.5, 37.7"), Some([-122.5, 37.7]));
        assert_eq!(as_reverse("1,2,3"), None);
        assert_eq!(as_reverse("main,street"), None);
        assert_eq!(as_reverse("1"), None);
    }

    #[test]
    fn normalize_query_splits_multiword_tokens() {
        let query = TokenizedQuery {
            tokens: vec!["saint louis".into(), String::new(), "café".into()],
            separators: vec![" ".into(), " ".into(), String::new()],
            owner: vec![0, 0, 2],
            last_word: false,
        };
        let normalized = normalize_query(&query);
        assert_eq!(normalized.tokens, vec!["saint", "louis", "cafe"]);
        assert_eq!(normalized.owner, vec![0, 0, 2]);
        assert_eq!(query.tokens[0], "saint louis");
    }
}
