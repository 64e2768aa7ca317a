//! Token replacement rule tables.
//!
//! Index configurations declare replacements as a map from pattern to
//! target (`"Street" = "St"`). [`categorize`] splits them in two:
//!
//! * **Simple** rules are exact lowercase whole-word swaps, applied only at
//!   index time by [`SimpleReplacer`].
//! * **Complex** rules are case-insensitive regexes that may span several
//!   tokens or reference capture groups. They are compiled once into an
//!   ordered rule table by [`ComplexReplacer`] and applied at both query
//!   and index time.
//!
//! [`GlobalReplacer`] holds substring rewrites applied to raw text before
//! tokenization.
//!
//! Rule order changes output. Complex tables are sorted so anchored
//! (whole-token) rules run before substring rules, and among anchored rules
//! a longer pattern runs first.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::TextError;
use crate::diacritics::strip_diacritics;
use crate::tokenize::TokenizedQuery;

/// Maximum number of alternative strings produced by
/// [`ComplexReplacer::enumerate`].
pub const MAX_REPLACEMENT_VARIANTS: usize = 8;

/// Maximum number of alternatives tracked for a single token position.
pub const REPLACEMENT_DEPTH_LIMIT: usize = 8;

static INNER_WORD_BOUNDARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^-.\s][-.\s][^-.\s]").expect("valid regex"));

static GROUP_REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+|\{\w+\})").expect("valid regex"));

/// The target side of a configured replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplacementTarget {
    /// Plain replacement text.
    Text(String),
    /// Replacement text with matching options.
    Options {
        /// Replacement text, possibly with `$1` group references.
        text: String,
        /// Number of token boundaries the pattern spans.
        #[serde(default, rename = "spanBoundaries")]
        span_boundaries: Option<usize>,
        /// Match anywhere in a token instead of the whole token.
        #[serde(default, rename = "skipBoundaries")]
        skip_boundaries: bool,
        /// Do not add a diacritic-stripped copy of the pattern.
        #[serde(default, rename = "skipDiacriticStripping")]
        skip_diacritic_stripping: bool,
    },
}

impl ReplacementTarget {
    /// The replacement text.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) | Self::Options { text, .. } => text,
        }
    }

    const fn span_boundaries(&self) -> Option<usize> {
        match self {
            Self::Text(_) => None,
            Self::Options {
                span_boundaries, ..
            } => *span_boundaries,
        }
    }

    const fn skip_boundaries(&self) -> bool {
        matches!(
            self,
            Self::Options {
                skip_boundaries: true,
                ..
            }
        )
    }

    const fn skip_diacritic_stripping(&self) -> bool {
        matches!(
            self,
            Self::Options {
                skip_diacritic_stripping: true,
                ..
            }
        )
    }

    fn with_text(&self, text: String) -> Self {
        match self {
            Self::Text(_) => Self::Text(text),
            Self::Options {
                span_boundaries,
                skip_boundaries,
                skip_diacritic_stripping,
                ..
            } => Self::Options {
                text,
                span_boundaries: *span_boundaries,
                skip_boundaries: *skip_boundaries,
                skip_diacritic_stripping: *skip_diacritic_stripping,
            },
        }
    }
}

/// Configured replacements split by how they are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Categorized {
    /// Lowercase, diacritic-free whole-word swaps.
    pub simple: Vec<(String, String)>,
    /// Rules needing the regex replacer.
    pub complex: Vec<(String, ReplacementTarget)>,
}

/// Splits configured replacements into simple and complex rules.
///
/// A rule is complex when it sets any matching option, references a
/// capture group, or has a word boundary inside its pattern or text.
#[must_use]
pub fn categorize(tokens: &BTreeMap<String, ReplacementTarget>) -> Categorized {
    let mut categorized = Categorized::default();
    for (from, target) in tokens {
        let complex = target.span_boundaries().is_some_and(|n| n > 0)
            || target.skip_boundaries()
            || target.skip_diacritic_stripping()
            || (matches!(target, ReplacementTarget::Text(_))
                && (GROUP_REFERENCE_RE.is_match(target.text())
                    || INNER_WORD_BOUNDARY_RE.is_match(from)
                    || INNER_WORD_BOUNDARY_RE.is_match(target.text())));

        if complex {
            categorized.complex.push((from.clone(), target.clone()));
        } else {
            categorized.simple.push((
                strip_diacritics(&from.to_lowercase()),
                strip_diacritics(&target.text().to_lowercase()),
            ));
        }
    }
    categorized
}

/// Exact whole-word swaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleReplacer {
    words: BTreeMap<String, String>,
}

impl SimpleReplacer {
    /// Builds a replacer from `(from, to)` pairs. Both sides are lowercased.
    #[must_use]
    pub fn new<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            words: pairs
                .into_iter()
                .map(|(from, to)| (from.to_lowercase(), to.to_lowercase()))
                .collect(),
        }
    }

    /// Whether no rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Swaps every token that has a replacement.
    #[must_use]
    pub fn replace(&self, tokens: &[String]) -> Vec<String> {
        tokens
            .iter()
            .map(|word| self.words.get(word).unwrap_or(word).clone())
            .collect()
    }
}

/// One compiled replacement rule.
#[derive(Debug, Clone)]
pub struct ReplaceRule {
    pattern: Regex,
    source: String,
    to: String,
    span_boundaries: usize,
    global: bool,
    inverse: bool,
}

impl ReplaceRule {
    /// The pattern text this rule was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The replacement template.
    #[must_use]
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Whether this is an auto-generated reverse rule.
    #[must_use]
    pub const fn is_inverse(&self) -> bool {
        self.inverse
    }

    /// Token positions covered by one match.
    #[must_use]
    pub const fn width(&self) -> usize {
        if self.global {
            1
        } else {
            self.span_boundaries + 1
        }
    }

    fn replace_whole(&self, text: &str) -> Option<String> {
        let caps = self.pattern.captures(text)?;
        let mut out = String::new();
        caps.expand(&self.to, &mut out);
        Some(out)
    }
}

fn compile(pattern: &str, anchored: bool) -> Result<Regex, TextError> {
    let source = if anchored {
        format!("^(?:{pattern})$")
    } else {
        pattern.to_string()
    };
    RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map_err(|source| TextError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Rewrites `$1` group references as `${1}` so a following letter is not
/// read as part of the group name.
fn expand_template(to: &str) -> String {
    let mut out = String::with_capacity(to.len() + 4);
    let mut chars = to.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek().is_some_and(char::is_ascii_digit) {
            out.push_str("${");
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                out.push(d);
                chars.next();
            }
            out.push('}');
        } else {
            out.push(c);
        }
    }
    out
}

/// Ordered regex replacement rules.
#[derive(Debug, Clone, Default)]
pub struct ComplexReplacer {
    rules: Vec<ReplaceRule>,
}

impl ComplexReplacer {
    /// Compiles `pairs` into a sorted rule table.
    ///
    /// Every pattern also gets a diacritic-stripped copy unless the rule
    /// opts out. With `include_unambiguous`, a target that only one pattern
    /// produces (and that is neither a pattern itself nor a template) also
    /// gets a reverse rule mapping it back.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Pattern`] if a pattern does not compile.
    pub fn new(
        pairs: &[(String, ReplacementTarget)],
        include_unambiguous: bool,
    ) -> Result<Self, TextError> {
        let mut pairs = pairs.to_vec();
        let mut inverse = BTreeSet::new();

        if include_unambiguous {
            let froms: BTreeSet<&str> = pairs.iter().map(|(from, _)| from.as_str()).collect();
            let mut by_target: BTreeMap<&str, Vec<ReplacementTarget>> = BTreeMap::new();
            for (from, target) in &pairs {
                by_target
                    .entry(target.text())
                    .or_default()
                    .push(target.with_text(from.clone()));
            }
            let reversed: Vec<(String, ReplacementTarget)> = by_target
                .into_iter()
                .filter(|(to, sources)| {
                    sources.len() == 1
                        && !froms.contains(to)
                        && !to.contains(['(', ')', '$'])
                })
                .filter_map(|(to, mut sources)| Some((to.to_string(), sources.pop()?)))
                .collect();
            for (to, target) in reversed {
                inverse.insert(to.clone());
                pairs.push((to, target));
            }
        }

        let mut rules = Vec::new();
        for (from, target) in &pairs {
            let is_inverse = inverse.contains(from);
            let to = expand_template(target.text());
            let stripped = strip_diacritics(from);
            let mut patterns = vec![from.clone()];
            if stripped != *from && !target.skip_diacritic_stripping() {
                patterns.push(stripped);
            }

            for pattern in patterns {
                let global = target.skip_boundaries();
                let span_boundaries = target
                    .span_boundaries()
                    .unwrap_or_else(|| pattern.chars().filter(|c| c.is_whitespace()).count());
                rules.push(ReplaceRule {
                    pattern: compile(&pattern, !global)?,
                    source: pattern,
                    to: to.clone(),
                    span_boundaries,
                    global,
                    inverse: is_inverse,
                });
            }
        }

        rules.sort_by_key(|rule| (rule.global, std::cmp::Reverse(rule.source.chars().count())));
        log::trace!("compiled {} replacement rules", rules.len());

        Ok(Self { rules })
    }

    /// The compiled rules in application order.
    #[must_use]
    pub fn rules(&self) -> &[ReplaceRule] {
        &self.rules
    }

    /// Whether no rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Applies every rule to a copy of `query`.
    #[must_use]
    pub fn replace(&self, query: &TokenizedQuery) -> TokenizedQuery {
        let mut out = query.clone();
        apply_rules(self.rules.iter(), &mut out);
        out
    }

    /// Enumerates alternative spellings of `query`.
    ///
    /// Each token position collects the forms rules can rewrite it to, with
    /// canonicalizing rewrites placed before the original and reverse
    /// rewrites after it. The alternatives are then assembled left to
    /// right, most canonical first, up to [`MAX_REPLACEMENT_VARIANTS`].
    #[must_use]
    pub fn enumerate(&self, query: &TokenizedQuery) -> Vec<String> {
        if query.is_empty() {
            return Vec::new();
        }

        let mut terms: Vec<VecDeque<Variant>> = query
            .tokens
            .iter()
            .map(|t| {
                VecDeque::from([Variant {
                    text: t.clone(),
                    width: 1,
                }])
            })
            .collect();

        let rules: Vec<&ReplaceRule> = self.rules.iter().collect();
        collect_variants(&rules, query, 0, &mut terms);

        let mut out = Vec::new();
        assemble(&terms, 0, None, &mut out);
        out
    }
}

fn apply_rules<'a>(rules: impl IntoIterator<Item = &'a ReplaceRule> + Clone, query: &mut TokenizedQuery) {
    let len = query.tokens.len();
    for i in 0..len {
        for rule in rules.clone() {
            let width = rule.width();
            if width > 1 && i + width <= len {
                let part: String = (i..i + width)
                    .map(|j| format!("{}{}", query.tokens[j], query.separators[j]))
                    .collect();
                if let Some(replaced) = rule.replace_whole(part.trim()) {
                    query.tokens[i] = replaced;
                    for j in i + 1..i + width {
                        query.tokens[j] = String::new();
                        query.owner[j] = query.owner[i];
                    }
                    if i + width == len {
                        query.last_word = true;
                    }
                }
            } else if rule.global {
                let replaced = rule.pattern.replace_all(&query.tokens[i], rule.to.as_str());
                if replaced != query.tokens[i] {
                    query.tokens[i] = replaced.into_owned();
                }
            } else if let Some(replaced) = rule.replace_whole(&query.tokens[i]) {
                query.tokens[i] = replaced;
                if i + 1 == len {
                    query.last_word = true;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Variant {
    text: String,
    width: usize,
}

fn collect_variants(
    rules: &[&ReplaceRule],
    text: &TokenizedQuery,
    offset: usize,
    terms: &mut [VecDeque<Variant>],
) {
    for (k, rule) in rules.iter().enumerate() {
        let width = rule.width();
        for i in 0..text.tokens.len() {
            let end = (i + width).min(text.tokens.len());
            let mut segment = TokenizedQuery {
                tokens: text.tokens[i..end].to_vec(),
                separators: text.separators[i..end].to_vec(),
                owner: (0..end - i).collect(),
                last_word: false,
            };
            apply_rules([*rule], &mut segment);
            if segment.tokens[0] == text.tokens[i] {
                continue;
            }

            let slot = &mut terms[i + offset];
            let variant = Variant {
                text: segment.tokens[0].clone(),
                width,
            };
            if rule.inverse {
                slot.push_back(variant);
            } else {
                slot.push_front(variant);
            }

            if slot.len() < REPLACEMENT_DEPTH_LIMIT {
                let remaining: Vec<&ReplaceRule> = rules[k + 1..]
                    .iter()
                    .copied()
                    .filter(|next| next.source != rule.to)
                    .collect();
                if !remaining.is_empty() {
                    collect_variants(&remaining, &segment, i + offset, terms);
                }
            }
        }
    }
}

fn assemble(terms: &[VecDeque<Variant>], i: usize, prefix: Option<&str>, out: &mut Vec<String>) {
    for variant in &terms[i] {
        if out.len() >= MAX_REPLACEMENT_VARIANTS {
            break;
        }
        let text = prefix.map_or_else(|| variant.text.clone(), |p| format!("{p} {}", variant.text));
        if i + variant.width < terms.len() {
            assemble(terms, i + variant.width, Some(&text), out);
        } else {
            out.push(text);
        }
    }
}

/// Substring rewrites applied to raw text.
#[derive(Debug, Clone, Default)]
pub struct GlobalReplacer {
    rules: Vec<(Regex, String)>,
}

impl GlobalReplacer {
    /// Compiles a pattern-to-replacement map.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Pattern`] if a pattern does not compile.
    pub fn new(patterns: &BTreeMap<String, String>) -> Result<Self, TextError> {
        let rules = patterns
            .iter()
            .map(|(from, to)| Ok((compile(from, false)?, expand_template(to))))
            .collect::<Result<Vec<_>, TextError>>()?;
        Ok(Self { rules })
    }

    /// Whether no rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Applies every rule in order, trimming between rules.
    #[must_use]
    pub fn replace(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (pattern, to) in &self.rules {
            out = pattern.replace_all(out.trim(), to.as_str()).into_owned();
        }
        out.trim().to_string()
    }
}
