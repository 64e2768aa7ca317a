//! Compiled indexes.
//!
//! An [`Index`] pairs an [`IndexConfig`] with its collaborators and the
//! values derived from it once at startup: its ordinal, name bit, the set
//! of indexes it may never stack with, and its compiled token replacers.
//! The [`IndexSet`] holds every index in hierarchy order plus lookups by
//! name, type and stack.

use std::collections::{BTreeMap, BTreeSet};

use waymark_text::replacer::categorize;
use waymark_text::{ComplexReplacer, GlobalReplacer, SimpleReplacer};

use crate::config::{GeocoderConfig, IndexConfig, MAX_INDEX_NAMES};
use crate::error::ConfigError;
use crate::source::IndexSource;

/// One index, ready to query.
#[derive(Debug)]
pub struct Index {
    /// Ordinal in the set.
    pub idx: usize,
    /// Configuration as loaded.
    pub config: IndexConfig,
    /// Index name.
    pub name: String,
    /// Primary type.
    pub kind: String,
    /// Every type served.
    pub types: Vec<String>,
    /// Ordinal of the name among distinct names.
    pub ndx: usize,
    /// Bit of the name among distinct names.
    pub nmask: u64,
    /// Ordinals of indexes whose stacks are disjoint from this one's.
    pub bmask: BTreeSet<usize>,
    /// Stacks, lowercased.
    pub stacks: Vec<String>,
    /// Category phrases, lowercased.
    pub categories: BTreeSet<String>,
    /// Regex rules applied to queries.
    pub query_replacer: ComplexReplacer,
    /// Whole-word swaps.
    pub simple_replacer: SimpleReplacer,
    /// Collaborators.
    pub source: IndexSource,
}

impl Index {
    /// Whether this index holds address data.
    #[must_use]
    pub const fn is_address(&self) -> bool {
        self.config.address
    }

    /// Grid zoom.
    #[must_use]
    pub const fn zoom(&self) -> u8 {
        self.config.grid_zoom()
    }

    /// Tile zoom.
    #[must_use]
    pub const fn tile_zoom(&self) -> u8 {
        self.config.zoom
    }

    /// `[w, s, e, n]` extent.
    #[must_use]
    pub const fn bounds(&self) -> [f64; 4] {
        self.config.bounds
    }
}

/// Every index, in hierarchy order.
#[derive(Debug)]
pub struct IndexSet {
    indexes: Vec<Index>,
    by_name: BTreeMap<String, Vec<usize>>,
    by_type: BTreeMap<String, Vec<usize>>,
    by_subtype: BTreeMap<String, Vec<usize>>,
    by_stack: BTreeMap<String, Vec<usize>>,
    global: GlobalReplacer,
    min_score: f64,
    max_score: f64,
}

impl IndexSet {
    /// Compiles indexes from configurations and their collaborators.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Invalid`] if `sources` does not have one entry per
    ///   configured index, or too many names are used
    /// * [`ConfigError::Text`] if a replacement rule does not compile
    pub fn new(config: &GeocoderConfig, sources: Vec<IndexSource>) -> Result<Self, ConfigError> {
        if sources.len() != config.indexes.len() {
            return Err(ConfigError::invalid(format!(
                "Expected {} index sources, got {}",
                config.indexes.len(),
                sources.len()
            )));
        }

        let mut names: Vec<String> = Vec::new();
        for index in &config.indexes {
            if !names.iter().any(|n| n == index.name()) {
                names.push(index.name().to_string());
            }
        }
        if names.len() > MAX_INDEX_NAMES {
            return Err(ConfigError::invalid(format!(
                "At most {MAX_INDEX_NAMES} index names are supported"
            )));
        }

        let all_stacks: Vec<Vec<String>> = config.indexes.iter().map(IndexConfig::stacks).collect();

        let mut indexes = Vec::with_capacity(sources.len());
        for (idx, (index_config, source)) in config.indexes.iter().zip(sources).enumerate() {
            let ndx = names
                .iter()
                .position(|n| n == index_config.name())
                .unwrap_or_default();
            let stacks = all_stacks[idx].clone();
            let bmask = all_stacks
                .iter()
                .enumerate()
                .filter(|(_, other)| {
                    !stacks.is_empty()
                        && !other.is_empty()
                        && !other.iter().any(|s| stacks.contains(s))
                })
                .map(|(j, _)| j)
                .collect();

            let categorized = categorize(&index_config.tokens);
            indexes.push(Index {
                idx,
                name: index_config.name().to_string(),
                kind: index_config.kind().to_string(),
                types: index_config.types(),
                ndx,
                nmask: 1u64 << ndx,
                bmask,
                stacks,
                categories: index_config
                    .categories
                    .iter()
                    .map(|c| c.to_lowercase())
                    .collect(),
                query_replacer: ComplexReplacer::new(&categorized.complex, false)?,
                simple_replacer: SimpleReplacer::new(
                    categorized
                        .simple
                        .iter()
                        .map(|(from, to)| (from.as_str(), to.as_str())),
                ),
                config: index_config.clone(),
                source,
            });
        }

        let mut set = Self {
            by_name: BTreeMap::new(),
            by_type: BTreeMap::new(),
            by_subtype: BTreeMap::new(),
            by_stack: BTreeMap::new(),
            global: GlobalReplacer::new(&config.global_tokens)?,
            min_score: indexes
                .iter()
                .map(|i| i.source.min_score)
                .fold(f64::INFINITY, f64::min)
                .min(0.0),
            max_score: indexes
                .iter()
                .map(|i| i.source.max_score)
                .fold(0.0, f64::max),
            indexes,
        };

        for index in &set.indexes {
            set.by_name
                .entry(index.name.clone())
                .or_default()
                .push(index.idx);
            for kind in &index.types {
                set.by_type.entry(kind.clone()).or_default().push(index.idx);
            }
            for sub in index.config.scoreranges.keys() {
                set.by_subtype
                    .entry(format!("{}.{sub}", index.kind))
                    .or_default()
                    .push(index.idx);
            }
            for stack in &index.stacks {
                set.by_stack.entry(stack.clone()).or_default().push(index.idx);
            }
        }

        log::debug!(
            "Compiled {} indexes ({} names, score range {}..{})",
            set.indexes.len(),
            names.len(),
            set.min_score,
            set.max_score
        );
        Ok(set)
    }

    /// Number of indexes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    /// Whether there are no indexes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// The index with ordinal `idx`.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Index> {
        self.indexes.get(idx)
    }

    /// Every index, in hierarchy order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Index> {
        self.indexes.iter()
    }

    /// Ordinals of indexes named `name`.
    #[must_use]
    pub fn by_name(&self, name: &str) -> &[usize] {
        self.by_name.get(name).map_or(&[], Vec::as_slice)
    }

    /// Ordinals of indexes serving `kind`, or the `type.subtype` form of a
    /// scored subtype.
    #[must_use]
    pub fn by_type(&self, kind: &str) -> &[usize] {
        self.by_type
            .get(kind)
            .or_else(|| self.by_subtype.get(kind))
            .map_or(&[], Vec::as_slice)
    }

    /// Whether `kind` is a served type or scored subtype.
    #[must_use]
    pub fn is_known_type(&self, kind: &str) -> bool {
        !self.by_type(kind).is_empty()
    }

    /// Every served type and scored subtype, sorted.
    #[must_use]
    pub fn known_types(&self) -> Vec<&str> {
        self.by_type
            .keys()
            .chain(self.by_subtype.keys())
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether any index belongs to `stack`.
    #[must_use]
    pub fn is_known_stack(&self, stack: &str) -> bool {
        self.by_stack.contains_key(stack)
    }

    /// Every stack, sorted.
    #[must_use]
    pub fn known_stacks(&self) -> Vec<&str> {
        self.by_stack.keys().map(String::as_str).collect()
    }

    /// Rewrites applied to raw query text.
    #[must_use]
    pub const fn global_replacer(&self) -> &GlobalReplacer {
        &self.global
    }

    /// Lowest score across indexes, never above zero.
    #[must_use]
    pub const fn min_score(&self) -> f64 {
        self.min_score
    }

    /// Highest score across indexes.
    #[must_use]
    pub const fn max_score(&self) -> f64 {
        self.max_score
    }
}
