#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Text processing for the waymark geocoder.
//!
//! Everything here is pure and synchronous. The same functions run at query
//! time (to turn a raw query into tokens the phrase index understands) and
//! at index time (to enumerate the phrases a feature should be findable by).
//!
//! - [`tokenize`]: split raw text into owner-tracked tokens
//! - [`diacritics`]: fold accented Latin letters to ASCII
//! - [`replacer`]: simple, complex, and global token replacement rules
//! - [`termops`]: address numbers, permutations, numeric templating
//! - [`closest_lang`]: pick the best localized text for a requested language

pub mod closest_lang;
pub mod diacritics;
pub mod replacer;
pub mod termops;
pub mod tokenize;

pub use replacer::{ComplexReplacer, GlobalReplacer, ReplacementTarget, SimpleReplacer};
pub use tokenize::{TokenizedQuery, normalize_query, tokenize};

use thiserror::Error;

/// Errors raised while building rule tables or indexable text.
#[derive(Debug, Error)]
pub enum TextError {
    /// A replacement pattern failed to compile.
    #[error("Invalid replacement pattern {pattern:?}: {source}")]
    Pattern {
        /// The pattern as configured.
        pattern: String,
        /// Compilation failure.
        source: regex::Error,
    },

    /// A `carmen:text_<lang>` key names an unknown language.
    #[error("{0} is an invalid language code")]
    InvalidLanguage(String),
}
