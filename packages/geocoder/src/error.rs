//! Error types for the geocoder.
//!
//! Three layers, one enum each:
//!
//! 1. [`ConfigError`]: index configuration failed to load or compile
//! 2. [`SourceError`]: a collaborator (tile, feature or phrase source) failed
//! 3. [`GeocodeError`]: what a geocode call returns, with a stable [`ErrorCode`]

use std::sync::Arc;

use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use waymark_geocoder_models::feature::FeatureError;
use waymark_geocoder_models::properties::PropertiesError;
use waymark_text::TextError;

/// Errors raised by storage collaborators.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Reading from the backing store failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A payload could not be decoded.
    #[error("Decode error: {message}")]
    Decode {
        /// What failed to decode.
        message: String,
    },

    /// A JSON payload was malformed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A requested record does not exist where it must.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other collaborator failure.
    #[error("{0}")]
    Other(String),

    /// A failure shared by every caller waiting on the same fetch.
    #[error(transparent)]
    Shared(#[from] Arc<SourceError>),
}

/// Errors raised while loading index configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML document did not parse.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Reading the configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration parsed but is not usable.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// What is wrong with it.
        message: String,
    },

    /// A replacement rule did not compile.
    #[error(transparent)]
    Text(#[from] TextError),

    /// A fixture feature is malformed.
    #[error("Invalid feature: {0}")]
    Feature(#[from] FeatureError),

    /// The word set of an index could not be built.
    #[error("Word set error: {0}")]
    Words(#[from] fst::Error),

    /// A feature collection is not valid JSON.
    #[error("Invalid feature collection: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Stable machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum ErrorCode {
    /// Invalid query or options.
    #[strum(serialize = "EINVALID")]
    Invalid,
    /// A collaborator failed.
    #[strum(serialize = "ESOURCE")]
    Source,
    /// Stored data is missing required fields.
    #[strum(serialize = "EINTEGRITY")]
    Integrity,
    /// A spawned query task failed.
    #[strum(serialize = "EJOIN")]
    Join,
}

/// Errors returned by a geocode call.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// The query or its options failed validation. No I/O was done.
    #[error("{message}")]
    Invalid {
        /// Human-readable reason.
        message: String,
    },

    /// A collaborator failed mid-query.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A loaded feature is missing data the formatter requires.
    #[error("{message}")]
    Integrity {
        /// What was missing.
        message: String,
    },

    /// A spawned query task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl GeocodeError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub(crate) fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// The stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Invalid { .. } => ErrorCode::Invalid,
            Self::Source(_) => ErrorCode::Source,
            Self::Integrity { .. } => ErrorCode::Integrity,
            Self::Join(_) => ErrorCode::Join,
        }
    }
}

impl From<PropertiesError> for GeocodeError {
    fn from(err: PropertiesError) -> Self {
        Self::Integrity {
            message: err.to_string(),
        }
    }
}
