//! Error taxonomy shared by construction, ticks, and publishing.

use thiserror::Error;

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"generations[0].installed_capacity"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by a [`crate::telemetry::StateSink`].
#[derive(Debug, Clone, Error)]
#[error("sink error: {0}")]
pub struct SinkError(pub String);

/// Errors raised while building or running subsystems.
#[derive(Debug, Error)]
pub enum SimError {
    /// Profile descriptor names a source other than `range_30m`.
    #[error("unsupported profile source \"{0}\"")]
    UnsupportedProfileSource(String),

    /// Missing or invalid configuration discovered at construction.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Export price read on a generation that may not export.
    #[error("not allowed to read unit export price of \"{id}\": export is disabled")]
    ExportNotAllowed { id: String },

    /// Known gap in the simulated domain.
    #[error("{what} is not supported yet")]
    NotSupported { what: String },

    /// The state sink rejected a publication.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl SimError {
    pub fn not_supported(what: impl Into<String>) -> Self {
        Self::NotSupported { what: what.into() }
    }

    /// True for the "not supported yet" signal, so callers can skip it quietly.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported { .. })
    }
}

pub type Result<T, E = SimError> = std::result::Result<T, E>;
