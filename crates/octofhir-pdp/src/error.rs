//! Error types for the policy decision point.
//!
//! Errors are only produced by configuration-time operations: loading
//! documents, compiling the target index, parsing configuration and starting
//! file watchers. Decision streams never carry errors; every runtime failure
//! is turned into an `INDETERMINATE` decision instead.

use thiserror::Error;

/// Errors that can occur while configuring the decision point.
#[derive(Debug, Error)]
pub enum PdpError {
    /// A configuration value is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A document target could not be normalized into disjunctive normal form.
    #[error("Failed to compile target of document '{document}': {reason}")]
    Compile {
        /// Id of the offending document.
        document: String,
        /// Why normalization failed.
        reason: String,
    },

    /// Two documents in the same load share an id.
    #[error("Duplicate document id: {0}")]
    DuplicateDocument(String),

    /// The file watcher could not be started.
    #[error("Watcher error: {0}")]
    Watch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PdpError {
    /// Create a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new compile error for a document.
    pub fn compile(document: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Compile {
            document: document.into(),
            reason: reason.into(),
        }
    }

    /// Create a new watcher error.
    pub fn watch(message: impl Into<String>) -> Self {
        Self::Watch(message.into())
    }

    /// Returns `true` for errors caused by operator supplied configuration
    /// or documents, as opposed to the environment (I/O, watcher).
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Compile { .. }
                | Self::DuplicateDocument(_)
                | Self::Json(_)
                | Self::Toml(_)
        )
    }

    /// Id of the document this error is about, if any.
    pub fn document(&self) -> Option<&str> {
        match self {
            Self::Compile { document, .. } => Some(document),
            Self::DuplicateDocument(id) => Some(id),
            _ => None,
        }
    }
}

/// Convenience result type for decision point operations.
pub type PdpResult<T> = std::result::Result<T, PdpError>;
