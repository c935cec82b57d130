//! Error types for EntityLens.
//!
//! Library crates use [`EntityLensError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all EntityLens operations.
#[derive(Debug, thiserror::Error)]
pub enum EntityLensError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level HTTP error talking to an external service.
    #[error("network error: {0}")]
    Network(String),

    /// Search or document fetch failed for a single query.
    #[error("retrieval failure: {0}")]
    Retrieval(String),

    /// The language-model service returned an error or an unusable envelope.
    #[error("llm error: {0}")]
    Llm(String),

    /// A model response did not have the structural shape a stage expects.
    #[error("malformed model output at stage `{stage}`: {message}")]
    MalformedModelOutput { stage: String, message: String },

    /// A run produced nothing to work with (e.g. no entities).
    #[error("degenerate run: {0}")]
    DegenerateRun(String),

    /// Input parsing error (metadata files, records).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (broken invariant, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EntityLensError>;

impl EntityLensError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a malformed-output error for the given pipeline stage.
    pub fn malformed(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedModelOutput {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a malformed model response.
    pub fn is_malformed_output(&self) -> bool {
        matches!(self, Self::MalformedModelOutput { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = EntityLensError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = EntityLensError::validation("entity count mismatch");
        assert!(err.to_string().contains("entity count mismatch"));
    }

    #[test]
    fn malformed_output_names_stage() {
        let err = EntityLensError::malformed("ner", "expected a list");
        assert!(err.is_malformed_output());
        assert_eq!(
            err.to_string(),
            "malformed model output at stage `ner`: expected a list"
        );
        assert!(!EntityLensError::Retrieval("timeout".into()).is_malformed_output());
    }
}
