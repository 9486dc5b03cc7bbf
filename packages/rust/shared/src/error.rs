//! Error types for auditdoc.
//!
//! Library crates use [`AuditDocError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all auditdoc operations.
#[derive(Debug, thiserror::Error)]
pub enum AuditDocError {
    /// Upstream fetch exhausted its retry budget.
    #[error("source unavailable: {endpoint} failed after {attempts} attempt(s): {message}")]
    SourceUnavailable {
        endpoint: String,
        attempts: u32,
        message: String,
    },

    /// Structural or invariant violation in a canonical document.
    #[error("schema invalid: {}", errors.join("; "))]
    SchemaInvalid { errors: Vec<String> },

    /// A critical template field is missing; generation is blocked.
    #[error("incomplete data: missing critical field(s) {}", missing_fields.join(", "))]
    IncompleteData {
        missing_fields: Vec<String>,
        quality_score: u8,
    },

    /// Unresolved merge field or template parse failure.
    #[error("rendering error: {0}")]
    Rendering(String),

    /// Cache database or document upload failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Upstream payload broke its contract (empty, zero controls, bad enum).
    #[error("transform error: {message}")]
    Transform { message: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Non-retryable HTTP failure (client error, undecodable body).
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The request-level generation budget elapsed.
    #[error("generation exceeded its {budget_secs}s budget")]
    GenerationTimeout { budget_secs: u64 },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AuditDocError>;

impl AuditDocError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a transform error from any displayable message.
    pub fn transform(msg: impl Into<String>) -> Self {
        Self::Transform {
            message: msg.into(),
        }
    }

    /// Create a rendering error from any displayable message.
    pub fn rendering(msg: impl Into<String>) -> Self {
        Self::Rendering(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code surfaced in render results.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "SOURCE_UNAVAILABLE",
            Self::SchemaInvalid { .. } => "SCHEMA_INVALID",
            Self::IncompleteData { .. } => "INCOMPLETE_DATA",
            Self::Rendering(_) => "RENDERING_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Transform { .. } => "TRANSFORM_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Io { .. } => "IO_ERROR",
            Self::GenerationTimeout { .. } => "GENERATION_TIMEOUT",
        }
    }

    /// Infrastructure failures where retrying the whole request may help.
    ///
    /// Data-quality errors (`SchemaInvalid`, `IncompleteData`, `Transform`),
    /// rejected requests (`Network`) and defects (`Rendering`) are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::Storage(_) | Self::GenerationTimeout { .. }
        )
    }
}
