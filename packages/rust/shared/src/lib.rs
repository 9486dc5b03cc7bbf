//! Shared types, error model, and configuration for auditdoc.
//!
//! This crate is the foundation depended on by all other auditdoc crates.
//! It provides:
//! - [`AuditDocError`]: the unified error type
//! - The canonical document model ([`CanonicalDocument`], [`Assessment`], [`Summary`])
//! - The fixed review-area set and its alias table ([`ReviewArea`])
//! - Configuration ([`AppConfig`], config loading)

pub mod areas;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use areas::{N_FIXED_AREAS, ReviewArea, normalize_prefix};
pub use config::{
    AppConfig, CacheConfig, GenerationConfig, OutputConfig, SourceConfig, TemplatesConfig,
    config_dir, config_file_path, expand_home, init_config, load_config, load_config_from,
    source_token,
};
pub use error::{AuditDocError, Result};
pub use types::{
    Assessment, CanonicalDocument, ErfItem, ExitConferenceFormat, Finding, ProgramManagerInfo,
    ProjectInfo, RawProjectBundle, ReportId, ReviewType, ReviewerInfo, SCHEMA_VERSION, Summary,
};
