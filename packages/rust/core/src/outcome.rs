//! Render-result contract returned to callers.

use auditdoc_shared::AuditDocError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A document rendered and uploaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSuccess {
    /// Always `"completed"`.
    pub status: &'static str,
    pub document_locator: String,
    pub generated_at: DateTime<Utc>,
    pub warnings: Vec<String>,
    pub report_id: String,
    pub template_id: String,
    pub project_id: String,
    pub size_bytes: usize,
    pub sha256: String,
    /// True when the canonical document came from the cache.
    pub from_cache: bool,
}

/// Why a document was not produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderFailure {
    pub error_code: &'static str,
    pub message: String,
    pub missing_fields: Vec<String>,
    /// True only when nothing critical is missing.
    pub can_proceed: bool,
    /// Retrying the same request may succeed.
    pub transient: bool,
}

impl From<&AuditDocError> for RenderFailure {
    fn from(err: &AuditDocError) -> Self {
        let missing_fields = match err {
            AuditDocError::IncompleteData { missing_fields, .. } => missing_fields.clone(),
            _ => Vec::new(),
        };
        Self {
            error_code: err.error_code(),
            message: err.to_string(),
            can_proceed: false,
            missing_fields,
            transient: err.is_transient(),
        }
    }
}

/// Either shape, serialized without a tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RenderResult {
    Success(RenderSuccess),
    Failure(RenderFailure),
}

impl RenderResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<auditdoc_shared::Result<RenderSuccess>> for RenderResult {
    fn from(result: auditdoc_shared::Result<RenderSuccess>) -> Self {
        match result {
            Ok(success) => Self::Success(success),
            Err(err) => Self::Failure(RenderFailure::from(&err)),
        }
    }
}
