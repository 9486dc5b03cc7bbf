//! Upload seam for rendered documents.
//!
//! The pipeline hands rendered bytes and a key to a [`DocumentUploader`]
//! and records the returned locator. An upload is all-or-nothing: a failed
//! upload leaves nothing readable under the key. A local write that has
//! started finishes even when the request is cancelled; keys carry a unique
//! report id, so such a late file never replaces another report.

use std::future::Future;
use std::path::{Component, Path, PathBuf};

use auditdoc_shared::{AuditDocError, ReportId, Result};
use tracing::{info, instrument};
use url::Url;

/// Destination for rendered documents.
pub trait DocumentUploader: Send + Sync {
    /// Store `bytes` under `key`; returns a locator usable to fetch them back.
    fn upload(&self, key: &str, bytes: &[u8]) -> impl Future<Output = Result<String>> + Send;
}

/// Object key for a rendered report: `documents/<project>/<template>_<report>.docx`.
pub fn document_key(project_id: &str, template_id: &str, report_id: &ReportId) -> String {
    let template_id = template_id.strip_suffix(".docx").unwrap_or(template_id);
    format!("documents/{project_id}/{template_id}_{report_id}.docx")
}

/// Writes documents under a local directory and returns `file://` locators.
#[derive(Debug, Clone)]
pub struct LocalDirUploader {
    root: PathBuf,
}

impl LocalDirUploader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(AuditDocError::Storage(format!("invalid upload key '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

impl DocumentUploader for LocalDirUploader {
    #[instrument(skip_all, fields(key = %key, bytes = bytes.len()))]
    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let target = self.target(key)?;
        let bytes = bytes.to_vec();

        // Runs to completion even if the awaiting request is cancelled, so a
        // partial file is always either renamed or removed.
        let absolute = tokio::task::spawn_blocking(move || write_atomically(&target, &bytes))
            .await
            .map_err(|e| AuditDocError::Storage(format!("upload {key}: {e}")))?
            .map_err(|e| AuditDocError::Storage(format!("upload {key}: {e}")))?;

        let locator = Url::from_file_path(&absolute).map_err(|_| {
            AuditDocError::Storage(format!("no file URL for {}", absolute.display()))
        })?;
        info!(locator = %locator, "document uploaded");
        Ok(locator.to_string())
    }
}

/// Write `bytes` to a sibling `.partial` file and rename it over `target`.
/// Readers only ever see the final name once the bytes are complete.
fn write_atomically(target: &Path, bytes: &[u8]) -> std::io::Result<PathBuf> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let partial = target.with_extension("docx.partial");
    let written = std::fs::write(&partial, bytes).and_then(|()| std::fs::rename(&partial, target));
    if let Err(e) = written {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }
    std::fs::canonicalize(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use uuid::Uuid;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("auditdoc_upload_{}", Uuid::now_v7()))
    }

    #[test]
    fn keys_are_namespaced_by_project() {
        let report_id = ReportId("rpt-20250320-143000-abcd1234".into());
        assert_eq!(
            document_key("33", "draft-audit-report.docx", &report_id),
            "documents/33/draft-audit-report_rpt-20250320-143000-abcd1234.docx"
        );
    }

    #[tokio::test]
    async fn upload_writes_atomically_and_returns_file_url() {
        let root = temp_root();
        let uploader = LocalDirUploader::new(&root);

        let locator = uploader
            .upload("documents/33/report.docx", b"PK\x03\x04bytes")
            .await
            .unwrap();

        assert!(locator.starts_with("file://"));
        let path = Url::parse(&locator).unwrap().to_file_path().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"PK\x03\x04bytes");
        assert!(!path.with_extension("docx.partial").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn cancelled_upload_leaves_no_partial_file() {
        let root = temp_root();
        let uploader = LocalDirUploader::new(&root);
        let key = "documents/33/cancelled.docx";
        let body = vec![7u8; 4 * 1024 * 1024];

        // Usually cancelled while the blocking write is still running.
        let _ = tokio::time::timeout(Duration::ZERO, uploader.upload(key, &body)).await;

        let target = root.join(key);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !target.exists() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!target.with_extension("docx.partial").exists());
        assert_eq!(std::fs::read(&target).unwrap().len(), body.len());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let uploader = LocalDirUploader::new(temp_root());
        for key in ["", "../outside.docx", "/etc/passwd", "documents/../../x.docx"] {
            let err = uploader.upload(key, b"x").await.unwrap_err();
            assert!(matches!(err, AuditDocError::Storage(_)), "{key}");
        }
    }
}
