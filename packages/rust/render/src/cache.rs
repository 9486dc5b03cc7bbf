//! Template sources and the parse-once template cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use auditdoc_shared::{AuditDocError, Result};

use crate::docx::ParsedTemplate;

/// Where template packages come from.
pub trait TemplateSource: Send + Sync {
    /// Raw `.docx` bytes for `template_id`.
    fn load(&self, template_id: &str) -> Result<Vec<u8>>;
}

/// Templates stored as `<dir>/<id>.docx`.
#[derive(Debug, Clone)]
pub struct DirTemplateSource {
    dir: PathBuf,
}

impl DirTemplateSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, template_id: &str) -> Result<PathBuf> {
        let valid = !template_id.is_empty()
            && template_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !template_id.contains("..");
        if !valid {
            return Err(AuditDocError::rendering(format!(
                "invalid template id '{template_id}'"
            )));
        }
        Ok(self.dir.join(format!("{template_id}.docx")))
    }
}

impl TemplateSource for DirTemplateSource {
    fn load(&self, template_id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(template_id)?;
        if !path.is_file() {
            return Err(AuditDocError::rendering(format!(
                "template not found: {template_id} ({})",
                path.display()
            )));
        }
        std::fs::read(&path).map_err(|e| AuditDocError::io(path, e))
    }
}

/// Templates held in memory, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateSource {
    templates: HashMap<String, Vec<u8>>,
}

impl MemoryTemplateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, template_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.templates.insert(template_id.into(), bytes);
        self
    }
}

impl TemplateSource for MemoryTemplateSource {
    fn load(&self, template_id: &str) -> Result<Vec<u8>> {
        self.templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| AuditDocError::rendering(format!("template not found: {template_id}")))
    }
}

// ---------------------------------------------------------------------------
// TemplateCache
// ---------------------------------------------------------------------------

/// Parsed templates, loaded lazily and kept until [`TemplateCache::clear`].
///
/// Entries are immutable once inserted, so concurrent renders share them
/// behind an `Arc` and only take the read lock.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: RwLock<HashMap<String, Arc<ParsedTemplate>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, template_id: &str) -> Option<Arc<ParsedTemplate>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(template_id)
            .cloned()
    }

    /// Insert a parsed template. If another caller cached the same id
    /// first, that entry is kept and returned.
    pub fn insert(&self, template: ParsedTemplate) -> Arc<ParsedTemplate> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(template.id().to_string())
            .or_insert_with(|| Arc::new(template))
            .clone()
    }

    /// Ids currently cached, sorted.
    pub fn template_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached template; the next render reloads from the source.
    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
