//! Word template rendering.
//!
//! Templates are `.docx` packages whose main document, headers and footers
//! carry `{{ field }}` merge fields and `{% if %}` / `{% for %}` blocks
//! (`{%p ... %}` and `{%tr ... %}` scope a block to its paragraph or table
//! row). A template is parsed once, held in a [`TemplateCache`], and
//! rendered in memory; this crate never writes to persistent storage.

mod cache;
mod context;
mod docx;
mod eval;
mod parse;
mod xml;

use std::sync::Arc;
use std::time::Instant;

use auditdoc_shared::Result;
use tracing::{debug, info, instrument};

pub use cache::{DirTemplateSource, MemoryTemplateSource, TemplateCache, TemplateSource};
pub use context::{Helper, MergeContext};
pub use docx::{ParsedTemplate, read_part};

/// Renders templates by id from a source, through an injected cache.
#[derive(Clone)]
pub struct TemplateRenderer {
    source: Arc<dyn TemplateSource>,
    cache: Arc<TemplateCache>,
}

impl TemplateRenderer {
    pub fn new(source: impl TemplateSource + 'static, cache: Arc<TemplateCache>) -> Self {
        Self {
            source: Arc::new(source),
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    /// The parsed template for `template_id`, loading it on first use.
    /// A trailing `.docx` on the id is ignored.
    #[instrument(skip_all, fields(template_id = %template_id))]
    pub fn load(&self, template_id: &str) -> Result<Arc<ParsedTemplate>> {
        let id = normalize_id(template_id);
        if let Some(template) = self.cache.get(id) {
            debug!("template cache hit");
            return Ok(template);
        }

        let bytes = self.source.load(id)?;
        let parsed = ParsedTemplate::parse(id, &bytes)?;
        let template = self.cache.insert(parsed);
        info!(cached = self.cache.len(), "template loaded");
        Ok(template)
    }

    /// Render `template_id` with `ctx` into `.docx` bytes.
    #[instrument(skip_all, fields(template_id = %template_id))]
    pub fn render(&self, template_id: &str, ctx: &MergeContext) -> Result<Vec<u8>> {
        let start = Instant::now();
        let template = self.load(template_id)?;
        let bytes = template.render(ctx)?;
        info!(
            bytes = bytes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "document rendered"
        );
        Ok(bytes)
    }
}

fn normalize_id(template_id: &str) -> &str {
    template_id.strip_suffix(".docx").unwrap_or(template_id)
}
