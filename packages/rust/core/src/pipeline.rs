//! End-to-end generation: acquire → validate → render → upload.
//!
//! Acquisition (cache lookup, or fetch → transform → validate → cache write)
//! always finishes before rendering starts. Concurrent cache misses for the
//! same project are coalesced behind a per-project lock, so only one of
//! them reaches the upstream system.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use auditdoc_render::TemplateRenderer;
use auditdoc_shared::{AppConfig, AuditDocError, CanonicalDocument, ReportId, Result};
use auditdoc_source::SourceClient;
use auditdoc_storage::CacheStore;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::context::build_context;
use crate::manifest::ManifestRegistry;
use crate::outcome::RenderSuccess;
use crate::upload::{DocumentUploader, document_key};
use crate::validator::{CompletenessReport, check_completeness, validate_document};

/// Runtime settings for [`ReportPipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Maximum age of a cached canonical document.
    pub cache_ttl: Duration,
    /// Whole-request budget for [`ReportPipeline::generate`].
    pub generation_budget: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            generation_budget: Duration::from_secs(120),
        }
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            cache_ttl: Duration::from_secs(config.cache.ttl_secs),
            generation_budget: Duration::from_secs(config.generation.budget_secs.max(1)),
        }
    }
}

/// One document generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub project_id: String,
    pub template_id: String,
    /// Skip the cache and fetch fresh data.
    pub force_refresh: bool,
}

/// A canonical document ready for rendering.
#[derive(Debug, Clone)]
pub struct Acquired {
    pub document: CanonicalDocument,
    pub from_cache: bool,
    /// Upstream controls that matched no review area (fresh fetches only).
    pub unmapped_controls: Vec<String>,
}

/// Output of [`render_canonical`].
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub warnings: Vec<String>,
    pub completeness: CompletenessReport,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the document has been uploaded.
    fn done(&self, result: &RenderSuccess);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _result: &RenderSuccess) {}
}

// ---------------------------------------------------------------------------
// ReportPipeline
// ---------------------------------------------------------------------------

/// Long-lived pipeline shared by every request in the process.
pub struct ReportPipeline<U> {
    source: SourceClient,
    cache: CacheStore,
    renderer: TemplateRenderer,
    manifests: ManifestRegistry,
    uploader: U,
    config: PipelineConfig,
    inflight: InflightLocks,
}

type InflightLocks = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// Held while one request fills the cache for a project. Dropping it
/// releases the lock and removes the map entry once nobody else holds or
/// waits on it.
struct FillGuard<'a> {
    inflight: &'a InflightLocks,
    project_id: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FillGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this guard hold the only two references.
        if Arc::strong_count(&self.lock) == 2 {
            inflight.remove(&self.project_id);
        }
    }
}

impl<U: DocumentUploader> ReportPipeline<U> {
    pub fn new(
        source: SourceClient,
        cache: CacheStore,
        renderer: TemplateRenderer,
        manifests: ManifestRegistry,
        uploader: U,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            cache,
            renderer,
            manifests,
            uploader,
            config,
            inflight: StdMutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// A validated canonical document for `project_id`, from the cache when
    /// fresh, otherwise fetched, transformed, validated and cached.
    #[instrument(skip_all, fields(project_id = %project_id, force_refresh = force_refresh))]
    pub async fn acquire(&self, project_id: &str, force_refresh: bool) -> Result<Acquired> {
        if !force_refresh {
            if let Some(hit) = self.cached(project_id).await? {
                return Ok(hit);
            }
        }

        let _guard = self.fill_lock(project_id).await;

        // Another request may have filled the cache while we waited.
        if !force_refresh {
            if let Some(hit) = self.cached(project_id).await? {
                debug!("cache filled by a concurrent request");
                return Ok(hit);
            }
        }

        let bundle = self.source.fetch_all(project_id).await?;
        let output = auditdoc_transform::transform(&bundle)?;
        for control in &output.unmapped_controls {
            warn!(control = %control, "unmapped upstream control dropped");
        }

        // Nothing reaches the cache without passing validation.
        validate_document(&output.document)?.into_result()?;
        let key = self.cache.put(project_id, &output.document).await?;
        info!(%key, "canonical document acquired from source");

        Ok(Acquired {
            document: output.document,
            from_cache: false,
            unmapped_controls: output.unmapped_controls,
        })
    }

    async fn cached(&self, project_id: &str) -> Result<Option<Acquired>> {
        let hit = self.cache.get(project_id, self.config.cache_ttl).await?;
        Ok(hit.map(|document| {
            let age = Utc::now() - document.generated_at;
            debug!(cache_age_secs = age.num_seconds(), "canonical document served from cache");
            Acquired {
                document,
                from_cache: true,
                unmapped_controls: Vec::new(),
            }
        }))
    }

    async fn fill_lock(&self, project_id: &str) -> FillGuard<'_> {
        let lock = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                inflight
                    .entry(project_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let mut fill = FillGuard {
            inflight: &self.inflight,
            project_id: project_id.to_string(),
            lock,
            guard: None,
        };
        fill.guard = Some(Arc::clone(&fill.lock).lock_owned().await);
        fill
    }

    /// Run one request within the generation budget.
    ///
    /// On timeout nothing is returned or uploaded beyond what already
    /// completed; the caller sees a single `GenerationTimeout`.
    #[instrument(skip_all, fields(project_id = %request.project_id, template_id = %request.template_id))]
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<RenderSuccess> {
        let budget = self.config.generation_budget;
        match tokio::time::timeout(budget, self.generate_inner(request, progress)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(budget_secs = budget.as_secs(), "generation budget exhausted");
                Err(AuditDocError::GenerationTimeout {
                    budget_secs: budget.as_secs(),
                })
            }
        }
    }

    async fn generate_inner(
        &self,
        request: &GenerateRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<RenderSuccess> {
        let start = Instant::now();
        let report_id = ReportId::new();
        info!(%report_id, "starting generation");
        self.manifests.get(&request.template_id)?;

        // --- Phase 1: Acquire ---
        progress.phase("Acquiring project data");
        let acquired = self
            .acquire(&request.project_id, request.force_refresh)
            .await?;

        // --- Phase 2: Validate + render ---
        progress.phase("Rendering document");
        let rendered = render_canonical(
            &self.renderer,
            &self.manifests,
            &acquired.document,
            &request.template_id,
        )?;

        // --- Phase 3: Upload ---
        progress.phase("Uploading document");
        let key = document_key(&request.project_id, &request.template_id, &report_id);
        let locator = self.uploader.upload(&key, &rendered.bytes).await?;

        let mut warnings = rendered.warnings;
        warnings.extend(
            acquired
                .unmapped_controls
                .iter()
                .map(|c| format!("unmapped upstream control dropped: {c}")),
        );

        let result = RenderSuccess {
            status: "completed",
            document_locator: locator,
            generated_at: Utc::now(),
            warnings,
            report_id: report_id.to_string(),
            template_id: request
                .template_id
                .strip_suffix(".docx")
                .unwrap_or(&request.template_id)
                .to_string(),
            project_id: request.project_id.clone(),
            size_bytes: rendered.bytes.len(),
            sha256: format!("{:x}", Sha256::digest(&rendered.bytes)),
            from_cache: acquired.from_cache,
        };

        info!(
            %report_id,
            bytes = result.size_bytes,
            from_cache = result.from_cache,
            warnings = result.warnings.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "generation complete"
        );
        progress.done(&result);
        Ok(result)
    }
}

/// Validate `doc`, gate on the template's critical fields, fill optional
/// defaults, build the context and render. Pure CPU work, no I/O beyond a
/// first-use template load.
pub fn render_canonical(
    renderer: &TemplateRenderer,
    manifests: &ManifestRegistry,
    doc: &CanonicalDocument,
    template_id: &str,
) -> Result<RenderedDocument> {
    let mut warnings = validate_document(doc)?.into_result()?;

    let manifest = manifests.get(template_id)?;
    let completeness = check_completeness(&doc.to_value()?, manifest);
    completeness.ensure_can_generate()?;

    let (defaulted, defaulted_warnings) = manifest.apply_defaults(doc)?;
    warnings.extend(defaulted_warnings);

    let ctx = build_context(&defaulted)?.to_merge_context()?;
    let bytes = renderer.render(template_id, &ctx)?;

    Ok(RenderedDocument {
        bytes,
        warnings,
        completeness,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditdoc_render::{DirTemplateSource, TemplateCache, read_part};
    use auditdoc_source::RetryPolicy;
    use serde_json::Value;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str = "word/document.xml";

    /// Keeps uploads in memory.
    #[derive(Default)]
    struct MemoryUploader {
        uploads: StdMutex<Vec<(String, Vec<u8>)>>,
    }

    impl DocumentUploader for MemoryUploader {
        async fn upload(&self, key: &str, bytes: &[u8]) -> Result<String> {
            self.uploads
                .lock()
                .unwrap()
                .push((key.to_string(), bytes.to_vec()));
            Ok(format!("memory://{key}"))
        }
    }

    fn fixture(name: &str) -> Value {
        let content = std::fs::read_to_string(format!("../../../fixtures/json/{name}"))
            .expect("read fixture");
        serde_json::from_str(&content).expect("parse fixture")
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            multiplier: 2.0,
            attempt_timeout: Duration::from_millis(500),
        }
    }

    /// Mount the four upstream endpoints; each must be hit exactly `times`.
    async fn mount_source(server: &MockServer, project: Value, times: u64) {
        Mock::given(method("GET"))
            .and(path("/projects/33"))
            .respond_with(ResponseTemplate::new(200).set_body_json(project))
            .expect(times)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/project_controls/33"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixture("raw-controls.json")))
            .expect(times)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/surveys/"))
            .and(query_param("project_id", "33"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixture("raw-surveys.json")))
            .expect(times)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/risks/"))
            .and(query_param("project_id", "33"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixture("raw-risks.json")))
            .expect(times)
            .mount(server)
            .await;
    }

    async fn pipeline(server: &MockServer) -> ReportPipeline<MemoryUploader> {
        let db_path = std::env::temp_dir().join(format!("auditdoc_test_{}.db", Uuid::now_v7()));
        let cache = CacheStore::open(&db_path).await.unwrap();
        let source = SourceClient::new(&server.uri(), "secret", fast_policy()).unwrap();
        let renderer = TemplateRenderer::new(
            DirTemplateSource::new("../../../templates"),
            Arc::new(TemplateCache::new()),
        );
        ReportPipeline::new(
            source,
            cache,
            renderer,
            ManifestRegistry::builtin().unwrap(),
            MemoryUploader::default(),
            PipelineConfig::default(),
        )
    }

    fn request(force_refresh: bool) -> GenerateRequest {
        GenerateRequest {
            project_id: "33".into(),
            template_id: "draft-audit-report".into(),
            force_refresh,
        }
    }

    fn uploaded_body(p: &ReportPipeline<MemoryUploader>) -> String {
        let uploads = p.uploader.uploads.lock().unwrap();
        let (_, bytes) = uploads.last().expect("an upload");
        read_part(bytes, BODY).unwrap()
    }

    #[tokio::test]
    async fn second_request_is_served_from_cache() {
        let server = MockServer::start().await;
        mount_source(&server, fixture("raw-project.json"), 1).await;
        let p = pipeline(&server).await;

        let first = p.acquire("33", false).await.unwrap();
        let second = p.acquire("33", false).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.document.generated_at, second.document.generated_at);
        assert_eq!(first.document, second.document);
        // Mock expectations (one hit per endpoint) are verified on drop.
    }

    #[tokio::test]
    async fn concurrent_misses_fetch_once() {
        let server = MockServer::start().await;
        mount_source(&server, fixture("raw-project.json"), 1).await;
        let p = pipeline(&server).await;

        let (a, b) = tokio::join!(p.acquire("33", false), p.acquire("33", false));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.document.generated_at, b.document.generated_at);
        assert!(a.from_cache ^ b.from_cache);
        assert_eq!(inflight_len(&p), 0);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let server = MockServer::start().await;
        mount_source(&server, fixture("raw-project.json"), 2).await;
        let p = pipeline(&server).await;

        let first = p.acquire("33", false).await.unwrap();
        let refreshed = p.acquire("33", true).await.unwrap();
        assert!(!refreshed.from_cache);
        assert!(refreshed.document.generated_at > first.document.generated_at);

        let history = p.cache().history("33").await.unwrap();
        assert_eq!(history.len(), 2);
        let archived = p.cache().get_by_key(&history[1].key).await.unwrap().unwrap();
        assert_eq!(archived, first.document);

        let latest = p.acquire("33", false).await.unwrap();
        assert!(latest.from_cache);
        assert_eq!(latest.document.generated_at, refreshed.document.generated_at);
    }

    fn inflight_len(p: &ReportPipeline<MemoryUploader>) -> usize {
        p.inflight.lock().unwrap().len()
    }

    #[tokio::test]
    async fn fill_locks_are_released_after_use() {
        let server = MockServer::start().await;
        let p = pipeline(&server).await;

        for i in 0..50 {
            let _fill = p.fill_lock(&format!("project-{i}")).await;
            assert_eq!(inflight_len(&p), 1);
        }
        assert_eq!(inflight_len(&p), 0);
    }

    #[tokio::test]
    async fn fill_lock_entry_survives_while_contended() {
        let server = MockServer::start().await;
        let p = pipeline(&server).await;

        let first = p.fill_lock("33").await;
        let waiter = p.fill_lock("33");
        tokio::pin!(waiter);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), &mut waiter)
                .await
                .is_err()
        );

        drop(first);
        assert_eq!(inflight_len(&p), 1);
        let second = waiter.await;
        assert_eq!(inflight_len(&p), 1);
        drop(second);
        assert_eq!(inflight_len(&p), 0);
    }

    #[tokio::test]
    async fn generates_and_uploads_a_report() {
        let server = MockServer::start().await;
        mount_source(&server, fixture("raw-project.json"), 1).await;
        let p = pipeline(&server).await;

        let result = p.generate(&request(false), &SilentProgress).await.unwrap();
        assert_eq!(result.status, "completed");
        assert_eq!(result.project_id, "33");
        assert_eq!(result.template_id, "draft-audit-report");
        assert!(result.document_locator.starts_with("memory://documents/33/draft-audit-report_rpt-"));
        assert_eq!(result.sha256.len(), 64);
        assert!(!result.from_cache);

        let body = uploaded_body(&p);
        assert!(body.contains("Greater Valley Transit Authority (GVTA)"));
        assert!(body.contains("in 2 of the 21 areas"));
        assert!(body.contains("with deficiencies are Legal and Procurement."));
        assert!(body.contains("Site visit: March 10-14, 2025"));
        assert!(body.contains("held virtually"));
        assert!(body.contains("Enhanced Review Focus"));
        assert!(body.contains("Cybersecurity: Review incident response plan testing."));
        assert!(!body.contains("no deficiencies were found"));
        assert!(!body.contains("Subrecipient Oversight"));
        assert!(!body.contains("{{"));
        assert!(!body.contains("{%"));
    }

    #[tokio::test]
    async fn missing_recipient_name_halts_before_rendering() {
        let server = MockServer::start().await;
        let mut project = fixture("raw-project.json");
        project.as_object_mut().unwrap().remove("recipient_name");
        mount_source(&server, project, 1).await;
        let p = pipeline(&server).await;

        let err = p.generate(&request(false), &SilentProgress).await.unwrap_err();
        match &err {
            AuditDocError::IncompleteData { missing_fields, .. } => {
                assert_eq!(missing_fields, &vec!["recipient_name".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(p.uploader.uploads.lock().unwrap().is_empty());
        assert!(p.renderer.cache().is_empty());
    }

    #[tokio::test]
    async fn source_outage_is_reported_and_nothing_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let p = pipeline(&server).await;

        let err = p.generate(&request(false), &SilentProgress).await.unwrap_err();
        assert!(matches!(err, AuditDocError::SourceUnavailable { .. }));
        assert!(err.is_transient());
        assert!(p.cache().history("33").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_template_fails_before_fetching() {
        let server = MockServer::start().await;
        mount_source(&server, fixture("raw-project.json"), 0).await;
        let p = pipeline(&server).await;

        let mut req = request(false);
        req.template_id = "no-such-template".into();
        let err = p.generate(&req, &SilentProgress).await.unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(p.uploader.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_budget_is_a_single_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(400)))
            .mount(&server)
            .await;
        let mut p = pipeline(&server).await;
        p.config.generation_budget = Duration::from_millis(50);

        let err = p.generate(&request(false), &SilentProgress).await.unwrap_err();
        assert!(matches!(err, AuditDocError::GenerationTimeout { .. }));
        assert!(p.uploader.uploads.lock().unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Rendering without the source
    // -----------------------------------------------------------------------

    fn canonical() -> CanonicalDocument {
        serde_json::from_value(fixture("canonical-document.json")).unwrap()
    }

    fn renderer() -> TemplateRenderer {
        TemplateRenderer::new(
            DirTemplateSource::new("../../../templates"),
            Arc::new(TemplateCache::new()),
        )
    }

    fn render_body(doc: &CanonicalDocument) -> String {
        let manifests = ManifestRegistry::builtin().unwrap();
        let rendered = render_canonical(&renderer(), &manifests, doc, "draft-audit-report").unwrap();
        read_part(&rendered.bytes, BODY).unwrap()
    }

    #[test]
    fn clean_review_renders_the_no_deficiency_alternative() {
        let mut doc = canonical();
        for a in &mut doc.assessments {
            *a = auditdoc_shared::Assessment::bare(a.review_area, auditdoc_shared::Finding::NonDeficient);
        }
        doc.enhanced_review_items.clear();
        doc.summary = auditdoc_shared::Summary::derive(&doc.assessments, &[], false, None);

        let body = render_body(&doc);
        assert!(body.contains("no deficiencies were found with FTA requirements"));
        assert!(body.contains("identified no deficiencies"));
        assert!(!body.contains("Enhanced Review Focus"));
        assert!(!body.contains("<w:tbl>"));
    }

    #[test]
    fn deficiency_table_lists_every_area() {
        let body = render_body(&canonical());
        // Header row plus one row per review area.
        assert_eq!(body.matches("<w:tr>").count(), 1 + auditdoc_shared::N_FIXED_AREAS);
        assert!(body.contains("Submit a current opinion of counsel."));
        assert!(body.contains("June 30, 2025"));
    }

    #[test]
    fn optional_gaps_are_defaulted_with_warnings() {
        let mut doc = canonical();
        doc.project.recipient_website = None;
        let manifests = ManifestRegistry::builtin().unwrap();
        let rendered = render_canonical(&renderer(), &manifests, &doc, "draft-audit-report").unwrap();

        assert!(rendered.completeness.can_generate);
        assert_eq!(rendered.completeness.missing_optional, vec!["recipient_website"]);
        assert_eq!(rendered.warnings, vec!["recipient_website missing; defaulted to \"N/A\""]);
        assert!(read_part(&rendered.bytes, BODY).unwrap().contains("Website: N/A"));
    }

    #[test]
    fn recipient_information_request_renders() {
        let manifests = ManifestRegistry::builtin().unwrap();
        let rendered = render_canonical(
            &renderer(),
            &manifests,
            &canonical(),
            "recipient-information-request.docx",
        )
        .unwrap();
        let body = read_part(&rendered.bytes, BODY).unwrap();
        assert!(body.contains("Recipient ID 1234"));
        assert!(body.contains("jordan.lee@example.com"));
        let footer = read_part(&rendered.bytes, "word/footer1.xml").unwrap();
        assert!(footer.contains("GVTA Recipient Information Request"));
    }

    #[test]
    fn schema_invalid_documents_never_render() {
        let mut doc = canonical();
        doc.schema_version = "0.9".into();
        let manifests = ManifestRegistry::builtin().unwrap();
        let err = render_canonical(&renderer(), &manifests, &doc, "draft-audit-report").unwrap_err();
        assert!(matches!(err, AuditDocError::SchemaInvalid { .. }));
    }

    #[test]
    fn config_conversion() {
        let mut config = AppConfig::default();
        config.cache.ttl_secs = 60;
        config.generation.budget_secs = 0;
        let pc = PipelineConfig::from(&config);
        assert_eq!(pc.cache_ttl, Duration::from_secs(60));
        assert_eq!(pc.generation_budget, Duration::from_secs(1));
    }
}
