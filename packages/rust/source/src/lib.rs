//! HTTP client for the upstream source-of-truth system.
//!
//! Four read-only endpoints feed one canonical document: project metadata,
//! review-area controls, survey responses and Enhanced Review Focus items.
//! Each call retries transient failures under a [`RetryPolicy`]; the four
//! are issued together by [`SourceClient::fetch_all`], and any one failing
//! fails the whole bundle.

mod retry;

use std::time::Duration;

use auditdoc_shared::{AppConfig, AuditDocError, RawProjectBundle, Result};
use reqwest::{Client, StatusCode, header};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

pub use retry::{BackoffPolicy, RetryPolicy};

/// User-Agent string for upstream requests.
const USER_AGENT: &str = concat!("auditdoc/", env!("CARGO_PKG_VERSION"));

/// Header carrying the per-acquisition correlation id.
const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Default page size for the controls endpoint.
const DEFAULT_PAGE_SIZE: u32 = 1000;

// ---------------------------------------------------------------------------
// SourceClient
// ---------------------------------------------------------------------------

/// Authenticated client for the upstream API.
#[derive(Clone)]
pub struct SourceClient {
    client: Client,
    base_url: Url,
    token: String,
    retry: RetryPolicy,
    page_size: u32,
}

/// Outcome of a single failed attempt.
enum AttemptError {
    /// Worth another try, optionally after a server-specified delay.
    Retryable {
        message: String,
        retry_after: Option<Duration>,
    },
    /// Retrying the identical request cannot succeed.
    Fatal(AuditDocError),
}

impl SourceClient {
    /// Build a client against `base_url` with the given bearer token.
    pub fn new(base_url: &str, token: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        // Trailing slash so Url::join keeps any path prefix of the base.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| AuditDocError::config(format!("invalid source base_url '{base_url}': {e}")))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AuditDocError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
            retry,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Build a client from the `[source]` config section.
    pub fn from_config(config: &AppConfig, token: impl Into<String>) -> Result<Self> {
        Ok(Self::new(
            &config.source.base_url,
            token,
            RetryPolicy::from(&config.source),
        )?
        .with_page_size(config.source.controls_page_size))
    }

    /// Override the controls page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    // -----------------------------------------------------------------------
    // Endpoints
    // -----------------------------------------------------------------------

    /// `GET /projects/{id}`
    pub async fn fetch_project(&self, project_id: &str, correlation_id: &str) -> Result<Value> {
        self.get_json(&format!("projects/{project_id}"), &[], correlation_id)
            .await
    }

    /// `GET /projects/project_controls/{id}`, following `limit`/`offset` pages
    /// until `total` items have been read.
    pub async fn fetch_controls(&self, project_id: &str, correlation_id: &str) -> Result<Vec<Value>> {
        let path = format!("projects/project_controls/{project_id}");
        let limit = self.page_size.to_string();
        let mut items: Vec<Value> = Vec::new();

        loop {
            let offset = items.len().to_string();
            let page = self
                .get_json(
                    &path,
                    &[("limit", limit.as_str()), ("offset", offset.as_str())],
                    correlation_id,
                )
                .await?;

            let (page_items, total) = match page {
                Value::Array(list) => (list, None),
                Value::Object(mut obj) => {
                    let total = obj.get("total").and_then(Value::as_u64);
                    let list = match obj.remove("items") {
                        Some(Value::Array(list)) => list,
                        _ => Vec::new(),
                    };
                    (list, total)
                }
                other => {
                    return Err(AuditDocError::Network(format!(
                        "unexpected controls payload shape: {}",
                        json_kind(&other)
                    )));
                }
            };

            let fetched = page_items.len();
            items.extend(page_items);
            debug!(fetched, so_far = items.len(), ?total, "controls page read");

            match total {
                Some(total) if fetched > 0 && (items.len() as u64) < total => continue,
                _ => break,
            }
        }

        Ok(items)
    }

    /// `GET /surveys/?project_id={id}`
    pub async fn fetch_surveys(&self, project_id: &str, correlation_id: &str) -> Result<Value> {
        self.get_json("surveys/", &[("project_id", project_id)], correlation_id)
            .await
    }

    /// `GET /risks/?project_id={id}`
    pub async fn fetch_risks(&self, project_id: &str, correlation_id: &str) -> Result<Value> {
        self.get_json("risks/", &[("project_id", project_id)], correlation_id)
            .await
    }

    /// Issue all four fetches concurrently. Any failure fails the bundle.
    #[instrument(skip_all, fields(project_id = %project_id))]
    pub async fn fetch_all(&self, project_id: &str) -> Result<RawProjectBundle> {
        let correlation_id = Uuid::now_v7().to_string();
        info!(%correlation_id, "fetching project data from source");

        let (project, controls, surveys, risks) = tokio::try_join!(
            self.fetch_project(project_id, &correlation_id),
            self.fetch_controls(project_id, &correlation_id),
            self.fetch_surveys(project_id, &correlation_id),
            self.fetch_risks(project_id, &correlation_id),
        )?;

        info!(controls = controls.len(), "source fetch complete");

        Ok(RawProjectBundle {
            project_id: project_id.to_string(),
            project,
            controls,
            surveys,
            risks,
        })
    }

    // -----------------------------------------------------------------------
    // Retry loop
    // -----------------------------------------------------------------------

    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
        correlation_id: &str,
    ) -> Result<Value> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| AuditDocError::config(format!("invalid endpoint path '{path}': {e}")))?;
        let endpoint = format!("/{path}");

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = tokio::time::timeout(
                self.retry.attempt_timeout,
                self.attempt(&url, query, correlation_id),
            )
            .await
            .unwrap_or_else(|_| {
                Err(AttemptError::Retryable {
                    message: format!(
                        "timed out after {}s",
                        self.retry.attempt_timeout.as_secs_f64()
                    ),
                    retry_after: None,
                })
            });

            match outcome {
                Ok(value) => {
                    debug!(%endpoint, attempt, "fetch succeeded");
                    return Ok(value);
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable {
                    message,
                    retry_after,
                }) => {
                    if !self.retry.should_retry(attempt) {
                        warn!(%endpoint, attempt, error = %message, "retries exhausted");
                        return Err(AuditDocError::SourceUnavailable {
                            endpoint,
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = self.retry.next_delay(attempt, retry_after);
                    warn!(
                        %endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient source failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &Url,
        query: &[(&str, &str)],
        correlation_id: &str,
    ) -> std::result::Result<Value, AttemptError> {
        let response = self
            .client
            .get(url.clone())
            .query(query)
            .bearer_auth(&self.token)
            .header(CORRELATION_HEADER, correlation_id)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::Retryable {
                message: "HTTP 429 rate limited".into(),
                retry_after: retry_after(response.headers()),
            });
        }
        if status.is_server_error() {
            return Err(AttemptError::Retryable {
                message: format!("HTTP {status}"),
                retry_after: None,
            });
        }
        if !status.is_success() {
            return Err(AttemptError::Fatal(AuditDocError::Network(format!(
                "HTTP {status} for {}",
                url.path()
            ))));
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                classify_transport_error(e)
            } else {
                AttemptError::Fatal(AuditDocError::Network(format!(
                    "invalid JSON from {}: {e}",
                    url.path()
                )))
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Timeouts and connection failures are retryable; anything else is not.
fn classify_transport_error(e: reqwest::Error) -> AttemptError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        AttemptError::Retryable {
            message: e.to_string(),
            retry_after: None,
        }
    } else {
        AttemptError::Fatal(AuditDocError::Network(e.to_string()))
    }
}

/// Parse a delta-seconds `Retry-After` header.
fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_eq, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

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

    async fn mount_all(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/projects/33"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixture("raw-project.json")))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/project_controls/33"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixture("raw-controls.json")))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/surveys/"))
            .and(query_param("project_id", "33"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixture("raw-surveys.json")))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/risks/"))
            .and(query_param("project_id", "33"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixture("raw-risks.json")))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetch_all_reads_four_endpoints() {
        let server = MockServer::start().await;
        mount_all(&server).await;

        let client = SourceClient::new(&server.uri(), "secret", fast_policy()).unwrap();
        let bundle = client.fetch_all("33").await.unwrap();

        assert_eq!(bundle.project["recipient_acronym"], "GVTA");
        assert_eq!(bundle.controls.len(), 22);
        assert!(bundle.surveys["items"].is_array());
        assert_eq!(bundle.risks["items"][0]["area"], "Cybersecurity");
    }

    #[tokio::test]
    async fn requests_carry_auth_and_correlation_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/7"))
            .and(header_eq("authorization", "Bearer secret"))
            .and(header_eq("x-correlation-id", "corr-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 7})))
            .expect(1)
            .mount(&server)
            .await;

        let client = SourceClient::new(&server.uri(), "secret", fast_policy()).unwrap();
        let project = client.fetch_project("7", "corr-1").await.unwrap();
        assert_eq!(project["id"], 7);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/7"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 7})))
            .mount(&server)
            .await;

        let client = SourceClient::new(&server.uri(), "t", fast_policy()).unwrap();
        let project = client.fetch_project("7", "c").await.unwrap();
        assert_eq!(project["id"], 7);
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/7"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 7})))
            .mount(&server)
            .await;

        let client = SourceClient::new(&server.uri(), "t", fast_policy()).unwrap();
        assert!(client.fetch_project("7", "c").await.is_ok());
    }

    #[tokio::test]
    async fn exhausted_retries_surface_source_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/7"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = SourceClient::new(&server.uri(), "t", fast_policy()).unwrap();
        let err = client.fetch_project("7", "c").await.unwrap_err();
        match err {
            AuditDocError::SourceUnavailable {
                endpoint, attempts, ..
            } => {
                assert_eq!(endpoint, "/projects/7");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/404"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = SourceClient::new(&server.uri(), "t", fast_policy()).unwrap();
        let err = client.fetch_project("404", "c").await.unwrap_err();
        assert!(matches!(err, AuditDocError::Network(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn slow_attempts_time_out_independently() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/7"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": 7}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let policy = RetryPolicy {
            max_attempts: 2,
            attempt_timeout: Duration::from_millis(100),
            ..fast_policy()
        };
        let client = SourceClient::new(&server.uri(), "t", policy).unwrap();
        let err = client.fetch_project("7", "c").await.unwrap_err();
        assert!(matches!(err, AuditDocError::SourceUnavailable { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn partial_bundle_is_total_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/risks/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        mount_all(&server).await;

        let client = SourceClient::new(&server.uri(), "t", fast_policy()).unwrap();
        let err = client.fetch_all("33").await.unwrap_err();
        assert!(matches!(err, AuditDocError::SourceUnavailable { ref endpoint, .. } if endpoint == "/risks/"));
    }

    #[tokio::test]
    async fn controls_follow_pagination() {
        let server = MockServer::start().await;
        let item = |name: &str| serde_json::json!({"control": {"name": name}, "assessment": {"status": "Complete"}});
        Mock::given(method("GET"))
            .and(path("/projects/project_controls/9"))
            .and(query_param("offset", "0"))
            .and(header_exists("x-correlation-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [item("LEGAL : L1"), item("LEGAL : L2")],
                "total": 3
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/project_controls/9"))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [item("MAINTENANCE : M1")],
                "total": 3
            })))
            .mount(&server)
            .await;

        let client = SourceClient::new(&server.uri(), "t", fast_policy())
            .unwrap()
            .with_page_size(2);
        let controls = client.fetch_controls("9", "c").await.unwrap();
        assert_eq!(controls.len(), 3);
        assert_eq!(controls[2]["control"]["name"], "MAINTENANCE : M1");
    }
}
