//! Embedded libSQL cache for canonical documents.
//!
//! The [`CacheStore`] keeps every generation of a project's canonical
//! document, keyed by `(project_id, generated_at)`. Lookup always resolves
//! to the most recent generation; older ones stay readable for audit.
//!
//! **Access rules:**
//! - The pipeline is the sole writer via [`CacheStore::open`]
//! - Inspection tooling opens read-only via [`CacheStore::open_readonly`]

mod migrations;

use std::path::Path;
use std::time::Duration;

use auditdoc_shared::{AuditDocError, CanonicalDocument, Result, SCHEMA_VERSION};
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

// ---------------------------------------------------------------------------
// Keys and entries
// ---------------------------------------------------------------------------

/// Storage key of one cached generation: `{project_id}/{generated_at}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub project_id: String,
    /// RFC 3339, microseconds, UTC.
    pub generated_at: String,
}

impl CacheKey {
    fn for_document(doc: &CanonicalDocument) -> Self {
        Self {
            project_id: doc.project_id.clone(),
            generated_at: format_timestamp(&doc.generated_at),
        }
    }

    /// Parse the `project/timestamp` form produced by `Display`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (project_id, generated_at) = raw
            .rsplit_once('/')
            .filter(|(p, g)| !p.is_empty() && !g.is_empty())
            .ok_or_else(|| AuditDocError::Storage(format!("malformed cache key '{raw}'")))?;
        Ok(Self {
            project_id: project_id.to_string(),
            generated_at: generated_at.to_string(),
        })
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.project_id, self.generated_at)
    }
}

/// Metadata of one cached generation, without the document body.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub schema_version: String,
    pub content_hash: String,
    pub stored_at: String,
}

/// Why a lookup produced no document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    NotFound,
    Stale,
    SchemaVersionMismatch,
    Corrupt,
}

impl MissReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Stale => "stale",
            Self::SchemaVersionMismatch => "schema_version_mismatch",
            Self::Corrupt => "corrupt",
        }
    }
}

/// Result of [`CacheStore::lookup`].
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(Box<CanonicalDocument>),
    Miss(MissReason),
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Primary cache handle wrapping a libSQL database.
pub struct CacheStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl CacheStore {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuditDocError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| AuditDocError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| AuditDocError::Storage(e.to_string()))?;

        let store = Self {
            db,
            conn,
            readonly: false,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AuditDocError::Storage(format!(
                "cache database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| AuditDocError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| AuditDocError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        AuditDocError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(AuditDocError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Store a validated document as a new generation.
    ///
    /// Rows are never overwritten: a newer generation supersedes older ones
    /// on lookup. Re-putting an identical generation is a no-op; a different
    /// document under an existing key is a storage error.
    #[instrument(skip_all, fields(project_id = %project_id))]
    pub async fn put(&self, project_id: &str, doc: &CanonicalDocument) -> Result<CacheKey> {
        self.check_writable()?;
        if doc.project_id != project_id {
            return Err(AuditDocError::Storage(format!(
                "document belongs to project '{}', not '{project_id}'",
                doc.project_id
            )));
        }

        let body = serde_json::to_string(doc)
            .map_err(|e| AuditDocError::Storage(format!("serialize document: {e}")))?;
        let hash = content_hash(&body);
        let key = CacheKey::for_document(doc);
        let now = format_timestamp(&Utc::now());

        let inserted = self
            .conn
            .execute(
                "INSERT INTO canonical_documents
                   (project_id, generated_at, schema_version, content_hash, document_json, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(project_id, generated_at) DO NOTHING",
                params![
                    key.project_id.as_str(),
                    key.generated_at.as_str(),
                    doc.schema_version.as_str(),
                    hash.as_str(),
                    body.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| AuditDocError::Storage(e.to_string()))?;

        if inserted == 0 {
            return match self.stored_hash(&key).await? {
                Some(existing) if existing == hash => {
                    debug!(%key, "generation already cached");
                    Ok(key)
                }
                _ => Err(AuditDocError::Storage(format!(
                    "generation {key} is already cached with different content"
                ))),
            };
        }

        info!(%key, bytes = body.len(), "cached canonical document");
        Ok(key)
    }

    async fn stored_hash(&self, key: &CacheKey) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT content_hash FROM canonical_documents
                 WHERE project_id = ?1 AND generated_at = ?2",
                params![key.project_id.as_str(), key.generated_at.as_str()],
            )
            .await
            .map_err(|e| AuditDocError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| AuditDocError::Storage(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(AuditDocError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Most recent document for `project_id` if it is younger than `max_age`.
    pub async fn get(&self, project_id: &str, max_age: Duration) -> Result<Option<CanonicalDocument>> {
        match self.lookup(project_id, max_age).await? {
            CacheLookup::Hit(doc) => Ok(Some(*doc)),
            CacheLookup::Miss(_) => Ok(None),
        }
    }

    /// Like [`CacheStore::get`] but reports why a miss happened.
    #[instrument(skip_all, fields(project_id = %project_id))]
    pub async fn lookup(&self, project_id: &str, max_age: Duration) -> Result<CacheLookup> {
        let mut rows = self
            .conn
            .query(
                "SELECT generated_at, schema_version, content_hash, document_json
                 FROM canonical_documents
                 WHERE project_id = ?1
                 ORDER BY generated_at DESC
                 LIMIT 1",
                params![project_id],
            )
            .await
            .map_err(|e| AuditDocError::Storage(e.to_string()))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(miss(MissReason::NotFound)),
            Err(e) => return Err(AuditDocError::Storage(e.to_string())),
        };

        let generated_at: String = row
            .get(0)
            .map_err(|e| AuditDocError::Storage(e.to_string()))?;
        let schema_version: String = row
            .get(1)
            .map_err(|e| AuditDocError::Storage(e.to_string()))?;
        let stored_hash: String = row
            .get(2)
            .map_err(|e| AuditDocError::Storage(e.to_string()))?;
        let body: String = row
            .get(3)
            .map_err(|e| AuditDocError::Storage(e.to_string()))?;

        let Some(generated) = parse_timestamp(&generated_at) else {
            warn!(%generated_at, "cached row has an unreadable timestamp");
            return Ok(miss(MissReason::Corrupt));
        };

        let age = Utc::now().signed_duration_since(generated);
        let age_secs = age.num_seconds().max(0) as u64;
        if age_secs > max_age.as_secs() {
            info!(cache_age_secs = age_secs, max_age_secs = max_age.as_secs(), "cache miss: stale");
            return Ok(miss(MissReason::Stale));
        }

        if schema_version != SCHEMA_VERSION {
            info!(%schema_version, expected = SCHEMA_VERSION, "cache miss: schema version mismatch");
            return Ok(miss(MissReason::SchemaVersionMismatch));
        }

        if content_hash(&body) != stored_hash {
            warn!("cached document does not match its content hash");
            return Ok(miss(MissReason::Corrupt));
        }

        match serde_json::from_str::<CanonicalDocument>(&body) {
            Ok(doc) => {
                debug!(cache_age_secs = age_secs, "cache hit");
                Ok(CacheLookup::Hit(Box::new(doc)))
            }
            Err(e) => {
                warn!(error = %e, "cached document failed to deserialize");
                Ok(miss(MissReason::Corrupt))
            }
        }
    }

    /// Fetch one specific historical generation, regardless of age.
    pub async fn get_by_key(&self, key: &CacheKey) -> Result<Option<CanonicalDocument>> {
        let mut rows = self
            .conn
            .query(
                "SELECT document_json FROM canonical_documents
                 WHERE project_id = ?1 AND generated_at = ?2",
                params![key.project_id.as_str(), key.generated_at.as_str()],
            )
            .await
            .map_err(|e| AuditDocError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let body: String = row
                    .get(0)
                    .map_err(|e| AuditDocError::Storage(e.to_string()))?;
                let doc = serde_json::from_str(&body)
                    .map_err(|e| AuditDocError::Storage(format!("corrupt document {key}: {e}")))?;
                Ok(Some(doc))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(AuditDocError::Storage(e.to_string())),
        }
    }

    /// Every cached generation for a project, newest first.
    pub async fn history(&self, project_id: &str) -> Result<Vec<CacheEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT generated_at, schema_version, content_hash, stored_at
                 FROM canonical_documents
                 WHERE project_id = ?1
                 ORDER BY generated_at DESC",
                params![project_id],
            )
            .await
            .map_err(|e| AuditDocError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AuditDocError::Storage(e.to_string()))?
        {
            results.push(CacheEntry {
                key: CacheKey {
                    project_id: project_id.to_string(),
                    generated_at: row
                        .get::<String>(0)
                        .map_err(|e| AuditDocError::Storage(e.to_string()))?,
                },
                schema_version: row
                    .get::<String>(1)
                    .map_err(|e| AuditDocError::Storage(e.to_string()))?,
                content_hash: row
                    .get::<String>(2)
                    .map_err(|e| AuditDocError::Storage(e.to_string()))?,
                stored_at: row
                    .get::<String>(3)
                    .map_err(|e| AuditDocError::Storage(e.to_string()))?,
            });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn miss(reason: MissReason) -> CacheLookup {
    debug!(reason = reason.as_str(), "cache miss");
    CacheLookup::Miss(reason)
}

/// Fixed-width UTC timestamp, so text order equals time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}
