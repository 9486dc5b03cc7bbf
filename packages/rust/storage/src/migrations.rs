//! SQL migration definitions for the auditdoc cache database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: canonical_documents",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (project, generation). Rows are never updated in place by
-- a refresh; a newer generated_at supersedes older rows on lookup.
CREATE TABLE IF NOT EXISTS canonical_documents (
    project_id     TEXT NOT NULL,
    generated_at   TEXT NOT NULL,
    schema_version TEXT NOT NULL,
    content_hash   TEXT NOT NULL,
    document_json  TEXT NOT NULL,
    stored_at      TEXT NOT NULL,
    PRIMARY KEY (project_id, generated_at)
);

CREATE INDEX IF NOT EXISTS idx_documents_latest
    ON canonical_documents(project_id, generated_at DESC);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
