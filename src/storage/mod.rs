//! SQLite-backed persistence for the research pipeline.
//!
//! A thin synchronous wrapper over `rusqlite` that bootstraps the schema
//! (tasks, queries, pages, fragments, claims, edges, and the normalized
//! bibliographic tables) plus the reporting views. Higher layers hold the
//! connection behind a mutex; statements are short-lived.

pub mod works;

pub use works::{get_canonical_id_for_paper_id, persist_work, resolve_paper_id_to_page_id};

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::Connection;
use tracing::debug;

use crate::Result;

/// Conservative batch size for SQL `IN` clauses.
///
/// SQLite's `SQLITE_MAX_VARIABLE_NUMBER` is typically 999; 500 leaves
/// headroom for other parameters in the same statement.
pub const CHUNK_SIZE: usize = 500;

/// Yield successive chunks for batched `IN` clauses. `size` must be
/// positive.
pub fn chunked<T>(items: &[T], size: usize) -> impl Iterator<Item = &[T]> {
    assert!(size > 0, "chunk size must be positive");
    items.chunks(size)
}

/// One row of the `edges` table, attribute-complete.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRow {
    pub id: String,
    pub source_type: String,
    pub source_id: String,
    pub target_type: String,
    pub target_id: String,
    pub relation: String,
    pub confidence: Option<f64>,
    pub nli_label: Option<String>,
    pub nli_confidence: Option<f64>,
    pub is_academic: bool,
    pub is_influential: bool,
    pub citation_context: Option<String>,
    pub is_contradiction: bool,
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS tasks (
    id          TEXT PRIMARY KEY,
    query       TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS queries (
    id          TEXT PRIMARY KEY,
    task_id     TEXT REFERENCES tasks(id),
    text        TEXT NOT NULL,
    engine      TEXT,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS pages (
    id            TEXT PRIMARY KEY,
    task_id       TEXT REFERENCES tasks(id),
    url           TEXT NOT NULL,
    domain        TEXT,
    title         TEXT,
    canonical_id  TEXT,
    is_academic   INTEGER NOT NULL DEFAULT 0,
    fetched_at    TEXT
);

CREATE TABLE IF NOT EXISTS fragments (
    id        TEXT PRIMARY KEY,
    page_id   TEXT REFERENCES pages(id),
    text      TEXT NOT NULL,
    position  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS claims (
    id          TEXT PRIMARY KEY,
    task_id     TEXT REFERENCES tasks(id),
    text        TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS edges (
    id                TEXT PRIMARY KEY,
    source_type       TEXT NOT NULL,
    source_id         TEXT NOT NULL,
    target_type       TEXT NOT NULL,
    target_id         TEXT NOT NULL,
    relation          TEXT NOT NULL,
    confidence        REAL,
    nli_label         TEXT,
    nli_confidence    REAL,
    is_academic       INTEGER NOT NULL DEFAULT 0,
    is_influential    INTEGER NOT NULL DEFAULT 0,
    citation_context  TEXT,
    is_contradiction  INTEGER NOT NULL DEFAULT 0,
    cause_id          TEXT
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_type, source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_type, target_id);

CREATE TABLE IF NOT EXISTS works (
    canonical_id     TEXT PRIMARY KEY,
    title            TEXT NOT NULL,
    year             INTEGER,
    published_date   TEXT,
    venue            TEXT,
    doi              TEXT,
    citation_count   INTEGER NOT NULL DEFAULT 0,
    reference_count  INTEGER NOT NULL DEFAULT 0,
    is_open_access   INTEGER,
    oa_url           TEXT,
    pdf_url          TEXT,
    source_api       TEXT
);

CREATE TABLE IF NOT EXISTS work_authors (
    id            TEXT PRIMARY KEY,
    canonical_id  TEXT NOT NULL REFERENCES works(canonical_id),
    position      INTEGER NOT NULL,
    name          TEXT NOT NULL,
    affiliation   TEXT,
    orcid         TEXT,
    UNIQUE(canonical_id, position)
);

CREATE TABLE IF NOT EXISTS work_identifiers (
    id                 TEXT PRIMARY KEY,
    canonical_id       TEXT NOT NULL,
    provider           TEXT NOT NULL,
    provider_paper_id  TEXT NOT NULL,
    doi                TEXT,
    arxiv_id           TEXT,
    UNIQUE(provider, provider_paper_id)
);

CREATE INDEX IF NOT EXISTS idx_work_identifiers_paper ON work_identifiers(provider_paper_id);

CREATE VIEW IF NOT EXISTS v_evidence_chain AS
SELECT
    e.id               AS edge_id,
    e.relation         AS relation,
    e.confidence       AS confidence,
    c.id               AS claim_id,
    c.text             AS claim_text,
    f.id               AS fragment_id,
    f.text             AS fragment_text,
    p.id               AS page_id,
    p.url              AS page_url,
    p.domain           AS domain,
    w.canonical_id     AS canonical_id,
    w.title            AS work_title,
    CASE (SELECT COUNT(*) FROM work_authors wa WHERE wa.canonical_id = w.canonical_id)
        WHEN 0 THEN 'unknown'
        WHEN 1 THEN (SELECT wa.name FROM work_authors wa
                     WHERE wa.canonical_id = w.canonical_id AND wa.position = 0)
        ELSE (SELECT wa.name FROM work_authors wa
              WHERE wa.canonical_id = w.canonical_id AND wa.position = 0) || ' et al.'
    END AS author_display
FROM edges e
JOIN claims c
    ON e.target_type = 'claim' AND e.target_id = c.id
LEFT JOIN fragments f
    ON e.source_type = 'fragment' AND e.source_id = f.id
LEFT JOIN pages p
    ON f.page_id = p.id
LEFT JOIN works w
    ON p.canonical_id = w.canonical_id;

CREATE VIEW IF NOT EXISTS v_claim_origins AS
SELECT
    c.id               AS claim_id,
    c.task_id          AS task_id,
    c.text             AS claim_text,
    p.id               AS page_id,
    p.url              AS page_url,
    p.domain           AS domain,
    w.canonical_id     AS canonical_id,
    w.title            AS work_title,
    w.year             AS year,
    CASE (SELECT COUNT(*) FROM work_authors wa WHERE wa.canonical_id = w.canonical_id)
        WHEN 0 THEN 'unknown'
        WHEN 1 THEN (SELECT wa.name FROM work_authors wa
                     WHERE wa.canonical_id = w.canonical_id AND wa.position = 0)
        ELSE (SELECT wa.name FROM work_authors wa
              WHERE wa.canonical_id = w.canonical_id AND wa.position = 0) || ' et al.'
    END AS author_display
FROM claims c
JOIN edges e
    ON e.target_type = 'claim' AND e.target_id = c.id
JOIN fragments f
    ON e.source_type = 'fragment' AND e.source_id = f.id
JOIN pages p
    ON f.page_id = p.id
LEFT JOIN works w
    ON p.canonical_id = w.canonical_id;
";

/// Handle over one SQLite database with the pipeline schema applied.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating if needed) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        debug!("database schema applied");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Execute a statement, returning the number of affected rows.
    pub fn execute(&self, sql: &str, params: impl rusqlite::Params) -> Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(conn.execute(sql, params)?)
    }

    /// Fetch a single optional value with a caller-supplied row mapper.
    pub fn fetch_one<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: impl FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        match rows.next()? {
            Some(row) => Ok(Some(map(row)?)),
            None => Ok(None),
        }
    }

    /// Fetch all rows with a caller-supplied row mapper.
    pub fn fetch_all<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        mut map: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(map(row)?);
        }
        Ok(out)
    }

    /// Fetch edge rows for evidence-graph loading. The SELECT must project
    /// the full attribute set in schema order.
    pub fn query_edges(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<EdgeRow>> {
        self.fetch_all(sql, params, |row| {
            Ok(EdgeRow {
                id: row.get(0)?,
                source_type: row.get(1)?,
                source_id: row.get(2)?,
                target_type: row.get(3)?,
                target_id: row.get(4)?,
                relation: row.get(5)?,
                confidence: row.get(6)?,
                nli_label: row.get(7)?,
                nli_confidence: row.get(8)?,
                is_academic: row.get::<_, i64>(9)? != 0,
                is_influential: row.get::<_, i64>(10)? != 0,
                citation_context: row.get(11)?,
                is_contradiction: row.get::<_, i64>(12)? != 0,
            })
        })
    }
}
