//! Normalized bibliographic persistence: `works`, `work_authors`,
//! `work_identifiers`, and the mappings back to `pages`.

use tracing::debug;
use uuid::Uuid;

use crate::models::Paper;
use crate::storage::Database;
use crate::Result;

/// Upsert a paper into the normalized tables under a pre-computed
/// canonical ID.
///
/// * `works` keeps the MAX of citation/reference counts and coalesces the
///   optional open-access fields.
/// * `work_authors` is written once per canonical ID, in author order.
/// * `work_identifiers` upserts on `(provider, provider_paper_id)`,
///   coalescing missing DOI/arXiv fields.
pub fn persist_work(db: &Database, paper: &Paper, canonical_id: &str) -> Result<()> {
    db.execute(
        "INSERT INTO works (
            canonical_id, title, year, published_date, venue, doi,
            citation_count, reference_count, is_open_access, oa_url, pdf_url, source_api
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(canonical_id) DO UPDATE SET
            citation_count = MAX(works.citation_count, excluded.citation_count),
            reference_count = MAX(works.reference_count, excluded.reference_count),
            is_open_access = COALESCE(excluded.is_open_access, works.is_open_access),
            oa_url = COALESCE(excluded.oa_url, works.oa_url),
            pdf_url = COALESCE(excluded.pdf_url, works.pdf_url)",
        rusqlite::params![
            canonical_id,
            paper.title,
            paper.year,
            paper.published_date.map(|d| d.to_string()),
            paper.venue,
            paper.doi,
            paper.citation_count,
            paper.reference_count,
            paper.is_open_access as i64,
            paper.oa_url,
            paper.pdf_url,
            paper.source_api,
        ],
    )?;

    // Authors are inserted once per canonical ID; INSERT OR IGNORE covers
    // concurrent writers racing past the existence check.
    let existing_authors: Option<i64> = db.fetch_one(
        "SELECT COUNT(*) FROM work_authors WHERE canonical_id = ?1",
        rusqlite::params![canonical_id],
        |row| row.get(0),
    )?;
    if existing_authors.unwrap_or(0) == 0 {
        for (position, author) in paper.authors.iter().enumerate() {
            let author_id = format!("wa_{}", &Uuid::new_v4().simple().to_string()[..12]);
            db.execute(
                "INSERT OR IGNORE INTO work_authors (id, canonical_id, position, name, affiliation, orcid)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    author_id,
                    canonical_id,
                    position as i64,
                    author.name,
                    author.affiliation,
                    author.orcid,
                ],
            )?;
        }
    }

    let identifier_id = format!("wi_{}", &Uuid::new_v4().simple().to_string()[..12]);
    db.execute(
        "INSERT INTO work_identifiers (id, canonical_id, provider, provider_paper_id, doi, arxiv_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(provider, provider_paper_id) DO UPDATE SET
            doi = COALESCE(excluded.doi, work_identifiers.doi),
            arxiv_id = COALESCE(excluded.arxiv_id, work_identifiers.arxiv_id)",
        rusqlite::params![
            identifier_id,
            canonical_id,
            paper.source_api,
            paper.id,
            paper.doi,
            paper.arxiv_id,
        ],
    )?;

    debug!(
        canonical_id,
        paper_id = %paper.id,
        authors = paper.authors.len(),
        "persisted work to normalized tables"
    );
    Ok(())
}

/// Resolve a provider paper ID to a page ID via the canonical identity.
/// This is the supported mapping between provider identifiers and pages.
pub fn resolve_paper_id_to_page_id(db: &Database, paper_id: &str) -> Result<Option<String>> {
    db.fetch_one(
        "SELECT p.id
         FROM work_identifiers wi
         JOIN pages p ON p.canonical_id = wi.canonical_id
         WHERE wi.provider_paper_id = ?1
         LIMIT 1",
        rusqlite::params![paper_id],
        |row| row.get(0),
    )
}

/// Canonical ID recorded for a provider paper ID, if any.
pub fn get_canonical_id_for_paper_id(db: &Database, paper_id: &str) -> Result<Option<String>> {
    db.fetch_one(
        "SELECT canonical_id FROM work_identifiers WHERE provider_paper_id = ?1",
        rusqlite::params![paper_id],
        |row| row.get(0),
    )
}
