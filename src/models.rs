//! Shared bibliographic data model.
//!
//! Every provider client produces [`Paper`] records in this shape; the
//! canonical index, citation traverser, and persistence layer all consume
//! them. Provider-specific response structs live next to each client and
//! convert into these types at the parse boundary.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One author of a paper, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
}

impl Author {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            affiliation: None,
            orcid: None,
        }
    }
}

/// Bibliographic record returned by an academic API.
///
/// The `id` is always prefixed with its provider namespace
/// (`s2:<40hex>`, `openalex:W<n>`, `crossref:<doi>`, `arxiv:<id>`).
/// A present DOI is normalized: no `https://doi.org/` prefix, lowercased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub authors: Vec<Author>,
    pub year: Option<i32>,
    pub published_date: Option<NaiveDate>,
    pub doi: Option<String>,
    pub arxiv_id: Option<String>,
    pub venue: Option<String>,
    pub citation_count: i64,
    pub reference_count: i64,
    pub is_open_access: bool,
    pub oa_url: Option<String>,
    pub pdf_url: Option<String>,
    pub source_api: String,
}

impl Paper {
    /// Minimal record for tests and fixture assembly.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, source_api: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            abstract_text: None,
            authors: Vec::new(),
            year: None,
            published_date: None,
            doi: None,
            arxiv_id: None,
            venue: None,
            citation_count: 0,
            reference_count: 0,
            is_open_access: false,
            oa_url: None,
            pdf_url: None,
            source_api: source_api.into(),
        }
    }

    /// Merge another record for the same paper into this one.
    ///
    /// Numeric counts take the MAX; optional fields are filled only when
    /// currently absent — a populated field is never overwritten by `None`.
    pub fn merge_from(&mut self, other: &Paper) {
        self.citation_count = self.citation_count.max(other.citation_count);
        self.reference_count = self.reference_count.max(other.reference_count);
        self.is_open_access = self.is_open_access || other.is_open_access;

        fill_missing(&mut self.abstract_text, &other.abstract_text);
        fill_missing(&mut self.doi, &other.doi);
        fill_missing(&mut self.arxiv_id, &other.arxiv_id);
        fill_missing(&mut self.venue, &other.venue);
        fill_missing(&mut self.oa_url, &other.oa_url);
        fill_missing(&mut self.pdf_url, &other.pdf_url);
        if self.year.is_none() {
            self.year = other.year;
        }
        if self.published_date.is_none() {
            self.published_date = other.published_date;
        }
        if self.authors.is_empty() {
            self.authors = other.authors.clone();
        }
    }

    /// Project this record into the SERP-shaped result the outer search
    /// surface returns.
    #[must_use]
    pub fn to_search_result(&self) -> SearchResult {
        let url = self
            .doi
            .as_ref()
            .map(|d| format!("https://doi.org/{d}"))
            .or_else(|| self.oa_url.clone())
            .unwrap_or_default();
        SearchResult {
            title: self.title.clone(),
            url,
            snippet: self.abstract_text.clone().unwrap_or_default(),
            engine: self.source_api.clone(),
            rank: 0,
        }
    }
}

fn fill_missing(slot: &mut Option<String>, value: &Option<String>) {
    if slot.is_none() {
        slot.clone_from(value);
    }
}

/// Strip URL/scheme prefixes from a DOI and lowercase it.
///
/// `https://doi.org/10.1234/X` and `doi:10.1234/x` both normalize to
/// `10.1234/x`.
#[must_use]
pub fn normalize_doi(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("https://doi.org/")
        .or_else(|| trimmed.strip_prefix("http://doi.org/"))
        .or_else(|| trimmed.strip_prefix("doi:"))
        .unwrap_or(trimmed);
    stripped.to_lowercase()
}

/// Directed citation relationship between two provider-scoped paper IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub citing_paper_id: String,
    pub cited_paper_id: String,
    pub is_influential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// A paper on the far end of a citation edge, with the provider's
/// influential-citation flag. The flag travels on emitted [`Citation`]
/// edges, never inside [`Paper`].
#[derive(Debug, Clone, PartialEq)]
pub struct CitedPaper {
    pub paper: Paper,
    pub is_influential: bool,
}

/// Result page from one academic API search call.
#[derive(Debug, Clone, Default)]
pub struct AcademicSearchResult {
    pub papers: Vec<Paper>,
    pub total_count: u64,
    pub next_cursor: Option<String>,
    pub source_api: String,
}

impl AcademicSearchResult {
    /// Empty result attributed to a provider, used on swallowed failures.
    #[must_use]
    pub fn empty(source_api: &str) -> Self {
        Self {
            source_api: source_api.to_string(),
            ..Self::default()
        }
    }
}

/// Opaque SERP record produced by an external search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerpResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub engine: String,
    pub rank: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// One row of the unified search response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub engine: String,
    pub rank: u32,
}

/// Response envelope for [`crate::search::AcademicSearchProvider::search`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub query: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub total_count: u64,
}
