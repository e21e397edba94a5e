//! Semantic Scholar Graph API client.
//!
//! Primary provider for citation graphs. Accepts bare 40-hex `paperId`s
//! and the API's own prefixed forms (`DOI:`, `ArXiv:`, `PMID:`,
//! `CorpusId:`). The internal `s2:` prefix is stripped before calls.
//! OpenAlex-namespace identifiers are skipped without any HTTP request —
//! they can never resolve here and only burn rate-limit budget.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::client::{build_http_client, get_json, AcademicClient};
use crate::config::ProviderConfig;
use crate::models::{normalize_doi, AcademicSearchResult, Author, CitedPaper, Paper};
use crate::Result;

const PROVIDER: &str = "semantic_scholar";
const FIELDS: &str = "paperId,title,abstract,year,authors,citationCount,referenceCount,isOpenAccess,openAccessPdf,venue,externalIds";

pub struct SemanticScholarClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    data: Vec<PaperResponse>,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    next: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ReferencesEnvelope {
    #[serde(default)]
    data: Vec<ReferenceEntry>,
}

#[derive(Debug, Deserialize)]
struct ReferenceEntry {
    #[serde(rename = "citedPaper")]
    cited_paper: Option<PaperResponse>,
    #[serde(rename = "citingPaper")]
    citing_paper: Option<PaperResponse>,
    #[serde(rename = "isInfluential", default)]
    is_influential: bool,
}

#[derive(Debug, Deserialize)]
struct PaperResponse {
    #[serde(rename = "paperId")]
    paper_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    authors: Vec<AuthorResponse>,
    #[serde(rename = "citationCount", default)]
    citation_count: i64,
    #[serde(rename = "referenceCount", default)]
    reference_count: i64,
    #[serde(rename = "isOpenAccess", default)]
    is_open_access: bool,
    #[serde(rename = "openAccessPdf", default)]
    open_access_pdf: Option<OpenAccessPdf>,
    #[serde(default)]
    venue: Option<String>,
    #[serde(rename = "externalIds", default)]
    external_ids: Option<ExternalIds>,
}

#[derive(Debug, Deserialize)]
struct AuthorResponse {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAccessPdf {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "ArXiv")]
    arxiv: Option<String>,
}

impl SemanticScholarClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: build_http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Strip the internal `s2:` prefix; pass API-recognized prefixed IDs
    /// (`DOI:`, `ArXiv:`, ...) and bare hashes through unchanged.
    fn normalize_paper_id(paper_id: &str) -> &str {
        paper_id.strip_prefix("s2:").unwrap_or(paper_id)
    }

    /// An identifier in another provider's namespace can never resolve on
    /// Semantic Scholar; skip it before the rate limiter ever sees it.
    fn is_foreign_id(paper_id: &str) -> bool {
        let trimmed = paper_id.trim();
        trimmed.starts_with("openalex:") || trimmed.starts_with("https://openalex.org/")
    }

    fn parse_paper(data: PaperResponse) -> Paper {
        let external_ids = data.external_ids.unwrap_or_default();
        Paper {
            id: format!("s2:{}", data.paper_id),
            title: data.title.unwrap_or_default(),
            abstract_text: data.abstract_text,
            authors: data
                .authors
                .into_iter()
                .filter_map(|a| a.name)
                .map(Author::new)
                .collect(),
            year: data.year,
            published_date: None,
            doi: external_ids.doi.map(|d| normalize_doi(&d)),
            arxiv_id: external_ids.arxiv,
            venue: data.venue.filter(|v| !v.is_empty()),
            citation_count: data.citation_count,
            reference_count: data.reference_count,
            is_open_access: data.is_open_access,
            oa_url: data.open_access_pdf.and_then(|p| p.url),
            pdf_url: None,
            source_api: PROVIDER.to_string(),
        }
    }

    async fn fetch_edges(&self, paper_id: &str, endpoint: &str) -> Vec<CitedPaper> {
        if Self::is_foreign_id(paper_id) {
            debug!(paper_id, endpoint, "skipping foreign identifier (no request made)");
            return Vec::new();
        }
        let pid = Self::normalize_paper_id(paper_id);
        let url = format!("{}/paper/{}/{}", self.base_url, pid, endpoint);
        let fields = format!("{FIELDS},isInfluential");
        let result: Result<ReferencesEnvelope> = get_json(
            &self.http,
            PROVIDER,
            &url,
            &[("fields", fields.as_str())],
            &format!("semantic_scholar.{endpoint}"),
        )
        .await;

        match result {
            Ok(envelope) => envelope
                .data
                .into_iter()
                .filter_map(|entry| {
                    let is_influential = entry.is_influential;
                    entry
                        .cited_paper
                        .or(entry.citing_paper)
                        .map(|p| CitedPaper {
                            paper: Self::parse_paper(p),
                            is_influential,
                        })
                })
                .collect(),
            Err(e) => {
                warn!(paper_id, endpoint, error = %e, "failed to fetch citation edges");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl AcademicClient for SemanticScholarClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn search(&self, query: &str, limit: usize) -> AcademicSearchResult {
        let url = format!("{}/paper/search", self.base_url);
        let limit_str = limit.to_string();
        let result: Result<SearchEnvelope> = get_json(
            &self.http,
            PROVIDER,
            &url,
            &[("query", query), ("limit", limit_str.as_str()), ("fields", FIELDS)],
            "semantic_scholar.search",
        )
        .await;

        match result {
            Ok(envelope) => AcademicSearchResult {
                papers: envelope.data.into_iter().map(Self::parse_paper).collect(),
                total_count: envelope.total,
                // The API returns `next` as an integer offset
                next_cursor: envelope.next.map(|v| v.to_string()),
                source_api: PROVIDER.to_string(),
            },
            Err(e) => {
                error!(query, error = %e, "Semantic Scholar search failed");
                AcademicSearchResult::empty(PROVIDER)
            }
        }
    }

    async fn get_paper(&self, paper_id: &str) -> Option<Paper> {
        if Self::is_foreign_id(paper_id) {
            debug!(paper_id, "skipping foreign identifier (no request made)");
            return None;
        }
        let pid = Self::normalize_paper_id(paper_id);
        let url = format!("{}/paper/{}", self.base_url, pid);
        let result: Result<PaperResponse> = get_json(
            &self.http,
            PROVIDER,
            &url,
            &[("fields", FIELDS)],
            "semantic_scholar.get_paper",
        )
        .await;

        match result {
            Ok(data) => Some(Self::parse_paper(data)),
            Err(e) => {
                warn!(paper_id, error = %e, "failed to get paper");
                None
            }
        }
    }

    async fn get_references(&self, paper_id: &str) -> Vec<CitedPaper> {
        self.fetch_edges(paper_id, "references").await
    }

    async fn get_citations(&self, paper_id: &str) -> Vec<CitedPaper> {
        self.fetch_edges(paper_id, "citations").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_internal_prefix_only() {
        assert_eq!(
            SemanticScholarClient::normalize_paper_id("s2:204e3073870fae3d05bcbc2f6a8e263d9b72e776"),
            "204e3073870fae3d05bcbc2f6a8e263d9b72e776"
        );
        assert_eq!(
            SemanticScholarClient::normalize_paper_id("DOI:10.7717/peerj.4375"),
            "DOI:10.7717/peerj.4375"
        );
        assert_eq!(
            SemanticScholarClient::normalize_paper_id("ArXiv:2301.12345"),
            "ArXiv:2301.12345"
        );
    }

    #[test]
    fn detects_foreign_identifiers() {
        assert!(SemanticScholarClient::is_foreign_id("openalex:W123"));
        assert!(SemanticScholarClient::is_foreign_id("https://openalex.org/W123"));
        assert!(!SemanticScholarClient::is_foreign_id("DOI:10.1234/x"));
        assert!(!SemanticScholarClient::is_foreign_id(
            "204e3073870fae3d05bcbc2f6a8e263d9b72e776"
        ));
    }

    #[test]
    fn parse_paper_normalizes_doi_and_prefixes_id() {
        let data: PaperResponse = serde_json::from_value(serde_json::json!({
            "paperId": "204e3073870fae3d05bcbc2f6a8e263d9b72e776",
            "title": "Attention Is All You Need",
            "abstract": "The dominant sequence transduction models...",
            "year": 2017,
            "authors": [{"name": "Ashish Vaswani"}],
            "citationCount": 100000,
            "referenceCount": 40,
            "isOpenAccess": true,
            "openAccessPdf": {"url": "https://arxiv.org/pdf/1706.03762"},
            "venue": "NeurIPS",
            "externalIds": {"DOI": "10.5555/EXAMPLE", "ArXiv": "1706.03762"}
        }))
        .unwrap();
        let paper = SemanticScholarClient::parse_paper(data);
        assert_eq!(paper.id, "s2:204e3073870fae3d05bcbc2f6a8e263d9b72e776");
        assert_eq!(paper.doi.as_deref(), Some("10.5555/example"));
        assert_eq!(paper.arxiv_id.as_deref(), Some("1706.03762"));
        assert_eq!(paper.authors.len(), 1);
        assert_eq!(paper.source_api, "semantic_scholar");
    }
}
