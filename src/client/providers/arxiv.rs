//! arXiv API client.
//!
//! Preprint search over the Atom feed. arXiv exposes no citation data, so
//! reference/citation operations return empty.

use async_trait::async_trait;
use chrono::NaiveDate;
use roxmltree::Document;
use tracing::{debug, error, warn};

use crate::client::{build_http_client, get_text, AcademicClient};
use crate::config::ProviderConfig;
use crate::models::{AcademicSearchResult, Author, CitedPaper, Paper};
use crate::Result;

const PROVIDER: &str = "arxiv";

pub struct ArxivClient {
    http: reqwest::Client,
    base_url: String,
}

impl ArxivClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: build_http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn query_url(&self) -> String {
        format!("{}/query", self.base_url)
    }

    /// Parse the Atom feed into papers. Malformed entries are skipped.
    fn parse_atom_feed(xml_text: &str) -> Vec<Paper> {
        let doc = match Document::parse(xml_text) {
            Ok(doc) => doc,
            Err(e) => {
                error!(error = %e, "failed to parse arXiv Atom feed");
                return Vec::new();
            }
        };

        doc.descendants()
            .filter(|n| n.has_tag_name("entry"))
            .filter_map(Self::parse_entry)
            .collect()
    }

    fn parse_entry(entry: roxmltree::Node<'_, '_>) -> Option<Paper> {
        let text_of = |tag: &str| {
            entry
                .children()
                .find(|n| n.has_tag_name(tag))
                .and_then(|n| n.text())
                .map(|t| collapse_whitespace(t.trim()))
        };

        let id_url = text_of("id")?;
        let arxiv_id = id_url
            .rsplit('/')
            .next()
            .unwrap_or(id_url.as_str())
            .to_string();
        if arxiv_id.is_empty() {
            return None;
        }

        let title = text_of("title").unwrap_or_default();
        let abstract_text = text_of("summary").filter(|s| !s.is_empty());

        let authors = entry
            .children()
            .filter(|n| n.has_tag_name("author"))
            .filter_map(|author| {
                author
                    .children()
                    .find(|n| n.has_tag_name("name"))
                    .and_then(|n| n.text())
                    .map(|name| Author::new(name.trim()))
            })
            .collect();

        let (year, published_date) = match text_of("published") {
            // Format: YYYY-MM-DDTHH:MM:SSZ
            Some(published) => {
                let date = published
                    .get(..10)
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
                (date.map(|d| chrono::Datelike::year(&d)), date)
            }
            None => (None, None),
        };

        let pdf_url = entry
            .children()
            .filter(|n| n.has_tag_name("link"))
            .find(|n| n.attribute("type") == Some("application/pdf"))
            .and_then(|n| n.attribute("href"))
            .map(str::to_string);

        Some(Paper {
            id: format!("arxiv:{arxiv_id}"),
            title,
            abstract_text,
            authors,
            year,
            published_date,
            doi: None,
            arxiv_id: Some(arxiv_id.clone()),
            venue: Some("arXiv".to_string()),
            // The arXiv API carries no citation data
            citation_count: 0,
            reference_count: 0,
            is_open_access: true,
            oa_url: Some(
                pdf_url
                    .clone()
                    .unwrap_or_else(|| format!("https://arxiv.org/abs/{arxiv_id}")),
            ),
            pdf_url,
            source_api: PROVIDER.to_string(),
        })
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl AcademicClient for ArxivClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn search(&self, query: &str, limit: usize) -> AcademicSearchResult {
        let search_query = format!("all:{query}");
        let limit_str = limit.to_string();
        let result = get_text(
            &self.http,
            PROVIDER,
            &self.query_url(),
            &[
                ("search_query", search_query.as_str()),
                ("start", "0"),
                ("max_results", limit_str.as_str()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ],
            "arxiv.search",
        )
        .await;

        match result {
            Ok(xml) => {
                let papers = Self::parse_atom_feed(&xml);
                AcademicSearchResult {
                    total_count: papers.len() as u64,
                    papers,
                    next_cursor: None,
                    source_api: PROVIDER.to_string(),
                }
            }
            Err(e) => {
                error!(query, error = %e, "arXiv search failed");
                AcademicSearchResult::empty(PROVIDER)
            }
        }
    }

    async fn get_paper(&self, paper_id: &str) -> Option<Paper> {
        let arxiv_id = paper_id
            .strip_prefix("arXiv:")
            .or_else(|| paper_id.strip_prefix("arxiv:"))
            .unwrap_or(paper_id);
        let result = get_text(
            &self.http,
            PROVIDER,
            &self.query_url(),
            &[("id_list", arxiv_id)],
            "arxiv.get_paper",
        )
        .await;

        match result {
            Ok(xml) => Self::parse_atom_feed(&xml).into_iter().next(),
            Err(e) => {
                warn!(paper_id, error = %e, "failed to get paper");
                None
            }
        }
    }

    async fn get_references(&self, paper_id: &str) -> Vec<CitedPaper> {
        debug!(paper_id, "arXiv does not support references");
        Vec::new()
    }

    async fn get_citations(&self, paper_id: &str) -> Vec<CitedPaper> {
        debug!(paper_id, "arXiv does not support citations");
        Vec::new()
    }
}
