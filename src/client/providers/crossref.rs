//! Crossref API client.
//!
//! DOI resolution and metadata normalization. Crossref carries no usable
//! citation graph, so the reference/citation operations always return
//! empty.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::client::{build_http_client, get_json, AcademicClient};
use crate::config::ProviderConfig;
use crate::models::{normalize_doi, AcademicSearchResult, Author, CitedPaper, Paper};
use crate::Result;

const PROVIDER: &str = "crossref";

pub struct CrossrefClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    message: T,
}

#[derive(Debug, Deserialize)]
struct SearchMessage {
    #[serde(default)]
    items: Vec<WorkMessage>,
    #[serde(rename = "total-results", default)]
    total_results: u64,
}

#[derive(Debug, Deserialize)]
struct WorkMessage {
    #[serde(rename = "DOI", default)]
    doi: Option<String>,
    #[serde(rename = "URL", default)]
    url: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    #[serde(default)]
    author: Vec<AuthorMessage>,
    #[serde(rename = "published-print", default)]
    published_print: Option<DateParts>,
    #[serde(rename = "published-online", default)]
    published_online: Option<DateParts>,
    #[serde(default)]
    published: Option<DateParts>,
    #[serde(default)]
    reference: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct AuthorMessage {
    #[serde(default)]
    given: Option<String>,
    #[serde(default)]
    family: Option<String>,
    #[serde(rename = "ORCID", default)]
    orcid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DateParts {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i32>>>,
}

impl DateParts {
    fn year(&self) -> Option<i32> {
        self.date_parts.first()?.first().copied().flatten()
    }
}

impl CrossrefClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: build_http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn parse_paper(data: WorkMessage) -> Paper {
        let doi = data.doi.map(|d| normalize_doi(&d)).filter(|d| !d.is_empty());
        let year = data
            .published_print
            .as_ref()
            .and_then(DateParts::year)
            .or_else(|| data.published_online.as_ref().and_then(DateParts::year))
            .or_else(|| data.published.as_ref().and_then(DateParts::year));

        let authors = data
            .author
            .into_iter()
            .filter_map(|a| {
                let name = match (a.given, a.family) {
                    (Some(given), Some(family)) => format!("{given} {family}"),
                    (Some(given), None) => given,
                    (None, Some(family)) => family,
                    (None, None) => return None,
                };
                Some(Author {
                    name,
                    affiliation: None,
                    orcid: a.orcid,
                })
            })
            .collect();

        let id = match &doi {
            Some(d) => format!("crossref:{d}"),
            None => format!(
                "crossref:{}",
                data.url
                    .as_deref()
                    .and_then(|u| u.rsplit('/').next())
                    .unwrap_or("unknown")
            ),
        };

        Paper {
            id,
            title: data.title.into_iter().next().unwrap_or_default(),
            // Crossref rarely carries abstracts
            abstract_text: None,
            authors,
            year,
            published_date: None,
            doi,
            arxiv_id: None,
            venue: data.container_title.into_iter().next().filter(|v| !v.is_empty()),
            citation_count: 0,
            reference_count: data.reference.map_or(0, |r| r.len() as i64),
            is_open_access: false,
            oa_url: None,
            pdf_url: None,
            source_api: PROVIDER.to_string(),
        }
    }

    /// Fetch one work by DOI. 404 (unknown DOI) surfaces as `None`.
    pub async fn get_paper_by_doi(&self, doi: &str) -> Option<Paper> {
        let normalized = normalize_doi(doi);
        let url = format!(
            "{}/works/{}",
            self.base_url,
            urlencoding::encode(&normalized)
        );
        let result: Result<Envelope<WorkMessage>> = get_json(
            &self.http,
            PROVIDER,
            &url,
            &[] as &[(&str, &str)],
            "crossref.get_paper",
        )
        .await;

        match result {
            Ok(envelope) => Some(Self::parse_paper(envelope.message)),
            Err(e) => {
                warn!(doi, error = %e, "failed to get paper by DOI");
                None
            }
        }
    }
}

#[async_trait]
impl AcademicClient for CrossrefClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn search(&self, query: &str, limit: usize) -> AcademicSearchResult {
        let url = format!("{}/works", self.base_url);
        let limit_str = limit.to_string();
        let result: Result<Envelope<SearchMessage>> = get_json(
            &self.http,
            PROVIDER,
            &url,
            &[("query", query), ("rows", limit_str.as_str())],
            "crossref.search",
        )
        .await;

        match result {
            Ok(envelope) => AcademicSearchResult {
                papers: envelope
                    .message
                    .items
                    .into_iter()
                    .map(Self::parse_paper)
                    .collect(),
                total_count: envelope.message.total_results,
                next_cursor: None,
                source_api: PROVIDER.to_string(),
            },
            Err(e) => {
                error!(query, error = %e, "Crossref search failed");
                AcademicSearchResult::empty(PROVIDER)
            }
        }
    }

    async fn get_paper(&self, paper_id: &str) -> Option<Paper> {
        let doi = paper_id.strip_prefix("crossref:").unwrap_or(paper_id);
        self.get_paper_by_doi(doi).await
    }

    async fn get_references(&self, paper_id: &str) -> Vec<CitedPaper> {
        debug!(paper_id, "Crossref does not expose reference metadata");
        Vec::new()
    }

    async fn get_citations(&self, paper_id: &str) -> Vec<CitedPaper> {
        debug!(paper_id, "Crossref does not support citations");
        Vec::new()
    }
}
