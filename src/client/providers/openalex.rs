//! OpenAlex API client.
//!
//! Large-scale metadata provider. Work IDs are normalized from the
//! `openalex:W...` internal form and `https://openalex.org/W...` URLs; DOI
//! URLs are passed through untouched because the API resolves them itself.
//! Known-absent IDs are remembered in a process-wide negative cache for an
//! hour so a crowded rate limiter is not spent re-fetching 404s.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::client::{build_http_client, get_json, AcademicClient};
use crate::config::ProviderConfig;
use crate::models::{normalize_doi, AcademicSearchResult, Author, CitedPaper, Paper};
use crate::Result;

const PROVIDER: &str = "openalex";
const SELECT: &str = "id,title,abstract_inverted_index,publication_year,authorships,doi,cited_by_count,referenced_works_count,open_access,primary_location";
const SELECT_WITH_REFS: &str = "id,title,abstract_inverted_index,publication_year,authorships,doi,cited_by_count,referenced_works_count,referenced_works,open_access,primary_location";

/// Cap on reference fan-out per work.
const MAX_REFERENCED_WORKS: usize = 20;

/// TTL map of identifiers that recently returned 404. Entries are swept
/// on access; the map never grows past what one TTL window of misses can
/// produce.
pub(crate) struct NegativeCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl NegativeCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn contains(&self, key: &str) -> bool {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match entries.get(key) {
            Some(at) if at.elapsed() < self.ttl => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    fn insert(&self, key: &str) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        entries.retain(|_, at| now.duration_since(*at) < self.ttl);
        entries.insert(key.to_string(), now);
    }

    fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

fn negative_404_cache() -> &'static NegativeCache {
    static CACHE: OnceLock<NegativeCache> = OnceLock::new();
    CACHE.get_or_init(|| NegativeCache::new(Duration::from_secs(3600)))
}

/// Forget all cached 404s. Test harnesses only.
pub fn clear_negative_404_cache() {
    negative_404_cache().clear();
}

pub struct OpenAlexClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    #[serde(default)]
    results: Vec<WorkResponse>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(default)]
    count: u64,
}

#[derive(Debug, Deserialize)]
struct WorkResponse {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    abstract_inverted_index: Option<HashMap<String, Vec<u32>>>,
    #[serde(default)]
    publication_year: Option<i32>,
    #[serde(default)]
    authorships: Vec<Authorship>,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    cited_by_count: i64,
    #[serde(default)]
    referenced_works_count: i64,
    #[serde(default)]
    referenced_works: Option<Vec<String>>,
    #[serde(default)]
    open_access: Option<OpenAccess>,
    #[serde(default)]
    primary_location: Option<PrimaryLocation>,
}

#[derive(Debug, Deserialize)]
struct Authorship {
    #[serde(default)]
    author: Option<AuthorResponse>,
    #[serde(default)]
    raw_author_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorResponse {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    orcid: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAccess {
    #[serde(default)]
    is_oa: bool,
    #[serde(default)]
    oa_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrimaryLocation {
    #[serde(default)]
    source: Option<LocationSource>,
}

#[derive(Debug, Deserialize)]
struct LocationSource {
    #[serde(default)]
    display_name: Option<String>,
}

impl OpenAlexClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: build_http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Normalize to a bare work ID. DOI URLs are kept as-is: the works
    /// endpoint resolves them directly.
    fn normalize_work_id(paper_id: &str) -> String {
        let pid = paper_id.trim();
        if let Some(rest) = pid.strip_prefix("openalex:") {
            return rest.to_string();
        }
        if pid.starts_with("https://doi.org/") {
            return pid.to_string();
        }
        if pid.starts_with("https://openalex.org/") {
            return pid.rsplit('/').next().unwrap_or(pid).to_string();
        }
        pid.to_string()
    }

    /// Semantic Scholar hashes can never resolve on OpenAlex.
    fn is_foreign_id(paper_id: &str) -> bool {
        paper_id.trim().starts_with("s2:")
    }

    /// Rebuild the plain-text abstract from the inverted index form
    /// (`{word: [positions...]}`), joining words in position order.
    fn reconstruct_abstract(inverted_index: Option<HashMap<String, Vec<u32>>>) -> Option<String> {
        let inverted_index = inverted_index?;
        let mut positions: std::collections::BTreeMap<u32, &str> = std::collections::BTreeMap::new();
        for (word, indices) in &inverted_index {
            for &pos in indices {
                positions.insert(pos, word.as_str());
            }
        }
        if positions.is_empty() {
            return None;
        }
        Some(
            positions
                .values()
                .copied()
                .collect::<Vec<_>>()
                .join(" "),
        )
    }

    fn parse_paper(data: WorkResponse) -> Paper {
        let abstract_text = Self::reconstruct_abstract(data.abstract_inverted_index);
        let oa = data.open_access.unwrap_or_default();
        let venue = data
            .primary_location
            .and_then(|l| l.source)
            .and_then(|s| s.display_name);
        let work_id = data.id.rsplit('/').next().unwrap_or(&data.id).to_string();

        let authors = data
            .authorships
            .into_iter()
            .filter_map(|authorship| {
                let (display_name, orcid) = match authorship.author {
                    Some(a) => (a.display_name, a.orcid),
                    None => (None, None),
                };
                // display_name can be null; fall back to the raw name
                let name = display_name.or(authorship.raw_author_name)?;
                Some(Author {
                    name,
                    affiliation: None,
                    orcid,
                })
            })
            .collect();

        Paper {
            id: format!("openalex:{work_id}"),
            title: data.title.unwrap_or_default(),
            abstract_text,
            authors,
            year: data.publication_year,
            published_date: None,
            doi: data.doi.map(|d| normalize_doi(&d)).filter(|d| !d.is_empty()),
            arxiv_id: None,
            venue,
            citation_count: data.cited_by_count,
            reference_count: data.referenced_works_count,
            is_open_access: oa.is_oa,
            oa_url: oa.oa_url.clone(),
            pdf_url: oa.oa_url,
            source_api: PROVIDER.to_string(),
        }
    }

    async fn fetch_work(&self, pid: &str, select: &str, operation: &str) -> Result<WorkResponse> {
        let url = format!("{}/works/{}", self.base_url, pid);
        get_json(&self.http, PROVIDER, &url, &[("select", select)], operation).await
    }
}

#[async_trait]
impl AcademicClient for OpenAlexClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn search(&self, query: &str, limit: usize) -> AcademicSearchResult {
        let url = format!("{}/works", self.base_url);
        let limit_str = limit.to_string();
        let result: Result<ListEnvelope> = get_json(
            &self.http,
            PROVIDER,
            &url,
            &[("search", query), ("per-page", limit_str.as_str()), ("select", SELECT)],
            "openalex.search",
        )
        .await;

        match result {
            Ok(envelope) => AcademicSearchResult {
                papers: envelope.results.into_iter().map(Self::parse_paper).collect(),
                total_count: envelope.meta.map_or(0, |m| m.count),
                next_cursor: None,
                source_api: PROVIDER.to_string(),
            },
            Err(e) => {
                error!(query, error = %e, "OpenAlex search failed");
                AcademicSearchResult::empty(PROVIDER)
            }
        }
    }

    async fn get_paper(&self, paper_id: &str) -> Option<Paper> {
        if Self::is_foreign_id(paper_id) {
            debug!(paper_id, "skipping foreign identifier (no request made)");
            return None;
        }
        if negative_404_cache().contains(paper_id) {
            debug!(paper_id, "skipping paper (cached 404)");
            return None;
        }

        let pid = Self::normalize_work_id(paper_id);
        match self.fetch_work(&pid, SELECT, "openalex.get_paper").await {
            Ok(data) => Some(Self::parse_paper(data)),
            Err(e) => {
                if e.status() == Some(404) {
                    negative_404_cache().insert(paper_id);
                    debug!(paper_id, "cached 404 for paper");
                }
                warn!(paper_id, error = %e, "failed to get paper");
                None
            }
        }
    }

    async fn get_references(&self, paper_id: &str) -> Vec<CitedPaper> {
        if Self::is_foreign_id(paper_id) {
            debug!(paper_id, "skipping foreign identifier (no request made)");
            return Vec::new();
        }
        let pid = Self::normalize_work_id(paper_id);

        let refs = match self
            .fetch_work(&pid, "id,referenced_works", "openalex.get_references")
            .await
        {
            Ok(data) => data.referenced_works.unwrap_or_default(),
            Err(e) => {
                debug!(paper_id, error = %e, "referenced_works fetch failed");
                return Vec::new();
            }
        };

        let capped: Vec<String> = refs.into_iter().take(MAX_REFERENCED_WORKS).collect();
        let fetches = capped.iter().map(|work_url| self.get_paper(work_url));
        futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .filter(|p| p.abstract_text.is_some())
            .map(|paper| CitedPaper {
                paper,
                // OpenAlex has no influential-citation signal
                is_influential: false,
            })
            .collect()
    }

    async fn get_citations(&self, paper_id: &str) -> Vec<CitedPaper> {
        if Self::is_foreign_id(paper_id) {
            debug!(paper_id, "skipping foreign identifier (no request made)");
            return Vec::new();
        }

        // The cites filter needs a work ID (Wxxx); resolve DOI inputs to a
        // work first.
        let mut pid = Self::normalize_work_id(paper_id);
        if pid.starts_with("https://doi.org/") || pid.starts_with("doi:") {
            match self.get_paper(&pid).await {
                Some(paper) => pid = Self::normalize_work_id(&paper.id),
                None => {
                    debug!(paper_id, "cannot get citations: DOI not found in OpenAlex");
                    return Vec::new();
                }
            }
        }

        let url = format!("{}/works", self.base_url);
        let filter = format!("cites:{pid}");
        let result: Result<ListEnvelope> = get_json(
            &self.http,
            PROVIDER,
            &url,
            &[
                ("filter", filter.as_str()),
                ("per-page", "20"),
                ("select", SELECT),
            ],
            "openalex.get_citations",
        )
        .await;

        match result {
            Ok(envelope) => envelope
                .results
                .into_iter()
                .map(Self::parse_paper)
                .filter(|p| p.abstract_text.is_some())
                .map(|paper| CitedPaper {
                    paper,
                    is_influential: false,
                })
                .collect(),
            Err(e) => {
                debug!(paper_id, error = %e, "citations fetch failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_id_normalization() {
        assert_eq!(OpenAlexClient::normalize_work_id("openalex:W123"), "W123");
        assert_eq!(
            OpenAlexClient::normalize_work_id("https://openalex.org/W123"),
            "W123"
        );
        assert_eq!(
            OpenAlexClient::normalize_work_id("https://doi.org/10.1234/x"),
            "https://doi.org/10.1234/x"
        );
        assert_eq!(OpenAlexClient::normalize_work_id("W456"), "W456");
    }

    #[test]
    fn foreign_s2_ids_detected() {
        assert!(OpenAlexClient::is_foreign_id("s2:abcdef"));
        assert!(!OpenAlexClient::is_foreign_id("W123"));
        assert!(!OpenAlexClient::is_foreign_id("openalex:W123"));
    }

    #[test]
    fn abstract_reconstruction_orders_by_position() {
        let mut index = HashMap::new();
        index.insert("world".to_string(), vec![1]);
        index.insert("hello".to_string(), vec![0]);
        index.insert("again".to_string(), vec![2, 4]);
        index.insert("and".to_string(), vec![3]);
        assert_eq!(
            OpenAlexClient::reconstruct_abstract(Some(index)).as_deref(),
            Some("hello world again and again")
        );
    }

    #[test]
    fn abstract_reconstruction_handles_missing_index() {
        assert_eq!(OpenAlexClient::reconstruct_abstract(None), None);
        assert_eq!(OpenAlexClient::reconstruct_abstract(Some(HashMap::new())), None);
    }

    #[test]
    fn negative_cache_expires_entries() {
        let cache = NegativeCache::new(Duration::from_millis(20));
        cache.insert("W1");
        assert!(cache.contains("W1"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!cache.contains("W1"));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn negative_cache_sweeps_on_insert() {
        let cache = NegativeCache::new(Duration::from_millis(10));
        cache.insert("W1");
        cache.insert("W2");
        std::thread::sleep(Duration::from_millis(20));
        cache.insert("W3");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn parse_paper_extracts_fields() {
        let data: WorkResponse = serde_json::from_value(serde_json::json!({
            "id": "https://openalex.org/W2741809807",
            "title": "The state of OA",
            "abstract_inverted_index": {"Despite": [0], "growing": [1], "interest": [2]},
            "publication_year": 2018,
            "authorships": [
                {"author": {"display_name": "Heather Piwowar", "orcid": "https://orcid.org/0000-0003-1613-5981"}},
                {"author": {"display_name": null}, "raw_author_name": "Jason Priem"}
            ],
            "doi": "https://doi.org/10.7717/peerj.4375",
            "cited_by_count": 1000,
            "referenced_works_count": 50,
            "open_access": {"is_oa": true, "oa_url": "https://peerj.com/articles/4375.pdf"},
            "primary_location": {"source": {"display_name": "PeerJ"}}
        }))
        .unwrap();
        let paper = OpenAlexClient::parse_paper(data);
        assert_eq!(paper.id, "openalex:W2741809807");
        assert_eq!(paper.doi.as_deref(), Some("10.7717/peerj.4375"));
        assert_eq!(paper.abstract_text.as_deref(), Some("Despite growing interest"));
        assert_eq!(paper.authors.len(), 2);
        assert_eq!(paper.authors[1].name, "Jason Priem");
        assert_eq!(paper.venue.as_deref(), Some("PeerJ"));
        assert!(paper.is_open_access);
    }
}
