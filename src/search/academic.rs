//! Academic search provider integrating multiple metadata APIs.
//!
//! Search fans out to the enabled providers in parallel and deduplicates
//! results through a fresh [`CanonicalPaperIndex`]. Citation graphs are
//! explored breadth-first with one task per enabled provider per frontier
//! node; a failing provider contributes an empty slice and never blocks
//! the others.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::client::{
    AcademicClient, ArxivClient, CrossrefClient, OpenAlexClient, SemanticScholarClient,
};
use crate::config::Config;
use crate::index::CanonicalPaperIndex;
use crate::models::{Citation, Paper, SearchResponse};
use crate::{Error, Result};

/// Traversal direction for citation graph expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    References,
    Citations,
    Both,
}

impl Direction {
    #[must_use]
    pub fn includes_references(self) -> bool {
        matches!(self, Direction::References | Direction::Both)
    }

    #[must_use]
    pub fn includes_citations(self) -> bool {
        matches!(self, Direction::Citations | Direction::Both)
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "references" => Ok(Direction::References),
            "citations" => Ok(Direction::Citations),
            "both" => Ok(Direction::Both),
            other => Err(Error::InvalidInput {
                field: "direction".to_string(),
                reason: format!("unknown direction: {other}"),
            }),
        }
    }
}

/// Options for [`AcademicSearchProvider::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Providers to query; defaults to Semantic Scholar + OpenAlex.
    pub engines: Option<Vec<String>>,
    /// Per-provider result cap (0 falls back to 10).
    pub limit: usize,
}

/// Lookup of clients by provider name. The search provider implements
/// this; tests substitute mock registries.
pub trait ClientRegistry: Send + Sync {
    fn client(&self, name: &str) -> Option<Arc<dyn AcademicClient>>;
}

/// Unified search and citation-graph surface over the academic clients.
pub struct AcademicSearchProvider {
    clients: HashMap<String, Arc<dyn AcademicClient>>,
    default_apis: Vec<String>,
}

impl AcademicSearchProvider {
    /// Build every configured provider client.
    pub fn new(config: &Config) -> Result<Self> {
        let apis = &config.academic_apis;
        let mut clients: HashMap<String, Arc<dyn AcademicClient>> = HashMap::new();

        if let Some(c) = apis.get_api_config("semantic_scholar") {
            clients.insert(
                "semantic_scholar".to_string(),
                Arc::new(SemanticScholarClient::new(c)?),
            );
        }
        if let Some(c) = apis.get_api_config("openalex") {
            clients.insert("openalex".to_string(), Arc::new(OpenAlexClient::new(c)?));
        }
        if let Some(c) = apis.get_api_config("crossref") {
            clients.insert("crossref".to_string(), Arc::new(CrossrefClient::new(c)?));
        }
        if let Some(c) = apis.get_api_config("arxiv") {
            clients.insert("arxiv".to_string(), Arc::new(ArxivClient::new(c)?));
        }

        Ok(Self::from_clients(clients))
    }

    /// Assemble from pre-built clients (tests inject mocks here).
    #[must_use]
    pub fn from_clients(clients: HashMap<String, Arc<dyn AcademicClient>>) -> Self {
        Self {
            clients,
            default_apis: vec!["semantic_scholar".to_string(), "openalex".to_string()],
        }
    }

    /// Search the enabled providers in parallel and deduplicate by
    /// canonical identity. Higher-priority providers register first so
    /// ties keep their records.
    pub async fn search(&self, query: &str, options: Option<SearchOptions>) -> SearchResponse {
        let options = options.unwrap_or_default();
        let limit = if options.limit == 0 { 10 } else { options.limit };
        let mut apis: Vec<String> = options
            .engines
            .unwrap_or_else(|| self.default_apis.clone());
        apis.sort_by_key(|name| crate::index::provider_priority(name));

        let tasks: Vec<_> = apis
            .iter()
            .filter_map(|name| {
                let client = match self.clients.get(name) {
                    Some(c) => c.clone(),
                    None => {
                        warn!(api = %name, "no client available for requested API");
                        return None;
                    }
                };
                let name = name.clone();
                Some(async move {
                    let result = client.search(query, limit).await;
                    (name, result)
                })
            })
            .collect();

        if tasks.is_empty() {
            return SearchResponse {
                query: query.to_string(),
                provider: "academic".to_string(),
                error: Some("No API clients available".to_string()),
                ..SearchResponse::default()
            };
        }

        let results = join_all(tasks).await;

        let mut index = CanonicalPaperIndex::new();
        let mut total_raw = 0usize;
        for (name, result) in results {
            total_raw += result.papers.len();
            for paper in result.papers {
                index.register_paper(paper, &name);
            }
        }

        let stats = index.get_stats();
        info!(
            query,
            total_raw,
            unique_count = stats.total,
            "academic API search completed"
        );

        let search_results: Vec<_> = index
            .get_all_entries()
            .into_iter()
            .filter_map(|entry| entry.paper.as_ref().map(Paper::to_search_result))
            .collect();

        SearchResponse {
            total_count: search_results.len() as u64,
            results: search_results,
            query: query.to_string(),
            provider: "academic".to_string(),
            error: None,
        }
    }

    /// Breadth-first citation graph expansion.
    ///
    /// Papers deduplicate by canonical identity; citation rows are keyed on
    /// provider paper IDs, so the same underlying edge observed through two
    /// providers yields two rows over one deduplicated paper. `depth == 0`
    /// performs no API calls.
    pub async fn get_citation_graph(
        &self,
        paper_id: &str,
        depth: u32,
        direction: Direction,
    ) -> (Vec<Paper>, Vec<Citation>) {
        if depth == 0 {
            return (Vec::new(), Vec::new());
        }

        let enabled: Vec<(String, Arc<dyn AcademicClient>)> = self
            .default_apis
            .iter()
            .filter_map(|name| self.clients.get(name).map(|c| (name.clone(), c.clone())))
            .collect();
        if enabled.is_empty() {
            warn!("no citation graph providers available");
            return (Vec::new(), Vec::new());
        }

        let mut index = CanonicalPaperIndex::new();
        let mut citations: Vec<Citation> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: Vec<String> = vec![paper_id.to_string()];

        for current_depth in 0..depth {
            let mut next_frontier: Vec<String> = Vec::new();

            for node in std::mem::take(&mut frontier) {
                if !visited.insert(node.clone()) {
                    continue;
                }

                // One task per provider, each covering both directions.
                let tasks: Vec<_> = enabled
                    .iter()
                    .map(|(name, client)| {
                        let name = name.clone();
                        let client = client.clone();
                        let node = node.clone();
                        async move {
                            let references = if direction.includes_references() {
                                client.get_references(&node).await
                            } else {
                                Vec::new()
                            };
                            let cited_by = if direction.includes_citations() {
                                client.get_citations(&node).await
                            } else {
                                Vec::new()
                            };
                            (name, references, cited_by)
                        }
                    })
                    .collect();

                for (name, references, cited_by) in join_all(tasks).await {
                    debug!(
                        provider = %name,
                        node = %node,
                        depth = current_depth,
                        references = references.len(),
                        citations = cited_by.len(),
                        "citation frontier expanded"
                    );
                    for edge in references {
                        citations.push(Citation {
                            citing_paper_id: node.clone(),
                            cited_paper_id: edge.paper.id.clone(),
                            is_influential: edge.is_influential,
                            context: None,
                        });
                        next_frontier.push(edge.paper.id.clone());
                        let source = edge.paper.source_api.clone();
                        index.register_paper(edge.paper, &source);
                    }
                    for edge in cited_by {
                        citations.push(Citation {
                            citing_paper_id: edge.paper.id.clone(),
                            cited_paper_id: node.clone(),
                            is_influential: edge.is_influential,
                            context: None,
                        });
                        next_frontier.push(edge.paper.id.clone());
                        let source = edge.paper.source_api.clone();
                        index.register_paper(edge.paper, &source);
                    }
                }
            }

            frontier = next_frontier;
        }

        let papers: Vec<Paper> = index
            .get_all_entries()
            .into_iter()
            .filter_map(|entry| entry.paper.clone())
            .collect();

        info!(
            seed = paper_id,
            depth,
            papers = papers.len(),
            citations = citations.len(),
            "citation graph traversal complete"
        );
        (papers, citations)
    }
}

impl ClientRegistry for AcademicSearchProvider {
    fn client(&self, name: &str) -> Option<Arc<dyn AcademicClient>> {
        self.clients.get(name).cloned()
    }
}
