//! SERP complement routing: fewest API calls to an abstract and a DOI.
//!
//! Given a SERP result whose URL carries a native identifier, the router
//! picks the one provider that can answer directly, and makes a second
//! call only when the first came back without an abstract (and a DOI is
//! independently known to query the other provider with). A URL with no
//! recognized identifier returns `None` immediately — zero API calls.

use tracing::{debug, info};

use crate::ids::{IdResolver, PaperIdentifier};
use crate::index::CanonicalPaperIndex;
use crate::models::{normalize_doi, Paper};
use crate::search::academic::ClientRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    SemanticScholar,
    OpenAlex,
}

impl Provider {
    fn key(self) -> &'static str {
        match self {
            Provider::SemanticScholar => "semantic_scholar",
            Provider::OpenAlex => "openalex",
        }
    }

    fn other(self) -> Provider {
        match self {
            Provider::SemanticScholar => Provider::OpenAlex,
            Provider::OpenAlex => Provider::SemanticScholar,
        }
    }

    /// The identifier form this provider wants for a DOI lookup.
    fn doi_query(self, doi: &str) -> String {
        match self {
            Provider::SemanticScholar => format!("DOI:{doi}"),
            Provider::OpenAlex => format!("https://doi.org/{doi}"),
        }
    }
}

/// Complement one SERP entry with API metadata using the minimum number of
/// calls. On success the paper is merged into the index under its own
/// canonical identity (the SERP evidence travels with it); on failure the
/// index is left untouched and `None` is returned.
pub async fn complement_serp_result(
    registry: &dyn ClientRegistry,
    resolver: &IdResolver,
    index: &mut CanonicalPaperIndex,
    identifier: &PaperIdentifier,
    entry_canonical_id: &str,
) -> Option<Paper> {
    // Route on the URL's native identifier.
    let (primary, primary_id, mut known_doi) = match route(identifier) {
        Route::Direct {
            provider,
            query_id,
            doi,
        } => (provider, query_id, doi),
        Route::NeedsDoiResolution => {
            let doi = resolver.resolve_to_doi(identifier).await?;
            debug!(entry_canonical_id, doi = %doi, "resolved SERP identifier to DOI");
            (
                Provider::SemanticScholar,
                Provider::SemanticScholar.doi_query(&doi),
                Some(doi),
            )
        }
        Route::NoIdentifier => {
            debug!(entry_canonical_id, "no recognized identifier, skipping complement");
            return None;
        }
    };

    let primary_client = registry.client(primary.key())?;
    let primary_paper = primary_client.get_paper(&primary_id).await;
    if let Some(paper) = &primary_paper {
        if known_doi.is_none() {
            known_doi = paper.doi.clone();
        }
    }

    // Second call only when the first yielded no abstract and a DOI is
    // independently known.
    let needs_secondary = primary_paper
        .as_ref()
        .map_or(true, |p| p.abstract_text.is_none());
    let mut secondary_paper = None;
    if needs_secondary {
        if let Some(doi) = &known_doi {
            let secondary = primary.other();
            if let Some(client) = registry.client(secondary.key()) {
                debug!(
                    entry_canonical_id,
                    provider = secondary.key(),
                    "primary lacked abstract, trying secondary"
                );
                secondary_paper = client.get_paper(&secondary.doi_query(doi)).await;
            }
        }
    }

    // Prefer the abstract-bearing record.
    let has_abstract = |p: &Option<Paper>| {
        p.as_ref().is_some_and(|p| p.abstract_text.is_some())
    };
    let (winner, other) = if has_abstract(&primary_paper) {
        (primary_paper, secondary_paper)
    } else if has_abstract(&secondary_paper) {
        (secondary_paper, primary_paper)
    } else {
        debug!(entry_canonical_id, "no abstract-bearing paper found, leaving entry untouched");
        return None;
    };
    let winner = winner?;

    let source_api = winner.source_api.clone();
    let canonical_id = index.attach_paper_to_entry(entry_canonical_id, winner.clone(), &source_api);
    if let Some(other) = other {
        let other_source = other.source_api.clone();
        index.attach_paper_to_entry(&canonical_id, other, &other_source);
    }

    info!(
        from = entry_canonical_id,
        to = %canonical_id,
        provider = %source_api,
        "SERP entry complemented with API metadata"
    );
    Some(winner)
}

enum Route {
    Direct {
        provider: Provider,
        query_id: String,
        doi: Option<String>,
    },
    NeedsDoiResolution,
    NoIdentifier,
}

fn route(identifier: &PaperIdentifier) -> Route {
    if let Some(doi) = &identifier.doi {
        let doi = normalize_doi(doi);
        return Route::Direct {
            provider: Provider::SemanticScholar,
            query_id: Provider::SemanticScholar.doi_query(&doi),
            doi: Some(doi),
        };
    }
    if let Some(work_id) = &identifier.openalex_work_id {
        return Route::Direct {
            provider: Provider::OpenAlex,
            query_id: format!("openalex:{}", work_id.to_uppercase()),
            doi: None,
        };
    }
    if let Some(s2_id) = &identifier.s2_paper_id {
        return Route::Direct {
            provider: Provider::SemanticScholar,
            query_id: s2_id.clone(),
            doi: None,
        };
    }
    if let Some(arxiv_id) = &identifier.arxiv_id {
        return Route::Direct {
            provider: Provider::SemanticScholar,
            query_id: format!("ArXiv:{arxiv_id}"),
            doi: None,
        };
    }
    if identifier.pmid.is_some() || identifier.pmcid.is_some() {
        return Route::NeedsDoiResolution;
    }
    Route::NoIdentifier
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AcademicClient;
    use crate::ids::IdentifierExtractor;
    use crate::index::EntrySource;
    use crate::models::{AcademicSearchResult, CitedPaper, SerpResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::sync::Mutex;

    struct MockClient {
        response: Option<Paper>,
        calls: AtomicUsize,
        last_id: Mutex<Option<String>>,
    }

    impl MockClient {
        fn returning(response: Option<Paper>) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: AtomicUsize::new(0),
                last_id: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_id(&self) -> Option<String> {
            self.last_id.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AcademicClient for MockClient {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn search(&self, _query: &str, _limit: usize) -> AcademicSearchResult {
            AcademicSearchResult::empty("mock")
        }

        async fn get_paper(&self, paper_id: &str) -> Option<Paper> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_id.lock().unwrap() = Some(paper_id.to_string());
            self.response.clone()
        }

        async fn get_references(&self, _paper_id: &str) -> Vec<CitedPaper> {
            Vec::new()
        }

        async fn get_citations(&self, _paper_id: &str) -> Vec<CitedPaper> {
            Vec::new()
        }
    }

    struct MockRegistry {
        clients: HashMap<String, Arc<MockClient>>,
    }

    impl ClientRegistry for MockRegistry {
        fn client(&self, name: &str) -> Option<Arc<dyn AcademicClient>> {
            self.clients
                .get(name)
                .map(|c| c.clone() as Arc<dyn AcademicClient>)
        }
    }

    fn registry(s2: Arc<MockClient>, oa: Arc<MockClient>) -> MockRegistry {
        let mut clients = HashMap::new();
        clients.insert("semantic_scholar".to_string(), s2);
        clients.insert("openalex".to_string(), oa);
        MockRegistry { clients }
    }

    fn resolver_stub() -> IdResolver {
        // Unroutable endpoints: any attempted resolution fails fast rather
        // than hitting the network.
        IdResolver::with_base_urls("http://127.0.0.1:9", "http://127.0.0.1:9", "http://127.0.0.1:9")
            .unwrap()
    }

    fn openalex_paper(abstract_text: Option<&str>) -> Paper {
        let mut p = Paper::new("openalex:W2741809807", "Example", "openalex");
        p.doi = Some("10.7717/peerj.4375".to_string());
        p.abstract_text = abstract_text.map(str::to_string);
        p.year = Some(2020);
        p
    }

    fn s2_paper(abstract_text: Option<&str>) -> Paper {
        let mut p = Paper::new(
            "s2:deadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
            "Example",
            "semantic_scholar",
        );
        p.doi = Some("10.7717/peerj.4375".to_string());
        p.abstract_text = abstract_text.map(str::to_string);
        p
    }

    fn serp_entry(index: &mut CanonicalPaperIndex, url: &str) -> (PaperIdentifier, String) {
        let ident = IdentifierExtractor::new().extract(url);
        let serp = SerpResult {
            title: "OpenAlex Work Page".to_string(),
            url: url.to_string(),
            snippet: String::new(),
            engine: "debug".to_string(),
            rank: 1,
            date: None,
        };
        let cid = index.register_serp_result(serp, Some(&ident));
        (ident, cid)
    }

    #[tokio::test]
    async fn openalex_url_single_call_when_abstract_present() {
        let mut index = CanonicalPaperIndex::new();
        let (ident, cid) = serp_entry(&mut index, "https://openalex.org/W2741809807");

        let oa = MockClient::returning(Some(openalex_paper(Some("Abstract from OpenAlex"))));
        let s2 = MockClient::returning(None);
        let reg = registry(s2.clone(), oa.clone());

        let paper =
            complement_serp_result(&reg, &resolver_stub(), &mut index, &ident, &cid).await;

        assert!(paper.is_some());
        assert_eq!(oa.calls(), 1);
        assert_eq!(oa.last_id().as_deref(), Some("openalex:W2741809807"));
        assert_eq!(s2.calls(), 0);

        let entries = index.get_all_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].canonical_id, "doi:10.7717/peerj.4375");
        assert_eq!(entries[0].source, EntrySource::Both);
        assert_eq!(
            entries[0].best_url.as_deref(),
            Some("https://doi.org/10.7717/peerj.4375")
        );
    }

    #[tokio::test]
    async fn openalex_url_falls_back_to_s2_when_abstract_missing() {
        let mut index = CanonicalPaperIndex::new();
        let (ident, cid) = serp_entry(&mut index, "https://openalex.org/W2741809807");

        let oa = MockClient::returning(Some(openalex_paper(None)));
        let s2 = MockClient::returning(Some(s2_paper(Some("Abstract from S2"))));
        let reg = registry(s2.clone(), oa.clone());

        let paper =
            complement_serp_result(&reg, &resolver_stub(), &mut index, &ident, &cid).await;

        assert!(paper.is_some());
        assert_eq!(oa.calls(), 1);
        assert_eq!(s2.calls(), 1);
        assert_eq!(s2.last_id().as_deref(), Some("DOI:10.7717/peerj.4375"));

        let entries = index.get_all_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].canonical_id, "doi:10.7717/peerj.4375");
        let merged = entries[0].paper.as_ref().unwrap();
        assert_eq!(merged.abstract_text.as_deref(), Some("Abstract from S2"));
        assert_eq!(merged.source_api, "semantic_scholar");
    }

    #[tokio::test]
    async fn doi_url_routes_to_s2_first() {
        let mut index = CanonicalPaperIndex::new();
        let (ident, cid) = serp_entry(&mut index, "https://doi.org/10.7717/peerj.4375");

        let s2 = MockClient::returning(Some(s2_paper(Some("Abstract"))));
        let oa = MockClient::returning(None);
        let reg = registry(s2.clone(), oa.clone());

        let paper =
            complement_serp_result(&reg, &resolver_stub(), &mut index, &ident, &cid).await;

        assert!(paper.is_some());
        assert_eq!(s2.calls(), 1);
        assert_eq!(s2.last_id().as_deref(), Some("DOI:10.7717/peerj.4375"));
        assert_eq!(oa.calls(), 0);
    }

    #[tokio::test]
    async fn primary_failure_tries_secondary_when_doi_known() {
        let mut index = CanonicalPaperIndex::new();
        let (ident, cid) = serp_entry(&mut index, "https://doi.org/10.7717/peerj.4375");

        let s2 = MockClient::returning(None);
        let oa = MockClient::returning(Some(openalex_paper(Some("Abstract from OpenAlex"))));
        let reg = registry(s2.clone(), oa.clone());

        let paper =
            complement_serp_result(&reg, &resolver_stub(), &mut index, &ident, &cid).await;

        assert!(paper.is_some());
        assert_eq!(s2.calls(), 1);
        assert_eq!(oa.calls(), 1);
        assert_eq!(
            oa.last_id().as_deref(),
            Some("https://doi.org/10.7717/peerj.4375")
        );
    }

    #[tokio::test]
    async fn both_failing_leaves_entry_untouched() {
        let mut index = CanonicalPaperIndex::new();
        let (ident, cid) = serp_entry(&mut index, "https://openalex.org/W2741809807");

        let s2 = MockClient::returning(None);
        let oa = MockClient::returning(None);
        let reg = registry(s2, oa);

        let paper =
            complement_serp_result(&reg, &resolver_stub(), &mut index, &ident, &cid).await;

        assert!(paper.is_none());
        let entries = index.get_all_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].canonical_id, "openalex:W2741809807");
        assert_eq!(entries[0].source, EntrySource::Serp);
    }

    #[tokio::test]
    async fn generic_url_makes_no_calls() {
        let mut index = CanonicalPaperIndex::new();
        let (ident, cid) = serp_entry(&mut index, "https://example.com/some-page");

        let s2 = MockClient::returning(Some(s2_paper(Some("Abstract"))));
        let oa = MockClient::returning(Some(openalex_paper(Some("Abstract"))));
        let reg = registry(s2.clone(), oa.clone());

        let paper =
            complement_serp_result(&reg, &resolver_stub(), &mut index, &ident, &cid).await;

        assert!(paper.is_none());
        assert_eq!(s2.calls(), 0);
        assert_eq!(oa.calls(), 0);
    }

    #[tokio::test]
    async fn arxiv_identifier_routes_to_s2_with_prefix() {
        let mut index = CanonicalPaperIndex::new();
        let (ident, cid) = serp_entry(&mut index, "https://arxiv.org/abs/2301.12345");

        let s2 = MockClient::returning(Some(s2_paper(Some("Abstract"))));
        let oa = MockClient::returning(None);
        let reg = registry(s2.clone(), oa.clone());

        let paper =
            complement_serp_result(&reg, &resolver_stub(), &mut index, &ident, &cid).await;

        assert!(paper.is_some());
        assert_eq!(s2.last_id().as_deref(), Some("ArXiv:2301.12345"));
        assert_eq!(oa.calls(), 0);
    }
}
