//! Scholar Pipeline - Academic Research Pipeline Core
//!
//! Discovers scholarly works across web-search results and official
//! metadata APIs (`Semantic Scholar`, `OpenAlex`, `Crossref`, `arXiv`,
//! `Unpaywall`), deduplicates them into canonical papers, traverses
//! citation graphs, and maintains a typed evidence graph suitable for
//! downstream claim verification.

pub mod budget;
pub mod client;
pub mod config;
pub mod error;
pub mod graph;
pub mod ids;
pub mod index;
pub mod logging;
pub mod models;
pub mod resilience;
pub mod search;
pub mod storage;

pub use budget::{
    get_domain_budget_manager, init_domain_budget_manager, reset_domain_budget_manager,
    BudgetCheckResult, DomainBudgetManager, DomainDailyBudget,
};
pub use client::{
    get_academic_rate_limiter, init_academic_rate_limiter, reset_academic_rate_limiter,
    AcademicClient, AcademicRateLimiter, ArxivClient, CrossrefClient, OpenAlexClient,
    SemanticScholarClient, UnpaywallClient,
};
pub use config::{Config, RateLimitProfile};
pub use error::{Error, ErrorCategory, Result};
pub use graph::{
    EdgeAttributes, EvidenceGraph, NodeAttributes, NodeType, RelationType, Verdict,
};
pub use ids::{IdResolver, IdentifierExtractor, PaperIdentifier};
pub use index::{CanonicalEntry, CanonicalPaperIndex, EntrySource, PaperIdentityResolver};
pub use models::{
    normalize_doi, AcademicSearchResult, Author, Citation, CitedPaper, Paper, SearchResponse,
    SearchResult, SerpResult,
};
pub use resilience::{
    academic_api_policy, calculate_backoff, calculate_cooldown_minutes, retry_api_call,
    ApiRetryPolicy, BackoffConfig,
};
pub use search::{
    complement_serp_result, AcademicSearchProvider, ClientRegistry, Direction, SearchOptions,
};
pub use storage::{chunked, persist_work, resolve_paper_id_to_page_id, Database};
