//! Provider-specific client implementations.

pub mod arxiv;
pub mod crossref;
pub mod openalex;
pub mod semantic_scholar;
pub mod unpaywall;

pub use arxiv::ArxivClient;
pub use crossref::CrossrefClient;
pub use openalex::OpenAlexClient;
pub use semantic_scholar::SemanticScholarClient;
pub use unpaywall::UnpaywallClient;
