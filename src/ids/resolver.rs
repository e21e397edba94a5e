//! Remote identifier crosswalks.
//!
//! Converts PMIDs, arXiv IDs, and PMCIDs to DOIs through official public
//! APIs. Every lookup goes through the retry engine with the academic
//! policy; failures (including exhausted retries) are logged and surface
//! as `None`, never as errors.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::ensure_success;
use crate::ids::PaperIdentifier;
use crate::resilience::{academic_api_policy, retry_api_call};
use crate::{Error, Result};

const DEFAULT_CROSSREF_BASE: &str = "https://api.crossref.org";
const DEFAULT_S2_BASE: &str = "https://api.semanticscholar.org/graph/v1";
const DEFAULT_IDCONV_BASE: &str = "https://www.ncbi.nlm.nih.gov/pmc/utils/idconv/v1.0";

/// Result of a PMCID conversion: either or both of the sibling IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PmcidResolution {
    pub pmid: Option<String>,
    pub doi: Option<String>,
}

/// Crosswalk client for PMID/arXiv/PMCID to DOI resolution.
pub struct IdResolver {
    http: reqwest::Client,
    crossref_base: String,
    s2_base: String,
    idconv_base: String,
    pmcid_timeout: Duration,
}

impl IdResolver {
    /// Build a resolver against the public endpoints.
    pub fn new() -> Result<Self> {
        Self::with_base_urls(
            DEFAULT_CROSSREF_BASE,
            DEFAULT_S2_BASE,
            DEFAULT_IDCONV_BASE,
        )
    }

    /// Build a resolver against explicit endpoints (test harnesses).
    pub fn with_base_urls(
        crossref_base: &str,
        s2_base: &str,
        idconv_base: &str,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("scholar-pipeline/0.3 (research tool; mailto:contact@example.org)")
            .build()?;
        Ok(Self {
            http,
            crossref_base: crossref_base.trim_end_matches('/').to_string(),
            s2_base: s2_base.trim_end_matches('/').to_string(),
            idconv_base: idconv_base.trim_end_matches('/').to_string(),
            pmcid_timeout: Duration::from_secs(5),
        })
    }

    /// Override the PMCID enrichment timeout (default 5 s).
    #[must_use]
    pub fn with_pmcid_timeout(mut self, timeout: Duration) -> Self {
        self.pmcid_timeout = timeout;
        self
    }

    /// DOI for a PMID via the Crossref `filter=pmid:` lookup.
    pub async fn resolve_pmid_to_doi(&self, pmid: &str) -> Option<String> {
        #[derive(Deserialize)]
        struct Envelope {
            message: Message,
        }
        #[derive(Deserialize)]
        struct Message {
            #[serde(default)]
            items: Vec<Item>,
        }
        #[derive(Deserialize)]
        struct Item {
            #[serde(rename = "DOI")]
            doi: Option<String>,
        }

        let url = format!("{}/works", self.crossref_base);
        let fetch = || async {
            let response = self
                .http
                .get(&url)
                .query(&[("filter", format!("pmid:{pmid}")), ("rows", "1".to_string())])
                .send()
                .await?;
            let response = ensure_success(response).await?;
            Ok::<Envelope, Error>(response.json().await?)
        };

        match retry_api_call(fetch, &academic_api_policy(), None, "idresolver.pmid_to_doi").await {
            Ok(data) => {
                let doi = data.message.items.into_iter().next().and_then(|i| i.doi);
                match &doi {
                    Some(d) => debug!(pmid, doi = %d, "resolved PMID to DOI"),
                    None => debug!(pmid, "no DOI found for PMID"),
                }
                doi.map(|d| crate::models::normalize_doi(&d))
            }
            Err(e) => {
                warn!(pmid, error = %e, "failed to resolve PMID to DOI");
                None
            }
        }
    }

    /// DOI for an arXiv ID via Semantic Scholar's `externalIds`.
    pub async fn resolve_arxiv_to_doi(&self, arxiv_id: &str) -> Option<String> {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(rename = "externalIds", default)]
            external_ids: Option<ExternalIds>,
        }
        #[derive(Deserialize, Default)]
        struct ExternalIds {
            #[serde(rename = "DOI")]
            doi: Option<String>,
        }

        let bare = arxiv_id
            .strip_prefix("arXiv:")
            .or_else(|| arxiv_id.strip_prefix("arxiv:"))
            .unwrap_or(arxiv_id);
        let url = format!("{}/paper/ArXiv:{}", self.s2_base, bare);
        let fetch = || async {
            let response = self
                .http
                .get(&url)
                .query(&[("fields", "externalIds")])
                .send()
                .await?;
            let response = ensure_success(response).await?;
            Ok::<Envelope, Error>(response.json().await?)
        };

        match retry_api_call(fetch, &academic_api_policy(), None, "idresolver.arxiv_to_doi").await {
            Ok(data) => {
                let doi = data.external_ids.and_then(|ids| ids.doi);
                match &doi {
                    Some(d) => debug!(arxiv_id, doi = %d, "resolved arXiv ID to DOI"),
                    None => debug!(arxiv_id, "no DOI found for arXiv ID"),
                }
                doi.map(|d| crate::models::normalize_doi(&d))
            }
            Err(e) => {
                warn!(arxiv_id, error = %e, "failed to resolve arXiv ID to DOI");
                None
            }
        }
    }

    /// PMID and DOI for a PMCID via the NCBI ID converter. Bounded by the
    /// enrichment timeout; on timeout the partial result is discarded.
    pub async fn resolve_pmcid(&self, pmcid: &str) -> Option<PmcidResolution> {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(default)]
            records: Vec<Record>,
        }
        #[derive(Deserialize)]
        struct Record {
            pmid: Option<String>,
            doi: Option<String>,
        }

        let ids = if pmcid.starts_with("PMC") {
            pmcid.to_string()
        } else {
            format!("PMC{pmcid}")
        };
        let url = format!("{}/", self.idconv_base);
        let fetch = || async {
            let response = self
                .http
                .get(&url)
                .query(&[("ids", ids.as_str()), ("format", "json")])
                .send()
                .await?;
            let response = ensure_success(response).await?;
            Ok::<Envelope, Error>(response.json().await?)
        };

        let policy = academic_api_policy();
        let lookup = retry_api_call(fetch, &policy, None, "idresolver.pmcid");
        match tokio::time::timeout(self.pmcid_timeout, lookup).await {
            Ok(Ok(data)) => data.records.into_iter().next().map(|r| PmcidResolution {
                pmid: r.pmid,
                doi: r.doi.map(|d| crate::models::normalize_doi(&d)),
            }),
            Ok(Err(e)) => {
                warn!(pmcid, error = %e, "failed to resolve PMCID");
                None
            }
            Err(_) => {
                warn!(
                    pmcid,
                    timeout_s = self.pmcid_timeout.as_secs_f64(),
                    "PMCID resolution timed out"
                );
                None
            }
        }
    }

    /// Resolve a DOI from whatever the identifier carries, trying the
    /// strongest crosswalk first. Returns the existing DOI unchanged when
    /// present.
    pub async fn resolve_to_doi(&self, identifier: &PaperIdentifier) -> Option<String> {
        if let Some(doi) = &identifier.doi {
            return Some(crate::models::normalize_doi(doi));
        }
        if let Some(pmid) = &identifier.pmid {
            return self.resolve_pmid_to_doi(pmid).await;
        }
        if let Some(pmcid) = &identifier.pmcid {
            if let Some(resolution) = self.resolve_pmcid(pmcid).await {
                if resolution.doi.is_some() {
                    return resolution.doi;
                }
                if let Some(pmid) = resolution.pmid {
                    return self.resolve_pmid_to_doi(&pmid).await;
                }
            }
            return None;
        }
        if let Some(arxiv_id) = &identifier.arxiv_id {
            return self.resolve_arxiv_to_doi(arxiv_id).await;
        }
        None
    }
}
