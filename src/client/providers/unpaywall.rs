//! Unpaywall API client.
//!
//! Open-access URL resolution only. Unpaywall requires a contact email on
//! every request; a sentinel is used when none is configured so the call
//! still identifies itself.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::{build_http_client, get_json, AcademicClient};
use crate::config::ProviderConfig;
use crate::models::{normalize_doi, AcademicSearchResult, CitedPaper, Paper};
use crate::Result;

const PROVIDER: &str = "unpaywall";
const FALLBACK_EMAIL: &str = "contact@example.org";

pub struct UnpaywallClient {
    http: reqwest::Client,
    base_url: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct UnpaywallResponse {
    #[serde(default)]
    is_oa: bool,
    #[serde(default)]
    best_oa_location: Option<OaLocation>,
    #[serde(default)]
    oa_locations: Vec<OaLocation>,
}

#[derive(Debug, Deserialize)]
struct OaLocation {
    #[serde(default)]
    url_for_pdf: Option<String>,
    #[serde(default)]
    url_for_landing_page: Option<String>,
}

impl OaLocation {
    fn best_url(self) -> Option<String> {
        self.url_for_pdf.or(self.url_for_landing_page)
    }
}

impl UnpaywallClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let email = config
            .email
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| {
                warn!("no Unpaywall contact email configured, using sentinel");
                FALLBACK_EMAIL.to_string()
            });
        Ok(Self {
            http: build_http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email,
        })
    }

    /// Best open-access URL for a DOI, preferring a direct PDF. Returns
    /// `None` for closed works, unknown DOIs, and any API failure.
    pub async fn resolve_oa_url(&self, doi: &str) -> Option<String> {
        let normalized = normalize_doi(doi);
        if normalized.is_empty() {
            return None;
        }

        let url = format!("{}/{}", self.base_url, normalized);
        let result: Result<UnpaywallResponse> = get_json(
            &self.http,
            PROVIDER,
            &url,
            &[("email", self.email.as_str())],
            "unpaywall.resolve_oa_url",
        )
        .await;

        match result {
            Ok(data) => {
                if !data.is_oa {
                    return None;
                }
                if let Some(url) = data.best_oa_location.and_then(OaLocation::best_url) {
                    return Some(url);
                }
                data.oa_locations.into_iter().find_map(OaLocation::best_url)
            }
            Err(e) => {
                debug!(doi, error = %e, "failed to resolve OA URL from Unpaywall");
                None
            }
        }
    }
}

#[async_trait]
impl AcademicClient for UnpaywallClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn search(&self, query: &str, _limit: usize) -> AcademicSearchResult {
        debug!(query, "Unpaywall does not support search");
        AcademicSearchResult::empty(PROVIDER)
    }

    async fn get_paper(&self, paper_id: &str) -> Option<Paper> {
        debug!(paper_id, "Unpaywall does not support get_paper; use resolve_oa_url");
        None
    }

    async fn get_references(&self, paper_id: &str) -> Vec<CitedPaper> {
        debug!(paper_id, "Unpaywall does not support references");
        Vec::new()
    }

    async fn get_citations(&self, paper_id: &str) -> Vec<CitedPaper> {
        debug!(paper_id, "Unpaywall does not support citations");
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oa_location_prefers_pdf() {
        let location = OaLocation {
            url_for_pdf: Some("https://example.org/paper.pdf".to_string()),
            url_for_landing_page: Some("https://example.org/paper".to_string()),
        };
        assert_eq!(
            location.best_url().as_deref(),
            Some("https://example.org/paper.pdf")
        );

        let landing_only = OaLocation {
            url_for_pdf: None,
            url_for_landing_page: Some("https://example.org/paper".to_string()),
        };
        assert_eq!(
            landing_only.best_url().as_deref(),
            Some("https://example.org/paper")
        );
    }
}
