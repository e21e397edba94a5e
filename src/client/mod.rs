//! Academic metadata API clients.
//!
//! One client per provider behind the sealed [`AcademicClient`] interface.
//! Clients hold their own HTTP session, acquire a rate-limit slot for
//! every outbound request, and compose single attempts through the retry
//! engine — they never retry internally. A provider's 404 on a
//! single-record fetch surfaces as `None`; listing failures surface as
//! empty slices. Foreign identifiers (another provider's namespace) are
//! skipped without any network traffic.

pub mod providers;
pub mod rate_limiter;

pub use providers::{
    ArxivClient, CrossrefClient, OpenAlexClient, SemanticScholarClient, UnpaywallClient,
};
pub use rate_limiter::{
    get_academic_rate_limiter, init_academic_rate_limiter, reset_academic_rate_limiter,
    AcademicRateLimiter, RateLimitPermit,
};

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ProviderConfig;
use crate::models::{AcademicSearchResult, CitedPaper, Paper};
use crate::resilience::{academic_api_policy, retry_api_call};
use crate::{Error, Result};

/// Default contact string advertised in the User-Agent header.
pub(crate) const USER_AGENT: &str =
    "scholar-pipeline/0.3 (research tool; mailto:contact@example.org)";

/// Typed interface over one provider's metadata endpoints.
///
/// Implementations swallow provider failures: `get_paper` returns `None`
/// on 404 or any exhausted retry, listing operations return empty slices.
/// The only way these methods fail loudly is a panic, which they do not
/// do.
#[async_trait]
pub trait AcademicClient: Send + Sync {
    /// Provider key, matching configuration and rate-limiter state.
    fn name(&self) -> &'static str;

    /// Full-text search over the provider's corpus.
    async fn search(&self, query: &str, limit: usize) -> AcademicSearchResult;

    /// Fetch one paper by a provider-understood identifier.
    async fn get_paper(&self, paper_id: &str) -> Option<Paper>;

    /// Papers cited by `paper_id`.
    async fn get_references(&self, paper_id: &str) -> Vec<CitedPaper>;

    /// Papers citing `paper_id`.
    async fn get_citations(&self, paper_id: &str) -> Vec<CitedPaper>;
}

/// Build the per-provider HTTP session: timeout, UA, configured headers.
pub(crate) fn build_http_client(config: &ProviderConfig) -> Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    for (key, value) in &config.headers {
        let name = reqwest::header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            Error::InvalidConfig {
                field: format!("headers.{key}"),
                reason: e.to_string(),
            }
        })?;
        let value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
            Error::InvalidConfig {
                field: format!("headers.{key}"),
                reason: e.to_string(),
            }
        })?;
        headers.insert(name, value);
    }

    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs_f64(config.timeout_seconds))
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()?)
}

/// Convert non-2xx responses into [`Error::Status`] carrying a body
/// snippet.
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let code = status.as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect();
    Err(Error::Status { code, message })
}

/// One rate-limited, retried JSON GET. The rate-limit permit is scoped to
/// a single attempt, so backoff sleeps never hold a concurrency slot.
pub(crate) async fn get_json<T, Q>(
    http: &reqwest::Client,
    provider: &'static str,
    url: &str,
    query: &Q,
    operation: &str,
) -> Result<T>
where
    T: DeserializeOwned,
    Q: Serialize + ?Sized + Sync,
{
    let attempt = || async {
        let limiter = get_academic_rate_limiter();
        let _permit = limiter.acquire(provider).await;
        let response = http.get(url).query(query).send().await?;
        let response = ensure_success(response).await?;
        Ok::<T, Error>(response.json().await?)
    };
    retry_api_call(attempt, &academic_api_policy(), Some(provider), operation).await
}

/// Same as [`get_json`] for endpoints returning a non-JSON body (the
/// arXiv Atom feed).
pub(crate) async fn get_text<Q>(
    http: &reqwest::Client,
    provider: &'static str,
    url: &str,
    query: &Q,
    operation: &str,
) -> Result<String>
where
    Q: Serialize + ?Sized + Sync,
{
    let attempt = || async {
        let limiter = get_academic_rate_limiter();
        let _permit = limiter.acquire(provider).await;
        let response = http.get(url).query(query).send().await?;
        let response = ensure_success(response).await?;
        Ok::<String, Error>(response.text().await?)
    };
    retry_api_call(attempt, &academic_api_policy(), Some(provider), operation).await
}
