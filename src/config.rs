//! Validated configuration for the pipeline core.
//!
//! Defaults are layered first, then an optional TOML file, then
//! `SCHOLAR_PIPELINE__*` environment overrides. Validation failures are
//! fatal at initialization: a provider block without an `anonymous`
//! rate-limit profile never deserializes, and overlapping retryable /
//! non-retryable status sets are rejected by [`Config::validate`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Credential-derived rate-limit tier for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitProfile {
    /// No credentials configured.
    Anonymous,
    /// API key present.
    Authenticated,
    /// Contact email present (polite pool).
    Identified,
}

impl RateLimitProfile {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitProfile::Anonymous => "anonymous",
            RateLimitProfile::Authenticated => "authenticated",
            RateLimitProfile::Identified => "identified",
        }
    }
}

/// Rate-limit parameters for one profile of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitProfileConfig {
    pub min_interval_seconds: f64,
    pub max_parallel: usize,
}

/// The per-provider profile table. `anonymous` is mandatory; the other
/// tiers are opted into per provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitProfilesConfig {
    pub anonymous: RateLimitProfileConfig,
    #[serde(default)]
    pub authenticated: Option<RateLimitProfileConfig>,
    #[serde(default)]
    pub identified: Option<RateLimitProfileConfig>,
}

impl RateLimitProfilesConfig {
    /// Parameters for a profile, falling back to `anonymous` when the tier
    /// is not configured.
    #[must_use]
    pub fn for_profile(&self, profile: RateLimitProfile) -> RateLimitProfileConfig {
        match profile {
            RateLimitProfile::Anonymous => self.anonymous,
            RateLimitProfile::Authenticated => self.authenticated.unwrap_or(self.anonymous),
            RateLimitProfile::Identified => self.identified.unwrap_or(self.anonymous),
        }
    }
}

/// One provider block: endpoint, credentials, headers, and rate limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub rate_limit_profiles: RateLimitProfilesConfig,
}

fn default_timeout_seconds() -> f64 {
    30.0
}

impl ProviderConfig {
    /// Profile this provider qualifies for based on configured credentials.
    #[must_use]
    pub fn select_profile(&self) -> RateLimitProfile {
        if self.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
            RateLimitProfile::Authenticated
        } else if self.email.as_deref().is_some_and(|e| !e.is_empty()) {
            RateLimitProfile::Identified
        } else {
            RateLimitProfile::Anonymous
        }
    }
}

/// Per-profile override of retry knobs (currently only the 429 ceiling).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryProfileOverride {
    #[serde(default)]
    pub max_consecutive_429: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryProfileOverrides {
    #[serde(default)]
    pub authenticated: Option<RetryProfileOverride>,
    #[serde(default)]
    pub identified: Option<RetryProfileOverride>,
}

/// Knobs for 429-driven adaptive throttling in the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoBackoffConfig {
    /// Multiplier applied to the current min interval on each 429.
    pub increase_factor: f64,
    /// Ceiling for the adapted min interval.
    pub max_interval_seconds: f64,
    /// Seconds of uninterrupted successes before the interval steps back
    /// toward the configured value.
    pub recovery_stable_seconds: u64,
    /// Size of one recovery step.
    pub decrease_step_seconds: f64,
}

impl Default for AutoBackoffConfig {
    fn default() -> Self {
        Self {
            increase_factor: 2.0,
            max_interval_seconds: 60.0,
            recovery_stable_seconds: 60,
            decrease_step_seconds: 1.0,
        }
    }
}

/// Retry policy shared by all academic clients, with per-profile overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_consecutive_429")]
    pub max_consecutive_429: u32,
    #[serde(default)]
    pub auto_backoff: AutoBackoffConfig,
    #[serde(default)]
    pub profiles: Option<RetryProfileOverrides>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_consecutive_429() -> u32 {
    2
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_consecutive_429: default_max_consecutive_429(),
            auto_backoff: AutoBackoffConfig::default(),
            profiles: Some(RetryProfileOverrides {
                authenticated: Some(RetryProfileOverride {
                    max_consecutive_429: Some(5),
                }),
                identified: Some(RetryProfileOverride {
                    max_consecutive_429: Some(5),
                }),
            }),
        }
    }
}

impl RetryPolicyConfig {
    /// The consecutive-429 ceiling for a profile, honoring overrides.
    #[must_use]
    pub fn max_consecutive_429_for(&self, profile: RateLimitProfile) -> u32 {
        let override_for = |o: Option<RetryProfileOverride>| {
            o.and_then(|o| o.max_consecutive_429)
        };
        let overridden = match (profile, self.profiles) {
            (RateLimitProfile::Authenticated, Some(p)) => override_for(p.authenticated),
            (RateLimitProfile::Identified, Some(p)) => override_for(p.identified),
            _ => None,
        };
        overridden.unwrap_or(self.max_consecutive_429)
    }
}

/// All academic-API configuration: provider blocks plus the shared retry
/// policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcademicApisConfig {
    pub apis: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub retry_policy: RetryPolicyConfig,
}

impl AcademicApisConfig {
    #[must_use]
    pub fn get_api_config(&self, name: &str) -> Option<&ProviderConfig> {
        self.apis.get(name)
    }
}

impl Default for AcademicApisConfig {
    fn default() -> Self {
        let mut apis = BTreeMap::new();
        apis.insert(
            "semantic_scholar".to_string(),
            ProviderConfig {
                base_url: "https://api.semanticscholar.org/graph/v1".to_string(),
                timeout_seconds: 30.0,
                api_key: None,
                email: None,
                headers: BTreeMap::new(),
                rate_limit_profiles: RateLimitProfilesConfig {
                    anonymous: RateLimitProfileConfig {
                        min_interval_seconds: 3.0,
                        max_parallel: 1,
                    },
                    authenticated: Some(RateLimitProfileConfig {
                        min_interval_seconds: 2.0,
                        max_parallel: 1,
                    }),
                    identified: None,
                },
            },
        );
        apis.insert(
            "openalex".to_string(),
            ProviderConfig {
                base_url: "https://api.openalex.org".to_string(),
                timeout_seconds: 30.0,
                api_key: None,
                email: None,
                headers: BTreeMap::new(),
                rate_limit_profiles: RateLimitProfilesConfig {
                    anonymous: RateLimitProfileConfig {
                        min_interval_seconds: 0.5,
                        max_parallel: 1,
                    },
                    authenticated: None,
                    identified: Some(RateLimitProfileConfig {
                        min_interval_seconds: 0.2,
                        max_parallel: 2,
                    }),
                },
            },
        );
        apis.insert(
            "crossref".to_string(),
            ProviderConfig {
                base_url: "https://api.crossref.org".to_string(),
                timeout_seconds: 30.0,
                api_key: None,
                email: None,
                headers: BTreeMap::new(),
                rate_limit_profiles: RateLimitProfilesConfig {
                    anonymous: RateLimitProfileConfig {
                        min_interval_seconds: 1.0,
                        max_parallel: 1,
                    },
                    authenticated: None,
                    identified: Some(RateLimitProfileConfig {
                        min_interval_seconds: 0.5,
                        max_parallel: 2,
                    }),
                },
            },
        );
        apis.insert(
            "arxiv".to_string(),
            ProviderConfig {
                base_url: "http://export.arxiv.org/api".to_string(),
                timeout_seconds: 30.0,
                api_key: None,
                email: None,
                headers: BTreeMap::new(),
                rate_limit_profiles: RateLimitProfilesConfig {
                    anonymous: RateLimitProfileConfig {
                        min_interval_seconds: 3.0,
                        max_parallel: 1,
                    },
                    authenticated: None,
                    identified: None,
                },
            },
        );
        apis.insert(
            "unpaywall".to_string(),
            ProviderConfig {
                base_url: "https://api.unpaywall.org/v2".to_string(),
                timeout_seconds: 30.0,
                api_key: None,
                email: None,
                headers: BTreeMap::new(),
                rate_limit_profiles: RateLimitProfilesConfig {
                    anonymous: RateLimitProfileConfig {
                        min_interval_seconds: 1.0,
                        max_parallel: 1,
                    },
                    authenticated: None,
                    identified: Some(RateLimitProfileConfig {
                        min_interval_seconds: 0.5,
                        max_parallel: 2,
                    }),
                },
            },
        );
        Self {
            apis,
            retry_policy: RetryPolicyConfig::default(),
        }
    }
}

/// Daily request/page caps for one domain. `0` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainLimits {
    pub max_requests_per_day: u32,
    pub max_pages_per_day: u32,
}

/// Per-domain daily budget policies with global defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainPolicyConfig {
    #[serde(default = "default_max_requests_per_day")]
    pub default_max_requests_per_day: u32,
    #[serde(default = "default_max_pages_per_day")]
    pub default_max_pages_per_day: u32,
    #[serde(default)]
    pub domains: BTreeMap<String, DomainLimits>,
}

fn default_max_requests_per_day() -> u32 {
    200
}

fn default_max_pages_per_day() -> u32 {
    100
}

impl Default for DomainPolicyConfig {
    fn default() -> Self {
        Self {
            default_max_requests_per_day: default_max_requests_per_day(),
            default_max_pages_per_day: default_max_pages_per_day(),
            domains: BTreeMap::new(),
        }
    }
}

impl DomainPolicyConfig {
    /// Limits for a domain, falling back to the global defaults.
    #[must_use]
    pub fn limits_for(&self, domain: &str) -> DomainLimits {
        self.domains
            .get(domain)
            .copied()
            .unwrap_or(DomainLimits {
                max_requests_per_day: self.default_max_requests_per_day,
                max_pages_per_day: self.default_max_pages_per_day,
            })
    }
}

/// Root configuration object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub academic_apis: AcademicApisConfig,
    #[serde(default)]
    pub domain_policies: DomainPolicyConfig,
    /// Timeout applied to PubMed/PMC enrichment lookups.
    #[serde(default = "default_enrichment_timeout")]
    pub pubmed_enrichment_timeout_seconds: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            academic_apis: AcademicApisConfig::default(),
            domain_policies: DomainPolicyConfig::default(),
            pubmed_enrichment_timeout_seconds: default_enrichment_timeout(),
        }
    }
}

fn default_enrichment_timeout() -> f64 {
    5.0
}

impl Config {
    /// Load configuration from defaults, an optional file, and environment.
    ///
    /// Layering order (later wins): built-in defaults, the given file (or
    /// `~/.config/scholar-pipeline/config.toml` when `None` and present),
    /// then `SCHOLAR_PIPELINE__`-prefixed environment variables with `__`
    /// separators.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        let file = path.or_else(default_config_path);
        if let Some(file) = file {
            if file.exists() {
                builder = builder.add_source(config::File::from(file));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SCHOLAR_PIPELINE").separator("__"),
        );

        let cfg: Config = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        for (name, api) in &self.academic_apis.apis {
            let profiles = &api.rate_limit_profiles;
            for (tier, p) in [
                ("anonymous", Some(profiles.anonymous)),
                ("authenticated", profiles.authenticated),
                ("identified", profiles.identified),
            ] {
                let Some(p) = p else { continue };
                if p.min_interval_seconds < 0.0 {
                    return Err(Error::InvalidConfig {
                        field: format!("{name}.rate_limit_profiles.{tier}.min_interval_seconds"),
                        reason: "must be non-negative".to_string(),
                    });
                }
                if p.max_parallel == 0 {
                    return Err(Error::InvalidConfig {
                        field: format!("{name}.rate_limit_profiles.{tier}.max_parallel"),
                        reason: "must be at least 1".to_string(),
                    });
                }
            }
            if api.timeout_seconds <= 0.0 {
                return Err(Error::InvalidConfig {
                    field: format!("{name}.timeout_seconds"),
                    reason: "must be positive".to_string(),
                });
            }
        }

        let ab = self.academic_apis.retry_policy.auto_backoff;
        if ab.increase_factor <= 1.0 {
            return Err(Error::InvalidConfig {
                field: "retry_policy.auto_backoff.increase_factor".to_string(),
                reason: "must be > 1".to_string(),
            });
        }
        if self.pubmed_enrichment_timeout_seconds <= 0.0 {
            return Err(Error::InvalidConfig {
                field: "pubmed_enrichment_timeout_seconds".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("scholar-pipeline").join("config.toml"))
}

/// Validate that two HTTP status sets do not overlap. Used by the retry
/// policy constructor, exposed here so config-driven sets get the same
/// check.
pub fn ensure_disjoint_status_sets(
    retryable: &BTreeSet<u16>,
    non_retryable: &BTreeSet<u16>,
) -> Result<()> {
    let overlap: Vec<u16> = retryable.intersection(non_retryable).copied().collect();
    if overlap.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidConfig {
            field: "retry_policy.status_codes".to_string(),
            reason: format!("status codes cannot be both retryable and non-retryable: {overlap:?}"),
        })
    }
}
