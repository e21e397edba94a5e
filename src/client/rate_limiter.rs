//! Profile-aware rate limiting for academic API providers.
//!
//! Each provider gets a credential-derived profile (anonymous /
//! authenticated / identified) selected once at first use. The limiter
//! enforces a minimum interval between request *starts* and bounds
//! concurrency with a semaphore whose permit is handed back as an RAII
//! guard, so slots are returned on early return, panic, and cancellation
//! alike.
//!
//! Repeated 429 responses grow the interval and shrink the concurrency
//! (down to 1); a sustained run of successes steps the interval back toward
//! the configured value. `config_max_parallel` is an upper bound that never
//! rises above the profile's configured value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{AcademicApisConfig, RateLimitProfile, RateLimitProfileConfig};

/// RAII slot for one in-flight request against a provider.
///
/// Dropping the permit releases the concurrency slot. Hold it only for the
/// duration of a single HTTP attempt — never across a retry backoff sleep.
#[derive(Debug)]
pub struct RateLimitPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Observable state of one provider's limiter, for tests and diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSnapshot {
    pub profile: RateLimitProfile,
    pub downgraded: bool,
    pub current_min_interval: Duration,
    pub configured_min_interval: Duration,
    pub current_max_parallel: usize,
    pub config_max_parallel: usize,
    pub consecutive_429: u32,
}

struct ProviderState {
    profile: RateLimitProfile,
    downgraded: bool,
    configured_min_interval: Duration,
    current_min_interval: Duration,
    /// Upper bound for parallelism; only ever lowered (e.g. on downgrade).
    config_max_parallel: usize,
    current_max_parallel: usize,
    next_start: Option<Instant>,
    consecutive_429: u32,
    stable_since: Option<Instant>,
}

struct ProviderLimiter {
    name: String,
    semaphore: Arc<Semaphore>,
    state: Mutex<ProviderState>,
}

/// Process-wide rate limiter keyed by provider name.
pub struct AcademicRateLimiter {
    config: AcademicApisConfig,
    providers: Mutex<HashMap<String, Arc<ProviderLimiter>>>,
}

impl AcademicRateLimiter {
    #[must_use]
    pub fn new(config: AcademicApisConfig) -> Self {
        Self {
            config,
            providers: Mutex::new(HashMap::new()),
        }
    }

    async fn provider(&self, name: &str) -> Arc<ProviderLimiter> {
        let mut providers = self.providers.lock().await;
        if let Some(p) = providers.get(name) {
            return p.clone();
        }

        let (profile, params) = self.initial_profile(name);
        info!(
            provider = name,
            profile = profile.as_str(),
            min_interval_s = params.min_interval_seconds,
            max_parallel = params.max_parallel,
            "rate limiter profile selected"
        );
        let interval = Duration::from_secs_f64(params.min_interval_seconds.max(0.0));
        let limiter = Arc::new(ProviderLimiter {
            name: name.to_string(),
            semaphore: Arc::new(Semaphore::new(params.max_parallel)),
            state: Mutex::new(ProviderState {
                profile,
                downgraded: false,
                configured_min_interval: interval,
                current_min_interval: interval,
                config_max_parallel: params.max_parallel,
                current_max_parallel: params.max_parallel,
                next_start: None,
                consecutive_429: 0,
                stable_since: None,
            }),
        });
        providers.insert(name.to_string(), limiter.clone());
        limiter
    }

    fn initial_profile(&self, name: &str) -> (RateLimitProfile, RateLimitProfileConfig) {
        match self.config.get_api_config(name) {
            Some(api) => {
                let profile = api.select_profile();
                if profile == RateLimitProfile::Anonymous
                    && (api.rate_limit_profiles.authenticated.is_some()
                        || api.rate_limit_profiles.identified.is_some())
                {
                    warn!(
                        provider = name,
                        "no credentials configured, using anonymous rate limits"
                    );
                }
                (profile, api.rate_limit_profiles.for_profile(profile))
            }
            None => {
                debug!(provider = name, "unknown provider, using conservative defaults");
                (
                    RateLimitProfile::Anonymous,
                    RateLimitProfileConfig {
                        min_interval_seconds: 1.0,
                        max_parallel: 1,
                    },
                )
            }
        }
    }

    /// Wait for a concurrency slot and the provider's min interval, then
    /// return the slot as a guard. The interval is enforced between request
    /// starts: callers that queue behind other requests are assigned
    /// consecutive start times.
    pub async fn acquire(&self, provider: &str) -> RateLimitPermit {
        let limiter = self.provider(provider).await;

        let permit = match limiter.semaphore.clone().acquire_owned().await {
            Ok(p) => Some(p),
            Err(_) => {
                // The semaphore is never closed; tolerate it anyway.
                warn!(provider, "rate limiter semaphore closed, proceeding without slot");
                None
            }
        };

        let start_at = {
            let mut state = limiter.state.lock().await;
            let now = Instant::now();
            let start = match state.next_start {
                Some(t) if t > now => t,
                _ => now,
            };
            state.next_start = Some(start + state.current_min_interval);
            start
        };

        if start_at > Instant::now() {
            debug!(
                provider,
                wait_ms = (start_at - Instant::now()).as_millis() as u64,
                "rate limiter spacing request start"
            );
        }
        tokio::time::sleep_until(start_at).await;

        RateLimitPermit { _permit: permit }
    }

    /// Record a 429 from a provider: grows the current interval, shrinks
    /// parallelism toward 1, and returns the new consecutive-429 streak.
    pub async fn record_429(&self, provider: &str) -> u32 {
        let limiter = self.provider(provider).await;
        let auto = self.config.retry_policy.auto_backoff;
        let mut state = limiter.state.lock().await;

        state.consecutive_429 = state.consecutive_429.saturating_add(1);
        state.stable_since = None;

        let grown = Duration::from_secs_f64(
            (state.current_min_interval.as_secs_f64() * auto.increase_factor)
                .min(auto.max_interval_seconds)
                .max(state.configured_min_interval.as_secs_f64()),
        );
        if grown > state.current_min_interval {
            info!(
                provider,
                from_s = state.current_min_interval.as_secs_f64(),
                to_s = grown.as_secs_f64(),
                "auto-backoff: growing min interval after 429"
            );
            state.current_min_interval = grown;
        }

        while state.current_max_parallel > 1 {
            match limiter.semaphore.clone().try_acquire_owned() {
                Ok(permit) => {
                    permit.forget();
                    state.current_max_parallel -= 1;
                    debug!(
                        provider,
                        max_parallel = state.current_max_parallel,
                        "auto-backoff: reduced parallelism after 429"
                    );
                }
                Err(_) => break,
            }
        }

        state.consecutive_429
    }

    /// Record a successful call. Resets the 429 streak; after
    /// `recovery_stable_seconds` of uninterrupted successes, steps the
    /// interval back toward the configured value and restores one withheld
    /// concurrency slot.
    pub async fn record_success(&self, provider: &str) {
        let limiter = self.provider(provider).await;
        let auto = self.config.retry_policy.auto_backoff;
        let mut state = limiter.state.lock().await;

        state.consecutive_429 = 0;
        let now = Instant::now();
        match state.stable_since {
            None => state.stable_since = Some(now),
            Some(since) => {
                let stable_for = now.duration_since(since);
                if stable_for >= Duration::from_secs(auto.recovery_stable_seconds)
                    && state.current_min_interval > state.configured_min_interval
                {
                    let stepped = state
                        .current_min_interval
                        .saturating_sub(Duration::from_secs_f64(auto.decrease_step_seconds))
                        .max(state.configured_min_interval);
                    info!(
                        provider,
                        from_s = state.current_min_interval.as_secs_f64(),
                        to_s = stepped.as_secs_f64(),
                        "auto-backoff: recovering min interval after stable successes"
                    );
                    state.current_min_interval = stepped;
                    state.stable_since = Some(now);

                    if state.current_max_parallel < state.config_max_parallel {
                        limiter.semaphore.add_permits(1);
                        state.current_max_parallel += 1;
                    }
                }
            }
        }
    }

    /// Reset the consecutive-429 streak (any non-429 outcome).
    pub async fn reset_429_streak(&self, provider: &str) {
        let limiter = self.provider(provider).await;
        limiter.state.lock().await.consecutive_429 = 0;
    }

    /// Move a provider to the anonymous profile and reapply its stricter
    /// limits. Idempotent; a downgraded provider never re-upgrades.
    pub async fn downgrade_profile(&self, provider: &str) {
        let limiter = self.provider(provider).await;
        let mut state = limiter.state.lock().await;
        if state.downgraded {
            debug!(provider, "downgrade_profile: already downgraded");
            return;
        }

        let anon = self
            .config
            .get_api_config(provider)
            .map(|api| api.rate_limit_profiles.anonymous)
            .unwrap_or(RateLimitProfileConfig {
                min_interval_seconds: 1.0,
                max_parallel: 1,
            });

        warn!(
            provider,
            from = state.profile.as_str(),
            "downgrading provider to anonymous rate limits"
        );
        state.profile = RateLimitProfile::Anonymous;
        state.downgraded = true;

        let anon_interval = Duration::from_secs_f64(anon.min_interval_seconds.max(0.0));
        state.configured_min_interval = anon_interval;
        if state.current_min_interval < anon_interval {
            state.current_min_interval = anon_interval;
        }

        state.config_max_parallel = state.config_max_parallel.min(anon.max_parallel);
        while state.current_max_parallel > state.config_max_parallel {
            state.current_max_parallel -= 1;
            let semaphore = limiter.semaphore.clone();
            let name = limiter.name.clone();
            // An in-flight request may hold the permit; burn it as soon as
            // it frees up.
            tokio::spawn(async move {
                if let Ok(permit) = semaphore.acquire_owned().await {
                    permit.forget();
                    debug!(provider = %name, "withheld one concurrency slot after downgrade");
                }
            });
        }
    }

    /// Current profile for a provider, if it has been initialized.
    pub async fn get_current_profile(&self, provider: &str) -> Option<RateLimitProfile> {
        let providers = self.providers.lock().await;
        match providers.get(provider) {
            Some(p) => Some(p.state.lock().await.profile),
            None => None,
        }
    }

    /// Profile-aware consecutive-429 ceiling for a provider.
    pub async fn max_consecutive_429_for(&self, provider: &str) -> u32 {
        let limiter = self.provider(provider).await;
        let profile = limiter.state.lock().await.profile;
        self.config.retry_policy.max_consecutive_429_for(profile)
    }

    /// Ceiling used when no provider context is available.
    #[must_use]
    pub fn base_max_consecutive_429(&self) -> u32 {
        self.config.retry_policy.max_consecutive_429
    }

    /// Snapshot for tests and diagnostics.
    pub async fn snapshot(&self, provider: &str) -> ProviderSnapshot {
        let limiter = self.provider(provider).await;
        let state = limiter.state.lock().await;
        ProviderSnapshot {
            profile: state.profile,
            downgraded: state.downgraded,
            current_min_interval: state.current_min_interval,
            configured_min_interval: state.configured_min_interval,
            current_max_parallel: state.current_max_parallel,
            config_max_parallel: state.config_max_parallel,
            consecutive_429: state.consecutive_429,
        }
    }
}

static GLOBAL_LIMITER: StdMutex<Option<Arc<AcademicRateLimiter>>> = StdMutex::new(None);

/// Initialize the process-wide limiter with explicit configuration,
/// replacing any existing instance. Returns the new handle.
pub fn init_academic_rate_limiter(config: AcademicApisConfig) -> Arc<AcademicRateLimiter> {
    let limiter = Arc::new(AcademicRateLimiter::new(config));
    *GLOBAL_LIMITER.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
        Some(limiter.clone());
    limiter
}

/// Process-wide limiter handle, lazily created from default configuration.
#[must_use]
pub fn get_academic_rate_limiter() -> Arc<AcademicRateLimiter> {
    let mut guard = GLOBAL_LIMITER
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(limiter) = guard.as_ref() {
        return limiter.clone();
    }
    let limiter = Arc::new(AcademicRateLimiter::new(AcademicApisConfig::default()));
    *guard = Some(limiter.clone());
    limiter
}

/// Drop the process-wide limiter. Test harnesses only; production code
/// must never call this.
pub fn reset_academic_rate_limiter() {
    *GLOBAL_LIMITER.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(
        api_key: Option<&str>,
        email: Option<&str>,
        min_interval: f64,
        max_parallel: usize,
    ) -> AcademicApisConfig {
        let mut config = AcademicApisConfig::default();
        let s2 = config.apis.get_mut("semantic_scholar").unwrap();
        s2.api_key = api_key.map(str::to_string);
        s2.email = email.map(str::to_string);
        s2.rate_limit_profiles.anonymous = RateLimitProfileConfig {
            min_interval_seconds: min_interval,
            max_parallel,
        };
        config
    }

    fn zero_interval_config() -> AcademicApisConfig {
        let mut config = AcademicApisConfig::default();
        for api in config.apis.values_mut() {
            let zero = |p: &mut RateLimitProfileConfig| p.min_interval_seconds = 0.0;
            zero(&mut api.rate_limit_profiles.anonymous);
            if let Some(p) = api.rate_limit_profiles.authenticated.as_mut() {
                zero(p);
            }
            if let Some(p) = api.rate_limit_profiles.identified.as_mut() {
                zero(p);
            }
        }
        config
    }

    #[tokio::test]
    async fn api_key_selects_authenticated_profile() {
        let limiter = AcademicRateLimiter::new(config_with(Some("key"), None, 0.0, 1));
        let _permit = limiter.acquire("semantic_scholar").await;
        assert_eq!(
            limiter.get_current_profile("semantic_scholar").await,
            Some(RateLimitProfile::Authenticated)
        );
    }

    #[tokio::test]
    async fn email_selects_identified_profile() {
        let mut config = AcademicApisConfig::default();
        config.apis.get_mut("openalex").unwrap().email = Some("team@example.org".to_string());
        let limiter = AcademicRateLimiter::new(config);
        let snapshot = limiter.snapshot("openalex").await;
        assert_eq!(snapshot.profile, RateLimitProfile::Identified);
        assert_eq!(snapshot.current_max_parallel, 2);
        assert_eq!(snapshot.current_min_interval, Duration::from_millis(200));
    }

    #[tokio::test]
    async fn no_credentials_selects_anonymous() {
        let limiter = AcademicRateLimiter::new(AcademicApisConfig::default());
        let snapshot = limiter.snapshot("semantic_scholar").await;
        assert_eq!(snapshot.profile, RateLimitProfile::Anonymous);
        assert_eq!(snapshot.current_min_interval, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn unknown_provider_falls_back_to_anonymous_defaults() {
        let limiter = AcademicRateLimiter::new(AcademicApisConfig::default());
        let snapshot = limiter.snapshot("nonexistent").await;
        assert_eq!(snapshot.profile, RateLimitProfile::Anonymous);
        assert_eq!(snapshot.current_max_parallel, 1);
    }

    #[tokio::test]
    async fn permit_gates_concurrency_and_releases_on_drop() {
        let limiter = Arc::new(AcademicRateLimiter::new(zero_interval_config()));
        let permit = limiter.acquire("semantic_scholar").await;

        // Second acquire must block while the permit is held.
        let second = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let _p = limiter.acquire("semantic_scholar").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        drop(permit);
        tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .expect("second acquire should complete after drop")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_acquire_does_not_leak_slots() {
        let limiter = Arc::new(AcademicRateLimiter::new(zero_interval_config()));
        let held = limiter.acquire("semantic_scholar").await;

        // Start an acquire and cancel it while it waits on the semaphore.
        let waiting = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let _p = limiter.acquire("semantic_scholar").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiting.abort();
        let _ = waiting.await;

        drop(held);
        // The slot must be available again for a fresh caller.
        let reacquired = tokio::time::timeout(
            Duration::from_secs(1),
            limiter.acquire("semantic_scholar"),
        )
        .await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn repeated_429_grows_interval_and_counts_streak() {
        let limiter = AcademicRateLimiter::new(config_with(None, None, 1.0, 1));
        assert_eq!(limiter.record_429("semantic_scholar").await, 1);
        assert_eq!(limiter.record_429("semantic_scholar").await, 2);
        let snapshot = limiter.snapshot("semantic_scholar").await;
        assert_eq!(snapshot.consecutive_429, 2);
        assert_eq!(snapshot.current_min_interval, Duration::from_secs(4));
        // Configured value is untouched
        assert_eq!(snapshot.configured_min_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn success_resets_streak() {
        let limiter = AcademicRateLimiter::new(config_with(None, None, 1.0, 1));
        limiter.record_429("semantic_scholar").await;
        limiter.record_success("semantic_scholar").await;
        assert_eq!(limiter.snapshot("semantic_scholar").await.consecutive_429, 0);
    }

    #[tokio::test]
    async fn interval_growth_is_capped() {
        let limiter = AcademicRateLimiter::new(config_with(None, None, 1.0, 1));
        for _ in 0..20 {
            limiter.record_429("semantic_scholar").await;
        }
        let snapshot = limiter.snapshot("semantic_scholar").await;
        assert_eq!(snapshot.current_min_interval, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn downgrade_is_idempotent_and_sticky() {
        let mut config = AcademicApisConfig::default();
        config.apis.get_mut("openalex").unwrap().email = Some("team@example.org".to_string());
        let limiter = AcademicRateLimiter::new(config);

        assert_eq!(
            limiter.snapshot("openalex").await.profile,
            RateLimitProfile::Identified
        );
        limiter.downgrade_profile("openalex").await;
        let first = limiter.snapshot("openalex").await;
        assert_eq!(first.profile, RateLimitProfile::Anonymous);
        assert!(first.downgraded);
        assert_eq!(first.config_max_parallel, 1);
        assert_eq!(first.current_min_interval, Duration::from_millis(500));

        limiter.downgrade_profile("openalex").await;
        let second = limiter.snapshot("openalex").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn ceiling_is_profile_aware() {
        let limiter = AcademicRateLimiter::new(config_with(Some("key"), None, 0.0, 1));
        assert_eq!(limiter.max_consecutive_429_for("semantic_scholar").await, 5);
        let anon = AcademicRateLimiter::new(AcademicApisConfig::default());
        assert_eq!(anon.max_consecutive_429_for("semantic_scholar").await, 2);
    }

    #[tokio::test]
    async fn min_interval_spaces_request_starts() {
        let limiter = AcademicRateLimiter::new(config_with(None, None, 0.05, 1));
        let start = Instant::now();
        drop(limiter.acquire("semantic_scholar").await);
        drop(limiter.acquire("semantic_scholar").await);
        drop(limiter.acquire("semantic_scholar").await);
        // Three starts with 50ms spacing: at least ~100ms elapsed.
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
