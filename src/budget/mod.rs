//! Per-domain daily request/page budgets.
//!
//! Budgets are created lazily from the domain policy store, reset
//! atomically when the calendar date changes, and fail open: an error
//! inside the check itself allows the request rather than wedging the
//! pipeline on a bookkeeping bug. A max of `0` means unlimited.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

use crate::config::{DomainLimits, DomainPolicyConfig};

/// Daily counters for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDailyBudget {
    pub domain: String,
    pub date: NaiveDate,
    pub requests_today: u32,
    pub pages_today: u32,
    pub max_requests_per_day: u32,
    pub max_pages_per_day: u32,
}

impl DomainDailyBudget {
    #[must_use]
    pub fn requests_remaining(&self) -> u32 {
        if self.max_requests_per_day == 0 {
            u32::MAX
        } else {
            self.max_requests_per_day.saturating_sub(self.requests_today)
        }
    }

    #[must_use]
    pub fn pages_remaining(&self) -> u32 {
        if self.max_pages_per_day == 0 {
            u32::MAX
        } else {
            self.max_pages_per_day.saturating_sub(self.pages_today)
        }
    }
}

/// Outcome of a budget check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetCheckResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub requests_remaining: u32,
    pub pages_remaining: u32,
}

/// Aggregate counters across all tracked domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetStats {
    pub date: NaiveDate,
    pub domains_tracked: usize,
    pub total_requests_today: u32,
    pub total_pages_today: u32,
    pub exceeded_domains: Vec<String>,
}

struct ManagerState {
    budgets: HashMap<String, DomainDailyBudget>,
    current_date: NaiveDate,
}

/// Thread-safe manager of per-domain daily budgets. The data lock is held
/// only for arithmetic.
pub struct DomainBudgetManager {
    policies: DomainPolicyConfig,
    state: Mutex<ManagerState>,
    today: fn() -> NaiveDate,
}

fn today_local() -> NaiveDate {
    chrono::Local::now().date_naive()
}

impl DomainBudgetManager {
    #[must_use]
    pub fn new(policies: DomainPolicyConfig) -> Self {
        info!(
            default_max_requests = policies.default_max_requests_per_day,
            default_max_pages = policies.default_max_pages_per_day,
            "domain daily budget manager initialized"
        );
        Self {
            policies,
            state: Mutex::new(ManagerState {
                budgets: HashMap::new(),
                current_date: today_local(),
            }),
            today: today_local,
        }
    }

    /// Manager with an injected clock (tests).
    #[must_use]
    pub fn with_clock(policies: DomainPolicyConfig, today: fn() -> NaiveDate) -> Self {
        Self {
            policies,
            state: Mutex::new(ManagerState {
                budgets: HashMap::new(),
                current_date: today(),
            }),
            today,
        }
    }

    fn limits_for(&self, domain: &str) -> DomainLimits {
        self.policies.limits_for(domain)
    }

    /// Check whether a request to `domain` is allowed today. Any failure
    /// inside the check allows the request with a
    /// `check_error_failopen:` reason.
    pub fn can_request_to_domain(&self, domain: &str) -> BudgetCheckResult {
        match self.try_check(domain) {
            Ok(result) => result,
            Err(e) => {
                error!(
                    domain,
                    error = %e,
                    "error checking domain budget, allowing request (fail-open)"
                );
                BudgetCheckResult {
                    allowed: true,
                    reason: Some(format!("check_error_failopen:{e}")),
                    requests_remaining: self.policies.default_max_requests_per_day,
                    pages_remaining: self.policies.default_max_pages_per_day,
                }
            }
        }
    }

    fn try_check(&self, domain: &str) -> Result<BudgetCheckResult, String> {
        let domain = domain.trim().to_lowercase();
        let limits = self.limits_for(&domain);
        let mut state = self.state.lock().map_err(|e| e.to_string())?;
        Self::roll_date_if_needed(&mut state, (self.today)());
        let budget = Self::budget_entry(&mut state, &domain, limits);

        if budget.max_requests_per_day > 0 && budget.requests_today >= budget.max_requests_per_day {
            debug!(
                domain = %domain,
                requests_today = budget.requests_today,
                max_requests = budget.max_requests_per_day,
                "domain request budget exceeded"
            );
            return Ok(BudgetCheckResult {
                allowed: false,
                reason: Some(format!(
                    "request_limit_exceeded:{}/{}",
                    budget.requests_today, budget.max_requests_per_day
                )),
                requests_remaining: 0,
                pages_remaining: budget.pages_remaining(),
            });
        }

        if budget.max_pages_per_day > 0 && budget.pages_today >= budget.max_pages_per_day {
            debug!(
                domain = %domain,
                pages_today = budget.pages_today,
                max_pages = budget.max_pages_per_day,
                "domain page budget exceeded"
            );
            return Ok(BudgetCheckResult {
                allowed: false,
                reason: Some(format!(
                    "page_limit_exceeded:{}/{}",
                    budget.pages_today, budget.max_pages_per_day
                )),
                requests_remaining: budget.requests_remaining(),
                pages_remaining: 0,
            });
        }

        Ok(BudgetCheckResult {
            allowed: true,
            reason: None,
            requests_remaining: budget.requests_remaining(),
            pages_remaining: budget.pages_remaining(),
        })
    }

    /// Record a completed request (optionally a page fetch).
    pub fn record_domain_request(&self, domain: &str, is_page: bool) {
        let domain = domain.trim().to_lowercase();
        let limits = self.limits_for(&domain);
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(e) => {
                error!(domain = %domain, error = %e, "error recording domain request");
                return;
            }
        };
        Self::roll_date_if_needed(&mut state, (self.today)());
        let budget = Self::budget_entry(&mut state, &domain, limits);
        budget.requests_today += 1;
        if is_page {
            budget.pages_today += 1;
        }
        debug!(
            domain = %domain,
            requests_today = budget.requests_today,
            pages_today = budget.pages_today,
            is_page,
            "domain request recorded"
        );
    }

    fn roll_date_if_needed(state: &mut ManagerState, today: NaiveDate) {
        if today != state.current_date {
            info!(
                old_date = %state.current_date,
                new_date = %today,
                domains_reset = state.budgets.len(),
                "date changed, resetting domain budgets"
            );
            state.budgets.clear();
            state.current_date = today;
        }
    }

    fn budget_entry<'a>(
        state: &'a mut ManagerState,
        domain: &str,
        limits: DomainLimits,
    ) -> &'a mut DomainDailyBudget {
        let current_date = state.current_date;
        state
            .budgets
            .entry(domain.to_string())
            .or_insert_with(|| {
                debug!(
                    domain,
                    max_requests = limits.max_requests_per_day,
                    max_pages = limits.max_pages_per_day,
                    "created domain budget"
                );
                DomainDailyBudget {
                    domain: domain.to_string(),
                    date: current_date,
                    requests_today: 0,
                    pages_today: 0,
                    max_requests_per_day: limits.max_requests_per_day,
                    max_pages_per_day: limits.max_pages_per_day,
                }
            })
    }

    /// Current budget snapshot for one domain (created if absent).
    #[must_use]
    pub fn get_domain_budget(&self, domain: &str) -> DomainDailyBudget {
        let domain = domain.trim().to_lowercase();
        let limits = self.limits_for(&domain);
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Self::roll_date_if_needed(&mut state, (self.today)());
        Self::budget_entry(&mut state, &domain, limits).clone()
    }

    /// Snapshot of every tracked domain.
    #[must_use]
    pub fn get_all_budgets(&self) -> HashMap<String, DomainDailyBudget> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Self::roll_date_if_needed(&mut state, (self.today)());
        state.budgets.clone()
    }

    /// Aggregate statistics for observability surfaces.
    #[must_use]
    pub fn get_stats(&self) -> BudgetStats {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Self::roll_date_if_needed(&mut state, (self.today)());

        let mut exceeded: Vec<String> = state
            .budgets
            .iter()
            .filter(|(_, b)| {
                (b.max_requests_per_day > 0 && b.requests_today >= b.max_requests_per_day)
                    || (b.max_pages_per_day > 0 && b.pages_today >= b.max_pages_per_day)
            })
            .map(|(domain, _)| domain.clone())
            .collect();
        exceeded.sort();

        BudgetStats {
            date: state.current_date,
            domains_tracked: state.budgets.len(),
            total_requests_today: state.budgets.values().map(|b| b.requests_today).sum(),
            total_pages_today: state.budgets.values().map(|b| b.pages_today).sum(),
            exceeded_domains: exceeded,
        }
    }

    /// Drop every budget without touching the date.
    pub fn clear_budgets(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.budgets.clear();
        debug!("domain budgets cleared");
    }
}

static GLOBAL_MANAGER: Mutex<Option<Arc<DomainBudgetManager>>> = Mutex::new(None);

/// Initialize the process-wide manager with explicit policies, replacing
/// any existing instance.
pub fn init_domain_budget_manager(policies: DomainPolicyConfig) -> Arc<DomainBudgetManager> {
    let manager = Arc::new(DomainBudgetManager::new(policies));
    *GLOBAL_MANAGER
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(manager.clone());
    manager
}

/// Process-wide manager handle, lazily created with default policies.
#[must_use]
pub fn get_domain_budget_manager() -> Arc<DomainBudgetManager> {
    let mut guard = GLOBAL_MANAGER
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(manager) = guard.as_ref() {
        return manager.clone();
    }
    let manager = Arc::new(DomainBudgetManager::new(DomainPolicyConfig::default()));
    *guard = Some(manager.clone());
    manager
}

/// Drop the process-wide manager. Test harnesses only; production code
/// must never call this.
pub fn reset_domain_budget_manager() {
    *GLOBAL_MANAGER
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = None;
}
