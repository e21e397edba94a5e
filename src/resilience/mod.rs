//! Resilience primitives: backoff math and the classified retry engine.

pub mod backoff;
pub mod retry;

pub use backoff::{
    backoff_duration, calculate_backoff, calculate_cooldown_minutes, calculate_total_delay,
    BackoffConfig,
};
pub use retry::{academic_api_policy, retry_api_call, ApiRetryPolicy};
