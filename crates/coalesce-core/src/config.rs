//! Engine configuration.
//!
//! Provides [`EngineConfig`] for tuning the execution side of a synthesis:
//! worker-pool width, retry budget, backoff, and per-part timeouts.
//! Values can be loaded from `COALESCE_*` environment variables via
//! [`EngineConfig::from_env`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Hard ceiling on the number of parts one session may carry, dictated by
/// the store's multi-part protocol.
pub const MAX_PART_COUNT: u32 = 10_000;

/// Execution configuration for the synthesis engine.
///
/// All fields have defaults matching the behavior of the stock transfer
/// managers: ten parallel part transfers, five attempts per part with
/// doubling backoff.
///
/// # Examples
///
/// ```
/// use coalesce_core::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.parallelism, 10);
/// assert_eq!(config.retry_limit, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum number of part transfers in flight at once.
    #[builder(default = 10)]
    pub parallelism: usize,

    /// Attempts per part before its transfer is reported failed.
    #[builder(default = 5)]
    pub retry_limit: u32,

    /// Backoff before the second attempt; doubles on each further attempt.
    #[builder(default = Duration::from_millis(250))]
    pub backoff_base: Duration,

    /// Independent timeout applied to each part transfer attempt. A
    /// timeout counts as a transient failure against the retry budget.
    #[builder(default = Duration::from_secs(300))]
    pub part_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: 10,
            retry_limit: 5,
            backoff_base: Duration::from_millis(250),
            part_timeout: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads the following variables (falling back to defaults):
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `COALESCE_PARALLELISM` | `10` |
    /// | `COALESCE_RETRY_LIMIT` | `5` |
    /// | `COALESCE_BACKOFF_BASE_MS` | `250` |
    /// | `COALESCE_PART_TIMEOUT_SECS` | `300` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = parse_env("COALESCE_PARALLELISM") {
            config.parallelism = n;
        }
        if let Some(n) = parse_env("COALESCE_RETRY_LIMIT") {
            config.retry_limit = n;
        }
        if let Some(ms) = parse_env("COALESCE_BACKOFF_BASE_MS") {
            config.backoff_base = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_env("COALESCE_PART_TIMEOUT_SECS") {
            config.part_timeout = Duration::from_secs(secs);
        }

        config
    }
}

/// Parse an environment variable, ignoring unset or malformed values.
fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
