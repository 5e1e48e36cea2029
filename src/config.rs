//! Application configuration loaded from environment variables.
//!
//! All variables are optional:
//! - `BOOKFEED_WS_URL` — market-data WebSocket endpoint
//! - `BOOKFEED_API_URL` — order-placement REST base URL
//! - `BOOKFEED_RECONNECT_INITIAL_MS` — first backoff delay
//! - `BOOKFEED_RECONNECT_MAX_MS` — backoff cap
//! - `BOOKFEED_MAX_RETRIES` — consecutive failed connect attempts before
//!   giving up (unset means retry forever)

use std::time::Duration;

/// Default market-data WebSocket endpoint.
const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080/ws/market";

/// Default order-placement REST base URL.
const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";

/// Initial backoff duration between reconnection attempts.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum backoff duration between reconnection attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ws_url: String,
    pub api_url: String,
    pub reconnect: ReconnectPolicy,
}

/// Reconnection policy: exponential backoff with a cap, and an optional
/// limit on consecutive failed connect attempts.
///
/// By default retries continue indefinitely. That deliberately masks
/// permanent failures, so every retry is surfaced to callers as a
/// `Reconnecting` event; set `max_retries` to opt into giving up.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
            max_retries: None,
        }
    }
}

impl ReconnectPolicy {
    /// Returns the delay before retry number `attempt` (zero-based),
    /// doubling each time and capped at `max_backoff`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Loads the application configuration from environment variables.
///
/// Empty values are treated as absent. Both URLs fall back to the local
/// development defaults.
///
/// # Errors
///
/// Returns [`BookfeedError::Config`](crate::BookfeedError::Config) if one
/// of the numeric overrides is set but not parseable.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let ws_url = non_empty_var("BOOKFEED_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string());
    let api_url = non_empty_var("BOOKFEED_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let mut reconnect = ReconnectPolicy::default();
    if let Some(ms) = parse_var_u64("BOOKFEED_RECONNECT_INITIAL_MS")? {
        reconnect.initial_backoff = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_var_u64("BOOKFEED_RECONNECT_MAX_MS")? {
        reconnect.max_backoff = Duration::from_millis(ms);
    }
    if let Some(retries) = parse_var_u64("BOOKFEED_MAX_RETRIES")? {
        reconnect.max_retries = Some(retries.min(u64::from(u32::MAX)) as u32);
    }

    Ok(AppConfig {
        ws_url,
        api_url,
        reconnect,
    })
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Parses a numeric environment variable, if set.
fn parse_var_u64(name: &str) -> crate::Result<Option<u64>> {
    match non_empty_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| crate::BookfeedError::Config(format!("{name}: {e}"))),
    }
}
