use std::time::Duration;

use escrow_common::Secret;
use log::*;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a downstream service lives and how to authenticate with it.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new<S: Into<String>>(base_url: S, api_key: S) -> Self {
        Self { base_url: base_url.into(), api_key: Secret::new(api_key.into()), timeout: DEFAULT_REQUEST_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn payment_gateway_from_env_or_default() -> Self {
        Self::from_env_or_default("ESG_PAYMENT_GATEWAY", "http://localhost:8480")
    }

    pub fn balance_ledger_from_env_or_default() -> Self {
        Self::from_env_or_default("ESG_BALANCE_LEDGER", "http://localhost:8490")
    }

    /// The notification service is optional. Returns `None` if `ESG_NOTIFICATION_URL` is not set.
    pub fn notifications_from_env() -> Option<Self> {
        let base_url = std::env::var("ESG_NOTIFICATION_URL").ok().filter(|s| !s.trim().is_empty())?;
        let api_key = std::env::var("ESG_NOTIFICATION_API_KEY").unwrap_or_default();
        Some(Self::new(base_url, api_key).with_timeout(request_timeout_from_env()))
    }

    fn from_env_or_default(prefix: &str, default_url: &str) -> Self {
        let base_url = std::env::var(format!("{prefix}_URL")).unwrap_or_else(|_| {
            warn!("🌐️ {prefix}_URL not set, using (probably useless) default {default_url}");
            default_url.to_string()
        });
        let api_key = std::env::var(format!("{prefix}_API_KEY")).unwrap_or_else(|_| {
            warn!("🌐️ {prefix}_API_KEY not set. Requests will not be authenticated");
            String::default()
        });
        Self::new(base_url, api_key).with_timeout(request_timeout_from_env())
    }

    /// Joins `path` onto the base url, tolerating a trailing slash on the base url.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

fn request_timeout_from_env() -> Duration {
    std::env::var("ESG_EXTERNAL_CALL_TIMEOUT_SECS")
        .ok()
        .and_then(|s| {
            s.parse::<u64>()
                .map_err(|e| warn!("🌐️ Invalid ESG_EXTERNAL_CALL_TIMEOUT_SECS: {s}. {e}"))
                .ok()
        })
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
}
