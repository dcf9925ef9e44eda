use serde::{Deserialize, Serialize};

/// Application-level constants
pub const APP_NAME: &str = "MedRemind";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default base path of the portal's Prescription Store API.
pub const DEFAULT_API_BASE_URL: &str = "https://localhost/api";

/// Default icon resource attached to reminder notifications.
pub const DEFAULT_NOTIFICATION_ICON: &str = "/icons/pill.png";

const ENV_API_URL: &str = "MEDREMIND_API_URL";
const ENV_API_TOKEN: &str = "MEDREMIND_API_TOKEN";
const ENV_REQUEST_TIMEOUT: &str = "MEDREMIND_REQUEST_TIMEOUT_SECS";
const ENV_FETCH_ATTEMPTS: &str = "MEDREMIND_FETCH_ATTEMPTS";
const ENV_RETRY_BACKOFF: &str = "MEDREMIND_RETRY_BACKOFF_MS";
const ENV_DOUBLE_SUBMIT: &str = "MEDREMIND_DOUBLE_SUBMIT_SECS";
const ENV_NOTIFICATION_ICON: &str = "MEDREMIND_NOTIFICATION_ICON";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "medremind=info,warn"
}

/// Runtime configuration for the reminder engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the Prescription Store API, including the `/api` path.
    pub api_base_url: String,
    /// Bearer token issued by the portal's auth collaborator.
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    /// Total attempts for a reminder fetch (1 = no retry).
    pub max_fetch_attempts: u32,
    /// Linear backoff step between fetch attempts.
    pub retry_backoff_ms: u64,
    /// A second dose submitted within this many seconds of the last one is
    /// treated as a repeated click.
    pub double_submit_window_secs: i64,
    pub notification_icon: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            api_token: None,
            request_timeout_secs: 15,
            max_fetch_attempts: 3,
            retry_backoff_ms: 250,
            double_submit_window_secs: 120,
            notification_icon: DEFAULT_NOTIFICATION_ICON.into(),
        }
    }
}

impl EngineConfig {
    /// Build a config from `MEDREMIND_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Missing keys keep their
    /// defaults; malformed numbers are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = non_empty(lookup(ENV_API_URL)) {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        config.api_token = non_empty(lookup(ENV_API_TOKEN));
        if let Some(icon) = non_empty(lookup(ENV_NOTIFICATION_ICON)) {
            config.notification_icon = icon;
        }

        if let Some(v) = parse_number(ENV_REQUEST_TIMEOUT, lookup(ENV_REQUEST_TIMEOUT)) {
            config.request_timeout_secs = v;
        }
        if let Some(v) = parse_number::<u32>(ENV_FETCH_ATTEMPTS, lookup(ENV_FETCH_ATTEMPTS)) {
            config.max_fetch_attempts = v.max(1);
        }
        if let Some(v) = parse_number(ENV_RETRY_BACKOFF, lookup(ENV_RETRY_BACKOFF)) {
            config.retry_backoff_ms = v;
        }
        if let Some(v) = parse_number::<i64>(ENV_DOUBLE_SUBMIT, lookup(ENV_DOUBLE_SUBMIT)) {
            config.double_submit_window_secs = v.max(0);
        }

        config
    }

    pub fn retry_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn double_submit_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.double_submit_window_secs)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
    let raw = non_empty(value)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring malformed config value");
            None
        }
    }
}
