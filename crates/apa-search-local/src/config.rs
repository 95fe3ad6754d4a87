use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://www.apa.org";
pub const DEFAULT_SITE_NAME: &str = "APA.org";
pub const DEFAULT_SEARCH_PATH: &str = "/search";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_BYTES: u64 = 5_000_000;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env(key).and_then(|s| s.parse::<u64>().ok())
}

/// Where and how the service talks to the target site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteConfig {
    /// Site root, without a trailing slash.
    pub base_url: String,
    /// Display name used in report headers.
    pub site_name: String,
    pub search_path: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_redirects: usize,
    pub max_bytes: u64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            site_name: DEFAULT_SITE_NAME.to_string(),
            search_path: DEFAULT_SEARCH_PATH.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            health_timeout_ms: DEFAULT_HEALTH_TIMEOUT_MS,
            connect_timeout_ms: 10_000,
            max_redirects: 10,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl SiteConfig {
    /// Defaults, overridden by `APA_SEARCH_*` environment variables when set.
    ///
    /// - `APA_SEARCH_BASE_URL`
    /// - `APA_SEARCH_TIMEOUT_MS` (clamped to 100..=120_000)
    /// - `APA_SEARCH_MAX_BYTES`
    /// - `APA_SEARCH_USER_AGENT`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(u) = env("APA_SEARCH_BASE_URL") {
            cfg = cfg.with_base_url(u);
        }
        if let Some(ms) = env_u64("APA_SEARCH_TIMEOUT_MS") {
            cfg = cfg.with_timeout_ms(ms);
        }
        if let Some(n) = env_u64("APA_SEARCH_MAX_BYTES") {
            cfg.max_bytes = n.max(1);
        }
        if let Some(ua) = env("APA_SEARCH_USER_AGENT") {
            cfg.user_agent = ua;
        }
        cfg
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms.clamp(100, 120_000);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `{base}{search_path}?query=...` with form-style encoding (spaces as `+`).
    pub fn search_url(&self, query: &str) -> apa_search_core::Result<String> {
        let mut u = url::Url::parse(&self.base_url)
            .and_then(|b| b.join(&self.search_path))
            .map_err(|e| apa_search_core::Error::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        u.query_pairs_mut().append_pair("query", query);
        Ok(u.to_string())
    }
}
