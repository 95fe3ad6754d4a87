use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cap on results for a direct site search.
pub const DEFAULT_MAX_RESULTS: usize = 10;
/// Upper bound applied to caller-supplied result caps.
pub const MAX_RESULTS_LIMIT: usize = 50;
/// Placeholder used when a page has no level-1 heading.
pub const UNTITLED: &str = "Untitled";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out after {ms} ms")]
    Timeout { ms: u64 },
    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("HTTP client is not initialized")]
    ClientUninitialized,
}

impl Error {
    /// True for failures that happened on the wire (DNS, connect, read, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    /// Timeout for the operation. `None` uses the client default.
    pub timeout_ms: Option<u64>,
    /// Hard cap on bytes read from the response body.
    pub max_bytes: Option<u64>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_ms: None,
            max_bytes: None,
        }
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn with_max_bytes(mut self, n: u64) -> Self {
        self.max_bytes = Some(n);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub url: String,
    /// URL after redirects; base for resolving relative links.
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

impl FetchResponse {
    /// Charset parameter of the `Content-Type` header, if any.
    pub fn charset(&self) -> Option<&str> {
        self.content_type.as_deref()?.split(';').skip(1).find_map(|param| {
            let (k, v) = param.split_once('=')?;
            k.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| v.trim().trim_matches('"'))
        })
    }

    /// Body decoded with the declared charset, UTF-8 when absent or unknown.
    /// A byte-order mark wins over the header; invalid sequences become U+FFFD.
    pub fn text(&self) -> String {
        let enc = self
            .charset()
            .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
            .unwrap_or(encoding_rs::UTF_8);
        let (text, _, _) = enc.decode(&self.bytes);
        text.into_owned()
    }
}

/// A GET-only HTTP backend. Implementations must be shareable across concurrent calls.
#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, max_results: usize) -> Self {
        Self {
            query: query.into(),
            max_results: max_results.clamp(1, MAX_RESULTS_LIMIT),
        }
    }

    /// Build from a caller-supplied cap; zero, negative or missing values fall back
    /// to [`DEFAULT_MAX_RESULTS`].
    pub fn from_raw(query: impl Into<String>, max_results: Option<i64>) -> Self {
        let n = match max_results {
            Some(n) if n >= 1 => usize::try_from(n).unwrap_or(MAX_RESULTS_LIMIT),
            _ => DEFAULT_MAX_RESULTS,
        };
        Self::new(query, n)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    /// May be empty (always empty for harvested links).
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BodySegment {
    pub text: String,
    /// Heading level 1..=4, or `None` for paragraph/list text.
    pub heading_level: Option<u8>,
}

impl BodySegment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            heading_level: None,
        }
    }

    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            heading_level: Some(level.clamp(1, 4)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageContent {
    pub title: String,
    pub source_url: String,
    pub body: Vec<BodySegment>,
}
