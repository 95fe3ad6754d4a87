use apa_search_core::{Error, FetchBackend, FetchRequest, FetchResponse, Result};
use std::time::Instant;

pub mod config;
pub mod extract;
pub mod format;
pub mod links;
pub mod planner;

pub use config::SiteConfig;
pub use planner::SitePlanner;

/// Shared HTTP resource. Acquire once at service start, pass into [`LocalFetcher::new`],
/// and drop (or [`HttpClient::release`]) at shutdown.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn acquire(cfg: &SiteConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(cfg.max_redirects))
            .connect_timeout(cfg.connect_timeout())
            .timeout(cfg.timeout())
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Release the connection pool. Clones held elsewhere stay usable until they drop.
    pub fn release(self) {
        tracing::debug!("http client released");
    }
}

#[derive(Debug, Clone)]
pub struct LocalFetcher {
    client: reqwest::Client,
    default_timeout_ms: u64,
    default_max_bytes: u64,
}

impl LocalFetcher {
    pub fn new(client: &HttpClient, cfg: &SiteConfig) -> Self {
        Self {
            client: client.inner.clone(),
            default_timeout_ms: cfg.timeout_ms,
            default_max_bytes: cfg.max_bytes,
        }
    }

    fn map_send_error(e: reqwest::Error, timeout_ms: u64) -> Error {
        if e.is_timeout() {
            Error::Timeout { ms: timeout_ms }
        } else {
            Error::Transport(e.to_string())
        }
    }
}

#[async_trait::async_trait]
impl FetchBackend for LocalFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse> {
        let t0 = Instant::now();
        let url = url::Url::parse(&req.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }
        let timeout_ms = req.timeout_ms.unwrap_or(self.default_timeout_ms);

        let rb = self
            .client
            .get(url)
            .timeout(std::time::Duration::from_millis(timeout_ms));
        let resp = rb
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, timeout_ms))?;
        let final_url = resp.url().to_string();
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(url = %req.url, status = status.as_u16(), "non-success status");
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let max_bytes = usize::try_from(req.max_bytes.unwrap_or(self.default_max_bytes))
            .unwrap_or(usize::MAX);
        let mut truncated = false;
        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Self::map_send_error(e, timeout_ms))?;
            if bytes.len().saturating_add(chunk.len()) > max_bytes {
                let can_take = max_bytes.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..can_take]);
                truncated = true;
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        tracing::debug!(
            url = %req.url,
            final_url = %final_url,
            status = status.as_u16(),
            bytes = bytes.len(),
            truncated,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "fetched"
        );
        Ok(FetchResponse {
            url: req.url.clone(),
            final_url,
            status: status.as_u16(),
            content_type,
            bytes,
            truncated,
        })
    }
}
