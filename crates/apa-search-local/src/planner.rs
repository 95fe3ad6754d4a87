use crate::config::SiteConfig;
use crate::extract::{extract_body, extract_results_with_strategy};
use crate::format;
use apa_search_core::{
    Error, FetchBackend, FetchRequest, PageContent, Result, SearchQuery, SearchResult,
};
use std::sync::Arc;

/// Result cap for topic searches.
pub const TOPIC_MAX_RESULTS: usize = 15;
/// Result cap for each category probe sub-query.
pub const PROBE_MAX_RESULTS: usize = 5;

/// Query templates for a category probe, in output order.
pub fn probe_queries(test_type: &str) -> [String; 3] {
    [
        format!("{test_type} psychological test assessment"),
        format!("{test_type} screening tool measure"),
        format!("{test_type} diagnostic instrument"),
    ]
}

/// Outcome of a single site search.
#[derive(Debug)]
pub enum SearchOutcome {
    Found {
        strategy: &'static str,
        results: Vec<SearchResult>,
    },
    Empty,
}

/// Wire failures (connect, read, timeout) log at warn; upstream and caller faults at info.
fn log_failure(op: &'static str, subject: &str, e: &Error) {
    if e.is_transport() {
        tracing::warn!(op, subject, error = %e, "upstream unreachable");
    } else {
        tracing::info!(op, subject, error = %e, "request failed");
    }
}

/// Composes fetch + extract + format for each caller intent.
///
/// Holds no per-call state; clones share the same fetcher.
#[derive(Clone)]
pub struct SitePlanner {
    fetcher: Option<Arc<dyn FetchBackend>>,
    cfg: SiteConfig,
}

impl SitePlanner {
    pub fn new(fetcher: Arc<dyn FetchBackend>, cfg: SiteConfig) -> Self {
        Self {
            fetcher: Some(fetcher),
            cfg,
        }
    }

    /// A planner with no HTTP client; every call reports [`Error::ClientUninitialized`].
    pub fn unbound(cfg: SiteConfig) -> Self {
        Self { fetcher: None, cfg }
    }

    pub fn config(&self) -> &SiteConfig {
        &self.cfg
    }

    fn fetcher(&self) -> Result<&Arc<dyn FetchBackend>> {
        self.fetcher.as_ref().ok_or(Error::ClientUninitialized)
    }

    async fn fetch_html(&self, url: &str) -> Result<(String, String)> {
        let req = FetchRequest::new(url)
            .with_timeout_ms(self.cfg.timeout_ms)
            .with_max_bytes(self.cfg.max_bytes);
        let resp = self.fetcher()?.fetch(&req).await?;
        Ok((resp.text(), resp.final_url))
    }

    /// Fetch the search page for `q` and run the extraction chain on it.
    pub async fn search(&self, q: &SearchQuery) -> Result<SearchOutcome> {
        let url = self.cfg.search_url(&q.query)?;
        let (html, final_url) = self.fetch_html(&url).await?;
        let (strategy, results) = extract_results_with_strategy(&html, &final_url, q.max_results);
        tracing::debug!(query = %q.query, ?strategy, results = results.len(), "search extracted");
        Ok(match strategy {
            Some(strategy) => SearchOutcome::Found { strategy, results },
            None => SearchOutcome::Empty,
        })
    }

    /// Fetch a page and extract its body. Relative URLs resolve against the site root.
    pub async fn page(&self, url: &str) -> Result<PageContent> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidParams("url must be non-empty".to_string()));
        }
        let abs = match url::Url::parse(url) {
            Ok(u) => u,
            Err(_) => url::Url::parse(&self.cfg.base_url)
                .and_then(|b| b.join(url))
                .map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?,
        };
        let (html, final_url) = self.fetch_html(abs.as_str()).await?;
        Ok(extract_body(&html, &final_url))
    }

    /// Search text for one query, or the error text when the search fails.
    async fn search_text(&self, q: &SearchQuery) -> std::result::Result<Option<String>, (Error, String)> {
        let site = &self.cfg.site_name;
        match self.search(q).await {
            Ok(SearchOutcome::Found { results, .. }) => {
                Ok(Some(format::format_results(site, &q.query, &results)))
            }
            Ok(SearchOutcome::Empty) => Ok(None),
            Err(e) => {
                let url = self.cfg.search_url(&q.query).unwrap_or_default();
                let text = format::format_search_error(&e, &url);
                Err((e, text))
            }
        }
    }

    /// Direct search: one fetch, formatted results or a "nothing found" hint.
    pub async fn search_site(&self, q: &SearchQuery) -> String {
        match self.search_text(q).await {
            Ok(Some(text)) => text,
            Ok(None) => format::format_no_results(&self.cfg.site_name, &q.query),
            Err((e, text)) => {
                log_failure("search", &q.query, &e);
                text
            }
        }
    }

    pub async fn get_page_content(&self, url: &str) -> String {
        match self.page(url).await {
            Ok(content) => format::format_page(&content),
            Err(e) => {
                log_failure("page fetch", url, &e);
                format::format_page_error(&e)
            }
        }
    }

    /// Topic search: `"{topic} {query}"` as a direct search, prefixed with a topic header.
    pub async fn search_topics(&self, topic: &str, query: &str) -> String {
        let topic = topic.trim();
        let combined = format!("{topic} {query}").trim().to_string();
        let q = SearchQuery::new(combined, TOPIC_MAX_RESULTS);
        let body = match self.search_text(&q).await {
            Ok(Some(text)) => text,
            Ok(None) => format::format_no_results(&self.cfg.site_name, &q.query),
            Err((e, text)) => {
                log_failure("topic search", topic, &e);
                text
            }
        };
        format!("{}{body}", format::format_topic_header(topic))
    }

    /// Category probe: three template queries run concurrently, merged in template order.
    pub async fn get_tests_info(&self, test_type: &str) -> String {
        let test_type = test_type.trim();
        let queries = probe_queries(test_type).map(|q| SearchQuery::new(q, PROBE_MAX_RESULTS));
        let outcomes =
            futures_util::future::join_all(queries.iter().map(|q| self.search_text(q))).await;

        let mut sections = Vec::new();
        let mut errors = Vec::new();
        for (q, outcome) in queries.iter().zip(outcomes) {
            match outcome {
                Ok(Some(text)) => sections.push(text),
                Ok(None) => tracing::debug!(query = %q.query, "probe query found nothing"),
                Err((e, _)) => {
                    log_failure("probe query", &q.query, &e);
                    errors.push(e);
                }
            }
        }

        if sections.is_empty() {
            return format::format_tests_not_found(test_type, errors.len(), errors.first());
        }
        format::format_tests_report(test_type, &sections)
    }

    /// Reachability check against the site root with the (shorter) health timeout.
    pub async fn health_check(&self) -> Result<(u16, String)> {
        let req = FetchRequest::new(format!("{}/", self.cfg.base_url))
            .with_timeout_ms(self.cfg.health_timeout_ms)
            .with_max_bytes(self.cfg.max_bytes);
        let resp = self.fetcher()?.fetch(&req).await?;
        let doc = html_scraper::Html::parse_document(&resp.text());
        let title = html_scraper::Selector::parse("title")
            .ok()
            .and_then(|sel| doc.select(&sel).next().map(|t| t.text().collect::<String>()))
            .map(|t| crate::links::norm_ws(&t))
            .unwrap_or_default();
        Ok((resp.status, title))
    }
}
