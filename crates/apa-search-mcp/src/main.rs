use anyhow::Result;
use apa_search_core::{FetchBackend, SearchQuery};
use apa_search_local::{HttpClient, LocalFetcher, SiteConfig, SitePlanner};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "apa-search")]
#[command(about = "Search and page extraction for the APA site (MCP stdio server)", long_about = None)]
struct Cli {
    /// Site root to search (default: https://www.apa.org).
    #[arg(long, global = true, env = "APA_SEARCH_BASE_URL")]
    base_url: Option<String>,
    /// Per-request timeout in milliseconds (default: 30000).
    #[arg(long, global = true, env = "APA_SEARCH_TIMEOUT_MS")]
    timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as an MCP stdio server.
    #[cfg(feature = "stdio")]
    McpStdio,
    /// Search the site and print formatted results.
    Search(SearchCmd),
    /// Fetch one page and print its flattened body.
    Page(PageCmd),
    /// Search within a topic.
    Topics(TopicsCmd),
    /// Look up assessment instruments for a test type (three template queries).
    TestsInfo(TestsInfoCmd),
    /// Check that the site root is reachable (short timeout).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct SearchCmd {
    query: String,
    #[arg(long, default_value_t = 10)]
    max_results: i64,
}

#[derive(clap::Args, Debug)]
struct PageCmd {
    url: String,
}

#[derive(clap::Args, Debug)]
struct TopicsCmd {
    topic: String,
    /// Extra free text appended to the topic.
    #[arg(long, default_value = "")]
    query: String,
}

#[derive(clap::Args, Debug)]
struct TestsInfoCmd {
    test_type: String,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn site_config(cli: &Cli) -> SiteConfig {
    let mut cfg = SiteConfig::from_env();
    if let Some(u) = &cli.base_url {
        cfg = cfg.with_base_url(u.clone());
    }
    if let Some(ms) = cli.timeout_ms {
        cfg = cfg.with_timeout_ms(ms);
    }
    cfg
}

/// Acquire the shared HTTP client and build a planner around it.
fn planner(cfg: SiteConfig) -> Result<(HttpClient, SitePlanner)> {
    let client = HttpClient::acquire(&cfg)?;
    let fetcher: Arc<dyn FetchBackend> = Arc::new(LocalFetcher::new(&client, &cfg));
    Ok((client, SitePlanner::new(fetcher, cfg)))
}

fn load_env_file() {
    // Opt-in only; never overrides variables already set in the process environment.
    let Ok(p) = std::env::var("APA_SEARCH_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        if !k.is_empty() && std::env::var_os(k).is_none() {
            std::env::set_var(k, v.trim());
        }
    }
}

fn init_tracing() {
    // stdout carries the MCP protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[cfg(feature = "stdio")]
mod mcp {
    use super::*;
    use apa_search_local::format::format_tool_error;
    use rmcp::{
        handler::server::router::tool::ToolRouter as RmcpToolRouter,
        handler::server::wrapper::Parameters,
        model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
        tool, tool_handler, tool_router,
        transport::stdio,
        ErrorData as McpError, ServiceExt,
    };
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::Value;
    use std::future::Future;

    fn text_result(text: String) -> CallToolResult {
        CallToolResult::success(vec![Content::text(text)])
    }

    /// Run one workflow on its own task so a fault in it becomes text, not a dropped call.
    async fn guarded<F>(tool: &'static str, fut: F) -> CallToolResult
    where
        F: Future<Output = String> + Send + 'static,
    {
        match tokio::spawn(fut).await {
            Ok(text) => text_result(text),
            Err(e) => {
                tracing::error!(tool, error = %e, "tool task failed");
                text_result(format_tool_error(tool, &e))
            }
        }
    }

    fn arg_error(tool: &'static str, msg: String) -> CallToolResult {
        text_result(format_tool_error(tool, &msg))
    }

    /// Optional string argument; `null` counts as absent.
    fn string_arg(
        tool: &'static str,
        name: &str,
        v: Option<Value>,
    ) -> Result<Option<String>, CallToolResult> {
        match v {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(arg_error(
                tool,
                format!("argument `{name}` must be a string, got {other}"),
            )),
        }
    }

    fn required(tool: &'static str, name: &str, v: Option<Value>) -> Result<String, CallToolResult> {
        match string_arg(tool, name, v)?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        {
            Some(s) => Ok(s),
            None => Err(arg_error(tool, format!("missing required argument `{name}`"))),
        }
    }

    fn integral(f: Option<f64>) -> Option<i64> {
        f.filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    }

    /// Integer argument. Clients also send `5.0` and `"5"`; both are accepted.
    fn count_arg(tool: &'static str, name: &str, v: Option<Value>) -> Result<Option<i64>, CallToolResult> {
        let v = match v {
            None | Some(Value::Null) => return Ok(None),
            Some(v) => v,
        };
        let parsed = match &v {
            Value::Number(n) => n.as_i64().or_else(|| integral(n.as_f64())),
            Value::String(s) if s.trim().is_empty() => return Ok(None),
            Value::String(s) => {
                let t = s.trim();
                t.parse::<i64>()
                    .ok()
                    .or_else(|| integral(t.parse::<f64>().ok()))
            }
            _ => None,
        };
        parsed.map(Some).ok_or_else(|| {
            arg_error(tool, format!("argument `{name}` must be an integer, got {v}"))
        })
    }

    // Fields stay raw JSON so a mistyped value reaches the handler and becomes text.
    #[derive(Debug, Deserialize, JsonSchema, Default)]
    pub(crate) struct SearchSiteArgs {
        /// Search query, e.g. "personality assessment" (required).
        #[serde(default)]
        #[schemars(with = "Option<String>")]
        pub(crate) query: Option<Value>,
        /// Maximum number of results (default: 10; values <= 0 use the default).
        #[serde(default)]
        #[schemars(with = "Option<i64>")]
        pub(crate) max_results: Option<Value>,
    }

    impl SearchSiteArgs {
        fn parse(self) -> Result<SearchQuery, CallToolResult> {
            let query = required("search_site", "query", self.query)?;
            let max_results = count_arg("search_site", "max_results", self.max_results)?;
            Ok(SearchQuery::from_raw(query, max_results))
        }
    }

    #[derive(Debug, Deserialize, JsonSchema, Default)]
    pub(crate) struct PageContentArgs {
        /// Full URL of a page on the site (required).
        #[serde(default)]
        #[schemars(with = "Option<String>")]
        pub(crate) url: Option<Value>,
    }

    #[derive(Debug, Deserialize, JsonSchema, Default)]
    pub(crate) struct SearchTopicsArgs {
        /// Topic, e.g. "testing and assessment" or "clinical psychology" (required).
        #[serde(default)]
        #[schemars(with = "Option<String>")]
        pub(crate) topic: Option<Value>,
        /// Additional free text searched within the topic.
        #[serde(default)]
        #[schemars(with = "Option<String>")]
        pub(crate) query: Option<Value>,
    }

    impl SearchTopicsArgs {
        fn parse(self) -> Result<(String, String), CallToolResult> {
            let topic = required("search_topics", "topic", self.topic)?;
            let query = string_arg("search_topics", "query", self.query)?.unwrap_or_default();
            Ok((topic, query))
        }
    }

    #[derive(Debug, Deserialize, JsonSchema, Default)]
    pub(crate) struct TestsInfoArgs {
        /// Test type, e.g. "personality", "intelligence", "depression", "anxiety" (required).
        #[serde(default)]
        #[schemars(with = "Option<String>")]
        pub(crate) test_type: Option<Value>,
    }

    #[derive(Clone)]
    pub(crate) struct ApaSearchMcp {
        tool_router: RmcpToolRouter<Self>,
        planner: SitePlanner,
    }

    #[tool_router]
    impl ApaSearchMcp {
        pub(crate) fn new(planner: SitePlanner) -> Self {
            Self {
                tool_router: Self::tool_router(),
                planner,
            }
        }

        #[tool(
            description = "Search the APA site (American Psychological Association) for articles, research, theories and methods. Returns titled results with links and descriptions."
        )]
        async fn search_site(
            &self,
            params: Parameters<Option<SearchSiteArgs>>,
        ) -> Result<CallToolResult, McpError> {
            let q = match params.0.unwrap_or_default().parse() {
                Ok(q) => q,
                Err(r) => return Ok(r),
            };
            let planner = self.planner.clone();
            Ok(guarded("search_site", async move { planner.search_site(&q).await }).await)
        }

        #[tool(
            description = "Get the readable content of one page on the APA site: title, headings and paragraphs."
        )]
        async fn get_page_content(
            &self,
            params: Parameters<Option<PageContentArgs>>,
        ) -> Result<CallToolResult, McpError> {
            let args = params.0.unwrap_or_default();
            let url = match required("get_page_content", "url", args.url) {
                Ok(u) => u,
                Err(r) => return Ok(r),
            };
            let planner = self.planner.clone();
            Ok(guarded("get_page_content", async move {
                planner.get_page_content(&url).await
            })
            .await)
        }

        #[tool(
            description = "Search within an APA topic or category (e.g. clinical psychology, testing and assessment, mental health)."
        )]
        async fn search_topics(
            &self,
            params: Parameters<Option<SearchTopicsArgs>>,
        ) -> Result<CallToolResult, McpError> {
            let (topic, query) = match params.0.unwrap_or_default().parse() {
                Ok(args) => args,
                Err(r) => return Ok(r),
            };
            let planner = self.planner.clone();
            Ok(guarded("search_topics", async move {
                planner.search_topics(&topic, &query).await
            })
            .await)
        }

        #[tool(
            description = "Find information about psychological tests and assessment instruments of a given type (standardized tests, screening tools, diagnostic instruments)."
        )]
        async fn get_tests_info(
            &self,
            params: Parameters<Option<TestsInfoArgs>>,
        ) -> Result<CallToolResult, McpError> {
            let args = params.0.unwrap_or_default();
            let test_type = match required("get_tests_info", "test_type", args.test_type) {
                Ok(t) => t,
                Err(r) => return Ok(r),
            };
            let planner = self.planner.clone();
            Ok(guarded("get_tests_info", async move {
                planner.get_tests_info(&test_type).await
            })
            .await)
        }
    }

    #[tool_handler]
    impl rmcp::ServerHandler for ApaSearchMcp {
        fn get_info(&self) -> ServerInfo {
            ServerInfo {
                instructions: Some(
                    "Search and read pages on the APA site. Every tool returns a single text block."
                        .to_string(),
                ),
                capabilities: ServerCapabilities::builder().enable_tools().build(),
                ..Default::default()
            }
        }
    }

    pub(crate) async fn serve_stdio(cfg: SiteConfig) -> Result<(), McpError> {
        let (client, planner) =
            planner(cfg).map_err(|e| McpError::internal_error(e.to_string(), None))?;
        tracing::info!(base_url = %planner.config().base_url, "apa-search mcp server starting");
        let svc = ApaSearchMcp::new(planner);
        let running = svc
            .serve(stdio())
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        // Keep the stdio server alive until the client closes.
        let waited = running
            .waiting()
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None));
        client.release();
        tracing::info!("apa-search mcp server stopped");
        waited?;
        Ok(())
    }

}

async fn run(cli: Cli) -> Result<()> {
    let cfg = site_config(&cli);
    match cli.command {
        #[cfg(feature = "stdio")]
        Commands::McpStdio => {
            mcp::serve_stdio(cfg)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        Commands::Search(args) => {
            let (_client, p) = planner(cfg)?;
            let q = SearchQuery::from_raw(args.query, Some(args.max_results));
            println!("{}", p.search_site(&q).await);
        }
        Commands::Page(args) => {
            let (_client, p) = planner(cfg)?;
            println!("{}", p.get_page_content(&args.url).await);
        }
        Commands::Topics(args) => {
            let (_client, p) = planner(cfg)?;
            println!("{}", p.search_topics(&args.topic, &args.query).await);
        }
        Commands::TestsInfo(args) => {
            let (_client, p) = planner(cfg)?;
            println!("{}", p.get_tests_info(&args.test_type).await);
        }
        Commands::Doctor(args) => {
            let t0 = std::time::Instant::now();
            let (_client, p) = planner(cfg)?;
            let check = p.health_check().await;
            let elapsed_ms = t0.elapsed().as_millis() as u64;
            let ok = check.is_ok();
            let (status, title, error) = match check {
                Ok((status, title)) => (Some(status), Some(title), None),
                Err(e) => (None, None, Some(e.to_string())),
            };
            if args.output == "text" {
                let cfg = p.config();
                println!("site: {}", cfg.base_url);
                match (status, &title, &error) {
                    (Some(s), Some(t), _) => println!("reachable: yes (status {s}) {t}"),
                    (_, _, Some(e)) => println!("reachable: no ({e})"),
                    _ => println!("reachable: no"),
                }
                println!("elapsed_ms: {elapsed_ms}");
            } else {
                let v = serde_json::json!({
                    "schema_version": 1,
                    "kind": "doctor",
                    "ok": ok,
                    "config": p.config(),
                    "checks": [{
                        "name": "site_reachable",
                        "ok": ok,
                        "status": status,
                        "title": title,
                        "error": error,
                        "elapsed_ms": elapsed_ms,
                    }],
                });
                println!("{}", serde_json::to_string_pretty(&v)?);
            }
        }
        Commands::Version(args) => {
            let name = env!("CARGO_PKG_NAME");
            let version = env!("CARGO_PKG_VERSION");
            if args.output == "text" {
                println!("{name} {version}");
            } else {
                let v = serde_json::json!({
                    "name": name,
                    "version": version,
                    "features": { "stdio": cfg!(feature = "stdio") },
                });
                println!("{}", serde_json::to_string_pretty(&v)?);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    load_env_file();
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
