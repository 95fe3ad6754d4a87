//! Plain-text (Markdown-flavoured) rendering of results and pages.
//!
//! Every function here is pure and deterministic.

use crate::extract::flatten_body;
use apa_search_core::{Error, PageContent, SearchResult};

pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

pub fn format_results(site: &str, query: &str, results: &[SearchResult]) -> String {
    let mut out = format!("# {site} search results for: '{query}'\n\n");
    out.push_str(&format!("Results found: {}\n\n", results.len()));
    for (i, r) in results.iter().enumerate() {
        out.push_str(&format!("## {}. {}\n", i + 1, r.title));
        out.push_str(&format!("**Link:** {}\n", r.link));
        if !r.description.is_empty() {
            out.push_str(&format!("**Description:** {}\n", r.description));
        }
        out.push_str("\n---\n\n");
    }
    out
}

pub fn format_no_results(site: &str, query: &str) -> String {
    format!("Nothing found on {site} for '{query}'. Try different keywords.")
}

pub fn format_page(content: &PageContent) -> String {
    format!(
        "# {}\n\n**URL:** {}\n\n---\n\n{}",
        content.title,
        content.source_url,
        flatten_body(&content.body)
    )
}

pub fn format_topic_header(topic: &str) -> String {
    format!("# Search in category: {topic}\n\n")
}

pub fn format_tests_report(test_type: &str, sections: &[String]) -> String {
    format!(
        "# Psychological tests information: {test_type}\n\n{}",
        sections.join(SECTION_SEPARATOR)
    )
}

pub fn format_tests_not_found(test_type: &str, failed: usize, first_error: Option<&Error>) -> String {
    let mut out = format!(
        "No information found about '{test_type}' tests. Try another test type."
    );
    if let Some(e) = first_error {
        out.push_str(&format!("\n({failed} of 3 lookups failed; first error: {e})"));
    }
    out
}

pub fn format_search_error(err: &Error, search_url: &str) -> String {
    format!("Search failed: {err}\nURL: {search_url}")
}

pub fn format_page_error(err: &Error) -> String {
    format!("Failed to fetch page: {err}")
}

/// Router-level fallback text; names the operation that failed.
pub fn format_tool_error(tool: &str, err: &dyn std::fmt::Display) -> String {
    format!("Error while running {tool}: {err}")
}
