use apa_search_core::SearchResult;

/// Minimum anchor text length (in chars, exclusive) for a harvested link.
pub const MIN_HARVEST_TEXT_CHARS: usize = 10;

/// Resolve `href` to an absolute `http(s)` URL.
///
/// - Absolute URLs are kept as-is.
/// - Relative URLs are joined onto `base` when provided.
/// - Anything that does not end up as `http`/`https` (mailto:, javascript:, ...) is dropped.
pub fn resolve_link(href: &str, base: Option<&url::Url>) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let abs = match url::Url::parse(href) {
        Ok(u) => u,
        Err(_) => base?.join(href).ok()?,
    };
    matches!(abs.scheme(), "http" | "https").then(|| abs.to_string())
}

pub(crate) fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Last-resort extraction: every anchor in document order whose visible text is longer
/// than [`MIN_HARVEST_TEXT_CHARS`] and whose href is not a same-page fragment.
///
/// Returns at most `max_results` entries; descriptions are always empty. No dedup.
pub fn harvest_links(
    doc: &html_scraper::Html,
    base: Option<&url::Url>,
    max_results: usize,
) -> Vec<SearchResult> {
    if max_results == 0 {
        return Vec::new();
    }
    let sel = match html_scraper::Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut out = Vec::new();
    for el in doc.select(&sel) {
        if out.len() >= max_results {
            break;
        }
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        if href.trim_start().starts_with('#') {
            continue;
        }
        let text = norm_ws(&el.text().collect::<Vec<_>>().join(" "));
        if text.chars().count() <= MIN_HARVEST_TEXT_CHARS {
            continue;
        }
        let Some(link) = resolve_link(href, base) else {
            continue;
        };
        out.push(SearchResult {
            title: text,
            link,
            description: String::new(),
        });
    }
    out
}
