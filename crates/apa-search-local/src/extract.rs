use crate::links::{harvest_links, norm_ws, resolve_link};
use apa_search_core::{BodySegment, PageContent, SearchResult, UNTITLED};
use html_scraper::{ElementRef, Html};

/// Max chars kept from a result description before the ellipsis.
pub const MAX_DESCRIPTION_CHARS: usize = 300;
/// Max chars kept from a flattened page body before the truncation marker.
pub const MAX_BODY_CHARS: usize = 10_000;
pub const DESCRIPTION_ELLIPSIS: &str = "...";
pub const BODY_TRUNCATION_MARKER: &str = "\n\n...(content truncated, too long)";

/// Elements that never contribute to a page body.
const NON_CONTENT_TAGS: &[&str] = &["script", "style", "nav", "header", "footer", "aside"];
const RESULT_CLASS_TOKENS: &[&str] = &["search-result", "result", "search-item"];
const BODY_BLOCK_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "p", "li"];

/// Named element predicate over tag name and class tokens.
#[derive(Debug, Clone, Copy)]
pub enum NodeMatch {
    Tag(&'static str),
    AnyTag(&'static [&'static str]),
    /// `tag` whose class list contains one of `tokens` exactly.
    ClassToken {
        tag: &'static str,
        tokens: &'static [&'static str],
    },
    /// `tag` (any tag when `None`) with a class token containing one of `needles`,
    /// compared case-insensitively.
    ClassContains {
        tag: Option<&'static str>,
        needles: &'static [&'static str],
    },
}

impl NodeMatch {
    pub fn matches(&self, el: &ElementRef<'_>) -> bool {
        let name = el.value().name();
        match *self {
            NodeMatch::Tag(t) => name == t,
            NodeMatch::AnyTag(ts) => ts.contains(&name),
            NodeMatch::ClassToken { tag, tokens } => {
                name == tag && el.value().classes().any(|c| tokens.contains(&c))
            }
            NodeMatch::ClassContains { tag, needles } => {
                if tag.is_some_and(|t| t != name) {
                    return false;
                }
                el.value().classes().any(|c| {
                    let c = c.to_ascii_lowercase();
                    needles.iter().any(|n| c.contains(n))
                })
            }
        }
    }
}

/// Pre-order walk of the element tree below `root` (exclusive), skipping whole
/// subtrees whose tag is in `prune`.
fn descendants<'a>(root: ElementRef<'a>, prune: &[&str]) -> Vec<ElementRef<'a>> {
    let mut out = Vec::new();
    let mut stack: Vec<ElementRef<'a>> = root.children().filter_map(ElementRef::wrap).collect();
    stack.reverse();
    while let Some(el) = stack.pop() {
        if prune.contains(&el.value().name()) {
            continue;
        }
        out.push(el);
        let mut kids: Vec<ElementRef<'a>> = el.children().filter_map(ElementRef::wrap).collect();
        kids.reverse();
        stack.extend(kids);
    }
    out
}

fn find_all<'a>(root: ElementRef<'a>, m: NodeMatch, prune: &[&str]) -> Vec<ElementRef<'a>> {
    descendants(root, prune)
        .into_iter()
        .filter(|el| m.matches(el))
        .collect()
}

fn find_first<'a>(root: ElementRef<'a>, m: NodeMatch, prune: &[&str]) -> Option<ElementRef<'a>> {
    descendants(root, prune).into_iter().find(|el| m.matches(el))
}

/// Text nodes below `el`, skipping pruned subtrees; each node trimmed, empties dropped.
fn text_nodes(el: ElementRef<'_>, prune: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack: Vec<_> = el.children().collect();
    stack.reverse();
    while let Some(node) = stack.pop() {
        if let Some(t) = node.value().as_text() {
            let t = t.trim();
            if !t.is_empty() {
                out.push(t.to_string());
            }
            continue;
        }
        if let Some(child) = ElementRef::wrap(node) {
            if prune.contains(&child.value().name()) {
                continue;
            }
        }
        let mut kids: Vec<_> = node.children().collect();
        kids.reverse();
        stack.extend(kids);
    }
    out
}

fn element_text(el: ElementRef<'_>, prune: &[&str]) -> String {
    norm_ws(&text_nodes(el, prune).join(" "))
}

fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    let mut it = s.char_indices();
    match it.nth(max_chars) {
        Some((byte_idx, _)) => (s[..byte_idx].to_string(), true),
        None => (s.to_string(), false),
    }
}

pub fn truncate_description(s: &str) -> String {
    let (mut out, clipped) = truncate_chars(s, MAX_DESCRIPTION_CHARS);
    if clipped {
        out.push_str(DESCRIPTION_ELLIPSIS);
    }
    out
}

/// Cap a flattened body at [`MAX_BODY_CHARS`], appending [`BODY_TRUNCATION_MARKER`].
///
/// Idempotent: a body that already carries the marker after an in-bounds prefix is
/// returned unchanged.
pub fn cap_body(s: &str) -> String {
    if s.chars().count() <= MAX_BODY_CHARS {
        return s.to_string();
    }
    if let Some(prefix) = s.strip_suffix(BODY_TRUNCATION_MARKER) {
        if prefix.chars().count() <= MAX_BODY_CHARS {
            return s.to_string();
        }
    }
    let (mut out, _) = truncate_chars(s, MAX_BODY_CHARS);
    out.push_str(BODY_TRUNCATION_MARKER);
    out
}

/// Serialise body segments (headings as `#` lines) joined by blank lines, then cap.
pub fn flatten_body(body: &[BodySegment]) -> String {
    let parts: Vec<String> = body
        .iter()
        .map(|seg| match seg.heading_level {
            Some(level) => format!("{} {}", "#".repeat(usize::from(level)), seg.text),
            None => seg.text.clone(),
        })
        .collect();
    cap_body(&parts.join("\n\n"))
}

/// One step of the result extraction chain.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    run: fn(&Html, Option<&url::Url>, usize) -> Vec<SearchResult>,
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy").field("name", &self.name).finish()
    }
}

/// Ordered fallback chain; the first strategy with a non-empty result wins.
pub const RESULT_CHAIN: [Strategy; 4] = [
    Strategy {
        name: "structured_blocks",
        run: structured_blocks,
    },
    Strategy {
        name: "articles",
        run: articles,
    },
    Strategy {
        name: "result_like",
        run: result_like,
    },
    Strategy {
        name: "link_harvest",
        run: harvest_links,
    },
];

fn structured_blocks(doc: &Html, base: Option<&url::Url>, max: usize) -> Vec<SearchResult> {
    from_containers(
        doc,
        NodeMatch::ClassToken {
            tag: "div",
            tokens: RESULT_CLASS_TOKENS,
        },
        base,
        max,
    )
}

fn articles(doc: &Html, base: Option<&url::Url>, max: usize) -> Vec<SearchResult> {
    from_containers(doc, NodeMatch::Tag("article"), base, max)
}

fn result_like(doc: &Html, base: Option<&url::Url>, max: usize) -> Vec<SearchResult> {
    from_containers(
        doc,
        NodeMatch::ClassContains {
            tag: Some("div"),
            needles: &["result"],
        },
        base,
        max,
    )
}

/// `max` counts kept candidates; discarded containers do not use up the cap.
fn from_containers(
    doc: &Html,
    containers: NodeMatch,
    base: Option<&url::Url>,
    max: usize,
) -> Vec<SearchResult> {
    let mut out = Vec::new();
    for item in find_all(doc.root_element(), containers, &[]) {
        if out.len() >= max {
            break;
        }
        if let Some(r) = candidate_from_container(item, base) {
            out.push(r);
        }
    }
    out
}

/// Title, link and description from one container; `None` unless title and link are both present.
fn candidate_from_container(item: ElementRef<'_>, base: Option<&url::Url>) -> Option<SearchResult> {
    let title_el = find_first(item, NodeMatch::Tag("h2"), &[])
        .or_else(|| find_first(item, NodeMatch::Tag("h3"), &[]))
        .or_else(|| {
            find_first(
                item,
                NodeMatch::ClassContains {
                    tag: Some("a"),
                    needles: &["title"],
                },
                &[],
            )
        })?;
    let title = element_text(title_el, &[]);
    if title.is_empty() {
        return None;
    }

    let href = descendants(item, &[])
        .into_iter()
        .filter(|el| el.value().name() == "a")
        .find_map(|el| el.value().attr("href"))?;
    let link = resolve_link(href, base)?;

    let description = find_first(item, NodeMatch::Tag("p"), &[])
        .or_else(|| {
            find_first(
                item,
                NodeMatch::ClassContains {
                    tag: Some("div"),
                    needles: &["description", "summary"],
                },
                &[],
            )
        })
        .map(|el| truncate_description(&element_text(el, &[])))
        .unwrap_or_default();

    Some(SearchResult {
        title,
        link,
        description,
    })
}

/// Run [`RESULT_CHAIN`] and report which strategy produced the results.
pub fn extract_results_with_strategy(
    html: &str,
    base_url: &str,
    max_results: usize,
) -> (Option<&'static str>, Vec<SearchResult>) {
    if max_results == 0 {
        return (None, Vec::new());
    }
    let base = url::Url::parse(base_url).ok();
    let doc = Html::parse_document(html);
    for strategy in RESULT_CHAIN {
        let results = (strategy.run)(&doc, base.as_ref(), max_results);
        if !results.is_empty() {
            return (Some(strategy.name), results);
        }
    }
    (None, Vec::new())
}

/// Extract titled results from a search page, in document order, at most `max_results`.
pub fn extract_results(html: &str, base_url: &str, max_results: usize) -> Vec<SearchResult> {
    extract_results_with_strategy(html, base_url, max_results).1
}

/// Extract the readable body of a page.
pub fn extract_body(html: &str, source_url: &str) -> PageContent {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let title = find_first(root, NodeMatch::Tag("h1"), NON_CONTENT_TAGS)
        .map(|h| element_text(h, NON_CONTENT_TAGS))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let main = find_first(root, NodeMatch::Tag("main"), NON_CONTENT_TAGS)
        .or_else(|| find_first(root, NodeMatch::Tag("article"), NON_CONTENT_TAGS))
        .or_else(|| {
            find_first(
                root,
                NodeMatch::ClassContains {
                    tag: None,
                    needles: &["content"],
                },
                NON_CONTENT_TAGS,
            )
        });

    let body = match main {
        Some(container) => find_all(container, NodeMatch::AnyTag(BODY_BLOCK_TAGS), NON_CONTENT_TAGS)
            .into_iter()
            .filter_map(|el| {
                let text = element_text(el, NON_CONTENT_TAGS);
                if text.is_empty() {
                    return None;
                }
                let name = el.value().name();
                Some(match name.strip_prefix('h').and_then(|d| d.parse::<u8>().ok()) {
                    Some(level) => BodySegment::heading(level, text),
                    None => BodySegment::text(text),
                })
            })
            .collect(),
        None => {
            let text = text_nodes(root, NON_CONTENT_TAGS).join("\n");
            if text.is_empty() {
                Vec::new()
            } else {
                vec![BodySegment::text(text)]
            }
        }
    };

    PageContent {
        title,
        source_url: source_url.to_string(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BASE: &str = "https://www.apa.org/search?query=anxiety";

    #[test]
    fn two_structured_blocks_yield_two_results_in_order() {
        let html = r#"
        <html><body>
          <div class="search-result">
            <h3>Generalized anxiety</h3>
            <a href="/topics/anxiety/generalized">read</a>
            <p>An overview of generalized anxiety disorder.</p>
          </div>
          <div class="search-result">
            <h2>Panic attacks</h2>
            <a href="https://www.apa.org/topics/anxiety/panic">read</a>
            <p>What a panic attack feels like.</p>
          </div>
        </body></html>
        "#;
        let (strategy, got) = extract_results_with_strategy(html, BASE, 10);
        assert_eq!(strategy, Some("structured_blocks"));
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].title, "Generalized anxiety");
        assert_eq!(got[0].link, "https://www.apa.org/topics/anxiety/generalized");
        assert_eq!(got[0].description, "An overview of generalized anxiety disorder.");
        assert_eq!(got[1].title, "Panic attacks");
        assert_eq!(got[1].link, "https://www.apa.org/topics/anxiety/panic");
        assert!(!got[1].description.is_empty());
    }

    #[test]
    fn falls_back_to_link_harvesting_when_no_blocks_match() {
        let html = r##"
        <html><body>
          <ul>
            <li><a href="/one">The first qualifying link</a></li>
            <li><a href="#skip">A fragment-only link target</a></li>
            <li><a href="/two">The second qualifying link</a></li>
            <li><a href="/three">The third qualifying link</a></li>
          </ul>
        </body></html>
        "##;
        let (strategy, got) = extract_results_with_strategy(html, BASE, 2);
        assert_eq!(strategy, Some("link_harvest"));
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].link, "https://www.apa.org/one");
        assert_eq!(got[1].link, "https://www.apa.org/two");
        assert!(got.iter().all(|r| r.description.is_empty()));
    }

    #[test]
    fn blocks_without_title_or_link_are_discarded() {
        let html = r#"
          <div class="result"><p>no heading, no anchor</p></div>
          <div class="result"><h2>Heading only</h2></div>
          <div class="result"><h2>Complete</h2><a href="/ok">x</a></div>
        "#;
        let got = extract_results(html, BASE, 10);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].title, "Complete");
        assert_eq!(got[0].description, "");
    }

    #[test]
    fn discarded_blocks_do_not_count_toward_the_cap() {
        let html = r#"
          <div class="result"><h2>No link here</h2></div>
          <div class="result"><p>No heading here</p><a href="/n">n</a></div>
          <div class="result"><h2>First kept</h2><a href="/1">x</a></div>
          <div class="result"><h2>Second kept</h2><a href="/2">x</a></div>
        "#;
        let got = extract_results(html, BASE, 1);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].title, "First kept");
    }

    #[test]
    fn article_and_result_like_strategies_run_in_order() {
        let articles = r#"
          <article><h2>Article title</h2><a href="/a">go</a></article>
          <div class="item-results-row"><h2>Row</h2><a href="/r">go</a></div>
        "#;
        let (strategy, got) = extract_results_with_strategy(articles, BASE, 10);
        assert_eq!(strategy, Some("articles"));
        assert_eq!(got.len(), 1);

        let result_like = r#"
          <div class="Item-Results-Row"><h3>Row</h3><a href="/r">go</a>
            <div class="card-summary">Short summary</div></div>
        "#;
        let (strategy, got) = extract_results_with_strategy(result_like, BASE, 10);
        assert_eq!(strategy, Some("result_like"));
        assert_eq!(got[0].description, "Short summary");
    }

    #[test]
    fn title_falls_back_to_anchor_with_title_class() {
        let html = r#"
          <div class="search-item">
            <a class="Result-Title" href="/x">Anchor title text</a>
          </div>
        "#;
        let got = extract_results(html, BASE, 10);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].title, "Anchor title text");
        assert_eq!(got[0].link, "https://www.apa.org/x");
    }

    #[test]
    fn long_descriptions_are_truncated_with_ellipsis() {
        let long = "word ".repeat(200);
        let html = format!(
            r#"<div class="result"><h2>T</h2><a href="/t">t</a><p>{long}</p></div>"#
        );
        let got = extract_results(&html, BASE, 10);
        let d = &got[0].description;
        assert!(d.ends_with(DESCRIPTION_ELLIPSIS));
        assert_eq!(
            d.chars().count(),
            MAX_DESCRIPTION_CHARS + DESCRIPTION_ELLIPSIS.len()
        );
    }

    #[test]
    fn empty_or_garbage_input_degrades_to_empty() {
        assert!(extract_results("", BASE, 10).is_empty());
        assert!(extract_results("<<<>>> not html at all", BASE, 10).is_empty());
        let page = extract_body("", "https://www.apa.org/x");
        assert_eq!(page.title, UNTITLED);
        assert!(page.body.is_empty());
    }

    #[test]
    fn body_prefers_main_and_emits_headings() {
        let html = r#"
        <html><body>
          <header><h1>Site header</h1></header>
          <nav><p>Menu item</p></nav>
          <main>
            <h1>Understanding anxiety</h1>
            <p>Anxiety is an emotion.</p>
            <script>var x = 1;</script>
            <h2>Symptoms</h2>
            <ul><li>Worry</li><li></li><li>Tension</li></ul>
          </main>
          <footer><p>Copyright</p></footer>
        </body></html>
        "#;
        let page = extract_body(html, "https://www.apa.org/topics/anxiety");
        assert_eq!(page.title, "Understanding anxiety");
        assert_eq!(
            page.body,
            vec![
                BodySegment::heading(1, "Understanding anxiety"),
                BodySegment::text("Anxiety is an emotion."),
                BodySegment::heading(2, "Symptoms"),
                BodySegment::text("Worry"),
                BodySegment::text("Tension"),
            ]
        );
        assert_eq!(
            flatten_body(&page.body),
            "# Understanding anxiety\n\nAnxiety is an emotion.\n\n## Symptoms\n\nWorry\n\nTension"
        );
    }

    #[test]
    fn body_uses_content_class_container_when_no_main_or_article() {
        let html = r#"
          <div class="sidebar"><p>ignore me</p></div>
          <div class="page-Content"><h3>Part</h3><p>Body text</p></div>
        "#;
        let page = extract_body(html, "https://www.apa.org/x");
        assert_eq!(page.title, UNTITLED);
        assert_eq!(
            page.body,
            vec![BodySegment::heading(3, "Part"), BodySegment::text("Body text")]
        );
    }

    #[test]
    fn body_falls_back_to_visible_text() {
        let html = r#"
          <html><head><style>p { color: red }</style></head><body>
            <nav>Menu</nav>
            <div>First line</div>
            <span>Second line</span>
            <aside>Related</aside>
          </body></html>
        "#;
        let page = extract_body(html, "https://www.apa.org/x");
        assert_eq!(page.body, vec![BodySegment::text("First line\nSecond line")]);
    }

    #[test]
    fn long_body_is_capped_with_marker() {
        let para = "a".repeat(4_000);
        let html = format!("<main><p>{para}</p><p>{para}</p><p>{para}</p></main>");
        let page = extract_body(&html, "https://www.apa.org/x");
        let flat = flatten_body(&page.body);
        assert!(flat.ends_with(BODY_TRUNCATION_MARKER));
        assert_eq!(
            flat.chars().count(),
            MAX_BODY_CHARS + BODY_TRUNCATION_MARKER.chars().count()
        );
    }

    proptest! {
        #[test]
        fn cap_body_is_bounded_and_idempotent(s in ".{0,12000}") {
            let once = cap_body(&s);
            prop_assert!(once.chars().count() <= MAX_BODY_CHARS + BODY_TRUNCATION_MARKER.chars().count());
            prop_assert_eq!(cap_body(&once), once.clone());
        }

        #[test]
        fn truncated_descriptions_are_bounded(s in ".{0,800}") {
            let d = truncate_description(&s);
            prop_assert!(d.chars().count() <= MAX_DESCRIPTION_CHARS + DESCRIPTION_ELLIPSIS.len());
        }

        #[test]
        fn results_respect_cap_and_are_well_formed(
            n_blocks in 0usize..12,
            n_links in 0usize..12,
            max in 1usize..8,
        ) {
            let mut html = String::from("<html><body>");
            for i in 0..n_blocks {
                html.push_str(&format!(
                    r#"<div class="result"><h2>Block {i}</h2><a href="/b/{i}">x</a><p>d</p></div>"#
                ));
            }
            for i in 0..n_links {
                html.push_str(&format!(r#"<a href="rel/{i}">harvested link number {i}</a>"#));
            }
            html.push_str("</body></html>");

            let got = extract_results(&html, BASE, max);
            prop_assert!(got.len() <= max);
            for r in &got {
                prop_assert!(!r.title.is_empty());
                prop_assert!(r.link.starts_with("http"));
            }
        }
    }
}
