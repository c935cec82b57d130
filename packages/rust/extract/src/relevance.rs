//! Query-focused text extraction from retrieved pages.
//!
//! Turns a page's markup into a short, on-topic text blob:
//! 1. isolate the main content (semantic containers first, chrome-stripped body last)
//! 2. keep sentences that mention enough of the query terms
//! 3. if that yields too little text, fall back to the best-scoring paragraphs
//!
//! Everything here is pure: no I/O, same input → same output.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

/// Containers tried, in order, to locate the main content.
const MAIN_SELECTORS: &[&str] = &[
    "article",
    "main",
    r#"[role="main"]"#,
    ".content",
    ".post-content",
    ".entry-content",
    ".article-body",
    ".story-body",
    "#content",
    ".main-content",
];

/// Page chrome dropped from whatever container was chosen.
const CHROME_SELECTOR: &str = "nav, header, footer, aside, .navigation, .menu, .sidebar, \
     .advertisement, .ads, .social-share, script, style, noscript";

static MAIN_SELS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    MAIN_SELECTORS
        .iter()
        .map(|s| Selector::parse(s).expect("valid selector"))
        .collect()
});

static CHROME_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(CHROME_SELECTOR).expect("valid selector"));

static BODY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid selector"));

static SENTENCE_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").expect("valid regex"));

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Thresholds for the extraction passes.
#[derive(Debug, Clone)]
pub struct RelevanceOptions {
    /// Isolated content shorter than this is treated as unusable.
    pub min_content_chars: usize,
    /// Sentences shorter than this are ignored.
    pub min_sentence_chars: usize,
    /// Fraction of distinct query terms a sentence must mention.
    pub min_relevance: f64,
    /// Sentence output shorter than this triggers the paragraph fallback.
    pub min_filtered_chars: usize,
    /// Paragraphs must be strictly longer than this to be scored.
    pub min_paragraph_chars: usize,
    /// Upper bound on paragraphs kept by the fallback.
    pub max_paragraphs: usize,
}

impl Default for RelevanceOptions {
    fn default() -> Self {
        Self {
            min_content_chars: 100,
            min_sentence_chars: 20,
            min_relevance: 0.3,
            min_filtered_chars: 200,
            min_paragraph_chars: 50,
            max_paragraphs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Extract the query-relevant text of a page with default thresholds.
///
/// Returns an empty string when the page has no usable content.
pub fn extract_relevant(html: &str, query_terms: &[&str]) -> String {
    extract_relevant_with(html, query_terms, &RelevanceOptions::default())
}

/// Extract the query-relevant text of a page.
#[instrument(skip_all, fields(html_len = html.len(), terms = query_terms.len()))]
pub fn extract_relevant_with(html: &str, query_terms: &[&str], opts: &RelevanceOptions) -> String {
    let content = extract_main_content(html);
    let content_len = content.chars().count();

    if content_len < opts.min_content_chars {
        debug!(content_len, "content too short, skipping");
        return String::new();
    }

    let filtered = filter_relevant_sentences(&content, query_terms, opts);
    if filtered.chars().count() >= opts.min_filtered_chars {
        return filtered;
    }

    debug!(
        filtered_len = filtered.chars().count(),
        "sentence filter too sparse, ranking paragraphs"
    );
    extract_key_paragraphs(&content, query_terms, opts)
}

// ---------------------------------------------------------------------------
// Pass 1: main-content isolation
// ---------------------------------------------------------------------------

/// Locate the main content and flatten its text.
///
/// The first matching container wins; otherwise the body is used. Chrome
/// elements inside the chosen container are skipped. Text nodes are trimmed
/// and joined with single spaces.
pub fn extract_main_content(html: &str) -> String {
    let doc = Html::parse_document(html);

    let root = MAIN_SELS
        .iter()
        .find_map(|sel| doc.select(sel).next())
        .or_else(|| doc.select(&BODY_SEL).next())
        .unwrap_or_else(|| doc.root_element());

    flatten_text(root)
}

/// Join the trimmed text nodes under `root`, skipping chrome subtrees.
fn flatten_text(root: ElementRef<'_>) -> String {
    let chrome: HashSet<_> = root
        .select(&CHROME_SEL)
        .map(|el| el.id())
        .filter(|id| *id != root.id())
        .collect();

    let mut parts: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        if node.ancestors().any(|a| chrome.contains(&a.id())) {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed);
        }
    }

    parts.join(" ")
}

// ---------------------------------------------------------------------------
// Pass 2: sentence filter
// ---------------------------------------------------------------------------

/// Keep sentences mentioning at least `min_relevance` of the distinct query terms.
///
/// Matching is a case-insensitive substring test. Surviving sentences are
/// joined with `". "`.
pub fn filter_relevant_sentences(
    content: &str,
    query_terms: &[&str],
    opts: &RelevanceOptions,
) -> String {
    let terms = normalize_terms(query_terms);
    if terms.is_empty() {
        return String::new();
    }

    let kept: Vec<&str> = SENTENCE_SPLIT_RE
        .split(content)
        .map(str::trim)
        .filter(|s| s.chars().count() >= opts.min_sentence_chars)
        .filter(|s| relevance_ratio(s, &terms) >= opts.min_relevance)
        .collect();

    kept.join(". ")
}

/// Fraction of `terms` (already lower-cased and distinct) found in `segment`.
pub fn relevance_ratio(segment: &str, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let lower = segment.to_lowercase();
    let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
    matched as f64 / terms.len() as f64
}

// ---------------------------------------------------------------------------
// Pass 3: paragraph fallback
// ---------------------------------------------------------------------------

/// Rank paragraphs by term density and keep the best few.
///
/// Score = total term occurrences + `min(len / 100, 5) * 0.1`. Zero scores
/// are dropped; ties keep document order. Paragraphs are joined with a blank
/// line.
pub fn extract_key_paragraphs(
    content: &str,
    query_terms: &[&str],
    opts: &RelevanceOptions,
) -> String {
    let terms = normalize_terms(query_terms);

    let mut scored: Vec<(f64, &str)> = content
        .split('\n')
        .map(str::trim)
        .filter(|p| p.chars().count() > opts.min_paragraph_chars)
        .map(|p| (paragraph_score(p, &terms), p))
        .filter(|(score, _)| *score > 0.0)
        .collect();

    // `sort_by` is stable, so equal scores keep their original order.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    scored
        .into_iter()
        .take(opts.max_paragraphs)
        .map(|(_, p)| p)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn paragraph_score(paragraph: &str, terms: &[String]) -> f64 {
    let lower = paragraph.to_lowercase();
    let occurrences: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
    let length_bonus = (paragraph.chars().count() as f64 / 100.0).min(5.0) * 0.1;
    occurrences as f64 + length_bonus
}

/// Lower-case, drop blanks and duplicates, keep first-seen order.
fn normalize_terms(query_terms: &[&str]) -> Vec<String> {
    let mut seen = HashSet::new();
    query_terms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TERMS: &[&str] = &["eiffel", "tower", "paris"];

    fn opts() -> RelevanceOptions {
        RelevanceOptions::default()
    }

    #[test]
    fn short_article_is_unusable() {
        assert_eq!(extract_main_content("<article>Short.</article>"), "Short.");
        assert_eq!(extract_relevant("<article>Short.</article>", TERMS), "");
        assert_eq!(extract_relevant("<article>Short.</article>", &[]), "");
    }

    #[test]
    fn main_selector_priority() {
        let html = r#"<html><body>
            <div class="content">Div content</div>
            <main>Main content</main>
            <article>Article content</article>
        </body></html>"#;
        assert_eq!(extract_main_content(html), "Article content");

        let html = r#"<html><body>
            <div id="content">Id content</div>
            <div class="post-content">Post content</div>
        </body></html>"#;
        assert_eq!(extract_main_content(html), "Post content");
    }

    #[test]
    fn body_fallback_strips_chrome() {
        let html = r#"<html><head><title>T</title><style>p { color: red }</style></head><body>
            <nav>Home | About</nav>
            <header>Site header</header>
            <div class="sidebar">Related links</div>
            <p>The visible   paragraph.</p>
            <div class="ads">Buy now</div>
            <script>var analytics = 1;</script>
            <noscript>Enable JS</noscript>
            <footer>Copyright</footer>
        </body></html>"#;
        let text = extract_main_content(html);
        assert_eq!(text, "The visible   paragraph.");
    }

    #[test]
    fn chrome_inside_main_container_is_dropped() {
        let html = r#"<article>
            <header>By the editors</header>
            <p>First <b>bold</b> point.</p>
            <aside>Pull quote</aside>
            <p>Second point.</p>
        </article>"#;
        assert_eq!(
            extract_main_content(html),
            "First bold point. Second point."
        );
    }

    #[test]
    fn plain_text_passes_through() {
        let text = "Line one about things\nLine two about more";
        assert_eq!(extract_main_content(text), text);
    }

    #[test]
    fn sentence_filter_threshold() {
        let content = "The Eiffel Tower dominates the skyline. \
                       Bread prices rose sharply this spring! \
                       Visitors to Paris queue for hours? \
                       Tiny one.";
        let out = filter_relevant_sentences(content, TERMS, &opts());
        assert_eq!(
            out,
            "The Eiffel Tower dominates the skyline. Visitors to Paris queue for hours"
        );
    }

    #[test]
    fn sentence_filter_ignores_short_segments() {
        // "Paris tower" is relevant but below 20 chars.
        let out = filter_relevant_sentences("Paris tower. Eiffel", TERMS, &opts());
        assert_eq!(out, "");
    }

    #[test]
    fn sentence_filter_counts_distinct_terms() {
        // With duplicates collapsed the ratio is 1/3, not 2/4.
        let terms = ["Paris", "paris", "louvre", "museum"];
        let ratio = relevance_ratio("Walking around Paris at night", &normalize_terms(&terms));
        assert!((ratio - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn sentence_filter_empty_terms() {
        assert_eq!(
            filter_relevant_sentences("A perfectly long sentence here.", &[], &opts()),
            ""
        );
    }

    #[test]
    fn paragraph_ranking_orders_and_caps() {
        let paras = [
            "paris paragraph 1 with enough words to pass the fifty char floor",
            "nothing relevant in this paragraph but it is long enough to count",
            "paris paris paragraph two mentioning the city twice over and over",
            "short paris",
            "paris paragraph 3 with enough words to pass the fifty char floor",
            "paris paragraph 4 with enough words to pass the fifty char floor",
            "paris paragraph 5 with enough words to pass the fifty char floor",
            "paris paragraph 6 with enough words to pass the fifty char floor",
        ];
        let content = paras.join("\n");
        let out = extract_key_paragraphs(&content, &["paris"], &opts());
        let kept: Vec<&str> = out.split("\n\n").collect();

        assert_eq!(kept.len(), 5);
        assert_eq!(kept[0], paras[2]);
        // Remaining ties stay in document order.
        assert_eq!(kept[1], paras[0]);
        assert_eq!(kept[2], paras[4]);
        assert_eq!(kept[4], paras[6]);
        assert!(!kept.contains(&paras[1]));
        assert!(!kept.contains(&"short paris"));
        assert!(kept.iter().all(|p| p.chars().count() > 50));
    }

    #[test]
    fn paragraph_length_bonus_keeps_termless_paragraphs() {
        // No term matches, but the length bonus keeps the score above zero.
        let para = "a paragraph without any of the terms but comfortably long enough";
        let out = extract_key_paragraphs(para, &["zzz"], &opts());
        assert_eq!(out, para);
    }

    #[test]
    fn sparse_sentences_fall_back_to_paragraphs() {
        let html = "<article>The tower in Paris is tall. It was built long ago by engineers who \
                    cared a great deal about iron and wind loads across the whole structure.</article>";
        let out = extract_relevant(html, &["paris", "tower", "iron"]);
        // Flattened content is one paragraph, so the fallback returns it whole.
        assert_eq!(out, extract_main_content(html));
    }

    #[test]
    fn dense_sentences_are_kept() {
        let sentence = "The Eiffel Tower in Paris welcomes millions of visitors";
        let body = std::iter::repeat_n(sentence, 6).collect::<Vec<_>>().join(". ");
        let html = format!("<main>{body}.</main>");
        let out = extract_relevant(&html, TERMS);
        assert_eq!(out, body);
        assert!(out.chars().count() >= 200);
    }

    #[test]
    fn extraction_is_deterministic() {
        let html = "<article><p>Paris travel notes with the Eiffel Tower at sunset.</p>\
                    <p>More notes about cafes, croissants and a long walk by the river.</p></article>";
        let a = extract_relevant(html, TERMS);
        let b = extract_relevant(html, TERMS);
        assert_eq!(a, b);
    }
}
