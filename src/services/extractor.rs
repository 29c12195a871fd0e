// src/services/extractor.rs

//! Readable-content extraction from fetched pages.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::ExtractionConfig;
use crate::utils::url::resolve_link;

/// Elements whose text is never visible.
const HIDDEN_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "iframe", "head",
];

/// Elements that start a new line of text.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol",
    "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Text and title pulled out of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub title: String,
    pub text: String,
}

/// Selects the main content region of a page and flattens it to text.
pub struct ContentExtractor {
    candidates: Vec<Selector>,
    title: Selector,
    heading: Selector,
    anchors: Selector,
    default_title: String,
}

impl ContentExtractor {
    /// Create an extractor from the configured candidate regions.
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let candidates = config
            .content_selectors
            .iter()
            .map(|s| Self::parse_selector(s))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            candidates,
            title: Self::parse_selector("title")?,
            heading: Self::parse_selector("h1")?,
            anchors: Self::parse_selector("a[href]")?,
            default_title: config.default_title.clone(),
        })
    }

    /// Extract text from raw markup.
    pub fn extract_html(&self, html: &str) -> Option<ExtractedContent> {
        self.extract(&Html::parse_document(html))
    }

    /// Extract the first candidate region that yields any text.
    ///
    /// Returns `None` when no candidate yields text; the caller treats
    /// that as an empty page, not an error.
    pub fn extract(&self, document: &Html) -> Option<ExtractedContent> {
        let text = self.candidates.iter().find_map(|selector| {
            let region = document.select(selector).next()?;
            let text = visible_text(region);
            (!text.is_empty()).then_some(text)
        })?;

        Some(ExtractedContent {
            title: self.title(document),
            text,
        })
    }

    /// Document title from `<title>`, then the first `<h1>`.
    pub fn title(&self, document: &Html) -> String {
        [&self.title, &self.heading]
            .into_iter()
            .filter_map(|selector| document.select(selector).next())
            .map(|element| collapse_whitespace(&element.text().collect::<String>()))
            .find(|title| !title.is_empty())
            .unwrap_or_else(|| self.default_title.clone())
    }

    /// Absolute URLs of every anchor in the document, in document order.
    pub fn links(&self, document: &Html, base: &Url) -> Vec<Url> {
        document
            .select(&self.anchors)
            .filter_map(|anchor| anchor.value().attr("href"))
            .filter_map(|href| resolve_link(base, href))
            .collect()
    }

    fn parse_selector(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }
}

/// Visible text of an element, one block per line.
fn visible_text(region: ElementRef<'_>) -> String {
    let mut raw = String::new();
    push_text(region, &mut raw);

    raw.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_element) = ElementRef::wrap(child) {
            let name = child_element.value().name();
            if HIDDEN_ELEMENTS.contains(&name) {
                continue;
            }
            let block = BLOCK_ELEMENTS.contains(&name);
            if block {
                out.push('\n');
            }
            push_text(child_element, out);
            if block {
                out.push('\n');
            }
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ContentExtractor {
        ContentExtractor::new(&ExtractionConfig::default()).unwrap()
    }

    #[test]
    fn test_prefers_content_preview_region() {
        let html = r#"
            <html><head><title> Notes </title></head>
            <body>
              <nav>Menu</nav>
              <main>Main text</main>
              <div class="content-preview"><p>Preview <b>text</b></p><p>Second</p></div>
            </body></html>"#;
        let content = extractor().extract_html(html).unwrap();
        assert_eq!(content.title, "Notes");
        assert_eq!(content.text, "Preview text\nSecond");
    }

    #[test]
    fn test_falls_back_to_main_then_body() {
        let content = extractor()
            .extract_html("<body><nav>Menu</nav><main><h1>Head</h1>Body</main></body>")
            .unwrap();
        assert_eq!(content.text, "Head\nBody");
        assert_eq!(content.title, "Head");

        let content = extractor()
            .extract_html("<html><body><p>Hello</p></body></html>")
            .unwrap();
        assert_eq!(content.text, "Hello");
        assert_eq!(content.title, "Untitled");
    }

    #[test]
    fn test_skips_hidden_elements() {
        let html = "<body><script>var x = 1;</script><style>p{}</style><p>Shown</p></body>";
        assert_eq!(extractor().extract_html(html).unwrap().text, "Shown");
    }

    #[test]
    fn test_empty_page_yields_none() {
        assert!(extractor().extract_html("<html><body>  </body></html>").is_none());
        assert!(extractor().extract_html("").is_none());
    }

    #[test]
    fn test_links_resolved_in_order() {
        let html = r##"<body>
            <a href="/vault-a/one">1</a>
            <a href="two#frag">2</a>
            <a href="mailto:x@y.z">mail</a>
            <a href="#top">top</a>
            <a href="https://other.example/x">x</a>
        </body>"##;
        let document = Html::parse_document(html);
        let base = Url::parse("https://site.example/vault-a/").unwrap();
        let links: Vec<String> = extractor()
            .links(&document, &base)
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            links,
            vec![
                "https://site.example/vault-a/one",
                "https://site.example/vault-a/two",
                "https://other.example/x",
            ]
        );
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let config = ExtractionConfig {
            content_selectors: vec!["[[invalid".into()],
            ..ExtractionConfig::default()
        };
        assert!(ContentExtractor::new(&config).is_err());
    }
}
