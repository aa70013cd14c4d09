use super::{PageDocument, normalize_whitespace, visible_text};
use crate::error::ExtractionError;

const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=\"main\"]",
    ".content",
    ".main-content",
    "#content",
    ".post-content",
    ".entry-content",
    ".article-body",
];

/// A content region must carry more than this many characters to be used.
const MIN_REGION_CHARS: usize = 100;
const MIN_BLOCK_CHARS: usize = 20;
const MAX_BLOCKS: usize = 50;

pub(super) fn extract(page: &PageDocument) -> Result<String, ExtractionError> {
    for css in CONTENT_SELECTORS {
        if let Some(region) = page.first("text", css)? {
            let text = visible_text(&region);
            if text.chars().count() > MIN_REGION_CHARS {
                return Ok(text);
            }
        }
    }

    let blocks: Vec<String> = page
        .select("text", "p, li, div")?
        .iter()
        .map(visible_text)
        .filter(|t| t.chars().count() > MIN_BLOCK_CHARS)
        .take(MAX_BLOCKS)
        .collect();

    Ok(normalize_whitespace(&blocks.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawPage;

    fn text_of(html: &str) -> String {
        PageDocument::parse(&RawPage {
            url: "https://example.com".into(),
            html: html.into(),
        })
        .text()
    }

    #[test]
    fn article_wins_over_other_blocks() {
        let article = "The quick brown fox jumps over the lazy dog. ".repeat(4);
        let html = format!(
            "<body><p>Sidebar paragraph that is long enough to count.</p>\
             <article><h1>Title</h1><p>{article}</p></article>\
             <div>Footer block with more than twenty characters</div></body>"
        );
        let text = text_of(&html);
        assert_eq!(text, format!("Title {}", article.trim()));
        assert!(!text.contains("Sidebar"));
    }

    #[test]
    fn short_article_falls_through_to_main() {
        let body = "Main content sentence repeated for length. ".repeat(3);
        let html = format!("<body><article>tiny</article><main>{body}</main></body>");
        assert_eq!(text_of(&html), body.trim());
    }

    #[test]
    fn role_main_and_content_classes_are_tried() {
        let body = "Role main content that clearly exceeds the minimum size. ".repeat(2);
        let html = format!(r#"<body><div role="main">{body}</div></body>"#);
        assert_eq!(text_of(&html), body.trim());

        let html = format!(r#"<body><section class="entry-content">{body}</section></body>"#);
        assert_eq!(text_of(&html), body.trim());
    }

    #[test]
    fn fallback_collects_long_blocks_only() {
        let html = "<body><p>short</p><p>This paragraph is long enough.</p>\
                    <ul><li>A list item that also qualifies</li></ul></body>";
        assert_eq!(
            text_of(html),
            "This paragraph is long enough. A list item that also qualifies"
        );
    }

    #[test]
    fn fallback_is_capped_at_fifty_blocks() {
        let paragraphs: String = (0..80)
            .map(|i| format!("<p>Paragraph number {i:03} with padding</p>"))
            .collect();
        let text = text_of(&format!("<body>{paragraphs}</body>"));
        assert!(text.contains("Paragraph number 049"));
        assert!(!text.contains("Paragraph number 050"));
    }

    #[test]
    fn empty_page_gives_empty_text() {
        assert_eq!(text_of("<html><body></body></html>"), "");
    }
}
