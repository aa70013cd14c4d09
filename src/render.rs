//! Chat transcript and the markdown-ish formatting applied to model output.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

use crate::types::Role;

static FENCED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[\w+-]*\n?([\s\S]*?)```").expect("fenced code regex"));
static INLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("inline code regex"));
static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*\n]+)\*\*").expect("bold regex"));
static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*").expect("italic regex"));
static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]\n]+)\]\((https?://[^\s)]+)\)").expect("link regex")
});
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\u{0}(\\d+)\u{0}").expect("placeholder regex"));

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Render model output as HTML: emphasis, code spans, links and line breaks.
/// The input is escaped first, so only these substitutions produce markup.
pub fn format_message(text: &str) -> String {
    let escaped = escape_html(text);
    let mut code: Vec<String> = Vec::new();

    let stash = |code: &mut Vec<String>, html: String| {
        code.push(html);
        format!("\u{0}{}\u{0}", code.len() - 1)
    };

    let out = FENCED
        .replace_all(&escaped, |c: &Captures| {
            stash(&mut code, format!("<pre><code>{}</code></pre>", &c[1]))
        })
        .into_owned();
    let out = INLINE
        .replace_all(&out, |c: &Captures| {
            stash(&mut code, format!("<code>{}</code>", &c[1]))
        })
        .into_owned();

    let out = BOLD.replace_all(&out, "<strong>$1</strong>");
    let out = ITALIC.replace_all(&out, "<em>$1</em>");
    let out = LINK.replace_all(&out, r#"<a href="$2" target="_blank" rel="noopener">$1</a>"#);
    let out = out.replace('\n', "<br>");

    PLACEHOLDER
        .replace_all(&out, |c: &Captures| {
            c[1].parse::<usize>()
                .ok()
                .and_then(|i| code.get(i).cloned())
                .unwrap_or_default()
        })
        .into_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TranscriptEntry {
    Message {
        id: u64,
        role: Role,
        html: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        screenshot: Option<String>,
    },
    Loading {
        id: u64,
    },
}

impl TranscriptEntry {
    pub fn id(&self) -> u64 {
        match self {
            TranscriptEntry::Message { id, .. } | TranscriptEntry::Loading { id } => *id,
        }
    }
}

/// Append-only chat view. Loading placeholders are the only entries ever removed.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    next_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Append a message. User text is escaped only; assistant text is formatted.
    pub fn push(&mut self, role: Role, text: &str, screenshot: Option<String>) -> &TranscriptEntry {
        let id = self.next_id();
        let html = match role {
            Role::User => escape_html(text).replace('\n', "<br>"),
            Role::Assistant => format_message(text),
        };
        self.entries.push(TranscriptEntry::Message {
            id,
            role,
            html,
            screenshot,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Insert a "thinking" placeholder and return its id.
    pub fn push_loading(&mut self) -> u64 {
        let id = self.next_id();
        self.entries.push(TranscriptEntry::Loading { id });
        id
    }

    /// Remove the placeholder `loading_id` and append the rendered reply.
    pub fn resolve(
        &mut self,
        loading_id: u64,
        role: Role,
        text: &str,
        screenshot: Option<String>,
    ) -> &TranscriptEntry {
        self.entries
            .retain(|e| !matches!(e, TranscriptEntry::Loading { id } if *id == loading_id));
        self.push(role, text, screenshot)
    }

    pub fn is_loading(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, TranscriptEntry::Loading { .. }))
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emphasis_and_links() {
        assert_eq!(
            format_message("**bold** and *soft* see [docs](https://example.com/a)"),
            "<strong>bold</strong> and <em>soft</em> see \
             <a href=\"https://example.com/a\" target=\"_blank\" rel=\"noopener\">docs</a>"
        );
    }

    #[test]
    fn code_spans_are_not_reformatted() {
        assert_eq!(
            format_message("run `a*b*c` now"),
            "run <code>a*b*c</code> now"
        );
        assert_eq!(
            format_message("```rust\nlet x = **y**;\nlet z = 1;\n```\ndone"),
            "<pre><code>let x = **y**;\nlet z = 1;\n</code></pre><br>done"
        );
    }

    #[test]
    fn markup_in_output_is_escaped() {
        assert_eq!(
            format_message("<script>alert(1)</script>\nok"),
            "&lt;script&gt;alert(1)&lt;/script&gt;<br>ok"
        );
    }

    #[test]
    fn non_http_links_stay_text() {
        assert_eq!(
            format_message("[x](javascript:alert(1))"),
            "[x](javascript:alert(1))"
        );
    }

    #[test]
    fn loading_placeholder_is_removed_on_resolve() {
        let mut transcript = Transcript::new();
        transcript.push(Role::User, "hi <there>", None);
        let loading = transcript.push_loading();
        assert!(transcript.is_loading());

        transcript.resolve(loading, Role::Assistant, "**hello**", None);
        assert!(!transcript.is_loading());
        assert_eq!(transcript.entries().len(), 2);
        match &transcript.entries()[1] {
            TranscriptEntry::Message { role, html, .. } => {
                assert_eq!(*role, Role::Assistant);
                assert_eq!(html, "<strong>hello</strong>");
            }
            other => panic!("unexpected entry {other:?}"),
        }
        match &transcript.entries()[0] {
            TranscriptEntry::Message { html, .. } => assert_eq!(html, "hi &lt;there&gt;"),
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let mut transcript = Transcript::new();
        let a = transcript.push(Role::User, "a", None).id();
        let b = transcript.push_loading();
        let c = transcript.resolve(b, Role::Assistant, "c", None).id();
        assert!(a < b && b < c);
    }
}
