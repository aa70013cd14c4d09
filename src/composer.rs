//! Turns a chat message into a page-aware prompt, calls the model and shapes
//! the reply.

use std::fmt::Write as _;

use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::dispatch::{CaptureReply, Dispatcher, Request, Response};
use crate::model::{InlineImage, TextGenerator};
use crate::render::{Transcript, TranscriptEntry};
use crate::storage::{Features, Settings};
use crate::types::{CONVERSATION_WINDOW, ConversationEntry, PageSnapshot, Role, truncate_chars};

/// Conversation entries folded into a general chat prompt.
pub const CHAT_CONTEXT_ENTRIES: usize = 6;
/// Characters kept from each of those entries.
pub const CHAT_CONTEXT_CHARS: usize = 200;
/// Characters of the reply stored in analysis history.
pub const HISTORY_SUMMARY_CHARS: usize = 500;

const HEADINGS_IN_SUMMARY: usize = 5;
const CLICKABLE_IN_PROMPT: usize = 10;
const CLICKABLE_TEXT_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Screenshot,
    Analysis,
    TestGeneration,
    Documentation,
    GeneralChat,
}

impl Intent {
    /// Keyword match on the lowercased message. Earlier groups win.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if contains_any(&lower, &["screenshot"]) {
            Intent::Screenshot
        } else if contains_any(&lower, &["describe", "analyze", "what is", "about this page"]) {
            Intent::Analysis
        } else if contains_any(&lower, &["test case", "testing", "qa"]) {
            Intent::TestGeneration
        } else if contains_any(&lower, &["documentation", "document", "docs"]) {
            Intent::Documentation
        } else {
            Intent::GeneralChat
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Intent::Screenshot => "📸",
            Intent::Analysis => "🔍",
            Intent::TestGeneration => "🧪",
            Intent::Documentation => "📄",
            Intent::GeneralChat => "💬",
        }
    }

    /// Characters of page text embedded in the prompt.
    pub fn preview_chars(self) -> usize {
        match self {
            Intent::Screenshot => 300,
            Intent::Analysis => 1200,
            Intent::TestGeneration => 500,
            Intent::Documentation => 800,
            Intent::GeneralChat => 1000,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Intent::Screenshot => "screenshot",
            Intent::Analysis => "analysis",
            Intent::TestGeneration => "testGeneration",
            Intent::Documentation => "documentation",
            Intent::GeneralChat => "chat",
        }
    }

    /// Status line shown while the reply is being prepared.
    pub fn status(self) -> &'static str {
        match self {
            Intent::Screenshot => "📸 Capturing the page...",
            Intent::Analysis => "🔍 Analyzing the page...",
            Intent::TestGeneration => "🧪 Looking for testable elements...",
            Intent::Documentation => "📄 Drafting documentation...",
            Intent::GeneralChat => "💬 Thinking...",
        }
    }

    fn enabled(self, features: &Features) -> bool {
        match self {
            Intent::Screenshot => features.screenshots,
            Intent::Analysis => features.page_analysis,
            Intent::TestGeneration => features.test_generation,
            Intent::Documentation => features.documentation,
            Intent::GeneralChat => true,
        }
    }

    fn feature_label(self) -> &'static str {
        match self {
            Intent::Screenshot => "Screenshots are",
            Intent::Analysis => "Page analysis is",
            Intent::TestGeneration => "Test generation is",
            Intent::Documentation => "Documentation is",
            Intent::GeneralChat => "Chat is",
        }
    }

    fn saves_history(self) -> bool {
        matches!(
            self,
            Intent::Analysis | Intent::TestGeneration | Intent::Documentation
        )
    }
}

/// What the chat shows for one user message.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub intent: Intent,
    pub text: String,
    /// `data:` URL shown under the reply.
    pub screenshot: Option<String>,
}

impl Reply {
    fn new(intent: Intent, text: impl Into<String>) -> Self {
        Self {
            intent,
            text: text.into(),
            screenshot: None,
        }
    }
}

/// State of one open chat: the rolling model context and what the UI shows.
/// Dropped on reset.
#[derive(Debug, Default)]
pub struct ChatSession {
    conversation: Vec<ConversationEntry>,
    transcript: Transcript,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation(&self) -> &[ConversationEntry] {
        &self.conversation
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Show the user's message and a loading placeholder; returns the placeholder id.
    pub fn begin(&mut self, message: &str) -> u64 {
        self.transcript.push(Role::User, message, None);
        self.transcript.push_loading()
    }

    /// Replace the placeholder with the reply and remember the exchange.
    pub fn finish(&mut self, loading_id: u64, message: &str, reply: Reply) -> &TranscriptEntry {
        self.remember(ConversationEntry::user(message));
        self.remember(ConversationEntry::assistant(reply.text.clone()));
        self.transcript
            .resolve(loading_id, Role::Assistant, &reply.text, reply.screenshot)
    }

    fn remember(&mut self, entry: ConversationEntry) {
        self.conversation.push(entry);
        if self.conversation.len() > CONVERSATION_WINDOW {
            let excess = self.conversation.len() - CONVERSATION_WINDOW;
            self.conversation.drain(..excess);
        }
    }
}

pub struct Composer<G> {
    generator: G,
    dispatcher: Dispatcher,
}

impl<G: TextGenerator> Composer<G> {
    pub fn new(generator: G, dispatcher: Dispatcher) -> Self {
        Self {
            generator,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Answer one message. Never fails: problems come back as a `❌` or `⚠️` line.
    pub async fn respond(&self, conversation: &[ConversationEntry], message: &str) -> Reply {
        let intent = Intent::classify(message);
        info!(intent = intent.name(), "composing reply");

        let settings = match self.dispatcher.storage().load_settings() {
            Ok(settings) => settings,
            Err(e) => return Reply::new(intent, format!("❌ Error: {e}")),
        };
        if !intent.enabled(&settings.features) {
            return Reply::new(
                intent,
                format!(
                    "⚠️ {} disabled in settings. Enable it with `tab-assistant set`.",
                    intent.feature_label()
                ),
            );
        }

        match intent {
            Intent::Screenshot => self.screenshot(message, &settings).await,
            Intent::GeneralChat => self.chat(conversation, message, &settings).await,
            _ => self.page_task(intent, message, &settings).await,
        }
    }

    async fn screenshot(&self, message: &str, settings: &Settings) -> Reply {
        let intent = Intent::Screenshot;
        let capture = match self.dispatcher.handle(Request::CaptureScreenshot).await {
            Response::Capture(capture) => capture,
            other => {
                return Reply::new(
                    intent,
                    format!("❌ Could not capture screenshot: {}", failure(other)),
                );
            }
        };
        let page = self.page().await.unwrap_or_else(|e| {
            warn!(error = %e, "page read failed after capture");
            PageSnapshot::default()
        });

        let prompt = screenshot_prompt(message, &capture, &page);
        let image = InlineImage {
            mime_type: capture.mime_type.clone(),
            data: capture.base64_data().to_string(),
        };
        let text = match self.generator.generate(&prompt, Some(&image), settings).await {
            Ok(text) => format!("{} {}", intent.glyph(), text),
            Err(e) => format!("❌ Error describing screenshot: {e}"),
        };
        Reply {
            intent,
            text,
            screenshot: Some(capture.screenshot),
        }
    }

    async fn page_task(&self, intent: Intent, message: &str, settings: &Settings) -> Reply {
        let page = match self.page().await {
            Ok(page) => page,
            Err(e) => {
                let what = match intent {
                    Intent::TestGeneration => "Could not analyze testable elements on this page",
                    Intent::Documentation => "Could not analyze this page for documentation",
                    _ => "Could not analyze this page",
                };
                return Reply::new(intent, format!("❌ {what}: {e}"));
            }
        };

        let detailed = settings.preferences.detailed_reports;
        let prompt = match intent {
            Intent::TestGeneration => test_prompt(message, &page),
            Intent::Documentation => documentation_prompt(message, &page, detailed),
            _ => analysis_prompt(message, &page, detailed),
        };

        match self.generator.generate(&prompt, None, settings).await {
            Ok(text) => {
                if settings.preferences.save_history && intent.saves_history() {
                    self.save_analysis(intent, &page, &text).await;
                }
                Reply::new(intent, format!("{} {}", intent.glyph(), text))
            }
            Err(e) => {
                let what = match intent {
                    Intent::TestGeneration => "generating test cases",
                    Intent::Documentation => "generating documentation",
                    _ => "generating description",
                };
                Reply::new(intent, format!("❌ Error {what}: {e}"))
            }
        }
    }

    async fn chat(
        &self,
        conversation: &[ConversationEntry],
        message: &str,
        settings: &Settings,
    ) -> Reply {
        let intent = Intent::GeneralChat;
        let page = match self.page().await {
            Ok(page) => Some(page),
            Err(e) => {
                debug!(error = %e, "answering without page context");
                None
            }
        };
        let prompt = chat_prompt(message, page.as_ref(), conversation);
        match self.generator.generate(&prompt, None, settings).await {
            Ok(text) => Reply::new(intent, format!("{} {}", intent.glyph(), text)),
            Err(e) => Reply::new(intent, format!("❌ Error: {e}")),
        }
    }

    async fn page(&self) -> Result<PageSnapshot, String> {
        match self.dispatcher.handle(Request::GetFullPageInfo).await {
            Response::FullPage(page) => Ok(*page),
            other => Err(failure(other)),
        }
    }

    async fn save_analysis(&self, intent: Intent, page: &PageSnapshot, reply: &str) {
        let mut data = Map::new();
        data.insert("url".into(), json!(page.metadata.url));
        data.insert("title".into(), json!(page.metadata.title));
        data.insert("intent".into(), json!(intent.name()));
        data.insert(
            "response".into(),
            Value::String(truncate_chars(reply, HISTORY_SUMMARY_CHARS).to_string()),
        );
        if let Response::Error { error } = self.dispatcher.handle(Request::SaveAnalysis { data }).await {
            warn!(%error, "failed to save analysis history");
        }
    }
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

fn failure(response: Response) -> String {
    match response {
        Response::Error { error } => error,
        other => format!("unexpected reply {:?}", other.to_value()),
    }
}

fn preview(text: &str, max: usize) -> String {
    let cut = truncate_chars(text, max);
    if cut.len() < text.len() {
        format!("{cut}...")
    } else {
        cut.to_string()
    }
}

fn page_header(out: &mut String, page: &PageSnapshot) {
    let meta = &page.metadata;
    let _ = writeln!(out, "Title: {}", meta.title);
    let _ = writeln!(out, "URL: {}", meta.url);
    if !meta.description.is_empty() {
        let _ = writeln!(out, "Description: {}", meta.description);
    }
    if let Some(kind) = &meta.page_type {
        let _ = writeln!(out, "Page type: {kind}");
    }
}

fn structure_counts(out: &mut String, page: &PageSnapshot) {
    let s = &page.structure;
    let _ = writeln!(out, "- {} headings", s.headings.len());
    let _ = writeln!(out, "- {} links", s.links.len());
    let _ = writeln!(out, "- {} images", s.images.len());
    let _ = writeln!(out, "- {} forms", s.forms.len());
}

fn headings(out: &mut String, page: &PageSnapshot, limit: usize) {
    for h in page.structure.headings.iter().take(limit) {
        let _ = writeln!(out, "{}: {}", h.level.to_uppercase(), h.text);
    }
}

pub fn analysis_prompt(message: &str, page: &PageSnapshot, detailed: bool) -> String {
    let mut out = String::from("Please describe this webpage based on the following information:\n\n");
    page_header(&mut out, page);
    out.push_str("\nPage structure:\n");
    structure_counts(&mut out, page);
    out.push_str("\nMain headings:\n");
    headings(&mut out, page, HEADINGS_IN_SUMMARY);
    let _ = writeln!(
        out,
        "\nContent preview:\n{}\n",
        preview(&page.text, Intent::Analysis.preview_chars())
    );
    let _ = writeln!(out, "User request: {message}\n");
    out.push_str(
        "Please provide a comprehensive description of what this page is about, its purpose, and main content.",
    );
    if detailed {
        out.push_str(
            "\n\nGive a detailed report with these sections: Overview, Purpose, Main Content, \
             Navigation and Structure, Accessibility Notes.",
        );
    }
    out
}

pub fn test_prompt(message: &str, page: &PageSnapshot) -> String {
    let elements = &page.testable_elements;
    let mut out =
        String::from("Based on the following webpage elements, create comprehensive test cases:\n\n");
    page_header(&mut out, page);

    let _ = writeln!(out, "\nBUTTONS ({}):", elements.buttons.len());
    for button in &elements.buttons {
        let name = if button.text.is_empty() { "Unnamed button" } else { button.text.as_str() };
        let id = if button.id.is_empty() { "none" } else { button.id.as_str() };
        let state = if button.disabled { " (disabled)" } else { "" };
        let _ = writeln!(out, "- {name} (ID: {id}){state}");
    }

    let _ = writeln!(out, "\nINPUT FIELDS ({}):", elements.inputs.len());
    for input in &elements.inputs {
        let name = [&input.name, &input.placeholder]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .or(input.label.as_deref())
            .unwrap_or("Unnamed");
        let required = if input.required { " (Required)" } else { "" };
        let _ = writeln!(out, "- {} field: {name}{required}", input.input_type);
    }

    let _ = writeln!(out, "\nCLICKABLE ELEMENTS ({}):", elements.clickable_elements.len());
    for el in elements.clickable_elements.iter().take(CLICKABLE_IN_PROMPT) {
        let _ = writeln!(
            out,
            "- {} ({})",
            truncate_chars(&el.text, CLICKABLE_TEXT_CHARS),
            el.tag
        );
    }

    if !elements.form_validation.is_empty() {
        out.push_str("\nVALIDATION RULES:\n");
        for rule in &elements.form_validation {
            let _ = writeln!(out, "- {}: {}", rule.field, rule.rules.join(", "));
        }
    }

    let a11y = &elements.accessibility;
    let _ = writeln!(
        out,
        "\nACCESSIBILITY: {}% alt text coverage, {} unlabeled inputs, heading order {}",
        a11y.alt_text_coverage,
        a11y.missing_labels,
        if a11y.heading_structure_valid { "valid" } else { "broken" }
    );

    let _ = writeln!(
        out,
        "\nContent preview:\n{}\n",
        preview(&page.text, Intent::TestGeneration.preview_chars())
    );
    let _ = writeln!(out, "User request: {message}\n");
    out.push_str(
        "Please create detailed test cases including:\n\
         1. Functional tests for buttons and forms\n\
         2. Navigation tests for links\n\
         3. Input validation tests\n\
         4. User interaction tests\n\
         5. Edge cases and error scenarios\n\n\
         Format the response as organized test cases with clear steps.",
    );
    out
}

pub fn documentation_prompt(message: &str, page: &PageSnapshot, detailed: bool) -> String {
    let mut out = String::from("Create comprehensive technical documentation for this webpage:\n\nPAGE INFORMATION:\n");
    page_header(&mut out, page);
    out.push_str("\nSTRUCTURE ANALYSIS:\n");
    structure_counts(&mut out, page);
    let _ = writeln!(out, "- {} tables", page.structure.tables.len());
    let _ = writeln!(out, "- {} navigation regions", page.structure.navigation.len());

    out.push_str("\nHEADINGS HIERARCHY:\n");
    headings(&mut out, page, usize::MAX);

    out.push_str("\nFORMS DETECTED:\n");
    for form in &page.structure.forms {
        let _ = writeln!(
            out,
            "Form ({}): {} inputs",
            form.method.to_uppercase(),
            form.inputs.len()
        );
    }

    if detailed {
        let perf = &page.testable_elements.performance;
        let _ = writeln!(
            out,
            "\nTECHNICAL FOOTPRINT:\n- {} DOM nodes\n- {} scripts ({} external)\n- {} stylesheets\n- {} iframes",
            perf.dom_nodes, perf.scripts, perf.external_scripts, perf.stylesheets, perf.iframes
        );
    }

    let _ = writeln!(
        out,
        "\nCONTENT PREVIEW:\n{}\n",
        preview(&page.text, Intent::Documentation.preview_chars())
    );
    let _ = writeln!(out, "User request: {message}\n");
    out.push_str(
        "Please create documentation that includes:\n\
         1. Page Overview and Purpose\n\
         2. Navigation Structure\n\
         3. Key Features and Functionality\n\
         4. Forms and User Interactions\n\
         5. Technical Specifications\n\
         6. User Guide/Instructions\n\n\
         Format as clear, professional documentation.",
    );
    if detailed {
        out.push_str(" Be detailed: use a heading per section and cover every form and navigation region.");
    }
    out
}

pub fn chat_prompt(
    message: &str,
    page: Option<&PageSnapshot>,
    conversation: &[ConversationEntry],
) -> String {
    let mut out = String::new();
    match page {
        Some(page) => {
            out.push_str("Context about the current webpage:\n");
            let _ = writeln!(out, "- Title: {}", page.metadata.title);
            let _ = writeln!(out, "- URL: {}", page.metadata.url);
            let _ = writeln!(
                out,
                "- Content preview: {}",
                preview(&page.text, Intent::GeneralChat.preview_chars())
            );
        }
        None => out.push_str(
            "Note: I couldn't access information about the current webpage, \
             so answer based on general knowledge.\n",
        ),
    }

    let start = conversation.len().saturating_sub(CHAT_CONTEXT_ENTRIES);
    let recent = &conversation[start..];
    if !recent.is_empty() {
        out.push_str("\nRecent conversation:\n");
        for entry in recent {
            let who = match entry.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            let _ = writeln!(out, "{who}: {}", truncate_chars(&entry.content, CHAT_CONTEXT_CHARS));
        }
    }

    let _ = writeln!(out, "\nUser's question: {message}\n");
    if page.is_some() {
        out.push_str("Please answer the user's question in the context of this webpage.");
    } else {
        out.push_str("Please answer the user's question.");
    }
    out
}

fn screenshot_prompt(message: &str, capture: &CaptureReply, page: &PageSnapshot) -> String {
    let mut out = String::from("A screenshot of the visible part of this webpage is attached.\n\n");
    let title = if page.metadata.title.is_empty() { &capture.title } else { &page.metadata.title };
    let _ = writeln!(out, "Title: {title}");
    let _ = writeln!(out, "URL: {}", capture.url);
    let _ = writeln!(
        out,
        "Content preview: {}\n",
        preview(&page.text, Intent::Screenshot.preview_chars())
    );
    let _ = writeln!(out, "User request: {message}\n");
    out.push_str("Describe what the screenshot shows and answer the user's request.");
    out
}
