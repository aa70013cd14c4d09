use serde::{Deserialize, Serialize};

pub const MAX_HEADINGS: usize = 50;
pub const MAX_LINKS: usize = 30;
pub const MAX_IMAGES: usize = 15;
pub const MAX_FORMS: usize = 10;
pub const MAX_FORM_INPUTS: usize = 25;
pub const MAX_NAVIGATION: usize = 10;
pub const MAX_NAV_LINKS: usize = 20;
pub const MAX_TABLES: usize = 10;
pub const MAX_VIDEOS: usize = 10;
pub const MAX_BUTTONS: usize = 30;
pub const MAX_INPUTS: usize = 30;
pub const MAX_CLICKABLE: usize = 20;
pub const MAX_INTERACTIVE: usize = 20;
pub const MAX_VALIDATION: usize = 20;

/// Conversation window kept by a chat session.
pub const CONVERSATION_WINDOW: usize = 20;

/// The raw material of a snapshot: where the tab is and what its DOM serializes to.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    pub url: String,
    pub html: String,
}

/// One read of the active page. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSnapshot {
    pub text: String,
    pub metadata: PageMetadata,
    pub structure: PageStructure,
    pub testable_elements: TestableElements,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageMetadata {
    pub title: String,
    pub url: String,
    pub description: String,
    pub keywords: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageStructure {
    pub headings: Vec<Heading>,
    pub links: Vec<Link>,
    pub images: Vec<Image>,
    pub forms: Vec<Form>,
    pub navigation: Vec<Navigation>,
    pub tables: Vec<Table>,
    pub videos: Vec<Video>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    /// `h1` through `h6`.
    pub level: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub href: String,
    pub external: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub src: String,
    pub alt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub action: String,
    pub method: String,
    pub inputs: Vec<FormInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormInput {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub placeholder: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Navigation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub headers: Vec<String>,
    pub row_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Video {
    /// `video` or `iframe`.
    pub kind: String,
    pub src: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestableElements {
    pub buttons: Vec<Button>,
    pub inputs: Vec<Input>,
    pub clickable_elements: Vec<Clickable>,
    pub interactive_elements: Vec<Interactive>,
    pub form_validation: Vec<ValidationRule>,
    pub accessibility: Accessibility,
    pub performance: Performance,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Button {
    pub text: String,
    pub id: String,
    pub class_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    pub input_type: String,
    pub name: String,
    pub id: String,
    pub placeholder: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Clickable {
    pub tag: String,
    pub text: String,
    pub href: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interactive {
    pub tag: String,
    pub text: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub field: String,
    /// Constraint names such as `required`, `pattern`, `maxlength`, `type=email`.
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accessibility {
    pub images_without_alt: usize,
    pub images_with_alt: usize,
    /// Percentage of images with non-empty alt text, 0 to 100.
    pub alt_text_coverage: u8,
    pub heading_structure_valid: bool,
    pub missing_labels: usize,
    pub aria_landmarks: usize,
    pub has_skip_link: bool,
    pub has_lang: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub dom_nodes: usize,
    pub scripts: usize,
    pub external_scripts: usize,
    pub stylesheets: usize,
    pub images: usize,
    pub iframes: usize,
    pub inline_styles: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in the rolling conversation sent to the model as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
}

impl ConversationEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Cut `text` to at most `max` characters, on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
