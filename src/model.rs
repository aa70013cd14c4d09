//! Gemini `generateContent` client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ApiError, ConfigurationError};
use crate::storage::Settings;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

const API_KEY_PREFIX: &str = "AIza";
const API_KEY_HEADER: &str = "x-goog-api-key";
const MIN_API_KEY_LEN: usize = 30;
const TOP_P: f32 = 0.95;
const TOP_K: u32 = 40;

const HARM_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Shape check only; the endpoint is the authority on whether a key works.
pub fn validate_api_key(key: &str) -> Result<(), ConfigurationError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigurationError::MissingApiKey);
    }
    if !key.starts_with(API_KEY_PREFIX) || key.chars().count() < MIN_API_KEY_LEN {
        return Err(ConfigurationError::InvalidApiKey);
    }
    Ok(())
}

/// An image sent alongside the prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 without the `data:` prefix.
    pub data: String,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        image: Option<&InlineImage>,
        settings: &Settings,
    ) -> Result<String, ApiError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: &'a InlineImage },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    top_k: u32,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn body<'a>(prompt: &'a str, image: Option<&'a InlineImage>, settings: &Settings) -> GenerateRequest<'a> {
        let mut parts = vec![Part::Text { text: prompt }];
        if let Some(image) = image {
            parts.push(Part::InlineData { inline_data: image });
        }
        GenerateRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                temperature: settings.advanced_settings.temperature.clamp(0.0, 1.0),
                max_output_tokens: settings.advanced_settings.max_tokens,
                top_p: TOP_P,
                top_k: TOP_K,
            },
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_MEDIUM_AND_ABOVE",
                })
                .collect(),
        }
    }
}

/// Transport errors are reported without the request URL.
fn network_error(e: reqwest::Error) -> ApiError {
    ApiError::Network(e.without_url().to_string())
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        image: Option<&InlineImage>,
        settings: &Settings,
    ) -> Result<String, ApiError> {
        let api_key = settings.gemini_api_key.trim();
        validate_api_key(api_key)?;

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, prompt_chars = prompt.len(), image = image.is_some(), "generate");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, api_key)
            .json(&Self::body(prompt, image, settings))
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(network_error)?;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();

        if !status.is_success() {
            let message = json["error"]["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            warn!(status = status.as_u16(), %message, "model API error");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        match json["candidates"][0]["content"]["parts"][0]["text"].as_str() {
            Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
            _ => {
                warn!(%body, "model response had no text");
                Err(ApiError::EmptyResponse)
            }
        }
    }
}
