use thiserror::Error;

/// Missing or malformed user configuration. Raised before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("API key not found. Run `tab-assistant set-key <KEY>` first.")]
    MissingApiKey,
    #[error("API key is not a valid Gemini key (expected an `AIza` prefix and at least 30 characters)")]
    InvalidApiKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("cannot capture browser-internal page {0}")]
    RestrictedPage(String),
    #[error("browser returned no image data")]
    Empty,
    #[error("browser returned data that is not a PNG, JPEG or WebP image")]
    InvalidImage,
    #[error("debugging protocol failed during {step}: {message}")]
    Protocol { step: &'static str, message: String },
    #[error("screenshots are disabled in settings")]
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("could not reach the model endpoint: {0}")]
    Network(String),
    #[error("model endpoint returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("model returned an empty response")]
    EmptyResponse,
}

/// One section of a page snapshot failed; the rest of the snapshot is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to extract {section}: {message}")]
pub struct ExtractionError {
    pub section: &'static str,
    pub message: String,
}

impl ExtractionError {
    pub fn new(section: &'static str, message: impl Into<String>) -> Self {
        Self {
            section,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stored JSON in {path} is malformed: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
