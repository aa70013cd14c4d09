//! Chat with an LLM about the page open in your browser.
//!
//! The `agent` binary serves the chat UI; `tab-assistant` manages settings
//! and history.

pub mod browser;
pub mod capture;
pub mod composer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extractor;
pub mod model;
pub mod render;
pub mod storage;
pub mod types;

pub use composer::{ChatSession, Composer, Intent, Reply};
pub use config::Config;
pub use dispatch::{Dispatcher, Request, Response};
pub use error::{ApiError, CaptureError, ConfigurationError, ExtractionError, StorageError};
pub use model::{GeminiClient, TextGenerator};
pub use storage::{Settings, Storage};
