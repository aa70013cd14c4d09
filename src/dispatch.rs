//! Request routing between the chat UI, the browser and storage.
//!
//! Every request gets exactly one reply: its result, or `{"error": "..."}`.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::browser::BrowserTab;
use crate::capture::{self, Screenshot};
use crate::error::CaptureError;
use crate::extractor::PageDocument;
use crate::storage::{ExportDocument, HistoryEntry, HistoryKind, Settings, Storage};
use crate::types::{PageMetadata, PageSnapshot, PageStructure, TestableElements};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    CaptureScreenshot,
    CaptureFullPage,
    #[serde(alias = "GET_PAGE_TEXT")]
    GetPageText,
    #[serde(alias = "GET_PAGE_METADATA")]
    GetPageMetadata,
    #[serde(alias = "GET_PAGE_STRUCTURE")]
    GetPageStructure,
    #[serde(alias = "GET_TESTABLE_ELEMENTS")]
    GetTestableElements,
    #[serde(alias = "GET_FULL_PAGE_INFO")]
    GetFullPageInfo,
    GetSettings,
    SaveSettings { settings: Settings },
    GetHistory { kind: HistoryKind },
    SaveAnalysis { data: Map<String, Value> },
    ClearHistory { kind: HistoryKind },
    ExportData,
    ImportData { document: ExportDocument },
}

/// Every tag `Request` accepts, aliases included.
pub const KNOWN_TAGS: &[&str] = &[
    "captureScreenshot",
    "captureFullPage",
    "getPageText",
    "getPageMetadata",
    "getPageStructure",
    "getTestableElements",
    "getFullPageInfo",
    "getSettings",
    "saveSettings",
    "getHistory",
    "saveAnalysis",
    "clearHistory",
    "exportData",
    "importData",
    "GET_PAGE_TEXT",
    "GET_PAGE_METADATA",
    "GET_PAGE_STRUCTURE",
    "GET_TESTABLE_ELEMENTS",
    "GET_FULL_PAGE_INFO",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReply {
    /// `data:` URL of the image.
    pub screenshot: String,
    pub mime_type: String,
    pub url: String,
    pub title: String,
    pub full_page: bool,
}

impl CaptureReply {
    fn new(shot: &Screenshot, url: String, title: String, full_page: bool) -> Self {
        Self {
            screenshot: shot.data_url(),
            mime_type: shot.format.mime_type().to_string(),
            url,
            title,
            full_page,
        }
    }

    /// Base64 payload of the data URL.
    pub fn base64_data(&self) -> &str {
        self.screenshot
            .split_once(',')
            .map(|(_, data)| data)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Capture(CaptureReply),
    Text { text: String },
    Metadata(PageMetadata),
    Structure(PageStructure),
    Testable(TestableElements),
    FullPage(Box<PageSnapshot>),
    Settings(Settings),
    History { entries: Vec<HistoryEntry> },
    Saved { entry: HistoryEntry },
    Done { success: bool },
    Export(Box<ExportDocument>),
    Error { error: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self)
            .unwrap_or_else(|e| json!({ "error": format!("Failed to encode response: {e}") }))
    }
}

/// Routes each request to exactly one handler. Holds only handles to the
/// tab and storage.
#[derive(Clone)]
pub struct Dispatcher {
    tab: Arc<dyn BrowserTab>,
    storage: Storage,
}

impl Dispatcher {
    pub fn new(tab: Arc<dyn BrowserTab>, storage: Storage) -> Self {
        Self { tab, storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub async fn handle(&self, request: Request) -> Response {
        match self.route(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "request failed");
                Response::error(format!("{e:#}"))
            }
        }
    }

    /// Untyped entry point: accepts `{action|type: ..., ...payload}`.
    pub async fn handle_value(&self, mut envelope: Value) -> Value {
        if let Some(obj) = envelope.as_object_mut() {
            if !obj.contains_key("action") {
                if let Some(tag) = obj.remove("type") {
                    obj.insert("action".into(), tag);
                }
            }
        }

        let tag = envelope
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !KNOWN_TAGS.contains(&tag.as_str()) {
            debug!(tag, "unknown action");
            return Response::error("Unknown action").to_value();
        }

        match serde_json::from_value::<Request>(envelope) {
            Ok(request) => self.handle(request).await.to_value(),
            Err(e) => Response::error(format!("Invalid request: {e}")).to_value(),
        }
    }

    async fn route(&self, request: Request) -> Result<Response> {
        debug!(?request, "dispatch");
        match request {
            Request::CaptureScreenshot => self.capture(false).await,
            Request::CaptureFullPage => self.capture(true).await,
            Request::GetPageText => {
                let text = self.with_page(|page| page.text()).await?;
                Ok(Response::Text { text })
            }
            Request::GetPageMetadata => {
                Ok(Response::Metadata(self.with_page(|page| page.metadata()).await?))
            }
            Request::GetPageStructure => {
                Ok(Response::Structure(self.with_page(|page| page.structure()).await?))
            }
            Request::GetTestableElements => Ok(Response::Testable(
                self.with_page(|page| page.testable_elements()).await?,
            )),
            Request::GetFullPageInfo => Ok(Response::FullPage(Box::new(
                self.with_page(|page| page.snapshot()).await?,
            ))),
            Request::GetSettings => Ok(Response::Settings(self.storage.load_settings()?)),
            Request::SaveSettings { settings } => {
                self.storage.save_settings(&settings)?;
                Ok(Response::Done { success: true })
            }
            Request::GetHistory { kind } => Ok(Response::History {
                entries: self.storage.history(kind)?,
            }),
            Request::SaveAnalysis { data } => {
                let entry = self.storage.append_history(HistoryKind::Analysis, data)?;
                Ok(Response::Saved { entry })
            }
            Request::ClearHistory { kind } => {
                self.storage.clear_history(kind)?;
                Ok(Response::Done { success: true })
            }
            Request::ExportData => Ok(Response::Export(Box::new(self.storage.export()?))),
            Request::ImportData { document } => {
                self.storage.import(&document)?;
                Ok(Response::Done { success: true })
            }
        }
    }

    async fn capture(&self, full_page: bool) -> Result<Response> {
        let settings = self.storage.load_settings()?;
        if !settings.features.screenshots {
            return Err(CaptureError::Disabled.into());
        }

        let (shot, url, title) = self
            .with_tab(move |tab| {
                let shot = if full_page {
                    capture::capture_full_page(tab)?
                } else {
                    capture::capture_visible(tab)?
                };
                let url = tab.url().unwrap_or_default();
                let title = tab.title().unwrap_or_default();
                Ok((shot, url, title))
            })
            .await?;

        capture::record_capture(&self.storage, &settings, &shot, &url, &title, full_page);
        Ok(Response::Capture(CaptureReply::new(&shot, url, title, full_page)))
    }

    /// Read the active page and run `f` over the parsed document.
    async fn with_page<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&PageDocument) -> T + Send + 'static,
    {
        self.with_tab(move |tab| {
            let page = tab.raw_page()?;
            Ok(f(&PageDocument::parse(&page)))
        })
        .await
    }

    async fn with_tab<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BrowserTab) -> Result<T> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(tab.as_ref()))
            .await
            .map_err(|e| anyhow!("browser task failed: {e}"))?
    }
}
