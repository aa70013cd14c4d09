//! Visible-viewport and full-page screenshots of the active tab.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::browser::BrowserTab;
use crate::error::CaptureError;
use crate::storage::{HistoryKind, Settings, Storage};
use crate::types::truncate_chars;

/// Characters of the data URL kept in screenshot history.
pub const HISTORY_PREVIEW_CHARS: usize = 100;

const RESTRICTED_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "chrome-search://",
    "chrome-untrusted://",
    "edge://",
    "brave://",
    "about:",
    "devtools://",
    "view-source:",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    /// Recognize an image by its magic number.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else {
            None
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

impl Screenshot {
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, CaptureError> {
        if bytes.is_empty() {
            return Err(CaptureError::Empty);
        }
        let format = ImageFormat::sniff(&bytes).ok_or(CaptureError::InvalidImage)?;
        Ok(Self { format, bytes })
    }

    pub fn base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.format.mime_type(), self.base64())
    }
}

pub fn is_restricted_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    RESTRICTED_PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn check_target(tab: &dyn BrowserTab) -> Result<(), CaptureError> {
    let url = tab.url().map_err(|e| protocol("tab query", e))?;
    if is_restricted_url(&url) {
        return Err(CaptureError::RestrictedPage(url));
    }
    Ok(())
}

fn protocol(step: &'static str, err: anyhow::Error) -> CaptureError {
    CaptureError::Protocol {
        step,
        message: format!("{err:#}"),
    }
}

/// Capture the visible viewport of the active tab.
pub fn capture_visible(tab: &dyn BrowserTab) -> Result<Screenshot, CaptureError> {
    check_target(tab)?;
    let bytes = tab
        .capture_visible()
        .map_err(|e| protocol("visible capture", e))?;
    Screenshot::from_bytes(bytes)
}

/// Capture the whole document through a debugger session.
///
/// Once attached, the session is detached on every exit path. When an
/// earlier step failed, that error is reported and a detach failure is only
/// logged.
pub fn capture_full_page(tab: &dyn BrowserTab) -> Result<Screenshot, CaptureError> {
    let pinned = tab.pinned();
    let tab: &dyn BrowserTab = match &pinned {
        Some(pinned) => pinned.as_ref(),
        None => tab,
    };
    check_target(tab)?;
    tab.attach_debugger().map_err(|e| protocol("attach", e))?;
    debug!("debugger attached");

    let captured = (|| -> Result<Vec<u8>, CaptureError> {
        let size = tab
            .layout_metrics()
            .map_err(|e| protocol("layout metrics", e))?;
        debug!(width = size.width, height = size.height, "content size");
        tab.override_viewport(size)
            .map_err(|e| protocol("viewport override", e))?;
        tab.capture_beyond_viewport()
            .map_err(|e| protocol("full-page capture", e))
    })();

    let detached = release(tab);
    debug!(ok = detached.is_ok(), "debugger detached");

    match (captured, detached) {
        (Ok(bytes), Ok(())) => Screenshot::from_bytes(bytes),
        (Ok(_), Err(detach_err)) => Err(detach_err),
        (Err(err), detached) => {
            if let Err(detach_err) = detached {
                warn!(error = %detach_err, "detach failed after capture error");
            }
            Err(err)
        }
    }
}

/// Undo the viewport override and detach. Both always run; the first error wins.
fn release(tab: &dyn BrowserTab) -> Result<(), CaptureError> {
    let cleared = tab
        .clear_viewport_override()
        .map_err(|e| protocol("clear viewport override", e));
    let detached = tab.detach_debugger().map_err(|e| protocol("detach", e));
    cleared.and(detached)
}

/// Append a truncated record of `shot` to screenshot history when the user
/// keeps history. Failures are logged, never returned.
pub fn record_capture(
    storage: &Storage,
    settings: &Settings,
    shot: &Screenshot,
    url: &str,
    title: &str,
    full_page: bool,
) {
    if !settings.preferences.save_history {
        return;
    }
    let data_url = shot.data_url();
    let mut data = Map::new();
    data.insert("url".into(), json!(url));
    data.insert("title".into(), json!(title));
    data.insert("fullPage".into(), Value::Bool(full_page));
    data.insert(
        "screenshot".into(),
        json!(truncate_chars(&data_url, HISTORY_PREVIEW_CHARS)),
    );
    if let Err(e) = storage.append_history(HistoryKind::Screenshots, data) {
        warn!(error = %e, "failed to save screenshot history");
    }
}
