//! Connection to the user's Chrome and the `BrowserTab` seam used by the
//! extractor, the capture service and the dispatcher.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use headless_chrome::protocol::cdp::Emulation;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::types::RawPage;

/// Full size of the rendered document, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ContentSize {
    pub width: u32,
    pub height: u32,
}

/// The active tab, as seen through the browser's debugging protocol.
///
/// All methods block; async callers run them on `spawn_blocking`.
pub trait BrowserTab: Send + Sync {
    fn url(&self) -> Result<String>;

    fn title(&self) -> Result<String>;

    /// Serialized live DOM of the page.
    fn html(&self) -> Result<String>;

    /// Raster image of the visible viewport.
    fn capture_visible(&self) -> Result<Vec<u8>>;

    fn attach_debugger(&self) -> Result<()>;

    fn layout_metrics(&self) -> Result<ContentSize>;

    fn override_viewport(&self, size: ContentSize) -> Result<()>;

    fn capture_beyond_viewport(&self) -> Result<Vec<u8>>;

    fn clear_viewport_override(&self) -> Result<()>;

    fn detach_debugger(&self) -> Result<()>;

    /// A handle bound to the tab this one currently resolves to, for
    /// multi-step handshakes that must not drift to another tab.
    /// `None` when the handle is already fixed to a single tab.
    fn pinned(&self) -> Option<Arc<dyn BrowserTab>> {
        None
    }

    fn raw_page(&self) -> Result<RawPage> {
        Ok(RawPage {
            url: self.url()?,
            html: self.html()?,
        })
    }
}

const LAYOUT_JS: &str = r#"
JSON.stringify({
  width: Math.ceil(Math.max(document.documentElement.scrollWidth, document.body ? document.body.scrollWidth : 0)),
  height: Math.ceil(Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0))
})
"#;

/// Live browser connection. Created once, reused for every request.
pub struct ChromeSession {
    browser: Browser,
    tab: Arc<Tab>,
}

/// Resolve an `http://host:port` debugging endpoint to the browser's
/// websocket URL. `ws://` URLs pass through.
pub async fn websocket_url(debug_url: &str) -> Result<String> {
    if debug_url.starts_with("ws://") || debug_url.starts_with("wss://") {
        return Ok(debug_url.to_string());
    }
    let version_url = format!("{}/json/version", debug_url.trim_end_matches('/'));
    let version: serde_json::Value = reqwest::get(&version_url)
        .await
        .with_context(|| format!("no Chrome debugging endpoint at {debug_url}"))?
        .json()
        .await
        .context("malformed /json/version reply")?;
    version["webSocketDebuggerUrl"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("/json/version has no webSocketDebuggerUrl"))
}

impl ChromeSession {
    /// Attach to a Chrome started with `--remote-debugging-port`, or launch
    /// one when `ws_url` is absent or unreachable.
    pub fn connect(ws_url: Option<String>) -> Result<Self> {
        let Some(ws_url) = ws_url else {
            return Self::launch();
        };
        info!(%ws_url, "attaching to existing Chrome");
        match Browser::connect(ws_url) {
            Ok(browser) => {
                let tab = {
                    let tabs = browser
                        .get_tabs()
                        .lock()
                        .map_err(|_| anyhow!("browser tab list lock poisoned"))?;
                    tabs.first().cloned()
                };
                let tab = match tab {
                    Some(tab) => tab,
                    None => {
                        debug!("no tabs found, creating one");
                        browser.new_tab()?
                    }
                };
                info!("attached to existing Chrome");
                Ok(Self { browser, tab })
            }
            Err(e) => {
                warn!(error = %e, "could not attach, launching a new Chrome");
                Self::launch()
            }
        }
    }

    fn launch() -> Result<Self> {
        let options = LaunchOptions {
            headless: false,
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
            ],
            idle_browser_timeout: std::time::Duration::from_secs(600),
            ..Default::default()
        };
        let browser = Browser::new(options).context("browser launch failed")?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome launched");
        Ok(Self { browser, tab })
    }

    /// The most recently opened page tab, falling back to the tab we attached with.
    fn active_tab(&self) -> ChromeTab {
        let tabs = self.browser.get_tabs().lock();
        let tab = match tabs {
            Ok(tabs) => tabs
                .iter()
                .rev()
                .find(|t| !t.get_url().starts_with("devtools://"))
                .cloned()
                .unwrap_or_else(|| self.tab.clone()),
            Err(_) => self.tab.clone(),
        };
        ChromeTab(tab)
    }
}

impl BrowserTab for ChromeSession {
    fn url(&self) -> Result<String> {
        self.active_tab().url()
    }

    fn title(&self) -> Result<String> {
        self.active_tab().title()
    }

    fn html(&self) -> Result<String> {
        self.active_tab().html()
    }

    fn capture_visible(&self) -> Result<Vec<u8>> {
        self.active_tab().capture_visible()
    }

    fn attach_debugger(&self) -> Result<()> {
        self.active_tab().attach_debugger()
    }

    fn layout_metrics(&self) -> Result<ContentSize> {
        self.active_tab().layout_metrics()
    }

    fn override_viewport(&self, size: ContentSize) -> Result<()> {
        self.active_tab().override_viewport(size)
    }

    fn capture_beyond_viewport(&self) -> Result<Vec<u8>> {
        self.active_tab().capture_beyond_viewport()
    }

    fn clear_viewport_override(&self) -> Result<()> {
        self.active_tab().clear_viewport_override()
    }

    fn detach_debugger(&self) -> Result<()> {
        self.active_tab().detach_debugger()
    }

    fn pinned(&self) -> Option<Arc<dyn BrowserTab>> {
        Some(Arc::new(self.active_tab()))
    }
}

/// One concrete Chrome tab.
pub struct ChromeTab(Arc<Tab>);

impl BrowserTab for ChromeTab {
    fn url(&self) -> Result<String> {
        Ok(self.0.get_url())
    }

    fn title(&self) -> Result<String> {
        Ok(self.0.get_title()?)
    }

    fn html(&self) -> Result<String> {
        Ok(self.0.get_content()?)
    }

    fn capture_visible(&self) -> Result<Vec<u8>> {
        Ok(self
            .0
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)?)
    }

    fn attach_debugger(&self) -> Result<()> {
        Ok(self.0.enable_debugger()?)
    }

    fn layout_metrics(&self) -> Result<ContentSize> {
        let result = self.0.evaluate(LAYOUT_JS, false)?;
        let raw = result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .ok_or_else(|| anyhow!("layout metrics script returned nothing"))?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn override_viewport(&self, size: ContentSize) -> Result<()> {
        self.0.call_method(Emulation::SetDeviceMetricsOverride {
            width: size.width,
            height: size.height,
            device_scale_factor: 1.0,
            mobile: false,
            scale: None,
            screen_width: None,
            screen_height: None,
            position_x: None,
            position_y: None,
            dont_set_visible_size: None,
            screen_orientation: None,
            viewport: None,
            display_feature: None,
            device_posture: None,
        })?;
        Ok(())
    }

    fn capture_beyond_viewport(&self) -> Result<Vec<u8>> {
        use base64::Engine as _;
        let shot = self.0.call_method(Page::CaptureScreenshot {
            format: Some(CaptureScreenshotFormatOption::Png),
            quality: None,
            clip: None,
            from_surface: Some(true),
            capture_beyond_viewport: Some(true),
            optimize_for_speed: None,
        })?;
        Ok(base64::engine::general_purpose::STANDARD.decode(shot.data)?)
    }

    fn clear_viewport_override(&self) -> Result<()> {
        self.0
            .call_method(Emulation::ClearDeviceMetricsOverride(None))?;
        Ok(())
    }

    fn detach_debugger(&self) -> Result<()> {
        Ok(self.0.disable_debugger()?)
    }
}
