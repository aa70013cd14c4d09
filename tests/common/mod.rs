#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use tab_assistant::browser::{BrowserTab, ContentSize};
use tab_assistant::{Dispatcher, Storage};
use tempfile::TempDir;

pub const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, b'I', b'H', b'D', b'R'];

pub const API_KEY: &str = "AIzaSyA-integration-key-0123456789";

/// A tab that serves fixed HTML and records every protocol step.
pub struct ScriptedTab {
    pub url: String,
    pub title: String,
    pub html: String,
    pub image: Vec<u8>,
    pub fail: Option<&'static str>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedTab {
    pub fn new(url: &str, html: &str) -> Self {
        Self {
            url: url.into(),
            title: "Scripted page".into(),
            html: html.into(),
            image: PNG.to_vec(),
            fail: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, step: &'static str) -> Self {
        self.fail = Some(step);
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn step(&self, name: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(name);
        if self.fail == Some(name) {
            bail!("{name} refused by browser");
        }
        Ok(())
    }
}

impl BrowserTab for ScriptedTab {
    fn url(&self) -> Result<String> {
        Ok(self.url.clone())
    }

    fn title(&self) -> Result<String> {
        Ok(self.title.clone())
    }

    fn html(&self) -> Result<String> {
        self.step("html")?;
        Ok(self.html.clone())
    }

    fn capture_visible(&self) -> Result<Vec<u8>> {
        self.step("visible")?;
        Ok(self.image.clone())
    }

    fn attach_debugger(&self) -> Result<()> {
        self.step("attach")
    }

    fn layout_metrics(&self) -> Result<ContentSize> {
        self.step("metrics")?;
        Ok(ContentSize {
            width: 1280,
            height: 5000,
        })
    }

    fn override_viewport(&self, _size: ContentSize) -> Result<()> {
        self.step("override")
    }

    fn capture_beyond_viewport(&self) -> Result<Vec<u8>> {
        self.step("capture")?;
        Ok(self.image.clone())
    }

    fn clear_viewport_override(&self) -> Result<()> {
        self.step("clear")
    }

    fn detach_debugger(&self) -> Result<()> {
        self.step("detach")
    }
}

/// Storage in a fresh temp dir, with defaults and a valid key.
pub fn storage() -> (TempDir, Storage) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(dir.path()).unwrap();
    let mut settings = storage.load_settings().unwrap();
    settings.gemini_api_key = API_KEY.into();
    storage.save_settings(&settings).unwrap();
    (dir, storage)
}

pub fn dispatcher(tab: ScriptedTab) -> (TempDir, Arc<ScriptedTab>, Dispatcher) {
    let (dir, storage) = storage();
    let tab = Arc::new(tab);
    let dispatcher = Dispatcher::new(tab.clone(), storage);
    (dir, tab, dispatcher)
}

pub const SHOP_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <title>Acme Shop</title>
  <meta name="description" content="Everything for the road runner hunter">
</head>
<body>
  <nav aria-label="Primary"><a href="/">Home</a><a href="/cart">Cart</a></nav>
  <main>
    <h1>Rocket Skates</h1>
    <p>Acme rocket skates reach speeds previously thought impossible for a coyote on foot.</p>
    <p>Each pair ships with a complimentary helmet and a waiver of limited usefulness.</p>
    <form action="/cart" method="post">
      <label for="qty">Quantity</label>
      <input id="qty" name="qty" type="number" required min="1">
      <button type="submit">Add to cart</button>
    </form>
  </main>
</body>
</html>"#;
