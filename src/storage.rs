//! Settings and history persistence.
//!
//! Two scopes, each one JSON object on disk: `sync.json` holds user settings
//! and `local.json` holds capture/analysis history. Every read and write loads
//! or replaces a whole file, so concurrent writers race with last-writer-wins.

use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::StorageError;

pub const SETTINGS_VERSION: &str = "1.0.0";
pub const SETTINGS_KEY: &str = "settings";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Sync,
    Local,
}

impl Scope {
    fn file_name(self) -> &'static str {
        match self {
            Scope::Sync => "sync.json",
            Scope::Local => "local.json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub gemini_api_key: String,
    pub version: String,
    pub features: Features,
    pub preferences: Preferences,
    pub advanced_settings: AdvancedSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            version: SETTINGS_VERSION.to_string(),
            features: Features::default(),
            preferences: Preferences::default(),
            advanced_settings: AdvancedSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Features {
    pub screenshots: bool,
    pub page_analysis: bool,
    pub test_generation: bool,
    pub documentation: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            screenshots: true,
            page_analysis: true,
            test_generation: true,
            documentation: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub auto_analyze: bool,
    pub detailed_reports: bool,
    pub save_history: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            auto_analyze: false,
            detailed_reports: true,
            save_history: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvancedSettings {
    /// Sampling temperature, 0.0 to 1.0.
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryKind {
    Analysis,
    Screenshots,
}

impl HistoryKind {
    pub fn key(self) -> &'static str {
        match self {
            HistoryKind::Analysis => "analysisHistory",
            HistoryKind::Screenshots => "screenshotHistory",
        }
    }

    pub fn cap(self) -> usize {
        match self {
            HistoryKind::Analysis => 50,
            HistoryKind::Screenshots => 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub timestamp: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: String,
    pub export_date: String,
    pub settings: Settings,
    pub history: Vec<HistoryEntry>,
    pub screenshots: Vec<HistoryEntry>,
}

/// File-backed key-value store with a synchronized and a local scope.
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
    api_key_override: Option<String>,
}

impl Storage {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            dir,
            api_key_override: None,
        })
    }

    /// Use `key` instead of the stored API key for this process. Never persisted.
    pub fn with_api_key_override(mut self, key: Option<String>) -> Self {
        self.api_key_override = key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, scope: Scope) -> PathBuf {
        self.dir.join(scope.file_name())
    }

    fn load_scope(&self, scope: Scope) -> Result<Map<String, Value>, StorageError> {
        let path = self.path(scope);
        if !path.exists() {
            return Ok(Map::new());
        }
        let file = std::fs::File::open(&path).map_err(|source| StorageError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|source| StorageError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    fn save_scope(&self, scope: Scope, values: &Map<String, Value>) -> Result<(), StorageError> {
        let path = self.path(scope);
        let tmp = path.with_extension("json.tmp");
        let io_err = |source| StorageError::Io {
            path: path.display().to_string(),
            source,
        };

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(io_err)?;
        serde_json::to_writer_pretty(file, values).map_err(|source| StorageError::Json {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(io_err)?;
        Ok(())
    }

    pub fn get(&self, scope: Scope, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.load_scope(scope)?.remove(key))
    }

    pub fn set(&self, scope: Scope, key: &str, value: Value) -> Result<(), StorageError> {
        let mut values = self.load_scope(scope)?;
        values.insert(key.to_string(), value);
        debug!(?scope, key, "storage write");
        self.save_scope(scope, &values)
    }

    pub fn remove(&self, scope: Scope, key: &str) -> Result<(), StorageError> {
        let mut values = self.load_scope(scope)?;
        if values.remove(key).is_some() {
            self.save_scope(scope, &values)?;
        }
        Ok(())
    }

    /// Settings as stored, with defaults for anything missing. The API key
    /// override, if any, replaces the stored key.
    pub fn load_settings(&self) -> Result<Settings, StorageError> {
        let mut settings = self.stored_settings()?;
        if let Some(key) = &self.api_key_override {
            settings.gemini_api_key = key.clone();
        }
        Ok(settings)
    }

    fn stored_settings(&self) -> Result<Settings, StorageError> {
        match self.get(Scope::Sync, SETTINGS_KEY)? {
            Some(value) => serde_json::from_value(value).map_err(|source| StorageError::Json {
                path: self.path(Scope::Sync).display().to_string(),
                source,
            }),
            None => Ok(Settings::default()),
        }
    }

    /// Persist `settings`. A key equal to the process override is not
    /// written; the stored key is kept instead.
    pub fn save_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        let mut settings = settings.clone();
        if self.api_key_override.as_deref() == Some(settings.gemini_api_key.as_str()) {
            settings.gemini_api_key = self.stored_settings()?.gemini_api_key;
        }
        let value = serde_json::to_value(&settings).map_err(|source| StorageError::Json {
            path: self.path(Scope::Sync).display().to_string(),
            source,
        })?;
        self.set(Scope::Sync, SETTINGS_KEY, value)
    }

    /// Write default settings if none exist yet. Returns true on first run.
    pub fn ensure_defaults(&self) -> Result<bool, StorageError> {
        if self.get(Scope::Sync, SETTINGS_KEY)?.is_some() {
            return Ok(false);
        }
        self.save_settings(&Settings::default())?;
        Ok(true)
    }

    /// Newest first.
    pub fn history(&self, kind: HistoryKind) -> Result<Vec<HistoryEntry>, StorageError> {
        match self.get(Scope::Local, kind.key())? {
            Some(value) => serde_json::from_value(value).map_err(|source| StorageError::Json {
                path: self.path(Scope::Local).display().to_string(),
                source,
            }),
            None => Ok(Vec::new()),
        }
    }

    fn save_history(&self, kind: HistoryKind, entries: &[HistoryEntry]) -> Result<(), StorageError> {
        let value = serde_json::to_value(entries).map_err(|source| StorageError::Json {
            path: self.path(Scope::Local).display().to_string(),
            source,
        })?;
        self.set(Scope::Local, kind.key(), value)
    }

    /// Prepend an entry built from `data`, dropping the oldest past the cap.
    pub fn append_history(
        &self,
        kind: HistoryKind,
        data: Map<String, Value>,
    ) -> Result<HistoryEntry, StorageError> {
        let mut entries = self.history(kind)?;
        let now = Utc::now();
        let mut id = now.timestamp_millis();
        if let Some(newest) = entries.first() {
            if id <= newest.id {
                id = newest.id + 1;
            }
        }
        let entry = HistoryEntry {
            id,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            data,
        };
        entries.insert(0, entry.clone());
        entries.truncate(kind.cap());
        self.save_history(kind, &entries)?;
        Ok(entry)
    }

    pub fn clear_history(&self, kind: HistoryKind) -> Result<(), StorageError> {
        self.remove(Scope::Local, kind.key())
    }

    /// Stored settings (never the process override) plus both history lists.
    pub fn export(&self) -> Result<ExportDocument, StorageError> {
        Ok(ExportDocument {
            version: SETTINGS_VERSION.to_string(),
            export_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            settings: self.stored_settings()?,
            history: self.history(HistoryKind::Analysis)?,
            screenshots: self.history(HistoryKind::Screenshots)?,
        })
    }

    /// Replace settings and both history lists with the exported ones.
    pub fn import(&self, document: &ExportDocument) -> Result<(), StorageError> {
        self.save_settings(&document.settings)?;
        self.save_history(HistoryKind::Analysis, &document.history)?;
        self.save_history(HistoryKind::Screenshots, &document.screenshots)?;
        Ok(())
    }
}
