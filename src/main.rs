use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tab_assistant::config::{self, Config};
use tab_assistant::model::validate_api_key;
use tab_assistant::storage::{ExportDocument, HistoryKind, Settings, Storage};
use tracing::info;

#[derive(Parser)]
#[command(name = "tab-assistant", version, about = "Settings and history for the tab assistant")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store the Gemini API key
    SetKey {
        key: String,
    },
    /// Show current settings
    Settings {
        /// Print the raw JSON document
        #[arg(long)]
        json: bool,
    },
    /// Change one setting, e.g. `set features.screenshots false`
    Set {
        /// Dotted path under features, preferences or advancedSettings
        path: String,
        value: String,
    },
    /// List saved analyses (newest first)
    History {
        /// List screenshot captures instead
        #[arg(long)]
        screenshots: bool,
    },
    /// Delete analysis and screenshot history
    ClearHistory,
    /// Write settings and history as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replace settings and history from an export file
    Import {
        file: PathBuf,
    },
    /// Restore default settings, keeping the API key
    Reset,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    config::init_tracing();

    let cli = Cli::parse();
    let storage = cli.config.open_storage()?;
    if storage.ensure_defaults()? {
        info!(dir = %storage.dir().display(), "created default settings");
    }

    match cli.cmd {
        Command::SetKey { key } => {
            let key = key.trim().to_string();
            validate_api_key(&key)?;
            let mut settings = storage.load_settings()?;
            settings.gemini_api_key = key;
            storage.save_settings(&settings)?;
            println!("API key saved.");
            return Ok(());
        }
        Command::Settings { json } => {
            let settings = storage.load_settings()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&masked(settings))?);
            } else {
                print_settings(&masked(settings));
            }
        }
        Command::Set { path, value } => {
            let settings = set_field(&storage.load_settings()?, &path, &value)?;
            storage.save_settings(&settings)?;
            println!("{path} = {value}");
        }
        Command::History { screenshots } => {
            let kind = if screenshots {
                HistoryKind::Screenshots
            } else {
                HistoryKind::Analysis
            };
            let entries = storage.history(kind)?;
            if entries.is_empty() {
                println!("No history.");
            }
            for entry in entries {
                let field = |key: &str| entry.data.get(key).and_then(Value::as_str).unwrap_or("");
                let label = if screenshots {
                    if entry.data.get("fullPage").and_then(Value::as_bool) == Some(true) {
                        "full page"
                    } else {
                        "visible"
                    }
                } else {
                    field("intent")
                };
                println!("{}  [{label}]  {}  {}", entry.timestamp, field("title"), field("url"));
            }
        }
        Command::ClearHistory => {
            storage.clear_history(HistoryKind::Analysis)?;
            storage.clear_history(HistoryKind::Screenshots)?;
            println!("History cleared.");
        }
        Command::Export { out } => {
            let json = serde_json::to_string_pretty(&storage.export()?)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("could not write {}", path.display()))?;
                    println!("Exported to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        Command::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("could not read {}", file.display()))?;
            let document: ExportDocument = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not an export file", file.display()))?;
            storage.import(&document)?;
            println!(
                "Imported settings, {} analyses and {} screenshots.",
                document.history.len(),
                document.screenshots.len()
            );
        }
        Command::Reset => {
            let current = storage.load_settings()?;
            storage.save_settings(&Settings {
                gemini_api_key: current.gemini_api_key,
                ..Settings::default()
            })?;
            println!("Settings reset to defaults.");
        }
    }

    key_hint(&storage)
}

/// First-run nudge when no usable key is configured.
fn key_hint(storage: &Storage) -> Result<()> {
    if storage.load_settings()?.gemini_api_key.trim().is_empty() {
        eprintln!("No API key yet. Run `tab-assistant set-key <KEY>` or set GEMINI_API_KEY.");
    }
    Ok(())
}

fn masked(mut settings: Settings) -> Settings {
    let key = settings.gemini_api_key.trim();
    if key.chars().count() > 8 {
        let chars: Vec<char> = key.chars().collect();
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        settings.gemini_api_key = format!("{head}…{tail}");
    }
    settings
}

fn print_settings(settings: &Settings) {
    let key = if settings.gemini_api_key.is_empty() {
        "(not set)"
    } else {
        settings.gemini_api_key.as_str()
    };
    println!("apiKey                          {key}");
    println!("version                         {}", settings.version);
    let f = &settings.features;
    println!("features.screenshots            {}", f.screenshots);
    println!("features.pageAnalysis           {}", f.page_analysis);
    println!("features.testGeneration         {}", f.test_generation);
    println!("features.documentation          {}", f.documentation);
    let p = &settings.preferences;
    println!("preferences.autoAnalyze         {}", p.auto_analyze);
    println!("preferences.detailedReports     {}", p.detailed_reports);
    println!("preferences.saveHistory         {}", p.save_history);
    let a = &settings.advanced_settings;
    println!("advancedSettings.temperature    {}", a.temperature);
    println!("advancedSettings.maxTokens      {}", a.max_tokens);
}

const SETTABLE_SECTIONS: &[&str] = &["features", "preferences", "advancedSettings"];

/// Apply `path = raw` to a copy of `settings`. The value must have the
/// field's existing JSON type.
fn set_field(settings: &Settings, path: &str, raw: &str) -> Result<Settings> {
    let Some((section, field)) = path.split_once('.') else {
        bail!("expected <section>.<field>, got `{path}`");
    };
    if !SETTABLE_SECTIONS.contains(&section) {
        bail!("unknown section `{section}` (expected one of {})", SETTABLE_SECTIONS.join(", "));
    }

    let mut doc = serde_json::to_value(settings)?;
    let slot = doc
        .get_mut(section)
        .and_then(|s| s.get_mut(field))
        .with_context(|| format!("unknown setting `{path}`"))?;

    *slot = match slot {
        Value::Bool(_) => Value::Bool(
            raw.parse::<bool>()
                .with_context(|| format!("`{path}` takes true or false"))?,
        ),
        Value::Number(_) => match raw.parse::<u64>() {
            Ok(n) => Value::from(n),
            Err(_) => {
                let n: f64 = raw
                    .parse()
                    .with_context(|| format!("`{path}` takes a number"))?;
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .with_context(|| format!("`{raw}` is not a finite number"))?
            }
        },
        _ => Value::String(raw.to_string()),
    };

    let mut updated: Settings = serde_json::from_value(doc)
        .with_context(|| format!("`{raw}` is not a valid value for `{path}`"))?;
    updated.advanced_settings.temperature = updated.advanced_settings.temperature.clamp(0.0, 1.0);
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_field_updates_flags_and_numbers() {
        let settings = Settings::default();
        let s = set_field(&settings, "features.screenshots", "false").unwrap();
        assert!(!s.features.screenshots);
        let s = set_field(&s, "advancedSettings.temperature", "0.3").unwrap();
        assert!((s.advanced_settings.temperature - 0.3).abs() < f32::EPSILON);
        let s = set_field(&s, "advancedSettings.maxTokens", "1024").unwrap();
        assert_eq!(s.advanced_settings.max_tokens, 1024);
        assert!(!s.features.screenshots);
    }

    #[test]
    fn set_field_rejects_bad_input() {
        let settings = Settings::default();
        assert!(set_field(&settings, "features.screenshots", "maybe").is_err());
        assert!(set_field(&settings, "features.teleport", "true").is_err());
        assert!(set_field(&settings, "geminiApiKey", "x").is_err());
        assert!(set_field(&settings, "advancedSettings.maxTokens", "1.5").is_err());
    }

    #[test]
    fn masked_key_keeps_prefix_and_tail() {
        let settings = Settings {
            gemini_api_key: "AIzaSyA-test-key-0123456789abcd".into(),
            ..Default::default()
        };
        assert_eq!(masked(settings).gemini_api_key, "AIza…abcd");
    }
}
