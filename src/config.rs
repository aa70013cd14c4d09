//! Process configuration shared by both binaries.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use tracing_subscriber::EnvFilter;

use crate::model::DEFAULT_MODEL;
use crate::storage::Storage;

const APP_DIR: &str = "tab-assistant";

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Where settings and history are kept.
    #[arg(long, env = "TAB_ASSISTANT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Remote debugging endpoint of the Chrome to attach to.
    #[arg(
        long,
        env = "CHROME_DEBUG_URL",
        default_value = "http://127.0.0.1:9222",
        global = true
    )]
    pub chrome_url: String,

    /// First port tried by the chat UI.
    #[arg(long, env = "TAB_ASSISTANT_PORT", default_value_t = 3000, global = true)]
    pub port: u16,

    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL, global = true)]
    pub model: String,

    /// Overrides the stored key for this process; never written to disk.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,
}

impl Config {
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_local_dir()
                .map(|dir| dir.join(APP_DIR))
                .ok_or_else(|| anyhow!("no local data directory; pass --data-dir")),
        }
    }

    pub fn open_storage(&self) -> Result<Storage> {
        let dir = self.data_dir()?;
        let storage = Storage::open(&dir)
            .with_context(|| format!("could not open storage at {}", dir.display()))?;
        let key = self.api_key.clone().filter(|k| !k.trim().is_empty());
        Ok(storage.with_api_key_override(key))
    }
}

/// Log to stderr; `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: Config,
    }

    #[test]
    fn explicit_data_dir_wins() {
        let cli = Cli::parse_from(["test", "--data-dir", "/tmp/tab-assistant-test", "--port", "4000"]);
        assert_eq!(
            cli.config.data_dir().unwrap(),
            PathBuf::from("/tmp/tab-assistant-test")
        );
        assert_eq!(cli.config.port, 4000);
    }

    #[test]
    fn key_override_reaches_settings() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "test",
            "--data-dir",
            dir.path().to_str().unwrap(),
            "--api-key",
            "AIzaSyA-override-key-0123456789abc",
        ]);
        let storage = cli.config.open_storage().unwrap();
        assert_eq!(
            storage.load_settings().unwrap().gemini_api_key,
            "AIzaSyA-override-key-0123456789abc"
        );
        assert_eq!(storage.export().unwrap().settings.gemini_api_key, "");
    }
}
