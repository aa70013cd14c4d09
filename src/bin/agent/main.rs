mod face;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Result, anyhow};
use clap::Parser;
use dotenvy::dotenv;
use face::{AppState, ChatCommand, ChatEvent};
use tab_assistant::browser::{self, ChromeSession};
use tab_assistant::config::{self, Config};
use tab_assistant::render::TranscriptEntry;
use tab_assistant::{ChatSession, Composer, Dispatcher, GeminiClient, Intent, TextGenerator};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "agent", version, about = "Chat with an LLM about your current browser tab")]
struct Cli {
    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    config::init_tracing();
    let cli = Cli::parse();

    info!("starting tab assistant");
    let storage = cli.config.open_storage()?;
    if storage.ensure_defaults()? {
        info!(dir = %storage.dir().display(), "created default settings");
    }
    if storage.load_settings()?.gemini_api_key.trim().is_empty() {
        warn!("no API key yet; run `tab-assistant set-key <KEY>` or set GEMINI_API_KEY");
    }

    // 1. Attach to the user's Chrome (launching one if needed)
    let ws_url = match browser::websocket_url(&cli.config.chrome_url).await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(error = %e, "no debuggable Chrome found");
            None
        }
    };
    let session = tokio::task::spawn_blocking(move || ChromeSession::connect(ws_url))
        .await
        .map_err(|e| anyhow!("browser connection panicked: {e}"))??;
    let dispatcher = Dispatcher::new(Arc::new(session), storage);

    // 2. Serve the chat UI
    let (mut cmd_rx, state) = face::start_server(cli.config.port, dispatcher.clone()).await?;

    let generator = GeminiClient::new().with_model(cli.config.model.clone());
    let composer = Composer::new(generator, dispatcher);
    let mut chat = ChatSession::new();
    info!("ready, waiting for messages");

    // 3. Answer messages one at a time
    while let Some(command) = cmd_rx.recv().await {
        match command {
            ChatCommand::Message(message) => {
                answer(&composer, &mut chat, &message, &state).await;
            }
            ChatCommand::Reset => {
                info!("session reset");
                chat = ChatSession::new();
                let _ = state.event_tx.send(ChatEvent::Reset);
            }
        }
        state.busy.store(false, Ordering::Release);
        let _ = state.event_tx.send(ChatEvent::Ready);
    }

    Ok(())
}

async fn answer<G: TextGenerator>(
    composer: &Composer<G>,
    chat: &mut ChatSession,
    message: &str,
    state: &AppState,
) {
    let loading = chat.begin(message);
    let _ = state.event_tx.send(ChatEvent::Thinking {
        id: loading,
        status: Intent::classify(message).status(),
    });

    let reply = composer.respond(chat.conversation(), message).await;
    info!(intent = reply.intent.name(), chars = reply.text.len(), "replied");

    if let TranscriptEntry::Message {
        id,
        html,
        screenshot,
        ..
    } = chat.finish(loading, message, reply)
    {
        let _ = state.event_tx.send(ChatEvent::Reply {
            id: *id,
            replaces: loading,
            html: html.clone(),
            screenshot: screenshot.clone(),
        });
    }
}
