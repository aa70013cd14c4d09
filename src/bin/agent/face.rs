use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use anyhow::{Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tab_assistant::Dispatcher;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// Work for the chat loop.
#[derive(Debug)]
pub enum ChatCommand {
    Message(String),
    Reset,
}

/// Events streamed to the browser via SSE.
#[derive(Clone, Debug)]
pub enum ChatEvent {
    /// A loading placeholder `id` is shown with `status`.
    Thinking { id: u64, status: &'static str },
    /// Reply `id` replaces placeholder `replaces`.
    Reply {
        id: u64,
        replaces: u64,
        html: String,
        screenshot: Option<String>,
    },
    Reset,
    Ready,
}

impl ChatEvent {
    fn to_sse_event(&self) -> Event {
        match self {
            ChatEvent::Thinking { id, status } => Event::default()
                .event("thinking")
                .data(json!({ "id": id, "status": status }).to_string()),
            ChatEvent::Reply {
                id,
                replaces,
                html,
                screenshot,
            } => Event::default().event("reply").data(
                json!({ "id": id, "replaces": replaces, "html": html, "screenshot": screenshot })
                    .to_string(),
            ),
            ChatEvent::Reset => Event::default().event("reset").data("{}"),
            ChatEvent::Ready => Event::default().event("ready").data("{}"),
        }
    }
}

/// Shared by the handlers and the chat loop.
pub struct AppState {
    pub cmd_tx: mpsc::Sender<ChatCommand>,
    pub event_tx: broadcast::Sender<ChatEvent>,
    /// Set while a message is being answered.
    pub busy: AtomicBool,
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Take the single in-flight slot. The chat loop releases it.
    fn claim(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

fn still_busy() -> (StatusCode, Json<Value>) {
    (
        StatusCode::CONFLICT,
        Json(json!({ "error": "Still answering the previous message" })),
    )
}

fn loop_stopped() -> (StatusCode, Json<Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "Chat loop has stopped" })),
    )
}

#[derive(Deserialize)]
struct ChatPayload {
    message: String,
}

/// Start the web server on the first free port from `first_port`.
pub async fn start_server(
    first_port: u16,
    dispatcher: Dispatcher,
) -> Result<(mpsc::Receiver<ChatCommand>, Arc<AppState>)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<ChatCommand>(1);
    let (event_tx, _) = broadcast::channel::<ChatEvent>(64);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx,
        busy: AtomicBool::new(false),
        dispatcher,
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/events", get(sse_handler))
        .route("/api/session", get(session_handler))
        .route("/api/session/reset", post(reset_handler))
        .route("/api/dispatch", post(dispatch_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state.clone());

    // Try the configured port, then the next nine
    let mut bound = None;
    for port in first_port..first_port.saturating_add(10) {
        match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                bound = Some((listener, port));
                break;
            }
            Err(e) => debug!(port, error = %e, "port unavailable"),
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!(
            "could not bind to any port {first_port}-{}; is another agent running?",
            first_port.saturating_add(9)
        )
    })?;

    info!("chat UI running at http://localhost:{port}");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "web server stopped");
        }
    });

    Ok((cmd_rx, state))
}

async fn index_handler() -> Html<&'static str> {
    debug!("GET /");
    Html(INDEX_HTML)
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatPayload>,
) -> (StatusCode, Json<Value>) {
    let message = payload.message.trim().to_string();
    if message.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "Empty message" })));
    }
    if !state.claim() {
        return still_busy();
    }

    debug!(%message, "POST /api/chat");
    if state.cmd_tx.send(ChatCommand::Message(message)).await.is_err() {
        state.busy.store(false, Ordering::Release);
        return loop_stopped();
    }
    (StatusCode::ACCEPTED, Json(json!({ "success": true })))
}

async fn reset_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    if !state.claim() {
        return still_busy();
    }
    if state.cmd_tx.send(ChatCommand::Reset).await.is_err() {
        state.busy.store(false, Ordering::Release);
        return loop_stopped();
    }
    (StatusCode::OK, Json(json!({ "success": true })))
}

async fn session_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    match state.dispatcher.storage().load_settings() {
        Ok(settings) => (
            StatusCode::OK,
            Json(json!({
                "autoAnalyze": settings.preferences.auto_analyze,
                "hasApiKey": !settings.gemini_api_key.trim().is_empty(),
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn dispatch_handler(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<Value>,
) -> Json<Value> {
    Json(state.dispatcher.handle_value(envelope).await)
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<ChatEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>AI Tab Assistant</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 20px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; flex: 1; }
  header .dot {
    width: 8px; height: 8px;
    border-radius: 50%;
    background: #22c55e;
    animation: pulse 2s infinite;
  }
  header .dot.busy { background: #f59e0b; }
  @keyframes pulse { 0%, 100% { opacity: 1; } 50% { opacity: 0.4; } }
  .main {
    flex: 1;
    display: flex;
    flex-direction: column;
    max-width: 800px;
    width: 100%;
    margin: 0 auto;
    padding: 24px 32px;
    gap: 12px;
    overflow: hidden;
  }
  #log {
    flex: 1;
    overflow-y: auto;
    display: flex;
    flex-direction: column;
    gap: 8px;
    padding-right: 8px;
  }
  #log::-webkit-scrollbar { width: 6px; }
  #log::-webkit-scrollbar-thumb { background: #333; border-radius: 3px; }
  .entry {
    padding: 10px 14px;
    border-radius: 8px;
    font-size: 14px;
    line-height: 1.5;
    animation: fadeIn 0.2s ease;
    overflow-wrap: anywhere;
  }
  @keyframes fadeIn { from { opacity: 0; transform: translateY(4px); } to { opacity: 1; } }
  .entry.user { background: #1a1a2e; border-left: 3px solid #6366f1; align-self: flex-end; }
  .entry.assistant { background: #111118; border-left: 3px solid #3b82f6; }
  .entry.thinking { background: #111118; border-left: 3px solid #f59e0b; color: #fcd34d; }
  .entry pre {
    background: #05050a;
    padding: 8px 10px;
    border-radius: 6px;
    overflow-x: auto;
    margin: 6px 0;
  }
  .entry code { font-family: 'Cascadia Code', 'Fira Code', monospace; font-size: 13px; }
  .entry a { color: #93c5fd; }
  .entry img { max-width: 100%; border-radius: 6px; margin-top: 8px; border: 1px solid #222; }
  .quick { display: flex; gap: 6px; flex-wrap: wrap; }
  .quick button { background: #1a1a2e; font-size: 13px; padding: 6px 12px; font-weight: 500; }
  .quick button:hover { background: #26264a; }
  .input-area { display: flex; gap: 8px; }
  #msg {
    flex: 1;
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 12px 16px;
    color: #fff;
    font-size: 15px;
    outline: none;
    resize: none;
    font-family: inherit;
  }
  #msg:focus { border-color: #6366f1; }
  #msg:disabled { opacity: 0.5; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 12px 24px;
    font-size: 15px;
    font-weight: 600;
    cursor: pointer;
    transition: background 0.2s;
  }
  button:hover { background: #4f46e5; }
  button:disabled { background: #333; cursor: not-allowed; }
  #reset { background: transparent; border: 1px solid #333; padding: 6px 14px; font-size: 13px; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>AI Tab Assistant</h1>
    <button id="reset" onclick="resetSession()">New chat</button>
  </header>
  <div class="main">
    <div id="log"></div>
    <div class="quick">
      <button onclick="quick('Describe this page')">🔍 Describe page</button>
      <button onclick="quick('Take a screenshot')">📸 Screenshot</button>
      <button onclick="quick('Generate test cases')">🧪 Test cases</button>
      <button onclick="quick('Create documentation')">📄 Documentation</button>
    </div>
    <div class="input-area">
      <textarea id="msg" rows="1" placeholder="Ask anything about the current tab..." autofocus></textarea>
      <button id="send" onclick="send()">Send</button>
    </div>
  </div>
<script>
  const log = document.getElementById('log');
  const msg = document.getElementById('msg');
  const sendBtn = document.getElementById('send');
  const dot = document.getElementById('status-dot');
  let busy = false;

  function escapeHtml(s) {
    return s.replace(/&/g,'&amp;').replace(/</g,'&lt;').replace(/>/g,'&gt;');
  }

  function addEntry(cls, html, id) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    if (id !== undefined) div.dataset.id = id;
    div.innerHTML = html;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
    return div;
  }

  function setBusy(b) {
    busy = b;
    msg.disabled = b;
    sendBtn.disabled = b;
    document.querySelectorAll('.quick button').forEach(x => x.disabled = b);
    dot.className = b ? 'dot busy' : 'dot';
    if (!b) msg.focus();
  }

  async function post(text) {
    if (!text || busy) return;
    addEntry('user', escapeHtml(text).replace(/\n/g, '<br>'));
    setBusy(true);
    const res = await fetch('/api/chat', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({message: text}),
    });
    if (!res.ok) {
      const body = await res.json().catch(() => ({}));
      addEntry('assistant', '❌ ' + escapeHtml(body.error || ('HTTP ' + res.status)));
      if (res.status !== 409) setBusy(false);
    }
  }

  function send() {
    const text = msg.value.trim();
    msg.value = '';
    post(text);
  }

  function quick(text) { post(text); }

  async function resetSession() {
    if (busy) return;
    setBusy(true);
    const r = await fetch('/api/session/reset', {method: 'POST'}).catch(() => null);
    if (!r || !r.ok) setBusy(false);
  }

  msg.addEventListener('keydown', e => {
    if (e.key === 'Enter' && !e.shiftKey) { e.preventDefault(); send(); }
  });

  const es = new EventSource('/api/events');

  es.addEventListener('thinking', e => {
    const d = JSON.parse(e.data);
    addEntry('thinking', escapeHtml(d.status), d.id);
  });

  es.addEventListener('reply', e => {
    const d = JSON.parse(e.data);
    const placeholder = log.querySelector('[data-id="' + d.replaces + '"]');
    if (placeholder) placeholder.remove();
    const div = addEntry('assistant', d.html, d.id);
    if (d.screenshot) {
      const img = document.createElement('img');
      img.src = d.screenshot;
      img.alt = 'Page screenshot';
      div.appendChild(img);
    }
  });

  es.addEventListener('reset', () => {
    log.innerHTML = '';
    greet();
  });

  es.addEventListener('ready', () => setBusy(false));

  async function greet() {
    addEntry('assistant', '👋 Ask me about the page open in your browser.');
    const session = await fetch('/api/session').then(r => r.json()).catch(() => ({}));
    if (session.hasApiKey === false) {
      addEntry('assistant', '⚠️ API key not found. Run <code>tab-assistant set-key &lt;KEY&gt;</code> first.');
    } else if (session.autoAnalyze) {
      post('Describe this page');
    }
  }

  greet();
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use tab_assistant::Storage;
    use tab_assistant::browser::{BrowserTab, ContentSize};

    struct NoTab;

    impl BrowserTab for NoTab {
        fn url(&self) -> Result<String> {
            bail!("no tab")
        }
        fn title(&self) -> Result<String> {
            bail!("no tab")
        }
        fn html(&self) -> Result<String> {
            bail!("no tab")
        }
        fn capture_visible(&self) -> Result<Vec<u8>> {
            bail!("no tab")
        }
        fn attach_debugger(&self) -> Result<()> {
            bail!("no tab")
        }
        fn layout_metrics(&self) -> Result<ContentSize> {
            bail!("no tab")
        }
        fn override_viewport(&self, _size: ContentSize) -> Result<()> {
            bail!("no tab")
        }
        fn capture_beyond_viewport(&self) -> Result<Vec<u8>> {
            bail!("no tab")
        }
        fn clear_viewport_override(&self) -> Result<()> {
            bail!("no tab")
        }
        fn detach_debugger(&self) -> Result<()> {
            bail!("no tab")
        }
    }

    fn state() -> (tempfile::TempDir, mpsc::Receiver<ChatCommand>, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let (event_tx, _) = broadcast::channel(8);
        let state = Arc::new(AppState {
            cmd_tx,
            event_tx,
            busy: AtomicBool::new(false),
            dispatcher: Dispatcher::new(Arc::new(NoTab), storage),
        });
        (dir, cmd_rx, state)
    }

    fn message(text: &str) -> Json<ChatPayload> {
        Json(ChatPayload {
            message: text.into(),
        })
    }

    #[tokio::test]
    async fn chat_while_reset_is_pending_is_refused() {
        let (_dir, mut cmd_rx, state) = state();

        let (status, _) = reset_handler(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = chat_handler(State(state.clone()), message("hello")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        assert!(matches!(cmd_rx.recv().await, Some(ChatCommand::Reset)));
        assert!(cmd_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_chat_is_refused_until_released() {
        let (_dir, mut cmd_rx, state) = state();

        let (status, _) = chat_handler(State(state.clone()), message("one")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (status, _) = chat_handler(State(state.clone()), message("two")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = reset_handler(State(state.clone())).await;
        assert_eq!(status, StatusCode::CONFLICT);

        assert!(matches!(cmd_rx.recv().await, Some(ChatCommand::Message(m)) if m == "one"));
        state.busy.store(false, Ordering::Release);
        let (status, _) = chat_handler(State(state.clone()), message("two")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn stopped_loop_releases_the_slot() {
        let (_dir, cmd_rx, state) = state();
        drop(cmd_rx);

        let (status, _) = reset_handler(State(state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!state.busy.load(Ordering::Acquire));
    }
}
