mod common;

use common::{SHOP_HTML, ScriptedTab, dispatcher};
use serde_json::{Value, json};
use tab_assistant::storage::HistoryKind;

fn links_page(links: usize, headings: usize) -> String {
    let mut html = String::from("<html><body>");
    for i in 0..headings {
        html.push_str(&format!("<h2>Heading {i}</h2>"));
    }
    for i in 0..links {
        html.push_str(&format!("<a href=\"/page/{i}\">Link {i}</a>"));
    }
    html.push_str("</body></html>");
    html
}

#[tokio::test]
async fn unknown_action_gets_error_reply() {
    let (_dir, _tab, dispatcher) = dispatcher(ScriptedTab::new("https://acme.test", SHOP_HTML));
    let reply = dispatcher.handle_value(json!({ "action": "launchRocket" })).await;
    assert_eq!(reply, json!({ "error": "Unknown action" }));

    let reply = dispatcher.handle_value(json!({ "payload": 1 })).await;
    assert_eq!(reply, json!({ "error": "Unknown action" }));
}

#[tokio::test]
async fn malformed_payload_is_reported() {
    let (_dir, _tab, dispatcher) = dispatcher(ScriptedTab::new("https://acme.test", SHOP_HTML));
    let reply = dispatcher
        .handle_value(json!({ "action": "getHistory", "kind": "everything" }))
        .await;
    let error = reply["error"].as_str().unwrap();
    assert!(error.starts_with("Invalid request"), "{error}");
}

#[tokio::test]
async fn legacy_type_envelope_reads_page_text() {
    let (_dir, _tab, dispatcher) = dispatcher(ScriptedTab::new("https://acme.test", SHOP_HTML));
    let reply = dispatcher.handle_value(json!({ "type": "GET_PAGE_TEXT" })).await;
    let text = reply["text"].as_str().unwrap();
    assert!(text.contains("Rocket Skates"));
    assert!(text.contains("complimentary helmet"));
}

#[tokio::test]
async fn full_page_info_has_every_section() {
    let (_dir, _tab, dispatcher) = dispatcher(ScriptedTab::new("https://acme.test/skates", SHOP_HTML));
    let reply = dispatcher.handle_value(json!({ "action": "getFullPageInfo" })).await;

    assert_eq!(reply["metadata"]["title"], "Acme Shop");
    assert_eq!(reply["metadata"]["url"], "https://acme.test/skates");
    assert_eq!(reply["metadata"]["language"], "en");
    assert_eq!(reply["structure"]["headings"][0]["text"], "Rocket Skates");
    assert_eq!(reply["structure"]["forms"][0]["method"], "post");
    assert_eq!(reply["structure"]["forms"][0]["inputs"][0]["label"], "Quantity");
    assert_eq!(reply["testableElements"]["buttons"][0]["text"], "Add to cart");
    assert_eq!(reply["testableElements"]["inputs"][0]["required"], true);
    assert!(reply["text"].as_str().unwrap().contains("coyote"));
}

#[tokio::test]
async fn structure_lists_obey_caps() {
    let html = links_page(100, 60);
    let (_dir, _tab, dispatcher) = dispatcher(ScriptedTab::new("https://acme.test", &html));
    let reply = dispatcher.handle_value(json!({ "action": "getPageStructure" })).await;
    assert_eq!(reply["links"].as_array().unwrap().len(), 30);
    assert_eq!(reply["headings"].as_array().unwrap().len(), 50);

    let reply = dispatcher.handle_value(json!({ "action": "getTestableElements" })).await;
    assert_eq!(reply["clickableElements"].as_array().unwrap().len(), 20);
}

#[tokio::test]
async fn article_text_beats_fallback_blocks() {
    let article = "Coyotes have been observed purchasing rocket equipment in bulk. ".repeat(3);
    let html = format!(
        "<html><body><div>A sidebar block that is definitely long enough.</div>\
         <article>{article}</article></body></html>"
    );
    let (_dir, _tab, dispatcher) = dispatcher(ScriptedTab::new("https://acme.test", &html));
    let reply = dispatcher.handle_value(json!({ "action": "getPageText" })).await;
    let text = reply["text"].as_str().unwrap();
    assert_eq!(text, article.trim());
    assert!(!text.contains("sidebar"));
}

#[tokio::test]
async fn capture_returns_data_url_and_records_history() {
    let (_dir, _tab, dispatcher) = dispatcher(ScriptedTab::new("https://acme.test", SHOP_HTML));
    let reply = dispatcher.handle_value(json!({ "action": "captureScreenshot" })).await;

    let screenshot = reply["screenshot"].as_str().unwrap();
    assert!(screenshot.starts_with("data:image/png;base64,"));
    assert_eq!(reply["fullPage"], false);
    assert_eq!(reply["url"], "https://acme.test");

    let history = dispatcher.storage().history(HistoryKind::Screenshots).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].data["url"], "https://acme.test");
}

#[tokio::test]
async fn restricted_page_capture_fails_without_touching_the_tab() {
    let (_dir, tab, dispatcher) = dispatcher(ScriptedTab::new("chrome://settings", ""));
    for action in ["captureScreenshot", "captureFullPage"] {
        let reply = dispatcher.handle_value(json!({ "action": action })).await;
        let error = reply["error"].as_str().unwrap();
        assert!(error.contains("chrome://settings"), "{error}");
    }
    assert!(tab.calls().is_empty());
    assert!(dispatcher.storage().history(HistoryKind::Screenshots).unwrap().is_empty());
}

#[tokio::test]
async fn full_page_capture_detaches_after_failed_override() {
    let tab = ScriptedTab::new("https://acme.test", SHOP_HTML).failing("override");
    let (_dir, tab, dispatcher) = dispatcher(tab);
    let reply = dispatcher.handle_value(json!({ "action": "captureFullPage" })).await;

    assert!(reply["error"].as_str().unwrap().contains("viewport override"));
    assert_eq!(tab.calls(), vec!["attach", "metrics", "override", "clear", "detach"]);
}

#[tokio::test]
async fn full_page_capture_succeeds() {
    let (_dir, tab, dispatcher) = dispatcher(ScriptedTab::new("https://acme.test", SHOP_HTML));
    let reply = dispatcher.handle_value(json!({ "action": "captureFullPage" })).await;
    assert_eq!(reply["fullPage"], true);
    assert_eq!(reply["mimeType"], "image/png");
    assert_eq!(tab.calls(), vec!["attach", "metrics", "override", "capture", "clear", "detach"]);
}

#[tokio::test]
async fn disabled_screenshots_are_refused() {
    let (_dir, tab, dispatcher) = dispatcher(ScriptedTab::new("https://acme.test", SHOP_HTML));
    let mut settings = dispatcher.storage().load_settings().unwrap();
    settings.features.screenshots = false;
    dispatcher.storage().save_settings(&settings).unwrap();

    let reply = dispatcher.handle_value(json!({ "action": "captureScreenshot" })).await;
    assert!(reply["error"].as_str().unwrap().contains("disabled"));
    assert!(tab.calls().is_empty());
}

#[tokio::test]
async fn settings_round_trip_through_envelopes() {
    let (_dir, _tab, dispatcher) = dispatcher(ScriptedTab::new("https://acme.test", SHOP_HTML));
    let mut settings = dispatcher.handle_value(json!({ "action": "getSettings" })).await;
    assert_eq!(settings["advancedSettings"]["maxTokens"], 2048);

    settings["preferences"]["autoAnalyze"] = Value::Bool(true);
    let reply = dispatcher
        .handle_value(json!({ "action": "saveSettings", "settings": settings }))
        .await;
    assert_eq!(reply, json!({ "success": true }));

    let reloaded = dispatcher.handle_value(json!({ "action": "getSettings" })).await;
    assert_eq!(reloaded["preferences"]["autoAnalyze"], true);
}

#[tokio::test]
async fn analysis_history_keeps_newest_fifty() {
    let (_dir, _tab, dispatcher) = dispatcher(ScriptedTab::new("https://acme.test", SHOP_HTML));
    for n in 0..51 {
        let reply = dispatcher
            .handle_value(json!({ "action": "saveAnalysis", "data": { "title": format!("run {n}") } }))
            .await;
        assert!(reply["entry"]["id"].is_i64());
    }

    let reply = dispatcher
        .handle_value(json!({ "action": "getHistory", "kind": "analysis" }))
        .await;
    let entries = reply["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 50);
    assert_eq!(entries[0]["title"], "run 50");
    assert_eq!(entries[49]["title"], "run 1");

    let reply = dispatcher
        .handle_value(json!({ "action": "clearHistory", "kind": "analysis" }))
        .await;
    assert_eq!(reply, json!({ "success": true }));
    assert!(dispatcher.storage().history(HistoryKind::Analysis).unwrap().is_empty());
}

#[tokio::test]
async fn page_read_failure_is_an_error_reply() {
    let tab = ScriptedTab::new("https://acme.test", SHOP_HTML).failing("html");
    let (_dir, _tab, dispatcher) = dispatcher(tab);
    let reply = dispatcher.handle_value(json!({ "action": "getPageMetadata" })).await;
    assert!(reply["error"].as_str().unwrap().contains("html refused"));
}
