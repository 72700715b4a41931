//! Control-surface round-trips over a real localhost socket.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chatpeek::browser::{BrowserTab, RawSnapshot};
use chatpeek::config::WatchConfig;
use chatpeek::control::ControlServer;
use chatpeek::error::BrowserError;
use chatpeek::locator;
use chatpeek::page::PageSnapshot;
use chatpeek::platform::{self, Platform};
use chatpeek::settings::SettingsStore;
use chatpeek::watcher::SessionPhase;
use chatpeek::AppState;

struct StaticTab;

#[async_trait]
impl BrowserTab for StaticTab {
    async fn snapshot(&self) -> Result<RawSnapshot, BrowserError> {
        Ok(RawSnapshot {
            url: "about:blank".to_string(),
            html: "<html><body></body></html>".to_string(),
        })
    }
}

async fn start_server() -> (
    SocketAddr,
    Arc<AppState>,
    CancellationToken,
    tempfile::TempDir,
) {
    let dir = tempfile::tempdir().unwrap();
    let settings = SettingsStore::new(dir.path().join("settings.json")).unwrap();
    let (_sig_tx, sig_rx) = mpsc::channel(4);
    let state = AppState::new(
        Arc::new(StaticTab),
        sig_rx,
        settings,
        WatchConfig::default(),
    );

    let server = ControlServer::bind("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(shutdown.clone()));

    (addr, state, shutdown, dir)
}

async fn roundtrip(stream: &mut BufReader<TcpStream>, request: &str) -> serde_json::Value {
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();
    let mut line = String::new();
    stream.read_line(&mut line).await.unwrap();
    serde_json::from_str(&line).unwrap()
}

fn seed_one_record(state: &Arc<AppState>) {
    let profile = platform::profile_for("chatgpt.com").unwrap();
    let snap = PageSnapshot::new(
        "https://chatgpt.com/c/1",
        r#"<html><body><div data-message-author-role="assistant">The capital of France is Paris.</div></body></html>"#,
    );
    let hits = locator::find_answer_elements(profile, &snap);
    let mut engine = state.engine().lock().unwrap();
    engine.phase = SessionPhase::Active;
    engine.platform = Some(Platform::Chatgpt);
    engine
        .store
        .record_or_update(&snap, hits.last().unwrap(), None, profile, false);
}

#[tokio::test]
async fn a_connection_survives_bad_input_and_keeps_answering() {
    let (addr, _state, shutdown, _dir) = start_server().await;
    let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());

    let status = roundtrip(&mut stream, r#"{"action":"getStatus"}"#).await;
    assert_eq!(status["success"], true);
    assert_eq!(status["enabled"], true);
    assert_eq!(status["totalResponses"], 0);
    assert_eq!(status["currentIndex"], -1);

    let unknown = roundtrip(&mut stream, r#"{"action":"teleport"}"#).await;
    assert_eq!(unknown["success"], false);
    assert_eq!(unknown["error"], "Unknown action");

    let malformed = roundtrip(&mut stream, "garbage that is not json").await;
    assert_eq!(malformed["success"], false);
    assert_eq!(malformed["error"], "invalid request");

    // The same connection still answers after the bad lines.
    let status = roundtrip(&mut stream, r#"{"action":"getStatus"}"#).await;
    assert_eq!(status["success"], true);

    shutdown.cancel();
}

#[tokio::test]
async fn toggle_round_trips_and_persists() {
    let (addr, state, shutdown, dir) = start_server().await;
    let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());

    let off = roundtrip(&mut stream, r#"{"action":"toggle"}"#).await;
    assert_eq!(off["success"], true);
    assert_eq!(off["enabled"], false);

    let on = roundtrip(&mut stream, r#"{"action":"toggle"}"#).await;
    assert_eq!(on["enabled"], true);

    state.settings().flush().unwrap();
    let saved = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
    assert!(saved.contains("\"enabled\": true"));

    state.stop_watcher().await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn navigation_over_the_wire_moves_the_cursor() {
    let (addr, state, shutdown, _dir) = start_server().await;
    seed_one_record(&state);
    let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());

    let out_of_range = roundtrip(&mut stream, r#"{"action":"navigateResponse","index":4}"#).await;
    assert_eq!(out_of_range["success"], false);
    assert_eq!(out_of_range["error"], "index out of range");
    assert_eq!(state.engine().lock().unwrap().store.cursor(), 0);

    let ok = roundtrip(&mut stream, r#"{"action":"navigateResponse","index":0}"#).await;
    assert_eq!(ok["success"], true);
    assert_eq!(ok["currentIndex"], 0);

    let status = roundtrip(&mut stream, r#"{"action":"getStatus"}"#).await;
    assert_eq!(status["hasAnswer"], true);
    assert_eq!(status["totalResponses"], 1);

    shutdown.cancel();
}
