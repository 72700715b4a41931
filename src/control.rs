//! JSON-lines control surface on a localhost TCP listener. One request
//! per line, exactly one reply per line; a client is never left without
//! an answer.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::panel::{self, PanelEvent};
use crate::platform::Platform;
use crate::watcher::SessionPhase;
use crate::AppState;
use crate::{log_debug, log_info, log_warn};

const ENABLE_LOGS: bool = true;

pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:4477";

/// Grace period for requests that raced ahead of platform detection.
const NOT_READY_RETRY: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum ControlRequest {
    Toggle,
    GetStatus,
    NavigateResponse { index: i64 },
}

#[derive(Debug, Serialize)]
struct ToggleReply {
    success: bool,
    enabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReply {
    success: bool,
    enabled: bool,
    platform: Option<Platform>,
    has_answer: bool,
    total_responses: usize,
    current_index: isize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NavigateReply {
    success: bool,
    current_index: isize,
}

#[derive(Debug, Serialize)]
struct ErrorReply {
    success: bool,
    error: String,
}

pub struct ControlServer {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl ControlServer {
    pub async fn bind(addr: &str, state: Arc<AppState>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind control listener on {addr}"))?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, shutdown: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            log_info!("control surface listening on {addr}");
        }
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    log_info!("control surface shutting down");
                    return;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            log_debug!("control client connected from {peer}");
                            let state = Arc::clone(&self.state);
                            tokio::spawn(handle_connection(stream, state, shutdown.clone()));
                        }
                        Err(err) => log_warn!("control accept failed: {err}"),
                    }
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<AppState>, shutdown: CancellationToken) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return,
            next = lines.next_line() => next,
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                log_debug!("control read failed: {err}");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let mut reply = respond(&state, line.trim()).await;
        reply.push('\n');
        if writer.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Malformed payloads and unknown actions get distinct errors; a line
/// that is not JSON at all is not an "action" in any sense.
async fn respond(state: &Arc<AppState>, line: &str) -> String {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => return error_reply("invalid request"),
    };
    let request: ControlRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(_) => return error_reply("Unknown action"),
    };

    match request {
        ControlRequest::Toggle => handle_toggle(state).await,
        ControlRequest::GetStatus => handle_status(state),
        ControlRequest::NavigateResponse { index } => handle_navigate(state, index).await,
    }
}

async fn handle_toggle(state: &Arc<AppState>) -> String {
    match state.toggle().await {
        Ok(enabled) => encode(&ToggleReply {
            success: true,
            enabled,
        }),
        Err(err) => {
            log_warn!("toggle failed: {err:#}");
            error_reply("toggle failed")
        }
    }
}

fn handle_status(state: &Arc<AppState>) -> String {
    let engine = state.engine().lock().unwrap();
    encode(&StatusReply {
        success: true,
        enabled: engine.enabled,
        platform: engine.platform,
        has_answer: engine.store.latest().is_some(),
        total_responses: engine.store.len(),
        current_index: engine.store.cursor(),
    })
}

async fn handle_navigate(state: &Arc<AppState>, index: i64) -> String {
    for attempt in 0..2 {
        match try_navigate(state, index) {
            NavigateOutcome::Done(reply) => return reply,
            NavigateOutcome::NotReady => {
                if attempt == 0 {
                    sleep(NOT_READY_RETRY).await;
                }
            }
        }
    }
    error_reply("tracking not ready")
}

enum NavigateOutcome {
    Done(String),
    NotReady,
}

fn try_navigate(state: &Arc<AppState>, index: i64) -> NavigateOutcome {
    let mut engine = state.engine().lock().unwrap();
    if engine.store.is_empty() && engine.phase != SessionPhase::Active {
        return NavigateOutcome::NotReady;
    }

    let target = isize::try_from(index).unwrap_or(-1);
    match engine.store.navigate(target) {
        Ok(_) => {
            let current = engine.store.cursor();
            let total = engine.store.len();
            let view = engine
                .store
                .current()
                .zip(engine.platform)
                .and_then(|(record, platform)| panel::render_record(record, platform, total).ok());
            drop(engine);
            if let Some(view) = view {
                state.panel().send(PanelEvent::Record { view });
            }
            NavigateOutcome::Done(encode(&NavigateReply {
                success: true,
                current_index: current,
            }))
        }
        Err(err) => {
            log_debug!("navigation rejected: {err}");
            NavigateOutcome::Done(error_reply("index out of range"))
        }
    }
}

fn encode<T: Serialize>(reply: &T) -> String {
    serde_json::to_string(reply)
        .unwrap_or_else(|_| r#"{"success":false,"error":"encoding failure"}"#.to_string())
}

fn error_reply(message: &str) -> String {
    encode(&ErrorReply {
        success: false,
        error: message.to_string(),
    })
}
