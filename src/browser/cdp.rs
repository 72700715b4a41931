//! DevTools-protocol attachment to a running Chromium tab.
//!
//! One WebSocket to the browser endpoint, one attached page session. The
//! receive loop routes call responses to their waiting oneshots and turns
//! `Runtime.bindingCalled` events from the injected observer into
//! [`MutationSignal`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{BrowserTab, MutationSignal, RawSnapshot};
use crate::error::BrowserError;
use crate::platform;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Signals are coalesced anyway; a small buffer is plenty.
const SIGNAL_BUFFER: usize = 64;
/// Exposed on the page as `window.chatpeek_notify`.
const BINDING_NAME: &str = "chatpeek_notify";

/// Installed into every document of the attached tab. Watches the whole
/// document for structural and text changes, coalesces bursts for 120 ms
/// and reports them through the CDP binding. The guard keeps re-injection
/// after navigation idempotent.
const OBSERVER_JS: &str = r#"
(() => {
  if (window.__chatpeekInstalled) return;
  window.__chatpeekInstalled = true;
  let pending = null;
  const report = () => {
    pending = null;
    if (window.chatpeek_notify) window.chatpeek_notify("mutated");
  };
  const observer = new MutationObserver(() => {
    if (pending) return;
    pending = setTimeout(report, 120);
  });
  observer.observe(document.documentElement || document, {
    childList: true,
    subtree: true,
    characterData: true,
    attributes: true,
    attributeFilter: ["class", "data-testid", "aria-label", "title"],
  });
})();
"#;

const SNAPSHOT_JS: &str = "({href: location.href, html: document.documentElement ? document.documentElement.outerHTML : \"\"})";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

struct PendingCall {
    tx: oneshot::Sender<Result<Value, BrowserError>>,
}

#[derive(Debug, Deserialize)]
struct BrowserVersion {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
    #[serde(default, rename = "Browser")]
    browser: String,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    id: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct CdpMessage {
    id: Option<u64>,
    method: Option<String>,
    params: Option<Value>,
    result: Option<Value>,
    error: Option<CdpCallError>,
}

#[derive(Debug, Deserialize)]
struct CdpCallError {
    code: i64,
    message: String,
}

/// An attached chat tab, driven over the DevTools protocol.
pub struct CdpTab {
    ws_tx: Arc<tokio::sync::Mutex<WsSink>>,
    request_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, PendingCall>>>,
    session_id: String,
    page_url: String,
    recv_task: JoinHandle<()>,
}

impl CdpTab {
    /// Attach to the first open tab showing a supported chat page and
    /// install the mutation observer bridge. Returns the tab plus the
    /// stream of mutation signals it reports.
    pub async fn attach(
        endpoint: &str,
    ) -> Result<(Self, mpsc::Receiver<MutationSignal>), BrowserError> {
        let endpoint = endpoint.trim_end_matches('/');

        let version: BrowserVersion = reqwest::get(format!("{endpoint}/json/version"))
            .await
            .map_err(|e| BrowserError::EndpointUnavailable(format!("{endpoint}: {e}")))?
            .json()
            .await
            .map_err(|e| BrowserError::EndpointUnavailable(format!("{endpoint}: {e}")))?;
        log_debug!("browser at {endpoint}: {}", version.browser);

        let pages: Vec<PageInfo> = reqwest::get(format!("{endpoint}/json/list"))
            .await?
            .json()
            .await?;
        let page = pages
            .into_iter()
            .find(|p| p.kind == "page" && platform::profile_for_url(&p.url).is_some())
            .ok_or(BrowserError::NoChatTab)?;
        log_info!("attaching to tab {} ({})", page.id, page.url);

        let (ws_stream, _) = connect_async(&version.web_socket_debugger_url)
            .await
            .map_err(|e| BrowserError::ConnectionFailed(format!("websocket: {e}")))?;
        let (ws_sink, ws_source) = ws_stream.split();

        let pending: Arc<Mutex<HashMap<u64, PendingCall>>> = Arc::new(Mutex::new(HashMap::new()));
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);

        let recv_task = {
            let pending = pending.clone();
            tokio::spawn(receive_loop(ws_source, pending, signal_tx))
        };

        let mut tab = Self {
            ws_tx: Arc::new(tokio::sync::Mutex::new(ws_sink)),
            request_id: AtomicU64::new(1),
            pending,
            session_id: String::new(),
            page_url: page.url,
            recv_task,
        };

        let attached = tab
            .raw_call(
                "Target.attachToTarget",
                json!({ "targetId": page.id, "flatten": true }),
                None,
            )
            .await?;
        tab.session_id = attached["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::InvalidResponse("missing sessionId".to_string()))?
            .to_string();

        tab.call("Page.enable", json!({})).await?;
        tab.call("Runtime.enable", json!({})).await?;
        tab.call("Runtime.addBinding", json!({ "name": BINDING_NAME }))
            .await?;
        tab.call(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": OBSERVER_JS }),
        )
        .await?;
        // The current document will not re-run new-document scripts.
        tab.call("Runtime.evaluate", json!({ "expression": OBSERVER_JS }))
            .await?;

        log_info!("observer bridge installed");
        Ok((tab, signal_rx))
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.raw_call(method, params, Some(&self.session_id)).await
    }

    async fn raw_call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, BrowserError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let mut request = json!({ "id": id, "method": method, "params": params });
        if let Some(session) = session_id {
            request["sessionId"] = Value::String(session.to_string());
        }
        let payload = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, PendingCall { tx });

        {
            let mut ws = self.ws_tx.lock().await;
            ws.send(Message::Text(payload.into())).await?;
        }

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BrowserError::SessionClosed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(BrowserError::Timeout(method.to_string()))
            }
        }
    }
}

#[async_trait::async_trait]
impl BrowserTab for CdpTab {
    async fn snapshot(&self) -> Result<RawSnapshot, BrowserError> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({ "expression": SNAPSHOT_JS, "returnByValue": true }),
            )
            .await?;
        let value = &result["result"]["value"];
        let url = value["href"]
            .as_str()
            .ok_or_else(|| BrowserError::InvalidResponse("snapshot missing href".to_string()))?;
        let html = value["html"].as_str().unwrap_or_default();
        Ok(RawSnapshot {
            url: url.to_string(),
            html: html.to_string(),
        })
    }
}

impl Drop for CdpTab {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn receive_loop(
    mut source: WsSource,
    pending: Arc<Mutex<HashMap<u64, PendingCall>>>,
    signals: mpsc::Sender<MutationSignal>,
) {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let parsed: CdpMessage = match serde_json::from_str(&text) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        log_warn!("unparseable protocol message: {err}");
                        continue;
                    }
                };
                route_message(parsed, &pending, &signals);
            }
            Ok(Message::Close(_)) => {
                log_info!("browser websocket closed");
                break;
            }
            Err(err) => {
                log_warn!("browser websocket error: {err}");
                break;
            }
            _ => {}
        }
    }
    // Dropping `signals` here closes the channel, which is how the
    // watcher learns the connection is gone.
}

fn route_message(
    message: CdpMessage,
    pending: &Mutex<HashMap<u64, PendingCall>>,
    signals: &mpsc::Sender<MutationSignal>,
) {
    if let Some(id) = message.id {
        let Some(call) = pending.lock().unwrap().remove(&id) else {
            return;
        };
        let outcome = match message.error {
            Some(err) => Err(BrowserError::Protocol {
                code: err.code,
                message: err.message,
            }),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        let _ = call.tx.send(outcome);
        return;
    }

    if message.method.as_deref() == Some("Runtime.bindingCalled") {
        let name = message
            .params
            .as_ref()
            .and_then(|p| p["name"].as_str())
            .unwrap_or_default();
        if name == BINDING_NAME {
            // A full buffer means a scan is already overdue; dropping the
            // extra signal loses nothing.
            let _ = signals.try_send(MutationSignal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observer_script_matches_the_binding() {
        assert!(OBSERVER_JS.contains(BINDING_NAME));
        assert!(OBSERVER_JS.contains("__chatpeekInstalled"));
        assert!(OBSERVER_JS.contains("characterData"));
        assert!(OBSERVER_JS.contains("attributeFilter"));
    }

    #[test]
    fn request_ids_increment() {
        let id = AtomicU64::new(1);
        assert_eq!(id.fetch_add(1, Ordering::SeqCst), 1);
        assert_eq!(id.fetch_add(1, Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn responses_are_routed_to_their_call() {
        let pending = Mutex::new(HashMap::new());
        let (tx, rx) = oneshot::channel();
        pending.lock().unwrap().insert(7, PendingCall { tx });
        let (signal_tx, _signal_rx) = mpsc::channel(4);

        let message: CdpMessage =
            serde_json::from_str(r#"{"id":7,"result":{"ok":true}}"#).unwrap();
        route_message(message, &pending, &signal_tx);

        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome["ok"], Value::Bool(true));
        assert!(pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn protocol_errors_are_surfaced() {
        let pending = Mutex::new(HashMap::new());
        let (tx, rx) = oneshot::channel();
        pending.lock().unwrap().insert(3, PendingCall { tx });
        let (signal_tx, _signal_rx) = mpsc::channel(4);

        let message: CdpMessage = serde_json::from_str(
            r#"{"id":3,"error":{"code":-32000,"message":"no such frame"}}"#,
        )
        .unwrap();
        route_message(message, &pending, &signal_tx);

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, BrowserError::Protocol { code: -32000, .. }));
    }

    #[tokio::test]
    async fn binding_events_become_signals() {
        let pending: Mutex<HashMap<u64, PendingCall>> = Mutex::new(HashMap::new());
        let (signal_tx, mut signal_rx) = mpsc::channel(4);

        let message: CdpMessage = serde_json::from_str(&format!(
            r#"{{"method":"Runtime.bindingCalled","params":{{"name":"{BINDING_NAME}","payload":"mutated"}}}}"#
        ))
        .unwrap();
        route_message(message, &pending, &signal_tx);

        assert_eq!(signal_rx.try_recv().unwrap(), MutationSignal);

        // Other bindings and events are ignored.
        let message: CdpMessage = serde_json::from_str(
            r#"{"method":"Runtime.bindingCalled","params":{"name":"someone_else"}}"#,
        )
        .unwrap();
        route_message(message, &pending, &signal_tx);
        assert!(signal_rx.try_recv().is_err());
    }
}
