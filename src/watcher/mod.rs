//! Monitoring session lifecycle: a controller that owns the loop task,
//! and the session value the loop works on.

mod loop_worker;

pub use loop_worker::watch_loop;

use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::browser::{BrowserTab, MutationSignal};
use crate::config::WatchConfig;
use crate::page::TrackedElement;
use crate::panel::PanelSink;
use crate::platform::PlatformProfile;
use crate::EngineState;

/// Mutation signals survive watcher restarts: the receiver is shared so a
/// re-enabled watcher picks up the same stream.
pub type SharedSignals = Arc<tokio::sync::Mutex<mpsc::Receiver<MutationSignal>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Detecting,
    Active,
    TornDown,
}

/// Everything the loop worker needs, cloneable so stop/start cycles can
/// hand the same environment to a fresh task.
#[derive(Clone)]
pub struct WatchContext {
    pub tab: Arc<dyn BrowserTab>,
    pub engine: Arc<Mutex<EngineState>>,
    pub panel: PanelSink,
    pub config: WatchConfig,
    pub signals: SharedSignals,
}

/// Loop-local state for one attached platform session. Dropped wholesale
/// on teardown, so none of its deadlines can outlive the session.
pub struct EngineSession {
    pub id: Uuid,
    pub profile: &'static PlatformProfile,
    pub url: String,
    pub started_at: DateTime<Utc>,
    /// The current "latest answer" under dedicated tracking.
    pub tracked: Option<TrackedElement>,
    /// When `tracked` last changed target; drives the hot poll window.
    pub tracked_since: Instant,
    /// Last observed generation-indicator state.
    pub generating: bool,
}

impl EngineSession {
    pub fn new(profile: &'static PlatformProfile, url: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            profile,
            url,
            started_at: Utc::now(),
            tracked: None,
            tracked_since: Instant::now(),
            generating: false,
        }
    }
}

/// Owns the watch-loop task. One loop at a time; toggling off cancels the
/// token and joins, toggling on spawns a fresh loop.
pub struct WatcherController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for WatcherController {
    fn default() -> Self {
        Self::new()
    }
}

impl WatcherController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self, ctx: WatchContext) -> Result<()> {
        if self.handle.is_some() {
            bail!("watcher already active");
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        let handle = tokio::spawn(watch_loop(ctx, token_clone));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle.await.context("watch loop task failed to join")
        } else {
            Ok(())
        }
    }
}
