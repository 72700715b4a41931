pub mod browser;
pub mod classify;
pub mod config;
pub mod control;
pub mod error;
pub mod locator;
pub mod page;
pub mod panel;
pub mod platform;
pub mod settings;
pub mod store;
pub mod utils;
pub mod watcher;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;

use browser::{BrowserTab, CdpTab, MutationSignal};
use config::WatchConfig;
use page::PageSnapshot;
use panel::PanelSink;
use platform::Platform;
use settings::SettingsStore;
use store::ResponseStore;
use watcher::{SessionPhase, SharedSignals, WatchContext, WatcherController};

/// Engine-wide state shared between the watch loop and the control
/// surface. Locked briefly per pass, never across an await.
pub struct EngineState {
    pub enabled: bool,
    pub platform: Option<Platform>,
    pub phase: SessionPhase,
    pub attached: bool,
    pub store: ResponseStore,
}

impl EngineState {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            platform: None,
            phase: SessionPhase::Idle,
            attached: false,
            store: ResponseStore::new(),
        }
    }
}

pub struct AppState {
    engine: Arc<Mutex<EngineState>>,
    watcher: TokioMutex<WatcherController>,
    settings: SettingsStore,
    panel: PanelSink,
    tab: Arc<dyn BrowserTab>,
    config: WatchConfig,
    signals: SharedSignals,
}

impl AppState {
    pub fn new(
        tab: Arc<dyn BrowserTab>,
        signals: mpsc::Receiver<MutationSignal>,
        settings: SettingsStore,
        config: WatchConfig,
    ) -> Arc<Self> {
        let enabled = settings.enabled();
        Arc::new(Self {
            engine: Arc::new(Mutex::new(EngineState::new(enabled))),
            watcher: TokioMutex::new(WatcherController::new()),
            settings,
            panel: PanelSink::new(),
            tab,
            config,
            signals: Arc::new(TokioMutex::new(signals)),
        })
    }

    pub fn engine(&self) -> &Arc<Mutex<EngineState>> {
        &self.engine
    }

    pub fn panel(&self) -> &PanelSink {
        &self.panel
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    fn watch_context(&self) -> WatchContext {
        WatchContext {
            tab: Arc::clone(&self.tab),
            engine: Arc::clone(&self.engine),
            panel: self.panel.clone(),
            config: self.config.clone(),
            signals: Arc::clone(&self.signals),
        }
    }

    pub async fn start_watcher(&self) -> Result<()> {
        let mut watcher = self.watcher.lock().await;
        if watcher.is_running() {
            return Ok(());
        }
        watcher.start(self.watch_context())
    }

    pub async fn stop_watcher(&self) -> Result<()> {
        self.watcher.lock().await.stop().await
    }

    /// Flip tracking on or off: updates the shared flag, persists the
    /// setting, and starts or stops the watch loop.
    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        let changed = {
            let mut engine = self.engine.lock().unwrap();
            let changed = engine.enabled != enabled;
            engine.enabled = enabled;
            changed
        };
        if changed {
            self.settings.set_enabled(enabled);
        }
        if enabled {
            self.start_watcher().await
        } else {
            self.stop_watcher().await
        }
    }

    pub async fn toggle(&self) -> Result<bool> {
        let target = {
            let engine = self.engine.lock().unwrap();
            !engine.enabled
        };
        self.set_enabled(target).await?;
        Ok(target)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// DevTools endpoint, e.g. `http://127.0.0.1:9222`. Discovered when
    /// absent.
    pub endpoint: Option<String>,
    pub port: Option<u16>,
    pub control_addr: Option<String>,
    pub settings_path: Option<PathBuf>,
    /// Scan once, print the result, exit.
    pub once: bool,
}

pub async fn run(opts: RunOptions) -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("chatpeek starting up...");

    let settings_path = match opts.settings_path {
        Some(path) => path,
        None => SettingsStore::default_path()?,
    };
    let settings = SettingsStore::new(settings_path)?;

    let endpoint = browser::discover_endpoint(opts.endpoint.as_deref(), opts.port).await?;
    let (tab, signals) = CdpTab::attach(&endpoint).await?;
    log::info!("attached to {}", tab.page_url());

    if opts.once {
        return scan_once(&tab).await;
    }

    let state = AppState::new(Arc::new(tab), signals, settings, WatchConfig::default());
    state.engine().lock().unwrap().attached = true;

    // Panel events stream to stdout as JSON lines; control clients can
    // subscribe to the same broadcast.
    let mut panel_rx = state.panel().subscribe();
    tokio::spawn(async move {
        loop {
            match panel_rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => log::warn!("failed to encode panel event: {err}"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("panel output lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    if state.engine().lock().unwrap().enabled {
        state.start_watcher().await?;
    } else {
        log::info!("tracking disabled in settings; waiting for a toggle");
    }

    let shutdown = CancellationToken::new();
    let control_addr = opts
        .control_addr
        .as_deref()
        .unwrap_or(control::DEFAULT_CONTROL_ADDR);
    let server = control::ControlServer::bind(control_addr, Arc::clone(&state)).await?;
    let control_task = tokio::spawn(server.run(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    log::info!("shutting down");

    shutdown.cancel();
    state.stop_watcher().await?;
    state.settings().flush()?;
    control_task.await.context("control task failed to join")?;

    Ok(())
}

/// One-shot mode: snapshot the tab, locate the latest answer, print a
/// JSON summary.
async fn scan_once(tab: &CdpTab) -> Result<()> {
    let raw = tab.snapshot().await?;
    let profile = platform::profile_for_url(&raw.url)
        .with_context(|| format!("no supported chat platform at {}", raw.url))?;

    let snap = PageSnapshot::new(raw.url, &raw.html);
    let generating = locator::detect_generation(profile, &snap);
    let answer = locator::latest_answer(profile, &snap);
    let question = answer
        .as_ref()
        .and_then(|hit| locator::find_corresponding_question(profile, &snap, hit));

    let summary = serde_json::json!({
        "platform": profile.platform,
        "url": snap.url(),
        "generating": generating,
        "answer": answer.as_ref().map(|hit| hit.text()),
        "question": question.as_ref().map(|hit| hit.text()),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
