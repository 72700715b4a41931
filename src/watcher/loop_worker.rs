//! The watch loop: detect a supported platform, then scan it on a
//! graduated cadence until the page navigates away or the loop is
//! cancelled.

use std::collections::VecDeque;

use tokio::time::{interval, sleep, sleep_until, timeout, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{EngineSession, SessionPhase, SharedSignals, WatchContext};
use crate::browser::{MutationSignal, RawSnapshot};
use crate::config::WatchConfig;
use crate::error::BrowserError;
use crate::locator;
use crate::page::{PageSnapshot, TrackedElement};
use crate::panel::{self, PanelEvent};
use crate::platform::{self, DebouncePolicy, Platform};
use crate::store::Upsert;
use crate::{log_debug, log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// Consecutive snapshot failures before the panel is told the page is
/// out of reach.
const SNAPSHOT_ERROR_LIMIT: u32 = 10;

enum ActiveExit {
    Cancelled,
    Navigated { to: String },
}

enum Flow {
    Continue,
    Navigated(String),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanKind {
    /// Locate, classify, record, schedule a push.
    Full,
    /// Cheap check of the generation indicators; escalates to a full
    /// scan only while one is lit.
    GenerationProbe,
    /// Drop vanished records and backfill missed answers.
    Reconcile,
}

enum PushDecision {
    Significant,
    Minor,
    Skip,
}

struct ScanState {
    session: EngineSession,
    /// Debounced scan requested by a mutation signal.
    scan_due: Option<Instant>,
    /// Debounced panel push for a significant change.
    push_due: Option<Instant>,
    /// Debounced panel push for minor deltas.
    minor_due: Option<Instant>,
    latest_is_placeholder: bool,
    snapshot_errors: u32,
}

pub async fn watch_loop(ctx: WatchContext, cancel_token: CancellationToken) {
    set_phase(&ctx, SessionPhase::Detecting, None);

    loop {
        let session = tokio::select! {
            _ = cancel_token.cancelled() => {
                finish(&ctx);
                return;
            }
            session = detect(&ctx) => session,
        };

        let platform = session.profile.platform;
        set_phase(&ctx, SessionPhase::Active, Some(platform));
        log_info!("session {} active on {}", session.id, platform);

        match run_active(&ctx, session, &cancel_token).await {
            ActiveExit::Cancelled => {
                finish(&ctx);
                return;
            }
            ActiveExit::Navigated { to } => {
                log_info!("page navigated to {to}, re-detecting");
                ctx.engine.lock().unwrap().store.clear();
                ctx.panel.send(PanelEvent::Cleared);
                set_phase(&ctx, SessionPhase::Detecting, None);

                let settle = Duration::from_millis(ctx.config.settle_after_nav_ms);
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        finish(&ctx);
                        return;
                    }
                    _ = sleep(settle) => {}
                }
            }
        }
    }
}

/// Snapshot until the tab lands on a supported chat platform.
async fn detect(ctx: &WatchContext) -> EngineSession {
    let retry = Duration::from_millis(ctx.config.detect_retry_ms);
    loop {
        match snapshot(ctx).await {
            Ok(raw) => match platform::profile_for_url(&raw.url) {
                Some(profile) => {
                    log_info!("detected {} at {}", profile.platform, raw.url);
                    return EngineSession::new(profile, raw.url);
                }
                None => log_debug!("no supported platform at {}", raw.url),
            },
            Err(err) => log_debug!("snapshot failed while detecting: {err}"),
        }
        sleep(retry).await;
    }
}

/// One platform session. Every timer lives in the single `select!`
/// below; a scan never overlaps another because they all run on this
/// task.
async fn run_active(
    ctx: &WatchContext,
    session: EngineSession,
    cancel_token: &CancellationToken,
) -> ActiveExit {
    let cfg = &ctx.config;

    let mut coarse = interval(Duration::from_millis(cfg.coarse_scan_ms));
    coarse.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut probe = interval(Duration::from_millis(cfg.generation_probe_ms));
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut reconcile = interval(Duration::from_millis(cfg.reconcile_ms));
    reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tight_period = Duration::from_millis(cfg.tight_poll_ms);
    let mut tight = interval(tight_period);
    tight.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let now = Instant::now();
    let mut pending_initial: VecDeque<Instant> = cfg
        .initial_scan_delays_ms
        .iter()
        .map(|ms| now + Duration::from_millis(*ms))
        .collect();

    let mut state = ScanState {
        session,
        scan_due: None,
        push_due: None,
        minor_due: None,
        latest_is_placeholder: false,
        snapshot_errors: 0,
    };
    let mut signals_open = true;

    loop {
        let desired = desired_tight_period(cfg, &state);
        if desired != tight_period {
            tight_period = desired;
            tight = interval(tight_period);
            tight.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        let flow = tokio::select! {
            _ = cancel_token.cancelled() => return ActiveExit::Cancelled,
            _ = coarse.tick() => scan(ctx, &mut state, ScanKind::Full).await,
            _ = probe.tick() => scan(ctx, &mut state, ScanKind::GenerationProbe).await,
            _ = reconcile.tick() => scan(ctx, &mut state, ScanKind::Reconcile).await,
            _ = tight.tick(), if state.session.tracked.is_some() => {
                scan(ctx, &mut state, ScanKind::Full).await
            }
            _ = maybe_sleep(pending_initial.front().copied()), if !pending_initial.is_empty() => {
                pending_initial.pop_front();
                scan(ctx, &mut state, ScanKind::Full).await
            }
            signal = recv_signal(&ctx.signals), if signals_open => {
                match signal {
                    Some(MutationSignal) => {
                        state.scan_due =
                            Some(Instant::now() + Duration::from_millis(cfg.mutation_debounce_ms));
                    }
                    None => {
                        signals_open = false;
                        log_warn!("mutation channel closed; relying on polling only");
                    }
                }
                Flow::Continue
            }
            _ = maybe_sleep(state.scan_due), if state.scan_due.is_some() => {
                state.scan_due = None;
                scan(ctx, &mut state, ScanKind::Full).await
            }
            _ = maybe_sleep(state.push_due), if state.push_due.is_some() => {
                state.push_due = None;
                push_current(ctx, &state);
                Flow::Continue
            }
            _ = maybe_sleep(state.minor_due), if state.minor_due.is_some() => {
                state.minor_due = None;
                push_current(ctx, &state);
                Flow::Continue
            }
        };

        if let Flow::Navigated(to) = flow {
            return ActiveExit::Navigated { to };
        }
    }
}

fn desired_tight_period(cfg: &WatchConfig, state: &ScanState) -> Duration {
    let hot = state.session.tracked.is_some()
        && state.latest_is_placeholder
        && state.session.tracked_since.elapsed() < Duration::from_millis(cfg.hot_window_ms);
    if hot {
        Duration::from_millis(cfg.tight_poll_hot_ms)
    } else {
        Duration::from_millis(cfg.tight_poll_ms)
    }
}

async fn scan(ctx: &WatchContext, state: &mut ScanState, kind: ScanKind) -> Flow {
    let raw = match snapshot(ctx).await {
        Ok(raw) => {
            state.snapshot_errors = 0;
            raw
        }
        Err(err) => {
            state.snapshot_errors += 1;
            if state.snapshot_errors == SNAPSHOT_ERROR_LIMIT {
                log_warn!("{SNAPSHOT_ERROR_LIMIT} consecutive snapshot failures: {err}");
                ctx.panel
                    .error(format!("lost sight of the page: {err}"), true);
            }
            return Flow::Continue;
        }
    };

    if raw.url != state.session.url {
        return Flow::Navigated(raw.url);
    }

    // No awaits below this point; the parsed document stays on this task.
    let snap = PageSnapshot::new(raw.url, &raw.html);
    let profile = state.session.profile;

    state.session.generating = locator::detect_generation(profile, &snap);
    if kind == ScanKind::GenerationProbe && !state.session.generating {
        return Flow::Continue;
    }

    let hits = locator::find_answer_elements(profile, &snap);

    if kind == ScanKind::Reconcile {
        let mut engine = ctx.engine.lock().unwrap();
        let dropped = engine.store.reconcile_with_dom(&snap);
        if dropped > 0 {
            log_info!("reconcile dropped {dropped} stale record(s)");
        }
        let appended =
            engine
                .store
                .detect_missed_responses(&snap, &hits, profile, state.session.generating);
        drop(engine);
        if appended > 0 {
            push_current(ctx, state);
        }
        return Flow::Continue;
    }

    let latest = match hits.last().copied() {
        Some(hit) => hit,
        None => {
            maybe_reset_for_new_conversation(ctx, state, &snap);
            return Flow::Continue;
        }
    };
    let question = locator::find_corresponding_question(profile, &snap, &latest);

    let mut engine = ctx.engine.lock().unwrap();
    let upsert = engine.store.record_or_update(
        &snap,
        &latest,
        question.as_ref(),
        profile,
        state.session.generating,
    );

    let moved = match &state.session.tracked {
        Some(t) => t.selector() != latest.selector || t.index() != latest.index,
        None => true,
    };
    if moved {
        log_debug!("tracking answer element {}#{}", latest.selector, latest.index);
        state.session.tracked =
            Some(TrackedElement::from_hit(&latest, latest.text(), latest.markup()));
        state.session.tracked_since = Instant::now();
    }

    state.latest_is_placeholder = engine
        .store
        .latest()
        .map(|record| record.is_placeholder)
        .unwrap_or(false);
    let cursor = engine.store.cursor();
    drop(engine);

    let decision = match upsert {
        Upsert::Created { .. } => PushDecision::Significant,
        // Off-cursor updates stay silent; the panel shows what the user
        // navigated to, not whatever moved last.
        Upsert::Updated { index, change } if cursor == index as isize => {
            if change.significant {
                PushDecision::Significant
            } else {
                PushDecision::Minor
            }
        }
        Upsert::Updated { .. } | Upsert::Ignored => PushDecision::Skip,
    };

    match decision {
        PushDecision::Significant => schedule_significant(ctx, state),
        PushDecision::Minor => {
            state.minor_due =
                Some(Instant::now() + Duration::from_millis(ctx.config.minor_update_debounce_ms));
        }
        PushDecision::Skip => {}
    }

    Flow::Continue
}

/// Zero answer candidates on a fresh-conversation path means the user
/// started over; anywhere else it is treated as a transient render gap
/// and history is kept.
fn maybe_reset_for_new_conversation(ctx: &WatchContext, state: &mut ScanState, snap: &PageSnapshot) {
    if !state.session.profile.new_conversation.matches_url(snap.url()) {
        return;
    }
    {
        let mut engine = ctx.engine.lock().unwrap();
        if engine.store.is_empty() {
            return;
        }
        engine.store.clear();
    }
    log_info!("fresh conversation detected, history cleared");
    ctx.panel.send(PanelEvent::Cleared);
    state.session.tracked = None;
    state.latest_is_placeholder = false;
    state.scan_due = None;
    state.push_due = None;
    state.minor_due = None;
}

fn schedule_significant(ctx: &WatchContext, state: &mut ScanState) {
    state.minor_due = None;
    match state.session.profile.debounce {
        DebouncePolicy::Immediate => {
            state.push_due = None;
            push_current(ctx, state);
        }
        DebouncePolicy::Fixed(ms) => {
            state.push_due = Some(Instant::now() + Duration::from_millis(ms));
        }
        DebouncePolicy::WhileGenerating(ms) => {
            if state.session.generating {
                state.push_due = Some(Instant::now() + Duration::from_millis(ms));
            } else {
                state.push_due = None;
                push_current(ctx, state);
            }
        }
    }
}

/// Render and send whatever the cursor points at, falling back to the
/// newest record.
fn push_current(ctx: &WatchContext, state: &ScanState) {
    let engine = ctx.engine.lock().unwrap();
    let total = engine.store.len();
    let record = match engine.store.current().or_else(|| engine.store.latest()) {
        Some(record) => record,
        None => return,
    };
    match panel::render_record(record, state.session.profile.platform, total) {
        Ok(view) => ctx.panel.send(PanelEvent::Record { view }),
        Err(err) => {
            log_warn!("failed to render record for panel: {err}");
            ctx.panel.error(err.to_string(), true);
        }
    }
}

fn set_phase(ctx: &WatchContext, phase: SessionPhase, platform: Option<Platform>) {
    let enabled = {
        let mut engine = ctx.engine.lock().unwrap();
        engine.phase = phase;
        engine.platform = platform;
        engine.enabled
    };
    ctx.panel.send(PanelEvent::Status {
        enabled,
        platform,
        phase,
    });
}

fn finish(ctx: &WatchContext) {
    log_info!("watch loop shutting down");
    set_phase(ctx, SessionPhase::TornDown, None);
}

async fn snapshot(ctx: &WatchContext) -> Result<RawSnapshot, BrowserError> {
    let limit = Duration::from_millis(ctx.config.snapshot_timeout_ms);
    match timeout(limit, ctx.tab.snapshot()).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::Timeout("snapshot".to_string())),
    }
}

async fn recv_signal(signals: &SharedSignals) -> Option<MutationSignal> {
    signals.lock().await.recv().await
}

/// `select!` evaluates arm expressions even when their precondition is
/// false, so absent deadlines must map to a future that never resolves.
async fn maybe_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
