/// Scheduling knobs for the watch loop. Values mirror the timings the
/// chat frontends were tuned against; tests shrink them where useful.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// One-shot scans after a session starts, to catch late-rendering
    /// conversation DOMs
    pub initial_scan_delays_ms: Vec<u64>,

    /// Recurring full re-scan
    pub coarse_scan_ms: u64,

    /// Generation-indicator probe; a hit short-circuits into a full scan
    pub generation_probe_ms: u64,

    /// Missed-response reconciliation pass (platform-gated)
    pub reconcile_ms: u64,

    /// Tight polling of the currently tracked answer element
    pub tight_poll_ms: u64,
    /// Escalated tight polling while the element still holds placeholder
    /// content
    pub tight_poll_hot_ms: u64,
    /// Escalation window after a new element is first tracked
    pub hot_window_ms: u64,

    /// Coalescing window for bursts of mutation signals
    pub mutation_debounce_ms: u64,

    /// Coalescing window for panel pushes of insignificant deltas
    pub minor_update_debounce_ms: u64,

    /// Settle delay between SPA navigation and the next detection cycle
    pub settle_after_nav_ms: u64,

    /// Retry cadence while the page is not a supported platform
    pub detect_retry_ms: u64,

    /// Upper bound on a single snapshot fetch
    pub snapshot_timeout_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            initial_scan_delays_ms: vec![500, 1000, 2000, 3000],
            coarse_scan_ms: 500,
            generation_probe_ms: 200,
            reconcile_ms: 3000,
            tight_poll_ms: 150,
            tight_poll_hot_ms: 50,
            hot_window_ms: 10_000,
            mutation_debounce_ms: 500,
            minor_update_debounce_ms: 500,
            settle_after_nav_ms: 1000,
            detect_retry_ms: 2000,
            snapshot_timeout_ms: 10_000,
        }
    }
}
