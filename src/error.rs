use thiserror::Error;

/// Failures inside the tracking engine. None of these are fatal to a
/// monitoring session; each is handled at the boundary where it occurs.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A selector matched nothing useful or could not be parsed at all.
    /// The chain moves on to the next fallback.
    #[error("selector `{selector}` unusable: {reason}")]
    SelectorMiss { selector: String, reason: String },

    /// A previously tracked element no longer resolves in the current
    /// document. Triggers re-location by text match or record cleanup.
    #[error("tracked element is no longer present in the document")]
    StaleReference,

    /// Navigation index outside the current history bounds. The cursor is
    /// left unchanged.
    #[error("response index {index} out of range (history holds {len})")]
    OutOfRange { index: isize, len: usize },

    /// Building a panel view failed. Surfaced to the panel as a
    /// recoverable error event, never propagated further.
    #[error("panel render failed: {0}")]
    RenderFailure(String),

    /// A control request could not be served, e.g. it arrived before the
    /// engine finished attaching.
    #[error("control request failed: {0}")]
    CommunicationFailure(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Failures in the browser attachment layer (endpoint discovery and the
/// DevTools session).
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("debug endpoint not reachable: {0}")]
    EndpointUnavailable(String),

    #[error("no browser with an open debugging port found")]
    NoBrowserFound,

    #[error("no tab on a supported chat site is open")]
    NoChatTab,

    #[error("websocket connect failed: {0}")]
    ConnectionFailed(String),

    #[error("protocol error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("call to {0} timed out")]
    Timeout(String),

    #[error("browser session closed")]
    SessionClosed,

    #[error("malformed response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
