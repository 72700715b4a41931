//! How the engine sees the page: a tab abstraction plus the real
//! DevTools-protocol implementation behind it.

pub mod cdp;
pub mod discover;

use async_trait::async_trait;

use crate::error::BrowserError;

pub use cdp::CdpTab;
pub use discover::discover_endpoint;

/// One coalesced burst of DOM mutations reported by the page-side
/// observer. Carries no payload; a signal only means "look again soon".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationSignal;

/// A capture of the tab: where it was and what its document held.
#[derive(Debug, Clone)]
pub struct RawSnapshot {
    pub url: String,
    pub html: String,
}

/// The engine's view of a browser tab. The watcher only ever asks for the
/// current snapshot; attachment, observers and reconnects are the
/// implementation's business. Tests substitute scripted fakes.
#[async_trait]
pub trait BrowserTab: Send + Sync {
    async fn snapshot(&self) -> Result<RawSnapshot, BrowserError>;
}
