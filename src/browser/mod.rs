//! Browser handle provisioning.
//!
//! The provider is the only component that knows how a browser comes to
//! exist; everything above it speaks the two small traits below. The session
//! registry is generic over [`HandleProvider`] so its lifecycle invariants can
//! be tested against a stub with no Chromium installed.

pub mod driver;
pub mod launcher;
pub mod page;

use async_trait::async_trait;

use crate::core::error::OpError;
use crate::core::types::ProxyDescriptor;

/// A live controllable-browser instance, exclusively owned by one session.
#[async_trait]
pub trait BrowserHandle: Send + Sync + 'static {
    /// Cheap liveness probe; a dead handle gets replaced on the next acquire.
    async fn is_alive(&self) -> bool;

    /// Shut the underlying browser down. Idempotent.
    async fn close(&self) -> anyhow::Result<()>;

    /// CDP websocket endpoint, consumed by the remote-access facade.
    fn ws_url(&self) -> String;
}

#[async_trait]
pub trait HandleProvider: Send + Sync + 'static {
    type Handle: BrowserHandle;

    /// Launch a fresh browser, configured with `proxy` when given. A failure
    /// here is fatal to the requested operation and registers nothing.
    async fn launch(&self, proxy: Option<&ProxyDescriptor>) -> Result<Self::Handle, OpError>;
}

pub use driver::{ChromiumDriver, PageDriver, TabSource};
pub use launcher::{find_chrome_executable, ChromiumHandle, ChromiumProvider};
