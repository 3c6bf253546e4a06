//! Page-driving seam between the operations and the browser.
//!
//! Operations speak [`PageDriver`] — navigate, wait, type, click, extract —
//! and never touch CDP types directly, so the whole operation flow runs
//! against a scripted driver in tests. [`ChromiumDriver`] is the production
//! implementation over a `chromiumoxide` tab.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chromiumoxide::Page;

use super::launcher::ChromiumHandle;
use super::page::{
    export_cookies, goto_with_timeout, inject_cookies, screenshot_element_or_page,
    type_like_human, wait_for_selector,
};
use crate::core::config::DelayPolicy;
use crate::core::error::OpError;

/// Hard ceiling on any single navigation.
const NAV_TIMEOUT: Duration = Duration::from_secs(30);

/// One operation's view of one open tab.
#[async_trait]
pub trait PageDriver: Send + Sync + 'static {
    async fn goto(&self, url: &str) -> Result<(), OpError>;

    async fn current_url(&self) -> Option<String>;

    /// Bounded wait for `selector`; [`OpError::ElementNotFound`] past `timeout`.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), OpError>;

    /// Like [`Self::wait_for`] but absence is an answer, not an error.
    async fn exists(&self, selector: &str, timeout: Duration) -> bool {
        self.wait_for(selector, timeout).await.is_ok()
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), OpError>;

    /// Type into `selector` one keystroke at a time, paced by `delays`.
    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        delays: &DelayPolicy,
        timeout: Duration,
    ) -> Result<(), OpError>;

    async fn press_enter(&self, selector: &str, timeout: Duration) -> Result<(), OpError>;

    /// Run an extraction script and return its JSON result.
    async fn eval_json(&self, script: String) -> Result<serde_json::Value, OpError>;

    /// Run a boolean probe script; evaluation failures read as `false`.
    async fn eval_bool(&self, script: String) -> bool;

    async fn page_html(&self) -> Option<String>;

    async fn inject_cookies(&self, jar: &str) -> Result<usize, OpError>;

    async fn export_cookies(&self) -> Result<String, OpError>;

    /// PNG capture of `selector`, falling back to the viewport.
    async fn screenshot(&self, selector: &str) -> Result<Vec<u8>, OpError>;

    /// Release the tab. Idempotent; errors are swallowed.
    async fn close(&self);
}

/// A [`BrowserHandle`](super::BrowserHandle) that can open driver-backed tabs.
#[async_trait]
pub trait TabSource: Send + Sync {
    type Tab: PageDriver;

    async fn open_tab(&self) -> Result<Self::Tab, OpError>;
}

// ── Production driver ────────────────────────────────────────────────────────

pub struct ChromiumDriver {
    page: Page,
}

impl ChromiumDriver {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn goto(&self, url: &str) -> Result<(), OpError> {
        goto_with_timeout(&self.page, url, NAV_TIMEOUT).await
    }

    async fn current_url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), OpError> {
        wait_for_selector(&self.page, selector, timeout).await.map(|_| ())
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), OpError> {
        let element = wait_for_selector(&self.page, selector, timeout).await?;
        element
            .click()
            .await
            .map_err(|e| OpError::Browser(anyhow!("click on `{}` failed: {}", selector, e)))?;
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        delays: &DelayPolicy,
        timeout: Duration,
    ) -> Result<(), OpError> {
        let element = wait_for_selector(&self.page, selector, timeout).await?;
        type_like_human(&element, text, delays).await
    }

    async fn press_enter(&self, selector: &str, timeout: Duration) -> Result<(), OpError> {
        let element = wait_for_selector(&self.page, selector, timeout).await?;
        element
            .press_key("Enter")
            .await
            .map_err(|e| OpError::Browser(anyhow!("Enter on `{}` failed: {}", selector, e)))?;
        Ok(())
    }

    async fn eval_json(&self, script: String) -> Result<serde_json::Value, OpError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| OpError::Browser(anyhow!("extraction script failed: {}", e)))?;
        result
            .into_value::<serde_json::Value>()
            .map_err(|e| OpError::Browser(anyhow!("extraction payload was not JSON: {}", e)))
    }

    async fn eval_bool(&self, script: String) -> bool {
        self.page
            .evaluate(script)
            .await
            .ok()
            .and_then(|v| v.into_value::<bool>().ok())
            .unwrap_or(false)
    }

    async fn page_html(&self) -> Option<String> {
        self.page
            .evaluate("document.documentElement.outerHTML")
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok())
    }

    async fn inject_cookies(&self, jar: &str) -> Result<usize, OpError> {
        inject_cookies(&self.page, jar).await.map_err(OpError::Browser)
    }

    async fn export_cookies(&self) -> Result<String, OpError> {
        export_cookies(&self.page).await.map_err(OpError::Browser)
    }

    async fn screenshot(&self, selector: &str) -> Result<Vec<u8>, OpError> {
        screenshot_element_or_page(&self.page, selector)
            .await
            .map_err(OpError::Browser)
    }

    async fn close(&self) {
        let _ = self.page.clone().close().await;
    }
}

#[async_trait]
impl TabSource for ChromiumHandle {
    type Tab = ChromiumDriver;

    async fn open_tab(&self) -> Result<ChromiumDriver, OpError> {
        self.new_tab()
            .await
            .map(ChromiumDriver::new)
            .map_err(OpError::Browser)
    }
}
