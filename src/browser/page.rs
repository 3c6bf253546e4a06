//! Page-level CDP helpers shared by every messenger operation: bounded
//! selector waits, cookie import/export, human-paced typing, screenshots.

use std::time::Duration;

use anyhow::{anyhow, Result};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetCookiesParams};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use tracing::{debug, warn};

use crate::core::config::DelayPolicy;
use crate::core::error::OpError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Poll for `selector` until it attaches, or fail with
/// [`OpError::ElementNotFound`] after `timeout`.
pub async fn wait_for_selector(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<Element, OpError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(OpError::ElementNotFound {
                selector: selector.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Navigate with a hard deadline mapped to [`OpError::NavigationTimeout`].
pub async fn goto_with_timeout(page: &Page, url: &str, timeout: Duration) -> Result<(), OpError> {
    match tokio::time::timeout(timeout, page.goto(url)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(OpError::Browser(anyhow!("navigation to {} failed: {}", url, e))),
        Err(_) => Err(OpError::NavigationTimeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Inject a serialized cookie jar into `page` before navigation.
///
/// The jar is a JSON array as produced by [`export_cookies`]; individual
/// entries that fail to deserialize are skipped so one stale cookie never
/// blocks a login.
pub async fn inject_cookies(page: &Page, raw_json: &str) -> Result<usize> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw_json)
        .map_err(|e| anyhow!("cookie jar is not a JSON array: {}", e))?;

    let cookie_params: Vec<CookieParam> = values
        .iter()
        .filter_map(|v| serde_json::from_value::<CookieParam>(v.clone()).ok())
        .collect();

    if cookie_params.is_empty() {
        warn!("cookie jar contained no valid cookies, skipping injection");
        return Ok(0);
    }

    let count = cookie_params.len();
    page.execute(SetCookiesParams::new(cookie_params))
        .await
        .map_err(|e| anyhow!("cookie injection failed: {}", e))?;
    debug!("injected {} cookies", count);
    Ok(count)
}

/// Serialize the page's current cookie jar to JSON.
pub async fn export_cookies(page: &Page) -> Result<String> {
    let cookies = page
        .get_cookies()
        .await
        .map_err(|e| anyhow!("cookie export failed: {}", e))?;
    serde_json::to_string(&cookies).map_err(|e| anyhow!("cookie serialization failed: {}", e))
}

/// Type `text` into `element` one keystroke at a time with jittered pauses.
///
/// Delays are pre-sampled because the thread-local RNG cannot live across an
/// await point.
pub async fn type_like_human(
    element: &Element,
    text: &str,
    delays: &DelayPolicy,
) -> Result<(), OpError> {
    element
        .focus()
        .await
        .map_err(|e| OpError::Browser(anyhow!("focus failed: {}", e)))?;

    let pauses: Vec<Duration> = text
        .chars()
        .map(|_| DelayPolicy::sample(delays.keystroke_ms))
        .collect();

    for (ch, pause) in text.chars().zip(pauses) {
        element
            .type_str(&ch.to_string())
            .await
            .map_err(|e| OpError::Browser(anyhow!("keystroke failed: {}", e)))?;
        tokio::time::sleep(pause).await;
    }
    Ok(())
}

/// Full-viewport PNG capture.
pub async fn screenshot_png(page: &Page) -> Result<Vec<u8>> {
    page.screenshot(
        ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build(),
    )
    .await
    .map_err(|e| anyhow!("screenshot capture failed: {}", e))
}

/// Crop to one element when possible, otherwise fall back to the viewport.
/// Challenge images go to a human operator, so any capture beats none.
pub async fn screenshot_element_or_page(page: &Page, selector: &str) -> Result<Vec<u8>> {
    if let Ok(element) = page.find_element(selector).await {
        if let Ok(bytes) = element.screenshot(CaptureScreenshotFormat::Png).await {
            return Ok(bytes);
        }
        debug!("element capture failed for {}, falling back to viewport", selector);
    }
    screenshot_png(page).await
}
