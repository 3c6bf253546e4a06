//! Upstream proxy preflight.
//!
//! A dead or misconfigured proxy should fail the session request fast with a
//! clear message, not surface minutes later as an opaque navigation timeout.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tracing::info;

use crate::core::types::ProxyDescriptor;

const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);
const PREFLIGHT_TARGET: &str = "https://www.google.com";

/// Probe the proxy with a HEAD request and return the observed latency.
pub async fn preflight(proxy: &ProxyDescriptor) -> Result<u64> {
    let start = Instant::now();

    // Validate before handing to reqwest; the parse error names the field.
    let parsed = url::Url::parse(&proxy.authenticated_url())
        .map_err(|e| anyhow!("proxy descriptor {} is not a valid URL: {}", proxy.masked(), e))?;

    let reqwest_proxy = reqwest::Proxy::all(parsed)
        .map_err(|e| anyhow!("invalid proxy URL {}: {}", proxy.masked(), e))?;

    let client = reqwest::Client::builder()
        .proxy(reqwest_proxy)
        .timeout(PREFLIGHT_TIMEOUT)
        .build()
        .map_err(|e| anyhow!("failed to build proxy client: {}", e))?;

    let response = client
        .head(PREFLIGHT_TARGET)
        .send()
        .await
        .map_err(|e| anyhow!("proxy {} unreachable: {}", proxy.masked(), e))?;

    let latency = start.elapsed().as_millis() as u64;

    if !response.status().is_success() && !response.status().is_redirection() {
        return Err(anyhow!(
            "proxy {} returned status {}",
            proxy.masked(),
            response.status()
        ));
    }

    info!("proxy preflight OK: {} in {}ms", proxy.masked(), latency);
    Ok(latency)
}
