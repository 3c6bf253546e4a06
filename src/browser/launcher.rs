//! Native Chromium launching over `chromiumoxide`.
//!
//! Single source of truth for:
//! * Finding a usable browser executable (env override → PATH → well-known paths).
//! * Stealth launch flags and User-Agent rotation.
//! * [`ChromiumProvider`] / [`ChromiumHandle`] — the production
//!   [`HandleProvider`](super::HandleProvider) implementation, including
//!   per-page hardening and upstream-proxy credential handling.

use std::path::Path;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use rand::seq::IndexedRandom;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserHandle, HandleProvider};
use crate::core::error::OpError;
use crate::core::types::ProxyDescriptor;

const DESKTOP_USER_AGENTS: &[&str] = &[
    // Chrome 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 132 – macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    // Chrome 131 – Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Edge 132 – Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 Edg/132.0.0.0",
];

/// Returns a randomly-chosen realistic desktop User-Agent string.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    DESKTOP_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(DESKTOP_USER_AGENTS[0])
}

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan
/// 3. OS-specific well-known install paths
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/brave-browser",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

/// Build a `BrowserConfig` for headless operation with stealth defaults.
///
/// `--disable-blink-features=AutomationControlled` hides the
/// `navigator.webdriver` flag; the UA is drawn from a realistic desktop pool.
fn build_stealth_config(exe: &str, proxy: Option<&ProxyDescriptor>) -> Result<BrowserConfig> {
    let ua = random_user_agent();

    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width: 1920,
            height: 1080,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(1920, 1080)
        .arg("--disable-gpu")
        .arg("--no-sandbox") // often required in containerized deployments
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-zygote")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", ua));

    if let Some(proxy) = proxy {
        info!("launching with upstream proxy {}", proxy.masked());
        builder = builder.arg(format!("--proxy-server={}", proxy.server_url()));
    }

    builder
        .build()
        .map_err(|e| anyhow!("failed to build browser config: {}", e))
}

/// Navigator hardening injected before every page script runs.
fn stealth_overrides() -> &'static str {
    r#"
Object.defineProperty(navigator, 'webdriver', { get: () => false });
Object.defineProperty(navigator, 'languages', { get: () => ['ru-RU', 'ru', 'en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
"#
}

// ── Production provider ──────────────────────────────────────────────────────

pub struct ChromiumProvider {
    exe: Option<String>,
}

impl ChromiumProvider {
    /// Discover the executable once; launches fail with a clear error when no
    /// browser is installed on this machine.
    pub fn discover() -> Self {
        let exe = find_chrome_executable();
        match &exe {
            Some(path) => info!("browser executable: {}", path),
            None => warn!(
                "no Chromium-family browser found; sessions will fail until one is installed \
                 or CHROME_EXECUTABLE is set"
            ),
        }
        Self { exe }
    }

    pub fn browser_available(&self) -> bool {
        self.exe.is_some()
    }
}

#[async_trait]
impl HandleProvider for ChromiumProvider {
    type Handle = ChromiumHandle;

    async fn launch(&self, proxy: Option<&ProxyDescriptor>) -> Result<ChromiumHandle, OpError> {
        let exe = self.exe.as_deref().ok_or_else(|| {
            OpError::SessionCreationFailed(
                "no Chromium-family browser found; install one or set CHROME_EXECUTABLE".into(),
            )
        })?;

        let config = build_stealth_config(exe, proxy)
            .map_err(|e| OpError::SessionCreationFailed(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| OpError::SessionCreationFailed(format!("launch ({}): {}", exe, e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
        });

        let ws_url = browser.websocket_address().to_string();
        Ok(ChromiumHandle {
            browser: Mutex::new(Some(browser)),
            ws_url,
            handler_task,
            pinned: Mutex::new(None),
            proxy_auth: proxy.and_then(|p| p.credentials()),
        })
    }
}

/// One launched Chromium instance plus its CDP event pump.
pub struct ChromiumHandle {
    browser: Mutex<Option<Browser>>,
    ws_url: String,
    handler_task: JoinHandle<()>,
    /// Gateway tab kept open for manual operator login; read by the
    /// cookie/status control surface.
    pinned: Mutex<Option<Page>>,
    proxy_auth: Option<(String, String)>,
}

impl ChromiumHandle {
    /// Open a fresh hardened tab. The caller owns its lifecycle and must close
    /// it on every exit path.
    pub async fn new_tab(&self) -> Result<Page> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or_else(|| anyhow!("browser already closed"))?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("failed to open tab: {}", e))?;
        drop(guard);

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            stealth_overrides(),
        ))
        .await
        .map_err(|e| anyhow!("failed to inject navigator overrides: {}", e))?;

        if let Some((username, password)) = &self.proxy_auth {
            if let Err(e) = attach_proxy_auth(&page, username.clone(), password.clone()).await {
                warn!("proxy auth handler not attached: {}", e);
            }
        }

        Ok(page)
    }

    /// Keep `page` open as this session's manual-login surface, replacing and
    /// closing any previous one.
    pub async fn pin_page(&self, page: Page) {
        let old = self.pinned.lock().await.replace(page);
        if let Some(old) = old {
            let _ = old.close().await;
        }
    }

    pub async fn pinned_url(&self) -> Option<String> {
        let guard = self.pinned.lock().await;
        let page = guard.as_ref()?.clone();
        drop(guard);
        page.url().await.ok().flatten()
    }

    /// Serialized cookie jar of the pinned gateway tab.
    pub async fn pinned_cookies(&self) -> Option<String> {
        let guard = self.pinned.lock().await;
        let page = guard.as_ref()?.clone();
        drop(guard);
        let cookies = page.get_cookies().await.ok()?;
        serde_json::to_string(&cookies).ok()
    }
}

#[async_trait]
impl BrowserHandle for ChromiumHandle {
    async fn is_alive(&self) -> bool {
        match self.browser.lock().await.as_ref() {
            Some(browser) => browser.pages().await.is_ok(),
            None => false,
        }
    }

    async fn close(&self) -> Result<()> {
        self.pinned.lock().await.take();
        let browser = self.browser.lock().await.take();
        if let Some(mut browser) = browser {
            browser.close().await?;
        }
        self.handler_task.abort();
        Ok(())
    }

    fn ws_url(&self) -> String {
        self.ws_url.clone()
    }
}

/// Answer upstream-proxy auth challenges with the descriptor's credentials.
///
/// Enabling the Fetch domain pauses requests, so the spawned task must also
/// continue every paused request, not just the auth events.
async fn attach_proxy_auth(page: &Page, username: String, password: String) -> Result<()> {
    page.execute(EnableParams {
        patterns: None,
        handle_auth_requests: Some(true),
    })
    .await
    .map_err(|e| anyhow!("Fetch.enable failed: {}", e))?;

    let mut auth_events = page
        .event_listener::<EventAuthRequired>()
        .await
        .map_err(|e| anyhow!("auth event listener: {}", e))?;
    let mut paused_events = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|e| anyhow!("pause event listener: {}", e))?;

    let auth_page = page.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = auth_events.next() => {
                    let Some(event) = event else { break };
                    let response = AuthChallengeResponse {
                        response: AuthChallengeResponseResponse::ProvideCredentials,
                        username: Some(username.clone()),
                        password: Some(password.clone()),
                    };
                    let params = ContinueWithAuthParams {
                        request_id: event.request_id.clone(),
                        auth_challenge_response: response,
                    };
                    if let Err(e) = auth_page.execute(params).await {
                        warn!("proxy auth continuation failed: {}", e);
                    }
                }
                event = paused_events.next() => {
                    let Some(event) = event else { break };
                    if let Err(e) = auth_page
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                    {
                        debug!("request continuation failed: {}", e);
                    }
                }
            }
        }
    });

    Ok(())
}
