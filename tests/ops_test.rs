//! End-to-end operation flows against a scripted site.
//!
//! The fake models just enough of the marketplace to exercise both login
//! paths, the challenge rendezvous, and extraction failure handling: the
//! password field renders only after the login identifier is submitted, a
//! stored jar authenticates on injection, and submitting credentials can
//! raise a challenge that a typed answer clears.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use bazaar_pilot::browser::{BrowserHandle, HandleProvider, PageDriver, TabSource};
use bazaar_pilot::core::config::{DelayPolicy, PilotConfig};
use bazaar_pilot::core::error::OpError;
use bazaar_pilot::core::types::{Account, LoginPath, ProxyDescriptor};
use bazaar_pilot::escalation::EscalationQueue;
use bazaar_pilot::ops;
use bazaar_pilot::session::SessionRegistry;

// ── Scripted site ────────────────────────────────────────────────────────────

#[derive(Default)]
struct SiteModel {
    authenticated: bool,
    /// Injecting the stored jar counts as a valid login.
    cookies_valid: bool,
    /// The password field renders only after the first submit.
    password_visible: bool,
    /// Submitting credentials raises a challenge instead of logging in.
    challenge_on_submit: bool,
    challenge_active: bool,
    challenge_resolved: bool,
    /// The message container never renders.
    container_broken: bool,
    current_url: String,
    log: Vec<String>,
}

impl SiteModel {
    fn count(&self, needle: &str) -> usize {
        self.log.iter().filter(|l| l.contains(needle)).count()
    }

    fn position(&self, needle: &str) -> Option<usize> {
        self.log.iter().position(|l| l.contains(needle))
    }
}

struct FakeProvider {
    site: Arc<Mutex<SiteModel>>,
    launches: Arc<AtomicUsize>,
}

#[async_trait]
impl HandleProvider for FakeProvider {
    type Handle = FakeHandle;

    async fn launch(&self, _proxy: Option<&ProxyDescriptor>) -> Result<FakeHandle, OpError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(FakeHandle {
            site: self.site.clone(),
            alive: AtomicBool::new(true),
        })
    }
}

struct FakeHandle {
    site: Arc<Mutex<SiteModel>>,
    alive: AtomicBool,
}

#[async_trait]
impl BrowserHandle for FakeHandle {
    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn ws_url(&self) -> String {
        "ws://127.0.0.1:0/devtools".into()
    }
}

#[async_trait]
impl TabSource for FakeHandle {
    type Tab = FakeTab;

    async fn open_tab(&self) -> Result<FakeTab, OpError> {
        Ok(FakeTab {
            site: self.site.clone(),
        })
    }
}

struct FakeTab {
    site: Arc<Mutex<SiteModel>>,
}

impl FakeTab {
    fn check(&self, selector: &str, timeout: Duration) -> Result<(), OpError> {
        let site = self.site.lock().unwrap();
        let present = if selector.contains("password") {
            site.password_visible
        } else if selector.contains("header/username") {
            site.authenticated
        } else if selector.contains("messenger/messages") {
            !site.container_broken
        } else if selector.contains("captcha") {
            site.challenge_active
        } else {
            true
        };
        if present {
            Ok(())
        } else {
            Err(OpError::ElementNotFound {
                selector: selector.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}

#[async_trait]
impl PageDriver for FakeTab {
    async fn goto(&self, url: &str) -> Result<(), OpError> {
        let mut site = self.site.lock().unwrap();
        site.current_url = url.to_string();
        site.log.push(format!("goto {}", url));
        Ok(())
    }

    async fn current_url(&self) -> Option<String> {
        Some(self.site.lock().unwrap().current_url.clone())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), OpError> {
        self.check(selector, timeout)
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), OpError> {
        self.check(selector, timeout)?;
        let mut site = self.site.lock().unwrap();
        site.log.push(format!("click {}", selector));
        if selector.contains("submit") {
            if !site.password_visible {
                site.password_visible = true;
            } else if site.challenge_on_submit && !site.challenge_resolved {
                site.challenge_active = true;
            } else {
                site.authenticated = true;
                site.current_url = "https://www.avito.ru/".into();
            }
        }
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &str,
        _text: &str,
        _delays: &DelayPolicy,
        timeout: Duration,
    ) -> Result<(), OpError> {
        self.check(selector, timeout)?;
        let mut site = self.site.lock().unwrap();
        site.log.push(format!("type {}", selector));
        Ok(())
    }

    async fn press_enter(&self, selector: &str, timeout: Duration) -> Result<(), OpError> {
        self.check(selector, timeout)?;
        let mut site = self.site.lock().unwrap();
        site.log.push(format!("enter {}", selector));
        if selector.contains("captcha") {
            site.challenge_active = false;
            site.challenge_resolved = true;
            site.authenticated = true;
            site.current_url = "https://www.avito.ru/".into();
        }
        Ok(())
    }

    async fn eval_json(&self, script: String) -> Result<serde_json::Value, OpError> {
        let mut site = self.site.lock().unwrap();
        if script.contains("scrollTop") {
            site.log.push("scroll".into());
            return Ok(serde_json::json!(true));
        }
        if script.contains("has_voice") {
            return Ok(serde_json::json!([
                { "index": 0, "content": "when can I pick it up?", "created": "10:02", "incoming": true },
                { "index": 1, "content": "tonight after 7", "created": "10:05", "incoming": false }
            ]));
        }
        if script.contains("unread_count") {
            return Ok(serde_json::json!([
                {
                    "id": "chat-1",
                    "user_name": "Dana",
                    "last_message": "when can I pick it up?",
                    "last_message_time": "10:02",
                    "unread_count": 1
                }
            ]));
        }
        Ok(serde_json::Value::Null)
    }

    async fn eval_bool(&self, _script: String) -> bool {
        self.site.lock().unwrap().challenge_active
    }

    async fn page_html(&self) -> Option<String> {
        Some("<div>marketplace</div>".into())
    }

    async fn inject_cookies(&self, _jar: &str) -> Result<usize, OpError> {
        let mut site = self.site.lock().unwrap();
        site.log.push("inject".into());
        if site.cookies_valid {
            site.authenticated = true;
        }
        Ok(1)
    }

    async fn export_cookies(&self) -> Result<String, OpError> {
        self.site.lock().unwrap().log.push("export".into());
        Ok("fresh-jar".into())
    }

    async fn screenshot(&self, _selector: &str) -> Result<Vec<u8>, OpError> {
        self.site.lock().unwrap().log.push("screenshot".into());
        Ok(vec![0x89, 0x50, 0x4E, 0x47])
    }

    async fn close(&self) {
        self.site.lock().unwrap().log.push("close".into());
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn test_config() -> PilotConfig {
    let mut cfg = PilotConfig::default();
    cfg.delays = DelayPolicy {
        nav_ms: (0, 0),
        interact_ms: (0, 0),
        submit_ms: (0, 0),
        keystroke_ms: (0, 0),
    };
    cfg.selector_timeout_secs = Some(1);
    cfg.challenge_timeout_secs = Some(5);
    cfg
}

fn account(id: &str, cookies: Option<&str>) -> Account {
    Account {
        id: id.into(),
        login: "79990001122".into(),
        password: "hunter2".into(),
        cookies: cookies.map(str::to_string),
        proxy: None,
    }
}

struct Rig {
    site: Arc<Mutex<SiteModel>>,
    launches: Arc<AtomicUsize>,
    registry: Arc<SessionRegistry<FakeProvider>>,
    escalation: Arc<EscalationQueue>,
    config: Arc<PilotConfig>,
}

fn rig(model: SiteModel) -> Rig {
    let site = Arc::new(Mutex::new(model));
    let launches = Arc::new(AtomicUsize::new(0));
    let provider = FakeProvider {
        site: site.clone(),
        launches: launches.clone(),
    };
    Rig {
        site,
        launches,
        registry: Arc::new(SessionRegistry::new(provider)),
        escalation: Arc::new(EscalationQueue::new()),
        config: Arc::new(test_config()),
    }
}

// ── Login paths ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn cookie_fast_path_returns_stored_jar_unchanged_and_never_escalates() {
    let r = rig(SiteModel {
        cookies_valid: true,
        ..Default::default()
    });
    let acct = account("acct-a", Some("stored-jar"));

    let outcome = ops::login::login(&r.registry, &r.escalation, &r.config, &acct)
        .await
        .unwrap();

    assert_eq!(outcome.path, LoginPath::CookieFastPath);
    // The jar goes back exactly as stored, not re-exported from the browser.
    assert_eq!(outcome.cookies, "stored-jar");
    assert_eq!(r.escalation.pending_count().await, 0);

    let site = r.site.lock().unwrap();
    assert_eq!(site.count("inject"), 1);
    assert_eq!(site.count("export"), 0);
    assert_eq!(site.count("screenshot"), 0);
}

#[tokio::test]
async fn credential_flow_submits_login_before_the_password_prompt() {
    let r = rig(SiteModel::default());
    let acct = account("acct-two-step", None);

    // The fake only renders the password field after the first submit, so
    // success here pins the two-step ordering.
    let outcome = ops::login::login(&r.registry, &r.escalation, &r.config, &acct)
        .await
        .unwrap();
    assert_eq!(outcome.path, LoginPath::CredentialFlow);
    assert_eq!(outcome.cookies, "fresh-jar");

    let site = r.site.lock().unwrap();
    let typed_login = site.position("type input[type=\"tel\"]").unwrap();
    let first_submit = site.position("click button").unwrap();
    let typed_password = site.position("type input[type=\"password\"]").unwrap();
    assert!(typed_login < first_submit);
    assert!(first_submit < typed_password);
    assert_eq!(site.count("click button"), 2);
}

#[tokio::test]
async fn blocked_login_resolves_after_an_operator_answer() {
    let r = rig(SiteModel {
        challenge_on_submit: true,
        ..Default::default()
    });
    let acct = account("acct-b", None);

    let task = tokio::spawn({
        let (registry, escalation, config, acct) = (
            r.registry.clone(),
            r.escalation.clone(),
            r.config.clone(),
            acct.clone(),
        );
        async move { ops::login::login(&registry, &escalation, &config, &acct).await }
    });

    let mut pending = Vec::new();
    for _ in 0..500 {
        pending = r.escalation.list_pending().await;
        if !pending.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(pending.len(), 1, "login never escalated a challenge");
    assert!(!pending[0].image.is_empty());
    // Give the blocked operation a beat to park on the rendezvous.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(r.escalation.resolve(&pending[0].id, "7431").await);

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome.path, LoginPath::CredentialFlow);
    assert_eq!(outcome.cookies, "fresh-jar");
    assert_eq!(r.escalation.pending_count().await, 0);
    // The answer was typed into the challenge input and committed.
    assert_eq!(r.site.lock().unwrap().count("enter input[name=\"captcha\"]"), 1);
}

#[tokio::test]
async fn unanswered_challenge_times_out_and_leaves_no_pending_entry() {
    let r = rig(SiteModel {
        challenge_on_submit: true,
        ..Default::default()
    });
    let mut cfg = test_config();
    cfg.challenge_timeout_secs = Some(0);
    let acct = account("acct-t", None);

    let err = ops::login::login(&r.registry, &r.escalation, &cfg, &acct)
        .await
        .unwrap_err();
    assert!(matches!(err, OpError::ChallengeTimeout(_)));
    assert_eq!(r.escalation.pending_count().await, 0);
    // A timeout is not a definitive login failure; the session survives.
    assert!(r.registry.peek("acct-t").await.is_some());
}

// ── Extraction failures ──────────────────────────────────────────────────────

#[tokio::test]
async fn failed_extraction_keeps_the_session_for_the_next_call() {
    let r = rig(SiteModel {
        cookies_valid: true,
        container_broken: true,
        ..Default::default()
    });
    let acct = account("acct-d", Some("stored-jar"));

    let err = ops::inbox::list_messages(&r.registry, &r.escalation, &r.config, &acct, "chat-1")
        .await
        .unwrap_err();
    assert!(matches!(err, OpError::ElementNotFound { .. }));
    assert!(r.registry.peek("acct-d").await.is_some());

    // Site recovers; the next call reuses the session without re-login.
    r.site.lock().unwrap().container_broken = false;
    let messages = ops::inbox::list_messages(&r.registry, &r.escalation, &r.config, &acct, "chat-1")
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(r.launches.load(Ordering::SeqCst), 1);

    let site = r.site.lock().unwrap();
    assert_eq!(site.count("inject"), 1);
    // History is requested with a single scroll to the top.
    assert_eq!(site.count("scroll"), 1);
}

#[tokio::test]
async fn conversations_flow_lists_through_a_live_session() {
    let r = rig(SiteModel {
        cookies_valid: true,
        ..Default::default()
    });
    let acct = account("acct-c", Some("stored-jar"));

    let conversations =
        ops::inbox::list_conversations(&r.registry, &r.escalation, &r.config, &acct)
            .await
            .unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].id, "chat-1");
    assert_eq!(r.launches.load(Ordering::SeqCst), 1);
}
