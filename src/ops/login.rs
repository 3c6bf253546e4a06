//! Login: the only operation allowed to drive the site's auth surfaces.
//!
//! Two paths. The cookie fast path injects the stored jar, opens the
//! messenger, and confirms the logged-in marker. When the jar is missing or
//! stale, the credential flow walks the two-step login form, pausing for a
//! human-answered challenge whenever one appears.

use tracing::{info, warn};

use crate::browser::{HandleProvider, PageDriver, TabSource};
use crate::core::config::PilotConfig;
use crate::core::error::OpError;
use crate::core::types::{Account, LoginOutcome, LoginPath};
use crate::escalation::EscalationQueue;
use crate::markup::challenge_present;
use crate::session::SessionRegistry;

use super::{close_tab, is_authenticated, log_phase, open_tab, OpPhase};

/// Authenticate `account`, registering (or reusing) its session.
///
/// A definitive login failure releases the session so the next attempt starts
/// from a clean browser; transient errors leave it registered.
pub async fn login<P>(
    registry: &SessionRegistry<P>,
    escalation: &EscalationQueue,
    config: &PilotConfig,
    account: &Account,
) -> Result<LoginOutcome, OpError>
where
    P: HandleProvider,
    P::Handle: TabSource,
{
    log_phase("login", &account.id, OpPhase::Starting);
    let session = registry.acquire(&account.id, account.proxy.as_ref()).await?;
    session.touch();

    let driver = open_tab(&session.handle).await?;
    let result = authenticate_on(&driver, escalation, config, account).await;
    close_tab(driver).await;
    session.touch();

    match &result {
        Ok(outcome) => {
            info!("account {} authenticated via {:?}", account.id, outcome.path);
            log_phase("login", &account.id, OpPhase::Completed);
        }
        Err(OpError::LoginFailed) => {
            log_phase("login", &account.id, OpPhase::Failed);
            registry.release(&account.id).await;
        }
        Err(e) => {
            log_phase("login", &account.id, OpPhase::Failed);
            warn!("login for {} failed without teardown: {}", account.id, e);
        }
    }
    result
}

/// Authenticate on an already-open tab. Shared with the other operations,
/// which fall back here when their tab lands unauthenticated.
pub(crate) async fn authenticate_on<D: PageDriver>(
    driver: &D,
    escalation: &EscalationQueue,
    config: &PilotConfig,
    account: &Account,
) -> Result<LoginOutcome, OpError> {
    log_phase("login", &account.id, OpPhase::Authenticating);
    let markup = &config.site;

    if let Some(jar) = account.cookies.as_deref().filter(|c| !c.is_empty()) {
        if let Err(e) = driver.inject_cookies(jar).await {
            warn!("cookie injection for {} failed, falling back: {}", account.id, e);
        }
        driver.goto(&markup.messenger_url()).await?;
        config.delays.after_nav().await;

        if is_authenticated(driver, markup, config).await {
            // Valid jar: hand it back untouched.
            return Ok(LoginOutcome {
                cookies: jar.to_string(),
                path: LoginPath::CookieFastPath,
            });
        }
        info!("stored cookies for {} are stale, running credential flow", account.id);
    }

    credential_flow(driver, escalation, config, account).await
}

/// Walk the credential form. The site renders it in two steps: the password
/// field only appears after the login identifier has been submitted.
async fn credential_flow<D: PageDriver>(
    driver: &D,
    escalation: &EscalationQueue,
    config: &PilotConfig,
    account: &Account,
) -> Result<LoginOutcome, OpError> {
    let markup = &config.site;
    let wait = config.selector_timeout();

    driver.goto(&markup.login_url()).await?;
    config.delays.after_nav().await;

    // Some defenses fire before any field is touched.
    if challenge_present(driver, markup).await {
        resolve_challenge(driver, escalation, config, &account.id).await?;
    }

    driver
        .type_text(&markup.login_input, &account.login, &config.delays, wait)
        .await?;
    config.delays.between_interactions().await;
    driver.click(&markup.submit_button, wait).await?;
    config.delays.after_submit().await;

    driver
        .type_text(&markup.password_input, &account.password, &config.delays, wait)
        .await?;
    config.delays.between_interactions().await;
    driver.click(&markup.submit_button, wait).await?;
    config.delays.after_submit().await;

    if challenge_present(driver, markup).await {
        resolve_challenge(driver, escalation, config, &account.id).await?;
        if challenge_present(driver, markup).await {
            warn!("challenge for {} persisted after the answer", account.id);
            return Err(OpError::LoginFailed);
        }
    }

    if !is_authenticated(driver, markup, config).await {
        return Err(OpError::LoginFailed);
    }

    let cookies = driver.export_cookies().await?;
    Ok(LoginOutcome {
        cookies,
        path: LoginPath::CredentialFlow,
    })
}

/// Escalate the on-page challenge to a human operator and type the answer
/// back once it arrives. Blocks up to the configured challenge timeout.
pub(crate) async fn resolve_challenge<D: PageDriver>(
    driver: &D,
    escalation: &EscalationQueue,
    config: &PilotConfig,
    account_id: &str,
) -> Result<(), OpError> {
    log_phase("login", account_id, OpPhase::ChallengeWait);
    let markup = &config.site;

    let combined = markup.challenge_selectors.join(", ");
    let image = driver.screenshot(&combined).await?;
    let challenge_id = escalation.submit(account_id, &image).await;
    let answer = escalation.wait(&challenge_id, config.challenge_timeout()).await?;

    let wait = config.selector_timeout();
    driver
        .type_text(&markup.challenge_input, &answer, &config.delays, wait)
        .await?;
    driver.press_enter(&markup.challenge_input, wait).await?;
    config.delays.after_submit().await;
    Ok(())
}
