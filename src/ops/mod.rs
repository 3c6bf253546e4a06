//! Messenger operations over a live session.
//!
//! Every operation follows the same lifecycle: acquire the account's session,
//! open a fresh tab, make sure the tab is authenticated, act, and close the
//! tab on every exit path. A failed operation normally leaves the session
//! alive for the next attempt; only a definitive login failure tears it down.
//!
//! Operations are generic over the provider/[`TabSource`] pair, so the whole
//! flow is exercisable against scripted stand-ins.

pub mod inbox;
pub mod login;
pub mod send;

use tracing::info;

use crate::browser::{PageDriver, TabSource};
use crate::core::config::PilotConfig;
use crate::core::error::OpError;
use crate::markup::SiteMarkup;

#[derive(Clone, Copy, Debug)]
pub enum OpPhase {
    Starting,
    Authenticating,
    ChallengeWait,
    Acting,
    Completed,
    Failed,
}

pub(crate) fn log_phase(op: &str, account_id: &str, phase: OpPhase) {
    info!("op={} account={} phase={:?}", op, account_id, phase);
}

/// Open a hardened tab on the session's browser.
pub(crate) async fn open_tab<H: TabSource>(handle: &H) -> Result<H::Tab, OpError> {
    handle.open_tab().await
}

/// Close the tab ignoring errors; used on every operation exit path.
pub(crate) async fn close_tab<D: PageDriver>(driver: D) {
    driver.close().await;
}

/// An authenticated surface shows the logged-in marker and is not parked on
/// the login route.
pub(crate) async fn is_authenticated<D: PageDriver>(
    driver: &D,
    markup: &SiteMarkup,
    config: &PilotConfig,
) -> bool {
    let on_login_route = driver
        .current_url()
        .await
        .map(|u| u.contains(&markup.login_path))
        .unwrap_or(false);
    if on_login_route {
        return false;
    }
    driver
        .exists(&markup.authenticated_marker, config.selector_timeout())
        .await
}
