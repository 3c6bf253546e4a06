//! Outbound message delivery.

use crate::browser::{HandleProvider, PageDriver, TabSource};
use crate::core::config::PilotConfig;
use crate::core::error::OpError;
use crate::core::types::Account;
use crate::escalation::EscalationQueue;
use crate::session::SessionRegistry;

use super::{close_tab, log_phase, open_tab, OpPhase};

/// Type `text` into the conversation's composer and send it.
///
/// Falls back to the Enter key when the send button is not rendered; some
/// composer variants only submit on keyboard.
pub async fn send_message<P>(
    registry: &SessionRegistry<P>,
    escalation: &EscalationQueue,
    config: &PilotConfig,
    account: &Account,
    conversation_id: &str,
    text: &str,
) -> Result<(), OpError>
where
    P: HandleProvider,
    P::Handle: TabSource,
{
    log_phase("send", &account.id, OpPhase::Starting);
    let session = registry.acquire(&account.id, account.proxy.as_ref()).await?;
    session.touch();
    let driver = open_tab(&session.handle).await?;

    let result = async {
        super::inbox::ensure_authenticated_at(
            &driver,
            escalation,
            config,
            account,
            &config.site.conversation_url(conversation_id),
        )
        .await?;
        log_phase("send", &account.id, OpPhase::Acting);

        let wait = config.selector_timeout();
        driver.click(&config.site.messenger_input, wait).await?;
        driver
            .type_text(&config.site.messenger_input, text, &config.delays, wait)
            .await?;
        config.delays.between_interactions().await;

        match driver.click(&config.site.send_button, wait).await {
            Ok(()) => {}
            Err(OpError::ElementNotFound { .. }) => {
                driver.press_enter(&config.site.messenger_input, wait).await?;
            }
            Err(e) => return Err(e),
        }
        config.delays.after_submit().await;
        Ok(())
    }
    .await;

    close_tab(driver).await;
    session.touch();

    match &result {
        Ok(()) => {
            tracing::info!("message sent to {} for {}", conversation_id, account.id);
            log_phase("send", &account.id, OpPhase::Completed);
        }
        Err(e) => {
            log_phase("send", &account.id, OpPhase::Failed);
            if matches!(*e, OpError::LoginFailed) {
                registry.release(&account.id).await;
            }
        }
    }
    result
}
