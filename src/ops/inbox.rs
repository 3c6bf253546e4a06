//! Inbox reads: conversation listing and per-conversation history.

use crate::browser::{HandleProvider, PageDriver, TabSource};
use crate::core::config::PilotConfig;
use crate::core::error::OpError;
use crate::core::types::{Account, Conversation, Message};
use crate::escalation::EscalationQueue;
use crate::markup::{ConversationListExtractor, MessageListExtractor, PageExtractor};
use crate::session::SessionRegistry;

use super::{close_tab, is_authenticated, log_phase, open_tab, OpPhase};

/// Land the tab on `url` authenticated, running the login flow in place when
/// the stored state no longer holds.
pub(crate) async fn ensure_authenticated_at<D: PageDriver>(
    driver: &D,
    escalation: &EscalationQueue,
    config: &PilotConfig,
    account: &Account,
    url: &str,
) -> Result<(), OpError> {
    driver.goto(url).await?;
    config.delays.after_nav().await;

    if is_authenticated(driver, &config.site, config).await {
        return Ok(());
    }

    super::login::authenticate_on(driver, escalation, config, account).await?;
    driver.goto(url).await?;
    config.delays.after_nav().await;

    if is_authenticated(driver, &config.site, config).await {
        Ok(())
    } else {
        Err(OpError::NotAuthenticated)
    }
}

/// List the account's conversations, newest activity first as the site
/// renders them.
pub async fn list_conversations<P>(
    registry: &SessionRegistry<P>,
    escalation: &EscalationQueue,
    config: &PilotConfig,
    account: &Account,
) -> Result<Vec<Conversation>, OpError>
where
    P: HandleProvider,
    P::Handle: TabSource,
{
    log_phase("conversations", &account.id, OpPhase::Starting);
    let session = registry.acquire(&account.id, account.proxy.as_ref()).await?;
    session.touch();
    let driver = open_tab(&session.handle).await?;

    let result = async {
        ensure_authenticated_at(
            &driver,
            escalation,
            config,
            account,
            &config.site.messenger_url(),
        )
        .await?;
        log_phase("conversations", &account.id, OpPhase::Acting);

        driver
            .wait_for(&config.site.chat_item, config.selector_timeout())
            .await?;
        let extractor = ConversationListExtractor { markup: &config.site };
        extractor.extract(&driver).await
    }
    .await;

    close_tab(driver).await;
    session.touch();

    match &result {
        Ok(list) => {
            tracing::info!("listed {} conversations for {}", list.len(), account.id);
            log_phase("conversations", &account.id, OpPhase::Completed);
        }
        Err(e) => {
            log_phase("conversations", &account.id, OpPhase::Failed);
            if matches!(*e, OpError::LoginFailed) {
                registry.release(&account.id).await;
            }
        }
    }
    result
}

/// Fetch one conversation's visible history.
///
/// A single scroll to the container's top asks the site for earlier messages;
/// one settle delay later, whatever is rendered is what gets extracted.
pub async fn list_messages<P>(
    registry: &SessionRegistry<P>,
    escalation: &EscalationQueue,
    config: &PilotConfig,
    account: &Account,
    conversation_id: &str,
) -> Result<Vec<Message>, OpError>
where
    P: HandleProvider,
    P::Handle: TabSource,
{
    log_phase("messages", &account.id, OpPhase::Starting);
    let session = registry.acquire(&account.id, account.proxy.as_ref()).await?;
    session.touch();
    let driver = open_tab(&session.handle).await?;

    let result = async {
        ensure_authenticated_at(
            &driver,
            escalation,
            config,
            account,
            &config.site.conversation_url(conversation_id),
        )
        .await?;
        log_phase("messages", &account.id, OpPhase::Acting);

        driver
            .wait_for(&config.site.messages_container, config.selector_timeout())
            .await?;

        let _ = driver.eval_json(config.site.scroll_top_script()).await;
        config.delays.after_submit().await;

        let extractor = MessageListExtractor {
            markup: &config.site,
            conversation_id: conversation_id.to_string(),
        };
        extractor.extract(&driver).await
    }
    .await;

    close_tab(driver).await;
    session.touch();

    match &result {
        Ok(list) => {
            tracing::info!(
                "extracted {} messages from {} for {}",
                list.len(),
                conversation_id,
                account.id
            );
            log_phase("messages", &account.id, OpPhase::Completed);
        }
        Err(e) => {
            log_phase("messages", &account.id, OpPhase::Failed);
            if matches!(*e, OpError::LoginFailed) {
                registry.release(&account.id).await;
            }
        }
    }
    result
}
