//! Shared application state handed to every HTTP handler.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::browser::ChromiumProvider;
use crate::core::config::PilotConfig;
use crate::escalation::EscalationQueue;
use crate::session::SessionRegistry;

pub struct AppState {
    pub registry: SessionRegistry<ChromiumProvider>,
    pub escalation: EscalationQueue,
    pub config: PilotConfig,
    /// Viewer access token → account id. Tokens are minted by session start
    /// and die with the process.
    pub viewer_tokens: Mutex<HashMap<String, String>>,
}

impl AppState {
    pub fn new(config: PilotConfig) -> Self {
        Self {
            registry: SessionRegistry::new(ChromiumProvider::discover()),
            escalation: EscalationQueue::new(),
            config,
            viewer_tokens: Mutex::new(HashMap::new()),
        }
    }

    pub async fn mint_viewer_token(&self, account_id: &str) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.viewer_tokens
            .lock()
            .await
            .insert(token.clone(), account_id.to_string());
        token
    }

    pub async fn account_for_token(&self, token: &str) -> Option<String> {
        self.viewer_tokens.lock().await.get(token).cloned()
    }

    pub async fn drop_tokens_for(&self, account_id: &str) {
        self.viewer_tokens
            .lock()
            .await
            .retain(|_, v| v != account_id);
    }
}
