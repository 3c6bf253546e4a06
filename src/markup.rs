//! Site-markup knowledge as data.
//!
//! Every DOM selector and URL the operations touch lives in [`SiteMarkup`],
//! deserializable from `bazaar-pilot.json`, so a site redesign is a config
//! change, not a code change. Extraction itself runs as generated JS handed to
//! the page driver; the JSON it returns is parsed by pure functions that are
//! unit-testable without a browser.

use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::browser::PageDriver;
use crate::core::error::OpError;
use crate::core::types::{Conversation, Direction, Message, MessageKind};

/// Selector/URL table for the target marketplace.
///
/// Defaults match the `data-marker` attribute convention of the site this
/// service was built against; deployments override any subset via config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteMarkup {
    pub base_url: String,
    pub login_path: String,
    pub messenger_path: String,

    // Login surface
    pub login_input: String,
    pub password_input: String,
    pub submit_button: String,
    /// Present only when the landing surface is authenticated.
    pub authenticated_marker: String,

    // Conversation list surface
    pub chat_list: String,
    pub chat_item: String,
    pub chat_id_attr: String,
    pub chat_user_name: String,
    pub chat_last_message: String,
    pub chat_time: String,
    pub chat_unread: String,
    pub chat_item_title: String,
    pub chat_item_id_attr: String,

    // Conversation surface
    pub messages_container: String,
    pub message_item: String,
    pub message_text: String,
    pub message_time: String,
    pub message_image: String,
    pub message_voice: String,
    /// Class carried by incoming messages.
    pub incoming_class: String,
    /// Attribute alternative to [`Self::incoming_class`].
    pub incoming_attr: String,
    pub messenger_input: String,
    pub send_button: String,

    // Challenge surfaces
    pub challenge_selectors: Vec<String>,
    pub challenge_input: String,
    /// Raw-HTML substrings that betray a challenge even when no selector hits.
    pub challenge_html_markers: Vec<String>,
}

impl Default for SiteMarkup {
    fn default() -> Self {
        Self {
            base_url: "https://www.avito.ru".into(),
            login_path: "/profile/login".into(),
            messenger_path: "/profile/messenger".into(),

            login_input: "input[type=\"tel\"], input[name=\"login\"]".into(),
            password_input: "input[type=\"password\"]".into(),
            submit_button: "button[type=\"submit\"]".into(),
            authenticated_marker: "[data-marker=\"header/username\"]".into(),

            chat_list: "[data-marker=\"messenger/chat-list\"]".into(),
            chat_item: "[data-marker=\"messenger/chat-item\"]".into(),
            chat_id_attr: "data-chat-id".into(),
            chat_user_name: "[data-marker=\"chat/user-name\"]".into(),
            chat_last_message: "[data-marker=\"chat/last-message\"]".into(),
            chat_time: "[data-marker=\"chat/time\"]".into(),
            chat_unread: "[data-marker=\"chat/unread-count\"]".into(),
            chat_item_title: "[data-marker=\"chat/item-title\"]".into(),
            chat_item_id_attr: "data-item-id".into(),

            messages_container: "[data-marker=\"messenger/messages\"]".into(),
            message_item: "[data-marker=\"messenger/message\"]".into(),
            message_text: "[data-marker=\"message/text\"]".into(),
            message_time: "[data-marker=\"message/time\"]".into(),
            message_image: "[data-marker=\"message/image\"]".into(),
            message_voice: "[data-marker=\"message/voice\"]".into(),
            incoming_class: "message-in".into(),
            incoming_attr: "data-direction-in".into(),
            messenger_input: "[data-marker=\"messenger/input\"]".into(),
            send_button: "[data-marker=\"messenger/send-button\"]".into(),

            challenge_selectors: vec![
                "iframe[src*=\"recaptcha\"]".into(),
                "iframe[src*=\"captcha\"]".into(),
                ".captcha".into(),
                "[class*=\"captcha\"]".into(),
                "[id*=\"captcha\"]".into(),
                "input[name=\"captcha\"]".into(),
            ],
            challenge_input: "input[name=\"captcha\"], input[type=\"text\"]".into(),
            challenge_html_markers: vec![
                "recaptcha/api".into(),
                "geetest".into(),
                "h-captcha".into(),
                "firewall-captcha".into(),
            ],
        }
    }
}

/// JS-string literal for safe interpolation into generated scripts.
fn js_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

impl SiteMarkup {
    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url, self.login_path)
    }

    pub fn messenger_url(&self) -> String {
        format!("{}{}", self.base_url, self.messenger_path)
    }

    pub fn conversation_url(&self, conversation_id: &str) -> String {
        format!("{}{}/{}", self.base_url, self.messenger_path, conversation_id)
    }

    /// Script returning an array of raw conversation rows.
    pub fn conversation_list_script(&self) -> String {
        format!(
            r#"(() => {{
    const rows = document.querySelectorAll({item});
    const out = [];
    rows.forEach((row) => {{
        const pick = (sel) => {{
            const el = row.querySelector(sel);
            return el && el.textContent ? el.textContent.trim() : '';
        }};
        out.push({{
            id: row.getAttribute({id_attr}) || '',
            user_name: pick({user_name}),
            last_message: pick({last_message}),
            last_message_time: pick({time}),
            unread_count: parseInt(pick({unread}) || '0', 10) || 0,
            item_title: pick({item_title}) || null,
            item_id: row.getAttribute({item_id_attr}) || null,
        }});
    }});
    return out;
}})()"#,
            item = js_str(&self.chat_item),
            id_attr = js_str(&self.chat_id_attr),
            user_name = js_str(&self.chat_user_name),
            last_message = js_str(&self.chat_last_message),
            time = js_str(&self.chat_time),
            unread = js_str(&self.chat_unread),
            item_title = js_str(&self.chat_item_title),
            item_id_attr = js_str(&self.chat_item_id_attr),
        )
    }

    /// Script returning an array of raw message rows in on-page order.
    pub fn message_list_script(&self) -> String {
        format!(
            r#"(() => {{
    const rows = document.querySelectorAll({item});
    const out = [];
    rows.forEach((row, index) => {{
        const pick = (sel) => {{
            const el = row.querySelector(sel);
            return el && el.textContent ? el.textContent.trim() : '';
        }};
        out.push({{
            index: index,
            content: pick({text}),
            created: pick({time}),
            has_image: !!row.querySelector({image}),
            has_voice: !!row.querySelector({voice}),
            incoming: row.classList.contains({incoming_class}) || row.hasAttribute({incoming_attr}),
        }});
    }});
    return out;
}})()"#,
            item = js_str(&self.message_item),
            text = js_str(&self.message_text),
            time = js_str(&self.message_time),
            image = js_str(&self.message_image),
            voice = js_str(&self.message_voice),
            incoming_class = js_str(&self.incoming_class),
            incoming_attr = js_str(&self.incoming_attr),
        )
    }

    /// Script that scrolls the message container to its top, requesting
    /// earlier history from the site.
    pub fn scroll_top_script(&self) -> String {
        format!(
            r#"(() => {{
    const container = document.querySelector({container});
    if (container) {{ container.scrollTop = 0; return true; }}
    return false;
}})()"#,
            container = js_str(&self.messages_container),
        )
    }

    /// Script probing the configured challenge selectors; returns a bool.
    pub fn challenge_probe_script(&self) -> String {
        let selectors: Vec<String> = self.challenge_selectors.iter().map(|s| js_str(s)).collect();
        format!(
            r#"(() => {{
    const selectors = [{selectors}];
    return selectors.some((sel) => {{
        try {{ return !!document.querySelector(sel); }} catch (_) {{ return false; }}
    }});
}})()"#,
            selectors = selectors.join(", "),
        )
    }

    /// Substring matcher over raw HTML for challenge markers that render in
    /// places selectors cannot reach (inline scripts, shadow roots).
    pub fn challenge_matcher(&self) -> Option<AhoCorasick> {
        if self.challenge_html_markers.is_empty() {
            return None;
        }
        AhoCorasick::new(&self.challenge_html_markers).ok()
    }
}

// ── Raw → domain parsing (pure, browser-free) ────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RawConversation {
    #[serde(default)]
    id: String,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    last_message: String,
    #[serde(default)]
    last_message_time: String,
    #[serde(default)]
    unread_count: u32,
    #[serde(default)]
    item_title: Option<String>,
    #[serde(default)]
    item_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    content: String,
    #[serde(default)]
    created: String,
    #[serde(default)]
    has_image: bool,
    #[serde(default)]
    has_voice: bool,
    #[serde(default)]
    incoming: bool,
}

/// Parse the conversation-list payload. Rows with no id are dropped — they are
/// placeholder/skeleton elements the site renders while loading.
pub fn parse_conversations(value: serde_json::Value) -> Vec<Conversation> {
    let raw: Vec<RawConversation> = serde_json::from_value(value).unwrap_or_default();
    raw.into_iter()
        .filter(|r| {
            if r.id.is_empty() {
                debug!("dropping conversation row without an id attribute");
            }
            !r.id.is_empty()
        })
        .map(|r| Conversation {
            user_id: r.id.clone(),
            id: r.id,
            user_name: r.user_name,
            last_message: r.last_message,
            last_message_time: r.last_message_time,
            unread_count: r.unread_count,
            item_title: r.item_title.filter(|t| !t.is_empty()),
            item_id: r.item_id.filter(|t| !t.is_empty()),
        })
        .collect()
}

/// Parse the message-list payload, preserving on-page order.
pub fn parse_messages(value: serde_json::Value, conversation_id: &str) -> Vec<Message> {
    let raw: Vec<RawMessage> = serde_json::from_value(value).unwrap_or_default();
    let batch = chrono::Utc::now().timestamp_millis();
    raw.into_iter()
        .map(|r| {
            let kind = if r.has_voice {
                MessageKind::Voice
            } else if r.has_image {
                MessageKind::Image
            } else {
                MessageKind::Text
            };
            Message {
                id: format!("msg_{}_{}", r.index, batch),
                conversation_id: conversation_id.to_string(),
                content: r.content,
                kind,
                direction: if r.incoming { Direction::In } else { Direction::Out },
                created: r.created,
                author: if r.incoming { "counterpart".into() } else { "me".into() },
            }
        })
        .collect()
}

// ── Extraction strategy seam ─────────────────────────────────────────────────

/// Pluggable page-extraction strategy, so the operation state machine never
/// depends on concrete selectors.
#[async_trait]
pub trait PageExtractor<D: PageDriver>: Send + Sync {
    type Out;
    async fn extract(&self, driver: &D) -> Result<Self::Out, OpError>;
}

pub struct ConversationListExtractor<'a> {
    pub markup: &'a SiteMarkup,
}

#[async_trait]
impl<D: PageDriver> PageExtractor<D> for ConversationListExtractor<'_> {
    type Out = Vec<Conversation>;

    async fn extract(&self, driver: &D) -> Result<Self::Out, OpError> {
        let value = driver.eval_json(self.markup.conversation_list_script()).await?;
        Ok(parse_conversations(value))
    }
}

pub struct MessageListExtractor<'a> {
    pub markup: &'a SiteMarkup,
    pub conversation_id: String,
}

#[async_trait]
impl<D: PageDriver> PageExtractor<D> for MessageListExtractor<'_> {
    type Out = Vec<Message>;

    async fn extract(&self, driver: &D) -> Result<Self::Out, OpError> {
        let value = driver.eval_json(self.markup.message_list_script()).await?;
        Ok(parse_messages(value, &self.conversation_id))
    }
}

/// True when the page shows an automated-defense challenge: any configured
/// selector matches, or a raw-HTML marker substring is present.
pub async fn challenge_present<D: PageDriver>(driver: &D, markup: &SiteMarkup) -> bool {
    if driver.eval_bool(markup.challenge_probe_script()).await {
        return true;
    }

    let Some(matcher) = markup.challenge_matcher() else {
        return false;
    };
    driver
        .page_html()
        .await
        .map(|html| matcher.is_match(&html))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversation_urls_compose() {
        let m = SiteMarkup::default();
        assert_eq!(m.login_url(), "https://www.avito.ru/profile/login");
        assert_eq!(m.messenger_url(), "https://www.avito.ru/profile/messenger");
        assert_eq!(
            m.conversation_url("c-42"),
            "https://www.avito.ru/profile/messenger/c-42"
        );
    }

    #[test]
    fn parse_conversations_drops_skeleton_rows() {
        let value = json!([
            {
                "id": "chat-1",
                "user_name": "Dana",
                "last_message": "still available?",
                "last_message_time": "12:04",
                "unread_count": 2,
                "item_title": "Bike",
                "item_id": "item-9"
            },
            { "id": "", "user_name": "", "last_message": "" }
        ]);
        let parsed = parse_conversations(value);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "chat-1");
        assert_eq!(parsed[0].unread_count, 2);
        assert_eq!(parsed[0].item_title.as_deref(), Some("Bike"));
    }

    #[test]
    fn parse_messages_classifies_kind_and_direction() {
        let value = json!([
            { "index": 0, "content": "hello", "created": "11:58", "incoming": true },
            { "index": 1, "content": "", "created": "11:59", "has_image": true, "incoming": false },
            { "index": 2, "content": "", "created": "12:00", "has_voice": true, "has_image": true, "incoming": true }
        ]);
        let parsed = parse_messages(value, "chat-1");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].direction, Direction::In);
        assert_eq!(parsed[0].kind, MessageKind::Text);
        assert_eq!(parsed[0].author, "counterpart");
        assert_eq!(parsed[1].direction, Direction::Out);
        assert_eq!(parsed[1].kind, MessageKind::Image);
        // Voice outranks image when both markers are present.
        assert_eq!(parsed[2].kind, MessageKind::Voice);
        assert!(parsed.iter().all(|m| m.conversation_id == "chat-1"));
    }

    #[test]
    fn parse_tolerates_garbage_payload() {
        assert!(parse_conversations(json!("not an array")).is_empty());
        assert!(parse_messages(json!(42), "c").is_empty());
    }

    #[test]
    fn challenge_matcher_hits_html_markers() {
        let m = SiteMarkup::default();
        let matcher = m.challenge_matcher().unwrap();
        assert!(matcher.is_match("<script src=\"https://www.google.com/recaptcha/api.js\">"));
        assert!(!matcher.is_match("<div>plain page</div>"));
    }

    #[test]
    fn scripts_quote_selectors_safely() {
        let mut m = SiteMarkup::default();
        m.chat_item = "[data-marker=\"messenger/chat-item\"]".into();
        let script = m.conversation_list_script();
        // The selector must appear as a JSON string literal, quotes escaped.
        assert!(script.contains("\"[data-marker=\\\"messenger/chat-item\\\"]\""));
        assert!(m.challenge_probe_script().contains("selectors.some"));
    }
}
