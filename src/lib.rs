//! bazaar-pilot: a browser-automation service for a marketplace messenger.
//!
//! One headless Chromium per account, driven over CDP, behind an HTTP control
//! surface. Logins replay stored cookies when they can and type credentials
//! like a human when they must; anti-bot challenges are escalated to a human
//! operator and the blocked operation resumes with the answer.

pub mod browser;
pub mod core;
pub mod escalation;
pub mod http;
pub mod markup;
pub mod ops;
pub mod proxy;
pub mod session;

pub use crate::core::app_state::AppState;
pub use crate::core::config::{load_config, DelayPolicy, PilotConfig};
pub use crate::core::error::OpError;
pub use crate::core::types::{
    Account, Conversation, Direction, LoginOutcome, LoginPath, Message, MessageKind,
    ProxyDescriptor, ProxyScheme,
};
pub use crate::escalation::{Challenge, EscalationQueue};
pub use crate::http::router;
pub use crate::session::{Session, SessionRegistry};
