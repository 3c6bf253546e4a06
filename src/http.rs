//! HTTP control surface.
//!
//! Three groups of routes under `/api/v1`:
//! * `session/*` — explicit lifecycle control plus the manual-login gateway
//!   (cookie export, auth status).
//! * `challenges/*` — the operator side of the escalation rendezvous.
//! * `ops/*` — the messenger operations themselves.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::browser::BrowserHandle;
use crate::core::app_state::AppState;
use crate::core::error::OpError;
use crate::core::types::{
    AuthStatusResponse, ChallengeAnswerRequest, ConversationsRequest, LoginRequest,
    MessagesRequest, SendMessageRequest, StartSessionRequest, StartSessionResponse,
};
use crate::ops;
use crate::proxy;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn reject(e: OpError) -> ApiError {
    let (status, code) = match &e {
        OpError::SessionCreationFailed(_) => (StatusCode::BAD_GATEWAY, "session_creation_failed"),
        OpError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "not_authenticated"),
        OpError::LoginFailed => (StatusCode::FORBIDDEN, "login_failed"),
        OpError::ChallengeTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "challenge_timeout"),
        OpError::NavigationTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "navigation_timeout"),
        OpError::ElementNotFound { .. } => (StatusCode::BAD_GATEWAY, "element_not_found"),
        OpError::UnknownChallenge(_) => (StatusCode::NOT_FOUND, "unknown_challenge"),
        OpError::Browser(_) => (StatusCode::INTERNAL_SERVER_ERROR, "browser_error"),
    };
    error!("request failed ({}): {}", code, e);
    (
        status,
        Json(ErrorBody {
            error: e.to_string(),
            code,
        }),
    )
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/session/start", post(start_session))
        .route("/session/{account_id}/cookies", get(session_cookies))
        .route("/session/{account_id}/status", get(session_status))
        .route("/session/{account_id}", delete(close_session))
        .route("/challenges", get(list_challenges))
        .route("/challenges/{id}/answer", post(answer_challenge))
        .route("/viewer/{token}", get(viewer))
        .route("/ops/login", post(op_login))
        .route("/ops/conversations", post(op_conversations))
        .route("/ops/messages", post(op_messages))
        .route("/ops/send", post(op_send));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "bazaar-pilot",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ── Session lifecycle / manual-login gateway ─────────────────────────────────

/// Start (or join) the account's browser session and park a tab on the login
/// page so an operator can authenticate by hand through the viewer.
async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<StartSessionResponse>, ApiError> {
    if let Some(p) = &req.proxy {
        proxy::preflight(p)
            .await
            .map_err(|e| reject(OpError::SessionCreationFailed(e.to_string())))?;
    }

    let session = state
        .registry
        .acquire(&req.account_id, req.proxy.as_ref())
        .await
        .map_err(reject)?;

    let page = session
        .handle
        .new_tab()
        .await
        .map_err(|e| reject(OpError::Browser(e)))?;
    if let Err(e) = page.goto(state.config.site.login_url()).await {
        let _ = page.close().await;
        return Err(reject(OpError::Browser(e.into())));
    }
    session.handle.pin_page(page).await;

    let token = state.mint_viewer_token(&req.account_id).await;
    let viewer_url = format!(
        "http://{}/api/v1/viewer/{}",
        state.config.resolve_public_host(),
        token
    );
    info!("manual-login session ready for {}", req.account_id);
    Ok(Json(StartSessionResponse {
        access_token: token,
        viewer_url,
    }))
}

/// Export the cookie jar of the session's gateway tab, typically after a
/// manual login completed. No session (or no gateway tab) is a 404, not an
/// auth failure.
async fn session_cookies(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("no session for account {}", account_id),
                code: "no_session",
            }),
        )
    };
    let session = state.registry.peek(&account_id).await.ok_or_else(not_found)?;
    let cookies = session.handle.pinned_cookies().await.ok_or_else(not_found)?;
    Ok(Json(serde_json::json!({ "cookies": cookies })))
}

async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Json<AuthStatusResponse> {
    let Some(session) = state.registry.peek(&account_id).await else {
        return Json(AuthStatusResponse {
            authorized: false,
            has_session: false,
        });
    };
    // The gateway tab has left the login route once the site accepted the
    // operator's credentials.
    let authorized = session
        .handle
        .pinned_url()
        .await
        .map(|u| !u.contains(&state.config.site.login_path))
        .unwrap_or(false);
    Json(AuthStatusResponse {
        authorized,
        has_session: true,
    })
}

async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Json<serde_json::Value> {
    let closed = state.registry.release(&account_id).await;
    state.drop_tokens_for(&account_id).await;
    Json(serde_json::json!({ "closed": closed }))
}

/// Remote-access facade: resolves a viewer token to the session's CDP
/// endpoint and current gateway URL.
async fn viewer(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account_id = state.account_for_token(&token).await.ok_or((
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "unknown viewer token".into(),
            code: "unknown_token",
        }),
    ))?;
    let session = state
        .registry
        .peek(&account_id)
        .await
        .ok_or_else(|| reject(OpError::NotAuthenticated))?;
    Ok(Json(serde_json::json!({
        "account_id": account_id,
        "ws_url": session.handle.ws_url(),
        "current_url": session.handle.pinned_url().await,
    })))
}

// ── Escalation rendezvous (operator side) ────────────────────────────────────

async fn list_challenges(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let pending = state.escalation.list_pending().await;
    Json(serde_json::json!({ "pending": pending }))
}

/// Accepting an answer is best-effort: an expired or already-resolved
/// challenge reports `accepted: false` rather than an error, so operator
/// consoles can submit without racing the timeout.
async fn answer_challenge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ChallengeAnswerRequest>,
) -> Json<serde_json::Value> {
    let accepted = state.escalation.resolve(&id, &req.answer).await;
    Json(serde_json::json!({ "accepted": accepted }))
}

// ── Messenger operations ─────────────────────────────────────────────────────

async fn op_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = ops::login::login(
        &state.registry,
        &state.escalation,
        &state.config,
        &req.account,
    )
    .await
    .map_err(reject)?;
    Ok(Json(serde_json::json!({
        "cookies": outcome.cookies,
        "path": outcome.path,
    })))
}

async fn op_conversations(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConversationsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conversations = ops::inbox::list_conversations(
        &state.registry,
        &state.escalation,
        &state.config,
        &req.account,
    )
    .await
    .map_err(reject)?;
    Ok(Json(serde_json::json!({ "conversations": conversations })))
}

async fn op_messages(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MessagesRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let messages = ops::inbox::list_messages(
        &state.registry,
        &state.escalation,
        &state.config,
        &req.account,
        &req.conversation_id,
    )
    .await
    .map_err(reject)?;
    Ok(Json(serde_json::json!({ "messages": messages })))
}

async fn op_send(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ops::send::send_message(
        &state.registry,
        &state.escalation,
        &state.config,
        &req.account,
        &req.conversation_id,
        &req.text,
    )
    .await
    .map_err(reject)?;
    Ok(Json(serde_json::json!({ "sent": true })))
}
