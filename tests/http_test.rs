//! Control-surface contract tests that need no browser: every route here is
//! answerable from registry/queue state alone.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use bazaar_pilot::core::app_state::AppState;
use bazaar_pilot::{router, PilotConfig};

fn app() -> axum::Router {
    router(Arc::new(AppState::new(PilotConfig::default())))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_service_identity() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"], "bazaar-pilot");
}

#[tokio::test]
async fn cookies_for_unknown_account_is_not_found() {
    let response = app()
        .oneshot(
            Request::get("/api/v1/session/no-such-account/cookies")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "no_session");
}

#[tokio::test]
async fn status_for_unknown_account_reports_no_session() {
    let response = app()
        .oneshot(
            Request::get("/api/v1/session/no-such-account/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["has_session"], false);
    assert_eq!(body["authorized"], false);
}

#[tokio::test]
async fn answering_an_expired_challenge_is_not_accepted() {
    let response = app()
        .oneshot(
            Request::post("/api/v1/challenges/challenge_gone_0_0/answer")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"answer":"1234"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["accepted"], false);
}

#[tokio::test]
async fn unknown_viewer_token_is_not_found() {
    let response = app()
        .oneshot(
            Request::get("/api/v1/viewer/not-a-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "unknown_token");
}
