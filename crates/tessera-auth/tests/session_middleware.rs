//! Session validation as tower middleware.

#![cfg(feature = "middleware")]

mod common;

use std::convert::Infallible;

use common::{MockAuthority, TestKey, bearer_headers, cookie_headers, jwt_response, session_claims};
use http::{HeaderMap, Request, Response, StatusCode};
use pretty_assertions::assert_eq;
use tessera_auth::Session;
use tessera_auth::tower::SessionLayer;
use tower::{Layer, ServiceExt, service_fn};

/// Echoes the session subject, or an empty body when no session was attached
async fn echo_subject(req: Request<String>) -> Result<Response<String>, Infallible> {
    let subject = req
        .extensions()
        .get::<Session>()
        .map(|session| session.subject().to_string())
        .unwrap_or_default();
    Ok(Response::new(subject))
}

async fn call(layer: SessionLayer, uri: &str, headers: HeaderMap) -> Response<String> {
    let mut request = Request::builder().uri(uri).body(String::new()).unwrap();
    *request.headers_mut() = headers;
    layer
        .layer(service_fn(echo_subject))
        .oneshot(request)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_valid_session_reaches_handler() {
    let authority = MockAuthority::start().await;
    let key = TestKey::generate("K1");
    authority.mock_keys(&[&key], 1).await;

    let token = key.sign(&session_claims("U1", 600));
    let layer = SessionLayer::from_client(&authority.client());
    let response = call(layer, "/me", bearer_headers(&token, None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), "U1");
    assert!(response.headers().get(http::header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_missing_session_is_unauthorized() {
    let authority = MockAuthority::start().await;
    authority.mock_keys(&[], 0).await;

    let layer = SessionLayer::from_client(&authority.client());
    let response = call(layer, "/me", HeaderMap::new()).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(http::header::WWW_AUTHENTICATE).unwrap(),
        "Bearer"
    );
}

#[tokio::test]
async fn test_anonymous_allowed_passes_without_session() {
    let authority = MockAuthority::start().await;
    authority.mock_keys(&[], 0).await;

    let layer = SessionLayer::from_client(&authority.client()).allow_anonymous();
    let response = call(layer, "/", HeaderMap::new()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), "");
}

#[tokio::test]
async fn test_invalid_session_is_unauthorized_even_when_anonymous_allowed() {
    let authority = MockAuthority::start().await;
    let key = TestKey::generate("K1");
    authority.mock_keys(&[&key], 1).await;

    let expired = key.sign(&session_claims("U1", -300));
    let layer = SessionLayer::from_client(&authority.client()).allow_anonymous();
    let response = call(layer, "/me", cookie_headers(Some(&expired), None)).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rejected_refresh_clears_cookies() {
    let authority = MockAuthority::start().await;
    let key = TestKey::generate("K1");
    authority.mock_keys(&[&key], 1).await;
    authority.mock_refresh_error(401, "E061005", 1).await;

    let expired = key.sign(&session_claims("U1", -300));
    let layer = SessionLayer::from_client(&authority.client());
    let response = call(layer, "/me", cookie_headers(Some(&expired), Some("revoked"))).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let cleared = common::set_cookies(response.headers());
    assert_eq!(cleared.len(), 2);
    assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));
}

#[tokio::test]
async fn test_bypassed_path_skips_validation() {
    let authority = MockAuthority::start().await;
    authority.mock_keys(&[], 0).await;

    let layer = SessionLayer::from_client(&authority.client()).bypass_path("/health");
    let response = call(layer.clone(), "/health/live", HeaderMap::new()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = call(layer, "/healthz", HeaderMap::new()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refreshed_session_sets_cookies_on_response() {
    let authority = MockAuthority::start().await;
    let key = TestKey::generate("K1");
    authority.mock_keys(&[&key], 1).await;

    let expired = key.sign(&session_claims("U1", -300));
    let renewed = key.sign(&session_claims("U1", 600));
    authority
        .mock_refresh("refresh-1", jwt_response(&renewed, "refresh-2"), 1)
        .await;

    let layer = SessionLayer::from_client(&authority.client());
    let response = call(layer, "/me", cookie_headers(Some(&expired), Some("refresh-1"))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), "U1");
    let cookies = common::set_cookies(response.headers());
    assert_eq!(cookies.len(), 2);
    assert!(cookies[0].starts_with(&format!("DS={renewed}; ")));
    assert!(cookies[1].starts_with("DSR=refresh-2; "));
}
