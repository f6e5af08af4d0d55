//! Key cache behaviour under concurrent verification.

mod common;

use std::time::Duration;

use common::{MockAuthority, PROJECT_ID, TestKey, session_claims};
use futures_util::future::join_all;
use tessera_auth::AuthError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_share_one_fetch() {
    let authority = MockAuthority::start().await;
    let key = TestKey::generate("K1");
    authority
        .mock_keys_delayed(&[&key], Duration::from_millis(200), 1)
        .await;

    let client = authority.client();
    let tasks = (0..10).map(|i| {
        let client = client.clone();
        let token = key.sign(&session_claims(&format!("U{i}"), 600));
        tokio::spawn(async move { client.verify_session(&token).await })
    });

    let results = join_all(tasks).await;
    for (i, result) in results.into_iter().enumerate() {
        let session = result.unwrap().unwrap();
        assert_eq!(session.subject(), format!("U{i}"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_share_one_fetch() {
    let authority = MockAuthority::start().await;
    let key = TestKey::generate("K1");
    // Delay keeps every caller waiting on the same in-flight load
    authority.mock_keys_delayed(&[], Duration::from_millis(200), 1).await;

    let client = authority.client();
    let token = key.sign(&session_claims("U1", 600));
    let tasks = (0..10).map(|_| {
        let client = client.clone();
        let token = token.clone();
        tokio::spawn(async move { client.verify_session(&token).await })
    });

    for result in join_all(tasks).await {
        assert!(matches!(
            result.unwrap(),
            Err(AuthError::KeyFetch { .. })
        ));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_known_keys_keep_verifying_during_failed_rotation() {
    let authority = MockAuthority::start().await;
    let current = TestKey::generate("K1");
    let unknown = TestKey::generate("K9");
    authority.mock_keys_once(&[&current]).await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/keys/{PROJECT_ID}")))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&authority.server)
        .await;

    let client = authority.client();
    let token = current.sign(&session_claims("U1", 600));
    client.verify_session(&token).await.unwrap();

    let rotation = {
        let client = client.clone();
        let token = unknown.sign(&session_claims("U2", 600));
        tokio::spawn(async move { client.verify_session(&token).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Refetch is still in flight
    assert_eq!(client.verify_session(&token).await.unwrap().subject(), "U1");

    assert_eq!(rotation.await.unwrap().unwrap_err(), AuthError::InvalidSignature);
    assert_eq!(client.verify_session(&token).await.unwrap().subject(), "U1");
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let authority = MockAuthority::start().await;
    let key = TestKey::generate("K1");
    authority.mock_keys(&[&key], 2).await;

    let client = authority.client();
    let token = key.sign(&session_claims("U1", 600));

    client.verify_session(&token).await.unwrap();
    client.verify_session(&token).await.unwrap();
    client.key_provider().invalidate(common::PROJECT_ID).await;
    client.verify_session(&token).await.unwrap();
}

#[tokio::test]
async fn test_clients_do_not_share_caches() {
    let authority = MockAuthority::start().await;
    let key = TestKey::generate("K1");
    authority.mock_keys(&[&key], 2).await;

    let token = key.sign(&session_claims("U1", 600));
    authority.client().verify_session(&token).await.unwrap();
    authority.client().verify_session(&token).await.unwrap();
}
