//! Credential rejection is terminal: the client fails, stays
//! uninitialized, and keeps serving fallbacks.

use axum::http::StatusCode;
use serde_json::json;
use std::time::Duration;
use tk_test_utils::{MockFlagService, eventually};
use togglekit::{Client, ClientStatus, Config, User};

#[tokio::test]
async fn polling_401_fails_the_client_and_variations_fall_back() {
    let service = MockFlagService::builder()
        .poll_status(StatusCode::UNAUTHORIZED)
        .start()
        .await;

    let config = Config::builder("bad-key")
        .streaming(false)
        .poll_uri(service.base_url().to_owned())
        .stream_uri(service.base_url().to_owned())
        .events_uri(service.base_url().to_owned())
        .build()
        .unwrap();
    let client = Client::init(config, User::new("u"), 2_000).await.unwrap();

    assert!(!client.is_initialized());
    let probe = client.clone();
    eventually(move || probe.status() == ClientStatus::Failed).await;

    // Failed clients still answer, from fallbacks.
    assert!(client.bool_variation("f", true));
    assert_eq!(client.all_flags(), json!({}));
    assert!(!client.await_initialized(100).await);

    client.close().await;
}

#[tokio::test]
async fn streaming_403_fails_the_client() {
    let service = MockFlagService::builder()
        .stream_status(StatusCode::FORBIDDEN)
        .start()
        .await;

    let config = Config::builder("bad-key")
        .stream_uri(service.base_url().to_owned())
        .poll_uri(service.base_url().to_owned())
        .events_uri(service.base_url().to_owned())
        .build()
        .unwrap();
    let client = Client::init(config, User::new("u"), 2_000).await.unwrap();

    let probe = client.clone();
    eventually(move || probe.status() == ClientStatus::Failed).await;
    assert!(!client.is_initialized());
    assert_eq!(client.string_variation("s", "fallback"), "fallback");

    client.close().await;
}

#[tokio::test]
async fn recoverable_statuses_do_not_fail_the_client() {
    // 429 is retryable: the stream worker should back off, not fail.
    let service = MockFlagService::builder()
        .stream_status(StatusCode::TOO_MANY_REQUESTS)
        .start()
        .await;

    let config = Config::builder("key")
        .stream_uri(service.base_url().to_owned())
        .poll_uri(service.base_url().to_owned())
        .events_uri(service.base_url().to_owned())
        .build()
        .unwrap();
    let client = Client::init(config, User::new("u"), 0).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_ne!(client.status(), ClientStatus::Failed);

    client.close().await;
}
