//! Polling-mode initialization against the mock flag service.

use serde_json::json;
use tk_test_utils::MockFlagService;
use togglekit::{Client, Config, User};

fn polling_config(base: &str) -> Config {
    Config::builder("poll-key")
        .streaming(false)
        .poll_uri(base.to_owned())
        .stream_uri(base.to_owned())
        .events_uri(base.to_owned())
        .build()
        .unwrap()
}

#[tokio::test]
async fn first_poll_initializes_without_waiting_for_the_interval() {
    let service = MockFlagService::builder()
        .poll_flags(json!({
            "f": {"key": "f", "value": true, "version": 2, "variation": 3},
            "limit": {"key": "limit", "value": 7, "version": 1},
        }))
        .start()
        .await;

    // The poll interval floor is 30 s; only the initializing fast path can
    // get us flags inside this deadline.
    let client = Client::init(polling_config(service.base_url()), User::new("u"), 5_000)
        .await
        .unwrap();

    assert!(client.is_initialized());
    assert!(client.bool_variation("f", false));
    assert_eq!(client.int_variation("limit", 0), 7);
    assert_eq!(client.all_flags(), json!({"f": true, "limit": 7}));

    client.close().await;
}

#[tokio::test]
async fn empty_bundle_still_initializes() {
    let service = MockFlagService::builder().start().await;

    let client = Client::init(polling_config(service.base_url()), User::new("u"), 5_000)
        .await
        .unwrap();

    assert!(client.is_initialized());
    assert_eq!(client.all_flags(), json!({}));
    assert!(client.bool_variation("anything", true));

    client.close().await;
}

#[tokio::test]
async fn report_mode_sends_the_user_as_the_request_body() {
    let service = MockFlagService::builder()
        .poll_flags(json!({"f": {"key": "f", "value": "yes", "version": 1}}))
        .start()
        .await;

    let config = Config::builder("poll-key")
        .streaming(false)
        .use_report(true)
        .poll_uri(service.base_url().to_owned())
        .stream_uri(service.base_url().to_owned())
        .events_uri(service.base_url().to_owned())
        .build()
        .unwrap();

    let client = Client::init(config, User::new("report-user"), 5_000)
        .await
        .unwrap();
    assert!(client.is_initialized());
    assert_eq!(client.string_variation("f", "no"), "yes");

    let polls = service.polls();
    assert!(!polls.is_empty());
    assert_eq!(polls[0].method, "REPORT");
    let user: serde_json::Value = serde_json::from_str(&polls[0].body).unwrap();
    assert_eq!(user["key"], "report-user");

    client.close().await;
}

#[tokio::test]
async fn plain_mode_sends_the_user_in_the_path() {
    let service = MockFlagService::builder().start().await;

    let client = Client::init(polling_config(service.base_url()), User::new("u"), 5_000)
        .await
        .unwrap();
    assert!(client.is_initialized());

    let polls = service.polls();
    assert!(!polls.is_empty());
    assert_eq!(polls[0].method, "GET");
    assert!(polls[0].body.is_empty());

    client.close().await;
}
