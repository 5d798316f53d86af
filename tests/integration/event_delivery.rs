//! Event delivery: payload shape, identifying headers, and the
//! retry-once-with-same-payload-id contract.

use serde_json::json;
use tk_test_utils::{MockFlagService, eventually};
use togglekit::{Client, Config, User};

fn events_config(base: &str) -> Config {
    Config::builder("events-key")
        .streaming(false)
        .poll_uri(base.to_owned())
        .stream_uri(base.to_owned())
        .events_uri(base.to_owned())
        .build()
        .unwrap()
}

#[tokio::test]
async fn flush_posts_identify_custom_and_summary_with_headers() {
    let service = MockFlagService::builder().start().await;
    let client = Client::init(events_config(service.base_url()), User::new("u1"), 0)
        .await
        .unwrap();

    client.bool_variation("missing-flag", true);
    client.track_data("checkout", json!({"total": 10}));
    client.flush();

    eventually(|| !service.event_posts().is_empty()).await;

    let delivery = service.event_posts()[0].clone();
    assert_eq!(delivery.authorization, "events-key");
    assert_eq!(delivery.schema, "3");
    assert!(
        uuid::Uuid::parse_str(&delivery.payload_id).is_ok(),
        "payload id {:?} should be a UUID",
        delivery.payload_id
    );

    let events = delivery.body.as_array().unwrap();
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| e["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, ["identify", "custom", "summary"]);

    assert_eq!(events[0]["key"], "u1");
    assert_eq!(events[1]["key"], "checkout");
    assert_eq!(events[1]["data"]["total"], 10);

    let counters = events[2]["features"]["missing-flag"]["counters"]
        .as_array()
        .unwrap();
    assert_eq!(counters.len(), 1);
    assert_eq!(counters[0]["count"], 1);
    assert_eq!(counters[0]["unknown"], true);

    client.close().await;
}

#[tokio::test]
async fn transient_failure_retries_once_with_the_same_payload_id() {
    let service = MockFlagService::builder()
        .fail_first_event_posts(1)
        .start()
        .await;
    let client = Client::init(events_config(service.base_url()), User::new("u1"), 0)
        .await
        .unwrap();

    client.track("tap");
    client.flush();

    eventually(|| service.event_posts().len() >= 2).await;

    let posts = service.event_posts();
    assert_eq!(posts[0].payload_id, posts[1].payload_id);
    assert_eq!(posts[0].body, posts[1].body);

    client.close().await;
}

#[tokio::test]
async fn close_performs_a_final_flush() {
    let service = MockFlagService::builder().start().await;
    let client = Client::init(events_config(service.base_url()), User::new("u1"), 0)
        .await
        .unwrap();

    client.track("before-close");
    // No explicit flush; close must deliver the pending batch.
    client.close().await;

    let posts = service.event_posts();
    assert_eq!(posts.len(), 1);
    let kinds: Vec<&str> = posts[0]
        .body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"custom"));
}

#[tokio::test]
async fn offline_clients_send_nothing() {
    let service = MockFlagService::builder().start().await;
    let config = Config::builder("events-key")
        .offline(true)
        .events_uri(service.base_url().to_owned())
        .poll_uri(service.base_url().to_owned())
        .stream_uri(service.base_url().to_owned())
        .build()
        .unwrap();
    let client = Client::init(config, User::new("u1"), 0).await.unwrap();

    client.track("never-sent");
    client.flush();
    client.close().await;

    assert!(service.event_posts().is_empty());
    assert!(service.polls().is_empty());
}
