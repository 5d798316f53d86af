//! Streaming-mode updates: put, patch, delete, and ping arriving over SSE.

use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tk_test_utils::{MockFlagService, MockFlagServiceBuilder, eventually};
use togglekit::{Client, Config, FlagListener, User};

fn streaming_config(base: &str) -> Config {
    Config::builder("stream-key")
        .stream_uri(base.to_owned())
        .poll_uri(base.to_owned())
        .events_uri(base.to_owned())
        .build()
        .unwrap()
}

/// The standard update script: a put, a patch for a new flag, a stale
/// patch that must lose, a delete, and an unknown event name.
fn scripted_updates(builder: MockFlagServiceBuilder) -> MockFlagServiceBuilder {
    builder
        .stream_event(
            "put",
            json!({
                "f": {"key": "f", "value": true, "version": 2, "variation": 3},
                "gone": {"key": "gone", "value": 1, "version": 1},
            })
            .to_string(),
        )
        .stream_event(
            "patch",
            json!({"key": "extra", "value": "on", "version": 1}).to_string(),
        )
        .stream_event(
            "patch",
            json!({"key": "f", "value": false, "version": 1}).to_string(),
        )
        .stream_event("delete", json!({"key": "gone", "version": 2}).to_string())
        .stream_event("mystery", "{}")
}

#[tokio::test]
async fn stream_events_flow_into_the_store_in_order() {
    let service = scripted_updates(MockFlagService::builder()).start().await;

    let client = Client::init(streaming_config(service.base_url()), User::new("u"), 5_000)
        .await
        .unwrap();
    assert!(client.is_initialized());
    assert!(client.bool_variation("f", false));

    let probe = client.clone();
    eventually(move || probe.all_flags() == json!({"f": true, "extra": "on"})).await;

    // The stale patch for "f" must not have clobbered version 2.
    assert!(client.bool_variation("f", false));

    client.close().await;
}

#[tokio::test]
async fn ping_triggers_a_full_refetch_through_the_polling_path() {
    let service = MockFlagService::builder()
        .stream_event("ping", "{}")
        .poll_flags(json!({"f": {"key": "f", "value": true, "version": 1}}))
        .start()
        .await;

    let client = Client::init(streaming_config(service.base_url()), User::new("u"), 5_000)
        .await
        .unwrap();

    // The stream itself carried no flags; the ping-driven fetch did.
    assert!(client.is_initialized());
    assert!(client.bool_variation("f", false));
    assert!(!service.polls().is_empty());

    client.close().await;
}

#[tokio::test]
async fn flag_listener_observes_stream_changes() {
    // The warmup delay gives the test time to install the listener before
    // any data event lands.
    let service = scripted_updates(
        MockFlagService::builder().stream_warmup(Duration::from_millis(300)),
    )
    .start()
    .await;

    let client = Client::init(streaming_config(service.base_url()), User::new("u"), 0)
        .await
        .unwrap();

    let changes: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let listener: FlagListener = {
        let changes = changes.clone();
        Arc::new(move |key: &str, deleted: bool| {
            changes.lock().unwrap().push((key.to_owned(), deleted));
        })
    };
    client.register_feature_flag_listener("gone", listener);

    let probe = changes.clone();
    eventually(move || {
        probe.lock().unwrap().as_slice()
            == [("gone".to_owned(), false), ("gone".to_owned(), true)]
    })
    .await;

    client.close().await;
}
