//! Offline-mode behavior: no network activity, fallbacks everywhere, and
//! persisted flags as the only data source.

use serde_json::json;
use std::sync::Arc;
use togglekit::{Client, Config, FilePersistence, PersistentStore, User};

fn offline_config() -> Config {
    Config::builder("offline-key").offline(true).build().unwrap()
}

#[tokio::test]
async fn offline_client_serves_fallbacks_only() {
    let client = Client::init(offline_config(), User::new("abc"), 0)
        .await
        .unwrap();

    assert!(!client.is_initialized());
    assert!(client.is_offline());
    assert!(client.bool_variation("flag-x", true));
    assert_eq!(client.int_variation("flag-y", 12), 12);
    assert_eq!(client.double_variation("flag-z", 0.5), 0.5);
    assert_eq!(client.string_variation("flag-s", "fb"), "fb");
    assert_eq!(client.json_variation("flag-j", json!({"a": 1})), json!({"a": 1}));
    assert_eq!(client.all_flags(), json!({}));

    client.close().await;
}

#[tokio::test]
async fn persisted_flags_seed_an_offline_client() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(FilePersistence::new(dir.path()));

    // A previous session saved flags for this user.
    persistence.write(
        "features-abc",
        &json!({"greeting": {"key": "greeting", "value": "hello", "version": 4}}).to_string(),
    );

    let client = Client::init_with_persistence(
        offline_config(),
        User::new("abc"),
        0,
        persistence.clone(),
    )
    .await
    .unwrap();

    // Seed data answers variations, but only live service data counts as
    // initialization.
    assert!(!client.is_initialized());
    assert_eq!(client.string_variation("greeting", "fb"), "hello");
    assert_eq!(client.all_flags(), json!({"greeting": "hello"}));

    client.close().await;
}

#[tokio::test]
async fn corrupt_persisted_flags_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(FilePersistence::new(dir.path()));
    persistence.write("features-abc", "definitely not json");

    let client = Client::init_with_persistence(
        offline_config(),
        User::new("abc"),
        0,
        persistence,
    )
    .await
    .unwrap();

    assert_eq!(client.all_flags(), json!({}));
    assert!(client.bool_variation("anything", true));

    client.close().await;
}

#[tokio::test]
async fn save_and_restore_round_trip_across_clients() {
    let client = Client::init(offline_config(), User::new("abc"), 0)
        .await
        .unwrap();
    client
        .restore_flags(&json!({"f": {"key": "f", "value": 9, "version": 2}}).to_string())
        .unwrap();
    let blob = client.save_flags().unwrap();
    client.close().await;

    let fresh = Client::init(offline_config(), User::new("abc"), 0)
        .await
        .unwrap();
    fresh.restore_flags(&blob).unwrap();
    assert_eq!(fresh.int_variation("f", 0), 9);
    fresh.close().await;
}
