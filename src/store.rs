//! In-memory flag store.
//!
//! One store per environment.  Entries are immutable `Arc<FlagRecord>`s:
//! an update replaces the entry while concurrent readers keep the previous
//! one alive through their own handles.  Upserts are version-monotone;
//! deletes are tombstones so late out-of-order updates cannot resurrect a
//! flag.
//!
//! Change listeners fire while the write lock is held, which is what
//! guarantees per-key ordering.  Callbacks must therefore be quick and
//! must not call back into the store.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tk_protocol::{FlagRecord, ProtocolError};
use tracing::debug;

/// Callback invoked with `(flag_key, deleted)` after a change applies.
pub type FlagListener = Arc<dyn Fn(&str, bool) + Send + Sync>;

struct ListenerEntry {
    key: String,
    listener: FlagListener,
}

#[derive(Default)]
struct StoreState {
    flags: HashMap<String, Arc<FlagRecord>>,
    initialized: bool,
    listeners: Vec<ListenerEntry>,
}

impl StoreState {
    fn fire_listeners(&self, key: &str, deleted: bool) {
        for entry in &self.listeners {
            if entry.key == key {
                (entry.listener)(key, deleted);
            }
        }
    }
}

pub struct FlagStore {
    state: RwLock<StoreState>,
}

impl FlagStore {
    pub fn new() -> Self {
        FlagStore {
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Apply one flag if its version is not older than the stored one.
    /// Returns whether the update was applied.
    pub fn upsert(&self, flag: FlagRecord) -> bool {
        let mut state = self.state.write().unwrap();
        if let Some(existing) = state.flags.get(&flag.key) {
            if flag.version < existing.version {
                debug!(
                    key = %flag.key,
                    incoming = flag.version,
                    stored = existing.version,
                    "discarding stale flag update"
                );
                return false;
            }
        }
        let key = flag.key.clone();
        let deleted = flag.deleted;
        state.flags.insert(key.clone(), Arc::new(flag));
        state.fire_listeners(&key, deleted);
        true
    }

    /// Record a deletion at `version` via a tombstone upsert.
    pub fn delete(&self, key: &str, version: u32) -> bool {
        self.upsert(FlagRecord::tombstone(key, version))
    }

    /// Atomically replace the whole flag set and mark the store
    /// initialized.  Every key of the new map fires its listeners as a
    /// change.
    pub fn put(&self, flags: Vec<FlagRecord>) {
        let replacement: HashMap<String, Arc<FlagRecord>> = flags
            .into_iter()
            .map(|flag| (flag.key.clone(), Arc::new(flag)))
            .collect();

        let mut state = self.state.write().unwrap();
        state.flags = replacement;
        state.initialized = true;
        let keys: Vec<String> = state.flags.keys().cloned().collect();
        for key in keys {
            state.fire_listeners(&key, false);
        }
    }

    /// Fetch the live entry for `key`; tombstones are invisible.
    pub fn get(&self, key: &str) -> Option<Arc<FlagRecord>> {
        let state = self.state.read().unwrap();
        state
            .flags
            .get(key)
            .filter(|entry| !entry.deleted)
            .cloned()
    }

    /// Every live entry, in no particular order.
    pub fn snapshot_all(&self) -> Vec<Arc<FlagRecord>> {
        let state = self.state.read().unwrap();
        state
            .flags
            .values()
            .filter(|entry| !entry.deleted)
            .cloned()
            .collect()
    }

    /// Whether a `put` has ever been applied.
    pub fn initialized(&self) -> bool {
        self.state.read().unwrap().initialized
    }

    /// Serialize live entries as a `{key: flag-json}` object for the
    /// persistence hook.
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        let state = self.state.read().unwrap();
        let mut out = Map::new();
        for (key, entry) in &state.flags {
            if entry.deleted {
                continue;
            }
            out.insert(key.clone(), serde_json::to_value(entry.as_ref())?);
        }
        serde_json::to_string(&Value::Object(out))
    }

    /// Parse a previously serialized blob and apply it as a put.  A parse
    /// failure leaves the store untouched.
    pub fn restore(&self, blob: &str) -> Result<(), ProtocolError> {
        let flags = FlagRecord::parse_bundle(blob)?;
        self.put(flags);
        Ok(())
    }

    /// Register a listener for one flag key.  Re-registering the same
    /// listener (by `Arc` identity) for the same key is a no-op.
    pub fn register_listener(&self, key: impl Into<String>, listener: FlagListener) {
        let key = key.into();
        let mut state = self.state.write().unwrap();
        let already = state
            .listeners
            .iter()
            .any(|e| e.key == key && Arc::ptr_eq(&e.listener, &listener));
        if !already {
            state.listeners.push(ListenerEntry { key, listener });
        }
    }

    /// Remove one registration matching `(key, listener)`.
    pub fn unregister_listener(&self, key: &str, listener: &FlagListener) {
        let mut state = self.state.write().unwrap();
        if let Some(index) = state
            .listeners
            .iter()
            .position(|e| e.key == key && Arc::ptr_eq(&e.listener, listener))
        {
            state.listeners.remove(index);
        }
    }
}

impl Default for FlagStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn flag(key: &str, version: u32, value: Value) -> FlagRecord {
        FlagRecord {
            key: key.to_owned(),
            value,
            version,
            flag_version: None,
            variation: Some(0),
            track_events: false,
            track_reason: false,
            reason: None,
            debug_events_until_date: 0,
            deleted: false,
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let store = FlagStore::new();
        assert!(store.upsert(flag("f", 1, json!(true))));
        assert_eq!(store.get("f").unwrap().value, json!(true));
    }

    #[test]
    fn upsert_is_version_monotone() {
        let store = FlagStore::new();
        store.upsert(flag("f", 5, json!("new")));
        assert!(!store.upsert(flag("f", 3, json!("old"))));
        assert_eq!(store.get("f").unwrap().value, json!("new"));
    }

    #[test]
    fn equal_version_replaces() {
        let store = FlagStore::new();
        store.upsert(flag("f", 5, json!("a")));
        assert!(store.upsert(flag("f", 5, json!("b"))));
        assert_eq!(store.get("f").unwrap().value, json!("b"));
    }

    #[test]
    fn only_increasing_maxima_are_observable() {
        let store = FlagStore::new();
        for version in [2u32, 7, 4, 7, 9, 1] {
            store.upsert(flag("f", version, json!(version)));
        }
        assert_eq!(store.get("f").unwrap().version, 9);
    }

    #[test]
    fn delete_hides_flag_but_keeps_version_ordering() {
        let store = FlagStore::new();
        store.upsert(flag("f", 2, json!(true)));
        assert!(store.delete("f", 3));
        assert!(store.get("f").is_none());
        assert!(store.snapshot_all().is_empty());
        // An update older than the tombstone cannot resurrect the flag.
        assert!(!store.upsert(flag("f", 2, json!(true))));
        assert!(store.get("f").is_none());
        // A newer one can.
        assert!(store.upsert(flag("f", 4, json!(false))));
        assert_eq!(store.get("f").unwrap().value, json!(false));
    }

    #[test]
    fn stale_delete_is_discarded() {
        let store = FlagStore::new();
        store.upsert(flag("f", 5, json!(true)));
        assert!(!store.delete("f", 4));
        assert!(store.get("f").is_some());
    }

    #[test]
    fn put_replaces_whole_map_and_initializes() {
        let store = FlagStore::new();
        store.upsert(flag("old", 1, json!(1)));
        assert!(!store.initialized());

        store.put(vec![flag("a", 1, json!(1)), flag("b", 1, json!(2))]);
        assert!(store.initialized());
        assert!(store.get("old").is_none());
        assert_eq!(store.snapshot_all().len(), 2);
    }

    #[test]
    fn empty_put_still_initializes() {
        let store = FlagStore::new();
        store.put(Vec::new());
        assert!(store.initialized());
        assert!(store.snapshot_all().is_empty());
    }

    #[test]
    fn readers_keep_replaced_entries_alive() {
        let store = FlagStore::new();
        store.upsert(flag("f", 1, json!("first")));
        let held = store.get("f").unwrap();
        store.upsert(flag("f", 2, json!("second")));
        assert_eq!(held.value, json!("first"));
        assert_eq!(store.get("f").unwrap().value, json!("second"));
    }

    #[test]
    fn listener_fires_once_per_upsert_with_deleted_flag() {
        let store = FlagStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let deleted_seen = Arc::new(AtomicUsize::new(0));
        let listener: FlagListener = {
            let calls = calls.clone();
            let deleted_seen = deleted_seen.clone();
            Arc::new(move |key, deleted| {
                assert_eq!(key, "f");
                calls.fetch_add(1, Ordering::SeqCst);
                if deleted {
                    deleted_seen.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        store.register_listener("f", listener);

        store.upsert(flag("f", 1, json!(true)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        store.delete("f", 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(deleted_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_upsert_does_not_fire_listener() {
        let store = FlagStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let listener: FlagListener = {
            let calls = calls.clone();
            Arc::new(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        store.upsert(flag("f", 5, json!(true)));
        store.register_listener("f", listener);
        store.upsert(flag("f", 1, json!(false)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn put_fires_listeners_for_every_new_key() {
        let store = FlagStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for key in ["a", "b"] {
            let calls = calls.clone();
            let listener: FlagListener = Arc::new(move |_, deleted| {
                assert!(!deleted);
                calls.fetch_add(1, Ordering::SeqCst);
            });
            store.register_listener(key, listener);
        }
        store.put(vec![flag("a", 1, json!(1)), flag("b", 1, json!(2))]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_for_other_key_stays_silent() {
        let store = FlagStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let listener: FlagListener = {
            let calls = calls.clone();
            Arc::new(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        store.register_listener("other", listener);
        store.upsert(flag("f", 1, json!(true)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn duplicate_registration_is_idempotent() {
        let store = FlagStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let listener: FlagListener = {
            let calls = calls.clone();
            Arc::new(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        store.register_listener("f", listener.clone());
        store.register_listener("f", listener.clone());
        store.upsert(flag("f", 1, json!(true)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.unregister_listener("f", &listener);
        store.upsert(flag("f", 2, json!(false)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn serialize_skips_tombstones_and_restores() {
        let store = FlagStore::new();
        store.upsert(flag("keep", 1, json!(42)));
        store.upsert(flag("gone", 1, json!(1)));
        store.delete("gone", 2);

        let blob = store.serialize().unwrap();
        let parsed: Value = serde_json::from_str(&blob).unwrap();
        assert!(parsed.get("keep").is_some());
        assert!(parsed.get("gone").is_none());

        let restored = FlagStore::new();
        restored.restore(&blob).unwrap();
        assert!(restored.initialized());
        assert_eq!(restored.get("keep").unwrap().value, json!(42));
    }

    #[test]
    fn restore_failure_leaves_store_untouched() {
        let store = FlagStore::new();
        store.upsert(flag("f", 1, json!(true)));
        assert!(store.restore("not json").is_err());
        assert!(store.restore(r#"{"f": {"version": "bad"}}"#).is_err());
        assert!(!store.initialized());
        assert_eq!(store.get("f").unwrap().value, json!(true));
    }
}
