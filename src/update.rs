//! Stream update pipeline.
//!
//! Routes `put`/`patch`/`delete`/`ping` events into the flag store.  The
//! SSE stream and the polling fetch share the `put` path.  A successful
//! `put` is what moves the client to `Initialized`.
//!
//! Malformed updates are dropped with a warning; they never tear down the
//! connection.  Applied updates also feed the persistence hook, debounced
//! so a busy stream cannot turn into a write per event.

use crate::client::Lifecycle;
use crate::http::HttpTransport;
use crate::persist::flags_blob_name;
use crate::registry::SharedContext;
use crate::store::FlagStore;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tk_protocol::sse::SseEvent;
use tk_protocol::{DeleteMessage, FlagRecord};
use tracing::{debug, error, warn};

/// Minimum spacing between persistence writes triggered by updates.
const SAVE_DEBOUNCE: Duration = Duration::from_secs(30);

pub(crate) struct UpdateHandler {
    store: Arc<FlagStore>,
    lifecycle: Lifecycle,
    transport: Arc<HttpTransport>,
    shared: Arc<SharedContext>,
    last_save: Mutex<Option<Instant>>,
}

impl UpdateHandler {
    pub fn new(
        store: Arc<FlagStore>,
        lifecycle: Lifecycle,
        transport: Arc<HttpTransport>,
        shared: Arc<SharedContext>,
    ) -> Self {
        UpdateHandler {
            store,
            lifecycle,
            transport,
            shared,
            last_save: Mutex::new(None),
        }
    }

    /// Apply a full flag bundle.  All-or-nothing: any unparsable child
    /// discards the whole payload.  Returns whether it applied.
    pub fn apply_put_body(&self, body: &str) -> bool {
        match FlagRecord::parse_bundle(body) {
            Ok(flags) => {
                debug!(count = flags.len(), "applying flag bundle");
                self.store.put(flags);
                self.lifecycle.mark_initialized();
                self.save_debounced();
                true
            }
            Err(e) => {
                warn!(error = %e, "discarding unparsable flag bundle");
                false
            }
        }
    }

    fn apply_patch(&self, body: &str) {
        match serde_json::from_str::<FlagRecord>(body) {
            Ok(flag) => {
                self.store.upsert(flag);
                self.save_debounced();
            }
            Err(e) => warn!(error = %e, "discarding malformed patch"),
        }
    }

    fn apply_delete(&self, body: &str) {
        match serde_json::from_str::<DeleteMessage>(body) {
            Ok(msg) => {
                self.store.delete(&msg.key, msg.version);
                self.save_debounced();
            }
            Err(e) => warn!(error = %e, "discarding malformed delete"),
        }
    }

    /// `ping` asks for a full refresh through the polling endpoint, applied
    /// in-band as a put.
    async fn handle_ping(&self) {
        let user_json = self.shared.user_json();
        match self.transport.fetch_flags(&user_json).await {
            Ok(response) if response.status == 200 => {
                self.apply_put_body(&response.body);
            }
            Ok(response) if response.status == 401 || response.status == 403 => {
                error!(status = response.status, "credential rejected during ping refresh");
                self.lifecycle.fail();
            }
            Ok(response) => {
                warn!(status = response.status, "ping refresh failed");
            }
            Err(e) => warn!(error = %e, "ping refresh failed"),
        }
    }

    pub async fn handle_event(&self, event: SseEvent) {
        match event.name.as_str() {
            "put" => {
                self.apply_put_body(&event.data);
            }
            "patch" => self.apply_patch(&event.data),
            "delete" => self.apply_delete(&event.data),
            "ping" => self.handle_ping().await,
            other => warn!(name = other, "ignoring unrecognized stream event"),
        }
    }

    /// Hand the current flag set to the persistence hook, at most once per
    /// debounce window.
    fn save_debounced(&self) {
        let Some(persist) = &self.shared.persistence else {
            return;
        };

        {
            let mut last_save = self.last_save.lock().unwrap();
            if last_save.is_some_and(|at| at.elapsed() < SAVE_DEBOUNCE) {
                return;
            }
            *last_save = Some(Instant::now());
        }

        let blob = match self.store.serialize() {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "failed to serialize flags for persistence");
                return;
            }
        };
        let name = flags_blob_name(&self.shared.user.read().unwrap().key);
        if !persist.write(&name, &blob) {
            warn!(name = %name, "persistence hook rejected flag blob");
        }
    }
}
