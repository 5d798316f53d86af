//! Client lifecycle and evaluation surface.
//!
//! One client per environment; all environments share one user through the
//! registry.  `init` spawns the three workers and optionally waits out an
//! initialization deadline; `close` drains every environment, joins the
//! workers, and lets the event worker run its final flush.
//!
//! Variation reads are synchronous: a store lookup combined with the
//! caller's fallback, feeding the event processor as a side effect.

use crate::config::{Config, PRIMARY_ENV_NAME};
use crate::error::Result;
use crate::events::EventProcessor;
use crate::http::HttpTransport;
use crate::persist::{PersistentStore, flags_blob_name};
use crate::registry::SharedContext;
use crate::store::{FlagListener, FlagStore};
use crate::update::UpdateHandler;
use crate::user::User;
use crate::workers::{self, WorkerContext};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tk_protocol::{ERROR_FLAG_NOT_FOUND, ERROR_WRONG_TYPE, FlagRecord, error_reason};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Where a client is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Initializing,
    Initialized,
    ShuttingDown,
    Failed,
}

/// Callback invoked with `(environment_name, status)` on every status
/// change, with no SDK lock held.
pub type StatusCallback = Arc<dyn Fn(&str, ClientStatus) + Send + Sync>;

/// Status cell shared between the client, its workers, and the update
/// pipeline.  Transitions broadcast over a watch channel so
/// `await_initialized` is a bounded wait rather than a poll.
#[derive(Clone)]
pub(crate) struct Lifecycle {
    env: Arc<str>,
    tx: Arc<watch::Sender<ClientStatus>>,
    callback: Arc<RwLock<Option<StatusCallback>>>,
}

impl Lifecycle {
    fn new(env: &str, callback: Arc<RwLock<Option<StatusCallback>>>) -> Self {
        let (tx, _rx) = watch::channel(ClientStatus::Initializing);
        Lifecycle {
            env: Arc::from(env),
            tx: Arc::new(tx),
            callback,
        }
    }

    pub fn current(&self) -> ClientStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientStatus> {
        self.tx.subscribe()
    }

    fn apply(&self, decide: impl FnOnce(ClientStatus) -> Option<ClientStatus>) {
        let mut applied = None;
        self.tx.send_if_modified(|current| match decide(*current) {
            Some(next) if next != *current => {
                *current = next;
                applied = Some(next);
                true
            }
            _ => false,
        });

        if let Some(status) = applied {
            // Snapshot the callback and invoke it with no lock held.
            let callback = self.callback.read().unwrap().clone();
            if let Some(callback) = callback {
                callback(&self.env, status);
            }
        }
    }

    pub fn set(&self, status: ClientStatus) {
        self.apply(|_| Some(status));
    }

    /// First successful put only counts while still initializing.
    pub fn mark_initialized(&self) {
        self.apply(|current| {
            (current == ClientStatus::Initializing).then_some(ClientStatus::Initialized)
        });
    }

    pub fn fail(&self) {
        self.set(ClientStatus::Failed);
    }

    fn shut_down(&self) {
        // A failed client stays failed through close.
        self.apply(|current| {
            (current != ClientStatus::Failed).then_some(ClientStatus::ShuttingDown)
        });
    }
}

/// Cancellation and wake plumbing shared with the workers.
pub(crate) struct ClientRuntime {
    /// Cancelled once, by close; parents every connection token.
    pub shutdown: CancellationToken,
    /// Token of the live streaming connection, replaced per attempt.
    connection: Mutex<CancellationToken>,
    /// Wakes the event worker for an early flush.
    pub flush: Notify,
    /// Re-check signal for the polling and streaming workers.
    pub kick: Notify,
    pub offline: AtomicBool,
    pub background: AtomicBool,
}

impl ClientRuntime {
    fn new(offline: bool) -> Self {
        let shutdown = CancellationToken::new();
        ClientRuntime {
            connection: Mutex::new(shutdown.child_token()),
            shutdown,
            flush: Notify::new(),
            kick: Notify::new(),
            offline: AtomicBool::new(offline),
            background: AtomicBool::new(false),
        }
    }

    /// Fresh token for the next streaming connection attempt.
    pub fn connection_token(&self) -> CancellationToken {
        let token = self.shutdown.child_token();
        *self.connection.lock().unwrap() = token.clone();
        token
    }

    /// Abort the live connection (if any) and wake the update workers so
    /// they reconsider their state.
    pub fn reinitialize_connection(&self) {
        self.connection.lock().unwrap().cancel();
        self.kick.notify_waiters();
    }
}

/// Result of a `*_variation_detail` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Detail<T> {
    pub value: T,
    /// Index of the served variation; `None` when none was chosen or the
    /// evaluation errored.
    pub variation_index: Option<i32>,
    /// The flag's evaluation reason, or an `{kind: "ERROR"}` object.
    pub reason: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Bool,
    Number,
    String,
}

/// JSON null stored in a flag satisfies any requested type; the typed
/// accessor then falls back without reporting a type error.
fn kind_matches(kind: Option<ValueKind>, value: &Value) -> bool {
    let Some(kind) = kind else { return true };
    if value.is_null() {
        return true;
    }
    match kind {
        ValueKind::Bool => value.is_boolean(),
        ValueKind::Number => value.is_number(),
        ValueKind::String => value.is_string(),
    }
}

fn detail_parts(entry: Option<&FlagRecord>, matched: bool) -> (Option<i32>, Option<Value>) {
    match entry {
        None => (None, Some(error_reason(ERROR_FLAG_NOT_FOUND))),
        Some(_) if !matched => (None, Some(error_reason(ERROR_WRONG_TYPE))),
        Some(flag) => (flag.chosen_variation(), flag.reason.clone()),
    }
}

pub struct Client {
    env_name: String,
    shared: Arc<SharedContext>,
    store: Arc<FlagStore>,
    pub(crate) events: Arc<EventProcessor>,
    lifecycle: Lifecycle,
    runtime: Arc<ClientRuntime>,
    pub(crate) update: Arc<UpdateHandler>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Start the primary client plus one secondary per configured
    /// credential, then wait up to `max_wait_ms` for initialization.
    ///
    /// Must be called from within a tokio runtime; the workers are spawned
    /// onto it.
    pub async fn init(config: Config, user: User, max_wait_ms: u64) -> Result<Arc<Client>> {
        Self::init_inner(config, user, max_wait_ms, None).await
    }

    /// Like [`Client::init`], with a persistence hook: flags saved for the
    /// user are restored before the workers start, and later updates are
    /// written back through it.
    pub async fn init_with_persistence(
        config: Config,
        user: User,
        max_wait_ms: u64,
        persistence: Arc<dyn PersistentStore>,
    ) -> Result<Arc<Client>> {
        Self::init_inner(config, user, max_wait_ms, Some(persistence)).await
    }

    async fn init_inner(
        config: Config,
        user: User,
        max_wait_ms: u64,
        persistence: Option<Arc<dyn PersistentStore>>,
    ) -> Result<Arc<Client>> {
        let config = Arc::new(config);
        let shared = Arc::new(SharedContext::new(config.clone(), user, persistence));

        let mut table = HashMap::new();
        let primary = Self::start(&shared, PRIMARY_ENV_NAME, config.credential.clone())?;
        table.insert(PRIMARY_ENV_NAME.to_owned(), primary.clone());
        for (name, credential) in &config.secondary_credentials {
            table.insert(name.clone(), Self::start(&shared, name, credential.clone())?);
        }
        *shared.clients.write().unwrap() = table;

        if max_wait_ms > 0 {
            let deadline = Instant::now() + Duration::from_millis(max_wait_ms);
            for client in shared.clients_snapshot() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                client.wait_initialized(remaining).await;
            }
        }

        Ok(primary)
    }

    fn start(shared: &Arc<SharedContext>, env_name: &str, credential: String) -> Result<Arc<Client>> {
        let store = Arc::new(FlagStore::new());
        let events = Arc::new(EventProcessor::new(&shared.config));
        let transport = Arc::new(HttpTransport::new(&shared.config, credential)?);
        let lifecycle = Lifecycle::new(env_name, shared.status_callback.clone());
        let runtime = Arc::new(ClientRuntime::new(shared.config.offline));
        let update = Arc::new(UpdateHandler::new(
            store.clone(),
            lifecycle.clone(),
            transport.clone(),
            shared.clone(),
        ));

        // Seed the store from the last saved flag set, if the embedder
        // installed a persistence hook.  This does not mark the client
        // initialized; only fresh service data does that.
        if let Some(persist) = &shared.persistence {
            let key = shared.user.read().unwrap().key.clone();
            if let Some(blob) = persist.read(&flags_blob_name(&key)) {
                match store.restore(&blob) {
                    Ok(()) => info!(env = env_name, "restored persisted flags"),
                    Err(e) => warn!(env = env_name, error = %e, "ignoring bad persisted flags"),
                }
            }
        }

        {
            let user = shared.user.read().unwrap();
            events.identify(&user);
        }

        let ctx = WorkerContext {
            config: shared.config.clone(),
            shared: shared.clone(),
            events: events.clone(),
            transport,
            update: update.clone(),
            lifecycle: lifecycle.clone(),
            runtime: runtime.clone(),
        };
        let handles = vec![
            tokio::spawn(workers::events::run(ctx.clone())),
            tokio::spawn(workers::polling::run(ctx.clone())),
            tokio::spawn(workers::streaming::run(ctx)),
        ];

        Ok(Arc::new(Client {
            env_name: env_name.to_owned(),
            shared: shared.clone(),
            store,
            events,
            lifecycle,
            runtime,
            update,
            workers: Mutex::new(handles),
        }))
    }

    /// Shut down every environment: signal the workers, abort in-flight
    /// reads, join the tasks.  The event worker flushes once on the way
    /// out unless the client failed.
    pub async fn close(&self) {
        let clients: Vec<Arc<Client>> = {
            let mut table = self.shared.clients.write().unwrap();
            table.drain().map(|(_, client)| client).collect()
        };
        for client in clients {
            client.close_one().await;
        }
    }

    async fn close_one(&self) {
        self.lifecycle.shut_down();
        self.runtime.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!(env = %self.env_name, "client closed");
    }

    pub fn environment_name(&self) -> &str {
        &self.env_name
    }

    /// Look up the client for a named environment (the primary lives under
    /// [`PRIMARY_ENV_NAME`]).
    pub fn environment(&self, name: &str) -> Option<Arc<Client>> {
        self.shared.clients.read().unwrap().get(name).cloned()
    }

    // -----------------------------------------------------------------------
    // Lifecycle queries
    // -----------------------------------------------------------------------

    pub fn status(&self) -> ClientStatus {
        self.lifecycle.current()
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle.current() == ClientStatus::Initialized
    }

    /// Wait until the first flag bundle applies, the client reaches a
    /// terminal state, or the timeout passes.  Returns `is_initialized`.
    pub async fn await_initialized(&self, timeout_ms: u64) -> bool {
        self.wait_initialized(Duration::from_millis(timeout_ms)).await
    }

    async fn wait_initialized(&self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return self.is_initialized();
        }
        let mut rx = self.lifecycle.subscribe();
        let wait = async move {
            loop {
                match *rx.borrow_and_update() {
                    ClientStatus::Initialized => return true,
                    ClientStatus::Failed | ClientStatus::ShuttingDown => return false,
                    ClientStatus::Initializing => {}
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(outcome) => outcome,
            Err(_) => self.is_initialized(),
        }
    }

    /// Register the process-wide status callback.  Invoked for every
    /// environment, outside all SDK locks.
    pub fn set_status_callback(
        &self,
        callback: impl Fn(&str, ClientStatus) + Send + Sync + 'static,
    ) {
        *self.shared.status_callback.write().unwrap() = Some(Arc::new(callback));
    }

    pub fn clear_status_callback(&self) {
        *self.shared.status_callback.write().unwrap() = None;
    }

    // -----------------------------------------------------------------------
    // Connectivity
    // -----------------------------------------------------------------------

    /// Stop all network activity for every environment.
    pub fn set_offline(&self) {
        for client in self.shared.clients_snapshot() {
            client.runtime.offline.store(true, Ordering::Relaxed);
            client.runtime.reinitialize_connection();
        }
    }

    /// Resume network activity; clients re-enter `Initializing` until the
    /// next bundle lands.
    pub fn set_online(&self) {
        for client in self.shared.clients_snapshot() {
            client.runtime.offline.store(false, Ordering::Relaxed);
            client.lifecycle.set(ClientStatus::Initializing);
            client.runtime.kick.notify_waiters();
        }
    }

    pub fn is_offline(&self) -> bool {
        self.runtime.offline.load(Ordering::Relaxed)
    }

    /// Background mode parks streaming and stretches the poll interval.
    /// Any live streaming connection is dropped so the worker can
    /// reconsider.
    pub fn set_background(&self, background: bool) {
        self.runtime.background.store(background, Ordering::Relaxed);
        self.runtime.reinitialize_connection();
    }

    // -----------------------------------------------------------------------
    // User transitions and analytics
    // -----------------------------------------------------------------------

    /// Replace the shared user.  Every environment drops its connection,
    /// re-enters `Initializing`, and records an identify event; promoting
    /// an anonymous user to a known one also records an alias unless
    /// opted out.
    pub fn identify(&self, user: User) {
        let previous = {
            let mut shared_user = self.shared.user.write().unwrap();
            std::mem::replace(&mut *shared_user, user.clone())
        };
        let auto_alias = previous.anonymous
            && !user.anonymous
            && !self.shared.config.auto_alias_opt_out;

        for client in self.shared.clients_snapshot() {
            client.lifecycle.set(ClientStatus::Initializing);
            client.runtime.reinitialize_connection();
            client.events.identify(&user);
            if auto_alias {
                client.events.alias(&user, &previous);
            }
        }
    }

    /// Record an alias between two users explicitly.
    pub fn alias(&self, current: &User, previous: &User) {
        self.events.alias(current, previous);
    }

    pub fn track(&self, name: &str) {
        self.track_inner(name, None, None);
    }

    pub fn track_data(&self, name: &str, data: Value) {
        self.track_inner(name, Some(data), None);
    }

    pub fn track_metric(&self, name: &str, data: Option<Value>, metric: f64) {
        self.track_inner(name, data, Some(metric));
    }

    fn track_inner(&self, name: &str, data: Option<Value>, metric: Option<f64>) {
        let user = self.shared.user.read().unwrap();
        self.events.track(&user, name, data, metric);
    }

    /// Ask every environment's event worker to deliver what it has.
    pub fn flush(&self) {
        for client in self.shared.clients_snapshot() {
            client.runtime.flush.notify_one();
        }
    }

    // -----------------------------------------------------------------------
    // Variations
    // -----------------------------------------------------------------------

    fn eval_internal(
        &self,
        key: &str,
        fallback: Value,
        kind: Option<ValueKind>,
        detailed: bool,
    ) -> (Value, Option<Arc<FlagRecord>>, bool) {
        let entry = self.store.get(key);
        let matched = entry
            .as_deref()
            .is_some_and(|flag| kind_matches(kind, &flag.value));
        let value = match (&entry, matched) {
            (Some(flag), true) => flag.value.clone(),
            _ => fallback.clone(),
        };

        {
            let user = self.shared.user.read().unwrap();
            self.events
                .process_eval(&user, key, entry.as_deref(), &value, &fallback, detailed);
        }

        (value, entry, matched)
    }

    pub fn bool_variation(&self, key: &str, fallback: bool) -> bool {
        let (value, _, _) =
            self.eval_internal(key, Value::Bool(fallback), Some(ValueKind::Bool), false);
        value.as_bool().unwrap_or(fallback)
    }

    pub fn bool_variation_detail(&self, key: &str, fallback: bool) -> Detail<bool> {
        let (value, entry, matched) =
            self.eval_internal(key, Value::Bool(fallback), Some(ValueKind::Bool), true);
        let (variation_index, reason) = detail_parts(entry.as_deref(), matched);
        Detail {
            value: value.as_bool().unwrap_or(fallback),
            variation_index,
            reason,
        }
    }

    /// Stored numbers are truncated toward zero.
    pub fn int_variation(&self, key: &str, fallback: i64) -> i64 {
        let (value, _, _) =
            self.eval_internal(key, Value::from(fallback), Some(ValueKind::Number), false);
        value.as_f64().map_or(fallback, |n| n as i64)
    }

    pub fn int_variation_detail(&self, key: &str, fallback: i64) -> Detail<i64> {
        let (value, entry, matched) =
            self.eval_internal(key, Value::from(fallback), Some(ValueKind::Number), true);
        let (variation_index, reason) = detail_parts(entry.as_deref(), matched);
        Detail {
            value: value.as_f64().map_or(fallback, |n| n as i64),
            variation_index,
            reason,
        }
    }

    pub fn double_variation(&self, key: &str, fallback: f64) -> f64 {
        let (value, _, _) =
            self.eval_internal(key, Value::from(fallback), Some(ValueKind::Number), false);
        value.as_f64().unwrap_or(fallback)
    }

    pub fn double_variation_detail(&self, key: &str, fallback: f64) -> Detail<f64> {
        let (value, entry, matched) =
            self.eval_internal(key, Value::from(fallback), Some(ValueKind::Number), true);
        let (variation_index, reason) = detail_parts(entry.as_deref(), matched);
        Detail {
            value: value.as_f64().unwrap_or(fallback),
            variation_index,
            reason,
        }
    }

    pub fn string_variation(&self, key: &str, fallback: &str) -> String {
        let (value, _, _) = self.eval_internal(
            key,
            Value::String(fallback.to_owned()),
            Some(ValueKind::String),
            false,
        );
        value
            .as_str()
            .map_or_else(|| fallback.to_owned(), ToOwned::to_owned)
    }

    pub fn string_variation_detail(&self, key: &str, fallback: &str) -> Detail<String> {
        let (value, entry, matched) = self.eval_internal(
            key,
            Value::String(fallback.to_owned()),
            Some(ValueKind::String),
            true,
        );
        let (variation_index, reason) = detail_parts(entry.as_deref(), matched);
        Detail {
            value: value
                .as_str()
                .map_or_else(|| fallback.to_owned(), ToOwned::to_owned),
            variation_index,
            reason,
        }
    }

    /// Any JSON shape; the stored value is returned as-is.
    pub fn json_variation(&self, key: &str, fallback: Value) -> Value {
        let (value, _, _) = self.eval_internal(key, fallback, None, false);
        value
    }

    pub fn json_variation_detail(&self, key: &str, fallback: Value) -> Detail<Value> {
        let (value, entry, matched) = self.eval_internal(key, fallback, None, true);
        let (variation_index, reason) = detail_parts(entry.as_deref(), matched);
        Detail {
            value,
            variation_index,
            reason,
        }
    }

    /// Current values of every live flag as a `{key: value}` object.
    pub fn all_flags(&self) -> Value {
        let mut out = Map::new();
        for entry in self.store.snapshot_all() {
            out.insert(entry.key.clone(), entry.value.clone());
        }
        Value::Object(out)
    }

    // -----------------------------------------------------------------------
    // Persistence and listeners
    // -----------------------------------------------------------------------

    /// Serialize the current flag set for the embedder to stash away.
    pub fn save_flags(&self) -> Result<String> {
        Ok(self.store.serialize()?)
    }

    /// Feed back a blob produced by [`Client::save_flags`].  A parse
    /// failure leaves the store untouched.
    pub fn restore_flags(&self, blob: &str) -> Result<()> {
        self.store.restore(blob)?;
        Ok(())
    }

    pub fn register_feature_flag_listener(&self, key: impl Into<String>, listener: FlagListener) {
        self.store.register_listener(key, listener);
    }

    pub fn unregister_feature_flag_listener(&self, key: &str, listener: &FlagListener) {
        self.store.unregister_listener(key, listener);
    }
}
