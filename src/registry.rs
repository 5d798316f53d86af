//! Environment registry.
//!
//! A process may run several environments concurrently, one client per
//! credential, all sharing a single user.  The registry is an explicit
//! handle owned jointly by the clients; there is no process-global
//! state.  Operations that span environments (identify, offline toggles,
//! flush, close) fan out over the client table.

use crate::client::{Client, StatusCallback};
use crate::config::Config;
use crate::persist::PersistentStore;
use crate::user::{RedactionPolicy, User, user_to_json};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub(crate) struct SharedContext {
    pub config: Arc<Config>,
    /// The single user all environments evaluate for.  Replaced wholesale
    /// by `identify`.
    pub user: RwLock<User>,
    /// Environment name → client.  Drained by `close`, which is also what
    /// breaks the `Client` ↔ `SharedContext` reference cycle.
    pub clients: RwLock<HashMap<String, Arc<Client>>>,
    pub status_callback: Arc<RwLock<Option<StatusCallback>>>,
    pub persistence: Option<Arc<dyn PersistentStore>>,
}

impl SharedContext {
    pub fn new(
        config: Arc<Config>,
        user: User,
        persistence: Option<Arc<dyn PersistentStore>>,
    ) -> Self {
        SharedContext {
            config,
            user: RwLock::new(user),
            clients: RwLock::new(HashMap::new()),
            status_callback: Arc::new(RwLock::new(None)),
            persistence,
        }
    }

    /// The current user serialized for flag requests: unredacted, since
    /// the service needs the full profile to evaluate targeting.
    pub fn user_json(&self) -> String {
        let user = self.user.read().unwrap();
        user_to_json(&user, false, &RedactionPolicy::default()).to_string()
    }

    pub fn clients_snapshot(&self) -> Vec<Arc<Client>> {
        self.clients.read().unwrap().values().cloned().collect()
    }
}
