//! Per-client background workers.
//!
//! Every client runs three long-lived tasks: event delivery, polling, and
//! streaming.  They share one [`WorkerContext`] and park on the client's
//! cancellation token and wake signals, so `close` and `identify` can
//! interrupt any sleep or in-flight read.

pub(crate) mod events;
pub(crate) mod polling;
pub(crate) mod streaming;

use crate::client::{ClientRuntime, Lifecycle};
use crate::config::Config;
use crate::events::EventProcessor;
use crate::http::HttpTransport;
use crate::registry::SharedContext;
use crate::update::UpdateHandler;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub config: Arc<Config>,
    pub shared: Arc<SharedContext>,
    pub events: Arc<EventProcessor>,
    pub transport: Arc<HttpTransport>,
    pub update: Arc<UpdateHandler>,
    pub lifecycle: Lifecycle,
    pub runtime: Arc<ClientRuntime>,
}

impl WorkerContext {
    pub fn user_json(&self) -> String {
        self.shared.user_json()
    }
}
