//! ToggleKit client SDK.
//!
//! An embedded feature-flag client: it connects to the flag service,
//! keeps a local store of pre-evaluated flag values for one user, and
//! answers typed variation lookups against that store with caller-supplied
//! fallbacks.  Evaluations, identify calls, and custom events feed an
//! analytics pipeline delivered in batches.
//!
//! ```no_run
//! use togglekit::{Client, Config, User};
//!
//! # async fn example() -> Result<(), togglekit::Error> {
//! let config = Config::builder("mobile-key").build()?;
//! let client = Client::init(config, User::new("user-key"), 5_000).await?;
//!
//! if client.bool_variation("new-dashboard", false) {
//!     // show the new dashboard
//! }
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! Multiple environments can run concurrently: configure secondary
//! credentials and reach each environment's client through
//! [`Client::environment`].  All of them evaluate for the same user;
//! [`Client::identify`] switches that user everywhere at once.

mod client;
mod config;
mod error;
mod events;
mod http;
mod persist;
mod registry;
mod store;
mod update;
mod user;
mod util;
mod workers;

pub use client::{Client, ClientStatus, Detail, StatusCallback};
pub use config::{Config, ConfigBuilder, PRIMARY_ENV_NAME};
pub use error::{Error, Result};
pub use persist::{FilePersistence, PersistentStore};
pub use store::FlagListener;
pub use user::{User, UserBuilder};

pub use tk_protocol as protocol;
