//! SDK configuration.
//!
//! Built through [`ConfigBuilder`]; `build()` validates secondary
//! credentials and clamps intervals to their service floors.

use crate::error::Error;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// Environment name reserved for the primary credential.
pub const PRIMARY_ENV_NAME: &str = "default";

pub const DEFAULT_STREAM_URI: &str = "https://clientstream.togglekit.io";
pub const DEFAULT_POLL_URI: &str = "https://app.togglekit.io";
pub const DEFAULT_EVENTS_URI: &str = "https://mobile.togglekit.io";

/// Lowest allowed foreground poll interval.
pub const MIN_POLL_INTERVAL_MS: u64 = 30_000;
/// Lowest allowed background poll interval.
pub const MIN_BACKGROUND_POLL_INTERVAL_MS: u64 = 15 * 60 * 1000;

/// Validated SDK configuration, shared read-only by every environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Primary environment credential, sent verbatim as `Authorization`.
    pub credential: String,
    /// Secondary environments: name → credential.
    pub secondary_credentials: HashMap<String, String>,
    pub stream_uri: String,
    pub poll_uri: String,
    pub events_uri: String,
    pub proxy_uri: Option<String>,
    pub ca_cert_path: Option<PathBuf>,
    pub verify_peer: bool,
    pub offline: bool,
    pub streaming: bool,
    /// Send the user via a REPORT body instead of a base64url path segment.
    pub use_report: bool,
    /// Request evaluation reasons with flag payloads.
    pub use_reasons: bool,
    pub poll_interval_ms: u64,
    pub background_poll_interval_ms: u64,
    pub stream_initial_retry_delay_ms: u64,
    pub stream_read_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub events_capacity: usize,
    pub events_flush_interval_ms: u64,
    pub inline_users_in_events: bool,
    pub all_attributes_private: bool,
    pub private_attribute_names: Vec<String>,
    pub disable_background_updating: bool,
    /// Suppress the automatic alias event when an anonymous user is
    /// identified as a known one.
    pub auto_alias_opt_out: bool,
}

impl Config {
    pub fn builder(credential: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(credential)
    }
}

pub struct ConfigBuilder {
    credential: String,
    secondaries: Vec<(String, String)>,
    stream_uri: String,
    poll_uri: String,
    events_uri: String,
    proxy_uri: Option<String>,
    ca_cert_path: Option<PathBuf>,
    verify_peer: bool,
    offline: bool,
    streaming: bool,
    use_report: bool,
    use_reasons: bool,
    poll_interval_ms: u64,
    background_poll_interval_ms: u64,
    stream_initial_retry_delay_ms: u64,
    stream_read_timeout_ms: u64,
    request_timeout_ms: u64,
    connect_timeout_ms: u64,
    events_capacity: usize,
    events_flush_interval_ms: u64,
    inline_users_in_events: bool,
    all_attributes_private: bool,
    private_attribute_names: Vec<String>,
    disable_background_updating: bool,
    auto_alias_opt_out: bool,
}

impl ConfigBuilder {
    pub fn new(credential: impl Into<String>) -> Self {
        ConfigBuilder {
            credential: credential.into(),
            secondaries: Vec::new(),
            stream_uri: DEFAULT_STREAM_URI.to_owned(),
            poll_uri: DEFAULT_POLL_URI.to_owned(),
            events_uri: DEFAULT_EVENTS_URI.to_owned(),
            proxy_uri: None,
            ca_cert_path: None,
            verify_peer: true,
            offline: false,
            streaming: true,
            use_report: false,
            use_reasons: false,
            poll_interval_ms: 5 * 60 * 1000,
            background_poll_interval_ms: 60 * 60 * 1000,
            stream_initial_retry_delay_ms: 1000,
            stream_read_timeout_ms: 5 * 60 * 1000,
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            events_capacity: 100,
            events_flush_interval_ms: 30_000,
            inline_users_in_events: true,
            all_attributes_private: false,
            private_attribute_names: Vec::new(),
            disable_background_updating: false,
            auto_alias_opt_out: false,
        }
    }

    /// Add a secondary environment sharing the same user.
    pub fn secondary_credential(
        mut self,
        name: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        self.secondaries.push((name.into(), credential.into()));
        self
    }

    pub fn stream_uri(mut self, uri: impl Into<String>) -> Self {
        self.stream_uri = trim_trailing_slash(uri.into());
        self
    }

    pub fn poll_uri(mut self, uri: impl Into<String>) -> Self {
        self.poll_uri = trim_trailing_slash(uri.into());
        self
    }

    pub fn events_uri(mut self, uri: impl Into<String>) -> Self {
        self.events_uri = trim_trailing_slash(uri.into());
        self
    }

    pub fn proxy_uri(mut self, uri: impl Into<String>) -> Self {
        self.proxy_uri = Some(uri.into());
        self
    }

    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn use_report(mut self, use_report: bool) -> Self {
        self.use_report = use_report;
        self
    }

    pub fn use_reasons(mut self, use_reasons: bool) -> Self {
        self.use_reasons = use_reasons;
        self
    }

    pub fn poll_interval_ms(mut self, millis: u64) -> Self {
        self.poll_interval_ms = millis;
        self
    }

    pub fn background_poll_interval_ms(mut self, millis: u64) -> Self {
        self.background_poll_interval_ms = millis;
        self
    }

    pub fn stream_initial_retry_delay_ms(mut self, millis: u64) -> Self {
        self.stream_initial_retry_delay_ms = millis;
        self
    }

    pub fn stream_read_timeout_ms(mut self, millis: u64) -> Self {
        self.stream_read_timeout_ms = millis;
        self
    }

    pub fn request_timeout_ms(mut self, millis: u64) -> Self {
        self.request_timeout_ms = millis;
        self
    }

    pub fn connect_timeout_ms(mut self, millis: u64) -> Self {
        self.connect_timeout_ms = millis;
        self
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity;
        self
    }

    pub fn events_flush_interval_ms(mut self, millis: u64) -> Self {
        self.events_flush_interval_ms = millis;
        self
    }

    pub fn inline_users_in_events(mut self, inline: bool) -> Self {
        self.inline_users_in_events = inline;
        self
    }

    pub fn all_attributes_private(mut self, private: bool) -> Self {
        self.all_attributes_private = private;
        self
    }

    pub fn private_attribute_name(mut self, name: impl Into<String>) -> Self {
        self.private_attribute_names.push(name.into());
        self
    }

    pub fn disable_background_updating(mut self, disable: bool) -> Self {
        self.disable_background_updating = disable;
        self
    }

    pub fn auto_alias_opt_out(mut self, opt_out: bool) -> Self {
        self.auto_alias_opt_out = opt_out;
        self
    }

    pub fn build(self) -> Result<Config, Error> {
        if self.credential.is_empty() {
            return Err(Error::Config("credential must not be empty".to_owned()));
        }

        let mut secondary_credentials = HashMap::new();
        for (name, credential) in self.secondaries {
            if name == PRIMARY_ENV_NAME {
                return Err(Error::Config(format!(
                    "{PRIMARY_ENV_NAME:?} is reserved for the primary environment"
                )));
            }
            if credential == self.credential {
                return Err(Error::Config(
                    "secondary environment reuses the primary credential".to_owned(),
                ));
            }
            if secondary_credentials.insert(name.clone(), credential).is_some() {
                return Err(Error::Config(format!(
                    "secondary environment {name:?} added twice"
                )));
            }
        }

        let poll_interval_ms = if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            warn!(
                requested = self.poll_interval_ms,
                floor = MIN_POLL_INTERVAL_MS,
                "poll interval below floor, clamping"
            );
            MIN_POLL_INTERVAL_MS
        } else {
            self.poll_interval_ms
        };

        let background_poll_interval_ms =
            if self.background_poll_interval_ms < MIN_BACKGROUND_POLL_INTERVAL_MS {
                warn!(
                    requested = self.background_poll_interval_ms,
                    floor = MIN_BACKGROUND_POLL_INTERVAL_MS,
                    "background poll interval below floor, clamping"
                );
                MIN_BACKGROUND_POLL_INTERVAL_MS
            } else {
                self.background_poll_interval_ms
            };

        Ok(Config {
            credential: self.credential,
            secondary_credentials,
            stream_uri: self.stream_uri,
            poll_uri: self.poll_uri,
            events_uri: self.events_uri,
            proxy_uri: self.proxy_uri,
            ca_cert_path: self.ca_cert_path,
            verify_peer: self.verify_peer,
            offline: self.offline,
            streaming: self.streaming,
            use_report: self.use_report,
            use_reasons: self.use_reasons,
            poll_interval_ms,
            background_poll_interval_ms,
            stream_initial_retry_delay_ms: self.stream_initial_retry_delay_ms,
            stream_read_timeout_ms: self.stream_read_timeout_ms,
            request_timeout_ms: self.request_timeout_ms,
            connect_timeout_ms: self.connect_timeout_ms,
            events_capacity: self.events_capacity,
            events_flush_interval_ms: self.events_flush_interval_ms,
            inline_users_in_events: self.inline_users_in_events,
            all_attributes_private: self.all_attributes_private,
            private_attribute_names: self.private_attribute_names,
            disable_background_updating: self.disable_background_updating,
            auto_alias_opt_out: self.auto_alias_opt_out,
        })
    }
}

fn trim_trailing_slash(mut uri: String) -> String {
    while uri.ends_with('/') {
        uri.pop();
    }
    uri
}
