// tk-protocol: ToggleKit flag-delivery and analytics wire types.
//
// Flag records arrive pre-evaluated for a single user, either as a full
// bundle (the streaming `put` event and the polling response share one
// shape) or as incremental `patch`/`delete` events.  Analytics events are
// posted as a JSON array; every event object carries a top-level `kind`
// field for discriminated serialization.

pub mod sse;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("flag bundle is not a JSON object")]
    NotAnObject,
    #[error("flag {key:?}: {source}")]
    BadFlag {
        key: String,
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Flag records
// ---------------------------------------------------------------------------

/// One flag as delivered by the service: current value plus the metadata
/// needed for version ordering and analytics.
///
/// A record with `deleted = true` is a tombstone: its value is JSON null
/// and it exists only to keep the version sequence monotone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRecord {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    pub version: u32,
    /// Version of the flag definition itself, when the service reports it
    /// separately from the environment version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_version: Option<u32>,
    /// Index of the variation served; -1 or absent means none was chosen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<i32>,
    #[serde(default)]
    pub track_events: bool,
    #[serde(default)]
    pub track_reason: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Value>,
    /// Wall-clock millis until which evaluations are debugged; 0 = never.
    #[serde(default)]
    pub debug_events_until_date: u64,
    #[serde(default)]
    pub deleted: bool,
}

impl FlagRecord {
    /// Tombstone record standing in for a deleted flag at `version`.
    pub fn tombstone(key: impl Into<String>, version: u32) -> Self {
        FlagRecord {
            key: key.into(),
            value: Value::Null,
            version,
            flag_version: None,
            variation: None,
            track_events: false,
            track_reason: false,
            reason: None,
            debug_events_until_date: 0,
            deleted: true,
        }
    }

    /// The version to report in analytics: `flagVersion` when present,
    /// otherwise the environment `version`.
    pub fn display_version(&self) -> u32 {
        self.flag_version.unwrap_or(self.version)
    }

    /// The served variation index, with the -1 sentinel normalized away.
    pub fn chosen_variation(&self) -> Option<i32> {
        self.variation.filter(|v| *v >= 0)
    }

    /// Parse a full flag bundle: `{flag-key: flag-json, …}`.
    ///
    /// The map key is authoritative and is written over any `key` field in
    /// the child object.  Any child failing to parse fails the whole
    /// bundle, so callers can apply the result atomically or not at all.
    pub fn parse_bundle(body: &str) -> Result<Vec<FlagRecord>, ProtocolError> {
        let raw: Value = serde_json::from_str(body)?;
        let Value::Object(map) = raw else {
            return Err(ProtocolError::NotAnObject);
        };

        let mut flags = Vec::with_capacity(map.len());
        for (key, mut child) in map {
            if let Some(obj) = child.as_object_mut() {
                obj.insert("key".to_owned(), Value::String(key.clone()));
            }
            let flag = serde_json::from_value(child)
                .map_err(|source| ProtocolError::BadFlag { key, source })?;
            flags.push(flag);
        }
        Ok(flags)
    }
}

/// Body of the streaming `delete` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMessage {
    pub key: String,
    pub version: u32,
}

// ---------------------------------------------------------------------------
// Evaluation reasons
// ---------------------------------------------------------------------------

pub const ERROR_FLAG_NOT_FOUND: &str = "FLAG_NOT_FOUND";
pub const ERROR_WRONG_TYPE: &str = "WRONG_TYPE";

/// An `{kind: "ERROR", errorKind}` evaluation reason.
pub fn error_reason(error_kind: &str) -> Value {
    serde_json::json!({ "kind": "ERROR", "errorKind": error_kind })
}

// ---------------------------------------------------------------------------
// Analytics events
// ---------------------------------------------------------------------------

/// How an event refers to the user it was recorded for: the full encoded
/// user object when the inline-users policy is on, otherwise just the key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EventUser {
    #[serde(rename = "user")]
    Inline(Value),
    #[serde(rename = "userKey")]
    Key(String),
}

/// Distinguishes anonymous users in event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContextKind {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "anonymousUser")]
    AnonymousUser,
}

impl ContextKind {
    pub fn of(anonymous: bool) -> Self {
        if anonymous {
            ContextKind::AnonymousUser
        } else {
            ContextKind::User
        }
    }

    /// Feature and custom events only carry the field for anonymous users.
    pub fn tag(anonymous: bool) -> Option<Self> {
        anonymous.then_some(ContextKind::AnonymousUser)
    }
}

/// One outbound analytics event.  Serialized with a `kind` tag; the whole
/// delivery payload is a JSON array of these with at most one summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutputEvent {
    #[serde(rename_all = "camelCase")]
    Identify {
        creation_date: u64,
        key: String,
        user: Value,
    },
    #[serde(rename_all = "camelCase")]
    Feature {
        creation_date: u64,
        key: String,
        #[serde(flatten)]
        user: EventUser,
        value: Value,
        default: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        variation: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        context_kind: Option<ContextKind>,
    },
    #[serde(rename_all = "camelCase")]
    Custom {
        creation_date: u64,
        key: String,
        #[serde(flatten)]
        user: EventUser,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metric_value: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        context_kind: Option<ContextKind>,
    },
    #[serde(rename_all = "camelCase")]
    Alias {
        creation_date: u64,
        key: String,
        previous_key: String,
        context_kind: ContextKind,
        previous_context_kind: ContextKind,
    },
    #[serde(rename_all = "camelCase")]
    Summary {
        start_date: u64,
        end_date: u64,
        features: BTreeMap<String, FlagSummary>,
    },
}

/// Aggregated evaluation outcomes for one flag within a summary window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub counters: Vec<Counter>,
}

/// One `(version, variation)` bucket within a flag summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counter {
    pub count: u64,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<i32>,
    /// Set when the flag was absent from the store at evaluation time.
    #[serde(skip_serializing_if = "is_false")]
    pub unknown: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}
