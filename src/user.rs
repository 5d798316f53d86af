//! User profiles and their event-payload encoding.
//!
//! A user is a static profile owned by the client set; `identify` replaces
//! it wholesale.  Encoding to JSON happens in two modes: unredacted (for
//! the flag-request URL or REPORT body) and redacted (for analytics
//! events), where private attribute names are withheld and listed in a
//! `privateAttrs` array instead.

use serde_json::{Map, Value};
use uuid::Uuid;

/// Profile of the user flags are evaluated for.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub key: String,
    pub anonymous: bool,
    pub secondary: Option<String>,
    pub ip: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub country: Option<String>,
    pub custom: Option<Map<String, Value>>,
    pub private_attribute_names: Vec<String>,
}

impl User {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        if key.is_empty() {
            return Self::anonymous();
        }
        User {
            key,
            anonymous: false,
            secondary: None,
            ip: None,
            first_name: None,
            last_name: None,
            email: None,
            name: None,
            avatar: None,
            country: None,
            custom: None,
            private_attribute_names: Vec::new(),
        }
    }

    /// A user with a generated key, marked anonymous.  Used when the
    /// embedder supplies no key of its own.
    pub fn anonymous() -> Self {
        let mut user = User::new(Uuid::new_v4().to_string());
        user.anonymous = true;
        user
    }

    pub fn builder(key: impl Into<String>) -> UserBuilder {
        UserBuilder {
            user: User::new(key),
        }
    }
}

pub struct UserBuilder {
    user: User,
}

impl UserBuilder {
    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.user.anonymous = anonymous;
        self
    }

    pub fn secondary(mut self, secondary: impl Into<String>) -> Self {
        self.user.secondary = Some(secondary.into());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.user.ip = Some(ip.into());
        self
    }

    pub fn first_name(mut self, first_name: impl Into<String>) -> Self {
        self.user.first_name = Some(first_name.into());
        self
    }

    pub fn last_name(mut self, last_name: impl Into<String>) -> Self {
        self.user.last_name = Some(last_name.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.user.email = Some(email.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.user.name = Some(name.into());
        self
    }

    pub fn avatar(mut self, avatar: impl Into<String>) -> Self {
        self.user.avatar = Some(avatar.into());
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.user.country = Some(country.into());
        self
    }

    pub fn custom(mut self, custom: Map<String, Value>) -> Self {
        self.user.custom = Some(custom);
        self
    }

    pub fn private_attribute(mut self, name: impl Into<String>) -> Self {
        self.user.private_attribute_names.push(name.into());
        self
    }

    pub fn build(self) -> User {
        self.user
    }
}

/// Global redaction settings taken from the configuration.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RedactionPolicy<'a> {
    pub all_attributes_private: bool,
    pub global_private_names: &'a [String],
}

fn is_private(user: &User, policy: &RedactionPolicy<'_>, attribute: &str) -> bool {
    policy.all_attributes_private
        || policy.global_private_names.iter().any(|n| n == attribute)
        || user.private_attribute_names.iter().any(|n| n == attribute)
}

/// Encode a user for a request or event payload.
///
/// With `redact` set, attributes matching the private-name policy are
/// dropped and their names collected under `privateAttrs`.  The `key` and
/// `anonymous` attributes are never redacted.
pub(crate) fn user_to_json(user: &User, redact: bool, policy: &RedactionPolicy<'_>) -> Value {
    let mut out = Map::new();
    let mut hidden: Vec<Value> = Vec::new();

    out.insert("key".to_owned(), Value::String(user.key.clone()));
    if user.anonymous {
        out.insert("anonymous".to_owned(), Value::Bool(true));
    }

    let strings = [
        ("secondary", &user.secondary),
        ("ip", &user.ip),
        ("firstName", &user.first_name),
        ("lastName", &user.last_name),
        ("email", &user.email),
        ("name", &user.name),
        ("avatar", &user.avatar),
        ("country", &user.country),
    ];
    for (attribute, value) in strings {
        let Some(value) = value else { continue };
        if redact && is_private(user, policy, attribute) {
            hidden.push(Value::String(attribute.to_owned()));
        } else {
            out.insert(attribute.to_owned(), Value::String(value.clone()));
        }
    }

    if let Some(custom) = &user.custom {
        let mut kept = Map::new();
        for (attribute, value) in custom {
            if redact && is_private(user, policy, attribute) {
                hidden.push(Value::String(attribute.clone()));
            } else {
                kept.insert(attribute.clone(), value.clone());
            }
        }
        out.insert("custom".to_owned(), Value::Object(kept));
    }

    if !hidden.is_empty() {
        out.insert("privateAttrs".to_owned(), Value::Array(hidden));
    }

    Value::Object(out)
}
