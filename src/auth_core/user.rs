//! The authenticated principal returned by every provider.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{AuthError, AuthResult};

/// JSON key holding the principal name.
pub const KEY_NAME: &str = "name";
/// JSON key holding the role set.
pub const KEY_ROLES: &str = "roles";
/// JSON key holding the attribute bag.
pub const KEY_ATTRIBUTES: &str = "attributes";
/// Attribute reserved for provider specific claims and credentials.
pub const KEY_AUTH: &str = "auth";

/// An authenticated user: a name, a set of roles and a JSON attribute bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    name: String,
    #[serde(default)]
    roles: BTreeSet<String>,
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), roles: BTreeSet::new(), attributes: Map::new() }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Builds a user from its JSON form. The name is read from `name`,
    /// falling back to `username`.
    pub fn from_json(json: &Value) -> AuthResult<Self> {
        let name = [KEY_NAME, "username"]
            .iter()
            .filter_map(|key| json.get(*key).and_then(Value::as_str))
            .find(|name| !name.trim().is_empty())
            .ok_or_else(|| AuthError::authentication("User's name is null."))?;

        let roles = json
            .get(KEY_ROLES)
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .map(|role| match role {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let attributes = json
            .get(KEY_ATTRIBUTES)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Ok(Self { name: name.to_string(), roles, attributes })
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "roles": self.roles,
            "attributes": self.attributes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Whether `key` exists anywhere in the attribute tree.
    pub fn has_attribute(&self, key: &str) -> bool {
        find_value_by_key(&self.attributes, key).is_some()
    }

    /// First value found for `key` in the attribute tree, rendered as a string.
    pub fn get_attribute(&self, key: &str) -> Option<String> {
        find_value_by_key(&self.attributes, key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn email(&self) -> Option<String> {
        self.get_attribute("email")
    }

    /// The provider specific `auth` object, if any.
    pub fn auth(&self) -> Option<&Map<String, Value>> {
        self.attributes.get(KEY_AUTH).and_then(Value::as_object)
    }

    /// Whether the `auth.expires_at` timestamp (epoch seconds) lies in the past.
    pub fn expired(&self) -> bool {
        self.auth()
            .and_then(|auth| auth.get("expires_at"))
            .and_then(Value::as_i64)
            .map(|expires_at| expires_at < Utc::now().timestamp())
            .unwrap_or(false)
    }

    /// Combines two users: roles are unioned, attributes are shallow-merged and
    /// `other` wins on every conflict, including the name.
    pub fn merge(&self, other: &User) -> User {
        let mut roles = self.roles.clone();
        roles.extend(other.roles.iter().cloned());

        let mut attributes = self.attributes.clone();
        for (key, value) in &other.attributes {
            attributes.insert(key.clone(), value.clone());
        }

        User { name: other.name.clone(), roles, attributes }
    }
}

/// Depth-first search for `key` through nested objects and arrays of objects.
pub fn find_value_by_key<'a>(json: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(value) = json.get(key) {
        return Some(value);
    }
    json.values().find_map(|value| match value {
        Value::Object(inner) => find_value_by_key(inner, key),
        Value::Array(items) => items.iter().find_map(|item| match item {
            Value::Object(inner) => find_value_by_key(inner, key),
            _ => None,
        }),
        _ => None,
    })
}
