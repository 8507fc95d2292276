//! Nested configuration lookup and deep-merge (spec §4.1, §8 scenario 1).
//!
//! Config and `assigned` are both represented as [`ConfigValue`], a thin
//! wrapper over a JSON tree. Lookups accept a single key, a list of keys, or
//! a dotted string; a missing key with no default raises
//! [`ConfigError::RequiredConfigMissing`] carrying the key path and the
//! session id that asked for it, matching the old config layer's
//! exception-based required-config contract.

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while reading or merging configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("required config key {key:?} missing for session {session_id}")]
    RequiredConfigMissing { key: Vec<String>, session_id: String },
}

/// A path into a nested config tree: a single key, a dotted string, or an
/// explicit list of keys.
#[derive(Debug, Clone)]
pub struct ConfigKey(Vec<String>);

impl From<&str> for ConfigKey {
    fn from(s: &str) -> Self {
        ConfigKey(s.split('.').map(str::to_string).collect())
    }
}

impl From<String> for ConfigKey {
    fn from(s: String) -> Self {
        ConfigKey::from(s.as_str())
    }
}

impl From<&[&str]> for ConfigKey {
    fn from(parts: &[&str]) -> Self {
        ConfigKey(parts.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ConfigKey {
    fn from(parts: [&str; N]) -> Self {
        ConfigKey(parts.iter().map(|s| s.to_string()).collect())
    }
}

impl ConfigKey {
    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

/// Nested mapping from string keys to values; the Session's `config` and
/// `assigned` fields both use this type.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct ConfigValue(pub Value);

impl ConfigValue {
    pub fn empty() -> Self {
        ConfigValue(Value::Object(Map::new()))
    }

    pub fn from_value(v: Value) -> Self {
        ConfigValue(v)
    }

    pub fn inner(&self) -> &Value {
        &self.0
    }

    /// Look up a nested key. Returns `None` if any segment along the path
    /// is missing or not an object.
    pub fn get(&self, key: impl Into<ConfigKey>) -> Option<&Value> {
        let key = key.into();
        let mut cur = &self.0;
        for part in key.parts() {
            cur = cur.as_object()?.get(part)?;
        }
        Some(cur)
    }

    /// Look up a key, falling back to `default` when missing.
    pub fn get_or<'a>(&'a self, key: impl Into<ConfigKey>, default: &'a Value) -> &'a Value {
        self.get(key).unwrap_or(default)
    }

    /// Look up a required key, raising `RequiredConfigMissing` when absent.
    pub fn require(
        &self,
        key: impl Into<ConfigKey>,
        session_id: &str,
    ) -> Result<&Value, ConfigError> {
        let key = key.into();
        self.get(ConfigKey(key.0.clone()))
            .ok_or_else(|| ConfigError::RequiredConfigMissing {
                key: key.0,
                session_id: session_id.to_string(),
            })
    }

    /// Set a nested key, creating intermediate objects as needed. Returns a
    /// new `ConfigValue` (the Session pipeline is immutable between
    /// actions).
    pub fn set(&self, key: impl Into<ConfigKey>, value: Value) -> Self {
        let mut root = self.0.clone();
        let key = key.into();
        set_path(&mut root, key.parts(), value);
        ConfigValue(root)
    }

    /// Merge `patch` into this value; scalar/array leaves in `patch`
    /// overwrite, nested objects merge recursively and later keys win on
    /// conflict at any depth.
    pub fn merged_with(&self, patch: &ConfigValue) -> Self {
        ConfigValue(deep_merge(self.0.clone(), patch.0.clone()))
    }

    /// Delete a key from the tree (used for `delete_assign`). No-op if the
    /// key does not exist.
    pub fn delete(&self, key: impl Into<ConfigKey>) -> Self {
        let mut root = self.0.clone();
        let key = key.into();
        delete_path(&mut root, key.parts());
        ConfigValue(root)
    }
}

fn set_path(node: &mut Value, path: &[String], value: Value) {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let obj = node.as_object_mut().expect("just ensured object");
    if path.len() == 1 {
        obj.insert(path[0].clone(), value);
        return;
    }
    let child = obj
        .entry(path[0].clone())
        .or_insert_with(|| Value::Object(Map::new()));
    set_path(child, &path[1..], value);
}

fn delete_path(node: &mut Value, path: &[String]) {
    let Some(obj) = node.as_object_mut() else {
        return;
    };
    if path.len() == 1 {
        obj.remove(&path[0]);
        return;
    }
    if let Some(child) = obj.get_mut(&path[0]) {
        delete_path(child, &path[1..]);
    }
}

/// Deep-merge two JSON values: objects merge key-by-key recursively,
/// anything else from `patch` overwrites `base` outright.
pub fn deep_merge(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                let merged = match base_map.remove(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            Value::Object(base_map)
        }
        (_, patch) => patch,
    }
}

/// Deep-merge an arbitrary chain of config layers, left to right, later wins
/// on conflict — associative for non-conflicting keys.
pub fn deep_merge_chain(layers: impl IntoIterator<Item = ConfigValue>) -> ConfigValue {
    layers
        .into_iter()
        .fold(ConfigValue::empty(), |acc, layer| acc.merged_with(&layer))
}
