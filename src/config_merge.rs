//! Env/YAML configuration loading for the CLI driver (ambient; Issue #39's
//! precedence rule, generalized to the spec's deep-merge tree): environment
//! variables win over a YAML file, which wins over built-in defaults.
//!
//! This is the thin, external-collaborator side of config loading (spec §1
//! "out of scope: config file loading") — the core's deep-merge semantics
//! themselves live in [`crate::config`]; this module only produces the
//! `ConfigValue` the CLI hands to [`crate::load_test::LoadTestSpec`].

use std::env;
use std::path::Path;

use serde_json::Value;

use crate::config::{self, ConfigValue};

/// Admin HTTP surface settings (bind address, Basic auth realm/credentials),
/// loaded once at process start (spec §6 "Requires Basic auth with a
/// configured realm").
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub bind_addr: String,
    pub realm: String,
    pub username: String,
    pub password: String,
}

impl AdminConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("ADMIN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8089".to_string()),
            realm: env::var("ADMIN_REALM").unwrap_or_else(|_| "loadtest".to_string()),
            username: env::var("ADMIN_USER").unwrap_or_else(|_| "admin".to_string()),
            password: env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "changeme".to_string()),
        }
    }
}

const ENV_PREFIX: &str = "LOADTEST_CONFIG__";

/// Loads a YAML file at `path` (if given) into a [`ConfigValue`], overlays
/// `LOADTEST_CONFIG__a__b__c=value` environment variables onto the matching
/// dotted path, and falls back to an empty tree when nothing is configured —
/// env > yaml > default.
pub fn load_default_config(path: Option<&Path>) -> Result<ConfigValue, String> {
    let base = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p).map_err(|e| e.to_string())?;
            let value: Value = serde_yaml::from_str(&text).map_err(|e| e.to_string())?;
            ConfigValue::from_value(value)
        }
        None => ConfigValue::empty(),
    };

    Ok(config::deep_merge_chain([base, env_overrides()]))
}

/// Scans the process environment for `LOADTEST_CONFIG__a__b__c` variables
/// and builds the corresponding nested [`ConfigValue`] tree (double
/// underscore = one nesting level).
fn env_overrides() -> ConfigValue {
    let mut root = serde_json::Map::new();
    for (key, value) in env::vars() {
        if let Some(rest) = key.strip_prefix(ENV_PREFIX) {
            let path: Vec<&str> = rest.split("__").collect();
            set_nested(&mut root, &path, parse_scalar(&value));
        }
    }
    ConfigValue::from_value(Value::Object(root))
}

fn set_nested(map: &mut serde_json::Map<String, Value>, path: &[&str], value: Value) {
    match path {
        [] => {}
        [last] => {
            map.insert(last.to_lowercase(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry(head.to_lowercase())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Value::Object(inner) = entry {
                set_nested(inner, rest, value);
            }
        }
    }
}

fn parse_scalar(raw: &str) -> Value {
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}
