//! Child-process environment assembly
//!
//! The environment handed to a spawned service is layered, later layers
//! overwriting earlier ones:
//!
//! 1. the supervisor's own environment
//! 2. the declared env file (or `<path>/.env` when present)
//! 3. the inline env JSON object from the definition
//!
//! Afterwards `PORT` and `ENVIRONMENT` are appended only when still unset.
//!
//! Env-file grammar: blank lines and `#` comments are skipped; assignments
//! split on the first `=`; keys and values are trimmed; one matching pair of
//! surrounding single or double quotes is removed from the value. No escape
//! processing happens inside quotes.

use schema::ServiceDefinition;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Build the full environment for a service's child process
pub fn assemble(def: &ServiceDefinition) -> HashMap<String, String> {
    merge(std::env::vars().collect(), def)
}

/// Layer the definition's environment sources over a base environment
pub(crate) fn merge(
    mut env: HashMap<String, String>,
    def: &ServiceDefinition,
) -> HashMap<String, String> {
    let env_file = if def.env_file.is_empty() {
        Path::new(&def.path).join(".env")
    } else {
        PathBuf::from(&def.env_file)
    };
    for (key, value) in parse_env_file(&env_file) {
        env.insert(key, value);
    }

    for (key, value) in parse_env_json(&def.env_vars) {
        env.insert(key, value);
    }

    if !env.contains_key("PORT") && def.port > 0 {
        env.insert("PORT".to_string(), def.port.to_string());
    }
    if !env.contains_key("ENVIRONMENT") {
        env.insert("ENVIRONMENT".to_string(), def.environment.as_str().to_string());
    }

    env
}

/// Parse an env file; a missing or unreadable file yields an empty map
pub(crate) fn parse_env_file(path: &Path) -> HashMap<String, String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };

    let mut vars = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = strip_quotes(value.trim());
        vars.insert(key.to_string(), value.to_string());
    }
    vars
}

/// Parse the inline env JSON object; invalid JSON yields an empty map.
///
/// Non-string values are stringified: numbers and booleans by display form,
/// null as the empty string.
pub(crate) fn parse_env_json(raw: &str) -> HashMap<String, String> {
    if raw.is_empty() {
        return HashMap::new();
    }
    let Ok(object) = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw)
    else {
        return HashMap::new();
    };

    object
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (key, text)
        })
        .collect()
}

/// Remove one pair of matching surrounding quotes, if present
fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}
