//! Variable maps attached to inventories, groups and hosts.
//!
//! Records store their variables as raw JSON text (possibly empty) and
//! parse on demand; the stored form stays opaque to the storage layer.

use serde_json::{Map, Value};
use tracing::warn;

/// Arbitrary key/value variables, parsed from a record's JSON text.
pub type VarMap = Map<String, Value>;

/// Parses a record's variables text into a map.
///
/// Blank text is an empty map. Text that fails to parse, or parses to
/// something other than an object, is treated as empty rather than
/// failing the caller; the bad text stays on the record for the operator
/// to fix.
pub fn parse_vars(text: &str) -> VarMap {
    if text.trim().is_empty() {
        return VarMap::new();
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!("variables text is valid JSON but not an object; ignoring");
            VarMap::new()
        }
        Err(err) => {
            warn!(%err, "could not parse variables text; ignoring");
            VarMap::new()
        }
    }
}

/// Serializes a variable map back into the stored text form.
///
/// An empty map becomes the empty string, matching the default for
/// records that never had variables set.
pub fn vars_to_text(vars: &VarMap) -> String {
    if vars.is_empty() {
        String::new()
    } else {
        Value::Object(vars.clone()).to_string()
    }
}

/// Returns the connection name a caller should use to reach a host.
///
/// `ansible_host` wins over `ansible_ssh_host`, which wins over the
/// record's own name.
pub fn effective_host_name(name: &str, vars: &VarMap) -> String {
    for key in ["ansible_host", "ansible_ssh_host"] {
        if let Some(Value::String(value)) = vars.get(key) {
            return value.clone();
        }
    }
    name.to_string()
}
