//! SD-004: Layered task options.
//!
//! A task's effective options are the shallow merge, lowest to highest
//! precedence, of `options["*"]`, `options[recipe]` and `options[task-id]`.

use super::types::{yaml_value_to_string, Options, WILDCARD_OPTIONS};
use indexmap::IndexMap;

/// Merge the option layers that apply to `task_id`, an invocation of `recipe`.
pub fn merge_options(layers: &IndexMap<String, Options>, recipe: &str, task_id: &str) -> Options {
    let mut merged = Options::new();
    for key in [WILDCARD_OPTIONS, recipe, task_id] {
        if let Some(layer) = layers.get(key) {
            for (k, v) in layer {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    merged
}

/// String form of a scalar option, `None` when absent or null.
pub fn option_str(options: &Options, key: &str) -> Option<String> {
    match options.get(key) {
        None | Some(serde_yaml_ng::Value::Null) => None,
        Some(v) => Some(yaml_value_to_string(v)),
    }
}
