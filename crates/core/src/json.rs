//! JSON helpers shared by enrichment and destinations.

use serde_json::{Map, Value};

/// Deep-merge `source` into `target`.
///
/// - nested objects merge recursively;
/// - scalars and arrays from `source` overwrite;
/// - keys only present in `target` are kept;
/// - `null` in `source` carries no value and never overwrites.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match value {
                    Value::Null => {}
                    Value::Object(_) => {
                        let slot = target
                            .entry(key)
                            .or_insert_with(|| Value::Object(Map::new()));
                        if !slot.is_object() {
                            *slot = Value::Object(Map::new());
                        }
                        deep_merge(slot, value);
                    }
                    other => {
                        target.insert(key, other);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (target, source) => *target = source,
    }
}

/// Options for [`flatten`].
#[derive(Debug, Clone)]
pub struct FlattenOptions {
    pub delimiter: String,
    /// Paths (from the root) whose values are copied as-is instead of being flattened.
    pub stop_paths: Vec<Vec<String>>,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            delimiter: "_".to_string(),
            stop_paths: Vec::new(),
        }
    }
}

impl FlattenOptions {
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn with_stop_path<S: Into<String>>(mut self, path: impl IntoIterator<Item = S>) -> Self {
        self.stop_paths
            .push(path.into_iter().map(Into::into).collect());
        self
    }

    fn is_stop_path(&self, path: &[String]) -> bool {
        self.stop_paths.iter().any(|stop| stop.as_slice() == path)
    }
}

/// Flatten a nested object into a single-level map.
///
/// `{"user": {"name": "john"}}` becomes `{"user_name": "john"}`. Arrays are
/// serialized to a JSON string rather than flattened element-wise.
pub fn flatten(data: &Map<String, Value>, options: &FlattenOptions) -> Map<String, Value> {
    let mut out = Map::new();
    let mut path = Vec::new();
    flatten_into(&mut out, None, data, &mut path, options);
    out
}

fn flatten_into(
    out: &mut Map<String, Value>,
    prefix: Option<&str>,
    data: &Map<String, Value>,
    path: &mut Vec<String>,
    options: &FlattenOptions,
) {
    for (key, value) in data {
        path.push(key.clone());
        let flat_key = match prefix {
            Some(prefix) => format!("{prefix}{}{key}", options.delimiter),
            None => key.clone(),
        };

        if options.is_stop_path(path) {
            out.insert(flat_key, value.clone());
        } else {
            match value {
                Value::Array(_) => {
                    out.insert(flat_key, Value::String(value.to_string()));
                }
                Value::Object(child) => {
                    flatten_into(out, Some(&flat_key), child, path, options);
                }
                other => {
                    out.insert(flat_key, other.clone());
                }
            }
        }

        path.pop();
    }
}

/// Remove `null` members from every object in the tree.
pub fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                strip_nulls(v);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                strip_nulls(v);
            }
        }
        _ => {}
    }
}

/// Strip every trailing occurrence of each suffix, in order.
///
/// `remove_suffix("https://host.com//", &["/"])` yields `https://host.com`.
pub fn remove_suffix<'a>(mut s: &'a str, suffixes: &[&str]) -> &'a str {
    for suffix in suffixes.iter().filter(|suffix| !suffix.is_empty()) {
        while let Some(stripped) = s.strip_suffix(suffix) {
            s = stripped;
        }
    }
    s
}
