//! Helpers for shaping raw backend output before it is wrapped.
//!
//! These work on plain `serde_json::Value`s: backends use them to combine
//! sections of a file or to expand flat delimited keys into nested maps.

use serde_json::{Map, Value};

/// Deep merge two JSON values, with `overlay` taking precedence over `base`.
///
/// - Objects are merged recursively: keys in overlay override keys in base
/// - Everything else, including null, is replaced entirely
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    deep_merge_with(base, overlay, &|_, overlay| overlay)
}

/// Deep merge where `resolve` decides every non-object conflict.
///
/// `resolve` receives `(existing, incoming)` for each key present on both
/// sides that is not an object on both sides.
pub fn deep_merge_with<F>(base: Value, overlay: Value, resolve: &F) -> Value
where
    F: Fn(Value, Value) -> Value,
{
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            Value::Object(merge_maps(base_map, overlay_map, resolve))
        }
        (base, overlay) => resolve(base, overlay),
    }
}

fn merge_maps<F>(mut base: Map<String, Value>, overlay: Map<String, Value>, resolve: &F) -> Map<String, Value>
where
    F: Fn(Value, Value) -> Value,
{
    for (key, overlay_value) in overlay {
        let merged_value = match base.remove(&key) {
            Some(base_value) => deep_merge_with(base_value, overlay_value, resolve),
            None => overlay_value,
        };
        base.insert(key, merged_value);
    }
    base
}

/// Expand delimited keys into nested maps: `{"a.b": 1}` becomes `{"a": {"b": 1}}`.
///
/// When a scalar and a nested map land on the same key, the scalar moves under
/// the blank key `""` inside the map so both survive. Two plain scalars on the
/// same key: the later one wins.
pub fn nest_keys(flat: Map<String, Value>, delimiter: &str) -> Map<String, Value> {
    let mut nested = Map::new();
    for (key, value) in flat {
        let expanded = if delimiter.is_empty() {
            single(key, value)
        } else {
            let mut steps = key.rsplit(delimiter).map(str::to_string);
            let leaf = steps.next().unwrap_or_default();
            steps.fold(single(leaf, value), |inner, step| {
                single(step, Value::Object(inner))
            })
        };
        nested = merge_maps(nested, expanded, &keep_scalar_beside_map);
    }
    nested
}

fn single(key: String, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key, value);
    map
}

fn is_plain_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_) | Value::Null)
}

fn keep_scalar_beside_map(existing: Value, incoming: Value) -> Value {
    match (existing, incoming) {
        (Value::Object(mut map), scalar) if is_plain_scalar(&scalar) => {
            map.insert(String::new(), scalar);
            Value::Object(map)
        }
        (scalar, Value::Object(mut map)) if is_plain_scalar(&scalar) => {
            map.insert(String::new(), scalar);
            Value::Object(map)
        }
        (_, incoming) => incoming,
    }
}
