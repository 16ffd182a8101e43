//! Reconstitution of flat, dot-keyed snapshots into nested maps.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Build a nested map from `path -> value` pairs.
///
/// Paths are split on `.` and each segment is trimmed. When two paths
/// disagree on whether an intermediate is a scalar or a map, the map wins.
/// Keys are applied in sorted order so the result does not depend on the
/// order paths were recorded in.
pub fn build_tree(flat: &BTreeMap<String, Value>) -> Map<String, Value> {
    let mut root = Map::new();
    for (path, value) in flat {
        let segments: Vec<&str> = path
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            continue;
        }
        insert_path(&mut root, &segments, value.clone());
    }
    root
}

fn insert_path(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => return,
    };

    if rest.is_empty() {
        match map.get_mut(*head) {
            Some(Value::Object(existing)) => {
                if let Value::Object(incoming) = value {
                    merge_into(existing, incoming);
                }
                // a scalar never replaces a map
            }
            _ => {
                map.insert(head.to_string(), value);
            }
        }
        return;
    }

    let slot = map
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(child) = slot {
        insert_path(child, rest, value);
    }
}

fn merge_into(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_into(existing, nested),
            (Some(Value::Object(_)), _) => {}
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Recursive merge where `first` wins every conflict.
pub fn merge_trees_prefer_first(first: &Map<String, Value>, second: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = first.clone();
    for (key, value) in second {
        match (merged.get_mut(key), value) {
            (Some(Value::Object(a)), Value::Object(b)) => {
                let combined = merge_trees_prefer_first(a, b);
                *a = combined;
            }
            (Some(_), _) => {}
            (None, value) => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}
