//! Dotted and indexed access into nested JSON values.
//!
//! Accepted syntax: `a.b.c`, `a[0]`, `a[0].b`, `a["key.with.dots"]`. A
//! top-level key equal to the whole path is returned before any descent is
//! attempted, so legacy flat keys such as `"user.name"` keep working.

use crate::core::errors::{FlowError, Result};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) if is_plain_key(key) => write!(f, "{}", key),
            Segment::Key(key) => write!(f, "[{:?}]", key),
            Segment::Index(index) => write!(f, "[{}]", index),
        }
    }
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ' ')
}

/// Render segments back into the canonical dotted form.
pub fn render_path(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        match segment {
            Segment::Key(key) if is_plain_key(key) => {
                if i > 0 {
                    out.push('.');
                }
                out.push_str(key);
            }
            other => out.push_str(&other.to_string()),
        }
    }
    out
}

pub fn parse_path(path: &str) -> Result<Vec<Segment>> {
    let invalid = |message: &str| {
        FlowError::configuration(format!("invalid path '{}': {}", path, message))
    };

    let chars: Vec<char> = path.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '.' => {
                if current.trim().is_empty() {
                    // `a[0].b` leaves nothing pending before the dot
                    if !matches!(chars.get(i.wrapping_sub(1)), Some(&']')) {
                        return Err(invalid("empty segment"));
                    }
                } else {
                    segments.push(Segment::Key(current.trim().to_string()));
                }
                current.clear();
                i += 1;
            }
            '[' => {
                if !current.trim().is_empty() {
                    segments.push(Segment::Key(current.trim().to_string()));
                    current.clear();
                }
                i += 1;
                let quote = match chars.get(i) {
                    Some(&q) if q == '"' || q == '\'' => Some(q),
                    _ => None,
                };
                if let Some(q) = quote {
                    i += 1;
                    let mut key = String::new();
                    loop {
                        match chars.get(i) {
                            Some(&c) if c == q => break,
                            Some(&'\\') => {
                                if let Some(&escaped) = chars.get(i + 1) {
                                    key.push(escaped);
                                    i += 2;
                                } else {
                                    return Err(invalid("unterminated escape"));
                                }
                            }
                            Some(&c) => {
                                key.push(c);
                                i += 1;
                            }
                            None => return Err(invalid("unterminated string key")),
                        }
                    }
                    i += 1;
                    if chars.get(i) != Some(&']') {
                        return Err(invalid("expected ']' after string key"));
                    }
                    segments.push(Segment::Key(key));
                } else {
                    let start = i;
                    while i < chars.len() && chars[i] != ']' {
                        i += 1;
                    }
                    if i >= chars.len() {
                        return Err(invalid("unterminated index"));
                    }
                    let raw: String = chars[start..i].iter().collect();
                    let index = raw
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| invalid("index must be a non-negative integer"))?;
                    segments.push(Segment::Index(index));
                }
                // skip ']'
                i += 1;
            }
            c => {
                current.push(c);
                i += 1;
            }
        }
    }

    if !current.trim().is_empty() {
        segments.push(Segment::Key(current.trim().to_string()));
    } else if chars.last() == Some(&'.') {
        return Err(invalid("trailing dot"));
    }

    if segments.is_empty() {
        return Err(invalid("empty path"));
    }
    Ok(segments)
}

/// Resolve a path against a root map. Missing keys and type mismatches both
/// yield `None`.
pub fn resolve<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(value) = root.get(path) {
        return Some(value);
    }
    let segments = parse_path(path).ok()?;
    resolve_segments(root, &segments)
}

pub fn resolve_segments<'a>(root: &'a Map<String, Value>, segments: &[Segment]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let mut current = match first {
        Segment::Key(key) => root.get(key)?,
        Segment::Index(_) => return None,
    };
    for segment in rest {
        current = descend(current, segment)?;
    }
    Some(current)
}

pub fn descend<'a>(value: &'a Value, segment: &Segment) -> Option<&'a Value> {
    match (value, segment) {
        (Value::Object(map), Segment::Key(key)) => map.get(key),
        (Value::Array(items), Segment::Index(index)) => items.get(*index),
        _ => None,
    }
}

/// Write `value` at `path`, creating intermediate maps. Arrays are only
/// descended into, never created or grown.
pub fn assign(root: &mut Map<String, Value>, path: &str, value: Value) -> Result<()> {
    if root.contains_key(path) {
        root.insert(path.to_string(), value);
        return Ok(());
    }
    let segments = parse_path(path)?;
    assign_segments(root, &segments, value).map_err(|message| {
        FlowError::configuration(format!("cannot set '{}': {}", path, message))
    })
}

fn assign_segments(
    root: &mut Map<String, Value>,
    segments: &[Segment],
    value: Value,
) -> std::result::Result<(), String> {
    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => return Err("empty path".to_string()),
    };
    let key = match first {
        Segment::Key(key) => key.clone(),
        Segment::Index(_) => return Err("path must start with a key".to_string()),
    };

    if rest.is_empty() {
        root.insert(key, value);
        return Ok(());
    }
    if !root.contains_key(&key) && matches!(rest.first(), Some(Segment::Index(_))) {
        return Err(format!("'{}' does not exist and arrays are not created", key));
    }

    let slot = root.entry(key).or_insert_with(|| Value::Object(Map::new()));
    assign_into(slot, rest, value)
}

fn assign_into(
    slot: &mut Value,
    segments: &[Segment],
    value: Value,
) -> std::result::Result<(), String> {
    let (segment, rest) = match segments.split_first() {
        Some(split) => split,
        None => {
            *slot = value;
            return Ok(());
        }
    };

    match segment {
        Segment::Key(key) => {
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let map = match slot.as_object_mut() {
                Some(map) => map,
                None => return Err("intermediate is not a map".to_string()),
            };
            if rest.is_empty() {
                map.insert(key.clone(), value);
                Ok(())
            } else if !map.contains_key(key) && matches!(rest.first(), Some(Segment::Index(_))) {
                Err(format!("'{}' does not exist and arrays are not created", key))
            } else {
                let child = map
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                assign_into(child, rest, value)
            }
        }
        Segment::Index(index) => {
            let items = match slot.as_array_mut() {
                Some(items) => items,
                None => return Err(format!("index [{}] applied to a non-array", index)),
            };
            let len = items.len();
            let child = items
                .get_mut(*index)
                .ok_or_else(|| format!("index [{}] out of bounds (len {})", index, len))?;
            assign_into(child, rest, value)
        }
    }
}
