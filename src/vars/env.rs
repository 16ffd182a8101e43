use super::path;
use super::secrets::SecretResolver;
use super::tracker::VariableTracker;
use crate::core::errors::{FlowError, Result};
use crate::expr::{self, Mode};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// User function callable from expressions.
pub type CustomFunction = Arc<dyn Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync>;

/// The per-flow variable substrate.
///
/// Cloning an `Env` is cheap and every clone shares the same data. Each clone
/// carries its own optional tracker, which is how the runner attributes
/// reads and writes to a single node execution.
#[derive(Clone)]
pub struct Env {
    data: Arc<RwLock<Map<String, Value>>>,
    tracker: Option<Arc<VariableTracker>>,
    functions: Arc<HashMap<String, CustomFunction>>,
    secrets: Option<Arc<dyn SecretResolver>>,
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("keys", &self.keys())
            .field("tracked", &self.tracker.is_some())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl Env {
    pub fn new() -> Self {
        Self::from_map(Map::new())
    }

    pub fn from_map(data: Map<String, Value>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            tracker: None,
            functions: Arc::new(HashMap::new()),
            secrets: None,
        }
    }

    /// Build from a JSON object; any other value yields an empty env.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from_map(map),
            _ => Self::new(),
        }
    }

    pub fn with_function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.functions).insert(name.into(), Arc::new(function));
        self
    }

    pub fn with_secret_resolver(mut self, resolver: Arc<dyn SecretResolver>) -> Self {
        self.secrets = Some(resolver);
        self
    }

    /// A view over the same data that records into `tracker`.
    pub fn with_tracker(&self, tracker: Arc<VariableTracker>) -> Self {
        Self {
            tracker: Some(tracker),
            ..self.clone()
        }
    }

    pub fn without_tracker(&self) -> Self {
        Self {
            tracker: None,
            ..self.clone()
        }
    }

    pub fn tracker(&self) -> Option<&Arc<VariableTracker>> {
        self.tracker.as_ref()
    }

    pub fn function(&self, name: &str) -> Option<CustomFunction> {
        self.functions.get(name).cloned()
    }

    pub fn secret_resolver(&self) -> Option<&Arc<dyn SecretResolver>> {
        self.secrets.as_ref()
    }

    /// Tracked lookup. Fails with the list of top-level keys when missing.
    pub fn get(&self, path: &str) -> Result<Value> {
        match self.lookup(path) {
            Some(value) => Ok(value),
            None => Err(FlowError::path_not_found(path, self.keys())),
        }
    }

    /// Tracked lookup that reports absence as `None`.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let value = self.get_untracked(path)?;
        self.track_read(path, &value);
        Some(value)
    }

    pub fn get_untracked(&self, path: &str) -> Option<Value> {
        let data = self.data.read();
        path::resolve(&data, path).cloned()
    }

    pub fn has(&self, path: &str) -> bool {
        let data = self.data.read();
        path::resolve(&data, path).is_some()
    }

    /// Write `value` at `path`, creating intermediate maps, and record the
    /// write when a tracker is attached.
    pub fn set(&self, path: &str, value: Value) -> Result<()> {
        if let Some(tracker) = &self.tracker {
            let mut data = self.data.write();
            path::assign(&mut data, path, value.clone())?;
            tracker.track_write(path, &value);
            return Ok(());
        }
        let mut data = self.data.write();
        path::assign(&mut data, path, value)
    }

    /// Write without recording, used for loop bookkeeping.
    pub fn set_untracked(&self, path: &str, value: Value) -> Result<()> {
        let mut data = self.data.write();
        path::assign(&mut data, path, value)
    }

    pub fn track_read(&self, path: &str, value: &Value) {
        if let Some(tracker) = &self.tracker {
            tracker.track_read(path, value);
        }
    }

    /// Deep copy of the whole variable map.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.data.read().clone()
    }

    /// Untracked copy of the data with `extra` layered on top. Functions and
    /// the secret resolver carry over.
    pub fn overlay(&self, extra: Map<String, Value>) -> Env {
        let mut data = self.snapshot();
        data.extend(extra);
        Self {
            data: Arc::new(RwLock::new(data)),
            tracker: None,
            functions: self.functions.clone(),
            secrets: self.secrets.clone(),
        }
    }

    /// Sorted top-level keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn eval(&self, source: &str) -> Result<Value> {
        expr::evaluate(self, source, Mode::Any)
    }

    pub fn eval_bool(&self, source: &str) -> Result<bool> {
        match expr::evaluate(self, source, Mode::Bool)? {
            Value::Bool(b) => Ok(b),
            other => Err(FlowError::expression(
                source,
                format!("expected boolean, got {}", expr::type_name(&other)),
            )),
        }
    }

    /// Evaluate to an ordered list of `(key, value)` pairs. Arrays yield
    /// their indices as keys.
    pub fn eval_iterable(&self, source: &str) -> Result<Vec<(Value, Value)>> {
        match expr::evaluate(self, source, Mode::Iterable)? {
            Value::Array(items) => Ok(items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::from(i as u64), v))
                .collect()),
            Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (Value::String(k), v)).collect()),
            other => Err(FlowError::expression(
                source,
                format!("expected array or map, got {}", expr::type_name(&other)),
            )),
        }
    }

    pub async fn interpolate(&self, raw: &str) -> Result<String> {
        expr::interpolate::interpolate(self, raw).await
    }

    pub async fn interpolate_value(&self, raw: &str) -> Result<Value> {
        expr::interpolate::interpolate_value(self, raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_then_get() {
        let env = Env::new();
        env.set("a.b", json!({"c": [1, 2]})).unwrap();
        assert_eq!(env.get("a.b").unwrap(), json!({"c": [1, 2]}));
        assert_eq!(env.get("a.b.c[1]").unwrap(), json!(2));
        assert!(env.has("a"));
        assert!(!env.has("z"));
    }

    #[test]
    fn test_missing_path_lists_keys() {
        let env = Env::from_value(json!({"beta": 1, "alpha": 2}));
        let err = env.get("gamma").unwrap_err();
        assert_eq!(
            err.to_string(),
            "variable 'gamma' not found (available: alpha, beta)"
        );
    }

    #[test]
    fn test_tracked_views_share_data() {
        let env = Env::new();
        let tracker = Arc::new(VariableTracker::new());
        let tracked = env.with_tracker(tracker.clone());

        tracked.set("node.out", json!("v")).unwrap();
        assert_eq!(env.get_untracked("node.out"), Some(json!("v")));
        assert_eq!(tracked.get("node.out").unwrap(), json!("v"));
        assert_eq!(tracker.written_vars()["node.out"], json!("v"));
        assert_eq!(tracker.read_vars()["node.out"], json!("v"));

        // untracked reads leave no trace
        env.get("node").unwrap();
        assert_eq!(tracker.read_vars().len(), 1);
    }

    #[test]
    fn test_tracker_snapshot_survives_mutation() {
        let tracker = Arc::new(VariableTracker::new());
        let env = Env::new().with_tracker(tracker.clone());
        env.set("list", json!([1])).unwrap();
        env.get("list").unwrap();
        env.set_untracked("list", json!([1, 2, 3])).unwrap();
        assert_eq!(tracker.read_vars()["list"], json!([1]));
    }

    #[test]
    fn test_custom_function_registration() {
        let env = Env::new().with_function("double", |args: &[Value]| {
            args.first()
                .and_then(Value::as_i64)
                .map(|n| json!(n * 2))
                .ok_or_else(|| "expected an integer".to_string())
        });
        assert!(env.function("double").is_some());
        assert_eq!(env.eval("double(21)").unwrap(), json!(42));
    }
}
