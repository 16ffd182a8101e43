use super::tree::build_tree;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Records every variable read and write of one execution unit.
///
/// Snapshots are owned clones, so later mutations of the environment never
/// show up in what was recorded.
#[derive(Debug, Default)]
pub struct VariableTracker {
    read_vars: RwLock<BTreeMap<String, Value>>,
    written_vars: RwLock<BTreeMap<String, Value>>,
}

impl VariableTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_read(&self, path: &str, value: &Value) {
        self.read_vars.write().insert(path.to_string(), value.clone());
    }

    pub fn track_write(&self, path: &str, value: &Value) {
        self.written_vars
            .write()
            .insert(path.to_string(), value.clone());
    }

    pub fn read_vars(&self) -> BTreeMap<String, Value> {
        self.read_vars.read().clone()
    }

    pub fn written_vars(&self) -> BTreeMap<String, Value> {
        self.written_vars.read().clone()
    }

    pub fn read_vars_as_tree(&self) -> Map<String, Value> {
        build_tree(&self.read_vars.read())
    }

    pub fn written_vars_as_tree(&self) -> Map<String, Value> {
        build_tree(&self.written_vars.read())
    }

    pub fn has_reads(&self) -> bool {
        !self.read_vars.read().is_empty()
    }

    pub fn clear(&self) {
        self.read_vars.write().clear();
        self.written_vars.write().clear();
    }
}
