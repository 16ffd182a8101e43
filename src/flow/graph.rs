use super::node::{FlowNode, NodeKind, NodeMap};
use crate::core::errors::{FlowError, Result};
use crate::core::id::Id;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Typed edge channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handle {
    Unspecified,
    Then,
    Else,
    Loop,
    AiProvider,
    AiMemory,
    AiTools,
}

impl Handle {
    /// Handles the runner follows when scheduling successors.
    pub fn is_traversal(&self) -> bool {
        matches!(self, Handle::Unspecified | Handle::Then | Handle::Else)
    }

    pub const TRAVERSAL: [Handle; 3] = [Handle::Unspecified, Handle::Then, Handle::Else];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: Id,
    pub source: Id,
    pub target: Id,
    pub handle: Handle,
}

impl Edge {
    pub fn new(source: Id, target: Id, handle: Handle) -> Self {
        Self {
            id: Id::new(),
            source,
            target,
            handle,
        }
    }
}

/// `source -> handle -> targets`, targets kept in authoring order.
#[derive(Debug, Clone, Default)]
pub struct EdgeMap {
    inner: HashMap<Id, HashMap<Handle, Vec<Id>>>,
}

impl EdgeMap {
    pub fn from_edges(edges: &[Edge]) -> Self {
        let mut map = Self::default();
        for edge in edges {
            map.add(edge.source, edge.handle, edge.target);
        }
        map
    }

    pub fn add(&mut self, source: Id, handle: Handle, target: Id) {
        self.inner
            .entry(source)
            .or_default()
            .entry(handle)
            .or_default()
            .push(target);
    }

    pub fn targets(&self, source: Id, handle: Handle) -> &[Id] {
        self.inner
            .get(&source)
            .and_then(|handles| handles.get(&handle))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every `(handle, target)` leaving `source`, ordered by handle.
    pub fn outgoing(&self, source: Id) -> Vec<(Handle, Id)> {
        let mut out: Vec<(Handle, Id)> = Vec::new();
        if let Some(handles) = self.inner.get(&source) {
            let mut keys: Vec<&Handle> = handles.keys().collect();
            keys.sort();
            for handle in keys {
                for target in &handles[handle] {
                    out.push((*handle, *target));
                }
            }
        }
        out
    }

    pub fn traversal_targets(&self, source: Id) -> Vec<Id> {
        Handle::TRAVERSAL
            .iter()
            .flat_map(|handle| self.targets(source, *handle).iter().copied())
            .collect()
    }
}

/// `target -> (source, handle)` for the edges the runner traverses.
#[derive(Debug, Clone, Default)]
pub struct PredecessorMap {
    inner: HashMap<Id, Vec<(Id, Handle)>>,
}

impl PredecessorMap {
    pub fn from_edges(edges: &[Edge]) -> Self {
        let mut inner: HashMap<Id, Vec<(Id, Handle)>> = HashMap::new();
        for edge in edges.iter().filter(|e| e.handle.is_traversal()) {
            inner.entry(edge.target).or_default().push((edge.source, edge.handle));
        }
        Self { inner }
    }

    pub fn predecessors(&self, target: Id) -> &[(Id, Handle)] {
        self.inner.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A materialized flow: nodes, edges and the entry node.
#[derive(Clone)]
pub struct FlowGraph {
    pub id: Id,
    pub start: Id,
    nodes: Vec<Arc<dyn FlowNode>>,
    edges: Vec<Edge>,
}

impl FlowGraph {
    pub fn new(start: Id, nodes: Vec<Arc<dyn FlowNode>>, edges: Vec<Edge>) -> Self {
        Self {
            id: Id::new(),
            start,
            nodes,
            edges,
        }
    }

    pub fn nodes(&self) -> &[Arc<dyn FlowNode>] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_map(&self) -> NodeMap {
        self.nodes.iter().map(|n| (n.id(), n.clone())).collect()
    }

    pub fn edge_map(&self) -> EdgeMap {
        EdgeMap::from_edges(&self.edges)
    }

    pub fn predecessor_map(&self) -> PredecessorMap {
        PredecessorMap::from_edges(&self.edges)
    }

    /// Reject graphs the runner cannot execute.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut ids = HashMap::new();
        for node in &self.nodes {
            if node.name().trim().is_empty() {
                return Err(FlowError::configuration(format!(
                    "node {} has an empty name",
                    node.id()
                )));
            }
            if !names.insert(node.name().to_string()) {
                return Err(FlowError::configuration(format!(
                    "duplicate node name '{}'",
                    node.name()
                )));
            }
            ids.insert(node.id(), node.clone());
        }

        if !ids.contains_key(&self.start) {
            return Err(FlowError::configuration(format!(
                "start node {} is not part of the flow",
                self.start
            )));
        }

        let mut graph: DiGraphMap<Id, Handle> = DiGraphMap::new();
        for id in ids.keys() {
            graph.add_node(*id);
        }
        for edge in &self.edges {
            if !ids.contains_key(&edge.source) || !ids.contains_key(&edge.target) {
                return Err(FlowError::configuration(format!(
                    "edge {} references an unknown node",
                    edge.id
                )));
            }
            if edge.source == edge.target {
                return Err(FlowError::configuration(format!(
                    "edge {} connects '{}' to itself",
                    edge.id,
                    ids[&edge.source].name()
                )));
            }
            if edge.handle.is_traversal() || edge.handle == Handle::Loop {
                graph.add_edge(edge.source, edge.target, edge.handle);
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            let name = ids
                .get(&cycle.node_id())
                .map(|n| n.name().to_string())
                .unwrap_or_default();
            return Err(FlowError::configuration(format!(
                "flow contains a cycle through '{}'",
                name
            )));
        }

        let edge_map = self.edge_map();
        for node in ids.values().filter(|n| n.kind() == NodeKind::Ai) {
            let providers = edge_map.targets(node.id(), Handle::AiProvider);
            if providers.len() != 1 {
                return Err(crate::flow_error!(
                    configuration,
                    node.name(),
                    format!("expected exactly one provider, found {}", providers.len())
                ));
            }
            if ids[&providers[0]].kind() != NodeKind::AiProvider {
                return Err(crate::flow_error!(
                    configuration,
                    node.name(),
                    "ai_provider edge must point at a provider node"
                ));
            }
            let memories = edge_map.targets(node.id(), Handle::AiMemory);
            if memories.len() > 1 {
                return Err(FlowError::node_configuration(
                    node.name(),
                    format!("at most one memory may be connected, found {}", memories.len()),
                ));
            }
            if let Some(memory) = memories.first() {
                if ids[memory].kind() != NodeKind::AiMemory {
                    return Err(FlowError::node_configuration(
                        node.name(),
                        "ai_memory edge must point at a memory node",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Union of every node's required variables.
    pub fn required_variables(&self) -> Vec<String> {
        let all: BTreeSet<String> = self
            .nodes
            .iter()
            .flat_map(|n| n.required_variables())
            .collect();
        all.into_iter().collect()
    }
}
