use super::context::FlowContext;
use super::graph::{EdgeMap, Handle};
use super::status::{FlowNodeStatus, StatusSink};
use crate::any::AsAny;
use crate::core::config::EngineConfig;
use crate::core::errors::FlowError;
use crate::core::id::Id;
use crate::expr::AiDeclaration;
use crate::vars::Env;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Condition,
    Throw,
    ForLoop,
    ForEach,
    Request,
    GraphQl,
    JavaScript,
    Ai,
    AiProvider,
    AiMemory,
    Custom,
}

impl NodeKind {
    /// Passive nodes are read by their AI sibling and never scheduled.
    pub fn is_passive(&self) -> bool {
        matches!(self, NodeKind::AiProvider | NodeKind::AiMemory)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NodeKind::Start => "start",
            NodeKind::Condition => "condition",
            NodeKind::Throw => "throw",
            NodeKind::ForLoop => "for_loop",
            NodeKind::ForEach => "for_each",
            NodeKind::Request => "request",
            NodeKind::GraphQl => "graphql",
            NodeKind::JavaScript => "javascript",
            NodeKind::Ai => "ai",
            NodeKind::AiProvider => "ai_provider",
            NodeKind::AiMemory => "ai_memory",
            NodeKind::Custom => "custom",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationLabel {
    pub node_id: Id,
    pub iteration: usize,
}

/// Where in the loop nesting a node is executing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationContext {
    pub iteration_path: Vec<usize>,
    pub parent_nodes: Vec<Id>,
    pub labels: Vec<IterationLabel>,
}

impl IterationContext {
    /// Extend `parent` with one more loop level.
    pub fn descend(parent: Option<&IterationContext>, loop_node: Id, iteration: usize) -> Self {
        let mut next = parent.cloned().unwrap_or_default();
        next.iteration_path.push(iteration);
        next.parent_nodes.push(loop_node);
        next.labels.push(IterationLabel {
            node_id: loop_node,
            iteration,
        });
        next
    }

    pub fn depth(&self) -> usize {
        self.iteration_path.len()
    }
}

pub type NodeMap = HashMap<Id, Arc<dyn FlowNode>>;

/// Per-invocation context shared by every node of a run.
#[derive(Clone)]
pub struct FlowNodeRequest {
    pub env: Env,
    pub node_map: Arc<NodeMap>,
    pub edge_map: Arc<EdgeMap>,
    pub timeout: Option<Duration>,
    pub status: Arc<dyn StatusSink>,
    pub iteration: Option<IterationContext>,
    pub execution_id: Id,
    pub config: Arc<EngineConfig>,
}

impl FlowNodeRequest {
    pub fn node(&self, id: &Id) -> Option<Arc<dyn FlowNode>> {
        self.node_map.get(id).cloned()
    }

    pub fn node_by_name(&self, name: &str) -> Option<Arc<dyn FlowNode>> {
        self.node_map.values().find(|n| n.name() == name).cloned()
    }

    pub fn targets(&self, source: Id, handle: Handle) -> Vec<Id> {
        self.edge_map.targets(source, handle).to_vec()
    }

    pub fn push_status(&self, status: FlowNodeStatus) {
        self.status.push_node_status(status);
    }

    /// Same run, different env view (typically a fresh tracker).
    pub fn with_env(&self, env: Env) -> Self {
        Self {
            env,
            ..self.clone()
        }
    }

    pub fn with_iteration(&self, iteration: IterationContext) -> Self {
        Self {
            iteration: Some(iteration),
            ..self.clone()
        }
    }
}

/// Outcome of one node execution.
#[derive(Debug, Default)]
pub struct FlowNodeResult {
    pub next_node_ids: Vec<Id>,
    pub error: Option<FlowError>,
    /// Set by nodes that create a secondary record, e.g. a stored response
    pub aux_id: Option<Id>,
}

impl FlowNodeResult {
    pub fn next(next_node_ids: Vec<Id>) -> Self {
        Self {
            next_node_ids,
            ..Default::default()
        }
    }

    pub fn failed(error: FlowError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_aux(mut self, aux_id: Id) -> Self {
        self.aux_id = Some(aux_id);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// The uniform node contract.
#[async_trait]
pub trait FlowNode: AsAny {
    fn id(&self) -> Id;

    fn name(&self) -> &str;

    fn kind(&self) -> NodeKind {
        NodeKind::Custom
    }

    /// Execute once. Outputs are published under `name()` through the
    /// request's env before a successful return.
    async fn run_sync(&self, ctx: &FlowContext, req: &FlowNodeRequest) -> FlowNodeResult;

    /// Execute on the caller's task and deliver the result to `sink`.
    async fn run_async(
        &self,
        ctx: &FlowContext,
        req: &FlowNodeRequest,
        sink: mpsc::Sender<FlowNodeResult>,
    ) {
        let result = self.run_sync(ctx, req).await;
        let _ = sink.send(result).await;
    }

    /// Variables referenced by the node's configuration.
    fn required_variables(&self) -> Vec<String> {
        Vec::new()
    }

    /// Fixed output paths, relative to the node's name.
    fn output_variables(&self) -> Vec<String> {
        Vec::new()
    }

    /// Tool arguments declared with `ai(...)` in the configuration.
    fn ai_declarations(&self) -> Vec<AiDeclaration> {
        Vec::new()
    }
}

/// Successors on the default traversal handles.
pub fn default_successors(req: &FlowNodeRequest, id: Id) -> Vec<Id> {
    let mut next = req.targets(id, Handle::Unspecified);
    next.extend(req.targets(id, Handle::Then));
    next
}
