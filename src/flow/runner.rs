use super::context::{CancelReason, FlowContext};
use super::graph::{EdgeMap, FlowGraph};
use super::node::{FlowNode, FlowNodeRequest, FlowNodeResult};
use super::status::{FlowNodeStatus, FlowStatus, NodeState, StatusSink};
use crate::core::config::EngineConfig;
use crate::core::errors::{FlowError, Result};
use crate::core::id::Id;
use crate::vars::{Env, VariableTracker};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Outcome of a whole flow invocation.
#[derive(Debug, Clone)]
pub struct FlowRunReport {
    pub status: FlowStatus,
    pub error: Option<FlowError>,
    pub duration: Duration,
}

impl FlowRunReport {
    pub fn is_success(&self) -> bool {
        self.status == FlowStatus::Success
    }
}

/// Executes a validated [`FlowGraph`] against an [`Env`].
pub struct FlowRunner {
    graph: FlowGraph,
    config: Arc<EngineConfig>,
    status: Arc<dyn StatusSink>,
}

impl FlowRunner {
    pub fn new(graph: FlowGraph, config: EngineConfig, status: Arc<dyn StatusSink>) -> Result<Self> {
        config.validate()?;
        graph.validate()?;
        Ok(Self {
            graph,
            config: Arc::new(config),
            status,
        })
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_parallel(&self) -> bool {
        self.config.flow_timeout().is_some()
    }

    pub async fn run(&self, env: Env) -> FlowRunReport {
        self.run_with_context(&FlowContext::new(), env).await
    }

    /// Run under an externally owned context so callers can cancel the flow.
    pub async fn run_with_context(&self, parent: &FlowContext, env: Env) -> FlowRunReport {
        let started = Instant::now();
        let timeout = self.config.flow_timeout();
        let mode = if timeout.is_some() { "parallel" } else { "sequential" };
        let span = info_span!("flow_run", flow_id = %self.graph.id, mode);

        async move {
            self.status.push_flow_status(FlowStatus::Starting);
            let ctx = match timeout {
                Some(timeout) => parent.child_with_timeout(timeout),
                None => parent.child(),
            };
            let req = FlowNodeRequest {
                env,
                node_map: Arc::new(self.graph.node_map()),
                edge_map: Arc::new(self.graph.edge_map()),
                timeout,
                status: self.status.clone(),
                iteration: None,
                execution_id: Id::new(),
                config: self.config.clone(),
            };

            info!(nodes = self.graph.nodes().len(), "flow started");
            self.status.push_flow_status(FlowStatus::Running);
            let outcome = run_subgraph(&ctx, &req, vec![self.graph.start]).await;

            let (status, error) = match outcome {
                Ok(()) if ctx.reason() == Some(CancelReason::DeadlineExceeded) => {
                    (FlowStatus::Timeout, Some(ctx.error("flow")))
                }
                Ok(()) => (FlowStatus::Success, None),
                Err(err) => (flow_status_for(&ctx, &err), Some(err)),
            };
            let duration = started.elapsed();
            match &error {
                None => info!(?duration, "flow finished"),
                Some(err) => warn!(?status, error = %err, "flow ended"),
            }
            self.status.push_flow_status(status);
            FlowRunReport {
                status,
                error,
                duration,
            }
        }
        .instrument(span)
        .await
    }
}

fn flow_status_for(ctx: &FlowContext, err: &FlowError) -> FlowStatus {
    if err.is_thrown() {
        return FlowStatus::Canceled;
    }
    if err.is_timeout() {
        return FlowStatus::Timeout;
    }
    match ctx.reason() {
        Some(CancelReason::DeadlineExceeded) => FlowStatus::Timeout,
        Some(CancelReason::Canceled) | Some(CancelReason::Thrown) => FlowStatus::Canceled,
        _ if err.is_cancellation() => FlowStatus::Canceled,
        _ => FlowStatus::Failed,
    }
}

/// Pending-predecessor bookkeeping for one walk.
struct ReadySet {
    pending: HashMap<Id, usize>,
    live: HashSet<Id>,
    scheduled: HashSet<Id>,
    skipped: HashSet<Id>,
}

impl ReadySet {
    /// Seed counters from the traversal edges reachable from `start`.
    fn new(edge_map: &EdgeMap, start: &[Id]) -> Self {
        let mut reachable: HashSet<Id> = HashSet::new();
        let mut queue: VecDeque<Id> = start.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if reachable.insert(id) {
                queue.extend(edge_map.traversal_targets(id));
            }
        }

        let mut pending: HashMap<Id, usize> = reachable.iter().map(|id| (*id, 0)).collect();
        for source in &reachable {
            for target in edge_map.traversal_targets(*source) {
                if let Some(count) = pending.get_mut(&target) {
                    *count += 1;
                }
            }
        }

        let mut set = Self {
            pending,
            live: start.iter().copied().collect(),
            scheduled: HashSet::new(),
            skipped: HashSet::new(),
        };
        for id in start {
            set.pending.insert(*id, 0);
        }
        set
    }

    fn claim(&mut self, id: Id) -> bool {
        self.scheduled.insert(id)
    }

    /// Record that `id` finished and chose `next`. Returns the nodes that
    /// became ready, in edge order.
    fn complete(&mut self, edge_map: &EdgeMap, id: Id, next: &[Id]) -> Vec<Id> {
        let taken: HashSet<Id> = next.iter().copied().collect();
        let targets = edge_map.traversal_targets(id);
        let mut ready = Vec::new();
        let mut dead = Vec::new();

        for target in &targets {
            if taken.contains(target) {
                self.live.insert(*target);
            }
            self.release(*target, &mut ready, &mut dead);
        }

        // successors chosen without an edge run immediately
        for target in next {
            if !targets.contains(target) && self.claim(*target) {
                ready.push(*target);
            }
        }

        while let Some(skip) = dead.pop() {
            if !self.skipped.insert(skip) {
                continue;
            }
            debug!(node_id = %skip, "skipping node on untaken branch");
            for target in edge_map.traversal_targets(skip) {
                self.release(target, &mut ready, &mut dead);
            }
        }
        ready
    }

    fn release(&mut self, target: Id, ready: &mut Vec<Id>, dead: &mut Vec<Id>) {
        let Some(count) = self.pending.get_mut(&target) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return;
        }
        if self.live.contains(&target) {
            if self.claim(target) {
                ready.push(target);
            }
        } else {
            dead.push(target);
        }
    }
}

/// Walk the graph from `start` until every reachable node has run or been
/// skipped. Loop nodes call this for their body.
pub fn run_subgraph<'a>(
    ctx: &'a FlowContext,
    req: &'a FlowNodeRequest,
    start: Vec<Id>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        if req.timeout.is_some() {
            walk_parallel(ctx, req, start).await
        } else {
            walk_sequential(ctx, req, start).await
        }
    }
    .boxed()
}

async fn walk_sequential(ctx: &FlowContext, req: &FlowNodeRequest, start: Vec<Id>) -> Result<()> {
    let mut ready = ReadySet::new(&req.edge_map, &start);
    let mut stack: Vec<Id> = Vec::new();
    for id in start.iter().rev() {
        if ready.claim(*id) {
            stack.push(*id);
        }
    }

    while let Some(id) = stack.pop() {
        ctx.check("flow")?;
        let node = req
            .node(&id)
            .ok_or_else(|| FlowError::internal(format!("node {} is not in the flow", id)))?;
        let result = execute_node(ctx, req, node, false).await;
        if let Some(err) = result.error {
            if err.is_thrown() {
                ctx.cancel(CancelReason::Thrown);
            }
            return Err(err);
        }
        let next = ready.complete(&req.edge_map, id, &result.next_node_ids);
        stack.extend(next.into_iter().rev());
    }
    Ok(())
}

async fn walk_parallel(ctx: &FlowContext, req: &FlowNodeRequest, start: Vec<Id>) -> Result<()> {
    let scope = ctx.child();
    let semaphore = Arc::new(Semaphore::new(req.config.max_parallel_nodes.max(1)));
    let (tx, mut rx) = mpsc::channel::<(Id, FlowNodeResult)>(req.config.result_buffer.max(1));
    let mut ready = ReadySet::new(&req.edge_map, &start);
    let mut queue: VecDeque<Id> = start.into_iter().filter(|id| ready.claim(*id)).collect();
    let mut active = 0usize;
    let mut first_error: Option<FlowError> = None;

    loop {
        while first_error.is_none() {
            let Some(id) = queue.pop_front() else { break };
            let node = match req.node(&id) {
                Some(node) => node,
                None => {
                    first_error = Some(FlowError::internal(format!("node {} is not in the flow", id)));
                    scope.cancel(CancelReason::Failure);
                    break;
                }
            };
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    first_error = Some(FlowError::internal(e.to_string()));
                    break;
                }
            };
            let tx = tx.clone();
            let task_ctx = scope.clone();
            let task_req = req.clone();
            active += 1;
            debug!(node_id = %id, active, "launching node");
            tokio::spawn(async move {
                let result = execute_node(&task_ctx, &task_req, node, true).await;
                drop(permit);
                let _ = tx.send((id, result)).await;
            });
        }

        if active == 0 {
            break;
        }

        let Some((id, result)) = rx.recv().await else {
            break;
        };
        active -= 1;

        match result.error {
            Some(err) => {
                if first_error.is_none() {
                    if err.is_thrown() {
                        ctx.cancel(CancelReason::Thrown);
                    }
                    scope.cancel(CancelReason::Failure);
                    first_error = Some(err);
                }
            }
            None if first_error.is_none() => {
                queue.extend(ready.complete(&req.edge_map, id, &result.next_node_ids));
            }
            None => {}
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Run one node with a fresh tracker and emit its lifecycle statuses.
pub async fn execute_node(
    ctx: &FlowContext,
    req: &FlowNodeRequest,
    node: Arc<dyn FlowNode>,
    asynchronous: bool,
) -> FlowNodeResult {
    let span = info_span!("node", node_id = %node.id(), name = %node.name());
    async move {
        let tracker = Arc::new(VariableTracker::new());
        let execution_id = Id::new();
        let node_req = FlowNodeRequest {
            env: req.env.with_tracker(tracker.clone()),
            execution_id,
            ..req.clone()
        };

        node_req.push_status(
            FlowNodeStatus::new(execution_id, node.id(), node.name(), NodeState::Running)
                .with_input(tracker.read_vars_as_tree())
                .with_iteration_context(req.iteration.clone()),
        );
        debug!(kind = %node.kind(), "node dispatched");

        let result = if asynchronous {
            let (sink, mut results) = mpsc::channel(1);
            node.run_async(ctx, &node_req, sink).await;
            results
                .recv()
                .await
                .unwrap_or_else(|| FlowNodeResult::failed(FlowError::internal("node produced no result")))
        } else {
            node.run_sync(ctx, &node_req).await
        };

        let state = match &result.error {
            None => NodeState::Success,
            Some(err) if err.is_cancellation() || err.is_timeout() || ctx.is_cancelled() => {
                NodeState::Canceled
            }
            Some(_) => NodeState::Failure,
        };

        let mut status = FlowNodeStatus::new(execution_id, node.id(), node.name(), state)
            .with_input(tracker.read_vars_as_tree())
            .with_output(Value::Object(tracker.written_vars_as_tree()))
            .with_iteration_context(req.iteration.clone());
        if let Some(err) = &result.error {
            status = status.with_error(err);
            if state == NodeState::Failure {
                error!(error = %err, "node failed");
            } else {
                debug!(error = %err, "node canceled");
            }
        }
        node_req.push_status(status);
        result
    }
    .instrument(span)
    .await
}
