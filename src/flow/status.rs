//! Status stream: per-node lifecycle records and the terminal flow status.

use super::node::IterationContext;
use crate::core::errors::FlowError;
use crate::core::id::Id;
use async_broadcast::{Receiver, Sender, TrySendError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    Running,
    Success,
    Failure,
    Canceled,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeState::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowStatus {
    Starting,
    Running,
    Success,
    Failed,
    Timeout,
    Canceled,
}

impl FlowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FlowStatus::Starting | FlowStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNodeStatus {
    pub execution_id: Id,
    pub node_id: Id,
    pub name: String,
    pub state: NodeState,
    pub input_data: Option<Value>,
    pub output_data: Option<Value>,
    pub error: Option<String>,
    pub error_category: Option<String>,
    pub iteration_event: bool,
    pub iteration_index: Option<usize>,
    pub loop_node_id: Option<Id>,
    pub iteration_context: Option<IterationContext>,
    pub timestamp: DateTime<Utc>,
}

impl FlowNodeStatus {
    pub fn new(execution_id: Id, node_id: Id, name: impl Into<String>, state: NodeState) -> Self {
        Self {
            execution_id,
            node_id,
            name: name.into(),
            state,
            input_data: None,
            output_data: None,
            error: None,
            error_category: None,
            iteration_event: false,
            iteration_index: None,
            loop_node_id: None,
            iteration_context: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_input(mut self, input: Map<String, Value>) -> Self {
        self.input_data = Some(Value::Object(input));
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output_data = Some(output);
        self
    }

    pub fn with_error(mut self, error: &FlowError) -> Self {
        self.error = Some(error.to_string());
        self.error_category = Some(error.category().to_string());
        self
    }

    pub fn with_iteration_context(mut self, context: Option<IterationContext>) -> Self {
        self.iteration_context = context;
        self
    }

    /// Mark as an iteration record of `loop_node_id`.
    pub fn for_iteration(mut self, loop_node_id: Id, index: Option<usize>) -> Self {
        self.iteration_event = true;
        self.loop_node_id = Some(loop_node_id);
        self.iteration_index = index;
        self
    }
}

/// One entry of the status stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StatusEvent {
    Node(FlowNodeStatus),
    Flow(FlowStatus),
}

/// Consumer of the status stream. Pushes never block the engine.
pub trait StatusSink: Send + Sync {
    fn push_node_status(&self, status: FlowNodeStatus);
    fn push_flow_status(&self, status: FlowStatus);
}

/// Logs every status at debug level and keeps nothing.
pub struct LoggingStatusSink;

impl StatusSink for LoggingStatusSink {
    fn push_node_status(&self, status: FlowNodeStatus) {
        debug!(
            name = %status.name,
            state = ?status.state,
            execution_id = %status.execution_id,
            "node status"
        );
    }

    fn push_flow_status(&self, status: FlowStatus) {
        debug!(?status, "flow status");
    }
}

/// A buffering sink that collects every event in order.
#[derive(Default)]
pub struct BufferingStatusSink {
    events: Arc<RwLock<Vec<StatusEvent>>>,
}

impl BufferingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.read().clone()
    }

    pub fn node_statuses(&self) -> Vec<FlowNodeStatus> {
        self.events
            .read()
            .iter()
            .filter_map(|event| match event {
                StatusEvent::Node(status) => Some(status.clone()),
                StatusEvent::Flow(_) => None,
            })
            .collect()
    }

    pub fn flow_statuses(&self) -> Vec<FlowStatus> {
        self.events
            .read()
            .iter()
            .filter_map(|event| match event {
                StatusEvent::Flow(status) => Some(*status),
                StatusEvent::Node(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl StatusSink for BufferingStatusSink {
    fn push_node_status(&self, status: FlowNodeStatus) {
        self.events.write().push(StatusEvent::Node(status));
    }

    fn push_flow_status(&self, status: FlowStatus) {
        self.events.write().push(StatusEvent::Flow(status));
    }
}

/// Receiving halves of a [`ChannelStatusSink`].
pub struct StatusReceivers {
    pub nodes: mpsc::UnboundedReceiver<FlowNodeStatus>,
    pub flows: mpsc::UnboundedReceiver<FlowStatus>,
}

/// Separate node and flow channels, the shape persistence consumers expect.
pub struct ChannelStatusSink {
    nodes: mpsc::UnboundedSender<FlowNodeStatus>,
    flows: mpsc::UnboundedSender<FlowStatus>,
}

impl ChannelStatusSink {
    pub fn pair() -> (Self, StatusReceivers) {
        let (node_tx, node_rx) = mpsc::unbounded_channel();
        let (flow_tx, flow_rx) = mpsc::unbounded_channel();
        (
            Self {
                nodes: node_tx,
                flows: flow_tx,
            },
            StatusReceivers {
                nodes: node_rx,
                flows: flow_rx,
            },
        )
    }
}

impl StatusSink for ChannelStatusSink {
    fn push_node_status(&self, status: FlowNodeStatus) {
        if self.nodes.send(status).is_err() {
            debug!("node status receiver dropped");
        }
    }

    fn push_flow_status(&self, status: FlowStatus) {
        if self.flows.send(status).is_err() {
            debug!("flow status receiver dropped");
        }
    }
}

/// Fan-out to any number of subscribers. When a slow subscriber falls
/// `capacity` events behind, its oldest events are dropped.
pub struct BroadcastStatusSink {
    sender: Sender<StatusEvent>,
    // keeps the channel open while no subscriber is attached
    _keepalive: async_broadcast::InactiveReceiver<StatusEvent>,
}

impl BroadcastStatusSink {
    pub fn new(capacity: usize) -> (Self, Receiver<StatusEvent>) {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity.max(1));
        sender.set_overflow(true);
        let keepalive = receiver.clone().deactivate();
        (
            Self {
                sender,
                _keepalive: keepalive,
            },
            receiver,
        )
    }

    pub fn subscribe(&self) -> Receiver<StatusEvent> {
        self.sender.new_receiver()
    }

    fn publish(&self, event: StatusEvent) {
        match self.sender.try_broadcast(event) {
            Ok(Some(_dropped)) => warn!("status subscriber lagging, dropped oldest event"),
            Ok(None) => {}
            Err(TrySendError::Inactive(_)) => {}
            Err(e) => debug!("status event not delivered: {}", e),
        }
    }
}

impl StatusSink for BroadcastStatusSink {
    fn push_node_status(&self, status: FlowNodeStatus) {
        self.publish(StatusEvent::Node(status));
    }

    fn push_flow_status(&self, status: FlowStatus) {
        self.publish(StatusEvent::Flow(status));
    }
}
