pub mod context;
pub mod graph;
pub mod node;
pub mod runner;
pub mod status;

pub use context::{CancelReason, FlowContext};
pub use graph::{Edge, EdgeMap, FlowGraph, Handle, PredecessorMap};
pub use node::{
    default_successors, FlowNode, FlowNodeRequest, FlowNodeResult, IterationContext, IterationLabel,
    NodeKind, NodeMap,
};
pub use runner::{execute_node, run_subgraph, FlowRunReport, FlowRunner};
pub use status::{
    BroadcastStatusSink, BufferingStatusSink, ChannelStatusSink, FlowNodeStatus, FlowStatus,
    LoggingStatusSink, NodeState, StatusEvent, StatusReceivers, StatusSink,
};
