// Core infrastructure modules
pub mod any;
pub mod core;

// Variable substrate and expression language
pub mod expr;
pub mod vars;

// Graph runtime and the node catalogue
pub mod ai;
pub mod flow;
pub mod nodes;

// Re-exports for convenience
pub use crate::core::config::EngineConfig;
pub use crate::core::errors::{FlowError, Result};
pub use crate::core::id::Id;
pub use flow::{
    BufferingStatusSink, Edge, FlowContext, FlowGraph, FlowNode, FlowNodeRequest, FlowNodeResult,
    FlowNodeStatus, FlowRunReport, FlowRunner, FlowStatus, Handle, NodeKind, NodeState, StatusSink,
};
pub use vars::{Env, VariableTracker};
