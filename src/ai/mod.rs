//! The AI agent node and its passive configuration peers.

pub mod agent;
pub mod llm;
pub mod memory;
pub mod metrics;
pub mod provider;
pub mod tools;

pub use agent::AiNode;
pub use llm::{
    ChatMessage, ContentChoice, GenerateOptions, LlmModel, LlmProviderFactory, Role, ToolCall,
    ToolDescriptor,
};
pub use memory::{AiMemoryNode, RetentionPolicy};
pub use metrics::{extract_usage, usage_of, AiMetrics, TokenUsage};
pub use provider::AiProviderNode;
pub use tools::{builtin_tools, node_tool, GET_VARIABLE, SET_VARIABLE};
