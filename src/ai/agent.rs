//! Tool-calling agent node.
//!
//! The node reads its model settings from the provider on its `ai_provider`
//! edge, its history from an optional memory on `ai_memory`, and offers every
//! peer on `ai_tools` as a callable tool next to the two built-ins. Provider
//! calls and tool calls run as child executions with their own trackers and
//! statuses, so the agent's own record only shows prompt reads and the final
//! `text` and `total_metrics`.

use super::llm::{ChatMessage, GenerateOptions, LlmModel, LlmProviderFactory, ToolCall, ToolDescriptor};
use super::memory::AiMemoryNode;
use super::metrics::{usage_of, AiMetrics};
use super::provider::AiProviderNode;
use super::tools::{self, builtin_tools, node_tool, parse_arguments, validate_arguments};
use crate::any::downcast_arc;
use crate::core::errors::{FlowError, Result};
use crate::core::id::Id;
use crate::expr::template_variables;
use crate::flow::{
    default_successors, FlowContext, FlowNode, FlowNodeRequest, FlowNodeResult, FlowNodeStatus, Handle,
    NodeKind, NodeState,
};
use crate::vars::{Env, VariableTracker};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A tool the model may call.
struct ToolEntry {
    descriptor: ToolDescriptor,
    /// `None` for built-ins
    node: Option<Arc<dyn FlowNode>>,
}

/// What the agent found on its configuration edges.
struct Peers {
    provider: Arc<dyn FlowNode>,
    memory: Option<Arc<dyn FlowNode>>,
    tools: Vec<Arc<dyn FlowNode>>,
}

pub struct AiNode {
    id: Id,
    name: String,
    prompt: String,
    system_prompt: Option<String>,
    max_iterations: Option<usize>,
    factory: Arc<dyn LlmProviderFactory>,
}

impl AiNode {
    pub fn new(
        id: Id,
        name: impl Into<String>,
        prompt: impl Into<String>,
        factory: Arc<dyn LlmProviderFactory>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            prompt: prompt.into(),
            system_prompt: None,
            max_iterations: None,
            factory,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Overrides the engine-wide tool-call loop budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    fn discover(&self, req: &FlowNodeRequest) -> Result<Peers> {
        let providers = req.targets(self.id, Handle::AiProvider);
        let provider = match providers.as_slice() {
            [only] => req.node(only),
            _ => None,
        }
        .ok_or_else(|| FlowError::node_configuration(&self.name, "exactly one provider must be connected"))?;
        if downcast_arc::<AiProviderNode, _>(&provider).is_none() {
            return Err(FlowError::node_configuration(
                &self.name,
                format!("'{}' is not a provider node", provider.name()),
            ));
        }

        let memories = req.targets(self.id, Handle::AiMemory);
        if memories.len() > 1 {
            return Err(FlowError::node_configuration(&self.name, "at most one memory may be connected"));
        }
        let memory = memories.first().and_then(|id| req.node(id));
        if let Some(memory) = &memory {
            if downcast_arc::<AiMemoryNode, _>(memory).is_none() {
                return Err(FlowError::node_configuration(
                    &self.name,
                    format!("'{}' is not a memory node", memory.name()),
                ));
            }
        }

        let tools = req
            .targets(self.id, Handle::AiTools)
            .iter()
            .filter_map(|id| req.node(id))
            .collect();
        Ok(Peers {
            provider,
            memory,
            tools,
        })
    }

    fn tool_table(peers: &Peers) -> HashMap<String, ToolEntry> {
        let mut table = HashMap::new();
        for node in &peers.tools {
            table.insert(
                node.name().to_string(),
                ToolEntry {
                    descriptor: node_tool(node.as_ref()),
                    node: Some(node.clone()),
                },
            );
        }
        // built-ins shadow peers of the same name
        for descriptor in builtin_tools() {
            table.insert(descriptor.name.clone(), ToolEntry { descriptor, node: None });
        }
        table
    }

    async fn execute(&self, ctx: &FlowContext, req: &FlowNodeRequest) -> Result<()> {
        let peers = self.discover(req)?;
        let provider = downcast_arc::<AiProviderNode, _>(&peers.provider)
            .ok_or_else(|| FlowError::internal("provider downcast failed"))?;
        let memory = peers
            .memory
            .as_ref()
            .and_then(|m| downcast_arc::<AiMemoryNode, _>(m));

        let prompt = req.env.interpolate(&self.prompt).await?;
        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(req.env.interpolate(system).await?));
        }
        if let Some(memory) = memory {
            messages.extend(memory.get_messages());
        }
        messages.push(ChatMessage::user(prompt.clone()));

        let table = Self::tool_table(&peers);
        let mut descriptors: Vec<ToolDescriptor> = table.values().map(|t| t.descriptor.clone()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        let options = provider.options(descriptors);

        let model = ctx
            .run(&self.name, self.factory.create(provider.credential_id(), provider.model()))
            .await?
            .map_err(|e| FlowError::provider(format!("{:#}", e)))?;

        let budget = self.max_iterations.unwrap_or(req.config.ai_max_iterations).max(1);
        let mut metrics = AiMetrics::default();
        let mut text = String::new();

        for iteration in 0..budget {
            ctx.check(&self.name)?;
            debug!(agent = %self.name, iteration, "calling provider");
            let choice = self
                .call_provider(ctx, req, peers.provider.as_ref(), model.as_ref(), &messages, &options, &mut metrics)
                .await?;

            text = choice.content.clone();
            if choice.tool_calls.is_empty() {
                break;
            }

            messages.push(ChatMessage::assistant_with_tools(choice.content, choice.tool_calls.clone()));
            for call in &choice.tool_calls {
                metrics.record_tool_call();
                let response = self.call_tool(ctx, req, &table, call).await?;
                messages.push(ChatMessage::tool(call, response));
            }

            if iteration + 1 == budget {
                warn!(agent = %self.name, budget, "tool-call budget exhausted");
            }
        }

        req.env.set(&format!("{}.text", self.name), Value::String(text.clone()))?;
        req.env.set(&format!("{}.total_metrics", self.name), serde_json::to_value(metrics)?)?;

        if let Some(memory) = memory {
            memory.add_message(ChatMessage::user(prompt));
            memory.add_message(ChatMessage::assistant(text));
        }
        info!(agent = %self.name, llm_calls = metrics.llm_calls, tool_calls = metrics.tool_calls, "agent finished");
        Ok(())
    }

    /// One provider invocation as its own child execution.
    #[allow(clippy::too_many_arguments)]
    async fn call_provider(
        &self,
        ctx: &FlowContext,
        req: &FlowNodeRequest,
        provider: &dyn FlowNode,
        model: &dyn LlmModel,
        messages: &[ChatMessage],
        options: &GenerateOptions,
        metrics: &mut AiMetrics,
    ) -> Result<super::llm::ContentChoice> {
        let tracker = VariableTracker::new();
        let execution_id = Id::new();
        let status = |state: NodeState| {
            FlowNodeStatus::new(execution_id, provider.id(), provider.name(), state)
                .with_iteration_context(req.iteration.clone())
        };
        req.push_status(status(NodeState::Running).with_input(tracker.read_vars_as_tree()));

        let outcome = match ctx.run(provider.name(), model.generate_content(messages, options)).await {
            Ok(Ok(choices)) => Ok(choices),
            Ok(Err(e)) => Err(FlowError::provider(format!("{:#}", e))),
            Err(e) => Err(e),
        };
        let choices = match outcome {
            Ok(choices) if !choices.is_empty() => choices,
            Ok(_) => {
                let err = FlowError::provider("model returned no choices");
                req.push_status(status(NodeState::Failure).with_error(&err));
                return Err(err);
            }
            Err(err) => {
                let state = if err.is_cancellation() || err.is_timeout() {
                    NodeState::Canceled
                } else {
                    NodeState::Failure
                };
                req.push_status(status(state).with_error(&err));
                return Err(err);
            }
        };

        let usage = usage_of(&choices);
        metrics.record_call(usage);
        let mut output = tracker.written_vars_as_tree();
        output.insert("metrics".to_string(), serde_json::to_value(AiMetrics::for_call(usage))?);
        req.push_status(
            status(NodeState::Success)
                .with_input(tracker.read_vars_as_tree())
                .with_output(Value::Object(output)),
        );

        choices
            .into_iter()
            .next()
            .ok_or_else(|| FlowError::provider("model returned no choices"))
    }

    /// Run one tool call as its own child execution and return the text fed
    /// back to the model. Tool failures become error text; cancellation
    /// aborts the agent.
    async fn call_tool(
        &self,
        ctx: &FlowContext,
        req: &FlowNodeRequest,
        table: &HashMap<String, ToolEntry>,
        call: &ToolCall,
    ) -> Result<String> {
        let tracker = Arc::new(VariableTracker::new());
        let env = req.env.with_tracker(tracker.clone());
        let execution_id = Id::new();
        let entry = table.get(&call.name);
        let (node_id, node_name) = match entry.and_then(|e| e.node.as_ref()) {
            Some(node) => (node.id(), node.name().to_string()),
            None => (self.id, call.name.clone()),
        };
        let status = |state: NodeState| {
            FlowNodeStatus::new(execution_id, node_id, node_name.clone(), state)
                .with_iteration_context(req.iteration.clone())
        };
        req.push_status(status(NodeState::Running).with_input(tracker.read_vars_as_tree()));

        let outcome = self.invoke_tool(ctx, req, &env, &tracker, entry, call, execution_id).await;

        let terminal = |state: NodeState| {
            status(state)
                .with_input(tracker.read_vars_as_tree())
                .with_output(Value::Object(tracker.written_vars_as_tree()))
        };
        match outcome {
            Ok(value) => {
                req.push_status(terminal(NodeState::Success));
                Ok(match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
            }
            Err(err) if err.is_cancellation() || err.is_timeout() => {
                req.push_status(terminal(NodeState::Canceled).with_error(&err));
                Err(err)
            }
            Err(err) => {
                warn!(agent = %self.name, tool = %call.name, error = %err, "tool failed, reporting to model");
                req.push_status(terminal(NodeState::Failure).with_error(&err));
                Ok(json!({"error": err.to_string()}).to_string())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn invoke_tool(
        &self,
        ctx: &FlowContext,
        req: &FlowNodeRequest,
        env: &Env,
        tracker: &Arc<VariableTracker>,
        entry: Option<&ToolEntry>,
        call: &ToolCall,
        execution_id: Id,
    ) -> Result<Value> {
        let entry = entry.ok_or_else(|| FlowError::tool(&call.name, "no such tool"))?;
        let arguments = parse_arguments(&call.arguments).map_err(|m| FlowError::tool(&call.name, m))?;
        validate_arguments(&entry.descriptor.parameters, &arguments).map_err(|m| FlowError::tool(&call.name, m))?;

        let node = match &entry.node {
            None => return tools::run_builtin(env, &call.name, &arguments),
            Some(node) => node,
        };

        // Arguments live in a private copy; only the peer's own output is
        // written back to the flow.
        let scoped = env.overlay(Map::new()).with_tracker(tracker.clone());
        if let Value::Object(arguments) = &arguments {
            for (key, value) in arguments {
                scoped.set(key, value.clone())?;
            }
        }
        let tool_req = FlowNodeRequest {
            execution_id,
            ..req.with_env(scoped.clone())
        };
        match node.run_sync(ctx, &tool_req).await.error {
            Some(err) if err.is_cancellation() || err.is_timeout() => Err(err),
            Some(err) => Err(FlowError::tool(node.name(), err.to_string())),
            None => match scoped.get_untracked(node.name()) {
                Some(output) => {
                    env.set_untracked(node.name(), output.clone())?;
                    Ok(output)
                }
                None => Ok(Value::Object(tracker.written_vars_as_tree())),
            },
        }
    }
}

#[async_trait]
impl FlowNode for AiNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Ai
    }

    async fn run_sync(&self, ctx: &FlowContext, req: &FlowNodeRequest) -> FlowNodeResult {
        match self.execute(ctx, req).await {
            Ok(()) => FlowNodeResult::next(default_successors(req, self.id)),
            Err(err) => FlowNodeResult::failed(err),
        }
    }

    fn required_variables(&self) -> Vec<String> {
        let mut vars = template_variables(&self.prompt);
        if let Some(system) = &self.system_prompt {
            vars.extend(template_variables(system));
        }
        vars
    }

    fn output_variables(&self) -> Vec<String> {
        vec!["text".to_string(), "total_metrics".to_string()]
    }
}
