use super::llm::{GenerateOptions, ToolDescriptor};
use crate::core::id::Id;
use crate::flow::{FlowContext, FlowNode, FlowNodeRequest, FlowNodeResult, Handle, NodeKind};
use async_trait::async_trait;

/// Passive node holding the model settings of an adjacent AI node.
pub struct AiProviderNode {
    id: Id,
    name: String,
    credential_id: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl AiProviderNode {
    pub fn new(id: Id, name: impl Into<String>, credential_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            credential_id: credential_id.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn credential_id(&self) -> &str {
        &self.credential_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn options(&self, tools: Vec<ToolDescriptor>) -> GenerateOptions {
        GenerateOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools,
        }
    }
}

#[async_trait]
impl FlowNode for AiProviderNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::AiProvider
    }

    async fn run_sync(&self, _ctx: &FlowContext, req: &FlowNodeRequest) -> FlowNodeResult {
        FlowNodeResult::next(req.targets(self.id, Handle::Unspecified))
    }
}
