use crate::core::errors::FlowError;
use crate::core::id::Id;
use crate::expr::template_variables;
use crate::flow::{FlowContext, FlowNode, FlowNodeRequest, FlowNodeResult, NodeKind};
use async_trait::async_trait;
use tracing::{info, warn};

/// Ends the flow as `Canceled` with a user-authored message.
pub struct ThrowNode {
    id: Id,
    name: String,
    message: String,
}

impl ThrowNode {
    pub fn new(id: Id, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl FlowNode for ThrowNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Throw
    }

    async fn run_sync(&self, _ctx: &FlowContext, req: &FlowNodeRequest) -> FlowNodeResult {
        let message = match req.env.interpolate(&self.message).await {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "throw message could not be interpolated");
                self.message.clone()
            }
        };
        info!(node = %self.name, %message, "flow canceled by throw");
        FlowNodeResult::failed(FlowError::thrown(message))
    }

    fn required_variables(&self) -> Vec<String> {
        template_variables(&self.message)
    }
}
