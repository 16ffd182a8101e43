use crate::core::id::Id;
use crate::flow::{default_successors, FlowContext, FlowNode, FlowNodeRequest, FlowNodeResult, NodeKind};
use async_trait::async_trait;

/// Entry point of a flow. Publishes nothing.
pub struct StartNode {
    id: Id,
    name: String,
}

impl StartNode {
    pub fn new(id: Id, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[async_trait]
impl FlowNode for StartNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Start
    }

    async fn run_sync(&self, _ctx: &FlowContext, req: &FlowNodeRequest) -> FlowNodeResult {
        FlowNodeResult::next(default_successors(req, self.id))
    }
}
