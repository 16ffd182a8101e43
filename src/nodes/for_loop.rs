use super::loop_support::{drive, BreakCondition, ErrorHandling, LoopSettings};
use crate::core::id::Id;
use crate::flow::{default_successors, FlowContext, FlowNode, FlowNodeRequest, FlowNodeResult, NodeKind};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Counted loop: runs the `loop` body `iter_count` times.
pub struct ForLoopNode {
    id: Id,
    name: String,
    iter_count: i64,
    settings: LoopSettings,
}

impl ForLoopNode {
    pub fn new(id: Id, name: impl Into<String>, iter_count: i64) -> Self {
        Self {
            id,
            name: name.into(),
            iter_count,
            settings: LoopSettings::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = Some(timeout);
        self
    }

    pub fn with_error_handling(mut self, error_handling: ErrorHandling) -> Self {
        self.settings.error_handling = error_handling;
        self
    }

    pub fn with_break_condition(mut self, condition: BreakCondition) -> Self {
        self.settings.break_condition = Some(condition);
        self
    }
}

#[async_trait]
impl FlowNode for ForLoopNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::ForLoop
    }

    async fn run_sync(&self, ctx: &FlowContext, req: &FlowNodeRequest) -> FlowNodeResult {
        let total = usize::try_from(self.iter_count.max(0)).unwrap_or(usize::MAX);
        let index_path = format!("{}.index", self.name);
        let outcome = drive(self.id, &self.name, ctx, req, &self.settings, total, |index| {
            req.env.set(&index_path, Value::from(index as u64))
        })
        .await;

        match outcome {
            Ok(()) => FlowNodeResult::next(default_successors(req, self.id)),
            Err(err) => FlowNodeResult::failed(err),
        }
    }

    fn required_variables(&self) -> Vec<String> {
        self.settings
            .break_condition
            .iter()
            .map(|c| c.path.clone())
            .collect()
    }

    fn output_variables(&self) -> Vec<String> {
        vec!["index".to_string()]
    }
}
