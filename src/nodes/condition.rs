use super::expression_variables;
use crate::core::errors::{FlowError, Result};
use crate::core::id::Id;
use crate::expr::{has_vars, type_name};
use crate::flow::{FlowContext, FlowNode, FlowNodeRequest, FlowNodeResult, Handle, NodeKind};
use crate::vars::Env;
use async_trait::async_trait;
use serde_json::Value;

/// `if` node: follows `then` when the condition holds and `else` otherwise.
/// `unspecified` successors run either way.
pub struct ConditionNode {
    id: Id,
    name: String,
    condition: String,
}

impl ConditionNode {
    pub fn new(id: Id, name: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            condition: condition.into(),
        }
    }

    pub fn condition(&self) -> &str {
        &self.condition
    }

    async fn evaluate(&self, env: &Env) -> Result<bool> {
        if !has_vars(&self.condition) {
            return env.eval_bool(&self.condition);
        }
        match env.interpolate_value(self.condition.trim()).await? {
            Value::Bool(b) => Ok(b),
            other => Err(FlowError::expression(
                &self.condition,
                format!("expected boolean, got {}", type_name(&other)),
            )),
        }
    }
}

#[async_trait]
impl FlowNode for ConditionNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Condition
    }

    async fn run_sync(&self, ctx: &FlowContext, req: &FlowNodeRequest) -> FlowNodeResult {
        if let Err(err) = ctx.check(&self.name) {
            return FlowNodeResult::failed(err);
        }
        let outcome = match self.evaluate(&req.env).await {
            Ok(outcome) => outcome,
            Err(err) => return FlowNodeResult::failed(err),
        };
        if let Err(err) = req.env.set(&format!("{}.condition", self.name), Value::Bool(outcome)) {
            return FlowNodeResult::failed(err);
        }

        let branch = if outcome { Handle::Then } else { Handle::Else };
        let mut next = req.targets(self.id, branch);
        next.extend(req.targets(self.id, Handle::Unspecified));
        FlowNodeResult::next(next)
    }

    fn required_variables(&self) -> Vec<String> {
        expression_variables(&self.condition)
    }

    fn output_variables(&self) -> Vec<String> {
        vec!["condition".to_string()]
    }
}
