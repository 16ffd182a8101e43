use super::expression_variables;
use super::loop_support::{drive, BreakCondition, ErrorHandling, LoopSettings};
use crate::core::errors::{FlowError, Result};
use crate::core::id::Id;
use crate::expr::{has_vars, type_name};
use crate::flow::{default_successors, FlowContext, FlowNode, FlowNodeRequest, FlowNodeResult, NodeKind};
use crate::vars::Env;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Data-driven loop over an array or map.
///
/// Each iteration publishes `index` and `value` under the node's name, and
/// `key` as well when iterating a map. Map iteration follows the map's key
/// order.
pub struct ForEachNode {
    id: Id,
    name: String,
    iter_expression: String,
    settings: LoopSettings,
}

impl ForEachNode {
    pub fn new(id: Id, name: impl Into<String>, iter_expression: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            iter_expression: iter_expression.into(),
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

    async fn items(&self, env: &Env) -> Result<Vec<(Value, Value)>> {
        if !has_vars(&self.iter_expression) {
            return env.eval_iterable(&self.iter_expression);
        }
        match env.interpolate_value(self.iter_expression.trim()).await? {
            Value::Array(items) => Ok(items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::from(i as u64), v))
                .collect()),
            Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (Value::String(k), v)).collect()),
            other => Err(FlowError::expression(
                &self.iter_expression,
                format!("expected array or map, got {}", type_name(&other)),
            )),
        }
    }

    fn publish(&self, env: &Env, index: usize, key: &Value, value: &Value) -> Result<()> {
        env.set(&format!("{}.index", self.name), Value::from(index as u64))?;
        if key.is_string() {
            env.set(&format!("{}.key", self.name), key.clone())?;
        }
        env.set(&format!("{}.value", self.name), value.clone())
    }
}

#[async_trait]
impl FlowNode for ForEachNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::ForEach
    }

    async fn run_sync(&self, ctx: &FlowContext, req: &FlowNodeRequest) -> FlowNodeResult {
        let items = match self.items(&req.env).await {
            Ok(items) => items,
            Err(err) => return FlowNodeResult::failed(err),
        };

        let outcome = drive(self.id, &self.name, ctx, req, &self.settings, items.len(), |index| {
            let (key, value) = &items[index];
            self.publish(&req.env, index, key, value)
        })
        .await;

        match outcome {
            Ok(()) => FlowNodeResult::next(default_successors(req, self.id)),
            Err(err) => FlowNodeResult::failed(err),
        }
    }

    fn required_variables(&self) -> Vec<String> {
        let mut vars = expression_variables(&self.iter_expression);
        vars.extend(self.settings.break_condition.iter().map(|c| c.path.clone()));
        vars
    }

    fn output_variables(&self) -> Vec<String> {
        vec!["index".to_string(), "key".to_string(), "value".to_string()]
    }
}
