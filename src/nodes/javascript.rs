use crate::core::errors::FlowError;
use crate::core::id::Id;
use crate::flow::{default_successors, FlowContext, FlowNode, FlowNodeRequest, FlowNodeResult, NodeKind};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Remote JavaScript runtime.
#[async_trait]
pub trait JsExecutor: Send + Sync {
    /// Evaluate `code` with the flow variables bound as `context`.
    async fn run(&self, code: &str, context: Value) -> anyhow::Result<Value>;
}

const TRANSPORT_PREFIXES: [&str; 3] = ["internal: ", "unknown: ", "invalid_argument: "];

/// Strip the transport prefix so users see the JS error text.
pub fn unwrap_executor_error(message: &str) -> String {
    let mut text = message.trim();
    if let Some(idx) = text.find(" desc = ") {
        if text.starts_with("rpc error:") {
            text = &text[idx + " desc = ".len()..];
        }
    }
    loop {
        let before = text;
        for prefix in TRANSPORT_PREFIXES {
            if let Some(rest) = text.strip_prefix(prefix) {
                text = rest;
            }
        }
        if before == text {
            break;
        }
    }
    text.trim().to_string()
}

/// Runs user code against a snapshot of every flow variable and publishes
/// the returned value under its name.
pub struct JavaScriptNode {
    id: Id,
    name: String,
    code: String,
    executor: Arc<dyn JsExecutor>,
}

impl JavaScriptNode {
    pub fn new(
        id: Id,
        name: impl Into<String>,
        code: impl Into<String>,
        executor: Arc<dyn JsExecutor>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            code: code.into(),
            executor,
        }
    }
}

#[async_trait]
impl FlowNode for JavaScriptNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::JavaScript
    }

    async fn run_sync(&self, ctx: &FlowContext, req: &FlowNodeRequest) -> FlowNodeResult {
        let snapshot = req.env.snapshot();
        for (key, value) in &snapshot {
            req.env.track_read(key, value);
        }

        let outcome = ctx
            .run(&self.name, self.executor.run(&self.code, Value::Object(snapshot)))
            .await;
        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                let message = unwrap_executor_error(&format!("{:#}", err));
                return FlowNodeResult::failed(FlowError::execution(&self.name, message));
            }
            Err(err) => return FlowNodeResult::failed(err),
        };

        match req.env.set(&self.name, value) {
            Ok(()) => FlowNodeResult::next(default_successors(req, self.id)),
            Err(err) => FlowNodeResult::failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_executor_error() {
        assert_eq!(
            unwrap_executor_error("rpc error: code = Internal desc = internal: ReferenceError: x is not defined"),
            "ReferenceError: x is not defined"
        );
        assert_eq!(unwrap_executor_error("unknown: TypeError: boom"), "TypeError: boom");
        assert_eq!(unwrap_executor_error("plain failure"), "plain failure");
    }
}
