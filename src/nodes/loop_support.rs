//! Iteration driver shared by the counted and for-each loops.

use crate::core::errors::{FlowError, Result};
use crate::core::id::Id;
use crate::expr::eval::{compare, values_equal};
use crate::flow::{
    run_subgraph, FlowContext, FlowNodeRequest, FlowNodeStatus, Handle, IterationContext, NodeState,
};
use crate::vars::Env;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a loop does when an iteration's body fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    /// Fail the loop and emit an error summary
    #[default]
    Unspecified,
    /// Record the failure and move on to the next iteration
    Ignore,
    /// Record the failure and end the loop without error
    Break,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    NotContains,
    Exists,
}

/// `(path, comparison, value)`. The loop keeps going while it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakCondition {
    pub path: String,
    pub comparison: Comparison,
    #[serde(default)]
    pub value: Value,
}

impl BreakCondition {
    pub fn new(path: impl Into<String>, comparison: Comparison, value: Value) -> Self {
        Self {
            path: path.into(),
            comparison,
            value,
        }
    }

    pub async fn holds(&self, env: &Env) -> Result<bool> {
        let actual = env.lookup(&self.path);
        let expected = match &self.value {
            Value::String(raw) => env.interpolate_value(raw.trim()).await?,
            other => other.clone(),
        };
        let Some(actual) = actual else {
            return Ok(matches!(self.comparison, Comparison::NotEqual | Comparison::NotContains));
        };

        let ordering = compare(&actual, &expected);
        Ok(match self.comparison {
            Comparison::Equal => values_equal(&actual, &expected),
            Comparison::NotEqual => !values_equal(&actual, &expected),
            Comparison::GreaterThan => ordering == Some(Ordering::Greater),
            Comparison::GreaterOrEqual => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            Comparison::LessThan => ordering == Some(Ordering::Less),
            Comparison::LessOrEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Comparison::Contains => contains(&actual, &expected),
            Comparison::NotContains => !contains(&actual, &expected),
            Comparison::Exists => true,
        })
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
        (Value::Array(items), _) => items.iter().any(|item| values_equal(item, needle)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

/// Settings common to both loop kinds.
#[derive(Debug, Clone, Default)]
pub struct LoopSettings {
    pub timeout: Option<Duration>,
    pub error_handling: ErrorHandling,
    pub break_condition: Option<BreakCondition>,
}

/// Run `total` iterations of the body on the `loop` handle.
///
/// `prepare(i)` publishes the iteration variables before the break condition
/// is checked. Every iteration that emits `Running` ends with exactly one
/// terminal status.
pub(crate) async fn drive<F>(
    loop_id: Id,
    name: &str,
    ctx: &FlowContext,
    req: &FlowNodeRequest,
    settings: &LoopSettings,
    total: usize,
    mut prepare: F,
) -> Result<()>
where
    F: FnMut(usize) -> Result<()> + Send,
{
    let ctx = match settings.timeout {
        Some(timeout) => ctx.child_with_timeout(timeout),
        None => ctx.child(),
    };
    let body = req.targets(loop_id, Handle::Loop);
    let mut completed = 0usize;

    for index in 0..total {
        ctx.check(name)?;
        prepare(index)?;

        if let Some(condition) = &settings.break_condition {
            if !condition.holds(&req.env).await? {
                debug!(loop_name = name, index, "break condition ended the loop");
                break;
            }
        }

        let iteration = IterationContext::descend(req.iteration.as_ref(), loop_id, index);
        let execution_id = Id::new();
        let status = |state: NodeState| {
            FlowNodeStatus::new(execution_id, loop_id, format!("{} iteration {}", name, index + 1), state)
                .for_iteration(loop_id, Some(index))
                .with_iteration_context(Some(iteration.clone()))
        };
        req.push_status(status(NodeState::Running));

        let body_req = req.with_iteration(iteration.clone());
        match run_subgraph(&ctx, &body_req, body.clone()).await {
            Ok(()) => {
                completed += 1;
                req.push_status(
                    status(NodeState::Success).with_output(json!({"index": index, "completed": true})),
                );
            }
            Err(err) if err.is_cancellation() || err.is_timeout() || ctx.is_cancelled() => {
                req.push_status(status(NodeState::Canceled).with_error(&err));
                return Err(err);
            }
            Err(err) => {
                req.push_status(status(NodeState::Failure).with_error(&err));
                match settings.error_handling {
                    ErrorHandling::Unspecified => {
                        req.push_status(error_summary(loop_id, req, index, total, &err));
                        return Err(err);
                    }
                    ErrorHandling::Ignore => {
                        warn!(loop_name = name, index, error = %err, "iteration failed, continuing");
                    }
                    ErrorHandling::Break => {
                        warn!(loop_name = name, index, error = %err, "iteration failed, leaving loop");
                        break;
                    }
                }
            }
        }
    }

    info!(loop_name = name, completed, total, "loop finished");
    Ok(())
}

fn error_summary(
    loop_id: Id,
    req: &FlowNodeRequest,
    index: usize,
    total: usize,
    err: &FlowError,
) -> FlowNodeStatus {
    FlowNodeStatus::new(Id::new(), loop_id, "Error Summary", NodeState::Failure)
        .with_output(json!({"failedAtIteration": index, "totalIterations": total}))
        .with_error(err)
        .for_iteration(loop_id, None)
        .with_iteration_context(req.iteration.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_break_condition_comparisons() {
        let env = Env::from_value(json!({"loop": {"index": 2}, "tags": ["a", "b"]}));
        let below = BreakCondition::new("loop.index", Comparison::LessThan, json!(3));
        assert!(below.holds(&env).await.unwrap());
        let equal = BreakCondition::new("loop.index", Comparison::Equal, json!(2.0));
        assert!(equal.holds(&env).await.unwrap());
        let tags = BreakCondition::new("tags", Comparison::Contains, json!("c"));
        assert!(!tags.holds(&env).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_path_only_satisfies_negations() {
        let env = Env::new();
        let exists = BreakCondition::new("nope", Comparison::Exists, Value::Null);
        assert!(!exists.holds(&env).await.unwrap());
        let differs = BreakCondition::new("nope", Comparison::NotEqual, json!(1));
        assert!(differs.holds(&env).await.unwrap());
    }

    #[tokio::test]
    async fn test_string_value_is_interpolated() {
        let env = Env::from_value(json!({"limit": 5, "n": 4}));
        let cond = BreakCondition::new("n", Comparison::LessThan, json!("{{ limit }}"));
        assert!(cond.holds(&env).await.unwrap());
    }
}
