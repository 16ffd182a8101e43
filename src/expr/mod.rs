//! Expression language and `{{ ... }}` interpolation.
//!
//! Expressions are compiled once per `(source, mode)` into a [`Program`] and
//! memoized process-wide; evaluation runs against an [`Env`] and records
//! every variable it reads into the env's tracker.

pub mod ast;
pub mod builtins;
pub mod cache;
pub mod eval;
pub mod interpolate;
pub mod lexer;
pub mod parser;

use crate::core::errors::{FlowError, Result};
use crate::vars::Env;
use serde_json::Value;
use thiserror::Error;

pub use ast::{AiDeclaration, Expr};
pub use interpolate::{
    has_vars, interpolate, interpolate_value, template_ai_declarations, template_variables,
};

/// What a compiled expression must produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Any,
    Bool,
    Iterable,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error at offset {pos}: {message}")]
    Parse { message: String, pos: usize },

    #[error("unknown identifier '{name}' (available: {})", .available.join(", "))]
    UnknownIdentifier { name: String, available: Vec<String> },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{name}(): {message}")]
    Function { name: String, message: String },

    #[error("{0}")]
    Type(String),

    #[error("{0}")]
    Resolve(String),

    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub source: String,
    pub mode: Mode,
    pub expr: Expr,
}

impl Program {
    pub fn run(&self, env: &Env) -> Result<Value> {
        let value = eval::eval(&self.expr, &eval::Scope::new(env))
            .map_err(|e| FlowError::expression(&self.source, e.to_string()))?;
        match (self.mode, &value) {
            (Mode::Any, _) | (Mode::Bool, Value::Bool(_)) => Ok(value),
            (Mode::Iterable, Value::Array(_)) | (Mode::Iterable, Value::Object(_)) => Ok(value),
            (Mode::Bool, other) => Err(FlowError::expression(
                &self.source,
                format!("expected boolean result, got {}", type_name(other)),
            )),
            (Mode::Iterable, other) => Err(FlowError::expression(
                &self.source,
                format!("expected array or map result, got {}", type_name(other)),
            )),
        }
    }
}

/// Compile (through the cache) and run an expression.
pub fn evaluate(env: &Env, source: &str, mode: Mode) -> Result<Value> {
    cache::compile(source, mode)?.run(env)
}

/// Static analysis helpers over an expression source.
pub fn referenced_paths(source: &str) -> Result<Vec<String>> {
    Ok(cache::compile(source, Mode::Any)?.expr.referenced_paths())
}

pub fn ai_declarations(source: &str) -> Result<Vec<AiDeclaration>> {
    Ok(cache::compile(source, Mode::Any)?.expr.ai_declarations())
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

/// Text rendering used by interpolation and string concatenation. Strings
/// are emitted raw, everything else as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_modes_are_enforced() {
        let env = Env::from_value(json!({"n": 3, "list": [1, 2]}));
        assert_eq!(evaluate(&env, "n > 2", Mode::Bool).unwrap(), json!(true));
        assert!(evaluate(&env, "n + 2", Mode::Bool).is_err());
        assert_eq!(evaluate(&env, "list", Mode::Iterable).unwrap(), json!([1, 2]));
        assert!(evaluate(&env, "n", Mode::Iterable).is_err());
    }

    #[test]
    fn test_errors_name_the_expression() {
        let env = Env::new();
        let err = evaluate(&env, "missing.path", Mode::Any).unwrap_err();
        assert!(matches!(err, FlowError::Expression { ref expression, .. } if expression == "missing.path"));
    }

    #[test]
    fn test_static_analysis() {
        assert_eq!(
            referenced_paths("A.response.status == 200 && get('B.token') != null").unwrap(),
            vec!["A.response.status".to_string(), "B.token".to_string()]
        );
        let decls = ai_declarations("{ id: ai('id', 'user id', 'number') }").unwrap();
        assert_eq!(decls[0].name, "id");
    }

    #[test]
    fn test_reads_are_tracked() {
        let tracker = std::sync::Arc::new(crate::vars::VariableTracker::new());
        let env = Env::from_value(json!({"A": {"response": {"body": {"token": "abc"}}, "other": 1}}))
            .with_tracker(tracker.clone());
        assert_eq!(env.eval("A.response.body.token").unwrap(), json!("abc"));
        let reads = tracker.read_vars();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads["A.response.body.token"], json!("abc"));
    }
}
