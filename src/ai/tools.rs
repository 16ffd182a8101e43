//! Tool descriptors for the agent: the two built-ins and peer nodes wrapped
//! as callable tools.

use super::llm::ToolDescriptor;
use crate::core::errors::{FlowError, Result};
use crate::flow::FlowNode;
use crate::vars::Env;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

pub const GET_VARIABLE: &str = "get_variable";
pub const SET_VARIABLE: &str = "set_variable";

pub fn is_builtin(name: &str) -> bool {
    name == GET_VARIABLE || name == SET_VARIABLE
}

pub fn builtin_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: GET_VARIABLE.to_string(),
            description: "Read a flow variable by dotted path".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "description": "Dotted path, e.g. user.name"}
                },
                "required": ["key"]
            }),
        },
        ToolDescriptor {
            name: SET_VARIABLE.to_string(),
            description: "Write a flow variable at a dotted path".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "description": "Dotted path, e.g. user.name"},
                    "value": {"description": "Any JSON value"}
                },
                "required": ["key", "value"]
            }),
        },
    ]
}

fn schema_type(kind: &str) -> &'static str {
    match kind.trim().to_ascii_lowercase().as_str() {
        "number" | "float" => "number",
        "integer" | "int" => "integer",
        "boolean" | "bool" => "boolean",
        "object" | "map" => "object",
        "array" | "list" => "array",
        _ => "string",
    }
}

/// Describe `node` as a tool. `ai(...)` declarations become required typed
/// arguments; other referenced variables become optional overrides.
pub fn node_tool(node: &dyn FlowNode) -> ToolDescriptor {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for declaration in node.ai_declarations() {
        if properties.contains_key(&declaration.name) {
            continue;
        }
        properties.insert(
            declaration.name.clone(),
            json!({
                "type": schema_type(&declaration.kind),
                "description": declaration.description,
            }),
        );
        required.push(Value::String(declaration.name));
    }

    let variables: BTreeSet<String> = node.required_variables().into_iter().collect();
    for variable in variables {
        if properties.contains_key(&variable) {
            continue;
        }
        properties.insert(
            variable.clone(),
            json!({"description": format!("Overrides flow variable `{}`", variable)}),
        );
    }

    ToolDescriptor {
        name: node.name().to_string(),
        description: format!("Runs the {} node `{}`", node.kind(), node.name()),
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

/// Parse the model's argument text. Empty text means no arguments.
pub fn parse_arguments(raw: &str) -> std::result::Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("arguments must be a JSON object, got {}", other)),
        Err(e) => Err(format!("arguments are not valid JSON: {}", e)),
    }
}

pub fn validate_arguments(schema: &Value, arguments: &Value) -> std::result::Result<(), String> {
    let validator =
        jsonschema::validator_for(schema).map_err(|e| format!("invalid tool schema: {}", e))?;
    validator
        .validate(arguments)
        .map_err(|e| format!("invalid arguments: {}", e))
}

/// Execute a built-in tool against `env`.
pub fn run_builtin(env: &Env, name: &str, arguments: &Value) -> Result<Value> {
    let key = arguments
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| FlowError::tool(name, "missing string argument 'key'"))?;
    match name {
        GET_VARIABLE => env.get(key),
        SET_VARIABLE => {
            let value = arguments.get("value").cloned().unwrap_or(Value::Null);
            env.set(key, value.clone())?;
            Ok(json!({"key": key, "value": value}))
        }
        other => Err(FlowError::tool(other, "unknown built-in tool")),
    }
}
