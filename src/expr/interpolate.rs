//! `{{ ... }}` substitution.
//!
//! Each placeholder is one of `#env:NAME`, `#file:/path`, a cloud secret
//! reference (`#gcp:`, `#aws:`, `#azure:` with an optional `#field`), or an
//! expression evaluated against the environment.

use super::{stringify, AiDeclaration};
use crate::core::errors::{FlowError, Result};
use crate::vars::{Env, SecretReference};
use serde_json::Value;
use tracing::warn;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Fast-path predicate: without both delimiters the input is returned as is.
pub fn has_vars(raw: &str) -> bool {
    match raw.find(OPEN) {
        Some(start) => raw[start + OPEN.len()..].contains(CLOSE),
        None => false,
    }
}

/// Substitute every placeholder, rendering values as text.
pub async fn interpolate(env: &Env, raw: &str) -> Result<String> {
    if !has_vars(raw) {
        return Ok(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(CLOSE) else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let value = resolve_placeholder(env, after[..end].trim()).await?;
        out.push_str(&stringify(&value));
        rest = &after[end + CLOSE.len()..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Like [`interpolate`], but an input consisting of exactly one placeholder
/// keeps the type of the value it resolves to.
///
/// A string result that itself reads like an expression is evaluated once
/// more. That second evaluation is lenient: on failure the string is kept.
pub async fn interpolate_value(env: &Env, raw: &str) -> Result<Value> {
    let inner = match single_placeholder(raw) {
        Some(inner) => inner,
        None => return interpolate(env, raw).await.map(Value::String),
    };

    let value = resolve_placeholder(env, inner).await?;
    if let Value::String(text) = &value {
        if !inner.starts_with('#') && looks_like_expression(text) {
            match env.eval(text) {
                Ok(evaluated) => return Ok(evaluated),
                Err(err) => {
                    warn!(expression = %text, error = %err, "keeping raw interpolated string");
                }
            }
        }
    }
    Ok(value)
}

/// Trimmed bodies of every `{{ ... }}` in `raw`, left to right.
pub fn placeholders(raw: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = raw;
    while let Some(start) = rest.find(OPEN) {
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(CLOSE) else { break };
        found.push(after[..end].trim());
        rest = &after[end + CLOSE.len()..];
    }
    found
}

/// Variables referenced by the expressions inside `raw`. Env, file and
/// secret references and unparsable placeholders contribute nothing.
pub fn template_variables(raw: &str) -> Vec<String> {
    placeholders(raw)
        .into_iter()
        .filter(|inner| !inner.starts_with('#'))
        .filter_map(|inner| super::referenced_paths(inner).ok())
        .flatten()
        .collect()
}

/// `ai(...)` declarations made inside the placeholders of `raw`.
pub fn template_ai_declarations(raw: &str) -> Vec<AiDeclaration> {
    placeholders(raw)
        .into_iter()
        .filter(|inner| !inner.starts_with('#'))
        .filter_map(|inner| super::ai_declarations(inner).ok())
        .flatten()
        .collect()
}

/// Text outside the braces, whitespace included, disqualifies the input.
fn single_placeholder(raw: &str) -> Option<&str> {
    let body = raw.strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    if body.contains(OPEN) || body.contains(CLOSE) {
        return None;
    }
    Some(body.trim())
}

/// Operators, parentheses, dots or brackets.
pub fn looks_like_expression(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(
            c,
            '+' | '-' | '*' | '/' | '%' | '<' | '>' | '=' | '!' | '&' | '|' | '?' | '(' | ')' | '[' | ']' | '.'
        )
    })
}

async fn resolve_placeholder(env: &Env, inner: &str) -> Result<Value> {
    if let Some(name) = inner.strip_prefix("#env:") {
        let name = name.trim();
        return std::env::var(name).map(Value::String).map_err(|_| FlowError::EnvReference {
            name: name.to_string(),
        });
    }

    if let Some(path) = inner.strip_prefix("#file:") {
        let path = path.trim();
        return tokio::fs::read_to_string(path)
            .await
            .map(Value::String)
            .map_err(|e| FlowError::FileReference {
                path: path.to_string(),
                message: e.to_string(),
            });
    }

    if let Some(reference) = SecretReference::parse(inner) {
        let secret_error = |message: String| FlowError::SecretReference {
            provider: reference.provider.to_string(),
            reference: reference.reference.clone(),
            message,
        };
        let resolver = env
            .secret_resolver()
            .ok_or_else(|| secret_error("no secret resolver configured".to_string()))?;
        return resolver
            .resolve(reference.provider, &reference.reference, &reference.fragment)
            .await
            .map(Value::String)
            .map_err(|e| {
                warn!(provider = %reference.provider, "secret resolution failed");
                secret_error(format!("{:#}", e))
            });
    }

    env.eval(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_has_vars() {
        assert!(has_vars("a {{ b }} c"));
        assert!(!has_vars("plain"));
        assert!(!has_vars("}} before {{"));
        assert!(!has_vars("{{ open"));
    }

    #[tokio::test]
    async fn test_text_without_placeholders_is_untouched() {
        let env = Env::new();
        assert_eq!(interpolate(&env, "no vars #env:X").await.unwrap(), "no vars #env:X");
    }

    #[tokio::test]
    async fn test_multiple_placeholders() {
        let env = Env::from_value(json!({"host": "api.test", "page": 2, "flags": [true]}));
        assert_eq!(
            interpolate(&env, "https://{{host}}/items?p={{ page + 1 }}&f={{flags}}")
                .await
                .unwrap(),
            "https://api.test/items?p=3&f=[true]"
        );
    }

    #[tokio::test]
    async fn test_unclosed_placeholder_is_kept_verbatim() {
        let env = Env::from_value(json!({"a": "A"}));
        assert_eq!(interpolate(&env, "x {{a}} y {{ z").await.unwrap(), "x A y {{ z");
        assert_eq!(
            interpolate(&env, "{{a}}{{a}} tail {{").await.unwrap(),
            "AA tail {{"
        );
    }

    #[tokio::test]
    async fn test_single_placeholder_keeps_type() {
        let env = Env::from_value(json!({"user": {"age": 30, "tags": ["a"]}}));
        assert_eq!(interpolate_value(&env, "{{ user.age }}").await.unwrap(), json!(30));
        assert_eq!(interpolate_value(&env, "{{user.tags}}").await.unwrap(), json!(["a"]));
        assert_eq!(
            interpolate_value(&env, "  {{ user.age }}  ").await.unwrap(),
            json!("  30  ")
        );
        assert_eq!(
            interpolate_value(&env, "age {{ user.age }}").await.unwrap(),
            json!("age 30")
        );
    }

    #[tokio::test]
    async fn test_expression_like_strings_are_reevaluated_leniently() {
        let env = Env::from_value(json!({
            "formula": "base * 2",
            "base": 21,
            "url": "https://example.test/a",
        }));
        assert_eq!(interpolate_value(&env, "{{formula}}").await.unwrap(), json!(42));
        assert_eq!(
            interpolate_value(&env, "{{url}}").await.unwrap(),
            json!("https://example.test/a")
        );
    }

    #[tokio::test]
    async fn test_file_reference() {
        let path = std::env::temp_dir().join(format!("flowrun-interp-{}.txt", std::process::id()));
        tokio::fs::write(&path, "from disk").await.unwrap();
        let env = Env::new();
        let raw = format!("{{{{#file:{}}}}}", path.display());
        assert_eq!(interpolate(&env, &raw).await.unwrap(), "from disk");
        tokio::fs::remove_file(&path).await.unwrap();

        let err = interpolate(&env, "{{#file:/definitely/not/here}}").await.unwrap_err();
        assert!(matches!(err, FlowError::FileReference { .. }));
    }

    #[tokio::test]
    async fn test_secret_without_resolver_fails() {
        let env = Env::new();
        let err = interpolate(&env, "{{#gcp:projects/p/secrets/s#user}}").await.unwrap_err();
        assert!(matches!(err, FlowError::SecretReference { .. }));
        assert!(err.to_string().contains("projects/p/secrets/s"));
    }

    #[tokio::test]
    async fn test_missing_variable_is_an_error() {
        let env = Env::from_value(json!({"a": 1}));
        let err = interpolate(&env, "x={{ b }}").await.unwrap_err();
        assert!(err.to_string().contains("available: a"));
    }

    #[test]
    fn test_template_variables_skip_references() {
        let vars = template_variables("{{ base.url }}/users/{{ user.id }}?k={{#env:KEY}}");
        assert_eq!(vars, vec!["base.url".to_string(), "user.id".to_string()]);
    }
}
