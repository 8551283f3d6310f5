// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `${...}` template substitution over a node's parameter tree, resolved
//! immediately before its handler runs (spec.md §4.3). No regex crate: the
//! `${...}` scanner is hand-written, matching the Safe Expression
//! Evaluator's "no host parser" ethos for anything that touches untrusted
//! workflow documents.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::domain::execution::ExecutionContext;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("environment variable not set: {0}")]
    MissingEnv(String),
}

/// Resolve every `${...}` reference in `params` against `ctx`'s merged
/// results/variables/params view.
pub fn resolve_params(
    params: &HashMap<String, Value>,
    ctx: &ExecutionContext,
) -> Result<HashMap<String, Value>, TemplateError> {
    let merged = ctx.merged_values();
    let mut resolved = HashMap::with_capacity(params.len());
    for (k, v) in params {
        resolved.insert(k.clone(), resolve_value(v, &merged)?);
    }
    Ok(resolved)
}

pub fn resolve_value(value: &Value, merged: &HashMap<String, Value>) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => resolve_string(s, merged),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value(item, merged)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, merged)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, merged: &HashMap<String, Value>) -> Result<Value, TemplateError> {
    if let Some(expr) = whole_string_reference(s) {
        return resolve_reference(expr, merged);
    }

    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let expr = &after[..end];
        let resolved = resolve_reference(expr, merged)?;
        out.push_str(&value_as_text(&resolved));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

/// `Some(expr)` iff the entire string is exactly one `${...}` reference
/// with no surrounding text — in which case the raw (non-stringified)
/// value is returned rather than a text substitution (spec.md §4.3).
fn whole_string_reference(s: &str) -> Option<&str> {
    let trimmed = s.strip_prefix("${")?;
    let inner = trimmed.strip_suffix('}')?;
    if inner.contains("${") {
        return None;
    }
    Some(inner)
}

fn resolve_reference(expr: &str, merged: &HashMap<String, Value>) -> Result<Value, TemplateError> {
    if let Some(name) = expr.strip_prefix("env:") {
        return std::env::var(name).map(Value::String).map_err(|_| TemplateError::MissingEnv(name.to_string()));
    }

    let mut parts = expr.split('.');
    let root = parts.next().unwrap_or("");
    let mut current = merged.get(root).cloned().unwrap_or(Value::Null);
    for part in parts {
        current = match current {
            Value::Object(ref map) => map.get(part).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    Ok(current)
}

fn value_as_text(v: &Value) -> String {
    v.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::ExecutionContext;
    use crate::domain::workflow::NodeId;

    fn ctx_with(node: &str, value: Value, var: &str, var_value: Value) -> ExecutionContext {
        let mut ctx = ExecutionContext::new("wf", HashMap::new());
        ctx.results.insert(NodeId(node.to_string()), value);
        ctx.variables.insert(var.to_string(), var_value);
        ctx
    }

    #[test]
    fn whole_string_returns_raw_value() {
        let ctx = ctx_with("step1", serde_json::json!({"a": 1}), "x", Value::Null);
        let resolved = resolve_value(&Value::String("${step1}".to_string()), &ctx.merged_values()).unwrap();
        assert_eq!(resolved, serde_json::json!({"a": 1}));
    }

    #[test]
    fn nested_path_missing_intermediate_is_null() {
        let ctx = ctx_with("step1", serde_json::json!({"a": 1}), "x", Value::Null);
        let resolved = resolve_value(&Value::String("${step1.b.c}".to_string()), &ctx.merged_values()).unwrap();
        assert_eq!(resolved, Value::Null);
    }

    #[test]
    fn embedded_reference_serialises_as_text() {
        let ctx = ctx_with("step1", serde_json::json!(42), "x", Value::Null);
        let resolved = resolve_value(&Value::String("value is ${step1}!".to_string()), &ctx.merged_values()).unwrap();
        assert_eq!(resolved, Value::String("value is 42!".to_string()));
    }

    #[test]
    fn embedded_string_reference_keeps_its_json_quoting() {
        let ctx = ctx_with("step1", serde_json::json!("Berlin"), "x", Value::Null);
        let resolved = resolve_value(&Value::String("city is ${step1}!".to_string()), &ctx.merged_values()).unwrap();
        assert_eq!(resolved, Value::String("city is \"Berlin\"!".to_string()));
    }

    #[test]
    fn embedded_null_reference_renders_the_literal_null() {
        let ctx = ctx_with("step1", Value::Null, "x", Value::Null);
        let resolved = resolve_value(&Value::String("result: ${step1.missing}".to_string()), &ctx.merged_values()).unwrap();
        assert_eq!(resolved, Value::String("result: null".to_string()));
    }

    #[test]
    fn missing_env_var_fails() {
        let ctx = ctx_with("step1", Value::Null, "x", Value::Null);
        let result = resolve_value(&Value::String("${env:DEFINITELY_NOT_SET_VAR}".to_string()), &ctx.merged_values());
        assert!(matches!(result, Err(TemplateError::MissingEnv(_))));
    }
}
