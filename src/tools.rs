//! Tool system: definitions, result envelopes, and the registry.
//!
//! Every research capability is a [`Tool`]: a name, a description the model
//! reads, a declared input schema, and an async handler. Tools are grouped
//! into named namespaces ("forecasting", "markets", "financial", "trends",
//! "notes", "sandbox", "composition", "search") and addressed by their fully
//! qualified identifier `<namespace>__<tool>`.
//!
//! The uniform response protocol is the [`ToolResult`] envelope: a list of
//! text content blocks (JSON-encoded payloads) plus an `is_error` flag.
//! Handlers return `Result<Value>`; the registry converts any `Err` into an
//! `is_error = true` envelope before the model sees it. **No exception ever
//! escapes a handler into the model loop** — a failed tool is information
//! the model can recover from, not a crashed run.
//!
//! ## Handler pattern
//!
//! Handlers are stored as `Arc<dyn Fn(Value) -> Pin<Box<dyn Future ...>>>`:
//! boxing erases the concrete future type so heterogeneous tools live in one
//! registry, pinning satisfies the future contract, and `Send + Sync` lets
//! concurrent sub-forecasts share the same tool set.

use crate::hooks::{Hooks, PostToolUseEvent, PreToolUseEvent};
use crate::metrics::MetricsCollector;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Type alias for tool handler functions.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// A request to invoke a tool, as emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub arguments: Value,
}

/// A single text content block in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// The uniform response envelope returned from every tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<TextBlock>,
    pub is_error: bool,
}

impl ToolResult {
    /// Success envelope wrapping a JSON payload.
    pub fn ok(payload: &Value) -> Self {
        Self {
            content: vec![TextBlock::new(
                serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string()),
            )],
            is_error: false,
        }
    }

    /// Error envelope with a message the model can act on.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![TextBlock::new(message)],
            is_error: true,
        }
    }

    /// Concatenated text content, as fed back to the model.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Tool definition: metadata plus an async handler.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: ToolHandler,
}

impl Tool {
    /// Create a tool. The schema accepts the simple `{"param": "type"}`
    /// notation or full JSON Schema; both are normalized to JSON Schema for
    /// the model's tools array.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: convert_schema(input_schema),
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Execute the handler directly (without the envelope conversion the
    /// registry applies).
    pub async fn execute(&self, arguments: Value) -> Result<Value> {
        (self.handler)(arguments).await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Builder for creating tools with a fluent API.
///
/// ```rust
/// # use forecast_agent::tools::tool;
/// # use serde_json::json;
/// let echo = tool("echo", "Echo the arguments back")
///     .param("message", "string")
///     .build(|args| async move { Ok(args) });
/// ```
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: Value,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::json!({}),
        }
    }

    /// Replace the schema wholesale (for optional params or enums).
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    /// Add a required parameter with a simple type string.
    pub fn param(mut self, name: &str, type_str: &str) -> Self {
        if !self.schema.is_object() {
            self.schema = serde_json::json!({});
        }
        let obj = self
            .schema
            .as_object_mut()
            .expect("schema is an object after initialization");
        obj.insert(name.to_string(), Value::String(type_str.to_string()));
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> Tool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Tool::new(self.name, self.description, self.schema, handler)
    }
}

/// Create a tool using the builder pattern (convenience function).
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}

/// Convert simple schema notation to JSON Schema.
///
/// - Full JSON Schema (`type` + `properties` present) passes through.
/// - `{"param": "string"}` expands to properties with all params required.
/// - `{"param": {"type": ..., "optional": true}}` expands with the
///   `optional` flag stripped and honored.
fn convert_schema(schema: Value) -> Value {
    if let Some(obj) = schema.as_object() {
        if obj.contains_key("type") && obj.contains_key("properties") {
            return schema;
        }

        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for (param_name, param_type) in obj {
            if let Some(type_str) = param_type.as_str() {
                properties.insert(param_name.clone(), type_to_json_schema(type_str));
                required.push(param_name.clone());
            } else if param_type.is_object() {
                let mut prop = param_type.clone();
                let prop_obj = prop
                    .as_object_mut()
                    .expect("checked is_object above");
                let is_optional = prop_obj
                    .remove("optional")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let has_default = prop_obj.contains_key("default");
                properties.insert(param_name.clone(), prop);
                if !is_optional && !has_default {
                    required.push(param_name.clone());
                }
            }
        }

        return serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required
        });
    }

    serde_json::json!({ "type": "object", "properties": {}, "required": [] })
}

fn type_to_json_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i64" | "u64" => "integer",
        "number" | "float" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" => "array",
        "object" | "map" => "object",
        _ => "string",
    };
    serde_json::json!({ "type": json_type })
}

// ============================================================================
// ARGUMENT EXTRACTION HELPERS
// ============================================================================
// Handlers validate their inputs against the declared schema; a mismatch is
// an InvalidInput error that the registry converts to an error envelope.

/// Required string argument.
pub fn str_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::invalid_input(format!("Missing or empty '{name}' parameter")))
}

/// Optional string argument.
pub fn opt_str_arg<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Required integer argument.
pub fn u64_arg(args: &Value, name: &str) -> Result<u64> {
    args.get(name)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| Error::invalid_input(format!("Missing or invalid '{name}' parameter")))
}

/// Optional integer argument with a default.
pub fn u64_arg_or(args: &Value, name: &str, default: u64) -> u64 {
    args.get(name).and_then(|v| v.as_u64()).unwrap_or(default)
}

/// Optional integer argument clamped to a range.
pub fn limit_arg(args: &Value, name: &str, default: usize, max: usize) -> usize {
    (u64_arg_or(args, name, default as u64) as usize).clamp(1, max)
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Join a namespace and tool name into the fully qualified identifier.
pub fn qualified_name(namespace: &str, tool_name: &str) -> String {
    format!("{namespace}__{tool_name}")
}

struct RegisteredTool {
    namespace: String,
    tool: Tool,
}

/// Registry of tools for one forecast session, keyed by qualified name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under a namespace.
    pub fn register(&mut self, namespace: &str, tool: Tool) {
        let qualified = qualified_name(namespace, tool.name());
        self.tools.insert(
            qualified,
            RegisteredTool {
                namespace: namespace.to_string(),
                tool,
            },
        );
    }

    /// Register several tools under the same namespace.
    pub fn register_all(&mut self, namespace: &str, tools: Vec<Tool>) {
        for tool in tools {
            self.register(namespace, tool);
        }
    }

    pub fn get(&self, qualified: &str) -> Option<&Tool> {
        self.tools.get(qualified).map(|r| &r.tool)
    }

    /// All registered qualified names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Tool definitions in the model API's function-calling format,
    /// restricted to the allowed set. The model only sees tools it can call.
    pub fn model_tool_definitions(&self, allowed: &[String]) -> Vec<Value> {
        self.tools
            .iter()
            .filter(|(name, _)| allowed.iter().any(|a| a == *name))
            .map(|(name, registered)| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": registered.tool.description(),
                        "parameters": registered.tool.input_schema(),
                    }
                })
            })
            .collect()
    }

    /// Markdown documentation for the allowed tools, grouped by namespace.
    /// Appended to the system prompt.
    pub fn docs_markdown(&self, allowed: &[String]) -> String {
        let mut by_namespace: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
        for (name, registered) in &self.tools {
            if allowed.iter().any(|a| a == name) {
                by_namespace
                    .entry(registered.namespace.as_str())
                    .or_default()
                    .push((registered.tool.name(), registered.tool.description()));
            }
        }

        let mut lines = vec!["## Available Tools".to_string(), String::new()];
        for (namespace, tools) in by_namespace {
            lines.push(format!("### {}", title_case(namespace)));
            lines.push(String::new());
            for (tool_name, description) in tools {
                lines.push(format!("- **{tool_name}**: {description}"));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }

    /// Dispatch a tool call: apply pre-tool-use hooks (deny or modify
    /// arguments), execute, convert any handler error into an error
    /// envelope, apply post-tool-use hooks, and record metrics.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        hooks: &Hooks,
        metrics: &MetricsCollector,
    ) -> ToolResult {
        let start = Instant::now();

        let result = self.dispatch_inner(call, hooks).await;

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics.record(&call.tool_name, duration_ms, result.is_error);
        result
    }

    async fn dispatch_inner(&self, call: &ToolCall, hooks: &Hooks) -> ToolResult {
        let Some(registered) = self.tools.get(&call.tool_name) else {
            return ToolResult::error(format!("Unknown tool: {}", call.tool_name));
        };

        let mut arguments = call.arguments.clone();

        let pre_event = PreToolUseEvent {
            tool_name: call.tool_name.clone(),
            arguments: arguments.clone(),
        };
        if let Some(decision) = hooks.run_pre_tool_use(pre_event).await {
            if !decision.continue_execution {
                let reason = decision
                    .reason
                    .unwrap_or_else(|| "Tool call denied".to_string());
                log::info!("Tool {} denied: {}", call.tool_name, reason);
                return ToolResult::error(reason);
            }
            if let Some(modified) = decision.modified_arguments {
                log::debug!(
                    "Tool {} arguments modified by hook: {}",
                    call.tool_name,
                    decision.reason.as_deref().unwrap_or("")
                );
                arguments = modified;
            }
        }

        let result = match registered.tool.execute(arguments.clone()).await {
            Ok(payload) => ToolResult::ok(&payload),
            Err(e) => {
                log::warn!("Tool {} failed: {}", call.tool_name, e);
                ToolResult::error(e.to_string())
            }
        };

        let post_event = PostToolUseEvent {
            tool_name: call.tool_name.clone(),
            arguments,
            is_error: result.is_error,
        };
        hooks.run_post_tool_use(post_event).await;

        result
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookDecision;
    use serde_json::json;

    #[test]
    fn test_convert_simple_schema() {
        let schema = json!({"query": "string", "num_results": "integer"});
        let result = convert_schema(schema);

        assert_eq!(result["type"], "object");
        assert_eq!(result["properties"]["query"]["type"], "string");
        assert_eq!(result["properties"]["num_results"]["type"], "integer");
        let required = result["required"].as_array().unwrap();
        assert!(required.contains(&json!("query")));
        assert!(required.contains(&json!("num_results")));
    }

    #[test]
    fn test_convert_schema_optional_param() {
        let schema = json!({
            "query": {"type": "string"},
            "limit": {"type": "integer", "optional": true}
        });
        let result = convert_schema(schema);
        let required = result["required"].as_array().unwrap();
        assert!(required.contains(&json!("query")));
        assert!(!required.contains(&json!("limit")));
        // The optional marker is stripped from the property
        assert!(result["properties"]["limit"].get("optional").is_none());
    }

    #[test]
    fn test_convert_full_schema_passthrough() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        assert_eq!(convert_schema(schema.clone()), schema);
    }

    #[tokio::test]
    async fn test_tool_builder_and_execute() {
        let add = tool("add", "Add two numbers")
            .param("a", "number")
            .param("b", "number")
            .build(|args| async move {
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                Ok(json!({"result": a + b}))
            });

        let result = add.execute(json!({"a": 5.0, "b": 3.0})).await.unwrap();
        assert_eq!(result["result"], 8.0);
    }

    #[tokio::test]
    async fn test_dispatch_wraps_success() {
        let mut registry = ToolRegistry::new();
        registry.register(
            "testing",
            tool("echo", "Echo").build(|args| async move { Ok(args) }),
        );

        let call = ToolCall {
            tool_name: "testing__echo".to_string(),
            arguments: json!({"x": 1}),
        };
        let result = registry
            .dispatch(&call, &Hooks::new(), &MetricsCollector::new())
            .await;

        assert!(!result.is_error);
        assert_eq!(result.text(), r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn test_dispatch_converts_error_to_envelope() {
        let mut registry = ToolRegistry::new();
        registry.register(
            "testing",
            tool("boom", "Always fails")
                .build(|_| async move { Err::<Value, _>(Error::tool("it broke")) }),
        );

        let call = ToolCall {
            tool_name: "testing__boom".to_string(),
            arguments: json!({}),
        };
        let result = registry
            .dispatch(&call, &Hooks::new(), &MetricsCollector::new())
            .await;

        assert!(result.is_error);
        assert!(result.text().contains("it broke"));
        assert!(!result.content.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            tool_name: "nope__missing".to_string(),
            arguments: json!({}),
        };
        let result = registry
            .dispatch(&call, &Hooks::new(), &MetricsCollector::new())
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_dispatch_hook_deny() {
        let mut registry = ToolRegistry::new();
        registry.register(
            "markets",
            tool("stock_price", "Live price").build(|_| async move { Ok(json!({"price": 1})) }),
        );

        let hooks = Hooks::new().with_pre_tool_use(|event| async move {
            if event.tool_name.contains("stock_price") {
                return Some(HookDecision::deny("live prices unavailable"));
            }
            None
        });

        let call = ToolCall {
            tool_name: "markets__stock_price".to_string(),
            arguments: json!({"query": "TSLA"}),
        };
        let result = registry
            .dispatch(&call, &hooks, &MetricsCollector::new())
            .await;
        assert!(result.is_error);
        assert!(result.text().contains("live prices unavailable"));
    }

    #[tokio::test]
    async fn test_dispatch_hook_modifies_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(
            "financial",
            tool("fred_series", "FRED").build(|args| async move { Ok(args) }),
        );

        let hooks = Hooks::new().with_pre_tool_use(|event| async move {
            let mut args = event.arguments.clone();
            args["observation_end"] = json!("2026-01-15");
            Some(HookDecision::modify(args, "capped to cutoff"))
        });

        let call = ToolCall {
            tool_name: "financial__fred_series".to_string(),
            arguments: json!({"series_id": "DGS10"}),
        };
        let result = registry
            .dispatch(&call, &hooks, &MetricsCollector::new())
            .await;
        assert!(!result.is_error);
        assert!(result.text().contains("2026-01-15"));
    }

    #[test]
    fn test_docs_markdown_only_allowed() {
        let mut registry = ToolRegistry::new();
        registry.register(
            "forecasting",
            tool("search_exa", "Web search").build(|a| async move { Ok(a) }),
        );
        registry.register(
            "markets",
            tool("stock_price", "Live price").build(|a| async move { Ok(a) }),
        );

        let docs = registry.docs_markdown(&["forecasting__search_exa".to_string()]);
        assert!(docs.contains("search_exa"));
        assert!(docs.contains("### Forecasting"));
        assert!(!docs.contains("stock_price"));
    }

    #[test]
    fn test_model_tool_definitions_filtered() {
        let mut registry = ToolRegistry::new();
        registry.register(
            "notes",
            tool("notes", "Notes").param("mode", "string").build(|a| async move { Ok(a) }),
        );
        registry.register(
            "sandbox",
            tool("execute_code", "Run code").build(|a| async move { Ok(a) }),
        );

        let defs = registry.model_tool_definitions(&["notes__notes".to_string()]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0]["function"]["name"], "notes__notes");
        assert_eq!(defs[0]["type"], "function");
    }

    #[test]
    fn test_arg_helpers() {
        let args = json!({"query": "tesla", "limit": 5});
        assert_eq!(str_arg(&args, "query").unwrap(), "tesla");
        assert!(str_arg(&args, "missing").is_err());
        assert_eq!(u64_arg_or(&args, "limit", 10), 5);
        assert_eq!(u64_arg_or(&args, "missing", 10), 10);
        assert_eq!(limit_arg(&args, "limit", 10, 3), 3); // clamped
        assert_eq!(opt_str_arg(&args, "query"), Some("tesla"));
        assert_eq!(opt_str_arg(&args, "missing"), None);
    }
}
