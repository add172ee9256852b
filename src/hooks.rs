//! Hooks for intercepting tool execution.
//!
//! A pre-tool-use hook inspects each tool call before it runs and can deny
//! it or rewrite its arguments; a post-tool-use hook observes the outcome.
//! The retrodict layer is built on this: one pre-tool-use hook caps date
//! parameters and denies live-only tools (see [`crate::retrodict`]).
//!
//! Hooks run in registration order; the first hook returning a decision
//! wins.

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Event fired before tool execution.
#[derive(Debug, Clone)]
pub struct PreToolUseEvent {
    /// Fully qualified tool name (`<namespace>__<tool>`).
    pub tool_name: String,
    /// Arguments as emitted by the model.
    pub arguments: Value,
}

/// Event fired after tool execution.
#[derive(Debug, Clone)]
pub struct PostToolUseEvent {
    pub tool_name: String,
    /// Arguments the tool actually ran with (post-modification).
    pub arguments: Value,
    /// Whether the tool returned an error envelope.
    pub is_error: bool,
}

/// Decision returned by a pre-tool-use hook.
#[derive(Debug, Clone)]
pub struct HookDecision {
    /// Whether to continue executing the tool.
    pub continue_execution: bool,
    /// Replacement arguments (overrides the original when set).
    pub modified_arguments: Option<Value>,
    /// Explanation for logging and, on denial, for the error envelope.
    pub reason: Option<String>,
}

impl HookDecision {
    /// Block the tool call; the reason becomes the error envelope text.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            continue_execution: false,
            modified_arguments: None,
            reason: Some(reason.into()),
        }
    }

    /// Continue with replaced arguments.
    pub fn modify(arguments: Value, reason: impl Into<String>) -> Self {
        Self {
            continue_execution: true,
            modified_arguments: Some(arguments),
            reason: Some(reason.into()),
        }
    }
}

type PreToolUseHandler = Arc<
    dyn Fn(PreToolUseEvent) -> Pin<Box<dyn Future<Output = Option<HookDecision>> + Send>>
        + Send
        + Sync,
>;

type PostToolUseHandler =
    Arc<dyn Fn(PostToolUseEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Container for all hooks of a session.
#[derive(Clone, Default)]
pub struct Hooks {
    pre_tool_use: Vec<PreToolUseHandler>,
    post_tool_use: Vec<PostToolUseHandler>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pre-tool-use hook.
    pub fn with_pre_tool_use<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(PreToolUseEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.pre_tool_use
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Add a post-tool-use hook.
    pub fn with_post_tool_use<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(PostToolUseEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.post_tool_use
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Run pre-tool-use hooks; the first decision wins.
    pub async fn run_pre_tool_use(&self, event: PreToolUseEvent) -> Option<HookDecision> {
        for handler in &self.pre_tool_use {
            if let Some(decision) = handler(event.clone()).await {
                return Some(decision);
            }
        }
        None
    }

    /// Run all post-tool-use hooks.
    pub async fn run_post_tool_use(&self, event: PostToolUseEvent) {
        for handler in &self.post_tool_use {
            handler(event.clone()).await;
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("pre_tool_use", &format!("{} handlers", self.pre_tool_use.len()))
            .field(
                "post_tool_use",
                &format!("{} handlers", self.post_tool_use.len()),
            )
            .finish()
    }
}
