//! Model session: the research loop between the reasoning model and the
//! tool registry.
//!
//! The session speaks the OpenAI-compatible streaming chat-completions
//! protocol: tools are declared up front, the final answer is constrained
//! by a JSON schema via `response_format`, and each turn's stream is
//! aggregated into text and tool-call blocks. Tool calls are dispatched
//! through the registry (which applies hooks and converts failures into
//! error envelopes), their results go back as `role: "tool"` messages, and
//! the loop continues until the model emits a final text-only turn — the
//! structured forecast.
//!
//! Within a session, tool calls run strictly in the order the model emits
//! them, and all results are returned before the next turn begins.

use crate::hooks::Hooks;
use crate::metrics::MetricsCollector;
use crate::sse::{ChunkAggregator, ContentBlock, chat_chunk_stream};
use crate::tools::{ToolCall, ToolRegistry};
use crate::types::{
    ChatFunctionCall, ChatMessage, ChatRequest, ChatToolCall, ResponseFormat, TokenUsage,
};
use crate::{Error, Result};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Configuration for a model session.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// HTTP timeout per model request, seconds.
    pub timeout: u64,
    /// Cap on model turns for the whole session.
    pub max_turns: u32,
    /// Structured-output schema for the final answer.
    pub response_format: Option<ResponseFormat>,
}

impl ModelOptions {
    pub fn builder() -> ModelOptionsBuilder {
        ModelOptionsBuilder::default()
    }
}

/// Builder for [`ModelOptions`].
#[derive(Default)]
pub struct ModelOptionsBuilder {
    model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    system_prompt: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: u64,
    max_turns: u32,
    response_format: Option<ResponseFormat>,
}

impl ModelOptionsBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn build(self) -> Result<ModelOptions> {
        let model = self
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| Error::config("model is required"))?;
        let base_url = self
            .base_url
            .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
            .ok_or_else(|| Error::config("base_url must start with http:// or https://"))?;

        Ok(ModelOptions {
            model,
            base_url,
            api_key: self.api_key.unwrap_or_else(|| "not-needed".to_string()),
            system_prompt: self.system_prompt,
            temperature: if self.temperature == 0.0 { 0.7 } else { self.temperature },
            max_tokens: self.max_tokens,
            timeout: if self.timeout == 0 { 600 } else { self.timeout },
            max_turns: if self.max_turns == 0 { 100 } else { self.max_turns },
            response_format: self.response_format,
        })
    }
}

/// Outcome of a completed model session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// The final structured output, when the model produced parseable JSON.
    pub structured_output: Option<Value>,
    /// Concatenated reasoning text across all turns.
    pub reasoning: String,
    /// Every tool call the model made, in order.
    pub tool_calls: Vec<ToolCall>,
    /// Aggregated token usage across turns.
    pub usage: TokenUsage,
    /// Number of model turns consumed.
    pub turns: u32,
}

/// A model session driving one forecast.
pub struct ModelSession {
    options: ModelOptions,
    tool_definitions: Vec<Value>,
    history: Vec<ChatMessage>,
    interrupted: Arc<AtomicBool>,
}

impl ModelSession {
    /// Open a session. `tool_definitions` is the registry's function-call
    /// format for the allowed tool set: the model only sees tools it can
    /// actually call.
    pub fn new(options: ModelOptions, tool_definitions: Vec<Value>) -> Self {
        Self {
            options,
            tool_definitions,
            history: Vec::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for cancelling the session from another task. The loop checks
    /// the flag between turns; in-flight HTTP calls are dropped with the
    /// run future.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    fn build_request(&self) -> ChatRequest {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if !self.options.system_prompt.is_empty() {
            messages.push(ChatMessage::system(self.options.system_prompt.clone()));
        }
        messages.extend(self.history.iter().cloned());

        ChatRequest {
            model: self.options.model.clone(),
            messages,
            stream: true,
            max_tokens: self.options.max_tokens,
            temperature: Some(self.options.temperature),
            tools: (!self.tool_definitions.is_empty()).then(|| self.tool_definitions.clone()),
            response_format: self.options.response_format.clone(),
        }
    }

    /// One model turn: send the conversation, aggregate the streamed
    /// response into blocks.
    async fn turn(&self) -> Result<(Vec<ContentBlock>, Option<TokenUsage>)> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.options.timeout))
            .build()?;

        let url = format!("{}/chat/completions", self.options.base_url);
        let response = client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.options.api_key))
            .header("Content-Type", "application/json")
            .json(&self.build_request())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            // Credit exhaustion is reported through the error body and
            // carries a reset time the caller can sleep until.
            if let Some(credit_error) = crate::error::parse_credit_exhausted(&body) {
                return Err(credit_error);
            }
            return Err(Error::api(format!("API error {status}: {body}")));
        }

        let mut aggregator = ChunkAggregator::new();
        let mut stream = chat_chunk_stream(response);
        let mut blocks = Vec::new();

        while let Some(chunk) = stream.next().await {
            let completed = aggregator.process_chunk(chunk?)?;
            blocks.extend(completed);
        }

        let usage = aggregator.usage().map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            ..Default::default()
        });

        Ok((blocks, usage))
    }

    /// Run the session to completion: feed the prompt, dispatch tool calls
    /// through the registry until the model emits a final text-only turn,
    /// and parse that turn as the structured output.
    pub async fn run(
        &mut self,
        prompt: &str,
        registry: &ToolRegistry,
        hooks: &Hooks,
        metrics: &MetricsCollector,
        stream_thinking: bool,
    ) -> Result<SessionOutcome> {
        self.history.push(ChatMessage::user(prompt));

        let mut reasoning = String::new();
        let mut all_tool_calls = Vec::new();
        let mut usage = TokenUsage::default();
        let mut turns = 0u32;

        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                return Err(Error::other("Model session interrupted"));
            }
            if turns >= self.options.max_turns {
                log::warn!(
                    "Turn cap ({}) reached without structured output",
                    self.options.max_turns
                );
                return Ok(SessionOutcome {
                    structured_output: None,
                    reasoning,
                    tool_calls: all_tool_calls,
                    usage,
                    turns,
                });
            }
            turns += 1;

            let (blocks, turn_usage) = self.turn().await?;
            if let Some(turn_usage) = turn_usage {
                usage.input_tokens += turn_usage.input_tokens;
                usage.output_tokens += turn_usage.output_tokens;
            }

            let mut text_parts: Vec<String> = Vec::new();
            let mut tool_uses: Vec<(String, String, Value)> = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::Text(text) => text_parts.push(text),
                    ContentBlock::ToolUse {
                        id,
                        name,
                        arguments,
                    } => tool_uses.push((id, name, arguments)),
                }
            }

            let turn_text = text_parts.join("");
            if !turn_text.is_empty() {
                if stream_thinking {
                    println!("{turn_text}");
                }
                reasoning.push_str(&turn_text);
                reasoning.push('\n');
            }

            if tool_uses.is_empty() {
                // Final turn: the text is the structured answer.
                let structured_output = parse_structured_output(&turn_text);
                if structured_output.is_none() {
                    log::warn!("Final model turn was not parseable structured output");
                }
                return Ok(SessionOutcome {
                    structured_output,
                    reasoning,
                    tool_calls: all_tool_calls,
                    usage,
                    turns,
                });
            }

            // Echo the assistant turn (text + tool calls) into history, then
            // dispatch each call in order and append its result.
            let chat_tool_calls: Vec<ChatToolCall> = tool_uses
                .iter()
                .map(|(id, name, arguments)| ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatFunctionCall {
                        name: name.clone(),
                        arguments: arguments.to_string(),
                    },
                })
                .collect();
            self.history.push(ChatMessage::assistant_with_tool_calls(
                turn_text,
                chat_tool_calls,
            ));

            for (id, name, arguments) in tool_uses {
                if stream_thinking {
                    println!("[tool] {name}");
                }
                let call = ToolCall {
                    tool_name: name,
                    arguments,
                };
                let result = registry.dispatch(&call, hooks, metrics).await;
                let content = if result.is_error {
                    format!("Error: {}", result.text())
                } else {
                    result.text()
                };
                self.history.push(ChatMessage::tool_result(id, content));
                all_tool_calls.push(call);
            }
        }
    }
}

/// Parse the model's final text as JSON structured output. Tolerates a
/// fenced code block around the JSON.
fn parse_structured_output(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value.is_object().then_some(value);
    }

    // ```json ... ``` fences
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.rsplit_once("```"))
        .map(|(body, _)| body.trim())?;
    serde_json::from_str::<Value>(unfenced)
        .ok()
        .filter(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_options_builder_validation() {
        assert!(ModelOptions::builder().build().is_err());
        assert!(
            ModelOptions::builder()
                .model("reasoner-large")
                .base_url("not-a-url")
                .build()
                .is_err()
        );

        let options = ModelOptions::builder()
            .model("reasoner-large")
            .base_url("http://localhost:1234/v1")
            .max_turns(20)
            .build()
            .unwrap();
        assert_eq!(options.max_turns, 20);
        assert_eq!(options.api_key, "not-needed");
        assert_eq!(options.temperature, 0.7);
    }

    #[test]
    fn test_build_request_includes_system_and_tools() {
        let options = ModelOptions::builder()
            .model("m")
            .base_url("http://localhost/v1")
            .system_prompt("You are a forecaster")
            .response_format(ResponseFormat::json_schema("forecast", json!({"type": "object"})))
            .build()
            .unwrap();
        let mut session = ModelSession::new(options, vec![json!({"type": "function"})]);
        session.history.push(ChatMessage::user("hello"));

        let request = session.build_request();
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].role, "user");
        assert!(request.stream);
        assert!(request.tools.is_some());
        assert!(request.response_format.is_some());
    }

    #[test]
    fn test_parse_structured_output_forms() {
        assert_eq!(
            parse_structured_output(r#"{"probability": 0.7}"#).unwrap()["probability"],
            0.7
        );
        assert_eq!(
            parse_structured_output("```json\n{\"a\": 1}\n```").unwrap()["a"],
            1
        );
        assert_eq!(
            parse_structured_output("```\n{\"a\": 2}\n```").unwrap()["a"],
            2
        );
        assert!(parse_structured_output("no json here").is_none());
        assert!(parse_structured_output("[1, 2, 3]").is_none()); // not an object
        assert!(parse_structured_output("").is_none());
    }

    #[test]
    fn test_interrupt_handle() {
        let options = ModelOptions::builder()
            .model("m")
            .base_url("http://localhost/v1")
            .build()
            .unwrap();
        let session = ModelSession::new(options, vec![]);
        let handle = session.interrupt_handle();
        assert!(!handle.load(Ordering::SeqCst));
        handle.store(true, Ordering::SeqCst);
        assert!(session.interrupted.load(Ordering::SeqCst));
    }
}
