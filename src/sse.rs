//! Streaming-response plumbing for the model session.
//!
//! The model API streams chat completions as Server-Sent Events. Two
//! problems are solved here:
//!
//! 1. **Event parsing**: the raw byte stream becomes a stream of
//!    [`ChatChunk`]s (the `[DONE]` sentinel is not JSON and is skipped).
//! 2. **Tool-call aggregation**: tool calls arrive as incremental deltas —
//!    the id and name in one chunk, the JSON argument string split across
//!    several more, possibly interleaved between multiple calls. The
//!    [`ChunkAggregator`] accumulates deltas by index and only emits
//!    complete blocks when a `finish_reason` arrives.

use crate::types::{ChatChunk, ChatUsage};
use crate::{Error, Result};
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;

/// A completed content block from one model turn.
#[derive(Debug, Clone)]
pub enum ContentBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        arguments: Value,
    },
}

/// Parse an HTTP response body as a stream of chat chunks.
pub fn chat_chunk_stream(
    response: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>> {
    let stream = response
        .bytes_stream()
        .eventsource()
        .filter_map(|event| async move {
            let event = match event {
                Ok(event) => event,
                Err(e) => return Some(Err(Error::stream(format!("SSE error: {e}")))),
            };
            if event.data == "[DONE]" {
                return None;
            }
            match serde_json::from_str::<ChatChunk>(&event.data) {
                Ok(chunk) => Some(Ok(chunk)),
                Err(e) => Some(Err(Error::stream(format!("Failed to parse chunk: {e}")))),
            }
        });
    Box::pin(stream)
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    /// Accumulated JSON argument string; may be split at arbitrary byte
    /// positions across chunks, so it is only parsed once complete.
    arguments: String,
}

/// Stateful accumulator turning chunk deltas into complete content blocks.
#[derive(Default)]
pub struct ChunkAggregator {
    text_buffer: String,
    tool_calls: HashMap<u32, PartialToolCall>,
    usage: Option<ChatUsage>,
    finish_reason: Option<String>,
}

impl ChunkAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one chunk. Returns completed blocks when the chunk carries a
    /// `finish_reason`, an empty vector otherwise.
    pub fn process_chunk(&mut self, chunk: ChatChunk) -> Result<Vec<ContentBlock>> {
        if chunk.usage.is_some() {
            self.usage = chunk.usage.clone();
        }

        let mut blocks = Vec::new();

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                self.text_buffer.push_str(&content);
            }

            if let Some(tool_calls) = choice.delta.tool_calls {
                for delta in tool_calls {
                    let entry = self.tool_calls.entry(delta.index).or_default();
                    if let Some(id) = delta.id {
                        entry.id = Some(id);
                    }
                    if let Some(function) = delta.function {
                        if let Some(name) = function.name {
                            entry.name = Some(name);
                        }
                        if let Some(arguments) = function.arguments {
                            entry.arguments.push_str(&arguments);
                        }
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);

                if !self.text_buffer.is_empty() {
                    blocks.push(ContentBlock::Text(std::mem::take(&mut self.text_buffer)));
                }

                let mut completed: Vec<(u32, PartialToolCall)> =
                    self.tool_calls.drain().collect();
                completed.sort_by_key(|(index, _)| *index);

                for (_, partial) in completed {
                    // Tool calls without id and name are malformed fragments
                    let (Some(id), Some(name)) = (partial.id, partial.name) else {
                        continue;
                    };
                    let arguments: Value = if partial.arguments.is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&partial.arguments).map_err(|e| {
                            Error::stream(format!("Failed to parse tool arguments: {e}"))
                        })?
                    };
                    blocks.push(ContentBlock::ToolUse {
                        id,
                        name,
                        arguments,
                    });
                }
            }
        }

        Ok(blocks)
    }

    /// Usage reported on the final chunk, when the provider sends one.
    pub fn usage(&self) -> Option<&ChatUsage> {
        self.usage.as_ref()
    }

    /// The finish reason of the last completed turn.
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(body: &str) -> ChatChunk {
        serde_json::from_str(body).expect("test chunk parses")
    }

    #[test]
    fn test_text_aggregation() {
        let mut aggregator = ChunkAggregator::new();

        let blocks = aggregator
            .process_chunk(chunk(
                r#"{"choices":[{"delta":{"content":"Hello "},"finish_reason":null}]}"#,
            ))
            .unwrap();
        assert!(blocks.is_empty()); // not finished yet

        let blocks = aggregator
            .process_chunk(chunk(
                r#"{"choices":[{"delta":{"content":"world"},"finish_reason":"stop"}]}"#,
            ))
            .unwrap();
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            ContentBlock::Text(text) => assert_eq!(text, "Hello world"),
            _ => panic!("expected text block"),
        }
        assert_eq!(aggregator.finish_reason(), Some("stop"));
    }

    #[test]
    fn test_tool_call_delta_assembly() {
        let mut aggregator = ChunkAggregator::new();

        aggregator
            .process_chunk(chunk(
                r#"{"choices":[{"delta":{"tool_calls":[
                    {"index":0,"id":"call_123","function":{"name":"forecasting__search_exa","arguments":"{\"query\":"}}
                ]},"finish_reason":null}]}"#,
            ))
            .unwrap();
        let blocks = aggregator
            .process_chunk(chunk(
                r#"{"choices":[{"delta":{"tool_calls":[
                    {"index":0,"function":{"arguments":"\"tesla\"}"}}
                ]},"finish_reason":"tool_calls"}]}"#,
            ))
            .unwrap();

        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            ContentBlock::ToolUse {
                id,
                name,
                arguments,
            } => {
                assert_eq!(id, "call_123");
                assert_eq!(name, "forecasting__search_exa");
                assert_eq!(arguments["query"], "tesla");
            }
            _ => panic!("expected tool use block"),
        }
    }

    #[test]
    fn test_interleaved_tool_calls_ordered_by_index() {
        let mut aggregator = ChunkAggregator::new();

        aggregator
            .process_chunk(chunk(
                r#"{"choices":[{"delta":{"tool_calls":[
                    {"index":1,"id":"call_b","function":{"name":"beta","arguments":"{}"}},
                    {"index":0,"id":"call_a","function":{"name":"alpha","arguments":"{}"}}
                ]},"finish_reason":null}]}"#,
            ))
            .unwrap();
        let blocks = aggregator
            .process_chunk(chunk(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#))
            .unwrap();

        assert_eq!(blocks.len(), 2);
        match (&blocks[0], &blocks[1]) {
            (
                ContentBlock::ToolUse { name: first, .. },
                ContentBlock::ToolUse { name: second, .. },
            ) => {
                assert_eq!(first, "alpha");
                assert_eq!(second, "beta");
            }
            _ => panic!("expected two tool use blocks"),
        }
    }

    #[test]
    fn test_empty_arguments_default_to_object() {
        let mut aggregator = ChunkAggregator::new();
        aggregator
            .process_chunk(chunk(
                r#"{"choices":[{"delta":{"tool_calls":[
                    {"index":0,"id":"c","function":{"name":"notes__notes"}}
                ]},"finish_reason":null}]}"#,
            ))
            .unwrap();
        let blocks = aggregator
            .process_chunk(chunk(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#))
            .unwrap();
        match &blocks[0] {
            ContentBlock::ToolUse { arguments, .. } => {
                assert_eq!(arguments, &serde_json::json!({}));
            }
            _ => panic!("expected tool use block"),
        }
    }

    #[test]
    fn test_corrupt_arguments_error() {
        let mut aggregator = ChunkAggregator::new();
        aggregator
            .process_chunk(chunk(
                r#"{"choices":[{"delta":{"tool_calls":[
                    {"index":0,"id":"c","function":{"name":"x","arguments":"{not json"}}
                ]},"finish_reason":null}]}"#,
            ))
            .unwrap();
        let result = aggregator
            .process_chunk(chunk(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#));
        assert!(result.is_err());
    }

    #[test]
    fn test_usage_captured() {
        let mut aggregator = ChunkAggregator::new();
        aggregator
            .process_chunk(chunk(
                r#"{"choices":[],"usage":{"prompt_tokens":120,"completion_tokens":45}}"#,
            ))
            .unwrap();
        let usage = aggregator.usage().unwrap();
        assert_eq!(usage.prompt_tokens, 120);
        assert_eq!(usage.completion_tokens, 45);
    }
}
