//! OpenAI-Compatible SSE Adapter
//!
//! Translates `chat.completions` stream chunks into unified events. Tool call
//! fragments are keyed by their `index`, so parallel calls interleaved in one
//! stream are reassembled independently.

use std::collections::BTreeMap;

use plan_mode_core::streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ChunkEvent {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    reasoning_tokens: Option<u32>,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    announced: bool,
}

/// Adapter for OpenAI-compatible SSE streams
pub struct OpenAIAdapter {
    model: String,
    in_reasoning: bool,
    pending_tools: BTreeMap<usize, PendingToolCall>,
}

impl OpenAIAdapter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            in_reasoning: false,
            pending_tools: BTreeMap::new(),
        }
    }

    fn model_supports_reasoning(&self) -> bool {
        let model = self.model.to_lowercase();
        model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
    }

    fn close_reasoning(&mut self, events: &mut Vec<UnifiedStreamEvent>) {
        if self.in_reasoning {
            self.in_reasoning = false;
            events.push(UnifiedStreamEvent::ThinkingEnd { thinking_id: None });
        }
    }

    /// Emit `ToolComplete` for every reassembled call, in index order.
    fn flush_tools(&mut self, events: &mut Vec<UnifiedStreamEvent>) {
        for (index, pending) in std::mem::take(&mut self.pending_tools) {
            let Some(name) = pending.name else {
                continue;
            };
            let arguments = if pending.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                pending.arguments
            };
            events.push(UnifiedStreamEvent::ToolComplete {
                tool_id: pending.id.unwrap_or_else(|| format!("call_{}", index)),
                tool_name: name,
                arguments,
            });
        }
    }

    fn absorb_tool_fragment(&mut self, fragment: ChunkToolCall, events: &mut Vec<UnifiedStreamEvent>) {
        let index = fragment.index.unwrap_or(0);
        let pending = self.pending_tools.entry(index).or_default();

        if let Some(id) = fragment.id {
            pending.id = Some(id);
        }
        if let Some(function) = fragment.function {
            if let Some(name) = function.name {
                if !name.is_empty() {
                    pending.name = Some(name);
                }
            }
            if let Some(arguments) = function.arguments {
                pending.arguments.push_str(&arguments);
            }
        }

        if !pending.announced {
            if let (Some(id), Some(name)) = (&pending.id, &pending.name) {
                pending.announced = true;
                events.push(UnifiedStreamEvent::ToolStart {
                    tool_id: id.clone(),
                    tool_name: name.clone(),
                    arguments: None,
                });
            }
        }
    }
}

impl StreamAdapter for OpenAIAdapter {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn supports_thinking(&self) -> bool {
        self.model_supports_reasoning()
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.starts_with(':') {
            return Ok(vec![]);
        }

        let payload = trimmed
            .strip_prefix("data:")
            .map(str::trim_start)
            .unwrap_or(trimmed);

        let mut events = vec![];

        if payload.is_empty() || payload == "[DONE]" {
            self.flush_tools(&mut events);
            self.close_reasoning(&mut events);
            return Ok(events);
        }

        let chunk: ChunkEvent =
            serde_json::from_str(payload).map_err(|e| AdapterError::ParseError(e.to_string()))?;

        if let Some(usage) = chunk.usage {
            events.push(UnifiedStreamEvent::Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                thinking_tokens: usage.reasoning_tokens,
            });
        }

        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
                    if !self.in_reasoning {
                        self.in_reasoning = true;
                        events.push(UnifiedStreamEvent::ThinkingStart { thinking_id: None });
                    }
                    events.push(UnifiedStreamEvent::ThinkingDelta {
                        content: reasoning,
                        thinking_id: None,
                    });
                }

                if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                    self.close_reasoning(&mut events);
                    events.push(UnifiedStreamEvent::TextDelta { content });
                }

                for fragment in delta.tool_calls.unwrap_or_default() {
                    self.absorb_tool_fragment(fragment, &mut events);
                }
            }

            if let Some(finish_reason) = choice.finish_reason {
                self.flush_tools(&mut events);
                self.close_reasoning(&mut events);
                events.push(UnifiedStreamEvent::Complete {
                    stop_reason: Some(finish_reason),
                });
            }
        }

        Ok(events)
    }

    fn reset(&mut self) {
        self.in_reasoning = false;
        self.pending_tools.clear();
    }
}
