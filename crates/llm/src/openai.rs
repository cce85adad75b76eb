//! OpenAI-Compatible Provider
//!
//! `LlmProvider` over the chat-completions API. Any endpoint speaking the same
//! wire format works by pointing `base_url` at it.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::{missing_api_key_error, parse_http_error, LlmProvider};
use super::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, MessageContent, MessageRole,
    ProviderConfig, StopReason, ToolCall, ToolCallMode, ToolDefinition, UsageStats,
};
use crate::streaming_adapters::OpenAIAdapter;
use plan_mode_core::streaming::{StreamAdapter, UnifiedStreamEvent};

/// Default chat-completions endpoint
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL)
    }

    fn model_supports_reasoning(&self) -> bool {
        let model = self.config.model.to_lowercase();
        model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
    }

    fn api_key(&self) -> LlmResult<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| missing_api_key_error(self.name()))
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        system: Option<&str>,
        tools: &[ToolDefinition],
        stream: bool,
        options: &LlmRequestOptions,
    ) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "stream": stream,
        });

        if self.model_supports_reasoning() {
            let effort = options
                .reasoning_effort_override
                .as_ref()
                .or(self.config.reasoning_effort.as_ref());
            if let Some(effort) = effort {
                body["reasoning_effort"] = json!(effort);
            }
        } else {
            body["temperature"] =
                json!(options.temperature_override.unwrap_or(self.config.temperature));
        }

        let mut wire_messages: Vec<Value> = Vec::with_capacity(messages.len() + 1);
        if let Some(sys) = system {
            wire_messages.push(json!({ "role": "system", "content": sys }));
        }
        for message in messages {
            wire_messages.extend(message_to_wire(message));
        }
        body["messages"] = Value::Array(wire_messages);

        if !tools.is_empty() && options.tool_call_mode != ToolCallMode::None {
            body["tools"] = Value::Array(tools.iter().map(tool_to_wire).collect());
            if options.tool_call_mode == ToolCallMode::Required {
                body["tool_choice"] = json!("required");
            }
        }

        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }

        for (key, value) in &self.config.options {
            body[key.as_str()] = value.clone();
        }

        body
    }

    async fn post(&self, body: &Value) -> LlmResult<reqwest::Response> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let text = response.text().await.unwrap_or_default();
            return Err(parse_http_error(status, &text, self.name()));
        }
        Ok(response)
    }
}

/// Convert one message into zero or more wire messages.
///
/// Tool results become one `role: tool` message each; an assistant turn with
/// tool calls carries them in `tool_calls`.
fn message_to_wire(message: &Message) -> Vec<Value> {
    let role = match message.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    };

    let results: Vec<Value> = message
        .content
        .iter()
        .filter_map(|c| match c {
            MessageContent::ToolResult {
                tool_use_id,
                content,
                ..
            } => Some(json!({
                "role": "tool",
                "tool_call_id": tool_use_id,
                "content": content,
            })),
            _ => None,
        })
        .collect();
    if !results.is_empty() {
        return results;
    }

    let tool_calls: Vec<Value> = message
        .content
        .iter()
        .filter_map(|c| match c {
            MessageContent::ToolUse { id, name, input } => Some(json!({
                "id": id,
                "type": "function",
                "function": { "name": name, "arguments": input.to_string() },
            })),
            _ => None,
        })
        .collect();

    let text = message.text_content();
    if tool_calls.is_empty() {
        return vec![json!({ "role": role, "content": text })];
    }

    // Some compatible servers reject tool-call turns without a content key.
    let content = if text.is_empty() { Value::Null } else { json!(text) };
    vec![json!({ "role": role, "content": content, "tool_calls": tool_calls })]
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

/// Splits a byte stream into lines. Bytes are decoded only once a line is
/// complete, so a character split across network chunks survives intact.
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completes, newline included.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.bytes.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(end) = self.bytes.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.bytes.drain(..=end).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whatever is left once the stream ends, if it is not blank.
    fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.bytes).into_owned();
        Some(rest).filter(|r| !r.trim().is_empty())
    }
}

/// Folds unified events into the final `LlmResponse` of a streamed turn.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    thinking: String,
    tool_calls: Vec<ToolCall>,
    usage: UsageStats,
    stop_reason: Option<StopReason>,
}

impl StreamAccumulator {
    /// Record the event; returns whether it should be forwarded to the caller.
    fn absorb(&mut self, event: &UnifiedStreamEvent) -> bool {
        match event {
            UnifiedStreamEvent::TextDelta { content } => {
                self.content.push_str(content);
                true
            }
            UnifiedStreamEvent::ThinkingDelta { content, .. } => {
                self.thinking.push_str(content);
                true
            }
            UnifiedStreamEvent::ToolComplete {
                tool_id,
                tool_name,
                arguments,
            } => {
                let arguments = serde_json::from_str(arguments)
                    .unwrap_or_else(|_| Value::String(arguments.clone()));
                self.tool_calls.push(ToolCall {
                    id: tool_id.clone(),
                    name: tool_name.clone(),
                    arguments,
                });
                false
            }
            UnifiedStreamEvent::Usage {
                input_tokens,
                output_tokens,
                thinking_tokens,
            } => {
                self.usage = UsageStats {
                    input_tokens: *input_tokens,
                    output_tokens: *output_tokens,
                    thinking_tokens: *thinking_tokens,
                };
                false
            }
            UnifiedStreamEvent::Complete { stop_reason } => {
                if let Some(reason) = stop_reason {
                    self.stop_reason = Some(StopReason::from(reason.as_str()));
                }
                false
            }
            UnifiedStreamEvent::ToolStart { .. } | UnifiedStreamEvent::ToolResult { .. } => false,
            _ => true,
        }
    }

    fn finish(self, model: &str) -> LlmResponse {
        let stop_reason = self.stop_reason.unwrap_or(if self.tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        });
        LlmResponse {
            content: Some(self.content).filter(|s| !s.is_empty()),
            thinking: Some(self.thinking).filter(|s| !s.is_empty()),
            tool_calls: self.tool_calls,
            stop_reason,
            usage: self.usage,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_thinking(&self) -> bool {
        self.model_supports_reasoning()
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body =
            self.build_request_body(&messages, system.as_deref(), &tools, false, &request_options);
        let response = self.post(&body).await?;

        let parsed: CompletionResponse =
            response.json().await.map_err(|e| LlmError::ParseError {
                message: format!("Failed to parse response: {}", e),
            })?;
        Ok(parsed.into_llm_response())
    }

    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body =
            self.build_request_body(&messages, system.as_deref(), &tools, true, &request_options);
        let response = self.post(&body).await?;
        tracing::debug!(
            "[OpenAI] Streaming {} message(s) with {} tool(s) to {}",
            messages.len(),
            tools.len(),
            self.config.model
        );

        let mut adapter = OpenAIAdapter::new(&self.config.model);
        let mut acc = StreamAccumulator::default();
        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;

            for line in lines.push(&chunk) {
                let events = match adapter.adapt(&line) {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("[OpenAI] Unparseable stream line: {}", e);
                        vec![UnifiedStreamEvent::Error {
                            message: e.to_string(),
                            code: None,
                        }]
                    }
                };
                for event in events {
                    if acc.absorb(&event) {
                        let _ = tx.send(event).await;
                    }
                }
            }
        }

        // A final line without a trailing newline still counts.
        if let Some(line) = lines.finish() {
            if let Ok(events) = adapter.adapt(&line) {
                for event in events {
                    if acc.absorb(&event) {
                        let _ = tx.send(event).await;
                    }
                }
            }
        }

        Ok(acc.finish(&self.config.model))
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    model: String,
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Option<CompletionMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Debug, Deserialize)]
struct CompletionToolCall {
    id: String,
    function: CompletionFunction,
}

#[derive(Debug, Deserialize)]
struct CompletionFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    reasoning_tokens: Option<u32>,
}

impl CompletionResponse {
    fn into_llm_response(self) -> LlmResponse {
        let choice = self.choices.into_iter().next();
        let stop_reason = choice
            .as_ref()
            .and_then(|c| c.finish_reason.as_deref())
            .map(StopReason::from)
            .unwrap_or(StopReason::EndTurn);

        let (content, thinking, tool_calls) = match choice.and_then(|c| c.message) {
            Some(message) => {
                let calls = message
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|tc| ToolCall {
                        arguments: serde_json::from_str(&tc.function.arguments)
                            .unwrap_or(Value::Null),
                        id: tc.id,
                        name: tc.function.name,
                    })
                    .collect();
                (message.content, message.reasoning_content, calls)
            }
            None => (None, None, Vec::new()),
        };

        let usage = self
            .usage
            .map(|u| UsageStats {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                thinking_tokens: u.reasoning_tokens,
            })
            .unwrap_or_default();

        LlmResponse {
            content,
            thinking,
            tool_calls,
            stop_reason,
            usage,
            model: self.model,
        }
    }
}
