//! Model Invocation
//!
//! Boundary between the engine and the model layer. The engine only ever sees
//! a channel of [`InvocationEvent`]s; how they are produced is up to the
//! [`ModelInvoker`] implementation.
//!
//! [`LlmInvoker`] drives an [`LlmProvider`] through a bounded tool-calling
//! loop: stream a turn, execute the requested capabilities, append their
//! results, repeat until the model answers without calling anything.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use plan_mode_core::{CapabilityContext, CapabilityDefinition, CapabilitySet, UnifiedStreamEvent};
use plan_mode_llm::{
    LlmProvider, LlmRequestOptions, LlmResponse, Message, MessageContent, MessageRole,
    ToolCallMode, ToolDefinition,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config::PlanModeConfig;
use crate::utils::error::{AppError, AppResult};

// ============================================================================
// Events & Requests
// ============================================================================

/// Closed set of events a model invocation reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvocationEvent {
    /// The model called an action.
    ActionInvoked {
        call_id: String,
        name: String,
        arguments: Value,
    },
    /// An action finished.
    ActionResult {
        call_id: String,
        output: String,
        is_error: bool,
    },
    /// Incremental model text.
    TextDelta { content: String },
    /// The invocation finished normally.
    StreamEnd,
}

impl InvocationEvent {
    /// Convert a provider stream event. Events with no counterpart return `None`.
    pub fn from_unified(event: UnifiedStreamEvent) -> Option<Self> {
        match event {
            UnifiedStreamEvent::TextDelta { content } => Some(Self::TextDelta { content }),
            UnifiedStreamEvent::ToolComplete {
                tool_id,
                tool_name,
                arguments,
            } => Some(Self::ActionInvoked {
                call_id: tool_id,
                name: tool_name,
                arguments: serde_json::from_str(&arguments).unwrap_or(Value::String(arguments)),
            }),
            UnifiedStreamEvent::ToolResult {
                tool_id,
                result,
                error,
            } => Some(match error {
                Some(error) => Self::ActionResult {
                    call_id: tool_id,
                    output: error,
                    is_error: true,
                },
                None => Self::ActionResult {
                    call_id: tool_id,
                    output: result.unwrap_or_default(),
                    is_error: false,
                },
            }),
            _ => None,
        }
    }
}

/// One model invocation.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    /// Actions the model may call during this invocation.
    pub capabilities: CapabilitySet,
    pub tool_call_mode: ToolCallMode,
    /// Plan and step the invocation runs for, handed to capabilities.
    pub plan_id: Option<String>,
    pub step_index: Option<usize>,
}

impl InvocationRequest {
    pub fn new(messages: Vec<Message>, capabilities: CapabilitySet) -> Self {
        Self {
            system: None,
            messages,
            capabilities,
            tool_call_mode: ToolCallMode::Auto,
            plan_id: None,
            step_index: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tool_call_mode(mut self, mode: ToolCallMode) -> Self {
        self.tool_call_mode = mode;
        self
    }

    pub fn for_step(mut self, plan_id: impl Into<String>, step_index: usize) -> Self {
        self.plan_id = Some(plan_id.into());
        self.step_index = Some(step_index);
        self
    }

    fn context_for(&self, call_id: &str) -> CapabilityContext {
        let ctx = CapabilityContext::new(call_id);
        match (&self.plan_id, self.step_index) {
            (Some(plan_id), Some(index)) => ctx.with_step(plan_id.clone(), index),
            _ => ctx,
        }
    }
}

/// Receiving end of an invocation. An `Err` item is an unexpected failure;
/// a closed channel without `StreamEnd` means the invocation was cut short.
pub type InvocationStream = mpsc::Receiver<AppResult<InvocationEvent>>;

/// Starts model invocations.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Start an invocation. Cancelling `cancel` stops it at the next
    /// suspension point; the channel then closes.
    async fn invoke(
        &self,
        request: InvocationRequest,
        cancel: CancellationToken,
    ) -> AppResult<InvocationStream>;
}

// ============================================================================
// LlmInvoker
// ============================================================================

/// `ModelInvoker` backed by an `LlmProvider`.
pub struct LlmInvoker {
    provider: Arc<dyn LlmProvider>,
    max_turns: usize,
    channel_capacity: usize,
}

impl LlmInvoker {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self::from_config(provider, &PlanModeConfig::default())
    }

    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &PlanModeConfig) -> Self {
        Self {
            provider,
            max_turns: config.max_invocation_turns,
            channel_capacity: config.event_channel_capacity,
        }
    }
}

#[async_trait]
impl ModelInvoker for LlmInvoker {
    async fn invoke(
        &self,
        request: InvocationRequest,
        cancel: CancellationToken,
    ) -> AppResult<InvocationStream> {
        if !self.provider.supports_tools() && !request.capabilities.is_empty() {
            tracing::warn!(
                "[LlmInvoker] Provider {} does not support tools; {} capabilities unavailable",
                self.provider.name(),
                request.capabilities.len()
            );
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let provider = Arc::clone(&self.provider);
        let max_turns = self.max_turns;
        let capacity = self.channel_capacity;

        tokio::spawn(async move {
            let panic_tx = tx.clone();
            let outcome = AssertUnwindSafe(run_tool_loop(
                provider, request, cancel, tx, max_turns, capacity,
            ))
            .catch_unwind()
            .await;
            if let Err(panic) = outcome {
                let message = panic_message(panic.as_ref());
                tracing::error!("[LlmInvoker] Tool loop panicked: {}", message);
                let _ = panic_tx
                    .send(Err(AppError::internal(format!(
                        "Invocation panicked: {}",
                        message
                    ))))
                    .await;
            }
        });

        Ok(rx)
    }
}

impl std::fmt::Debug for LlmInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmInvoker")
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .field("max_turns", &self.max_turns)
            .finish()
    }
}

type EventSender = mpsc::Sender<AppResult<InvocationEvent>>;

async fn run_tool_loop(
    provider: Arc<dyn LlmProvider>,
    request: InvocationRequest,
    cancel: CancellationToken,
    tx: EventSender,
    max_turns: usize,
    capacity: usize,
) {
    let tools: Vec<ToolDefinition> = if provider.supports_tools() {
        request
            .capabilities
            .iter()
            .map(|c| ToolDefinition {
                name: c.name().to_string(),
                description: c.description().to_string(),
                input_schema: c.parameters_schema(),
            })
            .collect()
    } else {
        Vec::new()
    };
    let options = LlmRequestOptions {
        tool_call_mode: request.tool_call_mode,
        ..Default::default()
    };
    let mut messages = request.messages.clone();

    for turn in 0..max_turns {
        if cancel.is_cancelled() {
            tracing::debug!("[LlmInvoker] Cancelled before turn {}", turn + 1);
            return;
        }

        let response = match stream_turn(
            &provider,
            &request,
            &messages,
            &tools,
            &options,
            &cancel,
            &tx,
            capacity,
        )
        .await
        {
            TurnOutcome::Response(response) => response,
            TurnOutcome::Failed(e) => {
                tracing::warn!("[LlmInvoker] Turn {} failed: {}", turn + 1, e);
                let _ = tx.send(Err(e)).await;
                return;
            }
            TurnOutcome::Stopped => return,
        };

        if !response.has_tool_calls() {
            let _ = tx.send(Ok(InvocationEvent::StreamEnd)).await;
            return;
        }

        // Assistant turn with its tool calls, then one result per call.
        let mut assistant_content = Vec::with_capacity(response.tool_calls.len() + 1);
        if let Some(text) = response.content.as_ref().filter(|t| !t.is_empty()) {
            assistant_content.push(MessageContent::Text { text: text.clone() });
        }
        for call in &response.tool_calls {
            assistant_content.push(MessageContent::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            });
        }
        messages.push(Message {
            role: MessageRole::Assistant,
            content: assistant_content,
        });

        for call in response.tool_calls {
            if cancel.is_cancelled() {
                return;
            }
            let invoked = InvocationEvent::ActionInvoked {
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            };
            if tx.send(Ok(invoked)).await.is_err() {
                return;
            }

            let ctx = request.context_for(&call.id);
            let executed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = request.capabilities.execute(&call.name, &ctx, call.arguments.clone()) => result,
            };

            let (output, is_error) = match executed {
                Ok(Value::String(s)) => (s, false),
                Ok(value) => (value.to_string(), false),
                Err(e) => (e.to_string(), true),
            };
            tracing::debug!(
                "[LlmInvoker] Action {} finished (error: {})",
                call.name,
                is_error
            );

            messages.push(Message::tool_result(&call.id, &output, is_error));
            let result = InvocationEvent::ActionResult {
                call_id: call.id,
                output,
                is_error,
            };
            if tx.send(Ok(result)).await.is_err() {
                return;
            }
        }
    }

    tracing::warn!(
        "[LlmInvoker] Reached the turn limit ({}); ending invocation",
        max_turns
    );
    let _ = tx.send(Ok(InvocationEvent::StreamEnd)).await;
}

/// Text carried by a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

enum TurnOutcome {
    Response(LlmResponse),
    Failed(AppError),
    /// Cancelled, or the consumer went away.
    Stopped,
}

/// Stream one provider turn, forwarding text as it arrives.
#[allow(clippy::too_many_arguments)]
async fn stream_turn(
    provider: &Arc<dyn LlmProvider>,
    request: &InvocationRequest,
    messages: &[Message],
    tools: &[ToolDefinition],
    options: &LlmRequestOptions,
    cancel: &CancellationToken,
    tx: &EventSender,
    capacity: usize,
) -> TurnOutcome {
    let (stream_tx, mut stream_rx) = mpsc::channel::<UnifiedStreamEvent>(capacity);

    let provider_clone = Arc::clone(provider);
    let messages = messages.to_vec();
    let system = request.system.clone();
    let tools = tools.to_vec();
    let options = options.clone();
    let stream_handle = tokio::spawn(async move {
        provider_clone
            .stream_message(messages, system, tools, stream_tx, options)
            .await
    });

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                stream_handle.abort();
                return TurnOutcome::Stopped;
            }
            event = stream_rx.recv() => {
                match event {
                    Some(UnifiedStreamEvent::Error { message, .. }) => {
                        tracing::debug!("[LlmInvoker] Provider stream error: {}", message);
                    }
                    Some(event) => {
                        if let Some(InvocationEvent::TextDelta { content }) = InvocationEvent::from_unified(event) {
                            if tx.send(Ok(InvocationEvent::TextDelta { content })).await.is_err() {
                                stream_handle.abort();
                                return TurnOutcome::Stopped;
                            }
                        }
                    }
                    None => break,
                }
            }
        }
    }

    match stream_handle.await {
        Ok(Ok(response)) => TurnOutcome::Response(response),
        Ok(Err(e)) => TurnOutcome::Failed(e.into()),
        Err(e) => TurnOutcome::Failed(AppError::internal(format!("Provider task failed: {}", e))),
    }
}
