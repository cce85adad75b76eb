//! LLM Invoker Integration Tests
//!
//! Drives `PlanOrchestrator` through `LlmInvoker` over an in-memory provider
//! that answers from the request it sees, so extra turns never shift the
//! script.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use plan_mode_core::streaming::UnifiedStreamEvent;
use plan_mode_core::{CapabilitySet, CoreError, FunctionCapability};
use plan_mode_engine::services::plan_mode::{
    LlmInvoker, PlanOrchestrator, PlanRunState, StepStatus, TranscriptRecorder,
};
use plan_mode_llm::{
    LlmProvider, LlmRequestOptions, LlmResponse, LlmResult, Message, MessageContent,
    ProviderConfig, StopReason, ToolCall, ToolDefinition, UsageStats,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::support::{outline_args, plan_id, statuses};

/// Provider whose reply depends on the offered tools, the system prompt and
/// whether the last message is a tool result.
struct RequestDrivenProvider {
    config: ProviderConfig,
    lookup_fails: bool,
    seen_tools: Mutex<Vec<Vec<String>>>,
}

impl RequestDrivenProvider {
    fn new(lookup_fails: bool) -> Self {
        Self {
            config: ProviderConfig::default(),
            lookup_fails,
            seen_tools: Mutex::new(Vec::new()),
        }
    }

    fn reply(&self, messages: &[Message], system: Option<&str>, tools: &[ToolDefinition]) -> LlmResponse {
        let after_tool = messages.last().is_some_and(|m| {
            m.content
                .iter()
                .any(|c| matches!(c, MessageContent::ToolResult { .. }))
        });
        let system = system.unwrap_or_default();

        if tools.iter().any(|t| t.name == "outline") {
            if after_tool {
                return text("");
            }
            return tool("call-outline", "outline", outline_args("Answer lookup", &["Look up", "Answer"]));
        }
        if system.contains("Current Step (1 of 2)") {
            if after_tool {
                return text("The stored answer is 42.");
            }
            return tool("call-lookup", "lookup", json!({ "key": "answer" }));
        }
        if system.contains("Current Step (2 of 2)") {
            return text("The answer is 42.");
        }
        text("Unscripted")
    }
}

fn text(content: &str) -> LlmResponse {
    LlmResponse {
        content: Some(content.to_string()),
        thinking: None,
        tool_calls: vec![],
        stop_reason: StopReason::EndTurn,
        usage: UsageStats::default(),
        model: "request-driven".to_string(),
    }
}

fn tool(id: &str, name: &str, arguments: Value) -> LlmResponse {
    LlmResponse {
        content: None,
        thinking: None,
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
        stop_reason: StopReason::ToolUse,
        usage: UsageStats::default(),
        model: "request-driven".to_string(),
    }
}

#[async_trait]
impl LlmProvider for RequestDrivenProvider {
    fn name(&self) -> &'static str {
        "request-driven"
    }

    fn model(&self) -> &str {
        "request-driven"
    }

    fn supports_thinking(&self) -> bool {
        false
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        Ok(self.reply(&messages, system.as_deref(), &tools))
    }

    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        self.seen_tools
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        let response = self.reply(&messages, system.as_deref(), &tools);
        if let Some(content) = response.content.as_ref().filter(|c| !c.is_empty()) {
            let _ = tx
                .send(UnifiedStreamEvent::TextDelta {
                    content: content.clone(),
                })
                .await;
        }
        Ok(response)
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

type Calls = Arc<Mutex<Vec<(Option<String>, Option<usize>)>>>;

fn capabilities(lookup_fails: bool, calls: Calls) -> CapabilitySet {
    let noop = |name: &'static str| {
        Arc::new(FunctionCapability::new(
            name,
            "Plan control",
            json!({ "type": "object" }),
            |_ctx, _args| Box::pin(async move { Ok(Value::Null) }),
        ))
    };

    CapabilitySet::new()
        .with(Arc::new(FunctionCapability::new(
            "lookup",
            "Look up a stored value",
            json!({ "type": "object", "properties": { "key": { "type": "string" } } }),
            move |ctx, _args| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls
                        .lock()
                        .unwrap()
                        .push((ctx.plan_id().map(str::to_string), ctx.step_index()));
                    if lookup_fails {
                        Err(CoreError::execution("store unavailable"))
                    } else {
                        Ok(Value::String("42".to_string()))
                    }
                })
            },
        )))
        .with(noop("plan"))
        .with(noop("progress"))
}

#[tokio::test]
async fn test_plan_runs_through_llm_invoker() {
    let provider = Arc::new(RequestDrivenProvider::new(false));
    let recorder = Arc::new(TranscriptRecorder::new());
    let orchestrator =
        PlanOrchestrator::new(Arc::new(LlmInvoker::new(provider.clone())), recorder.clone());
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));

    let state = orchestrator
        .execute(
            "What is the stored answer?",
            &[],
            &capabilities(false, calls.clone()),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(state, PlanRunState::Finished);
    let id = plan_id(&recorder);
    let record = orchestrator.progress().snapshot(&id).unwrap();
    assert_eq!(statuses(&record), vec![StepStatus::Completed; 2]);
    assert_eq!(record.steps[0].tools_used, vec!["lookup".to_string()]);
    assert_eq!(record.steps[0].result_actions, vec!["lookup: 42".to_string()]);
    assert_eq!(recorder.primary_text(), "The answer is 42.");

    // The capability saw which plan step called it.
    assert_eq!(calls.lock().unwrap().as_slice(), &[(Some(id), Some(0))]);

    // The outline call offers only `outline`; steps never see plan-control actions.
    let seen = provider.seen_tools.lock().unwrap().clone();
    assert_eq!(seen[0], vec!["outline".to_string()]);
    let step_turns: Vec<&Vec<String>> = seen
        .iter()
        .filter(|tools| !tools.contains(&"outline".to_string()))
        .collect();
    assert_eq!(step_turns.len(), 3);
    for tools in step_turns {
        assert_eq!(tools, &vec!["lookup".to_string()]);
    }
}

#[tokio::test]
async fn test_capability_error_fails_step() {
    let provider = Arc::new(RequestDrivenProvider::new(true));
    let recorder = Arc::new(TranscriptRecorder::new());
    let orchestrator =
        PlanOrchestrator::new(Arc::new(LlmInvoker::new(provider)), recorder.clone());
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));

    let state = orchestrator
        .execute(
            "What is the stored answer?",
            &[],
            &capabilities(true, calls),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(state, PlanRunState::HaltedOnFailure);
    let record = orchestrator.progress().snapshot(&plan_id(&recorder)).unwrap();
    assert_eq!(
        statuses(&record),
        vec![StepStatus::Failed, StepStatus::Pending]
    );
    assert!(record.steps[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("store unavailable"));
    assert!(recorder.primary_text().is_empty());
}
