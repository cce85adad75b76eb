//! Outline Generator
//!
//! One structured-generation call that exposes a single `outline` action. The
//! arguments of that action become the plan; the call is cut short as soon as
//! they arrive. A missing or malformed outline is a rejection, not an error:
//! the orchestrator falls back to unscoped execution.

use std::sync::Arc;

use plan_mode_core::{CapabilitySet, FunctionCapability};
use plan_mode_llm::{Message, ToolCallMode};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::config::{OutlineLimits, PlanModeConfig};
use super::invocation::{InvocationEvent, InvocationRequest, ModelInvoker};
use super::prompts::{is_outline_action, outline_schema, render_outline_instruction};
use super::types::{Plan, StepSpec, OUTLINE_ACTION};
use super::validator::{validate_outline, validation_summary, OutlineIssue};

/// Why no plan was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The outer token fired before an outline arrived.
    Cancelled,
    /// The invocation could not start or reported an error.
    InvocationFailed(String),
    /// The stream ended without an outline.
    NoOutline,
    /// The outline arguments did not match the plan shape.
    Malformed(String),
    /// The outline had no steps.
    EmptySteps,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Cancelled => write!(f, "cancelled"),
            RejectReason::InvocationFailed(msg) => write!(f, "invocation failed: {}", msg),
            RejectReason::NoOutline => write!(f, "no outline produced"),
            RejectReason::Malformed(msg) => write!(f, "malformed outline: {}", msg),
            RejectReason::EmptySteps => write!(f, "outline has no steps"),
        }
    }
}

/// Result of [`OutlineGenerator::generate`].
#[derive(Debug, Clone)]
pub enum OutlineOutcome {
    /// Plan accepted; `issues` are the quality-gate diagnostics.
    Accepted { plan: Plan, issues: Vec<OutlineIssue> },
    Rejected(RejectReason),
}

impl OutlineOutcome {
    pub fn plan(&self) -> Option<&Plan> {
        match self {
            OutlineOutcome::Accepted { plan, .. } => Some(plan),
            OutlineOutcome::Rejected(_) => None,
        }
    }
}

/// Arguments of the `outline` action.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutlineDraft {
    title: String,
    #[serde(default)]
    description: String,
    steps: Vec<StepSpec>,
}

pub struct OutlineGenerator {
    invoker: Arc<dyn ModelInvoker>,
    limits: OutlineLimits,
}

impl OutlineGenerator {
    pub fn new(invoker: Arc<dyn ModelInvoker>) -> Self {
        Self {
            invoker,
            limits: OutlineLimits::default(),
        }
    }

    pub fn from_config(invoker: Arc<dyn ModelInvoker>, config: &PlanModeConfig) -> Self {
        Self {
            invoker,
            limits: config.outline.clone(),
        }
    }

    pub fn limits(&self) -> &OutlineLimits {
        &self.limits
    }

    /// Ask the model for an outline of the work in `conversation`.
    pub async fn generate(
        &self,
        conversation: &[Message],
        instruction_template: &str,
        cancel: &CancellationToken,
    ) -> OutlineOutcome {
        if cancel.is_cancelled() {
            return OutlineOutcome::Rejected(RejectReason::Cancelled);
        }

        let capabilities = CapabilitySet::new().with(Arc::new(FunctionCapability::new(
            OUTLINE_ACTION,
            "Submit the plan outline",
            outline_schema(),
            |_ctx, _args| Box::pin(async move { Ok(Value::String("Outline received.".to_string())) }),
        )));
        let request = InvocationRequest::new(conversation.to_vec(), capabilities)
            .with_system(render_outline_instruction(instruction_template, &self.limits))
            .with_tool_call_mode(ToolCallMode::Required);

        let child = cancel.child_token();
        let mut rx = match self.invoker.invoke(request, child.clone()).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!("[OutlineGenerator] Invocation failed to start: {}", e);
                return OutlineOutcome::Rejected(RejectReason::InvocationFailed(e.to_string()));
            }
        };

        let mut arguments: Option<Value> = None;
        let mut text = String::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    child.cancel();
                    tracing::info!("[OutlineGenerator] Cancelled while waiting for outline");
                    return OutlineOutcome::Rejected(RejectReason::Cancelled);
                }
                event = rx.recv() => match event {
                    Some(Ok(InvocationEvent::ActionInvoked { name, arguments: args, .. }))
                        if is_outline_action(&name) =>
                    {
                        arguments = Some(args);
                        child.cancel();
                        break;
                    }
                    Some(Ok(InvocationEvent::TextDelta { content })) => text.push_str(&content),
                    Some(Ok(InvocationEvent::StreamEnd)) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        child.cancel();
                        tracing::warn!("[OutlineGenerator] Invocation failed: {}", e);
                        return OutlineOutcome::Rejected(RejectReason::InvocationFailed(e.to_string()));
                    }
                },
            }
        }

        let arguments = match arguments {
            Some(args) => args,
            None => match extract_json_object(&text).and_then(|s| serde_json::from_str(&s).ok()) {
                Some(value) => {
                    tracing::debug!("[OutlineGenerator] Using outline found in plain text");
                    value
                }
                None => {
                    tracing::info!("[OutlineGenerator] No outline produced");
                    return OutlineOutcome::Rejected(RejectReason::NoOutline);
                }
            },
        };

        let plan = match parse_outline(arguments) {
            Ok(plan) => plan,
            Err(reason) => {
                tracing::warn!("[OutlineGenerator] Outline rejected: {}", reason);
                return OutlineOutcome::Rejected(reason);
            }
        };

        let issues = validate_outline(&plan, &self.limits);
        if !issues.is_empty() {
            tracing::warn!(
                "[OutlineGenerator] Plan {}: {}",
                plan.id,
                validation_summary(&issues)
            );
        }
        tracing::info!(
            "[OutlineGenerator] Accepted plan {} \"{}\" with {} steps",
            plan.id,
            plan.title,
            plan.steps.len()
        );

        OutlineOutcome::Accepted { plan, issues }
    }
}

impl std::fmt::Debug for OutlineGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutlineGenerator")
            .field("limits", &self.limits)
            .finish()
    }
}

/// Turn `outline` arguments into a plan with a fresh id.
///
/// Some models send the arguments as a JSON string rather than an object;
/// both are accepted.
pub fn parse_outline(arguments: Value) -> Result<Plan, RejectReason> {
    let arguments = match arguments {
        Value::String(raw) => serde_json::from_str(&raw)
            .map_err(|e| RejectReason::Malformed(format!("arguments are not JSON: {}", e)))?,
        other => other,
    };

    let draft: OutlineDraft =
        serde_json::from_value(arguments).map_err(|e| RejectReason::Malformed(e.to_string()))?;
    if draft.steps.is_empty() {
        return Err(RejectReason::EmptySteps);
    }

    Ok(Plan {
        id: Uuid::new_v4().to_string(),
        title: draft.title.trim().to_string(),
        description: draft.description.trim().to_string(),
        steps: draft
            .steps
            .into_iter()
            .map(|mut step| {
                step.title = step.title.trim().to_string();
                step
            })
            .collect(),
    })
}

/// Find a JSON object in free text: a fenced block if there is one, else the
/// first balanced `{...}` span.
pub fn extract_json_object(text: &str) -> Option<String> {
    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        let body = match after_fence.find('\n') {
            Some(nl) => &after_fence[nl + 1..],
            None => after_fence,
        };
        if let Some(end) = body.find("```") {
            let content = body[..end].trim();
            if content.starts_with('{') {
                return Some(content.to_string());
            }
        }
    }

    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=start + offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
