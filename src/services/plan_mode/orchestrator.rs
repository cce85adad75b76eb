//! Plan Orchestrator
//!
//! Entry point of plan mode. One outline call, then each step in order with
//! the results of earlier steps threaded into its context. A step that does
//! not complete halts the run; later steps stay pending.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use plan_mode_core::CapabilitySet;
use plan_mode_llm::Message;
use tokio_util::sync::CancellationToken;

use super::config::PlanModeConfig;
use super::intent::PlanIntent;
use super::invocation::ModelInvoker;
use super::outline::{OutlineGenerator, OutlineOutcome};
use super::progress::ProgressWriter;
use super::prompts::{build_step_instruction, format_step_result, DEFAULT_OUTLINE_INSTRUCTION};
use super::sink::PlanEventSink;
use super::step_executor::{StepExecutor, StepRunRequest};
use super::types::{Plan, PlanRunState, SnapshotEvent, StepRunStatus, FORBIDDEN_ACTIONS};
use super::unscoped::{DirectExecution, UnscopedExecution};

pub struct PlanOrchestrator {
    generator: OutlineGenerator,
    executor: StepExecutor,
    writer: Arc<ProgressWriter>,
    sink: Arc<dyn PlanEventSink>,
    unscoped: Arc<dyn UnscopedExecution>,
    config: PlanModeConfig,
    outline_template: String,
    emitted_plans: Mutex<HashSet<String>>,
}

impl PlanOrchestrator {
    pub fn new(invoker: Arc<dyn ModelInvoker>, sink: Arc<dyn PlanEventSink>) -> Self {
        Self::from_config(invoker, sink, PlanModeConfig::default())
    }

    /// Build every component over one invoker and sink. Unscoped requests
    /// go to a [`DirectExecution`] over the same invoker.
    pub fn from_config(
        invoker: Arc<dyn ModelInvoker>,
        sink: Arc<dyn PlanEventSink>,
        config: PlanModeConfig,
    ) -> Self {
        let writer = Arc::new(ProgressWriter::new(sink.clone()));
        Self {
            generator: OutlineGenerator::from_config(invoker.clone(), &config),
            executor: StepExecutor::from_config(
                invoker.clone(),
                writer.clone(),
                sink.clone(),
                &config,
            ),
            unscoped: Arc::new(DirectExecution::new(invoker, sink.clone())),
            writer,
            sink,
            config,
            outline_template: DEFAULT_OUTLINE_INSTRUCTION.to_string(),
            emitted_plans: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_unscoped(mut self, unscoped: Arc<dyn UnscopedExecution>) -> Self {
        self.unscoped = unscoped;
        self
    }

    /// Replace the built-in outline instruction template.
    pub fn with_outline_template(mut self, template: impl Into<String>) -> Self {
        self.outline_template = template.into();
        self
    }

    /// Progress store of this orchestrator's runs.
    pub fn progress(&self) -> &Arc<ProgressWriter> {
        &self.writer
    }

    pub fn config(&self) -> &PlanModeConfig {
        &self.config
    }

    /// Consult `intent`, then plan or answer directly.
    pub async fn route(
        &self,
        user_request: &str,
        conversation: &[Message],
        capabilities: &CapabilitySet,
        intent: &dyn PlanIntent,
        cancel: &CancellationToken,
    ) -> PlanRunState {
        if intent.should_plan(user_request, conversation) {
            return self
                .execute(user_request, conversation, capabilities, cancel)
                .await;
        }

        tracing::info!("[PlanMode] Intent declined plan mode");
        self.run_unscoped(working_conversation(user_request, conversation), capabilities, cancel)
            .await
    }

    /// Plan `user_request` and run the plan to a terminal state.
    pub async fn execute(
        &self,
        user_request: &str,
        conversation: &[Message],
        capabilities: &CapabilitySet,
        cancel: &CancellationToken,
    ) -> PlanRunState {
        let working = working_conversation(user_request, conversation);

        let plan = match self
            .generator
            .generate(&working, &self.outline_template, cancel)
            .await
        {
            OutlineOutcome::Accepted { plan, .. } => plan,
            OutlineOutcome::Rejected(reason) => {
                tracing::info!("[PlanMode] No plan ({}), running unscoped", reason);
                return self.run_unscoped(working, capabilities, cancel).await;
            }
        };

        self.run_plan(&plan, working, capabilities, cancel).await
    }

    /// Run an accepted plan step by step.
    pub async fn run_plan(
        &self,
        plan: &Plan,
        mut working: Vec<Message>,
        capabilities: &CapabilitySet,
        cancel: &CancellationToken,
    ) -> PlanRunState {
        if let Err(e) = self.writer.initialize(&plan.id, plan.steps.len()) {
            tracing::error!("[PlanMode] Could not initialize plan {}: {}", plan.id, e);
            return PlanRunState::HaltedOnFailure;
        }
        self.emit_plan_once(plan);

        let step_capabilities = capabilities.without(&FORBIDDEN_ACTIONS);
        let last = plan.steps.len().saturating_sub(1);

        for (index, step) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("[PlanMode] Plan {} cancelled before step {}", plan.id, index);
                return PlanRunState::HaltedOnAbort;
            }

            let is_final = index == last;
            let request = StepRunRequest {
                plan_id: plan.id.clone(),
                step_index: index,
                step: step.clone(),
                instruction: build_step_instruction(plan, index, is_final),
                capabilities: step_capabilities.clone(),
                context: working.clone(),
                emit_final_text: is_final,
            };

            let result = self.executor.run(request, cancel).await;
            if !result.is_completed() {
                if result.status == StepRunStatus::Aborted {
                    tracing::info!("[PlanMode] Plan {} aborted at step {}", plan.id, index);
                    return PlanRunState::HaltedOnAbort;
                }
                tracing::warn!(
                    "[PlanMode] Plan {} halted at step {}: {}",
                    plan.id,
                    index,
                    result.error.as_deref().unwrap_or("unknown error")
                );
                return PlanRunState::HaltedOnFailure;
            }

            working.push(Message::assistant(format_step_result(
                plan,
                index,
                &result.output,
                self.config.max_context_chars_per_step,
            )));
        }

        tracing::info!("[PlanMode] Plan {} finished", plan.id);
        PlanRunState::Finished
    }

    async fn run_unscoped(
        &self,
        working: Vec<Message>,
        capabilities: &CapabilitySet,
        cancel: &CancellationToken,
    ) -> PlanRunState {
        if let Err(e) = self.unscoped.run(working, capabilities.clone(), cancel).await {
            tracing::error!("[PlanMode] Unscoped execution failed: {}", e);
        }
        PlanRunState::Unscoped
    }

    /// Emit the `plan` snapshot unless this plan id was already emitted.
    fn emit_plan_once(&self, plan: &Plan) {
        let first = self
            .emitted_plans
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(plan.id.clone());
        if first {
            self.sink.snapshot(SnapshotEvent::Plan {
                id: plan.id.clone(),
                data: plan.clone(),
            });
        }
    }
}

impl std::fmt::Debug for PlanOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanOrchestrator")
            .field("config", &self.config)
            .field("writer", &self.writer)
            .finish()
    }
}

/// Conversation with the user request appended as the newest message.
fn working_conversation(user_request: &str, conversation: &[Message]) -> Vec<Message> {
    let mut working = conversation.to_vec();
    if !user_request.trim().is_empty() {
        working.push(Message::user(user_request));
    }
    working
}
