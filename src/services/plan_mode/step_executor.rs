//! Step Executor
//!
//! Runs one plan step as a single streamed model invocation scoped to that
//! step. Action events are mirrored into the progress record, text is either
//! forwarded to the primary channel or batched into `step-output` snapshots,
//! and exactly one terminal status is written per run.
//!
//! A forbidden plan-control action, an action error, an invocation error, a
//! stream that closes without `StreamEnd` and a panic all end the step as
//! `failed`; the first cause observed is the one recorded. Cancellation of the
//! outer token ends it as aborted.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use plan_mode_core::CapabilitySet;
use plan_mode_llm::Message;
use tokio_util::sync::CancellationToken;

use super::config::PlanModeConfig;
use super::invocation::{panic_message, InvocationEvent, InvocationRequest, ModelInvoker};
use super::progress::ProgressWriter;
use super::sink::PlanEventSink;
use super::types::{
    is_forbidden_action, SnapshotEvent, StepOutputData, StepRunResult, StepSpec, StepStatus,
    ABORTED_MARKER,
};
use crate::utils::error::AppResult;

/// Longest action output kept in a step's `resultActions` entry.
const RESULT_ACTION_PREVIEW_CHARS: usize = 200;

/// Everything needed to run one step.
#[derive(Debug, Clone)]
pub struct StepRunRequest {
    pub plan_id: String,
    pub step_index: usize,
    pub step: StepSpec,
    /// Step-scoped system instruction.
    pub instruction: String,
    /// Capabilities offered to the model; plan-control actions should already
    /// be removed.
    pub capabilities: CapabilitySet,
    /// Conversation plus the results of earlier steps.
    pub context: Vec<Message>,
    /// Forward text to the primary channel instead of batching it.
    pub emit_final_text: bool,
}

/// How a step run ended, before it is written to the record.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StepEnd {
    Failed(String),
    Aborted,
}

/// Mutable state of one run, shared with the fault boundary.
#[derive(Debug, Default)]
struct RunState {
    end: Option<StepEnd>,
    text: String,
    pending: String,
    call_names: HashMap<String, String>,
}

impl RunState {
    /// Record an ending unless one is already set.
    fn end_with(&mut self, end: StepEnd) {
        if self.end.is_none() {
            self.end = Some(end);
        }
    }

    fn is_ending(&self) -> bool {
        self.end.is_some()
    }
}

pub struct StepExecutor {
    invoker: Arc<dyn ModelInvoker>,
    writer: Arc<ProgressWriter>,
    sink: Arc<dyn PlanEventSink>,
    flush_threshold: usize,
}

impl StepExecutor {
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        writer: Arc<ProgressWriter>,
        sink: Arc<dyn PlanEventSink>,
    ) -> Self {
        Self::from_config(invoker, writer, sink, &PlanModeConfig::default())
    }

    pub fn from_config(
        invoker: Arc<dyn ModelInvoker>,
        writer: Arc<ProgressWriter>,
        sink: Arc<dyn PlanEventSink>,
        config: &PlanModeConfig,
    ) -> Self {
        Self {
            invoker,
            writer,
            sink,
            flush_threshold: config.text_flush_threshold,
        }
    }

    /// Run one step to a terminal state.
    ///
    /// Never returns an error: every failure is folded into the result and
    /// into the step's progress entry.
    pub async fn run(&self, request: StepRunRequest, cancel: &CancellationToken) -> StepRunResult {
        let plan_id = request.plan_id.clone();
        let step_index = request.step_index;

        if let Err(e) = self
            .writer
            .set_status(&plan_id, step_index, StepStatus::InProgress, None)
        {
            tracing::error!(
                "[StepExecutor] Could not start step {} of plan {}: {}",
                step_index,
                plan_id,
                e
            );
            return StepRunResult::failed(e.to_string());
        }
        tracing::info!(
            "[StepExecutor] Step {} of plan {} started: {}",
            step_index,
            plan_id,
            request.step.title
        );

        let child = cancel.child_token();
        let mut state = RunState::default();

        let outcome = AssertUnwindSafe(self.stream_step(&request, cancel, &child, &mut state))
            .catch_unwind()
            .await;
        child.cancel();

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("[StepExecutor] Step {} invocation error: {}", step_index, e);
                state.end_with(StepEnd::Failed(format!("Unexpected error: {}", e)));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("[StepExecutor] Step {} panicked: {}", step_index, message);
                state.end_with(StepEnd::Failed(format!("Unexpected error: {}", message)));
            }
        }

        let (status, error, result) = match state.end {
            None => (
                StepStatus::Completed,
                None,
                StepRunResult::completed(state.text.trim()),
            ),
            Some(StepEnd::Failed(message)) => (
                StepStatus::Failed,
                Some(message.clone()),
                StepRunResult::failed(message),
            ),
            Some(StepEnd::Aborted) => (
                StepStatus::Failed,
                Some(ABORTED_MARKER.to_string()),
                StepRunResult::aborted(),
            ),
        };

        if let Err(e) = self.writer.set_status(&plan_id, step_index, status, error) {
            tracing::error!(
                "[StepExecutor] Could not finish step {} of plan {}: {}",
                step_index,
                plan_id,
                e
            );
        }
        tracing::info!(
            "[StepExecutor] Step {} of plan {} ended: {}",
            step_index,
            plan_id,
            result.status
        );

        result
    }

    async fn stream_step(
        &self,
        request: &StepRunRequest,
        cancel: &CancellationToken,
        child: &CancellationToken,
        state: &mut RunState,
    ) -> AppResult<()> {
        if cancel.is_cancelled() {
            state.end_with(StepEnd::Aborted);
            return Ok(());
        }

        let invocation = InvocationRequest::new(request.context.clone(), request.capabilities.clone())
            .with_system(request.instruction.clone())
            .for_step(request.plan_id.clone(), request.step_index);
        let mut rx = self.invoker.invoke(invocation, child.clone()).await?;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = rx.recv() => match event {
                    Some(item) => Some(item?),
                    None if cancel.is_cancelled() => None,
                    None if state.is_ending() => break,
                    None => {
                        // The producer went away without ending its stream.
                        tracing::error!(
                            "[StepExecutor] Step {} invocation closed before stream end",
                            request.step_index
                        );
                        state.end_with(StepEnd::Failed(
                            "Unexpected error: invocation ended without stream end".to_string(),
                        ));
                        break;
                    }
                },
            };

            let Some(event) = event.filter(|_| !cancel.is_cancelled()) else {
                state.end_with(StepEnd::Aborted);
                child.cancel();
                tracing::info!("[StepExecutor] Step {} aborted", request.step_index);
                return Ok(());
            };

            // After a failure the stream is drained until it ends.
            if state.is_ending() {
                if event == InvocationEvent::StreamEnd {
                    break;
                }
                continue;
            }

            match event {
                InvocationEvent::ActionInvoked { call_id, name, .. } => {
                    self.writer
                        .record_action(&request.plan_id, request.step_index, &name)?;
                    if is_forbidden_action(&name) {
                        tracing::warn!(
                            "[StepExecutor] Step {} called plan-control action '{}'",
                            request.step_index,
                            name
                        );
                        state.end_with(StepEnd::Failed(format!(
                            "Step attempted forbidden action '{}'",
                            name
                        )));
                        child.cancel();
                    }
                    state.call_names.insert(call_id, name);
                }
                InvocationEvent::ActionResult {
                    call_id,
                    output,
                    is_error,
                } => {
                    let name = state
                        .call_names
                        .get(&call_id)
                        .cloned()
                        .unwrap_or(call_id);
                    if is_error {
                        tracing::warn!(
                            "[StepExecutor] Step {} action '{}' failed: {}",
                            request.step_index,
                            name,
                            output
                        );
                        state.end_with(StepEnd::Failed(output));
                        child.cancel();
                        continue;
                    }

                    self.writer.record_result_action(
                        &request.plan_id,
                        request.step_index,
                        &format!("{}: {}", name, preview(&output)),
                    )?;
                    self.sink.snapshot(SnapshotEvent::StepOutput {
                        id: request.plan_id.clone(),
                        data: StepOutputData {
                            step_index: request.step_index,
                            action_name: Some(name),
                            output,
                        },
                    });
                }
                InvocationEvent::TextDelta { content } => {
                    state.text.push_str(&content);
                    if request.emit_final_text {
                        self.sink.primary(InvocationEvent::TextDelta { content });
                    } else {
                        state.pending.push_str(&content);
                        if state.pending.chars().count() > self.flush_threshold
                            || state.pending.contains('\n')
                        {
                            self.flush(request, state);
                        }
                    }
                }
                InvocationEvent::StreamEnd => break,
            }
        }

        self.flush(request, state);
        Ok(())
    }

    /// Emit buffered text as one `step-output` snapshot.
    fn flush(&self, request: &StepRunRequest, state: &mut RunState) {
        if state.pending.is_empty() {
            return;
        }
        self.sink.snapshot(SnapshotEvent::StepOutput {
            id: request.plan_id.clone(),
            data: StepOutputData {
                step_index: request.step_index,
                action_name: None,
                output: std::mem::take(&mut state.pending),
            },
        });
    }
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("flush_threshold", &self.flush_threshold)
            .finish()
    }
}

fn preview(output: &str) -> String {
    if output.chars().count() <= RESULT_ACTION_PREVIEW_CHARS {
        return output.to_string();
    }
    let kept: String = output.chars().take(RESULT_ACTION_PREVIEW_CHARS).collect();
    format!("{}...", kept)
}
