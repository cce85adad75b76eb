//! Progress Writer
//!
//! Single authoritative mutator of the per-plan progress store. Every mutation
//! runs as one read-modify-write under a mutex and emits the full record as a
//! `progress` snapshot before the lock is released, so snapshots leave in
//! mutation order.
//!
//! Transitions per step are monotonic:
//!
//! ```text
//! pending -> in_progress -> completed | failed
//! ```
//!
//! The one exception is the corrective reset of a stale `in_progress` step
//! back to `pending` when another step starts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use super::sink::PlanEventSink;
use super::types::{ProgressRecord, SnapshotEvent, StepProgress, StepStatus};
use crate::utils::error::{AppError, AppResult};

/// Owner of the progress store for one session scope.
pub struct ProgressWriter {
    store: Mutex<HashMap<String, ProgressRecord>>,
    sink: Arc<dyn PlanEventSink>,
}

impl ProgressWriter {
    pub fn new(sink: Arc<dyn PlanEventSink>) -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProgressRecord>> {
        // Mutations never leave a record half-written, so a poisoned store is
        // still consistent.
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, record: &ProgressRecord) {
        self.sink.snapshot(SnapshotEvent::Progress {
            id: record.plan_id.clone(),
            data: record.clone(),
        });
    }

    /// Create an all-pending record and emit it.
    ///
    /// Re-initializing with the same step count returns the existing record
    /// without emitting; a different step count is a validation error.
    pub fn initialize(&self, plan_id: &str, step_count: usize) -> AppResult<ProgressRecord> {
        let mut store = self.lock();

        if let Some(existing) = store.get(plan_id) {
            if existing.steps.len() == step_count {
                return Ok(existing.clone());
            }
            tracing::warn!(
                "[ProgressWriter] Plan {} already initialized with {} steps, refusing {}",
                plan_id,
                existing.steps.len(),
                step_count
            );
            return Err(AppError::validation(format!(
                "Plan {} already has {} steps; cannot re-initialize with {}",
                plan_id,
                existing.steps.len(),
                step_count
            )));
        }

        let record = ProgressRecord::new(plan_id, step_count);
        self.emit(&record);
        store.insert(plan_id.to_string(), record.clone());
        Ok(record)
    }

    /// Move one step to `status`.
    ///
    /// Indices past the end grow the record with pending placeholders.
    /// Writing `pending` or rewriting a terminal step is rejected.
    pub fn set_status(
        &self,
        plan_id: &str,
        step_index: usize,
        status: StepStatus,
        error_message: Option<String>,
    ) -> AppResult<()> {
        let mut store = self.lock();

        let Some(record) = store.get_mut(plan_id) else {
            tracing::error!(
                "[ProgressWriter] Status update for unknown plan {} (step {} -> {})",
                plan_id,
                step_index,
                status
            );
            return Err(AppError::not_found(format!("Plan not found: {}", plan_id)));
        };

        if status == StepStatus::Pending {
            tracing::warn!(
                "[ProgressWriter] Rejected write of pending to step {} of plan {}",
                step_index,
                plan_id
            );
            return Err(AppError::validation("Steps cannot be moved back to pending"));
        }

        if let Some(current) = record.steps.get(step_index) {
            if current.status.is_terminal() {
                tracing::warn!(
                    "[ProgressWriter] Rejected {} -> {} on step {} of plan {}",
                    current.status,
                    status,
                    step_index,
                    plan_id
                );
                return Err(AppError::validation(format!(
                    "Step {} is already {}",
                    step_index, current.status
                )));
            }
        }

        grow_to(record, step_index);
        let now = Utc::now();

        match status {
            StepStatus::InProgress => {
                for (index, step) in record.steps.iter_mut().enumerate() {
                    if index != step_index && step.status == StepStatus::InProgress {
                        tracing::warn!(
                            "[ProgressWriter] Resetting stale in-progress step {} of plan {}",
                            index,
                            plan_id
                        );
                        step.status = StepStatus::Pending;
                        step.start_time = None;
                        step.end_time = None;
                    }
                }

                let previous_end = step_index
                    .checked_sub(1)
                    .and_then(|prev| record.steps[prev].end_time);
                let step = &mut record.steps[step_index];
                if step.status != StepStatus::InProgress {
                    step.start_time = Some(previous_end.unwrap_or(now));
                }
                step.status = StepStatus::InProgress;
                step.end_time = None;
                step.error_message = None;
                record.current_step_index = Some(step_index);
            }
            StepStatus::Completed => {
                let step = &mut record.steps[step_index];
                step.status = StepStatus::Completed;
                step.start_time.get_or_insert(now);
                step.end_time = Some(now);
                step.error_message = None;
                record.current_step_index =
                    Some(step_index + 1).filter(|next| *next < record.steps.len());
            }
            StepStatus::Failed => {
                let step = &mut record.steps[step_index];
                step.status = StepStatus::Failed;
                step.start_time.get_or_insert(now);
                step.end_time = Some(now);
                step.error_message = error_message;
                record.current_step_index = None;
            }
            StepStatus::Pending => {
                return Err(AppError::validation("Steps cannot be moved back to pending"))
            }
        }

        tracing::debug!(
            "[ProgressWriter] Plan {} step {} -> {}",
            plan_id,
            step_index,
            status
        );
        self.emit(record);
        Ok(())
    }

    /// Append an invoked action name to the step's `toolsUsed`.
    pub fn record_action(&self, plan_id: &str, step_index: usize, name: &str) -> AppResult<()> {
        self.append(plan_id, step_index, |step| step.tools_used.push(name.to_string()))
    }

    /// Append a free-form result action to the step's `resultActions`.
    pub fn record_result_action(
        &self,
        plan_id: &str,
        step_index: usize,
        action: &str,
    ) -> AppResult<()> {
        self.append(plan_id, step_index, |step| {
            step.result_actions.push(action.to_string())
        })
    }

    fn append(
        &self,
        plan_id: &str,
        step_index: usize,
        apply: impl FnOnce(&mut StepProgress),
    ) -> AppResult<()> {
        let mut store = self.lock();
        let Some(record) = store.get_mut(plan_id) else {
            tracing::error!("[ProgressWriter] Append to unknown plan {}", plan_id);
            return Err(AppError::not_found(format!("Plan not found: {}", plan_id)));
        };

        grow_to(record, step_index);
        apply(&mut record.steps[step_index]);
        self.emit(record);
        Ok(())
    }

    /// Copy of the current record.
    pub fn snapshot(&self, plan_id: &str) -> Option<ProgressRecord> {
        self.lock().get(plan_id).cloned()
    }

    /// Remove a record when its owning session ends.
    pub fn discard(&self, plan_id: &str) -> Option<ProgressRecord> {
        self.lock().remove(plan_id)
    }
}

impl std::fmt::Debug for ProgressWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressWriter")
            .field("plans", &self.lock().len())
            .finish()
    }
}

/// Extend `record` with pending placeholders so that `index` is valid.
fn grow_to(record: &mut ProgressRecord, index: usize) {
    if index >= record.steps.len() {
        tracing::warn!(
            "[ProgressWriter] Step {} is beyond plan {} ({} steps); extending",
            index,
            record.plan_id,
            record.steps.len()
        );
        record.steps.resize(index + 1, StepProgress::pending());
    }
}
