//! Plan Mode Core Types
//!
//! Data model shared by the outline generator, the progress writer, the step
//! executor and the orchestrator, plus the snapshot events pushed to a
//! watching client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error marker stored on a `failed` step that was cancelled.
pub const ABORTED_MARKER: &str = "aborted";

/// Name of the structured-output action the outline generator exposes.
pub const OUTLINE_ACTION: &str = "outline";

/// Plan-control actions reserved for the orchestration layer. A step
/// invocation that calls any of these fails.
pub const FORBIDDEN_ACTIONS: [&str; 3] = ["outline", "plan", "progress"];

/// Whether `name` is a plan-control action.
pub fn is_forbidden_action(name: &str) -> bool {
    FORBIDDEN_ACTIONS.contains(&name)
}

// ============================================================================
// Plan Types
// ============================================================================

/// Rough effort tier of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepComplexity {
    Simple,
    Moderate,
    Complex,
}

impl std::fmt::Display for StepComplexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepComplexity::Simple => write!(f, "simple"),
            StepComplexity::Moderate => write!(f, "moderate"),
            StepComplexity::Complex => write!(f, "complex"),
        }
    }
}

/// A single step in a Plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// 0-based indices of prerequisite steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<StepComplexity>,
    /// Free text, e.g. "10 minutes".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<String>,
}

impl StepSpec {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            depends_on: None,
            complexity: None,
            estimated_duration: None,
        }
    }
}

/// Ordered steps produced once per run. Immutable after acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepSpec>,
}

// ============================================================================
// Progress Types
// ============================================================================

/// Stored status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::InProgress => write!(f, "in_progress"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Progress of one step.
///
/// `start_time` is set iff the status is not pending; `end_time` is set iff
/// the status is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepProgress {
    pub status: StepStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub result_actions: Vec<String>,
}

impl StepProgress {
    pub fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            start_time: None,
            end_time: None,
            error_message: None,
            tools_used: Vec::new(),
            result_actions: Vec::new(),
        }
    }

    /// Failed with the cancellation marker.
    pub fn is_aborted(&self) -> bool {
        self.status == StepStatus::Failed && self.error_message.as_deref() == Some(ABORTED_MARKER)
    }
}

/// Authoritative status of every step of one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub plan_id: String,
    pub steps: Vec<StepProgress>,
    pub current_step_index: Option<usize>,
}

impl ProgressRecord {
    /// All-pending record with one entry per step.
    pub fn new(plan_id: impl Into<String>, step_count: usize) -> Self {
        Self {
            plan_id: plan_id.into(),
            steps: vec![StepProgress::pending(); step_count],
            current_step_index: None,
        }
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

// ============================================================================
// Step Run Types
// ============================================================================

/// Terminal outcome of one step run, as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    Completed,
    Failed,
    Aborted,
}

impl std::fmt::Display for StepRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepRunStatus::Completed => write!(f, "completed"),
            StepRunStatus::Failed => write!(f, "failed"),
            StepRunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Value returned by the step executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRunResult {
    pub status: StepRunStatus,
    /// Trimmed step text; empty unless completed.
    pub output: String,
    pub error: Option<String>,
}

impl StepRunResult {
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            status: StepRunStatus::Completed,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StepRunStatus::Failed,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn aborted() -> Self {
        Self {
            status: StepRunStatus::Aborted,
            output: String::new(),
            error: Some(ABORTED_MARKER.to_string()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepRunStatus::Completed
    }
}

/// Derived terminal state of a whole plan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanRunState {
    /// No plan was produced; the request ran without one.
    Unscoped,
    Finished,
    HaltedOnFailure,
    HaltedOnAbort,
}

impl std::fmt::Display for PlanRunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanRunState::Unscoped => write!(f, "unscoped"),
            PlanRunState::Finished => write!(f, "finished"),
            PlanRunState::HaltedOnFailure => write!(f, "halted-on-failure"),
            PlanRunState::HaltedOnAbort => write!(f, "halted-on-abort"),
        }
    }
}

// ============================================================================
// Snapshot Events
// ============================================================================

/// Payload of a `step-output` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutputData {
    pub step_index: usize,
    /// Action the output belongs to; `None` for buffered text.
    pub action_name: Option<String>,
    pub output: String,
}

/// Event pushed to the watching client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SnapshotEvent {
    Plan { id: String, data: Plan },
    Progress { id: String, data: ProgressRecord },
    StepOutput { id: String, data: StepOutputData },
}

impl SnapshotEvent {
    /// Plan id the event belongs to.
    pub fn id(&self) -> &str {
        match self {
            SnapshotEvent::Plan { id, .. }
            | SnapshotEvent::Progress { id, .. }
            | SnapshotEvent::StepOutput { id, .. } => id,
        }
    }
}
