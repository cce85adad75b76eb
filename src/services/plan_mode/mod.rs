//! Plan Mode Service
//!
//! Turns one request into a validated outline and runs it step by step:
//! - Outline generation with a non-fatal quality gate
//! - Sequential step execution scoped to one step at a time
//! - Authoritative progress store with snapshot events
//! - Unscoped fallback when no plan is produced

pub mod config;
pub mod intent;
pub mod invocation;
pub mod orchestrator;
pub mod outline;
pub mod progress;
pub mod prompts;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;
pub mod sink;
pub mod step_executor;
pub mod types;
pub mod unscoped;
pub mod validator;

pub use config::{OutlineLimits, PlanModeConfig};
pub use intent::{FixedIntent, PlanIntent};
pub use invocation::{InvocationEvent, InvocationRequest, InvocationStream, LlmInvoker, ModelInvoker};
pub use orchestrator::PlanOrchestrator;
pub use outline::{OutlineGenerator, OutlineOutcome, RejectReason};
pub use progress::ProgressWriter;
#[cfg(any(test, feature = "testing"))]
pub use scripted::{ScriptStep, ScriptedInvoker};
pub use sink::{ChannelSink, PlanEventSink, PlanOutput, TranscriptRecorder};
pub use step_executor::{StepExecutor, StepRunRequest};
pub use types::{
    Plan, PlanRunState, ProgressRecord, SnapshotEvent, StepComplexity, StepOutputData,
    StepProgress, StepRunResult, StepRunStatus, StepSpec, StepStatus, ABORTED_MARKER,
    FORBIDDEN_ACTIONS, OUTLINE_ACTION,
};
pub use unscoped::{DirectExecution, UnscopedExecution};
pub use validator::{validate_outline, OutlineIssue};
