//! Plan Mode Engine
//!
//! Decomposes a request into an ordered plan and executes it one step at a
//! time against a model, reporting authoritative progress snapshots.
//! It includes:
//! - The plan mode services (outline, step execution, progress, orchestration)
//! - The model invoker bridging to `plan-mode-llm` providers
//! - Configuration and error types

pub mod services;
pub mod utils;

pub use services::plan_mode::{
    ChannelSink, LlmInvoker, ModelInvoker, PlanEventSink, PlanModeConfig, PlanOrchestrator,
    PlanOutput, PlanRunState, ProgressWriter, SnapshotEvent, TranscriptRecorder,
};
pub use utils::error::{AppError, AppResult};
