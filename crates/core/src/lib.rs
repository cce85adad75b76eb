//! Plan Mode Core
//!
//! Foundational traits, error types and stream events for the plan mode
//! workspace. This crate has no dependency on the LLM provider layer or on the
//! engine itself.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `context` - Per-call context handed to capabilities (`CapabilityContext`)
//! - `capability` - Capability abstraction (`CapabilityDefinition`, `CapabilityExecutable`, `CapabilitySet`)
//! - `streaming` - Unified stream event types and adapter trait

pub mod capability;
pub mod context;
pub mod error;
pub mod streaming;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Capability Context ─────────────────────────────────────────────────
pub use context::CapabilityContext;

// ── Capabilities ───────────────────────────────────────────────────────
pub use capability::{
    Capability, CapabilityDefinition, CapabilityExecutable, CapabilitySet, FunctionCapability,
};

// ── Streaming Types ────────────────────────────────────────────────────
pub use streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
