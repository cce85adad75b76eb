//! Integration Tests Module
//!
//! End-to-end tests of the plan mode engine through its public API: scripted
//! plan runs, progress store properties, and the LLM-backed invoker driven by
//! an in-memory provider.

// Shared builders and scripted doubles
mod support;

// Orchestrated plan runs (halting, cancellation, fallback, routing)
mod plan_mode_test;

// Progress store properties
mod progress_test;

// LlmInvoker tool loop under the orchestrator
mod llm_invoker_test;
