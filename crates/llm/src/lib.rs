//! Plan Mode LLM
//!
//! Provider abstraction used by the plan mode engine to reach a language model:
//! - `LlmProvider` trait (single-shot and streaming completions)
//! - Message, tool and usage types shared with the engine
//! - An OpenAI-compatible chat-completions provider and its SSE stream adapter

pub mod openai;
pub mod provider;
pub mod streaming_adapters;
pub mod types;

// Re-export main types
pub use openai::OpenAIProvider;
pub use provider::LlmProvider;
pub use types::*;

// Re-export streaming adapters
pub use streaming_adapters::OpenAIAdapter;
