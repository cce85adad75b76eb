//! LLM Provider Trait
//!
//! Common interface the plan mode engine uses to talk to a model backend.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig, ToolCallMode,
    ToolDefinition,
};
use plan_mode_core::streaming::UnifiedStreamEvent;

/// Trait that all LLM providers must implement.
///
/// Provides:
/// - Single message completions (`send_message`)
/// - Streaming completions (`stream_message`)
/// - Health checking
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider name for identification.
    fn name(&self) -> &'static str;

    /// Returns the current model being used.
    fn model(&self) -> &str;

    /// Returns whether this provider supports extended thinking/reasoning.
    fn supports_thinking(&self) -> bool;

    /// Returns whether this provider supports tool calling.
    fn supports_tools(&self) -> bool;

    /// Send a message and get a complete response.
    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse>;

    /// Stream a message response via a channel.
    ///
    /// Only content events (text and thinking deltas, stream errors) are
    /// forwarded on `tx`. Tool calls come back on the returned response so
    /// the caller decides when they are announced and executed.
    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse>;

    /// Check that the endpoint is reachable and the credentials are accepted.
    ///
    /// The default sends a one-word prompt with tools disabled.
    async fn health_check(&self) -> LlmResult<()> {
        let options = LlmRequestOptions {
            tool_call_mode: ToolCallMode::None,
            ..Default::default()
        };
        self.send_message(vec![Message::user("ping")], None, vec![], options)
            .await
            .map(|_| ())
    }

    /// Get the configuration for this provider.
    fn config(&self) -> &ProviderConfig;
}

/// Error for a provider whose API key is not configured.
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("API key not configured for {}", provider),
    }
}

/// Map an HTTP error status and body to an `LlmError`.
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> LlmError {
    match status {
        401 => LlmError::AuthenticationFailed {
            message: format!("{}: Invalid API key", provider),
        },
        403 => LlmError::AuthenticationFailed {
            message: format!("{}: Access denied", provider),
        },
        404 => LlmError::ModelNotFound {
            model: body.to_string(),
        },
        429 => LlmError::RateLimited {
            message: body.to_string(),
            retry_after: None,
        },
        400 | 422 => LlmError::InvalidRequest {
            message: body.to_string(),
        },
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}
