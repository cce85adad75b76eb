//! Unscoped Execution
//!
//! What runs when no plan is produced: the request is answered in one
//! invocation with the full capability set.

use std::sync::Arc;

use async_trait::async_trait;
use plan_mode_core::CapabilitySet;
use plan_mode_llm::Message;
use tokio_util::sync::CancellationToken;

use super::invocation::{InvocationEvent, InvocationRequest, ModelInvoker};
use super::sink::PlanEventSink;
use crate::utils::error::AppResult;

/// Fallback collaborator for requests that run without a plan.
#[async_trait]
pub trait UnscopedExecution: Send + Sync {
    /// Answer the last message of `conversation`. Returns the streamed text.
    async fn run(
        &self,
        conversation: Vec<Message>,
        capabilities: CapabilitySet,
        cancel: &CancellationToken,
    ) -> AppResult<String>;
}

/// Streams every invocation event straight to the primary channel.
pub struct DirectExecution {
    invoker: Arc<dyn ModelInvoker>,
    sink: Arc<dyn PlanEventSink>,
    system: Option<String>,
}

impl DirectExecution {
    pub fn new(invoker: Arc<dyn ModelInvoker>, sink: Arc<dyn PlanEventSink>) -> Self {
        Self {
            invoker,
            sink,
            system: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[async_trait]
impl UnscopedExecution for DirectExecution {
    async fn run(
        &self,
        conversation: Vec<Message>,
        capabilities: CapabilitySet,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        let mut request = InvocationRequest::new(conversation, capabilities);
        if let Some(system) = &self.system {
            request = request.with_system(system.clone());
        }

        let child = cancel.child_token();
        let mut rx = self.invoker.invoke(request, child.clone()).await?;
        let mut text = String::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    child.cancel();
                    tracing::info!("[PlanMode] Unscoped execution cancelled");
                    break;
                }
                event = rx.recv() => match event {
                    Some(Ok(event)) => {
                        let done = event == InvocationEvent::StreamEnd;
                        if let InvocationEvent::TextDelta { content } = &event {
                            text.push_str(content);
                        }
                        self.sink.primary(event);
                        if done {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        child.cancel();
                        return Err(e);
                    }
                    None => break,
                },
            }
        }

        Ok(text)
    }
}

impl std::fmt::Debug for DirectExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectExecution")
            .field("system", &self.system)
            .finish()
    }
}
