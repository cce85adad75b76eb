//! Scripted Invoker
//!
//! In-memory [`ModelInvoker`] that replays one script per invocation. Only
//! built for tests and behind the `testing` feature.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::invocation::{InvocationEvent, InvocationRequest, InvocationStream, ModelInvoker};
use crate::utils::error::{AppError, AppResult};

/// One step of a script.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Send the event.
    Emit(InvocationEvent),
    /// Send an `Err` item.
    Fail(String),
    /// Cancel an outside token (e.g. the run's top-level token).
    Cancel(CancellationToken),
    /// Block until the invocation's own token is cancelled, then stop.
    WaitForCancel,
    /// Panic inside `invoke` itself, before any event is sent.
    Panic(String),
}

impl ScriptStep {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Emit(InvocationEvent::TextDelta {
            content: content.into(),
        })
    }

    pub fn action(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self::Emit(InvocationEvent::ActionInvoked {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        })
    }

    pub fn result(call_id: impl Into<String>, output: impl Into<String>, is_error: bool) -> Self {
        Self::Emit(InvocationEvent::ActionResult {
            call_id: call_id.into(),
            output: output.into(),
            is_error,
        })
    }

    pub fn end() -> Self {
        Self::Emit(InvocationEvent::StreamEnd)
    }
}

/// Replays queued scripts, one per `invoke` call. The channel closes when a
/// script runs out, so a script without `end()` models a producer that died.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    requests: Mutex<Vec<InvocationRequest>>,
    tokens: Mutex<Vec<CancellationToken>>,
    start_error: Mutex<Option<String>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a script for the next unscripted invocation.
    pub fn with_script(self, script: Vec<ScriptStep>) -> Self {
        self.push_script(script);
        self
    }

    pub fn push_script(&self, script: Vec<ScriptStep>) {
        lock(&self.scripts).push_back(script);
    }

    /// Make the next `invoke` return `Err` without starting.
    pub fn fail_next_start(&self, message: impl Into<String>) {
        *lock(&self.start_error) = Some(message.into());
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<InvocationRequest> {
        lock(&self.requests).clone()
    }

    /// The token handed to each invocation, in order.
    pub fn tokens(&self) -> Vec<CancellationToken> {
        lock(&self.tokens).clone()
    }

    pub fn invocation_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        request: InvocationRequest,
        cancel: CancellationToken,
    ) -> AppResult<InvocationStream> {
        if let Some(message) = lock(&self.start_error).take() {
            return Err(AppError::invocation(message));
        }

        lock(&self.requests).push(request);
        lock(&self.tokens).push(cancel.clone());
        let script = lock(&self.scripts).pop_front().unwrap_or_default();

        if let Some(message) = script.iter().find_map(|step| match step {
            ScriptStep::Panic(message) => Some(message.clone()),
            _ => None,
        }) {
            panic!("{}", message);
        }

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for step in script {
                if cancel.is_cancelled() {
                    return;
                }
                let item = match step {
                    ScriptStep::Emit(event) => Ok(event),
                    ScriptStep::Fail(message) => Err(AppError::invocation(message)),
                    ScriptStep::Cancel(token) => {
                        token.cancel();
                        continue;
                    }
                    ScriptStep::WaitForCancel => {
                        cancel.cancelled().await;
                        return;
                    }
                    ScriptStep::Panic(_) => continue,
                };
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}
