//! Capability Context
//!
//! Read-only information handed to a capability for one call. Capabilities
//! cannot touch progress state or control the run; they only learn where the
//! call comes from.

/// Context for a single capability call.
#[derive(Debug, Clone, Default)]
pub struct CapabilityContext {
    /// Plan the call belongs to, if it runs inside a plan step.
    plan_id: Option<String>,
    /// Index of the step issuing the call.
    step_index: Option<usize>,
    /// Identifier the model assigned to this call.
    call_id: String,
}

impl CapabilityContext {
    /// Create a context for a call outside any plan.
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            plan_id: None,
            step_index: None,
            call_id: call_id.into(),
        }
    }

    /// Attach the plan step that issued the call.
    pub fn with_step(mut self, plan_id: impl Into<String>, step_index: usize) -> Self {
        self.plan_id = Some(plan_id.into());
        self.step_index = Some(step_index);
        self
    }

    pub fn plan_id(&self) -> Option<&str> {
        self.plan_id.as_deref()
    }

    pub fn step_index(&self) -> Option<usize> {
        self.step_index
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }
}
