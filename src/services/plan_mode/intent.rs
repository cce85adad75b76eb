//! Plan Intent
//!
//! Decides whether a request should run in plan mode at all.

use plan_mode_llm::Message;

/// Answers "should this request be planned?".
pub trait PlanIntent: Send + Sync {
    fn should_plan(&self, user_request: &str, conversation: &[Message]) -> bool;
}

impl<F> PlanIntent for F
where
    F: Fn(&str, &[Message]) -> bool + Send + Sync,
{
    fn should_plan(&self, user_request: &str, conversation: &[Message]) -> bool {
        self(user_request, conversation)
    }
}

/// Fixed decision, e.g. from a user toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedIntent {
    Always,
    Never,
}

impl PlanIntent for FixedIntent {
    fn should_plan(&self, _user_request: &str, _conversation: &[Message]) -> bool {
        matches!(self, FixedIntent::Always)
    }
}
