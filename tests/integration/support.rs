//! Shared builders for the integration tests.

use std::sync::Arc;

use plan_mode_engine::services::plan_mode::{
    PlanOrchestrator, ProgressRecord, ScriptStep, ScriptedInvoker, SnapshotEvent, StepStatus,
    TranscriptRecorder,
};
use serde_json::{json, Value};

/// Outline arguments with one step per title.
pub fn outline_args(title: &str, step_titles: &[&str]) -> Value {
    let steps: Vec<Value> = step_titles
        .iter()
        .map(|t| json!({ "title": t, "description": format!("Do {}", t) }))
        .collect();
    json!({ "title": title, "description": "Test plan", "steps": steps })
}

/// Outline invocation script: the `outline` action, then wait to be cut off.
pub fn outline_script(step_titles: &[&str]) -> Vec<ScriptStep> {
    vec![
        ScriptStep::action("outline-1", "outline", outline_args("Test plan", step_titles)),
        ScriptStep::WaitForCancel,
    ]
}

/// Step script that answers with `text` and ends.
pub fn text_script(text: &str) -> Vec<ScriptStep> {
    vec![ScriptStep::text(text), ScriptStep::end()]
}

pub struct Run {
    pub invoker: Arc<ScriptedInvoker>,
    pub recorder: Arc<TranscriptRecorder>,
    pub orchestrator: PlanOrchestrator,
}

/// Orchestrator over a scripted invoker and a transcript recorder.
pub fn scripted_run(scripts: Vec<Vec<ScriptStep>>) -> Run {
    let invoker = Arc::new(ScriptedInvoker::new());
    for script in scripts {
        invoker.push_script(script);
    }
    let recorder = Arc::new(TranscriptRecorder::new());
    let orchestrator = PlanOrchestrator::new(invoker.clone(), recorder.clone());
    Run {
        invoker,
        recorder,
        orchestrator,
    }
}

/// Id of the single plan emitted in the transcript.
pub fn plan_id(recorder: &TranscriptRecorder) -> String {
    let ids: Vec<String> = recorder
        .snapshots()
        .into_iter()
        .filter_map(|e| match e {
            SnapshotEvent::Plan { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 1, "expected exactly one plan snapshot");
    ids[0].clone()
}

pub fn statuses(record: &ProgressRecord) -> Vec<StepStatus> {
    record.steps.iter().map(|s| s.status).collect()
}
