//! Plan Mode Integration Tests
//!
//! Full plan runs through `PlanOrchestrator` with scripted model output:
//! - Halting on a forbidden action and on cancellation
//! - Progress timeline of a finished run
//! - Unscoped fallback and intent routing
//! - Outline quality diagnostics

use plan_mode_core::CapabilitySet;
use plan_mode_engine::services::plan_mode::{
    FixedIntent, InvocationEvent, OutlineGenerator, OutlineIssue, OutlineOutcome,
    PlanEventSink, PlanOrchestrator, PlanOutput, PlanRunState, ScriptStep, ScriptedInvoker,
    SnapshotEvent, StepStatus, TranscriptRecorder, ABORTED_MARKER,
    prompts::DEFAULT_OUTLINE_INSTRUCTION,
};
use plan_mode_llm::Message;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::support::{outline_script, plan_id, scripted_run, statuses, text_script};

// ============================================================================
// Halting
// ============================================================================

#[tokio::test]
async fn test_forbidden_action_in_first_step_halts_plan() {
    let run = scripted_run(vec![
        outline_script(&["Gather", "Analyze", "Report"]),
        vec![
            ScriptStep::text("Re-planning first"),
            ScriptStep::action("c1", "plan", json!({})),
            ScriptStep::WaitForCancel,
        ],
    ]);

    let state = run
        .orchestrator
        .execute("Write a report", &[], &CapabilitySet::new(), &CancellationToken::new())
        .await;

    assert_eq!(state, PlanRunState::HaltedOnFailure);
    assert_eq!(run.invoker.invocation_count(), 2);

    let id = plan_id(&run.recorder);
    let record = run.orchestrator.progress().snapshot(&id).unwrap();
    assert_eq!(
        statuses(&record),
        vec![StepStatus::Failed, StepStatus::Pending, StepStatus::Pending]
    );
    assert!(record.steps[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("'plan'"));
    assert!(record.steps[1].start_time.is_none());
    assert_eq!(record.current_step_index, None);
}

#[tokio::test]
async fn test_cancellation_during_second_step_aborts() {
    let cancel = CancellationToken::new();
    let run = scripted_run(vec![
        outline_script(&["Gather", "Analyze", "Report"]),
        text_script("Gathered"),
        vec![
            ScriptStep::text("Analyzing"),
            ScriptStep::Cancel(cancel.clone()),
            ScriptStep::WaitForCancel,
        ],
    ]);

    let state = run
        .orchestrator
        .execute("Write a report", &[], &CapabilitySet::new(), &cancel)
        .await;

    assert_eq!(state, PlanRunState::HaltedOnAbort);
    assert_eq!(run.invoker.invocation_count(), 3);

    let id = plan_id(&run.recorder);
    let record = run.orchestrator.progress().snapshot(&id).unwrap();
    assert_eq!(
        statuses(&record),
        vec![StepStatus::Completed, StepStatus::Failed, StepStatus::Pending]
    );
    assert_eq!(record.steps[1].error_message.as_deref(), Some(ABORTED_MARKER));
    assert!(record.steps[1].is_aborted());
}

/// Records everything and fires `cancel` as soon as step 0 is stored completed.
struct CancelAfterFirstStep {
    recorder: Arc<TranscriptRecorder>,
    cancel: CancellationToken,
}

impl PlanEventSink for CancelAfterFirstStep {
    fn snapshot(&self, event: SnapshotEvent) {
        if let SnapshotEvent::Progress { data, .. } = &event {
            if data.steps[0].status == StepStatus::Completed {
                self.cancel.cancel();
            }
        }
        self.recorder.snapshot(event);
    }

    fn primary(&self, event: InvocationEvent) {
        self.recorder.primary(event);
    }
}

#[tokio::test]
async fn test_cancellation_between_steps_never_starts_next_step() {
    let cancel = CancellationToken::new();
    let recorder = Arc::new(TranscriptRecorder::new());
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .with_script(outline_script(&["Gather", "Analyze"]))
            .with_script(text_script("Gathered"))
            .with_script(text_script("Analysis")),
    );
    let sink = Arc::new(CancelAfterFirstStep {
        recorder: recorder.clone(),
        cancel: cancel.clone(),
    });
    let orchestrator = PlanOrchestrator::new(invoker.clone(), sink);

    let state = orchestrator
        .execute("Write a report", &[], &CapabilitySet::new(), &cancel)
        .await;

    assert_eq!(state, PlanRunState::HaltedOnAbort);
    // The outline call and step 1 only.
    assert_eq!(invoker.invocation_count(), 2);

    let id = plan_id(&recorder);
    let record = orchestrator.progress().snapshot(&id).unwrap();
    assert_eq!(
        statuses(&record),
        vec![StepStatus::Completed, StepStatus::Pending]
    );
    assert!(record.steps[1].start_time.is_none());
    assert!(record.steps[1].error_message.is_none());
    for snapshot in recorder.progress_history(&id) {
        assert_ne!(snapshot.steps[1].status, StepStatus::InProgress);
    }
}

#[tokio::test]
async fn test_stream_error_halts_with_unexpected_failure() {
    let run = scripted_run(vec![
        outline_script(&["First", "Second"]),
        vec![ScriptStep::text("partial"), ScriptStep::Fail("connection reset".into())],
    ]);

    let state = run
        .orchestrator
        .execute("Do it", &[], &CapabilitySet::new(), &CancellationToken::new())
        .await;

    assert_eq!(state, PlanRunState::HaltedOnFailure);
    let record = run
        .orchestrator
        .progress()
        .snapshot(&plan_id(&run.recorder))
        .unwrap();
    let error = record.steps[0].error_message.as_deref().unwrap();
    assert!(error.starts_with("Unexpected error"));
    assert!(error.contains("connection reset"));
    assert_eq!(record.steps[1].status, StepStatus::Pending);
}

// ============================================================================
// Finished Runs
// ============================================================================

#[tokio::test]
async fn test_finished_run_timeline_and_channels() {
    let run = scripted_run(vec![
        outline_script(&["Gather", "Analyze", "Report"]),
        text_script("Gathered three sources\n"),
        text_script("Analysis done"),
        text_script("Final report"),
    ]);

    let state = run
        .orchestrator
        .execute("Write a report", &[], &CapabilitySet::new(), &CancellationToken::new())
        .await;
    assert_eq!(state, PlanRunState::Finished);

    let id = plan_id(&run.recorder);
    let history = run.recorder.progress_history(&id);

    // Never more than one step in flight.
    for record in &history {
        assert!(record.count(StepStatus::InProgress) <= 1);
    }

    // Each step starts where the previous one ended.
    let last = history.last().unwrap();
    assert_eq!(statuses(last), vec![StepStatus::Completed; 3]);
    for pair in last.steps.windows(2) {
        assert_eq!(pair[1].start_time, pair[0].end_time);
        assert!(pair[0].start_time <= pair[0].end_time);
    }
    assert_eq!(last.current_step_index, None);

    // Only the final step reaches the primary channel.
    assert_eq!(run.recorder.primary_text(), "Final report");
    let step_output_steps: Vec<usize> = run
        .recorder
        .snapshots()
        .into_iter()
        .filter_map(|e| match e {
            SnapshotEvent::StepOutput { data, .. } => Some(data.step_index),
            _ => None,
        })
        .collect();
    assert_eq!(step_output_steps, vec![0, 1]);
}

#[tokio::test]
async fn test_plan_snapshot_precedes_step_events() {
    let run = scripted_run(vec![
        outline_script(&["One", "Two"]),
        text_script("first\n"),
        text_script("second"),
    ]);

    run.orchestrator
        .execute("Go", &[], &CapabilitySet::new(), &CancellationToken::new())
        .await;

    let outputs = run.recorder.outputs();
    let plan_at = outputs
        .iter()
        .position(|o| matches!(o, PlanOutput::Snapshot(SnapshotEvent::Plan { .. })))
        .unwrap();
    let first_step_output = outputs
        .iter()
        .position(|o| matches!(o, PlanOutput::Snapshot(SnapshotEvent::StepOutput { .. })))
        .unwrap();
    assert!(plan_at < first_step_output);

    let wire = serde_json::to_value(&outputs[first_step_output]).unwrap();
    assert_eq!(wire["channel"], "snapshot");
    assert_eq!(wire["event"]["kind"], "step-output");
    assert_eq!(wire["event"]["data"]["stepIndex"], 0);
    assert!(wire["event"]["data"]["actionName"].is_null());
}

// ============================================================================
// Fallback & Routing
// ============================================================================

#[tokio::test]
async fn test_no_outline_falls_back_to_unscoped() {
    let run = scripted_run(vec![
        text_script("This is simple enough to just answer."),
        text_script("Direct answer"),
    ]);

    let state = run
        .orchestrator
        .execute("What is 2 + 2?", &[], &CapabilitySet::new(), &CancellationToken::new())
        .await;

    assert_eq!(state, PlanRunState::Unscoped);
    assert!(run.recorder.snapshots().is_empty());
    assert_eq!(run.recorder.primary_text(), "Direct answer");
}

#[tokio::test]
async fn test_malformed_outline_falls_back_to_unscoped() {
    let run = scripted_run(vec![
        vec![
            ScriptStep::action("o1", "outline", json!({ "title": 42, "steps": "none" })),
            ScriptStep::WaitForCancel,
        ],
        text_script("Answered anyway"),
    ]);

    let state = run
        .orchestrator
        .execute("Plan my week", &[], &CapabilitySet::new(), &CancellationToken::new())
        .await;

    assert_eq!(state, PlanRunState::Unscoped);
    assert_eq!(run.recorder.primary_text(), "Answered anyway");
}

#[tokio::test]
async fn test_route_respects_intent() {
    let run = scripted_run(vec![text_script("Hello!")]);
    let history = vec![Message::user("hi"), Message::assistant("hello")];

    let state = run
        .orchestrator
        .route(
            "thanks",
            &history,
            &CapabilitySet::new(),
            &FixedIntent::Never,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(state, PlanRunState::Unscoped);
    let requests = run.invoker.requests();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].capabilities.contains("outline"));
    assert_eq!(requests[0].messages.len(), 3);

    let planned = scripted_run(vec![
        outline_script(&["One", "Two"]),
        text_script("a"),
        text_script("b"),
    ]);
    let long_requests = |request: &str, _: &[Message]| request.len() > 10;
    let state = planned
        .orchestrator
        .route(
            "Organize a team offsite",
            &[],
            &CapabilitySet::new(),
            &long_requests,
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(state, PlanRunState::Finished);
}

// ============================================================================
// Outline Quality Gate
// ============================================================================

#[tokio::test]
async fn test_single_step_outline_is_accepted_with_diagnostic() {
    let invoker = Arc::new(ScriptedInvoker::new().with_script(outline_script(&["Only step"])));
    let generator = OutlineGenerator::new(invoker);

    let outcome = generator
        .generate(
            &[Message::user("Tiny task")],
            DEFAULT_OUTLINE_INSTRUCTION,
            &CancellationToken::new(),
        )
        .await;

    let OutlineOutcome::Accepted { plan, issues } = outcome else {
        panic!("expected an accepted outline");
    };
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(
        issues,
        vec![OutlineIssue::StepCount {
            count: 1,
            min: 2,
            max: 15
        }]
    );
}

#[tokio::test]
async fn test_single_step_plan_still_runs() {
    let run = scripted_run(vec![outline_script(&["Only step"]), text_script("All done")]);

    let state = run
        .orchestrator
        .execute("Tiny task", &[], &CapabilitySet::new(), &CancellationToken::new())
        .await;

    assert_eq!(state, PlanRunState::Finished);
    assert_eq!(run.recorder.primary_text(), "All done");
}
