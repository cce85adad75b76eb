//! Progress Store Integration Tests
//!
//! Properties of `ProgressWriter` observed through its snapshot stream.

use std::sync::Arc;
use std::thread;

use plan_mode_engine::services::plan_mode::{
    ProgressWriter, StepStatus, TranscriptRecorder,
};
use plan_mode_engine::AppError;

use super::support::statuses;

fn writer() -> (Arc<ProgressWriter>, Arc<TranscriptRecorder>) {
    let recorder = Arc::new(TranscriptRecorder::new());
    (Arc::new(ProgressWriter::new(recorder.clone())), recorder)
}

#[test]
fn test_out_of_order_index_grows_record() {
    let (writer, recorder) = writer();
    writer.initialize("p", 1).unwrap();

    writer.set_status("p", 4, StepStatus::InProgress, None).unwrap();

    let record = recorder.latest_progress("p").unwrap();
    assert_eq!(record.steps.len(), 5);
    assert_eq!(
        statuses(&record)[1..4],
        [StepStatus::Pending, StepStatus::Pending, StepStatus::Pending]
    );
    assert_eq!(record.steps[4].status, StepStatus::InProgress);
    assert_eq!(record.current_step_index, Some(4));
}

#[test]
fn test_stale_in_progress_is_reset() {
    let (writer, recorder) = writer();
    writer.initialize("p", 3).unwrap();

    writer.set_status("p", 0, StepStatus::InProgress, None).unwrap();
    writer.set_status("p", 2, StepStatus::InProgress, None).unwrap();

    let record = recorder.latest_progress("p").unwrap();
    assert_eq!(
        statuses(&record),
        vec![StepStatus::Pending, StepStatus::Pending, StepStatus::InProgress]
    );
    assert!(record.steps[0].start_time.is_none());
    for snapshot in recorder.progress_history("p") {
        assert!(snapshot.count(StepStatus::InProgress) <= 1);
    }
}

#[test]
fn test_timestamps_follow_status() {
    let (writer, recorder) = writer();
    writer.initialize("p", 2).unwrap();
    writer.set_status("p", 0, StepStatus::InProgress, None).unwrap();
    writer.set_status("p", 0, StepStatus::Completed, None).unwrap();
    writer
        .set_status("p", 1, StepStatus::Failed, Some("boom".to_string()))
        .unwrap();

    for record in recorder.progress_history("p") {
        for step in &record.steps {
            assert_eq!(step.start_time.is_some(), step.status != StepStatus::Pending);
            assert_eq!(step.end_time.is_some(), step.status.is_terminal());
            if let (Some(start), Some(end)) = (step.start_time, step.end_time) {
                assert!(start <= end);
            }
        }
    }
    let record = recorder.latest_progress("p").unwrap();
    assert_eq!(record.steps[1].error_message.as_deref(), Some("boom"));
}

#[test]
fn test_rejected_writes_emit_nothing() {
    let (writer, recorder) = writer();
    writer.initialize("p", 1).unwrap();
    writer.set_status("p", 0, StepStatus::InProgress, None).unwrap();
    writer.set_status("p", 0, StepStatus::Completed, None).unwrap();
    let emitted = recorder.progress_history("p").len();

    let err = writer
        .set_status("p", 0, StepStatus::Failed, Some("late".to_string()))
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(matches!(
        writer.set_status("missing", 0, StepStatus::InProgress, None),
        Err(AppError::NotFound(_))
    ));

    assert_eq!(recorder.progress_history("p").len(), emitted);
    assert_eq!(
        writer.snapshot("p").unwrap().steps[0].status,
        StepStatus::Completed
    );
}

#[test]
fn test_concurrent_writers_keep_snapshot_order() {
    let (writer, recorder) = writer();
    writer.initialize("p", 8).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|index| {
            let writer = writer.clone();
            thread::spawn(move || {
                for n in 0..10 {
                    writer
                        .record_action("p", index, &format!("action-{}", n))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every snapshot carries exactly one more action than the one before.
    let totals: Vec<usize> = recorder
        .progress_history("p")
        .iter()
        .map(|r| r.steps.iter().map(|s| s.tools_used.len()).sum())
        .collect();
    assert_eq!(totals.len(), 81);
    for (i, total) in totals.iter().enumerate() {
        assert_eq!(*total, i);
    }
}

#[test]
fn test_discard_removes_record() {
    let (writer, _) = writer();
    writer.initialize("p", 2).unwrap();
    assert!(writer.discard("p").is_some());
    assert!(writer.snapshot("p").is_none());
    assert!(writer.initialize("p", 3).is_ok());
}
