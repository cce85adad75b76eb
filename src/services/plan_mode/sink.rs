//! Event Sinks
//!
//! Where plan mode output goes: snapshot events for a watching client and raw
//! text events for the primary channel. Sinks are called while the progress
//! writer holds its lock, so `snapshot` must not block.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::invocation::InvocationEvent;
use super::types::{ProgressRecord, SnapshotEvent};

/// Outbound channel of a plan run.
pub trait PlanEventSink: Send + Sync {
    /// Push a snapshot event (`plan`, `progress`, `step-output`).
    fn snapshot(&self, event: SnapshotEvent);

    /// Push a raw event on the primary text channel.
    fn primary(&self, event: InvocationEvent);
}

/// Everything a plan run emits, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "event", rename_all = "snake_case")]
pub enum PlanOutput {
    Snapshot(SnapshotEvent),
    Primary(InvocationEvent),
}

// ============================================================================
// ChannelSink
// ============================================================================

/// Sink forwarding into an unbounded mpsc channel.
///
/// Sends never block; if the receiver is gone, events are dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PlanOutput>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlanOutput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PlanEventSink for ChannelSink {
    fn snapshot(&self, event: SnapshotEvent) {
        if self.tx.send(PlanOutput::Snapshot(event)).is_err() {
            tracing::debug!("[PlanMode] Snapshot receiver dropped");
        }
    }

    fn primary(&self, event: InvocationEvent) {
        let _ = self.tx.send(PlanOutput::Primary(event));
    }
}

// ============================================================================
// TranscriptRecorder
// ============================================================================

/// In-memory record of every output, handed to persistence after a run.
#[derive(Debug, Default)]
pub struct TranscriptRecorder {
    outputs: Mutex<Vec<PlanOutput>>,
}

impl TranscriptRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, output: PlanOutput) {
        match self.outputs.lock() {
            Ok(mut outputs) => outputs.push(output),
            Err(poisoned) => poisoned.into_inner().push(output),
        }
    }

    /// Copy of everything recorded so far.
    pub fn outputs(&self) -> Vec<PlanOutput> {
        match self.outputs.lock() {
            Ok(outputs) => outputs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn snapshots(&self) -> Vec<SnapshotEvent> {
        self.outputs()
            .into_iter()
            .filter_map(|o| match o {
                PlanOutput::Snapshot(event) => Some(event),
                PlanOutput::Primary(_) => None,
            })
            .collect()
    }

    /// Every `progress` snapshot for `plan_id`, oldest first.
    pub fn progress_history(&self, plan_id: &str) -> Vec<ProgressRecord> {
        self.snapshots()
            .into_iter()
            .filter_map(|event| match event {
                SnapshotEvent::Progress { id, data } if id == plan_id => Some(data),
                _ => None,
            })
            .collect()
    }

    /// The most recent `progress` snapshot for `plan_id`.
    pub fn latest_progress(&self, plan_id: &str) -> Option<ProgressRecord> {
        self.progress_history(plan_id).pop()
    }

    /// Concatenated text deltas of the primary channel.
    pub fn primary_text(&self) -> String {
        self.outputs()
            .into_iter()
            .filter_map(|o| match o {
                PlanOutput::Primary(InvocationEvent::TextDelta { content }) => Some(content),
                _ => None,
            })
            .collect()
    }

    /// Take everything recorded, leaving the recorder empty.
    pub fn drain(&self) -> Vec<PlanOutput> {
        match self.outputs.lock() {
            Ok(mut outputs) => std::mem::take(&mut *outputs),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl PlanEventSink for TranscriptRecorder {
    fn snapshot(&self, event: SnapshotEvent) {
        self.push(PlanOutput::Snapshot(event));
    }

    fn primary(&self, event: InvocationEvent) {
        self.push(PlanOutput::Primary(event));
    }
}
