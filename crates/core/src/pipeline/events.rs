//! # Pipeline Events
//!
//! Progress notifications streamed to observers of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::PipelineStage;

/// Kind of pipeline event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventKind {
    /// Run started, schedule validated
    RunStarted,
    /// The pipeline entered a stage
    StageStarted,
    /// A solver call finished
    SolverFinished,
    /// One sub-iteration finished
    Checkpoint,
    /// Outputs published to the caller directory
    RunCompleted,
    /// Run aborted
    RunFailed,
}

/// An event in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Position in the run's event stream
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: PipelineEventKind,
    pub stage: PipelineStage,
    /// Global iteration, when the event belongs to one
    #[serde(default)]
    pub iteration: Option<u32>,
    /// Associated data (JSON)
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl PipelineEvent {
    pub fn new(kind: PipelineEventKind, stage: PipelineStage) -> Self {
        Self {
            seq: 0,
            timestamp: Utc::now(),
            kind,
            stage,
            iteration: None,
            data: None,
        }
    }

    /// Add data to the event
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = PipelineEvent::new(PipelineEventKind::Checkpoint, PipelineStage::Checkpoint)
            .with_iteration(2)
            .with_data(serde_json::json!({ "mesh": "ite2.su2" }));

        assert_eq!(event.iteration, Some(2));
        assert_eq!(event.data.unwrap()["mesh"], "ite2.su2");
    }

    #[test]
    fn test_event_serializes_snake_case() {
        let event = PipelineEvent::new(PipelineEventKind::RunFailed, PipelineStage::ResolveFlow);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["kind"], "run_failed");
        assert_eq!(json["stage"], "resolve_flow");
    }
}
