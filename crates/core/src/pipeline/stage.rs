//! # Pipeline Stages
//!
//! Stages of one adaptation run and the state machine that walks them.

use serde::{Deserialize, Serialize};

/// Stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Options, schedule and work directory
    Init,
    /// Initial flow (and adjoint) solution on the input mesh
    InitialSolve,
    /// Sensor computation on the current state
    Sensor,
    /// Remeshing and interpolation
    Adapt,
    /// Flow solve on the adapted mesh
    ResolveFlow,
    /// Adjoint solve on the adapted mesh (GOAL only)
    ResolveAdjoint,
    /// End of one sub-iteration
    Checkpoint,
    /// Final outputs copied back to the caller
    Finalize,
    /// Complete
    Complete,
    /// Failed
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Init => "init",
            PipelineStage::InitialSolve => "initial solve",
            PipelineStage::Sensor => "sensor",
            PipelineStage::Adapt => "adapt",
            PipelineStage::ResolveFlow => "flow solve",
            PipelineStage::ResolveAdjoint => "adjoint solve",
            PipelineStage::Checkpoint => "checkpoint",
            PipelineStage::Finalize => "finalize",
            PipelineStage::Complete => "complete",
            PipelineStage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pipeline state machine
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Current stage
    pub stage: PipelineStage,
    /// Whether adjoint solves are part of each iteration
    pub goal_oriented: bool,
    /// Sub-iterations still to run
    pub remaining: u32,
}

impl Pipeline {
    pub fn new(total_sub_iterations: u32, goal_oriented: bool) -> Self {
        Self {
            stage: PipelineStage::Init,
            goal_oriented,
            remaining: total_sub_iterations,
        }
    }

    /// Advance to the next stage
    pub fn advance(&mut self) {
        self.stage = match self.stage {
            PipelineStage::Init => PipelineStage::InitialSolve,
            PipelineStage::InitialSolve | PipelineStage::Checkpoint => {
                if self.stage == PipelineStage::Checkpoint {
                    self.remaining = self.remaining.saturating_sub(1);
                }
                if self.remaining == 0 {
                    PipelineStage::Finalize
                } else {
                    PipelineStage::Sensor
                }
            }
            PipelineStage::Sensor => PipelineStage::Adapt,
            PipelineStage::Adapt => PipelineStage::ResolveFlow,
            PipelineStage::ResolveFlow if self.goal_oriented => PipelineStage::ResolveAdjoint,
            PipelineStage::ResolveFlow | PipelineStage::ResolveAdjoint => {
                PipelineStage::Checkpoint
            }
            PipelineStage::Finalize => PipelineStage::Complete,
            PipelineStage::Complete => PipelineStage::Complete,
            PipelineStage::Failed => PipelineStage::Failed,
        };
    }

    /// Fail the pipeline
    pub fn fail(&mut self) {
        self.stage = PipelineStage::Failed;
    }

    /// Check if pipeline is complete
    pub fn is_complete(&self) -> bool {
        matches!(self.stage, PipelineStage::Complete | PipelineStage::Failed)
    }

    /// Check if pipeline succeeded
    pub fn is_success(&self) -> bool {
        self.stage == PipelineStage::Complete
    }
}
