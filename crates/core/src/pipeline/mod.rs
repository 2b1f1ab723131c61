//! # Adaptation Pipeline
//!
//! Stage machine, event stream and the coordinator that runs them.

pub mod coordinator;
pub mod events;
pub mod stage;

pub use coordinator::{CoordinatorConfig, PipelineCoordinator, PipelineState, RunSummary};
pub use events::{PipelineEvent, PipelineEventKind};
pub use stage::{Pipeline, PipelineStage};
