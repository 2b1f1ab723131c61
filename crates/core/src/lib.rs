//! # Remesh Core
//!
//! Iterative anisotropic mesh adaptation around an external CFD solver:
//! solve on a fixed mesh, derive a sensor from the solution, regenerate the
//! mesh at the target complexity, solve again, for every level of an
//! adaptation schedule.
//!
//! ## Architecture
//!
//! - `config/` - Option file, typed adaptation options, schedule
//! - `pipeline/` - Stage machine, events and the coordinator
//! - `solver/` - Solver configuration overlays and invocation
//! - `adapt/` - Remeshing back-ends (external engine, in-process library)
//! - `sensor` - Sensor fields (feature-based and goal-oriented)
//! - `artifacts` - Working directory and artifact naming
//! - `io/` - SU2 mesh, CSV restart and GMF codecs
//! - `mesh/` - In-memory mesh and solution
//!
//! ## Usage
//!
//! ```rust,ignore
//! use remesh_core::{Config, CoordinatorConfig, PipelineCoordinator};
//!
//! let config = Config::load("adap.cfg").await?;
//! let mut coordinator = PipelineCoordinator::new(config, CoordinatorConfig::new("."));
//! let summary = coordinator.run().await?;
//! ```

pub mod adapt;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod io;
pub mod mesh;
pub mod pipeline;
pub mod sensor;
pub mod solver;

pub use adapt::{AmgExecutable, RemeshLibrary, RemeshTool};
pub use config::{AdaptOptions, AdaptationSchedule, BackendKind, Config, ScheduleBuilder, SensorKind};
pub use error::PipelineError;
pub use pipeline::{
    CoordinatorConfig, PipelineCoordinator, PipelineEvent, PipelineEventKind, PipelineStage,
    RunSummary,
};
pub use solver::{FlowSolver, MpiLauncher, Su2Executable};
