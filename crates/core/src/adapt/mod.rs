//! # Mesh Adaptation Step
//!
//! One remeshing step behind a single [`AdaptationBackend`] interface with
//! two implementations: the out-of-process engine driven through GMF files
//! ([`ExternalBackend`]) and an in-process library call
//! ([`LibraryBackend`]). The backend is chosen once per run.
//!
//! Whatever the backend, the runner:
//! - appends the adjoint columns to the interpolated payload when one is
//!   attached,
//! - restores markers, dimension and field names on the result,
//! - splits the payload back into primal and adjoint solutions by column
//!   position.

pub mod background;
pub mod external;
pub mod library;

pub use background::prepare_background;
pub use external::{AmgExecutable, ExternalBackend, RemeshTool, ToolInvocation};
pub use library::{LibraryBackend, LibraryRequest, RemeshLibrary};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;

use crate::config::{AdaptOptions, AdaptationLevel, BackendKind};
use crate::error::{AdaptError, PipelineError};
use crate::mesh::{Mesh, MeshSolutionState, Solution};
use crate::sensor::Sensor;

/// Engine parameters shared by every step of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub hgrad: f64,
    pub hmin: f64,
    pub hmax: f64,
    /// Lp norm of the complexity constraint
    pub norm: f64,
    pub background: PathBuf,
    pub invert_background: bool,
    pub orthogonal_only: bool,
    pub ridge_detection: bool,
}

impl EngineSettings {
    pub fn new(options: &AdaptOptions, background: PathBuf) -> Self {
        Self {
            hgrad: options.hgrad,
            hmin: options.hmin,
            hmax: options.hmax,
            norm: options.norm,
            background,
            invert_background: options.invert_background,
            orthogonal_only: options.orthogonal_only,
            ridge_detection: options.ridge_detection,
        }
    }

    /// Engine switches: background mesh, inversion, orthogonality, ridges.
    pub fn option_flags(&self) -> Vec<String> {
        let mut flags = vec!["-back".to_string(), self.background.display().to_string()];
        if self.invert_background {
            flags.push("-inv-back".to_string());
        }
        if self.orthogonal_only {
            flags.push("-cart3d-only".to_string());
        }
        if !self.ridge_detection {
            flags.push("-nordg".to_string());
        }
        flags
    }
}

/// What a backend remeshes: the mesh, the fields to interpolate, the sensor.
#[derive(Debug, Clone)]
pub struct RemeshInput {
    pub mesh: Mesh,
    pub payload: Solution,
    pub sensor: Sensor,
}

/// New mesh and the payload interpolated onto it.
///
/// Backends are not expected to keep markers, dimension or field names.
#[derive(Debug, Clone)]
pub struct RemeshOutput {
    pub mesh: Mesh,
    pub solution: Solution,
}

/// Per-step parameters.
#[derive(Debug)]
pub struct RemeshRequest<'a> {
    pub iteration: u32,
    pub level: &'a AdaptationLevel,
    pub settings: &'a EngineSettings,
    pub work_dir: &'a Path,
    /// Engine log, `ite<N>.amg.out`
    pub log: PathBuf,
}

#[async_trait]
pub trait AdaptationBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn remesh(
        &self,
        input: RemeshInput,
        request: &RemeshRequest<'_>,
    ) -> Result<RemeshOutput, PipelineError>;
}

/// Runs one adaptation step on a backend.
pub struct AdaptationStepRunner {
    backend: Arc<dyn AdaptationBackend>,
}

impl AdaptationStepRunner {
    pub fn new(backend: Arc<dyn AdaptationBackend>) -> Self {
        Self { backend }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Consume the current state (sensor attached) and return the adapted one.
    pub async fn adapt(
        &self,
        state: MeshSolutionState,
        request: &RemeshRequest<'_>,
    ) -> Result<MeshSolutionState, PipelineError> {
        let MeshSolutionState {
            mesh,
            solution,
            adjoint,
            sensor,
        } = state;
        let sensor = sensor.ok_or(AdaptError::MissingSensor(request.iteration))?;

        // Adjoint columns follow the primal ones and are split back by
        // position: the two restarts may share field names.
        let primal_width = solution.width();
        let (payload, goal) = match adjoint {
            Some(adjoint) => {
                let joined = solution.concat(&adjoint).ok_or(AdaptError::PointMismatch {
                    expected: solution.len(),
                    found: adjoint.len(),
                })?;
                (joined, true)
            }
            None => (solution, false),
        };
        let payload_tags = payload.tags.clone();
        let markers = mesh.markers.clone();
        let dimension = mesh.dimension;
        let before = mesh.summary();

        let span = tracing::info_span!(
            "remesh",
            backend = %self.backend.kind(),
            iteration = request.iteration,
            complexity = request.level.target_size
        );
        let output = self
            .backend
            .remesh(
                RemeshInput {
                    mesh,
                    payload,
                    sensor,
                },
                request,
            )
            .instrument(span)
            .await?;

        let RemeshOutput {
            mut mesh,
            mut solution,
        } = output;
        mesh.markers = markers;
        mesh.dimension = dimension;
        if solution.width() != payload_tags.len() {
            return Err(AdaptError::FieldMismatch {
                expected: payload_tags.len(),
                found: solution.width(),
            }
            .into());
        }
        solution.tags = payload_tags;
        tracing::info!(before = %before, after = %mesh.summary(), "AMG done");

        let (primal, adjoint) = solution.split_at(primal_width);
        let adjoint = goal.then_some(adjoint);

        Ok(MeshSolutionState {
            mesh,
            solution: primal,
            adjoint,
            sensor: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorKind;
    use crate::io::SolType;
    use crate::mesh::{Element, ElementKind};

    /// Drops metadata and field names, keeps the payload rows.
    struct Forgetful;

    #[async_trait]
    impl AdaptationBackend for Forgetful {
        fn kind(&self) -> BackendKind {
            BackendKind::Library
        }

        async fn remesh(
            &self,
            input: RemeshInput,
            _request: &RemeshRequest<'_>,
        ) -> Result<RemeshOutput, PipelineError> {
            let mut mesh = input.mesh;
            mesh.markers.clear();
            mesh.dimension = 0;
            let width = input.payload.width();
            Ok(RemeshOutput {
                mesh,
                solution: Solution::new(vec![String::new(); width], input.payload.rows),
            })
        }
    }

    fn level() -> AdaptationLevel {
        AdaptationLevel {
            index: 0,
            target_size: 1000,
            sub_iterations: 1,
            flow_iters: 10,
            adj_iters: 10,
            cfl: 1.0,
        }
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            hgrad: 1.5,
            hmin: 1e-6,
            hmax: 10.0,
            norm: 2.0,
            background: PathBuf::from("amg_back.meshb"),
            invert_background: false,
            orthogonal_only: true,
            ridge_detection: false,
        }
    }

    fn state() -> MeshSolutionState {
        let mesh = Mesh {
            dimension: 2,
            vertices: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            elements: vec![Element::new(ElementKind::Triangle, vec![0, 1, 2], 0)],
            boundary: vec![Element::new(ElementKind::Line, vec![0, 1], 1)],
            markers: vec!["airfoil".into()],
        };
        let solution = Solution::new(
            vec!["Density".into(), "Mach".into()],
            vec![vec![1.0, 0.1], vec![1.0, 0.2], vec![1.0, 0.3]],
        );
        let mut state = MeshSolutionState::new(mesh, solution);
        state.sensor = Some(Sensor {
            kind: SensorKind::Mach,
            layout: vec![SolType::Scalar],
            field: Solution::new(vec!["Mach".into()], vec![vec![0.1], vec![0.2], vec![0.3]]),
        });
        state
    }

    fn request<'a>(level: &'a AdaptationLevel, settings: &'a EngineSettings) -> RemeshRequest<'a> {
        RemeshRequest {
            iteration: 0,
            level,
            settings,
            work_dir: Path::new("."),
            log: PathBuf::from("ite0.amg.out"),
        }
    }

    #[test]
    fn test_option_flags() {
        assert_eq!(
            settings().option_flags(),
            vec!["-back", "amg_back.meshb", "-cart3d-only", "-nordg"]
        );
    }

    #[tokio::test]
    async fn test_metadata_restored() {
        let (level, settings) = (level(), settings());
        let runner = AdaptationStepRunner::new(Arc::new(Forgetful));
        let before = state();

        let after = runner
            .adapt(before.clone(), &request(&level, &settings))
            .await
            .unwrap();

        assert_eq!(after.mesh.markers, before.mesh.markers);
        assert_eq!(after.mesh.dimension, 2);
        assert_eq!(after.solution, before.solution);
        assert!(after.adjoint.is_none());
        assert!(after.sensor.is_none());
    }

    #[tokio::test]
    async fn test_adjoint_split_back_out() {
        let (level, settings) = (level(), settings());
        let runner = AdaptationStepRunner::new(Arc::new(Forgetful));
        let mut before = state();
        let adjoint = Solution::new(
            vec!["Adjoint_Density".into()],
            vec![vec![9.0], vec![8.0], vec![7.0]],
        );
        before.adjoint = Some(adjoint.clone());

        let after = runner
            .adapt(before.clone(), &request(&level, &settings))
            .await
            .unwrap();

        assert_eq!(after.solution, before.solution);
        assert_eq!(after.adjoint, Some(adjoint));
    }

    #[tokio::test]
    async fn test_adjoint_sharing_a_field_name_keeps_its_values() {
        let (level, settings) = (level(), settings());
        let runner = AdaptationStepRunner::new(Arc::new(Forgetful));
        let mut before = state();
        let adjoint = Solution::new(
            vec!["Mach".into(), "Adjoint_Density".into()],
            vec![vec![-1.0, 9.0], vec![-2.0, 8.0], vec![-3.0, 7.0]],
        );
        before.adjoint = Some(adjoint.clone());

        let after = runner
            .adapt(before.clone(), &request(&level, &settings))
            .await
            .unwrap();

        assert_eq!(after.solution, before.solution);
        let after_adjoint = after.adjoint.unwrap();
        assert_eq!(after_adjoint, adjoint);
        assert_eq!(after_adjoint.columns(&[0]), vec![vec![-1.0], vec![-2.0], vec![-3.0]]);
    }

    #[tokio::test]
    async fn test_requires_sensor() {
        let (level, settings) = (level(), settings());
        let runner = AdaptationStepRunner::new(Arc::new(Forgetful));
        let mut before = state();
        before.sensor = None;

        let err = runner
            .adapt(before, &request(&level, &settings))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Adaptation(AdaptError::MissingSensor(0))
        ));
    }
}
