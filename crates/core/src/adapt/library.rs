//! In-process adaptation library.
//!
//! The library call is synchronous and CPU-bound, so it runs on the
//! blocking pool while the coordinator awaits it.

use async_trait::async_trait;
use std::sync::Arc;

use super::{AdaptationBackend, EngineSettings, RemeshInput, RemeshOutput, RemeshRequest};
use crate::config::BackendKind;
use crate::error::{AdaptError, PipelineError};
use crate::mesh::{Mesh, Solution};
use crate::sensor::Sensor;

/// Everything one library call receives.
#[derive(Debug, Clone)]
pub struct LibraryRequest {
    pub mesh: Mesh,
    /// Fields to interpolate onto the new mesh
    pub payload: Solution,
    pub sensor: Sensor,
    pub target_size: u64,
    pub settings: EngineSettings,
}

/// A remeshing library linked into the process.
pub trait RemeshLibrary: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn remesh(&self, request: LibraryRequest) -> anyhow::Result<RemeshOutput>;
}

pub struct LibraryBackend {
    library: Arc<dyn RemeshLibrary>,
}

impl LibraryBackend {
    pub fn new(library: Arc<dyn RemeshLibrary>) -> Self {
        Self { library }
    }
}

#[async_trait]
impl AdaptationBackend for LibraryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Library
    }

    async fn remesh(
        &self,
        input: RemeshInput,
        request: &RemeshRequest<'_>,
    ) -> Result<RemeshOutput, PipelineError> {
        let library = Arc::clone(&self.library);
        let call = LibraryRequest {
            mesh: input.mesh,
            payload: input.payload,
            sensor: input.sensor,
            target_size: request.level.target_size,
            settings: request.settings.clone(),
        };

        tracing::info!(library = library.name(), "Generating adapted mesh");
        let output = tokio::task::spawn_blocking(move || library.remesh(call))
            .await
            .map_err(|e| AdaptError::Library(anyhow::Error::new(e)))?
            .map_err(AdaptError::Library)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdaptationLevel, SensorKind};
    use crate::io::SolType;
    use std::path::{Path, PathBuf};

    struct Refuses;

    impl RemeshLibrary for Refuses {
        fn name(&self) -> &str {
            "refuses"
        }

        fn remesh(&self, request: LibraryRequest) -> anyhow::Result<RemeshOutput> {
            anyhow::bail!("complexity {} is too low", request.target_size)
        }
    }

    #[tokio::test]
    async fn test_library_error_is_adaptation_failure() {
        let backend = LibraryBackend::new(Arc::new(Refuses));
        let level = AdaptationLevel {
            index: 0,
            target_size: 10,
            sub_iterations: 1,
            flow_iters: 1,
            adj_iters: 1,
            cfl: 1.0,
        };
        let settings = EngineSettings {
            hgrad: 1.5,
            hmin: 0.1,
            hmax: 1.0,
            norm: 2.0,
            background: PathBuf::from("mesh.su2"),
            invert_background: false,
            orthogonal_only: false,
            ridge_detection: false,
        };
        let request = RemeshRequest {
            iteration: 0,
            level: &level,
            settings: &settings,
            work_dir: Path::new("."),
            log: PathBuf::from("ite0.amg.out"),
        };
        let input = RemeshInput {
            mesh: Mesh::default(),
            payload: Solution::default(),
            sensor: Sensor {
                kind: SensorKind::Mach,
                layout: vec![SolType::Scalar],
                field: Solution::default(),
            },
        };

        let err = backend.remesh(input, &request).await.unwrap_err();
        assert!(matches!(err, PipelineError::Adaptation(AdaptError::Library(_))));
        assert!(err.to_string().contains("complexity 10 is too low"));
    }
}
