//! Background surface mesh for the adaptation engine.
//!
//! Prepared once at run start: staged from `PYADAP_BACK` (or the input mesh),
//! converted to GMF when given in SU2 format, and extruded into a 3-D
//! surface when the mesh is planar.

use std::path::{Path, PathBuf};

use crate::artifacts::{StagingPolicy, WorkDir};
use crate::config::AdaptOptions;
use crate::error::{ConversionError, PipelineError};
use crate::io::{self, Format};
use crate::mesh::extrude_surface;
use crate::pipeline::PipelineStage;

pub const BACKGROUND_GMF: &str = "amg_back.meshb";
pub const BACKGROUND_SURFACE: &str = "amg_back_surf.meshb";

fn written(path: PathBuf) -> Result<PathBuf, PipelineError> {
    if path.exists() {
        Ok(path)
    } else {
        Err(ConversionError::MissingOutput {
            format: "GMF",
            path,
        }
        .into())
    }
}

/// Path of the background mesh the engine should use.
///
/// `mesh` is the staged input mesh, used when no separate background is set.
pub async fn prepare_background(
    work: &WorkDir,
    options: &AdaptOptions,
    mesh: &Path,
    policy: StagingPolicy,
    dimension: u8,
) -> Result<PathBuf, PipelineError> {
    let mut back = match &options.background {
        Some(back) if back != &options.mesh_in => work.stage_input(back, policy, None).await?,
        _ => mesh.to_path_buf(),
    };
    if !back.exists() {
        return Err(PipelineError::ArtifactMissing {
            stage: PipelineStage::Init.to_string(),
            paths: vec![back],
        });
    }

    if Format::of(&back)? == Format::Su2 {
        tracing::info!(source = %back.display(), "Generating GMF background surface mesh");
        let source = io::read_mesh(&back)?;
        let out = work.join(BACKGROUND_GMF);
        io::write_mesh(&out, &source)?;
        back = written(out)?;
    }

    if dimension == 2 {
        tracing::info!("Preprocessing background mesh");
        let planar = io::read_mesh(&back)?;
        let out = work.join(BACKGROUND_SURFACE);
        io::write_mesh(&out, &extrude_surface(&planar))?;
        back = written(out)?;
    }

    Ok(back)
}
