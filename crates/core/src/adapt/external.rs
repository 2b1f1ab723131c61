//! Out-of-process adaptation engine.
//!
//! The state is converted to GMF files in the working directory, the engine
//! is run on them, and the adapted mesh plus the interpolated solution are
//! read back:
//!
//! | file                  | role                              |
//! |-----------------------|-----------------------------------|
//! | `current.meshb`       | input mesh                        |
//! | `current.solb`        | fields to interpolate             |
//! | `current_sensor.solb` | sensor or metric                  |
//! | `current.new.meshb`   | adapted mesh                      |
//! | `current.itp.solb`    | fields interpolated on the output |

use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use super::{AdaptationBackend, RemeshInput, RemeshOutput, RemeshRequest};
use crate::config::{BackendKind, SensorKind};
use crate::error::{AdaptError, ConversionError, PipelineError};
use crate::io;

const MESH_IN: &str = "current.meshb";
const SOLUTION_IN: &str = "current.solb";
const SENSOR_IN: &str = "current_sensor.solb";
const MESH_OUT: &str = "current.new.meshb";
const INTERPOLATED: &str = "current.itp.solb";

/// One engine run.
#[derive(Debug)]
pub struct ToolInvocation<'a> {
    pub args: Vec<String>,
    pub work_dir: &'a Path,
    /// Receives both stdout and stderr
    pub log: File,
    pub log_path: &'a Path,
}

/// The adaptation engine executable.
#[async_trait]
pub trait RemeshTool: Send + Sync {
    async fn run(&self, invocation: ToolInvocation<'_>) -> Result<(), AdaptError>;
}

/// `amg` on the `PATH`, or a given program.
#[derive(Debug, Clone)]
pub struct AmgExecutable {
    program: String,
}

impl Default for AmgExecutable {
    fn default() -> Self {
        Self::new("amg")
    }
}

impl AmgExecutable {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl RemeshTool for AmgExecutable {
    async fn run(&self, invocation: ToolInvocation<'_>) -> Result<(), AdaptError> {
        let launch = |e| AdaptError::Launch {
            program: self.program.clone(),
            source: e,
        };
        let stderr = invocation.log.try_clone().map_err(launch)?;

        let status = Command::new(&self.program)
            .args(&invocation.args)
            .current_dir(invocation.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(invocation.log))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .status()
            .await
            .map_err(launch)?;

        if !status.success() {
            return Err(AdaptError::ToolFailed {
                status: status.to_string(),
                log: invocation.log_path.to_path_buf(),
            });
        }
        Ok(())
    }
}

/// Adaptation through the external engine.
pub struct ExternalBackend {
    tool: Arc<dyn RemeshTool>,
}

impl ExternalBackend {
    pub fn new(tool: Arc<dyn RemeshTool>) -> Self {
        Self { tool }
    }

    fn args(input: &RemeshInput, request: &RemeshRequest<'_>) -> Vec<String> {
        let settings = request.settings;
        let sensor_flag = if input.sensor.kind == SensorKind::Goal {
            "-met"
        } else {
            "-sol"
        };
        let mut args: Vec<String> = [
            "-in",
            MESH_IN,
            sensor_flag,
            SENSOR_IN,
            "-itp",
            SOLUTION_IN,
            "-out",
            MESH_OUT,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend([
            "-c".to_string(),
            request.level.target_size.to_string(),
            "-p".to_string(),
            settings.norm.to_string(),
            "-hgrad".to_string(),
            settings.hgrad.to_string(),
            "-hmin".to_string(),
            settings.hmin.to_string(),
            "-hmax".to_string(),
            settings.hmax.to_string(),
        ]);
        args.extend(settings.option_flags());
        args
    }
}

fn converted(path: PathBuf) -> Result<(), ConversionError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConversionError::MissingOutput {
            format: "GMF",
            path,
        })
    }
}

#[async_trait]
impl AdaptationBackend for ExternalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::External
    }

    async fn remesh(
        &self,
        input: RemeshInput,
        request: &RemeshRequest<'_>,
    ) -> Result<RemeshOutput, PipelineError> {
        let dir = request.work_dir;
        let (mesh_in, solution_in, sensor_in) =
            (dir.join(MESH_IN), dir.join(SOLUTION_IN), dir.join(SENSOR_IN));
        let (mesh_out, interpolated) = (dir.join(MESH_OUT), dir.join(INTERPOLATED));

        io::write_mesh(&mesh_in, &input.mesh)?;
        io::write_solution(&solution_in, &input.mesh, &input.payload)?;
        converted(mesh_in)?;
        converted(solution_in)?;
        io::write_field(
            &sensor_in,
            &input.mesh,
            &input.sensor.field,
            &input.sensor.layout,
        )?;
        converted(sensor_in)?;

        for stale in [&mesh_out, &interpolated] {
            if stale.exists() {
                std::fs::remove_file(stale).map_err(|e| PipelineError::io(stale, e))?;
            }
        }

        let log = File::create(&request.log).map_err(|e| PipelineError::io(&request.log, e))?;
        let args = Self::args(&input, request);
        tracing::info!(log = %request.log.display(), "Running amg");
        tracing::debug!(args = %args.join(" "), "amg arguments");
        self.tool
            .run(ToolInvocation {
                args,
                work_dir: dir,
                log,
                log_path: &request.log,
            })
            .await?;

        let missing: Vec<PathBuf> = [&mesh_out, &interpolated]
            .into_iter()
            .filter(|p| !p.exists())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(AdaptError::MissingOutput { paths: missing }.into());
        }

        let mesh = io::read_mesh(&mesh_out)?;
        let solution = io::read_solution(&interpolated, &mesh)?;
        Ok(RemeshOutput { mesh, solution })
    }
}
