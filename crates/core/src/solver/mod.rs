//! # Flow Solver Invocation
//!
//! One solver call = one configuration overlay on top of the base solver
//! configuration, written to its own `.cfg` file, with the child's output
//! captured in per-call log files. The declared restart output must exist
//! afterwards or the call fails.
//!
//! Output capture is scoped to the call: the log files are handed to the
//! solver as owned handles and closed when the call returns, whichever way
//! it returns. No process-wide stream is touched.

pub mod su2;

pub use su2::{MpiLauncher, Su2Executable};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;

use crate::config::{add_suffix, Config};
use crate::error::SolveError;

/// Why the solver is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolverRole {
    InitialFlow,
    InitialAdjoint,
    StepFlow,
    StepAdjoint,
}

impl SolverRole {
    pub fn is_adjoint(&self) -> bool {
        matches!(self, SolverRole::InitialAdjoint | SolverRole::StepAdjoint)
    }

    pub fn problem(&self) -> MathProblem {
        if self.is_adjoint() {
            MathProblem::DiscreteAdjoint
        } else {
            MathProblem::Direct
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SolverRole::InitialFlow => "initial flow",
            SolverRole::InitialAdjoint => "initial adjoint",
            SolverRole::StepFlow => "flow",
            SolverRole::StepAdjoint => "adjoint",
        }
    }
}

impl fmt::Display for SolverRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathProblem {
    Direct,
    DiscreteAdjoint,
}

impl MathProblem {
    pub fn as_str(&self) -> &'static str {
        match self {
            MathProblem::Direct => "DIRECT",
            MathProblem::DiscreteAdjoint => "DISCRETE_ADJOINT",
        }
    }
}

/// Solver-side metric construction for goal-oriented runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricRequest {
    pub complexity: u64,
    pub hmin: f64,
    pub hmax: f64,
}

/// Per-call changes to the base solver configuration.
///
/// Paths inside the working directory are written relative to it.
#[derive(Debug, Clone, Default)]
pub struct SolverOverlay {
    pub mesh: PathBuf,
    /// `RESTART_FILENAME`, or `RESTART_ADJ_FILENAME` for adjoint roles
    pub restart_out: PathBuf,
    pub history: Option<String>,
    pub solution_in: Option<PathBuf>,
    pub adjoint_in: Option<PathBuf>,
    pub restart: Option<bool>,
    pub iterations: Option<u32>,
    pub cfl: Option<f64>,
    pub metric: Option<MetricRequest>,
}

impl SolverOverlay {
    pub fn new(mesh: impl Into<PathBuf>, restart_out: impl Into<PathBuf>) -> Self {
        Self {
            mesh: mesh.into(),
            restart_out: restart_out.into(),
            ..Self::default()
        }
    }

    pub fn history(mut self, name: impl Into<String>) -> Self {
        self.history = Some(name.into());
        self
    }

    pub fn solution_in(mut self, path: impl Into<PathBuf>) -> Self {
        self.solution_in = Some(path.into());
        self
    }

    pub fn adjoint_in(mut self, path: impl Into<PathBuf>) -> Self {
        self.adjoint_in = Some(path.into());
        self
    }

    pub fn restart(mut self, restart: bool) -> Self {
        self.restart = Some(restart);
        self
    }

    pub fn iterations(mut self, iterations: u32) -> Self {
        self.iterations = Some(iterations);
        self
    }

    pub fn cfl(mut self, cfl: f64) -> Self {
        self.cfl = Some(cfl);
        self
    }

    pub fn metric(mut self, metric: MetricRequest) -> Self {
        self.metric = Some(metric);
        self
    }

    /// The full solver configuration for one call.
    pub fn apply(&self, base: &Config, role: SolverRole, work_dir: &Path) -> Config {
        let local = |p: &Path| p.strip_prefix(work_dir).unwrap_or(p).display().to_string();
        let mut config = base.clone();

        config.set("MATH_PROBLEM", role.problem().as_str());
        config.set("MESH_FILENAME", local(&self.mesh));
        let out_key = if role.is_adjoint() {
            "RESTART_ADJ_FILENAME"
        } else {
            "RESTART_FILENAME"
        };
        config.set(out_key, local(&self.restart_out));

        if let Some(history) = &self.history {
            config.set("CONV_FILENAME", history);
        }
        if let Some(path) = &self.solution_in {
            config.set("SOLUTION_FILENAME", local(path));
        }
        if let Some(path) = &self.adjoint_in {
            config.set("SOLUTION_ADJ_FILENAME", local(path));
        }
        if let Some(restart) = self.restart {
            config.set("RESTART_SOL", if restart { "YES" } else { "NO" });
        }
        if let Some(iterations) = self.iterations {
            config.set("ITER", iterations);
        }
        if let Some(cfl) = self.cfl {
            config.set("CFL_NUMBER", cfl);
        }
        config.set("WRT_BINARY_RESTART", "NO");
        config.set("READ_BINARY_RESTART", "NO");

        match &self.metric {
            Some(metric) => {
                config.set("COMPUTE_METRIC", "YES");
                config.set("ADAP_COMPLEXITY", metric.complexity);
                config.set("ADAP_HMIN", metric.hmin);
                config.set("ADAP_HMAX", metric.hmax);
                config.set("VOLUME_OUTPUT", "(COORDINATES, SOLUTION, PRIMITIVE, METRIC)");
            }
            None => {
                config.set("COMPUTE_METRIC", "NO");
                config.set("VOLUME_OUTPUT", "(COORDINATES, SOLUTION, PRIMITIVE)");
            }
        }
        config
    }
}

/// Log files of one call: `<tag>.out` and `<tag>.err`.
///
/// Files are opened in append mode, so the flow and adjoint calls of one
/// iteration share a pair.
#[derive(Debug, Clone)]
pub struct CallLogs {
    pub tag: String,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl CallLogs {
    pub fn new(dir: &Path, tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            stdout: dir.join(format!("{}.out", tag)),
            stderr: dir.join(format!("{}.err", tag)),
        }
    }

    fn open(&self, role: SolverRole) -> Result<(File, File), SolveError> {
        let open = |path: &Path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| SolveError::Io {
                    role,
                    path: path.to_path_buf(),
                    source: e,
                })
        };
        Ok((open(&self.stdout)?, open(&self.stderr)?))
    }
}

/// Everything a solver needs for one call.
#[derive(Debug)]
pub struct SolveRequest<'a> {
    pub role: SolverRole,
    pub config: &'a Config,
    /// The configuration as written to disk
    pub config_path: &'a Path,
    pub work_dir: &'a Path,
    pub stdout: File,
    pub stderr: File,
    /// Log to point at when the call fails
    pub log: &'a Path,
}

/// The external flow solver.
#[async_trait]
pub trait FlowSolver: Send + Sync {
    async fn solve(&self, request: SolveRequest<'_>) -> Result<(), SolveError>;
}

/// Runs solver calls for one working directory.
pub struct SolverInvoker {
    solver: Arc<dyn FlowSolver>,
    base: Config,
    work_dir: PathBuf,
    adjoint_suffix: String,
}

impl SolverInvoker {
    pub fn new(
        solver: Arc<dyn FlowSolver>,
        base: Config,
        work_dir: &Path,
        adjoint_suffix: &str,
    ) -> Self {
        Self {
            solver,
            base,
            work_dir: work_dir.to_path_buf(),
            adjoint_suffix: adjoint_suffix.to_string(),
        }
    }

    pub fn base(&self) -> &Config {
        &self.base
    }

    /// File the call must produce; adjoint restarts carry the objective suffix.
    pub fn expected_output(&self, overlay: &SolverOverlay, role: SolverRole) -> PathBuf {
        let out = self.work_dir.join(&overlay.restart_out);
        if !role.is_adjoint() {
            return out;
        }
        match out.file_name().and_then(|n| n.to_str()) {
            Some(name) => out.with_file_name(add_suffix(name, &self.adjoint_suffix)),
            None => out,
        }
    }

    pub async fn invoke(
        &self,
        overlay: &SolverOverlay,
        role: SolverRole,
        logs: &CallLogs,
    ) -> Result<PathBuf, SolveError> {
        let config = overlay.apply(&self.base, role, &self.work_dir);
        let kind = if role.is_adjoint() { "adj" } else { "flow" };
        let config_path = self.work_dir.join(format!("{}_{}.cfg", logs.tag, kind));
        tokio::fs::write(&config_path, config.render())
            .await
            .map_err(|e| SolveError::Io {
                role,
                path: config_path.clone(),
                source: e,
            })?;

        let expected = self.expected_output(overlay, role);
        // A leftover from an earlier call must not satisfy the check below.
        if tokio::fs::metadata(&expected).await.is_ok() {
            tokio::fs::remove_file(&expected)
                .await
                .map_err(|e| SolveError::Io {
                    role,
                    path: expected.clone(),
                    source: e,
                })?;
        }

        let (stdout, stderr) = logs.open(role)?;
        let request = SolveRequest {
            role,
            config: &config,
            config_path: &config_path,
            work_dir: &self.work_dir,
            stdout,
            stderr,
            log: &logs.stdout,
        };

        let span = tracing::info_span!("solve", role = %role, log = %logs.tag);
        self.solver.solve(request).instrument(span).await?;

        if tokio::fs::metadata(&expected).await.is_err() {
            return Err(SolveError::MissingOutput {
                role,
                path: expected,
            });
        }
        tracing::debug!(role = %role, output = %expected.display(), "Solver call finished");
        Ok(expected)
    }
}
