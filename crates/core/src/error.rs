//! # Pipeline Errors
//!
//! Typed failure taxonomy for the adaptation pipeline. Every stage returns
//! one of these and the coordinator propagates it unchanged: nothing is
//! retried and nothing is swallowed.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::solver::SolverRole;

/// Invalid or missing adaptation options.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing options: {}", .0.join(", "))]
    MissingOptions(Vec<String>),

    #[error("line {line}: expected `KEY= value`, found '{content}'")]
    Syntax { line: usize, content: String },

    #[error("unknown adaptation sensor '{0}' (PYADAP_SENSOR must be MACH, PRES, MACH_PRES or GOAL)")]
    UnknownSensor(String),

    #[error(
        "inconsistent number of mesh sizes and sub-iterations: {sizes} mesh sizes and {sub_iterations} sub-iterations provided"
    )]
    ScheduleMismatch { sizes: usize, sub_iterations: usize },

    #[error("{option} has {len} entries, no value for level {level}")]
    LevelOutOfRange {
        option: String,
        level: usize,
        len: usize,
    },

    #[error("invalid value '{value}' for {option}: {reason}")]
    InvalidValue {
        option: String,
        value: String,
        reason: String,
    },

    #[error("adaptation schedule has no sub-iterations")]
    EmptySchedule,

    #[error("RESTART_SOL is set to YES, but the solution is missing: {}", .0.join(", "))]
    MissingRestartSolution(Vec<String>),

    #[error("GOAL sensor needs an adjoint solution for iteration {iteration}, but {expected} is not available")]
    MissingAdjoint { iteration: u32, expected: String },

    #[error("adjoint solution {} has {found} points, mesh has {expected}", .path.display())]
    AdjointMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("GOAL sensor needs metric fields, none found in {}", .0.display())]
    MissingMetric(PathBuf),

    #[error("sensor field '{0}' is not present in the flow solution")]
    MissingSensorField(String),

    #[error("wrong mesh dimension {0} (expected 2 or 3)")]
    UnsupportedDimension(u8),
}

/// SolveFailure: a solver call did not complete or did not write its output.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("failed to launch {program} for the {role} solve: {source}")]
    Launch {
        program: String,
        role: SolverRole,
        #[source]
        source: std::io::Error,
    },

    #[error("{role} solve exited with {status} (see {})", .log.display())]
    Exited {
        role: SolverRole,
        status: String,
        log: PathBuf,
    },

    #[error("{role} solve did not produce {}", .path.display())]
    MissingOutput { role: SolverRole, path: PathBuf },

    #[error("could not prepare the {role} solve ({}): {source}", .path.display())]
    Io {
        role: SolverRole,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// AdaptationFailure: the remeshing back-end failed or produced nothing.
#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("in-process adaptation library is unavailable")]
    LibraryUnavailable,

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("adaptation engine exited with {status} (see {})", .log.display())]
    ToolFailed { status: String, log: PathBuf },

    #[error("mesh adaptation did not produce {}", display_paths(.paths))]
    MissingOutput { paths: Vec<PathBuf> },

    #[error("adaptation library call failed: {0:#}")]
    Library(anyhow::Error),

    #[error("no sensor attached to the state for iteration {0}")]
    MissingSensor(u32),

    #[error("interpolated solution has {found} fields, expected {expected}")]
    FieldMismatch { expected: usize, found: usize },

    #[error("adjoint solution has {found} points, flow solution has {expected}")]
    PointMismatch { expected: usize, found: usize },
}

/// ConversionFailure: a format conversion did not write its output.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("conversion to {format} did not produce {}", .path.display())]
    MissingOutput { format: &'static str, path: PathBuf },
}

/// Malformed or unreadable mesh/solution files.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{}: {message}", .path.display())]
    Invalid { path: PathBuf, message: String },

    #[error("unsupported file format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
}

impl CodecError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn invalid(path: &Path, message: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Any failure that aborts an adaptation run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("artifact missing after {stage}: {}", display_paths(.paths))]
    ArtifactMissing { stage: String, paths: Vec<PathBuf> },

    #[error("solver failure: {0}")]
    Solve(#[from] SolveError),

    #[error("adaptation failure: {0}")]
    Adaptation(#[from] AdaptError),

    #[error("conversion failure: {0}")]
    Conversion(#[from] ConversionError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Files a producing stage declared but did not create.
    ///
    /// Empty for failures that are not about a missing artifact.
    pub fn missing_artifacts(&self) -> Vec<&Path> {
        match self {
            PipelineError::ArtifactMissing { paths, .. } => {
                paths.iter().map(PathBuf::as_path).collect()
            }
            PipelineError::Solve(SolveError::MissingOutput { path, .. }) => vec![path.as_path()],
            PipelineError::Adaptation(AdaptError::MissingOutput { paths }) => {
                paths.iter().map(PathBuf::as_path).collect()
            }
            PipelineError::Conversion(ConversionError::MissingOutput { path, .. }) => {
                vec![path.as_path()]
            }
            _ => Vec::new(),
        }
    }

    /// Whether the run stopped because a declared artifact was absent.
    pub fn is_artifact_missing(&self) -> bool {
        !self.missing_artifacts().is_empty()
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
