//! # Artifacts
//!
//! The run's working directory, input staging, and the deterministic name of
//! every file the pipeline produces. Each artifact is written once by one
//! stage and checked for existence right after; the ledger records them in
//! production order.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::add_suffix;
use crate::error::PipelineError;
use crate::pipeline::PipelineStage;

/// Flow solution staged from a supplied restart file
pub const INITIAL_FLOW: &str = "ini_restart_flow.csv";
/// Adjoint solution produced or staged before the first iteration
pub const INITIAL_ADJOINT: &str = "ini_restart_adj.csv";

/// How caller-side inputs are made available inside the working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingPolicy {
    /// Read the caller's file in place, by absolute path
    Reference,
    /// Copy the file into the working directory
    #[default]
    Copy,
}

/// Working directory exclusively owned by one run.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
    caller: PathBuf,
}

impl WorkDir {
    /// Destroy any directory named `name` under `caller` and create it empty.
    pub async fn recreate(caller: &Path, name: &str) -> Result<Self, PipelineError> {
        let root = caller.join(name);
        if tokio::fs::metadata(&root).await.is_ok() {
            tracing::warn!(dir = %root.display(), "Removing existing mesh adaptation directory");
            tokio::fs::remove_dir_all(&root)
                .await
                .map_err(|e| PipelineError::io(&root, e))?;
        }
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| PipelineError::io(&root, e))?;

        Ok(Self {
            root,
            caller: caller.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the run was started from; final outputs go here.
    pub fn caller(&self) -> &Path {
        &self.caller
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.root.join(name)
    }

    /// Caller-side path of an input named in the configuration.
    pub fn caller_path(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.caller.join(path)
        }
    }

    /// Make a caller input available to the run.
    ///
    /// Returns the path stages should read: the caller's file under
    /// [`StagingPolicy::Reference`], the copy (named `as_name`, or the
    /// source file name) under [`StagingPolicy::Copy`].
    pub async fn stage_input(
        &self,
        source: &str,
        policy: StagingPolicy,
        as_name: Option<&str>,
    ) -> Result<PathBuf, PipelineError> {
        let src = self.caller_path(source);
        if tokio::fs::metadata(&src).await.is_err() {
            return Err(PipelineError::ArtifactMissing {
                stage: PipelineStage::Init.to_string(),
                paths: vec![src],
            });
        }

        match policy {
            StagingPolicy::Reference => Ok(src),
            StagingPolicy::Copy => {
                let name = match as_name {
                    Some(name) => PathBuf::from(name),
                    None => src
                        .file_name()
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from(source)),
                };
                let dest = self.root.join(name);
                tokio::fs::copy(&src, &dest)
                    .await
                    .map_err(|e| PipelineError::io(&dest, e))?;
                tracing::debug!(from = %src.display(), to = %dest.display(), "Staged input");
                Ok(dest)
            }
        }
    }
}

/// What an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Mesh,
    Solution,
    AdjointSolution,
    Sensor,
    Log,
}

/// A produced file, tagged with its stage and global iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub stage: PipelineStage,
    #[serde(default)]
    pub iteration: Option<u32>,
}

/// Naming and bookkeeping of a run's artifacts.
#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    adjoint_suffix: String,
    ledger: Vec<Artifact>,
}

impl ArtifactStore {
    pub fn new(dir: &Path, adjoint_suffix: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            adjoint_suffix: adjoint_suffix.to_string(),
            ledger: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn adjoint_suffix(&self) -> &str {
        &self.adjoint_suffix
    }

    pub fn path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.join(name)
    }

    /// Name with the objective suffix: `ite0_adj.csv` -> `ite0_adj_cd.csv`.
    pub fn suffixed(&self, name: &str) -> PathBuf {
        self.dir.join(add_suffix(name, &self.adjoint_suffix))
    }

    /// Engine-format snapshot of the state entering iteration `n`:
    /// `ini.*` for the first, `ite<n-1>.*` afterwards.
    pub fn engine_snapshot(&self, n: u32) -> (PathBuf, PathBuf) {
        let stem = match n {
            0 => "ini".to_string(),
            _ => format!("ite{}", n - 1),
        };
        (
            self.path(format!("{}.meshb", stem)),
            self.path(format!("{}.solb", stem)),
        )
    }

    pub fn mesh(&self, n: u32) -> PathBuf {
        self.path(format!("ite{}.su2", n))
    }

    pub fn solution(&self, n: u32) -> PathBuf {
        self.path(format!("ite{}.csv", n))
    }

    /// Restart input of the flow solve of iteration `n`.
    pub fn solution_ini(&self, n: u32) -> PathBuf {
        self.path(format!("ite{}_ini.csv", n))
    }

    /// Adjoint solution name as given to the solver, without suffix.
    pub fn adjoint_base(&self, n: u32) -> PathBuf {
        self.path(format!("ite{}_adj.csv", n))
    }

    /// Adjoint solution as written by the solver.
    pub fn adjoint(&self, n: u32) -> PathBuf {
        self.suffixed(&format!("ite{}_adj.csv", n))
    }

    /// Restart input of the adjoint solve, without suffix.
    pub fn adjoint_ini_base(&self, n: u32) -> PathBuf {
        self.path(format!("ite{}_adj_ini.csv", n))
    }

    pub fn adjoint_ini(&self, n: u32) -> PathBuf {
        self.suffixed(&format!("ite{}_adj_ini.csv", n))
    }

    /// `ini` for the initial solves, `ite<n>.SU2` for iteration `n`.
    pub fn solver_log_tag(&self, n: Option<u32>) -> String {
        match n {
            None => "ini".to_string(),
            Some(n) => format!("ite{}.SU2", n),
        }
    }

    pub fn engine_log(&self, n: u32) -> PathBuf {
        self.path(format!("ite{}.amg.out", n))
    }

    pub fn history(&self, n: u32) -> String {
        format!("ite{}_history", n)
    }

    pub fn history_adjoint(&self, n: u32) -> String {
        format!("ite{}_history_adj", n)
    }

    /// Interpolated state snapshots: mesh, solution, adjoint.
    pub fn interpolated(&self, n: u32) -> (PathBuf, PathBuf, PathBuf) {
        (
            self.path(format!("ite{}_itp.meshb", n)),
            self.path(format!("ite{}_itp.solb", n)),
            self.path(format!("ite{}_adj_itp.solb", n)),
        )
    }

    pub fn final_snapshot(&self) -> (PathBuf, PathBuf) {
        (self.path("fin.meshb"), self.path("fin.solb"))
    }

    /// Fail with `ArtifactMissing` naming every absent path.
    pub fn verify(&self, stage: PipelineStage, paths: &[&Path]) -> Result<(), PipelineError> {
        let missing: Vec<PathBuf> = paths
            .iter()
            .filter(|p| !p.exists())
            .map(|p| p.to_path_buf())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::ArtifactMissing {
                stage: stage.to_string(),
                paths: missing,
            })
        }
    }

    pub fn record(
        &mut self,
        path: &Path,
        kind: ArtifactKind,
        stage: PipelineStage,
        iteration: Option<u32>,
    ) {
        self.ledger.push(Artifact {
            path: path.to_path_buf(),
            kind,
            stage,
            iteration,
        });
    }

    /// Produced artifacts in production order.
    pub fn ledger(&self) -> &[Artifact] {
        &self.ledger
    }

    pub fn into_ledger(self) -> Vec<Artifact> {
        self.ledger
    }

    pub async fn rename(&self, from: &Path, to: &Path) -> Result<(), PipelineError> {
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| PipelineError::io(from, e))
    }

    /// Move a finished artifact to `dest`, copying across filesystems.
    pub async fn publish(&self, from: &Path, dest: &Path) -> Result<(), PipelineError> {
        if tokio::fs::rename(from, dest).await.is_ok() {
            return Ok(());
        }
        tokio::fs::copy(from, dest)
            .await
            .map_err(|e| PipelineError::io(dest, e))?;
        tokio::fs::remove_file(from)
            .await
            .map_err(|e| PipelineError::io(from, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_names() {
        let store = ArtifactStore::new(Path::new("/run/ADAP"), "cd");

        assert_eq!(store.mesh(2), PathBuf::from("/run/ADAP/ite2.su2"));
        assert_eq!(store.adjoint(0), PathBuf::from("/run/ADAP/ite0_adj_cd.csv"));
        assert_eq!(
            store.adjoint_ini(1),
            PathBuf::from("/run/ADAP/ite1_adj_ini_cd.csv")
        );
        assert_eq!(store.engine_snapshot(0).0, PathBuf::from("/run/ADAP/ini.meshb"));
        assert_eq!(store.engine_snapshot(3).1, PathBuf::from("/run/ADAP/ite2.solb"));
        assert_eq!(store.solver_log_tag(Some(4)), "ite4.SU2");
    }

    #[test]
    fn test_no_suffix_for_feature_sensors() {
        let store = ArtifactStore::new(Path::new("w"), "");
        assert_eq!(store.adjoint(1), store.adjoint_base(1));
    }

    #[test]
    fn test_verify_names_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "");
        let present = store.mesh(0);
        std::fs::write(&present, "NDIME= 2\n").unwrap();
        let absent = store.solution(0);

        let err = store
            .verify(PipelineStage::Adapt, &[&present, &absent])
            .unwrap_err();
        assert_eq!(err.missing_artifacts(), vec![absent.as_path()]);
    }

    #[tokio::test]
    async fn test_recreate_destroys_stale_directory() {
        let caller = tempfile::tempdir().unwrap();
        let stale = caller.path().join("ADAP");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("ite9.su2"), "old").unwrap();

        let work = WorkDir::recreate(caller.path(), "ADAP").await.unwrap();

        assert!(work.root().exists());
        assert!(!work.join("ite9.su2").exists());
    }

    #[tokio::test]
    async fn test_stage_input_policies() {
        let caller = tempfile::tempdir().unwrap();
        std::fs::write(caller.path().join("mesh.su2"), "NDIME= 2\n").unwrap();
        let work = WorkDir::recreate(caller.path(), "ADAP").await.unwrap();

        let referenced = work
            .stage_input("mesh.su2", StagingPolicy::Reference, None)
            .await
            .unwrap();
        assert_eq!(referenced, caller.path().join("mesh.su2"));

        let copied = work
            .stage_input("mesh.su2", StagingPolicy::Copy, Some("input.su2"))
            .await
            .unwrap();
        assert_eq!(copied, work.join("input.su2"));
        assert!(copied.exists());

        let err = work
            .stage_input("absent.su2", StagingPolicy::Copy, None)
            .await
            .unwrap_err();
        assert!(err.is_artifact_missing());
    }
}
