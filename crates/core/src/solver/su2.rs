//! The SU2 flow solver as a child process, optionally under an MPI launcher.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use super::{FlowSolver, SolveRequest};
use crate::error::SolveError;

/// MPI launcher command, e.g. `mpirun -n <ranks>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpiLauncher {
    pub command: String,
    pub ranks: u32,
}

/// `SU2_CFD <config>` run inside the working directory.
#[derive(Debug, Clone)]
pub struct Su2Executable {
    program: String,
    launcher: Option<MpiLauncher>,
}

impl Default for Su2Executable {
    fn default() -> Self {
        Self::new("SU2_CFD")
    }
}

impl Su2Executable {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            launcher: None,
        }
    }

    /// Run under `command -n ranks`; a single rank runs the solver directly.
    pub fn with_mpi(mut self, command: impl Into<String>, ranks: u32) -> Self {
        self.launcher = Some(MpiLauncher {
            command: command.into(),
            ranks,
        });
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self) -> (String, Command) {
        match &self.launcher {
            Some(mpi) if mpi.ranks > 1 => {
                let mut cmd = Command::new(&mpi.command);
                cmd.arg("-n").arg(mpi.ranks.to_string()).arg(&self.program);
                (mpi.command.clone(), cmd)
            }
            _ => (self.program.clone(), Command::new(&self.program)),
        }
    }
}

#[async_trait]
impl FlowSolver for Su2Executable {
    async fn solve(&self, request: SolveRequest<'_>) -> Result<(), SolveError> {
        let (program, mut cmd) = self.command();
        cmd.arg(request.config_path)
            .current_dir(request.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(request.stdout))
            .stderr(Stdio::from(request.stderr))
            .kill_on_drop(true);

        tracing::debug!(program = %program, config = %request.config_path.display(), "Launching solver");
        let status = cmd.status().await.map_err(|e| SolveError::Launch {
            program,
            role: request.role,
            source: e,
        })?;

        if !status.success() {
            return Err(SolveError::Exited {
                role: request.role,
                status: status.to_string(),
                log: request.log.to_path_buf(),
            });
        }
        Ok(())
    }
}
