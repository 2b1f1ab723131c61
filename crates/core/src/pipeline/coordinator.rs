//! # Pipeline Coordinator
//!
//! Drives one adaptation run end to end:
//!
//! 1. `INIT`: validate options and schedule, pick the backend, recreate the
//!    working directory, stage inputs, prepare the background mesh.
//! 2. `INITIAL_SOLVE`: flow (and adjoint) solution on the input mesh, or the
//!    supplied restart files.
//! 3. For every sub-iteration of the schedule: sensor, adapt, flow solve
//!    (and adjoint solve for GOAL), checkpoint.
//! 4. `FINALIZE`: move the last mesh and solution to the caller's output
//!    names.
//!
//! Stages run strictly in sequence. The first error aborts the run; the
//! working directory is left as is for inspection.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::adapt::{
    prepare_background, AdaptationBackend, AdaptationStepRunner, AmgExecutable, EngineSettings,
    ExternalBackend, LibraryBackend, RemeshLibrary, RemeshRequest, RemeshTool,
};
use crate::artifacts::{
    Artifact, ArtifactKind, ArtifactStore, StagingPolicy, WorkDir, INITIAL_ADJOINT, INITIAL_FLOW,
};
use crate::config::{
    add_suffix, AdaptOptions, AdaptationSchedule, BackendKind, Config, ScheduleBuilder,
    ScheduleStep, SensorKind, ADAPTATION_OPTIONS,
};
use crate::error::{AdaptError, ConfigError, ConversionError, PipelineError};
use crate::io;
use crate::sensor::SensorComputer;
use crate::solver::{
    CallLogs, FlowSolver, MetricRequest, SolverInvoker, SolverOverlay, SolverRole, Su2Executable,
};

use super::events::{PipelineEvent, PipelineEventKind};
use super::stage::{Pipeline, PipelineStage};

/// Run-level settings that do not come from the option file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Directory the configuration names are relative to
    pub caller_dir: PathBuf,
    /// Working directory created under `caller_dir`
    pub work_dir_name: String,
    /// How inputs are made available to the run
    #[serde(default)]
    pub staging: StagingPolicy,
    /// Overrides `PYADAP_PYTHON`
    #[serde(default)]
    pub backend: Option<BackendKind>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            caller_dir: PathBuf::from("."),
            work_dir_name: "ADAP".to_string(),
            staging: StagingPolicy::Copy,
            backend: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(caller_dir: impl Into<PathBuf>) -> Self {
        Self {
            caller_dir: caller_dir.into(),
            ..Default::default()
        }
    }
}

/// Where the run stands between two sub-iterations.
#[derive(Debug, Clone)]
pub struct PipelineState {
    /// Sub-iterations completed so far
    pub global_iter: u32,
    pub work_dir: WorkDir,
    pub current_mesh: PathBuf,
    pub current_solution: PathBuf,
    /// Adjoint of the current state, GOAL only
    pub current_adjoint: Option<PathBuf>,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub schedule: AdaptationSchedule,
    pub sensor: SensorKind,
    pub backend: BackendKind,
    pub global_iter: u32,
    pub mesh_out: PathBuf,
    pub solution_out: PathBuf,
    /// Produced artifacts in production order
    pub artifacts: Vec<Artifact>,
    pub events: Vec<PipelineEvent>,
}

/// Per-run collaborators, fixed after `INIT`.
struct RunContext {
    options: AdaptOptions,
    invoker: SolverInvoker,
    runner: AdaptationStepRunner,
    engine: EngineSettings,
    store: ArtifactStore,
}

/// The adaptation pipeline coordinator
pub struct PipelineCoordinator {
    config: Config,
    settings: CoordinatorConfig,
    solver: Arc<dyn FlowSolver>,
    remesh_tool: Arc<dyn RemeshTool>,
    library: Option<Arc<dyn RemeshLibrary>>,
    pipeline: Pipeline,
    events: Vec<PipelineEvent>,
    event_tx: Option<mpsc::Sender<PipelineEvent>>,
    seq: u64,
}

impl PipelineCoordinator {
    /// Coordinator for `config`, running `SU2_CFD` and `amg` from the `PATH`.
    pub fn new(config: Config, settings: CoordinatorConfig) -> Self {
        Self {
            config,
            settings,
            solver: Arc::new(Su2Executable::default()),
            remesh_tool: Arc::new(AmgExecutable::default()),
            library: None,
            pipeline: Pipeline::new(0, false),
            events: Vec::new(),
            event_tx: None,
            seq: 0,
        }
    }

    pub fn with_solver(mut self, solver: Arc<dyn FlowSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_remesh_tool(mut self, tool: Arc<dyn RemeshTool>) -> Self {
        self.remesh_tool = tool;
        self
    }

    /// Make the in-process backend available.
    pub fn with_library(mut self, library: Arc<dyn RemeshLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    /// Set event channel for streaming updates
    pub fn with_event_channel(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Current pipeline stage
    pub fn stage(&self) -> PipelineStage {
        self.pipeline.stage
    }

    /// Events recorded so far
    pub fn events(&self) -> &[PipelineEvent] {
        &self.events
    }

    /// Emit an event
    async fn emit(&mut self, mut event: PipelineEvent) {
        event.seq = self.seq;
        self.seq += 1;
        self.events.push(event.clone());
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Move to the next stage and announce it.
    async fn advance(&mut self, iteration: Option<u32>) {
        self.pipeline.advance();
        let mut event = PipelineEvent::new(PipelineEventKind::StageStarted, self.pipeline.stage);
        if let Some(n) = iteration {
            event = event.with_iteration(n);
        }
        self.emit(event).await;
    }

    /// Run the whole pipeline.
    pub async fn run(&mut self) -> Result<RunSummary, PipelineError> {
        match self.execute().await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                let stage = self.pipeline.stage;
                self.pipeline.fail();
                tracing::error!(stage = %stage, error = %e, "Mesh adaptation failed");
                let missing: Vec<String> = e
                    .missing_artifacts()
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect();
                self.emit(
                    PipelineEvent::new(PipelineEventKind::RunFailed, stage)
                        .with_data(json!({ "error": e.to_string(), "missing": missing })),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> Result<RunSummary, PipelineError> {
        let schedule = ScheduleBuilder::new(&self.config).build()?;
        let options = AdaptOptions::from_config(&self.config)?;
        self.pipeline = Pipeline::new(schedule.total_sub_iterations(), options.sensor.is_goal());

        let backend_kind = self.settings.backend.unwrap_or(options.backend);
        let backend: Arc<dyn AdaptationBackend> = match backend_kind {
            BackendKind::External => Arc::new(ExternalBackend::new(Arc::clone(&self.remesh_tool))),
            BackendKind::Library => {
                let library = self.library.clone().ok_or(AdaptError::LibraryUnavailable)?;
                Arc::new(LibraryBackend::new(library))
            }
        };

        tracing::info!("SU2-AMG Anisotropic Mesh Adaptation");
        for line in AdaptOptions::describe(&self.config) {
            tracing::info!("{}", line);
        }
        self.emit(
            PipelineEvent::new(PipelineEventKind::RunStarted, PipelineStage::Init).with_data(json!({
                "levels": schedule.len(),
                "sub_iterations": schedule.total_sub_iterations(),
                "sensor": options.sensor,
                "backend": backend_kind,
            })),
        )
        .await;

        let work = WorkDir::recreate(&self.settings.caller_dir, &self.settings.work_dir_name).await?;
        let policy = self.settings.staging;
        let mesh_in = work.stage_input(&options.mesh_in, policy, None).await?;
        let dimension = io::read_dimension(&mesh_in)?;
        if dimension != 2 && dimension != 3 {
            return Err(ConfigError::UnsupportedDimension(dimension).into());
        }
        let background = prepare_background(&work, &options, &mesh_in, policy, dimension).await?;

        let mut ctx = RunContext {
            invoker: SolverInvoker::new(
                Arc::clone(&self.solver),
                self.config.without(ADAPTATION_OPTIONS),
                work.root(),
                &options.adjoint_suffix,
            ),
            runner: AdaptationStepRunner::new(backend),
            engine: EngineSettings::new(&options, background),
            store: ArtifactStore::new(work.root(), &options.adjoint_suffix),
            options,
        };

        self.advance(None).await;
        let mut run = self.initial_solve(&mut ctx, &schedule, work, mesh_in).await?;
        self.advance(None).await;

        tracing::info!("Starting mesh adaptation process");
        for step in schedule.steps() {
            debug_assert_eq!(step.global_iter, run.global_iter);
            if step.sub_index == 0 {
                tracing::info!(
                    "Iteration {} - Mesh size coefficient {}",
                    step.level.index,
                    step.level.target_size
                );
            }
            self.iterate(&mut ctx, &mut run, step).await?;
            self.advance(Some(run.global_iter)).await;
        }

        self.finalize(ctx, run, schedule, backend_kind).await
    }

    /// Produce the iteration-0 solution: solve the flow (and, for GOAL, the
    /// adjoint) on the input mesh, or stage the supplied restart.
    ///
    /// A restart with a feature sensor runs no solver at all: the first
    /// sensor is derived from the supplied solution, so no initial adjoint
    /// or metric pass happens. A GOAL restart still runs the adjoint, for
    /// its metric.
    async fn initial_solve(
        &mut self,
        ctx: &mut RunContext,
        schedule: &AdaptationSchedule,
        work: WorkDir,
        mesh_in: PathBuf,
    ) -> Result<PipelineState, PipelineError> {
        let options = &ctx.options;
        let goal = options.sensor.is_goal();
        let logs = CallLogs::new(work.root(), &ctx.store.solver_log_tag(None));
        let metric = MetricRequest {
            complexity: schedule.first().target_size,
            hmin: options.hmin,
            hmax: options.hmax,
        };
        let adjoint_overlay = |solution: &Path| {
            SolverOverlay::new(&mesh_in, work.join(INITIAL_ADJOINT))
                .history("ini_history_adj")
                .solution_in(solution)
                .metric(metric)
        };

        let (solution, adjoint) = if !options.restart_sol {
            tracing::info!("Running initial CFD solution");
            let overlay =
                SolverOverlay::new(&mesh_in, work.join(INITIAL_FLOW)).history("ini_history");
            let solution = ctx
                .invoker
                .invoke(&overlay, SolverRole::InitialFlow, &logs)
                .await?;
            self.solver_finished(SolverRole::InitialFlow, None, &solution)
                .await;

            let adjoint = if goal {
                tracing::info!("Running initial adjoint CFD solution");
                let overlay = adjoint_overlay(&solution);
                let adjoint = ctx
                    .invoker
                    .invoke(&overlay, SolverRole::InitialAdjoint, &logs)
                    .await?;
                self.solver_finished(SolverRole::InitialAdjoint, None, &adjoint)
                    .await;
                Some(adjoint)
            } else {
                None
            };
            (solution, adjoint)
        } else {
            tracing::info!("Initial CFD solution is provided");
            let supplied = options.solution_in.as_deref().ok_or_else(|| {
                ConfigError::MissingRestartSolution(vec!["SOLUTION_FILENAME".into()])
            })?;
            let solution = work
                .stage_input(supplied, self.settings.staging, Some(INITIAL_FLOW))
                .await?;

            // The restart solution is already flow-converged; the adjoint is
            // recomputed for its metric, restarted from the supplied one when
            // it exists.
            let adjoint = if goal {
                let supplied = options.adjoint_in.as_deref().ok_or_else(|| {
                    ConfigError::MissingRestartSolution(vec!["SOLUTION_ADJ_FILENAME".into()])
                })?;
                let supplied = work.caller_path(supplied);
                let on_disk = match supplied.file_name().and_then(|n| n.to_str()) {
                    Some(name) => supplied.with_file_name(add_suffix(name, &options.adjoint_suffix)),
                    None => supplied.clone(),
                };
                let overlay = adjoint_overlay(&solution);
                let overlay = if on_disk.exists() {
                    tracing::info!("Initial adjoint CFD solution is provided");
                    overlay.adjoint_in(&supplied).restart(true).iterations(1)
                } else {
                    tracing::info!("Running initial adjoint CFD solution");
                    overlay.restart(false)
                };
                let adjoint = ctx
                    .invoker
                    .invoke(&overlay, SolverRole::InitialAdjoint, &logs)
                    .await?;
                self.solver_finished(SolverRole::InitialAdjoint, None, &adjoint)
                    .await;
                Some(adjoint)
            } else {
                None
            };
            (solution, adjoint)
        };

        let mut produced = vec![mesh_in.as_path(), solution.as_path()];
        if let Some(adjoint) = &adjoint {
            produced.push(adjoint);
        }
        ctx.store.verify(PipelineStage::InitialSolve, &produced)?;

        let stage = PipelineStage::InitialSolve;
        ctx.store.record(&mesh_in, ArtifactKind::Mesh, stage, None);
        ctx.store
            .record(&solution, ArtifactKind::Solution, stage, None);
        if let Some(adjoint) = &adjoint {
            ctx.store
                .record(adjoint, ArtifactKind::AdjointSolution, stage, None);
        }

        Ok(PipelineState {
            global_iter: 0,
            work_dir: work,
            current_mesh: mesh_in,
            current_solution: solution,
            current_adjoint: adjoint,
        })
    }

    /// One sub-iteration: sensor, adapt, re-solve, checkpoint.
    async fn iterate(
        &mut self,
        ctx: &mut RunContext,
        run: &mut PipelineState,
        step: ScheduleStep<'_>,
    ) -> Result<(), PipelineError> {
        let n = run.global_iter;
        let level = step.level;
        let progress = step.progress();
        let goal = ctx.options.sensor.is_goal();

        // SENSOR
        let mut state = io::read_state(&run.current_mesh, &run.current_solution)?;
        let (snap_mesh, snap_solution) = ctx.store.engine_snapshot(n);
        io::write_state(&snap_mesh, &snap_solution, &state)?;
        ctx.store
            .verify(PipelineStage::Sensor, &[&snap_mesh, &snap_solution])?;
        ctx.store
            .record(&snap_mesh, ArtifactKind::Mesh, PipelineStage::Sensor, Some(n));
        ctx.store.record(
            &snap_solution,
            ArtifactKind::Solution,
            PipelineStage::Sensor,
            Some(n),
        );
        SensorComputer::compute(
            &mut state,
            ctx.options.sensor,
            run.current_adjoint.as_deref(),
            n,
        )?;
        self.advance(Some(n)).await;

        // ADAPT
        tracing::info!("{} Generating adapted mesh", progress);
        let engine_log = ctx.store.engine_log(n);
        let request = RemeshRequest {
            iteration: n,
            level,
            settings: &ctx.engine,
            work_dir: run.work_dir.root(),
            log: engine_log.clone(),
        };
        let adapted = ctx.runner.adapt(state, &request).await?;
        if engine_log.exists() {
            ctx.store
                .record(&engine_log, ArtifactKind::Log, PipelineStage::Adapt, Some(n));
        }

        let mesh = ctx.store.mesh(n);
        let solution = ctx.store.solution(n);
        io::write_state(&mesh, &solution, &adapted)?;
        converted("SU2", &mesh)?;
        converted("CSV", &solution)?;
        let adjoint = match (goal, &adapted.adjoint) {
            (true, Some(field)) => {
                let path = ctx.store.adjoint(n);
                io::write_solution(&path, &adapted.mesh, field)?;
                converted("CSV", &path)?;
                Some(path)
            }
            (true, None) => {
                return Err(ConfigError::MissingAdjoint {
                    iteration: n,
                    expected: ctx.store.adjoint(n).display().to_string(),
                }
                .into())
            }
            (false, _) => None,
        };

        if ctx.options.write_native {
            let (itp_mesh, itp_solution, itp_adjoint) = ctx.store.interpolated(n);
            io::write_state(&itp_mesh, &itp_solution, &adapted)?;
            converted("GMF", &itp_mesh)?;
            converted("GMF", &itp_solution)?;
            if let Some(field) = &adapted.adjoint {
                io::write_solution(&itp_adjoint, &adapted.mesh, field)?;
                converted("GMF", &itp_adjoint)?;
            }
        }
        ctx.store
            .record(&mesh, ArtifactKind::Mesh, PipelineStage::Adapt, Some(n));
        self.advance(Some(n)).await;

        // RESOLVE_FLOW
        let solution_ini = ctx.store.solution_ini(n);
        ctx.store.rename(&solution, &solution_ini).await?;
        if let Some(adjoint) = &adjoint {
            ctx.store.rename(adjoint, &ctx.store.adjoint_ini(n)).await?;
        }

        tracing::info!("{:<9} Running CFD", "");
        let logs = CallLogs::new(run.work_dir.root(), &ctx.store.solver_log_tag(Some(n)));
        let overlay = SolverOverlay::new(&mesh, &solution)
            .history(ctx.store.history(n))
            .solution_in(&solution_ini)
            .restart(true)
            .iterations(level.flow_iters)
            .cfl(level.cfl);
        let flow = ctx
            .invoker
            .invoke(&overlay, SolverRole::StepFlow, &logs)
            .await?;
        ctx.store.record(
            &flow,
            ArtifactKind::Solution,
            PipelineStage::ResolveFlow,
            Some(n),
        );
        self.solver_finished(SolverRole::StepFlow, Some(n), &flow)
            .await;
        self.advance(Some(n)).await;

        // RESOLVE_ADJOINT
        let adjoint = if goal {
            tracing::info!("{:<9} Running adjoint CFD", "");
            let overlay = SolverOverlay::new(&mesh, ctx.store.adjoint_base(n))
                .history(ctx.store.history_adjoint(n))
                .solution_in(&flow)
                .adjoint_in(ctx.store.adjoint_ini_base(n))
                .restart(true)
                .iterations(level.adj_iters)
                .cfl(level.cfl)
                .metric(MetricRequest {
                    complexity: level.target_size,
                    hmin: ctx.options.hmin,
                    hmax: ctx.options.hmax,
                });
            let adjoint = ctx
                .invoker
                .invoke(&overlay, SolverRole::StepAdjoint, &logs)
                .await?;
            ctx.store.record(
                &adjoint,
                ArtifactKind::AdjointSolution,
                PipelineStage::ResolveAdjoint,
                Some(n),
            );
            self.solver_finished(SolverRole::StepAdjoint, Some(n), &adjoint)
                .await;
            self.advance(Some(n)).await;
            Some(adjoint)
        } else {
            None
        };

        // CHECKPOINT
        let mut produced = vec![mesh.as_path(), flow.as_path()];
        if let Some(adjoint) = &adjoint {
            produced.push(adjoint);
        }
        ctx.store.verify(PipelineStage::Checkpoint, &produced)?;

        let data = json!({
            "mesh": mesh.display().to_string(),
            "solution": flow.display().to_string(),
            "adjoint": adjoint.as_ref().map(|p| p.display().to_string()),
            "level": level.index,
            "complexity": level.target_size,
        });
        run.current_mesh = mesh;
        run.current_solution = flow;
        run.current_adjoint = adjoint;
        run.global_iter += 1;
        self.emit(
            PipelineEvent::new(PipelineEventKind::Checkpoint, PipelineStage::Checkpoint)
                .with_iteration(n)
                .with_data(data),
        )
        .await;
        Ok(())
    }

    async fn finalize(
        &mut self,
        mut ctx: RunContext,
        run: PipelineState,
        schedule: AdaptationSchedule,
        backend: BackendKind,
    ) -> Result<RunSummary, PipelineError> {
        let work = &run.work_dir;

        if ctx.options.write_native {
            let state = io::read_state(&run.current_mesh, &run.current_solution)?;
            let (mesh, solution) = ctx.store.final_snapshot();
            io::write_state(&mesh, &solution, &state)?;
            ctx.store
                .verify(PipelineStage::Finalize, &[&mesh, &solution])?;
            ctx.store
                .record(&mesh, ArtifactKind::Mesh, PipelineStage::Finalize, None);
            ctx.store
                .record(&solution, ArtifactKind::Solution, PipelineStage::Finalize, None);
        }

        let mesh_out = work.caller_path(&ctx.options.mesh_out);
        let solution_out = work.caller_path(&ctx.options.restart_out);
        ctx.store.publish(&run.current_solution, &solution_out).await?;
        ctx.store.publish(&run.current_mesh, &mesh_out).await?;
        ctx.store
            .verify(PipelineStage::Finalize, &[&mesh_out, &solution_out])?;
        ctx.store
            .record(&mesh_out, ArtifactKind::Mesh, PipelineStage::Finalize, None);
        ctx.store.record(
            &solution_out,
            ArtifactKind::Solution,
            PipelineStage::Finalize,
            None,
        );

        tracing::info!(
            "Mesh adaptation successfully ended. Results files: {} {}",
            mesh_out.display(),
            solution_out.display()
        );
        self.advance(None).await;
        self.emit(
            PipelineEvent::new(PipelineEventKind::RunCompleted, PipelineStage::Complete).with_data(
                json!({
                    "global_iter": run.global_iter,
                    "mesh": mesh_out.display().to_string(),
                    "solution": solution_out.display().to_string(),
                }),
            ),
        )
        .await;

        Ok(RunSummary {
            schedule,
            sensor: ctx.options.sensor,
            backend,
            global_iter: run.global_iter,
            mesh_out,
            solution_out,
            artifacts: ctx.store.into_ledger(),
            events: self.events.clone(),
        })
    }

    async fn solver_finished(&mut self, role: SolverRole, iteration: Option<u32>, output: &Path) {
        let mut event = PipelineEvent::new(PipelineEventKind::SolverFinished, self.pipeline.stage)
            .with_data(json!({ "role": role, "output": output.display().to_string() }));
        if let Some(n) = iteration {
            event = event.with_iteration(n);
        }
        self.emit(event).await;
    }
}

fn converted(format: &'static str, path: &Path) -> Result<(), ConversionError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConversionError::MissingOutput {
            format,
            path: path.to_path_buf(),
        })
    }
}
