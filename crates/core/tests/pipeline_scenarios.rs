//! End-to-end runs of the coordinator against fake solver, engine and library.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use remesh_core::adapt::{LibraryRequest, RemeshOutput, ToolInvocation};
use remesh_core::artifacts::StagingPolicy;
use remesh_core::config::add_suffix;
use remesh_core::error::{AdaptError, ConfigError, SolveError};
use remesh_core::io;
use remesh_core::mesh::Solution;
use remesh_core::solver::{SolveRequest, SolverRole};
use remesh_core::{
    BackendKind, Config, CoordinatorConfig, FlowSolver, PipelineCoordinator, PipelineError,
    PipelineEventKind, RemeshLibrary, RemeshTool,
};

const SQUARE: &str = "\
NDIME= 2
NELEM= 2
5 0 1 2 0
5 0 2 3 1
NPOIN= 4
0 0 0
1 0 1
1 1 2
0 1 3
NMARK= 1
MARKER_TAG= wall
MARKER_ELEMS= 4
3 0 1
3 1 2
3 2 3
3 3 0
";

const BASE: &str = "\
% adaptation case
PYADAP_COMPLEXITY= (100, 200)
PYADAP_SUBITE= (2, 1)
PYADAP_SENSOR= MACH
PYADAP_HGRAD= 1.5
PYADAP_HMIN= 0.01
PYADAP_HMAX= 1
PYADAP_FLOW_ITER= (10, 20)
ADAP_NORM= 2
ITER= 5
CFL_NUMBER= 2.5
MESH_FILENAME= mesh.su2
MESH_OUT_FILENAME= mesh_adapted.su2
RESTART_FILENAME= restart_adapted.csv
RESTART_SOL= NO
";

/// Writes a restart for the mesh it is given, recording every call.
#[derive(Default)]
struct FakeSolver {
    calls: Mutex<Vec<(SolverRole, Config)>>,
    /// Role whose calls produce nothing
    skip: Option<SolverRole>,
}

impl FakeSolver {
    fn skipping(role: SolverRole) -> Self {
        Self {
            skip: Some(role),
            ..Default::default()
        }
    }

    fn roles(&self) -> Vec<SolverRole> {
        self.calls.lock().unwrap().iter().map(|(r, _)| *r).collect()
    }

    fn configs(&self, role: SolverRole) -> Vec<Config> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl FlowSolver for FakeSolver {
    async fn solve(&self, request: SolveRequest<'_>) -> Result<(), SolveError> {
        let role = request.role;
        self.calls
            .lock()
            .unwrap()
            .push((role, request.config.clone()));
        if self.skip == Some(role) {
            return Ok(());
        }

        let config = request.config;
        let mesh_path = request.work_dir.join(config.get("MESH_FILENAME").unwrap());
        let mesh = io::read_mesh(&mesh_path).unwrap();

        let (out, tags) = if role.is_adjoint() {
            let out = request
                .work_dir
                .join(config.get("RESTART_ADJ_FILENAME").unwrap());
            let name = out.file_name().unwrap().to_str().unwrap().to_string();
            (
                out.with_file_name(add_suffix(&name, "cd")),
                vec!["Adjoint_Density", "Metric_xx", "Metric_xy", "Metric_yy"],
            )
        } else {
            (
                request.work_dir.join(config.get("RESTART_FILENAME").unwrap()),
                vec!["Density", "Mach", "Pressure"],
            )
        };

        let rows = mesh
            .vertices
            .iter()
            .map(|v| vec![1.0 + v[0], 0.5 + v[1], 2.0, 0.1])
            .map(|mut row| {
                row.truncate(tags.len());
                row
            })
            .collect();
        let tags = tags.into_iter().map(String::from).collect();
        io::write_solution(&out, &mesh, &Solution::new(tags, rows)).unwrap();
        Ok(())
    }
}

/// Engine stand-in: the adapted mesh is the input mesh.
#[derive(Default)]
struct FakeTool {
    skip_interpolation: bool,
    args: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl RemeshTool for FakeTool {
    async fn run(&self, invocation: ToolInvocation<'_>) -> Result<(), AdaptError> {
        self.args.lock().unwrap().push(invocation.args.clone());
        let dir = invocation.work_dir;
        std::fs::copy(dir.join("current.meshb"), dir.join("current.new.meshb")).unwrap();
        if !self.skip_interpolation {
            std::fs::copy(dir.join("current.solb"), dir.join("current.itp.solb")).unwrap();
        }
        Ok(())
    }
}

/// Library stand-in that loses everything but geometry and payload.
#[derive(Default)]
struct FakeLibrary {
    complexities: Mutex<Vec<u64>>,
}

impl RemeshLibrary for FakeLibrary {
    fn name(&self) -> &str {
        "fake"
    }

    fn remesh(&self, request: LibraryRequest) -> anyhow::Result<RemeshOutput> {
        self.complexities.lock().unwrap().push(request.target_size);
        let mut mesh = request.mesh;
        mesh.markers.clear();
        mesh.dimension = 0;
        Ok(RemeshOutput {
            mesh,
            solution: request.payload,
        })
    }
}

fn case(dir: &Path, overrides: &[(&str, &str)]) -> Config {
    std::fs::write(dir.join("mesh.su2"), SQUARE).unwrap();
    let mut config = Config::parse(BASE).unwrap();
    for (key, value) in overrides {
        config.set(key, value);
    }
    config
}

fn coordinator(
    dir: &Path,
    config: Config,
    solver: &Arc<FakeSolver>,
    backend: BackendKind,
) -> PipelineCoordinator {
    let settings = CoordinatorConfig {
        backend: Some(backend),
        ..CoordinatorConfig::new(dir)
    };
    PipelineCoordinator::new(config, settings)
        .with_solver(solver.clone())
        .with_library(Arc::new(FakeLibrary::default()))
}

fn work(dir: &Path, name: &str) -> PathBuf {
    dir.join("ADAP").join(name)
}

#[tokio::test]
async fn test_mach_schedule_runs_three_iterations() {
    let dir = tempfile::tempdir().unwrap();
    let solver = Arc::new(FakeSolver::default());
    let config = case(dir.path(), &[]);

    let summary = coordinator(dir.path(), config, &solver, BackendKind::Library)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.global_iter, 3);
    assert_eq!(
        solver.roles(),
        vec![
            SolverRole::InitialFlow,
            SolverRole::StepFlow,
            SolverRole::StepFlow,
            SolverRole::StepFlow,
        ]
    );

    for name in ["ite0.su2", "ite1.su2", "ite0_ini.csv", "ite1.csv", "ite2_ini.csv"] {
        assert!(work(dir.path(), name).exists(), "{} missing", name);
    }
    // The last pair moved to the caller's output names.
    assert!(!work(dir.path(), "ite2.su2").exists());
    assert!(!work(dir.path(), "ite2.csv").exists());
    assert_eq!(summary.mesh_out, dir.path().join("mesh_adapted.su2"));
    assert!(summary.mesh_out.exists());
    assert!(summary.solution_out.exists());

    let meshes: Vec<PathBuf> = summary
        .artifacts
        .iter()
        .filter(|a| a.stage == remesh_core::PipelineStage::Adapt)
        .map(|a| a.path.clone())
        .collect();
    assert_eq!(
        meshes,
        vec![
            work(dir.path(), "ite0.su2"),
            work(dir.path(), "ite1.su2"),
            work(dir.path(), "ite2.su2"),
        ]
    );
}

#[tokio::test]
async fn test_solver_overlay_per_level() {
    let dir = tempfile::tempdir().unwrap();
    let solver = Arc::new(FakeSolver::default());
    let config = case(dir.path(), &[]);

    coordinator(dir.path(), config, &solver, BackendKind::Library)
        .run()
        .await
        .unwrap();

    let initial = &solver.configs(SolverRole::InitialFlow)[0];
    assert_eq!(initial.get("ITER"), Some("5"));
    assert_eq!(initial.get("MATH_PROBLEM"), Some("DIRECT"));
    assert!(!initial.contains("PYADAP_SENSOR"));
    assert!(!initial.contains("PYADAP_FLOW_ITER"));

    let steps = solver.configs(SolverRole::StepFlow);
    let iters: Vec<_> = steps.iter().map(|c| c.get("ITER").unwrap()).collect();
    assert_eq!(iters, vec!["10", "10", "20"]);
    assert_eq!(steps[1].get("MESH_FILENAME"), Some("ite1.su2"));
    assert_eq!(steps[1].get("SOLUTION_FILENAME"), Some("ite1_ini.csv"));
    assert_eq!(steps[1].get("RESTART_FILENAME"), Some("ite1.csv"));
    assert_eq!(steps[1].get("RESTART_SOL"), Some("YES"));
    assert_eq!(steps[2].get("CONV_FILENAME"), Some("ite2_history"));
}

#[tokio::test]
async fn test_goal_runs_adjoint_every_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let solver = Arc::new(FakeSolver::default());
    let tool = Arc::new(FakeTool::default());
    let config = case(
        dir.path(),
        &[("PYADAP_SENSOR", "GOAL"), ("OBJECTIVE_FUNCTION", "DRAG")],
    );

    let summary = coordinator(dir.path(), config, &solver, BackendKind::External)
        .with_remesh_tool(tool.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.global_iter, 3);
    let mut expected = vec![SolverRole::InitialFlow, SolverRole::InitialAdjoint];
    for _ in 0..3 {
        expected.extend([SolverRole::StepFlow, SolverRole::StepAdjoint]);
    }
    assert_eq!(solver.roles(), expected);

    for name in [
        "ini_restart_adj_cd.csv",
        "ite0_adj_cd.csv",
        "ite0_adj_ini_cd.csv",
        "ite2_adj_cd.csv",
    ] {
        assert!(work(dir.path(), name).exists(), "{} missing", name);
    }

    let adjoints = solver.configs(SolverRole::StepAdjoint);
    assert_eq!(adjoints[0].get("MATH_PROBLEM"), Some("DISCRETE_ADJOINT"));
    assert_eq!(adjoints[0].get("RESTART_ADJ_FILENAME"), Some("ite0_adj.csv"));
    assert_eq!(adjoints[0].get("SOLUTION_ADJ_FILENAME"), Some("ite0_adj_ini.csv"));
    assert_eq!(adjoints[0].get("COMPUTE_METRIC"), Some("YES"));
    assert_eq!(adjoints[2].get("ADAP_COMPLEXITY"), Some("200"));

    let args = tool.args.lock().unwrap();
    assert_eq!(args.len(), 3);
    assert!(args[0].join(" ").contains("-met current_sensor.solb"));
}

#[tokio::test]
async fn test_external_backend_produces_same_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let solver = Arc::new(FakeSolver::default());
    let tool = Arc::new(FakeTool::default());
    let config = case(dir.path(), &[]);

    let summary = coordinator(dir.path(), config, &solver, BackendKind::External)
        .with_remesh_tool(tool.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.global_iter, 3);
    for name in ["ini.meshb", "ite0.meshb", "ite1.su2", "ite0.amg.out", "amg_back_surf.meshb"] {
        assert!(work(dir.path(), name).exists(), "{} missing", name);
    }

    let args = tool.args.lock().unwrap();
    let complexities: Vec<String> = args
        .iter()
        .map(|a| {
            let c = a.iter().position(|x| x == "-c").unwrap();
            a[c + 1].clone()
        })
        .collect();
    assert_eq!(complexities, vec!["100", "100", "200"]);

    let mesh = io::read_mesh(&summary.mesh_out).unwrap();
    assert_eq!(mesh.markers, vec!["wall".to_string()]);
}

#[tokio::test]
async fn test_schedule_mismatch_fails_before_any_solve() {
    let dir = tempfile::tempdir().unwrap();
    let solver = Arc::new(FakeSolver::default());
    let config = case(dir.path(), &[("PYADAP_SUBITE", "(2)")]);

    let err = coordinator(dir.path(), config, &solver, BackendKind::Library)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Config(ConfigError::ScheduleMismatch {
            sizes: 2,
            sub_iterations: 1
        })
    ));
    assert!(solver.roles().is_empty());
    assert!(!dir.path().join("ADAP").exists());
}

#[tokio::test]
async fn test_missing_adjoint_output_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let solver = Arc::new(FakeSolver::skipping(SolverRole::StepAdjoint));
    let config = case(
        dir.path(),
        &[("PYADAP_SENSOR", "GOAL"), ("OBJECTIVE_FUNCTION", "DRAG")],
    );

    let err = coordinator(dir.path(), config, &solver, BackendKind::Library)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Solve(SolveError::MissingOutput {
            role: SolverRole::StepAdjoint,
            ..
        })
    ));
    assert_eq!(
        err.missing_artifacts(),
        vec![work(dir.path(), "ite0_adj_cd.csv").as_path()]
    );
    assert_eq!(solver.roles().len(), 4);
    assert!(!dir.path().join("mesh_adapted.su2").exists());
    // Logs of the failed call stay for inspection.
    assert!(work(dir.path(), "ite0.SU2.out").exists());
}

#[tokio::test]
async fn test_library_unavailable_is_adaptation_failure() {
    let dir = tempfile::tempdir().unwrap();
    let solver = Arc::new(FakeSolver::default());
    let config = case(dir.path(), &[("PYADAP_PYTHON", "YES")]);

    let err = PipelineCoordinator::new(config, CoordinatorConfig::new(dir.path()))
        .with_solver(solver.clone())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Adaptation(AdaptError::LibraryUnavailable)
    ));
    assert!(solver.roles().is_empty());
}

#[tokio::test]
async fn test_markers_survive_library_adaptation() {
    let dir = tempfile::tempdir().unwrap();
    let solver = Arc::new(FakeSolver::default());
    let library = Arc::new(FakeLibrary::default());
    let config = case(
        dir.path(),
        &[("PYADAP_PYTHON", "YES"), ("WRT_INRIA_MESH", "YES")],
    );

    let summary = PipelineCoordinator::new(config, CoordinatorConfig::new(dir.path()))
        .with_solver(solver.clone())
        .with_library(library.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.backend, BackendKind::Library);
    assert_eq!(*library.complexities.lock().unwrap(), vec![100, 100, 200]);

    let mesh = io::read_mesh(&summary.mesh_out).unwrap();
    assert_eq!(mesh.dimension, 2);
    assert_eq!(mesh.markers, vec!["wall".to_string()]);
    assert_eq!(mesh.boundary.len(), 4);

    for name in ["ite0_itp.meshb", "ite0_itp.solb", "fin.meshb", "fin.solb"] {
        assert!(work(dir.path(), name).exists(), "{} missing", name);
    }
}

#[tokio::test]
async fn test_events_are_streamed_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let solver = Arc::new(FakeSolver::default());
    let config = case(dir.path(), &[]);
    let (tx, mut rx) = mpsc::channel(256);

    let summary = coordinator(dir.path(), config, &solver, BackendKind::Library)
        .with_event_channel(tx)
        .run()
        .await
        .unwrap();

    let mut streamed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        streamed.push(event);
    }
    assert_eq!(streamed.len(), summary.events.len());
    assert_eq!(streamed.first().unwrap().kind, PipelineEventKind::RunStarted);
    assert_eq!(streamed.last().unwrap().kind, PipelineEventKind::RunCompleted);
    assert!(streamed.windows(2).all(|w| w[0].seq < w[1].seq));

    let checkpoints: Vec<u32> = streamed
        .iter()
        .filter(|e| e.kind == PipelineEventKind::Checkpoint)
        .filter_map(|e| e.iteration)
        .collect();
    assert_eq!(checkpoints, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_missing_interpolation_names_engine_output() {
    let dir = tempfile::tempdir().unwrap();
    let solver = Arc::new(FakeSolver::default());
    let tool = Arc::new(FakeTool {
        skip_interpolation: true,
        ..Default::default()
    });
    let config = case(dir.path(), &[]);

    let err = coordinator(dir.path(), config, &solver, BackendKind::External)
        .with_remesh_tool(tool)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Adaptation(AdaptError::MissingOutput { .. })
    ));
    assert_eq!(
        err.missing_artifacts(),
        vec![work(dir.path(), "current.itp.solb").as_path()]
    );
    assert_eq!(solver.roles(), vec![SolverRole::InitialFlow]);
}

#[tokio::test]
async fn test_restart_solution_skips_initial_solve() {
    let dir = tempfile::tempdir().unwrap();
    let solver = Arc::new(FakeSolver::default());
    let config = case(
        dir.path(),
        &[
            ("RESTART_SOL", "YES"),
            ("SOLUTION_FILENAME", "restart_in.csv"),
            ("SOLUTION_ADJ_FILENAME", "adj_in.csv"),
        ],
    );
    let mesh = io::read_mesh(&dir.path().join("mesh.su2")).unwrap();
    let restart = Solution::new(
        vec!["Mach".into(), "Pressure".into()],
        vec![vec![0.8, 1.0]; 4],
    );
    io::write_solution(&dir.path().join("restart_in.csv"), &mesh, &restart).unwrap();

    let settings = CoordinatorConfig {
        staging: StagingPolicy::Reference,
        backend: Some(BackendKind::Library),
        ..CoordinatorConfig::new(dir.path())
    };
    let summary = PipelineCoordinator::new(config, settings)
        .with_solver(solver.clone())
        .with_library(Arc::new(FakeLibrary::default()))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.global_iter, 3);
    assert_eq!(solver.roles(), vec![SolverRole::StepFlow; 3]);
    // Inputs are read in place and left untouched.
    assert!(dir.path().join("restart_in.csv").exists());
    assert!(dir.path().join("mesh.su2").exists());
    assert!(!work(dir.path(), "mesh.su2").exists());
}

/// GOAL case restarting from `restart_in.csv`, with `adj_in.csv` as the
/// adjoint restart name.
fn goal_restart_case(dir: &Path) -> Config {
    let config = case(
        dir,
        &[
            ("PYADAP_SENSOR", "GOAL"),
            ("OBJECTIVE_FUNCTION", "DRAG"),
            ("RESTART_SOL", "YES"),
            ("SOLUTION_FILENAME", "restart_in.csv"),
            ("SOLUTION_ADJ_FILENAME", "adj_in.csv"),
        ],
    );
    let mesh = io::read_mesh(&dir.join("mesh.su2")).unwrap();
    let restart = Solution::new(
        vec!["Density".into(), "Mach".into(), "Pressure".into()],
        vec![vec![1.2, 0.8, 1.0]; 4],
    );
    io::write_solution(&dir.join("restart_in.csv"), &mesh, &restart).unwrap();
    config
}

fn goal_restart_roles() -> Vec<SolverRole> {
    let mut expected = vec![SolverRole::InitialAdjoint];
    for _ in 0..3 {
        expected.extend([SolverRole::StepFlow, SolverRole::StepAdjoint]);
    }
    expected
}

#[tokio::test]
async fn test_goal_restart_continues_supplied_adjoint() {
    let dir = tempfile::tempdir().unwrap();
    let solver = Arc::new(FakeSolver::default());
    let config = goal_restart_case(dir.path());
    let mesh = io::read_mesh(&dir.path().join("mesh.su2")).unwrap();
    let adjoint = Solution::new(
        vec![
            "Adjoint_Density".into(),
            "Metric_xx".into(),
            "Metric_xy".into(),
            "Metric_yy".into(),
        ],
        vec![vec![0.3, 2.0, 0.0, 2.0]; 4],
    );
    io::write_solution(&dir.path().join("adj_in_cd.csv"), &mesh, &adjoint).unwrap();

    let summary = coordinator(dir.path(), config, &solver, BackendKind::Library)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.global_iter, 3);
    assert_eq!(solver.roles(), goal_restart_roles());

    let written =
        Config::parse(&std::fs::read_to_string(work(dir.path(), "ini_adj.cfg")).unwrap()).unwrap();
    assert_eq!(written.get("RESTART_SOL"), Some("YES"));
    assert_eq!(written.get("ITER"), Some("1"));
    assert_eq!(written.get("COMPUTE_METRIC"), Some("YES"));
    assert_eq!(written.get("ADAP_COMPLEXITY"), Some("100"));
    let supplied = dir.path().join("adj_in.csv").display().to_string();
    assert_eq!(written.get("SOLUTION_ADJ_FILENAME"), Some(supplied.as_str()));

    assert!(work(dir.path(), "ite0_adj_ini_cd.csv").exists());
}

#[tokio::test]
async fn test_goal_restart_without_adjoint_solves_it_from_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let solver = Arc::new(FakeSolver::default());
    let config = goal_restart_case(dir.path());
    assert!(!dir.path().join("adj_in_cd.csv").exists());

    let summary = coordinator(dir.path(), config, &solver, BackendKind::Library)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.global_iter, 3);
    assert_eq!(solver.roles(), goal_restart_roles());

    let written =
        Config::parse(&std::fs::read_to_string(work(dir.path(), "ini_adj.cfg")).unwrap()).unwrap();
    assert_eq!(written.get("RESTART_SOL"), Some("NO"));
    assert_eq!(written.get("ITER"), Some("5"));
    assert_eq!(written.get("COMPUTE_METRIC"), Some("YES"));
    // Left as configured; the solver does not read it without a restart.
    assert_eq!(written.get("SOLUTION_ADJ_FILENAME"), Some("adj_in.csv"));

    assert!(work(dir.path(), "ite0_adj_ini_cd.csv").exists());
}
