//! # Adaptation Sensors
//!
//! The field that drives remeshing. Feature sensors pick primitive flow
//! variables out of the current solution; the goal-oriented sensor reads the
//! adjoint solution of the iteration, attaches it to the state and uses the
//! metric the solver computed alongside it.

use std::path::Path;

use crate::config::SensorKind;
use crate::error::{ConfigError, PipelineError};
use crate::io::{csv, SolType};
use crate::mesh::{MeshSolutionState, Solution};

/// Sensor field with its GMF layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub kind: SensorKind,
    pub layout: Vec<SolType>,
    pub field: Solution,
}

/// Metric components in GMF symmetric-matrix order.
fn metric_tags(dimension: u8) -> Result<Vec<String>, ConfigError> {
    let components: &[&str] = match dimension {
        2 => &["xx", "xy", "yy"],
        3 => &["xx", "xy", "yy", "xz", "yz", "zz"],
        other => return Err(ConfigError::UnsupportedDimension(other)),
    };
    Ok(components.iter().map(|c| format!("Metric_{}", c)).collect())
}

pub struct SensorComputer;

impl SensorComputer {
    /// Attach the sensor of `kind` to `state`.
    ///
    /// `adjoint` is the adjoint artifact of the current iteration; GOAL
    /// fails with [`ConfigError::MissingAdjoint`] when it is absent.
    pub fn compute(
        state: &mut MeshSolutionState,
        kind: SensorKind,
        adjoint: Option<&Path>,
        iteration: u32,
    ) -> Result<(), PipelineError> {
        let sensor = match kind {
            SensorKind::Mach => Self::feature(state, kind, &["Mach"])?,
            SensorKind::Pres => Self::feature(state, kind, &["Pressure"])?,
            SensorKind::MachPres => Self::feature(state, kind, &["Mach", "Pressure"])?,
            SensorKind::Goal => Self::goal(state, adjoint, iteration)?,
        };
        tracing::debug!(sensor = %kind, fields = ?sensor.field.tags, "Sensor computed");
        state.sensor = Some(sensor);
        Ok(())
    }

    fn feature(
        state: &MeshSolutionState,
        kind: SensorKind,
        fields: &[&str],
    ) -> Result<Sensor, ConfigError> {
        let indices = fields
            .iter()
            .map(|f| {
                state
                    .solution
                    .field_index(f)
                    .ok_or_else(|| ConfigError::MissingSensorField(f.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Sensor {
            kind,
            layout: vec![SolType::Scalar; indices.len()],
            field: Solution::new(
                fields.iter().map(|f| f.to_string()).collect(),
                state.solution.columns(&indices),
            ),
        })
    }

    fn goal(
        state: &mut MeshSolutionState,
        adjoint: Option<&Path>,
        iteration: u32,
    ) -> Result<Sensor, PipelineError> {
        let path = match adjoint {
            Some(path) if path.exists() => path,
            other => {
                return Err(ConfigError::MissingAdjoint {
                    iteration,
                    expected: other
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "an adjoint solution".to_string()),
                }
                .into())
            }
        };

        let adjoint = csv::read(path)?;
        if adjoint.len() != state.mesh.num_vertices() {
            return Err(ConfigError::AdjointMismatch {
                path: path.to_path_buf(),
                expected: state.mesh.num_vertices(),
                found: adjoint.len(),
            }
            .into());
        }

        let tags = metric_tags(state.dimension())?;
        let metric = adjoint
            .select(&tags)
            .ok_or_else(|| ConfigError::MissingMetric(path.to_path_buf()))?;
        state.adjoint = Some(adjoint);

        Ok(Sensor {
            kind: SensorKind::Goal,
            layout: vec![SolType::SymMatrix],
            field: metric,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;

    fn state() -> MeshSolutionState {
        let mesh = Mesh {
            dimension: 2,
            vertices: vec![[0.0; 3], [1.0, 0.0, 0.0]],
            ..Mesh::default()
        };
        let solution = Solution::new(
            vec!["Density".into(), "Pressure".into(), "Mach".into()],
            vec![vec![1.0, 101325.0, 0.3], vec![1.1, 101000.0, 0.8]],
        );
        MeshSolutionState::new(mesh, solution)
    }

    #[test]
    fn test_mach_pres_is_two_scalars() {
        let mut state = state();
        SensorComputer::compute(&mut state, SensorKind::MachPres, None, 0).unwrap();

        let sensor = state.sensor.unwrap();
        assert_eq!(sensor.layout, vec![SolType::Scalar, SolType::Scalar]);
        assert_eq!(sensor.field.rows[1], vec![0.8, 101000.0]);
    }

    #[test]
    fn test_missing_primitive_field() {
        let mut state = state();
        state.solution.tags[2] = "Temperature".into();

        let err = SensorComputer::compute(&mut state, SensorKind::Mach, None, 0).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::MissingSensorField(f)) if f == "Mach"
        ));
    }

    #[test]
    fn test_goal_without_adjoint_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("ite1_adj_cd.csv");
        let mut state = state();

        let err =
            SensorComputer::compute(&mut state, SensorKind::Goal, Some(&absent), 1).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::MissingAdjoint { iteration: 1, .. })
        ));
        assert!(state.sensor.is_none());
    }

    #[test]
    fn test_goal_attaches_adjoint_and_metric() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ite0_adj_cd.csv");
        std::fs::write(
            &path,
            "\"PointID\",\"x\",\"y\",\"Adjoint_Density\",\"Metric_xx\",\"Metric_xy\",\"Metric_yy\"\n\
             0,0,0,0.1,1.0,0.0,2.0\n\
             1,1,0,0.2,3.0,0.5,4.0\n",
        )
        .unwrap();
        let mut state = state();

        SensorComputer::compute(&mut state, SensorKind::Goal, Some(&path), 0).unwrap();

        let sensor = state.sensor.as_ref().unwrap();
        assert_eq!(sensor.layout, vec![SolType::SymMatrix]);
        assert_eq!(sensor.field.rows[1], vec![3.0, 0.5, 4.0]);
        assert_eq!(state.adjoint.as_ref().unwrap().width(), 4);
    }
}
