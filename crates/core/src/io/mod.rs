//! # Mesh and Solution Files
//!
//! Format dispatch by file extension:
//!
//! | extension | content  | format               |
//! |-----------|----------|----------------------|
//! | `.su2`    | mesh     | SU2 native ASCII     |
//! | `.csv`    | solution | SU2 ASCII restart    |
//! | `.meshb`  | mesh     | GMF binary           |
//! | `.solb`   | solution | GMF binary           |
//!
//! All codecs are synchronous; async callers wrap them in
//! `tokio::task::spawn_blocking` when the files are large.

pub mod csv;
pub mod gmf;
pub mod su2;

use std::fs;
use std::path::Path;

pub use gmf::{SolType, SolutionBlock};

use crate::error::CodecError;
use crate::mesh::{Mesh, MeshSolutionState, Solution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Su2,
    Csv,
    Meshb,
    Solb,
}

impl Format {
    pub fn of(path: &Path) -> Result<Self, CodecError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("su2") => Ok(Format::Su2),
            Some("csv") | Some("dat") => Ok(Format::Csv),
            Some("meshb") | Some("mesh") => Ok(Format::Meshb),
            Some("solb") | Some("sol") => Ok(Format::Solb),
            _ => Err(CodecError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

pub fn read_mesh(path: &Path) -> Result<Mesh, CodecError> {
    match Format::of(path)? {
        Format::Su2 => su2::read(path),
        Format::Meshb => gmf::read_mesh(path),
        _ => Err(CodecError::UnsupportedFormat(path.to_path_buf())),
    }
}

pub fn write_mesh(path: &Path, mesh: &Mesh) -> Result<(), CodecError> {
    match Format::of(path)? {
        Format::Su2 => su2::write(path, mesh),
        Format::Meshb => gmf::write_mesh(path, mesh),
        _ => Err(CodecError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Read a solution defined on `mesh`; the point count must match.
///
/// GMF solutions carry no names, so their fields are tagged `Field_<k>`.
pub fn read_solution(path: &Path, mesh: &Mesh) -> Result<Solution, CodecError> {
    let solution = match Format::of(path)? {
        Format::Csv => csv::read(path)?,
        Format::Solb => {
            let block = gmf::read_solution(path)?;
            let width = block.rows.first().map_or(0, Vec::len);
            let tags = (0..width).map(|k| format!("Field_{}", k)).collect();
            Solution::new(tags, block.rows)
        }
        _ => return Err(CodecError::UnsupportedFormat(path.to_path_buf())),
    };

    if solution.len() != mesh.num_vertices() {
        return Err(CodecError::invalid(
            path,
            format!(
                "solution has {} points, mesh has {}",
                solution.len(),
                mesh.num_vertices()
            ),
        ));
    }
    Ok(solution)
}

/// Write a solution; GMF output stores every field as a scalar.
pub fn write_solution(path: &Path, mesh: &Mesh, solution: &Solution) -> Result<(), CodecError> {
    match Format::of(path)? {
        Format::Csv => csv::write(path, mesh, solution),
        Format::Solb => {
            let layout = vec![SolType::Scalar; solution.width()];
            write_field(path, mesh, solution, &layout)
        }
        _ => Err(CodecError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Write a GMF solution with an explicit field layout.
pub fn write_field(
    path: &Path,
    mesh: &Mesh,
    solution: &Solution,
    layout: &[SolType],
) -> Result<(), CodecError> {
    if solution.len() != mesh.num_vertices() {
        return Err(CodecError::invalid(
            path,
            format!(
                "field has {} points, mesh has {}",
                solution.len(),
                mesh.num_vertices()
            ),
        ));
    }
    gmf::write_solution(path, mesh.dimension, layout, &solution.rows)
}

/// Mesh dimension without loading the whole mesh.
pub fn read_dimension(path: &Path) -> Result<u8, CodecError> {
    match Format::of(path)? {
        Format::Su2 => {
            let text = fs::read_to_string(path).map_err(|e| CodecError::io(path, e))?;
            text.lines()
                .filter_map(|line| line.split_once('='))
                .find(|(key, _)| key.trim().eq_ignore_ascii_case("NDIME"))
                .and_then(|(_, value)| value.trim().parse().ok())
                .ok_or_else(|| CodecError::invalid(path, "missing NDIME"))
        }
        Format::Meshb => gmf::read_dimension(path),
        _ => Err(CodecError::UnsupportedFormat(path.to_path_buf())),
    }
}

pub fn read_state(mesh_path: &Path, solution_path: &Path) -> Result<MeshSolutionState, CodecError> {
    let mesh = read_mesh(mesh_path)?;
    let solution = read_solution(solution_path, &mesh)?;
    Ok(MeshSolutionState::new(mesh, solution))
}

pub fn write_state(
    mesh_path: &Path,
    solution_path: &Path,
    state: &MeshSolutionState,
) -> Result<(), CodecError> {
    write_mesh(mesh_path, &state.mesh)?;
    write_solution(solution_path, &state.mesh, &state.solution)
}
