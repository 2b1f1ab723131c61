//! # Mesh and Solution State
//!
//! In-memory representation of the mesh/solution pair threaded from one
//! pipeline stage to the next. Boundary markers and the dimension are
//! pass-through data: the pipeline never interprets them, it only carries
//! them across every transformation.

pub mod extrude;

pub use extrude::extrude_surface;

use serde::{Deserialize, Serialize};

use crate::sensor::Sensor;

/// Element topology. Numbering follows the VTK ids used by SU2 meshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Line,
    Triangle,
    Quadrilateral,
    Tetrahedron,
    Hexahedron,
    Prism,
    Pyramid,
}

impl ElementKind {
    pub fn vtk_id(self) -> u32 {
        match self {
            ElementKind::Line => 3,
            ElementKind::Triangle => 5,
            ElementKind::Quadrilateral => 9,
            ElementKind::Tetrahedron => 10,
            ElementKind::Hexahedron => 12,
            ElementKind::Prism => 13,
            ElementKind::Pyramid => 14,
        }
    }

    pub fn from_vtk_id(id: u32) -> Option<Self> {
        Some(match id {
            3 => ElementKind::Line,
            5 => ElementKind::Triangle,
            9 => ElementKind::Quadrilateral,
            10 => ElementKind::Tetrahedron,
            12 => ElementKind::Hexahedron,
            13 => ElementKind::Prism,
            14 => ElementKind::Pyramid,
            _ => return None,
        })
    }

    pub fn node_count(self) -> usize {
        match self {
            ElementKind::Line => 2,
            ElementKind::Triangle => 3,
            ElementKind::Quadrilateral => 4,
            ElementKind::Tetrahedron => 4,
            ElementKind::Hexahedron => 8,
            ElementKind::Prism => 6,
            ElementKind::Pyramid => 5,
        }
    }

    /// Topological dimension of the element.
    pub fn dimension(self) -> u8 {
        match self {
            ElementKind::Line => 1,
            ElementKind::Triangle | ElementKind::Quadrilateral => 2,
            _ => 3,
        }
    }
}

/// One element; `nodes` are zero-based vertex indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub kind: ElementKind,
    pub nodes: Vec<usize>,
    /// Boundary elements: 1-based index into [`Mesh::markers`]
    pub reference: u32,
}

impl Element {
    pub fn new(kind: ElementKind, nodes: Vec<usize>, reference: u32) -> Self {
        Self {
            kind,
            nodes,
            reference,
        }
    }
}

/// Mesh connectivity and geometry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    /// 2 or 3
    pub dimension: u8,
    /// `z` is zero for 2-D meshes
    pub vertices: Vec<[f64; 3]>,
    /// Volume elements
    pub elements: Vec<Element>,
    /// Boundary elements, tagged by marker reference
    pub boundary: Vec<Element>,
    /// Boundary marker names; reference `r` names `markers[r - 1]`
    pub markers: Vec<String>,
}

impl Mesh {
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Human-readable size, e.g. `1024 vertices, 1980 elements`.
    pub fn summary(&self) -> String {
        format!(
            "{} vertices, {} elements",
            self.vertices.len(),
            self.elements.len()
        )
    }
}

/// Point-wise fields, one row per mesh vertex.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Solution {
    pub tags: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl Solution {
    pub fn new(tags: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        Self { tags, rows }
    }

    /// Number of fields per point.
    pub fn width(&self) -> usize {
        self.tags.len()
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column index of a field; exact match first, then case-insensitive.
    pub fn field_index(&self, tag: &str) -> Option<usize> {
        self.tags
            .iter()
            .position(|t| t == tag)
            .or_else(|| self.tags.iter().position(|t| t.eq_ignore_ascii_case(tag)))
    }

    /// Rows restricted to the given columns.
    pub fn columns(&self, indices: &[usize]) -> Vec<Vec<f64>> {
        self.rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i]).collect())
            .collect()
    }

    /// Columns of `other` appended after these, by point index.
    ///
    /// Every column is kept, even under a tag that already exists here, so
    /// [`Solution::split_at`] recovers both halves. Returns `None` when the
    /// point counts differ.
    pub fn concat(&self, other: &Solution) -> Option<Solution> {
        if self.len() != other.len() {
            return None;
        }

        let mut tags = self.tags.clone();
        tags.extend(other.tags.iter().cloned());
        let rows = self
            .rows
            .iter()
            .zip(&other.rows)
            .map(|(mine, theirs)| {
                let mut row = mine.clone();
                row.extend_from_slice(theirs);
                row
            })
            .collect();

        Some(Solution { tags, rows })
    }

    /// The first `width` columns and the rest.
    pub fn split_at(&self, width: usize) -> (Solution, Solution) {
        let width = width.min(self.width());
        let (head_tags, tail_tags) = self.tags.split_at(width);
        let (head, tail): (Vec<Vec<f64>>, Vec<Vec<f64>>) = self
            .rows
            .iter()
            .map(|row| {
                let (h, t) = row.split_at(width.min(row.len()));
                (h.to_vec(), t.to_vec())
            })
            .unzip();
        (
            Solution::new(head_tags.to_vec(), head),
            Solution::new(tail_tags.to_vec(), tail),
        )
    }

    /// The named fields, in the given order. `None` if any tag is absent.
    pub fn select(&self, tags: &[String]) -> Option<Solution> {
        let indices = tags
            .iter()
            .map(|t| self.field_index(t))
            .collect::<Option<Vec<_>>>()?;
        Some(Solution {
            tags: tags.to_vec(),
            rows: self.columns(&indices),
        })
    }
}

/// The single live state of a run: mesh, primal solution, and the optional
/// adjoint solution and sensor attached for the current iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshSolutionState {
    pub mesh: Mesh,
    pub solution: Solution,
    pub adjoint: Option<Solution>,
    pub sensor: Option<Sensor>,
}

impl MeshSolutionState {
    pub fn new(mesh: Mesh, solution: Solution) -> Self {
        Self {
            mesh,
            solution,
            adjoint: None,
            sensor: None,
        }
    }

    pub fn dimension(&self) -> u8 {
        self.mesh.dimension
    }
}
