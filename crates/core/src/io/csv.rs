//! SU2 ASCII restart files (`.csv`).
//!
//! The header names every column; the first column is `PointID`, followed
//! by the coordinates and then the solution fields:
//!
//! ```text
//! "PointID","x","y","Density","Mach"
//! 0,0.0,0.0,1.2,0.5
//! ```

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::CodecError;
use crate::mesh::{Mesh, Solution};

const COORDINATES: [&str; 3] = ["x", "y", "z"];

pub fn read(path: &Path) -> Result<Solution, CodecError> {
    let text = fs::read_to_string(path).map_err(|e| CodecError::io(path, e))?;
    parse(&text).map_err(|(line, message)| CodecError::Parse {
        path: path.to_path_buf(),
        line,
        message,
    })
}

pub fn write(path: &Path, mesh: &Mesh, solution: &Solution) -> Result<(), CodecError> {
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

    let file = fs::File::create(path).map_err(|e| CodecError::io(path, e))?;
    let mut out = BufWriter::new(file);
    render(&mut out, mesh, solution)
        .and_then(|_| out.flush())
        .map_err(|e| CodecError::io(path, e))
}

/// Parse restart text into fields ordered by `PointID`.
///
/// Coordinate columns are dropped: geometry always comes from the mesh.
pub fn parse(text: &str) -> Result<Solution, (usize, String)> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| (1, "empty solution file".to_string()))?;
    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().trim_matches('"').trim().to_string())
        .collect();

    let point_col = columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case("PointID"));
    let field_cols: Vec<usize> = (0..columns.len())
        .filter(|&i| Some(i) != point_col && !COORDINATES.contains(&columns[i].as_str()))
        .collect();
    let tags = field_cols.iter().map(|&i| columns[i].clone()).collect();

    let mut rows: Vec<(usize, Vec<f64>)> = Vec::new();
    for (index, (lineno, line)) in lines.enumerate() {
        let values = line
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| (lineno, format!("bad value: {}", e)))?;
        if values.len() != columns.len() {
            return Err((
                lineno,
                format!("expected {} values, found {}", columns.len(), values.len()),
            ));
        }
        let id = match point_col {
            Some(c) if values[c] >= 0.0 => values[c] as usize,
            Some(_) => return Err((lineno, "negative PointID".to_string())),
            None => index,
        };
        rows.push((id, field_cols.iter().map(|&c| values[c]).collect()));
    }

    rows.sort_by_key(|(id, _)| *id);
    if rows.iter().enumerate().any(|(i, (id, _))| i != *id) {
        return Err((0, "PointID values are not a contiguous range from 0".to_string()));
    }

    Ok(Solution::new(
        tags,
        rows.into_iter().map(|(_, row)| row).collect(),
    ))
}

fn render<W: Write>(out: &mut W, mesh: &Mesh, solution: &Solution) -> std::io::Result<()> {
    let dim = mesh.dimension.clamp(2, 3) as usize;

    write!(out, "\"PointID\"")?;
    for axis in &COORDINATES[..dim] {
        write!(out, ",\"{}\"", axis)?;
    }
    for tag in &solution.tags {
        write!(out, ",\"{}\"", tag)?;
    }
    writeln!(out)?;

    for (i, (vertex, row)) in mesh.vertices.iter().zip(&solution.rows).enumerate() {
        write!(out, "{}", i)?;
        for c in &vertex[..dim] {
            write!(out, ",{:.16e}", c)?;
        }
        for value in row {
            write!(out, ",{:.16e}", value)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_orders_rows_by_point_id() {
        let text = "\"PointID\",\"x\",\"y\",\"Density\",\"Mach\"\n\
                    1, 1.0, 0.0, 1.1, 0.6\n\
                    0, 0.0, 0.0, 1.0, 0.5\n";
        let solution = parse(text).unwrap();

        assert_eq!(solution.tags, vec!["Density", "Mach"]);
        assert_eq!(solution.rows, vec![vec![1.0, 0.5], vec![1.1, 0.6]]);
    }

    #[test]
    fn test_parse_rejects_ragged_rows() {
        let text = "\"PointID\",\"x\",\"y\",\"Mach\"\n0,0.0,0.0\n";
        let (line, message) = parse(text).unwrap_err();
        assert_eq!(line, 2);
        assert!(message.contains("expected 4 values"));
    }

    #[test]
    fn test_write_includes_coordinates() {
        let mesh = Mesh {
            dimension: 2,
            vertices: vec![[0.0, 0.0, 0.0], [1.0, 2.0, 0.0]],
            ..Mesh::default()
        };
        let solution = Solution::new(vec!["Mach".into()], vec![vec![0.5], vec![0.7]]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.csv");

        write(&path, &mesh, &solution).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("\"PointID\",\"x\",\"y\",\"Mach\"\n"));
        assert_eq!(read(&path).unwrap(), solution);
    }

    #[test]
    fn test_write_rejects_point_mismatch() {
        let mesh = Mesh {
            dimension: 2,
            vertices: vec![[0.0; 3]],
            ..Mesh::default()
        };
        let solution = Solution::new(vec!["Mach".into()], vec![vec![0.5], vec![0.7]]);
        let dir = tempfile::tempdir().unwrap();

        let err = write(&dir.path().join("flow.csv"), &mesh, &solution).unwrap_err();
        assert!(matches!(err, CodecError::Invalid { .. }));
    }
}
