//! SU2 native ASCII mesh format (`.su2`).
//!
//! ```text
//! NDIME= 2
//! NELEM= 2
//! 5 0 1 2 0
//! NPOIN= 4
//! 0.0 0.0 0
//! NMARK= 1
//! MARKER_TAG= wall
//! MARKER_ELEMS= 1
//! 3 0 1
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::CodecError;
use crate::mesh::{Element, ElementKind, Mesh};

type ParseResult<T> = Result<T, (usize, String)>;

pub fn read(path: &Path) -> Result<Mesh, CodecError> {
    let text = fs::read_to_string(path).map_err(|e| CodecError::io(path, e))?;
    parse(&text).map_err(|(line, message)| CodecError::Parse {
        path: path.to_path_buf(),
        line,
        message,
    })
}

pub fn write(path: &Path, mesh: &Mesh) -> Result<(), CodecError> {
    let file = fs::File::create(path).map_err(|e| CodecError::io(path, e))?;
    let mut out = BufWriter::new(file);
    render(&mut out, mesh)
        .and_then(|_| out.flush())
        .map_err(|e| CodecError::io(path, e))
}

struct Lines<'a> {
    inner: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> Lines<'a> {
    /// Next non-empty line with `%` comments stripped, and its 1-based number.
    fn next_data(&mut self) -> Option<(usize, &'a str)> {
        for (index, raw) in self.inner.by_ref() {
            let line = raw.split('%').next().unwrap_or("").trim();
            if !line.is_empty() {
                return Some((index + 1, line));
            }
        }
        None
    }

    fn expect(&mut self, what: &str) -> ParseResult<(usize, &'a str)> {
        self.next_data()
            .ok_or_else(|| (0, format!("unexpected end of file, expected {}", what)))
    }
}

fn keyword(line: &str) -> Option<(String, &str)> {
    let (key, value) = line.split_once('=')?;
    Some((key.trim().to_ascii_uppercase(), value.trim()))
}

fn parse_count(lineno: usize, value: &str) -> ParseResult<usize> {
    value
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| (lineno, format!("expected a count, found '{}'", value)))
}

fn parse_element(lineno: usize, line: &str) -> ParseResult<(ElementKind, Vec<usize>)> {
    let mut tokens = line.split_whitespace();
    let id: u32 = tokens
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| (lineno, format!("bad element line '{}'", line)))?;
    let kind = ElementKind::from_vtk_id(id)
        .ok_or_else(|| (lineno, format!("unknown element type {}", id)))?;

    let nodes = tokens
        .take(kind.node_count())
        .map(str::parse::<usize>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| (lineno, format!("bad node index: {}", e)))?;
    if nodes.len() != kind.node_count() {
        return Err((
            lineno,
            format!("{:?} needs {} nodes", kind, kind.node_count()),
        ));
    }
    Ok((kind, nodes))
}

fn expect_keyword<'a>(lines: &mut Lines<'a>, name: &str) -> ParseResult<(usize, &'a str)> {
    let (lineno, line) = lines.expect(name)?;
    match line.split_once('=') {
        Some((key, value)) if key.trim().eq_ignore_ascii_case(name) => Ok((lineno, value.trim())),
        _ => Err((lineno, format!("expected {}=, found '{}'", name, line))),
    }
}

pub fn parse(text: &str) -> ParseResult<Mesh> {
    let mut lines = Lines {
        inner: text.lines().enumerate(),
    };
    let mut mesh = Mesh::default();

    while let Some((lineno, line)) = lines.next_data() {
        let Some((key, value)) = keyword(line) else {
            return Err((lineno, format!("unexpected line '{}'", line)));
        };

        match key.as_str() {
            "NDIME" => {
                mesh.dimension = parse_count(lineno, value)? as u8;
            }
            "NELEM" => {
                for _ in 0..parse_count(lineno, value)? {
                    let (ln, l) = lines.expect("element")?;
                    let (kind, nodes) = parse_element(ln, l)?;
                    mesh.elements.push(Element::new(kind, nodes, 0));
                }
            }
            "NPOIN" => {
                let dim = match mesh.dimension {
                    2 | 3 => mesh.dimension as usize,
                    _ => return Err((lineno, "NPOIN before a valid NDIME".to_string())),
                };
                for _ in 0..parse_count(lineno, value)? {
                    let (ln, l) = lines.expect("point")?;
                    let coords = l
                        .split_whitespace()
                        .take(dim)
                        .map(str::parse::<f64>)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|e| (ln, format!("bad coordinate: {}", e)))?;
                    if coords.len() != dim {
                        return Err((ln, format!("expected {} coordinates", dim)));
                    }
                    let mut vertex = [0.0; 3];
                    vertex[..dim].copy_from_slice(&coords);
                    mesh.vertices.push(vertex);
                }
            }
            "NMARK" => {
                for _ in 0..parse_count(lineno, value)? {
                    let (_, tag) = expect_keyword(&mut lines, "MARKER_TAG")?;
                    let (ln, count) = expect_keyword(&mut lines, "MARKER_ELEMS")?;
                    mesh.markers.push(tag.to_string());
                    let reference = mesh.markers.len() as u32;
                    for _ in 0..parse_count(ln, count)? {
                        let (eln, l) = lines.expect("marker element")?;
                        let (kind, nodes) = parse_element(eln, l)?;
                        mesh.boundary.push(Element::new(kind, nodes, reference));
                    }
                }
            }
            // NZONE, IZONE and other headers carry nothing the pipeline needs.
            _ => {}
        }
    }

    if mesh.dimension == 0 {
        return Err((0, "missing NDIME".to_string()));
    }
    let n = mesh.vertices.len();
    if let Some(bad) = mesh
        .elements
        .iter()
        .chain(&mesh.boundary)
        .flat_map(|e| e.nodes.iter())
        .find(|&&node| node >= n)
    {
        return Err((0, format!("node index {} out of range ({} points)", bad, n)));
    }
    Ok(mesh)
}

fn render<W: Write>(out: &mut W, mesh: &Mesh) -> std::io::Result<()> {
    let dim = mesh.dimension.clamp(2, 3) as usize;

    writeln!(out, "NDIME= {}", mesh.dimension)?;
    writeln!(out, "NELEM= {}", mesh.elements.len())?;
    for (i, element) in mesh.elements.iter().enumerate() {
        write_element(out, element)?;
        writeln!(out, " {}", i)?;
    }

    writeln!(out, "NPOIN= {}", mesh.vertices.len())?;
    for (i, vertex) in mesh.vertices.iter().enumerate() {
        for c in &vertex[..dim] {
            write!(out, "{:.16e} ", c)?;
        }
        writeln!(out, "{}", i)?;
    }

    // References without a marker name are written as REF_<n>.
    let named = mesh.markers.len() as u32;
    let unnamed: BTreeSet<u32> = mesh
        .boundary
        .iter()
        .map(|e| e.reference)
        .filter(|&r| r == 0 || r > named)
        .collect();

    writeln!(out, "NMARK= {}", mesh.markers.len() + unnamed.len())?;
    let groups = mesh
        .markers
        .iter()
        .enumerate()
        .map(|(i, tag)| (tag.clone(), i as u32 + 1))
        .chain(unnamed.iter().map(|&r| (format!("REF_{}", r), r)));

    for (tag, reference) in groups {
        let elements: Vec<&Element> = mesh
            .boundary
            .iter()
            .filter(|e| e.reference == reference)
            .collect();
        writeln!(out, "MARKER_TAG= {}", tag)?;
        writeln!(out, "MARKER_ELEMS= {}", elements.len())?;
        for element in elements {
            write_element(out, element)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn write_element<W: Write>(out: &mut W, element: &Element) -> std::io::Result<()> {
    write!(out, "{}", element.kind.vtk_id())?;
    for node in &element.nodes {
        write!(out, " {}", node)?;
    }
    Ok(())
}
