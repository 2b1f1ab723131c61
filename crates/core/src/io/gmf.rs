//! # GMF Binary Files
//!
//! Native mesh (`.meshb`) and solution (`.solb`) files of the adaptation
//! engine. A file is a header (`1`, version) followed by keyword blocks;
//! each block starts with its keyword code and the byte position of the
//! next block.
//!
//! Versions 1 to 3 are read in either byte order. Files are written as
//! version 2: 64-bit reals, 32-bit integers and positions, little-endian.
//! Node indices on disk are 1-based.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::mesh::{Element, ElementKind, Mesh};

const CODE: i32 = 1;
const WRITE_VERSION: i32 = 2;

mod kwd {
    pub const DIMENSION: i32 = 3;
    pub const VERTICES: i32 = 4;
    pub const EDGES: i32 = 5;
    pub const TRIANGLES: i32 = 6;
    pub const QUADRILATERALS: i32 = 7;
    pub const TETRAHEDRA: i32 = 8;
    pub const PRISMS: i32 = 9;
    pub const HEXAHEDRA: i32 = 10;
    pub const PYRAMIDS: i32 = 49;
    pub const END: i32 = 54;
    pub const SOL_AT_VERTICES: i32 = 62;
}

/// Field type of one entry in a `SolAtVertices` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolType {
    Scalar,
    Vector,
    /// Symmetric tensor, lower triangle: `xx, xy, yy[, xz, yz, zz]`
    SymMatrix,
}

impl SolType {
    pub fn code(self) -> i32 {
        match self {
            SolType::Scalar => 1,
            SolType::Vector => 2,
            SolType::SymMatrix => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(SolType::Scalar),
            2 => Some(SolType::Vector),
            3 => Some(SolType::SymMatrix),
            _ => None,
        }
    }

    /// Reals per vertex for this type.
    pub fn width(self, dimension: u8) -> usize {
        let d = dimension as usize;
        match self {
            SolType::Scalar => 1,
            SolType::Vector => d,
            SolType::SymMatrix => d * (d + 1) / 2,
        }
    }
}

/// Raw `SolAtVertices` content. GMF files carry no field names.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionBlock {
    pub dimension: u8,
    pub types: Vec<SolType>,
    pub rows: Vec<Vec<f64>>,
}

fn element_keyword(kind: ElementKind) -> i32 {
    match kind {
        ElementKind::Line => kwd::EDGES,
        ElementKind::Triangle => kwd::TRIANGLES,
        ElementKind::Quadrilateral => kwd::QUADRILATERALS,
        ElementKind::Tetrahedron => kwd::TETRAHEDRA,
        ElementKind::Prism => kwd::PRISMS,
        ElementKind::Hexahedron => kwd::HEXAHEDRA,
        ElementKind::Pyramid => kwd::PYRAMIDS,
    }
}

fn keyword_element(keyword: i32) -> Option<ElementKind> {
    Some(match keyword {
        kwd::EDGES => ElementKind::Line,
        kwd::TRIANGLES => ElementKind::Triangle,
        kwd::QUADRILATERALS => ElementKind::Quadrilateral,
        kwd::TETRAHEDRA => ElementKind::Tetrahedron,
        kwd::PRISMS => ElementKind::Prism,
        kwd::HEXAHEDRA => ElementKind::Hexahedron,
        kwd::PYRAMIDS => ElementKind::Pyramid,
        _ => return None,
    })
}

const WRITE_ORDER: [ElementKind; 7] = [
    ElementKind::Line,
    ElementKind::Triangle,
    ElementKind::Quadrilateral,
    ElementKind::Tetrahedron,
    ElementKind::Prism,
    ElementKind::Hexahedron,
    ElementKind::Pyramid,
];

struct Writer<'a> {
    path: &'a Path,
    buf: Vec<u8>,
}

impl<'a> Writer<'a> {
    fn new(path: &'a Path) -> Self {
        let mut writer = Self {
            path,
            buf: Vec::new(),
        };
        writer.int(CODE);
        writer.int(WRITE_VERSION);
        writer
    }

    fn int(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn index(&mut self, value: usize) -> Result<(), CodecError> {
        let value = i32::try_from(value)
            .map_err(|_| CodecError::invalid(self.path, "index exceeds 32-bit range"))?;
        self.int(value);
        Ok(())
    }

    fn real(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Start a block; returns where its next-block position must be patched.
    fn begin(&mut self, keyword: i32) -> usize {
        self.int(keyword);
        let at = self.buf.len();
        self.int(0);
        at
    }

    fn end(&mut self, at: usize) -> Result<(), CodecError> {
        let next = i32::try_from(self.buf.len())
            .map_err(|_| CodecError::invalid(self.path, "file exceeds 2 GiB"))?;
        self.buf[at..at + 4].copy_from_slice(&next.to_le_bytes());
        Ok(())
    }

    fn dimension(&mut self, dimension: u8) -> Result<(), CodecError> {
        let at = self.begin(kwd::DIMENSION);
        self.int(dimension as i32);
        self.end(at)
    }

    fn finish(mut self) -> Result<(), CodecError> {
        self.int(kwd::END);
        self.int(0);
        fs::write(self.path, &self.buf).map_err(|e| CodecError::io(self.path, e))
    }
}

pub fn write_mesh(path: &Path, mesh: &Mesh) -> Result<(), CodecError> {
    let dim = match mesh.dimension {
        2 | 3 => mesh.dimension,
        other => return Err(CodecError::invalid(path, format!("cannot write a {}-D mesh", other))),
    };
    let mut w = Writer::new(path);
    w.dimension(dim)?;

    let at = w.begin(kwd::VERTICES);
    w.index(mesh.vertices.len())?;
    for vertex in &mesh.vertices {
        for c in &vertex[..dim as usize] {
            w.real(*c);
        }
        w.int(0);
    }
    w.end(at)?;

    for kind in WRITE_ORDER {
        let elements: Vec<&Element> = mesh
            .elements
            .iter()
            .chain(&mesh.boundary)
            .filter(|e| e.kind == kind)
            .collect();
        if elements.is_empty() {
            continue;
        }

        let at = w.begin(element_keyword(kind));
        w.index(elements.len())?;
        for element in elements {
            for &node in &element.nodes {
                w.index(node + 1)?;
            }
            w.index(element.reference as usize)?;
        }
        w.end(at)?;
    }

    w.finish()
}

pub fn write_solution(
    path: &Path,
    dimension: u8,
    types: &[SolType],
    rows: &[Vec<f64>],
) -> Result<(), CodecError> {
    let width: usize = types.iter().map(|t| t.width(dimension)).sum();
    if let Some(bad) = rows.iter().find(|r| r.len() != width) {
        return Err(CodecError::invalid(
            path,
            format!("row has {} values, field layout needs {}", bad.len(), width),
        ));
    }

    let mut w = Writer::new(path);
    w.dimension(dimension)?;

    let at = w.begin(kwd::SOL_AT_VERTICES);
    w.index(rows.len())?;
    w.index(types.len())?;
    for t in types {
        w.int(t.code());
    }
    for row in rows {
        for &value in row {
            w.real(value);
        }
    }
    w.end(at)?;

    w.finish()
}

struct Reader<'a> {
    path: &'a Path,
    data: &'a [u8],
    pos: usize,
    big_endian: bool,
    version: i32,
}

impl<'a> Reader<'a> {
    fn open(path: &'a Path, data: &'a [u8]) -> Result<Self, CodecError> {
        let mut reader = Self {
            path,
            data,
            pos: 0,
            big_endian: false,
            version: 0,
        };
        let head = reader.bytes::<4>()?;
        reader.big_endian = if i32::from_le_bytes(head) == CODE {
            false
        } else if i32::from_be_bytes(head) == CODE {
            true
        } else {
            return Err(CodecError::invalid(path, "not a GMF binary file"));
        };
        reader.version = reader.int()?;
        if !(1..=3).contains(&reader.version) {
            return Err(CodecError::invalid(
                path,
                format!("unsupported GMF version {}", reader.version),
            ));
        }
        Ok(reader)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn bytes<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let end = self.pos + N;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| CodecError::invalid(self.path, "unexpected end of file"))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    fn int(&mut self) -> Result<i32, CodecError> {
        let raw = self.bytes::<4>()?;
        Ok(if self.big_endian {
            i32::from_be_bytes(raw)
        } else {
            i32::from_le_bytes(raw)
        })
    }

    fn long(&mut self) -> Result<i64, CodecError> {
        let raw = self.bytes::<8>()?;
        Ok(if self.big_endian {
            i64::from_be_bytes(raw)
        } else {
            i64::from_le_bytes(raw)
        })
    }

    fn count(&mut self) -> Result<usize, CodecError> {
        let value = self.int()?;
        usize::try_from(value)
            .map_err(|_| CodecError::invalid(self.path, format!("negative count {}", value)))
    }

    /// Next-block position: 32-bit before version 3, 64-bit from it.
    fn position(&mut self) -> Result<i64, CodecError> {
        if self.version >= 3 {
            self.long()
        } else {
            self.int().map(i64::from)
        }
    }

    fn real_size(&self) -> usize {
        if self.version == 1 {
            4
        } else {
            8
        }
    }

    /// Upper bound on the records of `size` bytes left in the file.
    fn fits(&self, size: usize) -> usize {
        self.data.len().saturating_sub(self.pos) / size.max(1)
    }

    fn real(&mut self) -> Result<f64, CodecError> {
        if self.version == 1 {
            let raw = self.bytes::<4>()?;
            Ok(f64::from(if self.big_endian {
                f32::from_be_bytes(raw)
            } else {
                f32::from_le_bytes(raw)
            }))
        } else {
            let raw = self.bytes::<8>()?;
            Ok(if self.big_endian {
                f64::from_be_bytes(raw)
            } else {
                f64::from_le_bytes(raw)
            })
        }
    }

    fn node(&mut self) -> Result<usize, CodecError> {
        let value = self.int()?;
        if value < 1 {
            return Err(CodecError::invalid(
                self.path,
                format!("invalid node index {}", value),
            ));
        }
        Ok(value as usize - 1)
    }

    fn seek(&mut self, position: i64) -> Result<(), CodecError> {
        match usize::try_from(position) {
            Ok(p) if p <= self.data.len() => {
                self.pos = p;
                Ok(())
            }
            _ => Err(CodecError::invalid(
                self.path,
                format!("block position {} is outside the file", position),
            )),
        }
    }

    /// Walk the blocks, handing each known keyword to `visit`.
    fn blocks(
        &mut self,
        mut visit: impl FnMut(&mut Self, i32) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        while !self.at_end() {
            let start = self.pos;
            let keyword = self.int()?;
            if keyword == kwd::END {
                break;
            }
            let next = self.position()?;
            visit(self, keyword)?;
            if next <= 0 {
                break;
            }
            // Blocks only chain forward.
            if next <= start as i64 {
                return Err(CodecError::invalid(
                    self.path,
                    format!("block at {} points back to {}", start, next),
                ));
            }
            self.seek(next)?;
        }
        Ok(())
    }
}

fn dimension_of(path: &Path, dimension: Option<u8>) -> Result<u8, CodecError> {
    dimension.ok_or_else(|| CodecError::invalid(path, "data block before Dimension"))
}

pub fn read_mesh(path: &Path) -> Result<Mesh, CodecError> {
    let data = fs::read(path).map_err(|e| CodecError::io(path, e))?;
    let mut reader = Reader::open(path, &data)?;

    let mut dimension = None;
    let mut vertices = Vec::new();
    let mut elements = Vec::new();

    reader.blocks(|r, keyword| {
        match keyword {
            kwd::DIMENSION => dimension = Some(r.int()? as u8),
            kwd::VERTICES => {
                let dim = dimension_of(path, dimension)? as usize;
                let n = r.count()?;
                vertices.reserve(n.min(r.fits(dim * r.real_size() + 4)));
                for _ in 0..n {
                    let mut vertex = [0.0; 3];
                    for c in vertex.iter_mut().take(dim) {
                        *c = r.real()?;
                    }
                    r.int()?;
                    vertices.push(vertex);
                }
            }
            k => {
                if let Some(kind) = keyword_element(k) {
                    let n = r.count()?;
                    for _ in 0..n {
                        let nodes = (0..kind.node_count())
                            .map(|_| r.node())
                            .collect::<Result<Vec<_>, _>>()?;
                        let reference = r.int()?.max(0) as u32;
                        elements.push(Element::new(kind, nodes, reference));
                    }
                }
            }
        }
        Ok(())
    })?;

    let dimension = dimension_of(path, dimension)?;
    if !(2..=3).contains(&dimension) {
        return Err(CodecError::invalid(
            path,
            format!("unsupported dimension {}", dimension),
        ));
    }

    let mut mesh = Mesh {
        dimension,
        vertices,
        ..Mesh::default()
    };
    for element in elements {
        if element.nodes.iter().any(|&n| n >= mesh.vertices.len()) {
            return Err(CodecError::invalid(path, "node index out of range"));
        }
        match (dimension, element.kind.dimension()) {
            (2, 2) | (3, 3) => mesh.elements.push(element),
            (2, 1) | (3, 2) => mesh.boundary.push(element),
            // Ridge edges of 3-D meshes are not kept.
            _ => {}
        }
    }
    Ok(mesh)
}

pub fn read_solution(path: &Path) -> Result<SolutionBlock, CodecError> {
    let data = fs::read(path).map_err(|e| CodecError::io(path, e))?;
    let mut reader = Reader::open(path, &data)?;

    let mut dimension = None;
    let mut block = None;

    reader.blocks(|r, keyword| {
        match keyword {
            kwd::DIMENSION => dimension = Some(r.int()? as u8),
            kwd::SOL_AT_VERTICES => {
                let dim = dimension_of(path, dimension)?;
                let n = r.count()?;
                let ntypes = r.count()?;
                let types = (0..ntypes)
                    .map(|_| {
                        let code = r.int()?;
                        SolType::from_code(code).ok_or_else(|| {
                            CodecError::invalid(path, format!("unknown field type {}", code))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let width: usize = types.iter().map(|t| t.width(dim)).sum();
                let rows = (0..n)
                    .map(|_| (0..width).map(|_| r.real()).collect::<Result<Vec<_>, _>>())
                    .collect::<Result<Vec<_>, _>>()?;
                block = Some(SolutionBlock {
                    dimension: dim,
                    types,
                    rows,
                });
            }
            _ => {}
        }
        Ok(())
    })?;

    block.ok_or_else(|| CodecError::invalid(path, "no SolAtVertices block"))
}

/// Dimension recorded in a GMF file header block.
pub fn read_dimension(path: &Path) -> Result<u8, CodecError> {
    let data = fs::read(path).map_err(|e| CodecError::io(path, e))?;
    let mut reader = Reader::open(path, &data)?;
    let mut dimension = None;
    reader.blocks(|r, keyword| {
        if keyword == kwd::DIMENSION && dimension.is_none() {
            dimension = Some(r.int()? as u8);
        }
        Ok(())
    })?;
    dimension_of(path, dimension)
}
