//! Surface extrusion of 2-D meshes.
//!
//! The adaptation engine only accepts 3-D surface backgrounds, so a planar
//! mesh is lifted into a unit-thickness slab whose surface is made of
//! triangles: the two caps plus one strip per boundary edge.

use super::{Element, ElementKind, Mesh};

/// Marker names given to the two caps of the slab.
pub const BOTTOM_MARKER: &str = "EXTRUSION_BOTTOM";
pub const TOP_MARKER: &str = "EXTRUSION_TOP";

/// Extrude a 2-D mesh into a 3-D triangulated surface.
///
/// Boundary edges keep their marker reference; the caps get two new markers
/// appended after the existing ones. Meshes that are not 2-D are returned
/// unchanged.
pub fn extrude_surface(mesh: &Mesh) -> Mesh {
    if mesh.dimension != 2 {
        return mesh.clone();
    }

    let n = mesh.vertices.len();
    let mut vertices = Vec::with_capacity(2 * n);
    vertices.extend(mesh.vertices.iter().map(|v| [v[0], v[1], 0.0]));
    vertices.extend(mesh.vertices.iter().map(|v| [v[0], v[1], 1.0]));

    let bottom_ref = mesh.markers.len() as u32 + 1;
    let top_ref = bottom_ref + 1;

    let mut boundary = Vec::new();
    for element in &mesh.elements {
        for [a, b, c] in triangulate(element) {
            boundary.push(Element::new(ElementKind::Triangle, vec![a, c, b], bottom_ref));
            boundary.push(Element::new(
                ElementKind::Triangle,
                vec![a + n, b + n, c + n],
                top_ref,
            ));
        }
    }

    for edge in mesh.boundary.iter().filter(|e| e.kind == ElementKind::Line) {
        let (a, b) = (edge.nodes[0], edge.nodes[1]);
        boundary.push(Element::new(
            ElementKind::Triangle,
            vec![a, b, b + n],
            edge.reference,
        ));
        boundary.push(Element::new(
            ElementKind::Triangle,
            vec![a, b + n, a + n],
            edge.reference,
        ));
    }

    let mut markers = mesh.markers.clone();
    markers.push(BOTTOM_MARKER.to_string());
    markers.push(TOP_MARKER.to_string());

    Mesh {
        dimension: 3,
        vertices,
        elements: Vec::new(),
        boundary,
        markers,
    }
}

fn triangulate(element: &Element) -> Vec<[usize; 3]> {
    let v = &element.nodes;
    match element.kind {
        ElementKind::Triangle => vec![[v[0], v[1], v[2]]],
        ElementKind::Quadrilateral => vec![[v[0], v[1], v[2]], [v[0], v[2], v[3]]],
        _ => Vec::new(),
    }
}
