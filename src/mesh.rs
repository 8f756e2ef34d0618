/// Triangle meshes produced by the reconstruction model
///
/// Meshes are written as OBJ with optional per-vertex colors on the `v`
/// lines (`v x y z r g b`, colors in [0, 1]). The viewer always reloads the
/// file instead of sharing the in-memory mesh.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::MeshError;

#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f32; 3]>,
    pub faces: Vec<[u32; 3]>,
    /// One RGB color per vertex
    pub colors: Option<Vec<[f32; 3]>>,
}

impl Mesh {
    pub fn new(vertices: Vec<[f32; 3]>, faces: Vec<[u32; 3]>, colors: Option<Vec<[f32; 3]>>) -> Self {
        Self { vertices, faces, colors }
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Area-weighted mean of the triangle centroids
    ///
    /// Falls back to the vertex mean when every triangle is degenerate.
    pub fn centroid(&self) -> [f32; 3] {
        let mut weighted = [0.0f64; 3];
        let mut total_area = 0.0f64;

        for face in &self.faces {
            let Some([a, b, c]) = self.triangle(face) else {
                continue;
            };
            let area = triangle_area(a, b, c) as f64;
            for axis in 0..3 {
                weighted[axis] += area * (a[axis] + b[axis] + c[axis]) as f64 / 3.0;
            }
            total_area += area;
        }

        if total_area > 0.0 {
            return weighted.map(|v| (v / total_area) as f32);
        }

        if self.vertices.is_empty() {
            return [0.0; 3];
        }
        let mut sum = [0.0f64; 3];
        for v in &self.vertices {
            for axis in 0..3 {
                sum[axis] += v[axis] as f64;
            }
        }
        sum.map(|s| (s / self.vertices.len() as f64) as f32)
    }

    /// Move every vertex by `offset`
    pub fn apply_translation(&mut self, offset: [f32; 3]) {
        for v in &mut self.vertices {
            for axis in 0..3 {
                v[axis] += offset[axis];
            }
        }
    }

    /// Distance of the farthest vertex from the origin
    pub fn bounding_radius(&self) -> f32 {
        self.vertices
            .iter()
            .map(|v| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt())
            .fold(0.0, f32::max)
    }

    /// Vertex positions of a face, `None` if an index is out of range
    pub fn triangle(&self, face: &[u32; 3]) -> Option<[[f32; 3]; 3]> {
        Some([
            *self.vertices.get(face[0] as usize)?,
            *self.vertices.get(face[1] as usize)?,
            *self.vertices.get(face[2] as usize)?,
        ])
    }

    /// Write the mesh as OBJ
    pub fn write_obj<W: Write>(&self, mut out: W) -> io::Result<()> {
        for (i, v) in self.vertices.iter().enumerate() {
            match self.colors.as_ref().and_then(|colors| colors.get(i)) {
                Some(c) => writeln!(
                    out,
                    "v {:.8} {:.8} {:.8} {:.8} {:.8} {:.8}",
                    v[0], v[1], v[2], c[0], c[1], c[2]
                )?,
                None => writeln!(out, "v {:.8} {:.8} {:.8}", v[0], v[1], v[2])?,
            }
        }

        // OBJ indices are 1-based
        for f in &self.faces {
            writeln!(out, "f {} {} {}", f[0] + 1, f[1] + 1, f[2] + 1)?;
        }

        out.flush()
    }

    /// Export to an OBJ file, replacing any existing file
    pub fn export(&self, path: &Path) -> io::Result<()> {
        self.write_obj(BufWriter::new(File::create(path)?))
    }

    /// Load an OBJ file as a single mesh
    ///
    /// All objects in the file are merged; polygons are triangulated.
    pub fn load_obj(path: &Path) -> Result<Self, MeshError> {
        let options = tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        };
        let (models, _materials) = tobj::load_obj(path, &options)?;

        let mut mesh = Mesh::new(Vec::new(), Vec::new(), None);
        let mut colors = Vec::new();
        let mut all_colored = true;

        for model in models {
            let m = model.mesh;
            let base = mesh.vertices.len() as u32;

            mesh.vertices.extend(m.positions.chunks_exact(3).map(|p| [p[0], p[1], p[2]]));
            mesh.faces.extend(
                m.indices
                    .chunks_exact(3)
                    .map(|t| [base + t[0], base + t[1], base + t[2]]),
            );

            if m.vertex_color.len() == m.positions.len() {
                colors.extend(m.vertex_color.chunks_exact(3).map(|c| [c[0], c[1], c[2]]));
            } else {
                all_colored = false;
            }
        }

        if mesh.is_empty() {
            return Err(MeshError::Empty);
        }
        if all_colored && !colors.is_empty() {
            mesh.colors = Some(colors);
        }

        Ok(mesh)
    }
}

fn triangle_area(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> f32 {
    let ab = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let ac = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let cross = [
        ab[1] * ac[2] - ab[2] * ac[1],
        ab[2] * ac[0] - ab[0] * ac[2],
        ab[0] * ac[1] - ab[1] * ac[0],
    ];
    0.5 * (cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2]).sqrt()
}
