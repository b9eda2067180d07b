//! CPU-side geometry: procedural primitives and model loading.
//!
//! The renderer draws exactly one mesh. By default that is a procedural torus
//! knot; an STL file can be loaded instead. Geometry stays in [`RawGeometry`]
//! until it is uploaded with [`Mesh::from_raw`](crate::Mesh::from_raw), which
//! keeps the generators testable without a GPU.
//!
//! # Supported Formats
//!
//! | Format | Extensions | Notes |
//! |--------|------------|-------|
//! | STL    | `.stl`     | Binary and ASCII, no UV coordinates |

use crate::mesh::Vertex3d;
use glam::Vec3;
use std::f32::consts::{PI, TAU};
use std::path::Path;

/// Errors that can occur when loading geometry.
#[derive(Debug)]
pub enum GeometryError {
    /// File could not be read.
    Io(std::io::Error),
    /// File format could not be determined from extension.
    UnknownFormat(String),
    /// The geometry data was invalid or corrupt.
    ParseError(String),
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeometryError::Io(e) => write!(f, "IO error: {}", e),
            GeometryError::UnknownFormat(ext) => {
                write!(f, "Unknown geometry format: '{}'", ext)
            }
            GeometryError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for GeometryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GeometryError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GeometryError {
    fn from(e: std::io::Error) -> Self {
        GeometryError::Io(e)
    }
}

/// Geometry data before GPU upload.
#[derive(Clone, Debug, Default)]
pub struct RawGeometry {
    /// Vertex positions, normals, and UVs.
    pub vertices: Vec<Vertex3d>,
    /// Triangle indices.
    pub indices: Vec<u32>,
}

impl RawGeometry {
    pub fn new(vertices: Vec<Vertex3d>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Returns the `(min, max)` corners of the axis-aligned bounding box.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);

        for v in &self.vertices {
            let p = Vec3::from(v.position);
            min = min.min(p);
            max = max.max(p);
        }

        (min, max)
    }

    pub fn center(&self) -> Vec3 {
        let (min, max) = self.bounds();
        (min + max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        let (min, max) = self.bounds();
        max - min
    }

    pub fn translate(&mut self, offset: Vec3) {
        for v in &mut self.vertices {
            v.position = (Vec3::from(v.position) + offset).into();
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for v in &mut self.vertices {
            v.position = (Vec3::from(v.position) * factor).into();
        }
    }

    /// Centers the geometry at the origin.
    pub fn recenter(&mut self) {
        let center = self.center();
        self.translate(-center);
    }

    /// Scales the geometry so its largest extent is 2 (fits in `[-1, 1]` once centered).
    pub fn normalize(&mut self) {
        let size = self.size();
        let max_dim = size.x.max(size.y).max(size.z);
        if max_dim > 0.0 {
            self.scale(2.0 / max_dim);
        }
    }

    /// Recomputes smooth normals by area-weighted averaging of face normals.
    pub fn recalculate_normals(&mut self) {
        let mut accum = vec![Vec3::ZERO; self.vertices.len()];

        for tri in self.indices.chunks_exact(3) {
            let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let p0 = Vec3::from(self.vertices[i0].position);
            let p1 = Vec3::from(self.vertices[i1].position);
            let p2 = Vec3::from(self.vertices[i2].position);
            let face_normal = (p1 - p0).cross(p2 - p0);

            for i in [i0, i1, i2] {
                accum[i] += face_normal;
            }
        }

        for (v, n) in self.vertices.iter_mut().zip(accum) {
            v.normal = n.normalize_or_zero().into();
        }
    }

    /// Number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// A UV sphere of the given radius centered at the origin.
    ///
    /// `(segments + 1) × (rings + 1)` vertices, `segments × rings × 2` triangles.
    pub fn sphere(radius: f32, segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);
        let mut indices = Vec::with_capacity((segments * rings * 6) as usize);

        for ring in 0..=rings {
            let phi = PI * ring as f32 / rings as f32;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for seg in 0..=segments {
                let theta = TAU * seg as f32 / segments as f32;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();

                vertices.push(Vertex3d::new(
                    [x * radius, y * radius, z * radius],
                    [x, y, z],
                    [seg as f32 / segments as f32, ring as f32 / rings as f32],
                ));
            }
        }

        for ring in 0..rings {
            for seg in 0..segments {
                let current = ring * (segments + 1) + seg;
                let next = current + segments + 1;

                indices.extend_from_slice(&[current, current + 1, next]);
                indices.extend_from_slice(&[current + 1, next + 1, next]);
            }
        }

        Self::new(vertices, indices)
    }

    /// A flat square in the XY plane facing +Z.
    pub fn quad(size: f32) -> Self {
        let h = size * 0.5;
        let n = [0.0, 0.0, 1.0];
        let vertices = vec![
            Vertex3d::new([-h, -h, 0.0], n, [0.0, 1.0]),
            Vertex3d::new([h, -h, 0.0], n, [1.0, 1.0]),
            Vertex3d::new([h, h, 0.0], n, [1.0, 0.0]),
            Vertex3d::new([-h, h, 0.0], n, [0.0, 0.0]),
        ];
        Self::new(vertices, vec![0, 1, 2, 2, 3, 0])
    }

    /// A `(p, q)` torus knot tube.
    ///
    /// The centre curve winds `p` times around the symmetry axis and `q` times
    /// through the hole; `radius` is the overall size and `tube` the tube radius.
    /// UVs run along the curve (u) and around the tube (v).
    pub fn torus_knot(radius: f32, tube: f32, p: u32, q: u32, segments: u32, sides: u32) -> Self {
        let segments = segments.max(3);
        let sides = sides.max(3);
        let (p, q) = (p as f32, q as f32);

        let curve = |t: f32| {
            let r = radius * (2.0 + (q * t).cos()) * 0.5;
            Vec3::new(r * (p * t).cos(), r * (p * t).sin(), radius * (q * t).sin() * 0.5)
        };

        let mut vertices = Vec::with_capacity(((segments + 1) * (sides + 1)) as usize);
        let mut indices = Vec::with_capacity((segments * sides * 6) as usize);

        for i in 0..=segments {
            let t = TAU * i as f32 / segments as f32;
            let p1 = curve(t);
            let p2 = curve(t + 0.01);

            // Frenet-like frame from the chord and the mean position.
            let tangent = p2 - p1;
            let mut normal = p2 + p1;
            let binormal = tangent.cross(normal).normalize_or_zero();
            normal = binormal.cross(tangent).normalize_or_zero();

            for j in 0..=sides {
                let v = TAU * j as f32 / sides as f32;
                let offset = normal * v.cos() + binormal * v.sin();
                let position = p1 + offset * tube;

                vertices.push(Vertex3d::new(
                    position.into(),
                    offset.normalize_or_zero().into(),
                    [i as f32 / segments as f32, j as f32 / sides as f32],
                ));
            }
        }

        for i in 0..segments {
            for j in 0..sides {
                let a = i * (sides + 1) + j;
                let b = (i + 1) * (sides + 1) + j;
                indices.extend_from_slice(&[a, b, a + 1]);
                indices.extend_from_slice(&[b, b + 1, a + 1]);
            }
        }

        Self::new(vertices, indices)
    }

    /// Loads geometry from a file, detecting the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GeometryError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "stl" => {
                let file = std::fs::File::open(path)?;
                let mut reader = std::io::BufReader::new(file);
                Self::parse_stl(&mut reader)
            }
            _ => Err(GeometryError::UnknownFormat(ext)),
        }
    }

    /// Parses STL geometry from bytes.
    pub fn from_stl_bytes(bytes: &[u8]) -> Result<Self, GeometryError> {
        let mut cursor = std::io::Cursor::new(bytes);
        Self::parse_stl(&mut cursor)
    }

    fn parse_stl<R: std::io::Read + std::io::Seek>(reader: &mut R) -> Result<Self, GeometryError> {
        let stl = stl_io::read_stl(reader)
            .map_err(|e| GeometryError::ParseError(format!("STL parse error: {}", e)))?;

        let mut vertices = Vec::with_capacity(stl.faces.len() * 3);
        let mut indices = Vec::with_capacity(stl.faces.len() * 3);

        for (i, face) in stl.faces.iter().enumerate() {
            let normal: [f32; 3] = face.normal.into();

            for &vertex_idx in &face.vertices {
                let vertex = stl.vertices.get(vertex_idx).ok_or_else(|| {
                    GeometryError::ParseError(format!("face {} references missing vertex", i))
                })?;
                let position: [f32; 3] = (*vertex).into();
                // STL has no UVs
                vertices.push(Vertex3d::new(position, normal, [0.0, 0.0]));
            }

            let base = (i * 3) as u32;
            indices.extend_from_slice(&[base, base + 1, base + 2]);
        }

        Ok(Self::new(vertices, indices))
    }
}
