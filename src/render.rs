//! Host-facing drawable contract.
//!
//! The core never talks to a renderer. Each component owns one or more of the
//! buffers below, mutates them in place during its update, and raises a single
//! `needs_upload` flag per frame. The host polls the flag, uploads the bytes and
//! calls [`InstanceBuffer::take_upload`] / [`MeshBuffer::take_upload`].

use glam::{Mat4, Quat, Vec3};
use healing_common::Color;
use std::sync::atomic::{AtomicU64, Ordering};
use zerocopy::IntoBytes;

static NEXT_DRAWABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique handle for a drawable. Never reused, so a host holding an id from a
/// disposed component cannot mistake it for a recreated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawableId(u64);

impl DrawableId {
    fn next() -> Self {
        DrawableId(NEXT_DRAWABLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Axis-aligned box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Aabb { min: min.min(max), max: min.max(max) }
    }

    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        let half = size.abs() * 0.5;
        Aabb { min: center - half, max: center + half }
    }

    /// Bounding box of a point set. `None` for an empty set.
    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
        Some(Aabb { min, max })
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn translated(&self, offset: Vec3) -> Self {
        Aabb { min: self.min + offset, max: self.max + offset }
    }
}

/// A plane `normal · p + constant = 0`. Points on the negative side are clipped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippingPlane {
    pub normal: Vec3,
    pub constant: f32,
}

impl ClippingPlane {
    pub fn new(normal: Vec3, constant: f32) -> Self {
        ClippingPlane { normal: normal.normalize_or_zero(), constant }
    }

    pub fn distance_to_point(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.constant
    }
}

/// Visibility, material and clipping state shared by every drawable the core exposes.
#[derive(Debug, Clone)]
pub struct Drawable {
    id: DrawableId,
    pub label: &'static str,
    pub visible: bool,
    pub opacity: f32,
    pub color: Color,
    /// Uniform scale/offset applied on top of the buffer contents (used by overlays).
    pub scale: Vec3,
    pub offset: Vec3,
    clipping_planes: Vec<ClippingPlane>,
    disposed: bool,
}

impl Drawable {
    pub fn new(label: &'static str, color: Color) -> Self {
        Drawable {
            id: DrawableId::next(),
            label,
            visible: true,
            opacity: 1.0,
            color,
            scale: Vec3::ONE,
            offset: Vec3::ZERO,
            clipping_planes: Vec::new(),
            disposed: false,
        }
    }

    pub fn id(&self) -> DrawableId {
        self.id
    }

    pub fn set_clipping_planes(&mut self, planes: &[ClippingPlane]) {
        self.clipping_planes.clear();
        self.clipping_planes.extend_from_slice(planes);
    }

    pub fn clipping_planes(&self) -> &[ClippingPlane] {
        &self.clipping_planes
    }

    /// True when any active plane hides `p`.
    pub fn is_clipped(&self, p: Vec3) -> bool {
        self.clipping_planes.iter().any(|plane| plane.distance_to_point(p) < 0.0)
    }

    pub fn dispose(&mut self) {
        self.visible = false;
        self.clipping_planes.clear();
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

/// Per-instance transforms and colors for an instanced draw call.
///
/// Layout matches a column-major `mat4` per instance followed by an `rgb` per instance.
#[derive(Debug)]
pub struct InstanceBuffer {
    pub drawable: Drawable,
    matrices: Vec<f32>,
    colors: Vec<f32>,
    capacity: usize,
    needs_upload: bool,
    version: u64,
}

const MAT4_LEN: usize = 16;

impl InstanceBuffer {
    /// Allocates `capacity` instances, all hidden (zero scale).
    pub fn new(label: &'static str, capacity: usize, color: Color) -> Self {
        let hidden = Mat4::from_scale(Vec3::ZERO).to_cols_array();
        let mut matrices = Vec::with_capacity(capacity * MAT4_LEN);
        let mut colors = Vec::with_capacity(capacity * 3);
        for _ in 0..capacity {
            matrices.extend_from_slice(&hidden);
            colors.extend_from_slice(&[color.red, color.green, color.blue]);
        }
        InstanceBuffer {
            drawable: Drawable::new(label, color),
            matrices,
            colors,
            capacity,
            needs_upload: true,
            version: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Writes a uniformly scaled transform. Does not raise the dirty flag.
    pub fn set_transform(&mut self, index: usize, position: Vec3, scale: f32) {
        if index >= self.capacity {
            return;
        }
        let m = Mat4::from_scale_rotation_translation(Vec3::splat(scale), Quat::IDENTITY, position);
        self.matrices[index * MAT4_LEN..(index + 1) * MAT4_LEN].copy_from_slice(&m.to_cols_array());
    }

    pub fn position(&self, index: usize) -> Option<Vec3> {
        let m = self.matrices.get(index * MAT4_LEN..(index + 1) * MAT4_LEN)?;
        Some(Vec3::new(m[12], m[13], m[14]))
    }

    pub fn scale(&self, index: usize) -> Option<f32> {
        self.matrices.get(index * MAT4_LEN).copied()
    }

    /// Flags the buffer for upload. Idempotent within a frame.
    pub fn mark_dirty(&mut self) {
        if !self.needs_upload {
            self.needs_upload = true;
            self.version += 1;
        }
    }

    pub fn needs_upload(&self) -> bool {
        self.needs_upload
    }

    /// Number of times the buffer went from clean to dirty.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Clears the dirty flag, returning whether an upload was pending.
    pub fn take_upload(&mut self) -> bool {
        std::mem::replace(&mut self.needs_upload, false)
    }

    pub fn matrix_bytes(&self) -> &[u8] {
        self.matrices.as_slice().as_bytes()
    }

    pub fn color_bytes(&self) -> &[u8] {
        self.colors.as_slice().as_bytes()
    }

    /// Frees the instance storage. Safe to call more than once.
    pub fn release(&mut self) {
        self.matrices = Vec::new();
        self.colors = Vec::new();
        self.capacity = 0;
        self.needs_upload = false;
        self.drawable.dispose();
    }
}

/// Indexed triangle mesh with per-vertex normals.
#[derive(Debug)]
pub struct MeshBuffer {
    pub drawable: Drawable,
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    indices: Vec<u32>,
    /// Number of indices to draw from the start of the index buffer.
    draw_count: usize,
    needs_upload: bool,
    version: u64,
}

impl MeshBuffer {
    pub fn new(label: &'static str, positions: Vec<Vec3>, indices: Vec<u32>, color: Color) -> Self {
        let draw_count = indices.len();
        let mut mesh = MeshBuffer {
            drawable: Drawable::new(label, color),
            positions: positions.iter().map(|p| p.to_array()).collect(),
            normals: vec![[0.0, 1.0, 0.0]; positions.len()],
            indices,
            draw_count,
            needs_upload: true,
            version: 0,
        };
        mesh.compute_vertex_normals();
        mesh
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn position(&self, index: usize) -> Option<Vec3> {
        self.positions.get(index).map(|p| Vec3::from_array(*p))
    }

    pub fn positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.positions.iter().map(|p| Vec3::from_array(*p))
    }

    pub fn normal(&self, index: usize) -> Option<Vec3> {
        self.normals.get(index).map(|n| Vec3::from_array(*n))
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn set_position(&mut self, index: usize, p: Vec3) {
        if let Some(slot) = self.positions.get_mut(index) {
            *slot = p.to_array();
        }
    }

    pub fn set_draw_count(&mut self, count: usize) {
        self.draw_count = count.min(self.indices.len());
    }

    pub fn draw_count(&self) -> usize {
        self.draw_count
    }

    /// Area-weighted vertex normals from the index buffer.
    pub fn compute_vertex_normals(&mut self) {
        let mut acc = vec![Vec3::ZERO; self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let (a, b, c) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
            if a >= acc.len() || b >= acc.len() || c >= acc.len() {
                continue;
            }
            let pa = Vec3::from_array(self.positions[a]);
            let pb = Vec3::from_array(self.positions[b]);
            let pc = Vec3::from_array(self.positions[c]);
            let face = (pb - pa).cross(pc - pa);
            acc[a] += face;
            acc[b] += face;
            acc[c] += face;
        }
        for (slot, n) in self.normals.iter_mut().zip(acc) {
            let n = n.normalize_or_zero();
            *slot = if n == Vec3::ZERO { [0.0, 1.0, 0.0] } else { n.to_array() };
        }
    }

    /// Local-space bounding box of the current vertices.
    pub fn bounding_box(&self) -> Option<Aabb> {
        Aabb::from_points(self.positions())
    }

    pub fn mark_dirty(&mut self) {
        if !self.needs_upload {
            self.needs_upload = true;
            self.version += 1;
        }
    }

    pub fn needs_upload(&self) -> bool {
        self.needs_upload
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn take_upload(&mut self) -> bool {
        std::mem::replace(&mut self.needs_upload, false)
    }

    pub fn position_bytes(&self) -> &[u8] {
        self.positions.as_slice().as_bytes()
    }

    pub fn normal_bytes(&self) -> &[u8] {
        self.normals.as_slice().as_bytes()
    }

    pub fn index_bytes(&self) -> &[u8] {
        self.indices.as_slice().as_bytes()
    }

    pub fn release(&mut self) {
        self.positions = Vec::new();
        self.normals = Vec::new();
        self.indices = Vec::new();
        self.draw_count = 0;
        self.needs_upload = false;
        self.drawable.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palette::Srgb;

    #[test]
    fn drawable_ids_are_never_reused() {
        let a = Drawable::new("a", Srgb::new(1.0, 1.0, 1.0));
        let b = Drawable::new("b", Srgb::new(1.0, 1.0, 1.0));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn instance_dirty_flag_counts_once_per_frame() {
        let mut buf = InstanceBuffer::new("test", 4, Srgb::new(1.0, 0.0, 0.0));
        assert!(buf.take_upload());
        for i in 0..4 {
            buf.set_transform(i, Vec3::new(i as f32, 0.0, 0.0), 1.0);
            buf.mark_dirty();
        }
        assert_eq!(buf.version(), 1);
        assert!(buf.take_upload());
        assert!(!buf.take_upload());
        assert_eq!(buf.position(2), Some(Vec3::new(2.0, 0.0, 0.0)));
        assert_eq!(buf.matrix_bytes().len(), 4 * 16 * 4);
    }

    #[test]
    fn out_of_range_instance_writes_are_ignored() {
        let mut buf = InstanceBuffer::new("test", 1, Srgb::new(1.0, 0.0, 0.0));
        buf.set_transform(5, Vec3::ONE, 1.0);
        assert_eq!(buf.position(5), None);
    }

    #[test]
    fn flat_quad_normals_point_up() {
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 1.0),
        ];
        let mesh = MeshBuffer::new("quad", positions, vec![0, 1, 2, 2, 1, 3], Srgb::new(1.0, 1.0, 1.0));
        for i in 0..4 {
            let n = mesh.normal(i).unwrap();
            assert!((n - Vec3::Y).length() < 1e-6, "normal {:?}", n);
        }
    }

    #[test]
    fn clipping_plane_hides_negative_side() {
        let mut d = Drawable::new("d", Srgb::new(1.0, 1.0, 1.0));
        d.set_clipping_planes(&[ClippingPlane::new(Vec3::X, 0.0)]);
        assert!(d.is_clipped(Vec3::new(-1.0, 0.0, 0.0)));
        assert!(!d.is_clipped(Vec3::new(1.0, 0.0, 0.0)));
        d.dispose();
        d.dispose();
        assert!(d.is_disposed());
        assert!(d.clipping_planes().is_empty());
    }

    #[test]
    fn aabb_from_points_covers_all() {
        let b = Aabb::from_points([Vec3::new(-1.0, 2.0, 0.0), Vec3::new(3.0, -1.0, 5.0)]).unwrap();
        assert_eq!(b.size(), Vec3::new(4.0, 3.0, 5.0));
        assert!(b.contains(Vec3::new(0.0, 0.0, 1.0)));
        assert!(Aabb::from_points(std::iter::empty()).is_none());
    }
}
