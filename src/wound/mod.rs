//! Procedural wound cavity and rim.
//!
//! The cavity is a V-shaped trough with a sine-rounded bottom, tapered along
//! its length. Two vertex buffers are built once (initial and fully
//! contracted); the live mesh is always an eased blend of the two, so any `t`
//! reproduces the same shape regardless of scrub history.

pub mod clot;

use crate::render::{Aabb, ClippingPlane, MeshBuffer};
use anyhow::Result;
use glam::Vec3;
use healing_common::{color_from_array, color_ramp, ease_out_cubic, lerp, window, Color, WoundConfig};
use log::debug;
use std::f32::consts::{FRAC_PI_2, PI};

pub use clot::ClotOverlay;

/// Relative width/depth kept at the two ends of the wound.
const END_TAPER: f32 = 0.35;
/// Rim sits just above the skin surface to avoid z-fighting.
const RIM_LIFT: f32 = 0.002;

const CAVITY_FRESH: [f32; 3] = [0.70, 0.05, 0.08];
const CAVITY_CLOTTED: [f32; 3] = [0.35, 0.04, 0.05];
const CAVITY_GRANULATION: [f32; 3] = [0.85, 0.40, 0.45];
const CAVITY_SCAR: [f32; 3] = [0.88, 0.72, 0.68];
const RIM_INFLAMED: [f32; 3] = [0.80, 0.35, 0.35];
const RIM_HEALED: [f32; 3] = [0.90, 0.75, 0.65];

fn taper(v: f32) -> f32 {
    END_TAPER + (1.0 - END_TAPER) * (PI * v).sin()
}

/// Depth of the V profile at normalized distance `s` (0 = midline, 1 = edge) from the midline.
fn v_profile(s: f32, depth: f32, rounding: f32) -> f32 {
    let s = s.clamp(0.0, 1.0);
    if rounding > 0.0 && s < rounding {
        depth * (1.0 - rounding + rounding * (FRAC_PI_2 * (1.0 - s / rounding)).sin())
    } else {
        depth * (1.0 - s)
    }
}

/// Blend that reproduces `a` at `e = 0` and `b` at `e = 1` bit-for-bit.
#[inline(always)]
fn blend(a: Vec3, b: Vec3, e: f32) -> Vec3 {
    a * (1.0 - e) + b * e
}

/// Procedural wound mesh plus its contraction state.
#[derive(Debug)]
pub struct WoundGeometry {
    config: WoundConfig,
    /// World position of the wound's top center.
    position: Vec3,
    initial: Vec<Vec3>,
    contracted: Vec<Vec3>,
    rim_initial: Vec<Vec3>,
    cavity: MeshBuffer,
    rim: MeshBuffer,
    cavity_stops: [(f32, Color); 4],
    rim_stops: [(f32, Color); 2],
    contraction_progress: f32,
    disposed: bool,
}

impl WoundGeometry {
    pub fn new(config: &WoundConfig) -> Result<Self> {
        if config.initial_width <= 0.0 || config.initial_depth <= 0.0 || config.length <= 0.0 {
            anyhow::bail!("wound dimensions must be positive.");
        }
        if config.segments < 2 || config.radial_segments < 2 {
            anyhow::bail!("wound needs at least 2 segments along each axis.");
        }

        let (initial, contracted, cavity_indices) = build_cavity(config);
        let (rim_initial, rim_indices) = build_rim(config);
        let cavity_stops = [
            (0.0, color_from_array(CAVITY_FRESH)),
            (0.15, color_from_array(CAVITY_CLOTTED)),
            (0.50, color_from_array(CAVITY_GRANULATION)),
            (0.90, color_from_array(CAVITY_SCAR)),
        ];
        let rim_stops = [(0.30, color_from_array(RIM_INFLAMED)), (0.90, color_from_array(RIM_HEALED))];

        let cavity = MeshBuffer::new("wound_cavity", initial.clone(), cavity_indices, cavity_stops[0].1);
        let rim = MeshBuffer::new("wound_rim", rim_initial.clone(), rim_indices, rim_stops[0].1);
        debug!(
            "Built wound mesh: {} cavity vertices, {} rim vertices.",
            cavity.vertex_count(),
            rim.vertex_count()
        );

        Ok(Self {
            config: config.clone(),
            position: Vec3::from_array(config.position),
            initial,
            contracted,
            rim_initial,
            cavity,
            rim,
            cavity_stops,
            rim_stops,
            contraction_progress: 0.0,
            disposed: false,
        })
    }

    pub fn config(&self) -> &WoundConfig {
        &self.config
    }

    /// Raw (un-eased) contraction progress for `t`.
    pub fn contraction_progress(&self, t: f32) -> f32 {
        window(t, self.config.contraction_start_t, self.config.contraction_complete_t)
    }

    fn eased_contraction(&self, t: f32) -> f32 {
        ease_out_cubic(self.contraction_progress(t))
    }

    /// Rebuilds the live cavity and rim from `t`, then updates material colors.
    pub fn update_contraction(&mut self, t: f32) {
        if self.disposed {
            return;
        }
        let cp = self.contraction_progress(t);
        self.apply_contraction(ease_out_cubic(cp));
        self.contraction_progress = cp;
        self.update_wound_colors(t);
    }

    /// Writes the blend of initial/contracted buffers for an eased factor `e`.
    pub fn apply_contraction(&mut self, e: f32) {
        for (i, (a, b)) in self.initial.iter().zip(&self.contracted).enumerate() {
            self.cavity.set_position(i, blend(*a, *b, e));
        }
        self.cavity.compute_vertex_normals();
        self.cavity.mark_dirty();

        let ratio = lerp(1.0, self.width_ratio(), e);
        for (i, p) in self.rim_initial.iter().enumerate() {
            self.rim.set_position(i, Vec3::new(p.x * ratio, p.y, p.z));
        }
        self.rim.compute_vertex_normals();
        self.rim.mark_dirty();
    }

    pub fn update_wound_colors(&mut self, t: f32) {
        self.cavity.drawable.color = color_ramp(&self.cavity_stops, t);
        self.rim.drawable.color = color_ramp(&self.rim_stops, t);
    }

    fn width_ratio(&self) -> f32 {
        self.config.final_width / self.config.initial_width
    }

    /// Width the mesh has at `t`. Same window and easing as the mesh itself.
    pub fn current_width(&self, t: f32) -> f32 {
        lerp(self.config.initial_width, self.config.final_width, self.eased_contraction(t))
    }

    pub fn current_depth(&self, t: f32) -> f32 {
        lerp(self.config.initial_depth, self.config.final_depth, self.eased_contraction(t))
    }

    /// Box new agents may appear in: current width × current depth × length, hanging below the surface.
    pub fn current_spawn_bounds(&self, t: f32) -> Aabb {
        let width = self.current_width(t);
        let depth = self.current_depth(t);
        let center = self.position - Vec3::new(0.0, depth * 0.5, 0.0);
        Aabb::from_center_size(center, Vec3::new(width, depth, self.config.length))
    }

    /// World-space bounds of the live cavity mesh.
    pub fn wound_bounds(&self) -> Aabb {
        self.cavity
            .bounding_box()
            .map(|b| b.translated(self.position))
            .unwrap_or_else(|| Aabb::new(self.position, self.position))
    }

    pub fn wound_center(&self) -> Vec3 {
        self.wound_bounds().center()
    }

    /// Half of the largest horizontal extent of the live mesh.
    pub fn wound_radius(&self) -> f32 {
        let size = self.wound_bounds().size();
        size.x.max(size.z) * 0.5
    }

    pub fn surface_position(&self) -> Vec3 {
        self.position
    }

    pub fn initial_vertices(&self) -> &[Vec3] {
        &self.initial
    }

    pub fn contracted_vertices(&self) -> &[Vec3] {
        &self.contracted
    }

    pub fn cavity(&self) -> &MeshBuffer {
        &self.cavity
    }

    pub fn cavity_mut(&mut self) -> &mut MeshBuffer {
        &mut self.cavity
    }

    pub fn rim(&self) -> &MeshBuffer {
        &self.rim
    }

    pub fn rim_mut(&mut self) -> &mut MeshBuffer {
        &mut self.rim
    }

    pub fn set_clipping_planes(&mut self, planes: &[ClippingPlane]) {
        self.cavity.drawable.set_clipping_planes(planes);
        self.rim.drawable.set_clipping_planes(planes);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Frees both vertex buffers. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.cavity.release();
        self.rim.release();
        self.initial = Vec::new();
        self.contracted = Vec::new();
        self.rim_initial = Vec::new();
        self.disposed = true;
        debug!("Disposed wound geometry.");
    }
}

// Grid of (segments + 1) rows along z by (radial_segments + 1) columns across x.
fn build_cavity(config: &WoundConfig) -> (Vec<Vec3>, Vec<Vec3>, Vec<u32>) {
    let rows = config.segments as usize + 1;
    let cols = config.radial_segments as usize + 1;
    let width_ratio = config.final_width / config.initial_width;
    let depth_ratio = config.final_depth / config.initial_depth;

    let mut initial = Vec::with_capacity(rows * cols);
    let mut contracted = Vec::with_capacity(rows * cols);
    for i in 0..rows {
        let v = i as f32 / config.segments as f32;
        let z = (v - 0.5) * config.length;
        let k = taper(v);
        let half_w = config.initial_width * 0.5 * k;
        let depth = config.initial_depth * k;
        for j in 0..cols {
            let u = j as f32 / config.radial_segments as f32;
            let across = 2.0 * u - 1.0;
            let x = across * half_w;
            let d = v_profile(across.abs(), depth, config.bottom_rounding);
            initial.push(Vec3::new(x, -d, z));
            contracted.push(Vec3::new(x * width_ratio, -d * depth_ratio, z));
        }
    }

    let mut indices = Vec::with_capacity((rows - 1) * (cols - 1) * 6);
    for i in 0..rows - 1 {
        for j in 0..cols - 1 {
            let a = (i * cols + j) as u32;
            let b = a + 1;
            let c = a + cols as u32;
            let d = c + 1;
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }
    (initial, contracted, indices)
}

// Two quad strips (inner edge + outer edge) running along both sides of the cut.
fn build_rim(config: &WoundConfig) -> (Vec<Vec3>, Vec<u32>) {
    let rows = config.segments as usize + 1;
    let mut vertices = Vec::with_capacity(rows * 4);
    let mut indices = Vec::with_capacity((rows - 1) * 12);

    for side in [-1.0f32, 1.0] {
        let base = vertices.len() as u32;
        for i in 0..rows {
            let v = i as f32 / config.segments as f32;
            let z = (v - 0.5) * config.length;
            let inner = config.initial_width * 0.5 * taper(v);
            vertices.push(Vec3::new(side * inner, RIM_LIFT, z));
            vertices.push(Vec3::new(side * (inner + config.rim_width), RIM_LIFT, z));
        }
        for i in 0..rows as u32 - 1 {
            let a = base + i * 2;
            let (inner0, outer0, inner1, outer1) = (a, a + 1, a + 2, a + 3);
            // keep the strip facing up on both sides
            if side > 0.0 {
                indices.extend_from_slice(&[inner0, inner1, outer0, outer0, inner1, outer1]);
            } else {
                indices.extend_from_slice(&[inner0, outer0, inner1, inner1, outer0, outer1]);
            }
        }
    }
    (vertices, indices)
}
