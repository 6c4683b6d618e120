//! Vessel response: vasodilation of host vessels, angiogenesis sprouts and their regression.
//!
//! Vessels are owned by the host. This module only keeps [`Weak`] references
//! and rewrites their scale and color from `t` every frame. All curves are
//! evaluated as absolute functions of `t`, so scrubbing in either direction
//! lands on the same state.

use crate::render::{ClippingPlane, MeshBuffer};
use glam::Vec3;
use healing_common::{color_from_array, ease_in_out_cubic, ease_out_cubic, lerp, lerp_color, window, Color, VesselConfig};
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::Rng;
use std::cell::RefCell;
use std::f32::consts::TAU;
use std::rc::{Rc, Weak};

// --- Dilation curve breakpoints ---
const DILATION_RISE_END: f32 = 0.05;
const DILATION_PLATEAU_END: f32 = 0.30;
const DILATION_DECAY_END: f32 = 0.50;

const PULSE_AMPLITUDE: f32 = 0.08;
const PULSE_FREQUENCY: f32 = 40.0;
/// Cross-section a fully regressed sprout keeps before it is hidden.
const REGRESSED_SCALE: f32 = 0.1;
const HIDDEN_BELOW: f32 = 0.01;

/// Which local axis runs along the vessel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VesselAxis {
    X,
    #[default]
    Y,
    Z,
}

/// A host-owned vessel the response can dilate and tint.
#[derive(Debug, Clone, PartialEq)]
pub struct Vessel {
    pub position: Vec3,
    pub scale: Vec3,
    pub color: Color,
    pub axis: VesselAxis,
}

impl Vessel {
    pub fn new(position: Vec3, scale: Vec3, color: Color) -> Self {
        Vessel { position, scale, color, axis: VesselAxis::Y }
    }
}

pub type VesselHandle = Rc<RefCell<Vessel>>;

/// Registration-time snapshot of one vessel.
#[derive(Debug, Clone)]
pub struct VesselRecord {
    pub handle: Weak<RefCell<Vessel>>,
    pub base_scale: Vec3,
    pub base_color: Color,
    pub distance: f32,
    pub near_wound: bool,
    /// 1 at the wound center, 0 at and beyond the near radius.
    pub proximity: f32,
}

/// One angiogenesis sprout: a tube along a curve from a ring point to the wound center.
#[derive(Debug)]
pub struct Sprout {
    pub index: usize,
    pub curve: Vec<Vec3>,
    pub mesh: MeshBuffer,
    pub growth: f32,
    pub fade: f32,
    /// Cross-section multiplier for the host shader (pulse × regression shrink).
    pub cross_section: f32,
}

/// Multiplicative dilation for `t` before proximity weighting.
pub fn dilation_factor(t: f32, max_dilation: f32) -> f32 {
    let extra = max_dilation - 1.0;
    if t < DILATION_RISE_END {
        1.0 + extra * ease_out_cubic(window(t, 0.0, DILATION_RISE_END))
    } else if t < DILATION_PLATEAU_END {
        max_dilation
    } else if t < DILATION_DECAY_END {
        max_dilation - extra * ease_in_out_cubic(window(t, DILATION_PLATEAU_END, DILATION_DECAY_END))
    } else {
        1.0
    }
}

pub struct VesselResponse {
    config: VesselConfig,
    wound_center: Vec3,
    wound_radius: f32,
    records: Vec<VesselRecord>,
    sprouts: Option<Vec<Sprout>>,
    dilation: f32,
    rng: StdRng,
    clipping_planes: Vec<ClippingPlane>,
    disposed: bool,
}

impl std::fmt::Debug for VesselResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VesselResponse")
            .field("vessels", &self.records.len())
            .field("sprouts", &self.sprouts.as_ref().map(Vec::len))
            .field("dilation", &self.dilation)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl VesselResponse {
    pub fn new(config: &VesselConfig, wound_center: Vec3, wound_radius: f32, rng: StdRng) -> Self {
        VesselResponse {
            config: config.clone(),
            wound_center,
            wound_radius: wound_radius.max(1e-4),
            records: Vec::new(),
            sprouts: None,
            dilation: 1.0,
            rng,
            clipping_planes: Vec::new(),
            disposed: false,
        }
    }

    /// Records base scale/color and wound proximity for each handle. Replaces earlier registrations.
    pub fn register_vessels(&mut self, handles: &[VesselHandle]) {
        let near_radius = self.config.near_factor * self.wound_radius;
        self.records = handles
            .iter()
            .map(|handle| {
                let v = handle.borrow();
                let distance = v.position.distance(self.wound_center);
                let near_wound = distance < near_radius;
                let proximity = if near_wound { 1.0 - distance / near_radius } else { 0.0 };
                VesselRecord {
                    handle: Rc::downgrade(handle),
                    base_scale: v.scale,
                    base_color: v.color,
                    distance,
                    near_wound,
                    proximity,
                }
            })
            .collect();
        debug!(
            "Registered {} vessels, {} near the wound.",
            self.records.len(),
            self.records.iter().filter(|r| r.near_wound).count()
        );
    }

    pub fn records(&self) -> &[VesselRecord] {
        &self.records
    }

    pub fn update(&mut self, t: f32) {
        if self.disposed {
            return;
        }
        self.update_dilation(t);
        self.update_sprouts(t);
    }

    fn update_dilation(&mut self, t: f32) {
        let max = self.config.max_dilation;
        self.dilation = dilation_factor(t, max);
        let normalized = if max > 1.0 { (self.dilation - 1.0) / (max - 1.0) } else { 0.0 };
        let tint = color_from_array(self.config.dilated_color);

        for record in &self.records {
            // host dropped the vessel
            let Some(handle) = record.handle.upgrade() else { continue };
            let mut vessel = handle.borrow_mut();
            let f = 1.0 + (self.dilation - 1.0) * record.proximity;
            let b = record.base_scale;
            vessel.scale = match vessel.axis {
                VesselAxis::X => Vec3::new(b.x, b.y * f, b.z * f),
                VesselAxis::Y => Vec3::new(b.x * f, b.y, b.z * f),
                VesselAxis::Z => Vec3::new(b.x * f, b.y * f, b.z),
            };
            let blend = record.proximity * self.config.color_blend * normalized;
            vessel.color = lerp_color(record.base_color, tint, blend);
        }
    }

    fn update_sprouts(&mut self, t: f32) {
        let start = self.config.angiogenesis_start_t;
        if t >= start && self.sprouts.is_none() {
            self.build_sprouts();
        }
        let Some(sprouts) = self.sprouts.as_mut() else { return };

        let c = &self.config;
        for sprout in sprouts.iter_mut() {
            let delay = sprout.index as f32 * c.sprout_stagger;
            sprout.growth = ease_out_cubic(window(t, start + delay, start + delay + c.sprout_growth_duration));

            sprout.fade = if t >= c.regression_start_t {
                let r0 = c.regression_start_t + delay;
                ease_in_out_cubic(window(t, r0, r0 + c.regression_duration))
            } else {
                0.0
            };

            let pulse = 1.0 + PULSE_AMPLITUDE * (t * PULSE_FREQUENCY + sprout.index as f32).sin();
            sprout.cross_section = pulse * lerp(1.0, REGRESSED_SCALE, sprout.fade);

            let total = sprout.mesh.indices().len();
            let quads = total / 6;
            let shown = ((quads as f32) * sprout.growth).round() as usize;
            sprout.mesh.set_draw_count(shown * 6);

            let opacity = 1.0 - sprout.fade;
            let d = &mut sprout.mesh.drawable;
            d.opacity = opacity;
            d.scale = Vec3::splat(sprout.cross_section);
            d.visible = t >= start && sprout.growth > 0.0 && opacity > HIDDEN_BELOW;
            sprout.mesh.mark_dirty();
        }
    }

    fn build_sprouts(&mut self) {
        let c = &self.config;
        let count = c.sprout_count as usize;
        let samples = c.sprout_curve_samples.max(2) as usize;
        let radial = c.sprout_radial_segments.max(3) as usize;
        let color = color_from_array(c.sprout_color);
        let phase_offset: f32 = self.rng.random_range(0.0..TAU);

        let mut sprouts = Vec::with_capacity(count);
        for index in 0..count {
            let jitter: f32 = self.rng.random_range(-0.25..0.25);
            let angle = phase_offset + index as f32 / count.max(1) as f32 * TAU + jitter;
            let root = self.wound_center
                + Vec3::new(angle.cos() * c.sprout_ring_radius, -0.05, angle.sin() * c.sprout_ring_radius);
            let tip = self.wound_center;
            let lift: f32 = self.rng.random_range(0.05..0.2);
            let sway: f32 = self.rng.random_range(-0.3..0.3);
            let side = Vec3::new(-angle.sin(), 0.0, angle.cos()) * sway;
            let p1 = root.lerp(tip, 0.33) + Vec3::new(0.0, lift, 0.0) + side;
            let p2 = root.lerp(tip, 0.66) - Vec3::new(0.0, lift * 0.5, 0.0) - side * 0.5;

            let curve: Vec<Vec3> = (0..samples)
                .map(|k| cubic_bezier(root, p1, p2, tip, k as f32 / (samples - 1) as f32))
                .collect();
            let (positions, indices) = build_tube(&curve, c.sprout_radius, radial);
            let mut mesh = MeshBuffer::new("angiogenesis_sprout", positions, indices, color);
            mesh.drawable.set_clipping_planes(&self.clipping_planes);
            mesh.drawable.visible = false;
            mesh.set_draw_count(0);

            sprouts.push(Sprout { index, curve, mesh, growth: 0.0, fade: 0.0, cross_section: 1.0 });
        }
        debug!("Built {} angiogenesis sprouts.", sprouts.len());
        self.sprouts = Some(sprouts);
    }

    pub fn dilation(&self) -> f32 {
        self.dilation
    }

    /// Empty until angiogenesis first starts.
    pub fn sprouts(&self) -> &[Sprout] {
        self.sprouts.as_deref().unwrap_or(&[])
    }

    pub fn sprouts_built(&self) -> bool {
        self.sprouts.is_some()
    }

    pub fn visible_sprout_count(&self) -> usize {
        self.sprouts().iter().filter(|s| s.mesh.drawable.visible).count()
    }

    pub fn set_wound(&mut self, center: Vec3, radius: f32) {
        self.wound_center = center;
        self.wound_radius = radius.max(1e-4);
    }

    /// Applies to existing sprouts and to sprouts built later.
    pub fn set_clipping_planes(&mut self, planes: &[ClippingPlane]) {
        self.clipping_planes = planes.to_vec();
        if let Some(sprouts) = self.sprouts.as_mut() {
            for s in sprouts {
                s.mesh.drawable.set_clipping_planes(planes);
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Releases sprout meshes and forgets vessels. Host vessels keep their last scale/color.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(sprouts) = self.sprouts.as_mut() {
            for s in sprouts.iter_mut() {
                s.mesh.release();
            }
            trace!("Released {} sprout meshes.", sprouts.len());
        }
        self.sprouts = None;
        self.records.clear();
        self.clipping_planes.clear();
        self.disposed = true;
    }
}

fn cubic_bezier(p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3, s: f32) -> Vec3 {
    let u = 1.0 - s;
    p0 * (u * u * u) + p1 * (3.0 * u * u * s) + p2 * (3.0 * u * s * s) + p3 * (s * s * s)
}

// Rings of `radial` vertices around each curve sample; quads are emitted root-first
// so a prefix of the index buffer draws a partially grown tube.
fn build_tube(curve: &[Vec3], radius: f32, radial: usize) -> (Vec<Vec3>, Vec<u32>) {
    let n = curve.len();
    let mut positions = Vec::with_capacity(n * radial);
    for k in 0..n {
        let step = if k + 1 < n { curve[k + 1] - curve[k] } else { curve[k] - curve[k - 1] };
        let tangent = step.normalize_or_zero();
        let reference = if tangent.y.abs() > 0.9 { Vec3::X } else { Vec3::Y };
        let normal = tangent.cross(reference).normalize_or_zero();
        let binormal = tangent.cross(normal);
        for j in 0..radial {
            let a = j as f32 / radial as f32 * TAU;
            positions.push(curve[k] + (normal * a.cos() + binormal * a.sin()) * radius);
        }
    }

    let mut indices = Vec::with_capacity((n - 1) * radial * 6);
    for k in 0..n - 1 {
        for j in 0..radial {
            let a = (k * radial + j) as u32;
            let b = (k * radial + (j + 1) % radial) as u32;
            let c = a + radial as u32;
            let d = b + radial as u32;
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }
    (positions, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use palette::Srgb;
    use rand::SeedableRng;

    fn response() -> VesselResponse {
        VesselResponse::new(&VesselConfig::default(), Vec3::ZERO, 0.5, StdRng::seed_from_u64(3))
    }

    fn vessel(x: f32) -> VesselHandle {
        Rc::new(RefCell::new(Vessel::new(Vec3::new(x, -0.3, 0.0), Vec3::ONE, Srgb::new(0.6, 0.2, 0.2))))
    }

    #[test]
    fn dilation_curve_shape() {
        assert_eq!(dilation_factor(0.0, 1.5), 1.0);
        assert!((dilation_factor(0.05, 1.5) - 1.5).abs() < 1e-6);
        assert_eq!(dilation_factor(0.2, 1.5), 1.5);
        let mid = dilation_factor(0.4, 1.5);
        assert!(mid > 1.0 && mid < 1.5);
        assert_eq!(dilation_factor(0.5, 1.5), 1.0);
        assert_eq!(dilation_factor(0.9, 1.5), 1.0);
    }

    #[test]
    fn near_vessels_dilate_radially_only() {
        let mut r = response();
        let near = vessel(0.2);
        let far = vessel(5.0);
        r.register_vessels(&[near.clone(), far.clone()]);
        assert!(r.records()[0].near_wound);
        assert!(!r.records()[1].near_wound);

        r.update(0.2);
        let s = near.borrow().scale;
        assert!(s.x > 1.0 && s.z > 1.0);
        assert_eq!(s.y, 1.0);
        assert_eq!(far.borrow().scale, Vec3::ONE);
        assert_ne!(near.borrow().color, Srgb::new(0.6, 0.2, 0.2));
        assert_eq!(far.borrow().color, Srgb::new(0.6, 0.2, 0.2));

        r.update(0.8);
        assert_eq!(near.borrow().scale, Vec3::ONE);
    }

    #[test]
    fn dilation_falls_off_linearly_with_distance() {
        let cfg = VesselConfig::default();
        let mut r = response();
        let near_radius = cfg.near_factor * 0.5;
        let (d_close, d_mid) = (0.2 * near_radius, 0.6 * near_radius);
        let close = Rc::new(RefCell::new(Vessel::new(Vec3::new(d_close, 0.0, 0.0), Vec3::ONE, Srgb::new(0.6, 0.2, 0.2))));
        let mid = Rc::new(RefCell::new(Vessel::new(Vec3::new(0.0, 0.0, d_mid), Vec3::ONE, Srgb::new(0.6, 0.2, 0.2))));
        r.register_vessels(&[close.clone(), mid.clone()]);

        r.update(0.2);
        let extra = cfg.max_dilation - 1.0;
        let close_extra = close.borrow().scale.x - 1.0;
        let mid_extra = mid.borrow().scale.x - 1.0;
        assert!((close_extra - extra * 0.8).abs() < 1e-5, "close {}", close_extra);
        assert!((mid_extra - extra * 0.4).abs() < 1e-5, "mid {}", mid_extra);
        assert!((close_extra / mid_extra - 2.0).abs() < 1e-3);
    }

    #[test]
    fn dropped_vessels_are_skipped() {
        let mut r = response();
        let v = vessel(0.1);
        r.register_vessels(&[v.clone()]);
        drop(v);
        r.update(0.2);
        assert_eq!(r.records().len(), 1);
        assert!(r.records()[0].handle.upgrade().is_none());
    }

    #[test]
    fn sprouts_are_built_lazily_once() {
        let mut r = response();
        r.update(0.1);
        assert!(!r.sprouts_built());
        assert_eq!(r.visible_sprout_count(), 0);
        r.update(0.31);
        assert!(r.sprouts_built());
        let first_id = r.sprouts()[0].mesh.drawable.id();
        r.update(0.1);
        r.update(0.4);
        assert_eq!(r.sprouts()[0].mesh.drawable.id(), first_id);
        assert_eq!(r.sprouts().len(), VesselConfig::default().sprout_count as usize);
    }

    #[test]
    fn sprouts_hidden_before_angiogenesis_after_scrub_back() {
        let mut r = response();
        r.update(0.5);
        assert!(r.visible_sprout_count() > 0);
        r.update(0.1);
        assert_eq!(r.visible_sprout_count(), 0);
    }

    #[test]
    fn growth_is_staggered() {
        let mut r = response();
        r.update(0.33);
        let s = r.sprouts();
        assert!(s[0].growth > s[s.len() - 1].growth);
        assert!(s[0].mesh.draw_count() >= s[s.len() - 1].mesh.draw_count());
        r.update(0.6);
        for sprout in r.sprouts() {
            assert_eq!(sprout.growth, 1.0);
            assert_eq!(sprout.mesh.draw_count(), sprout.mesh.indices().len());
        }
    }

    #[test]
    fn regression_is_absolute_in_t() {
        let mut r = response();
        r.update(0.5);
        for s in r.sprouts() {
            assert_eq!(s.mesh.drawable.opacity, 1.0);
        }
        r.update(0.75);
        let forward: Vec<f32> = r.sprouts().iter().map(|s| s.mesh.drawable.opacity).collect();
        r.update(0.95);
        r.update(0.75);
        let back: Vec<f32> = r.sprouts().iter().map(|s| s.mesh.drawable.opacity).collect();
        assert_eq!(forward, back);
        assert!(forward[0] < forward[forward.len() - 1]);

        r.update(1.0);
        assert_eq!(r.visible_sprout_count(), 0);
        r.update(0.6);
        for s in r.sprouts() {
            assert_eq!(s.mesh.drawable.opacity, 1.0);
            assert!(s.mesh.drawable.visible);
        }
    }

    #[test]
    fn cross_section_pulses_per_sprout() {
        let mut r = response();
        let mut first = Vec::new();
        for t in [0.6f32, 0.62] {
            r.update(t);
            for s in r.sprouts() {
                assert_eq!(s.fade, 0.0);
                let expected = 1.0 + PULSE_AMPLITUDE * (t * PULSE_FREQUENCY + s.index as f32).sin();
                assert!((s.cross_section - expected).abs() < 1e-6);
                assert_eq!(s.mesh.drawable.scale, Vec3::splat(s.cross_section));
            }
            first.push(r.sprouts()[0].cross_section);
        }
        assert!((first[0] - first[1]).abs() > 0.01);
        let s = r.sprouts();
        assert!((s[0].cross_section - s[1].cross_section).abs() > 0.01);
    }

    #[test]
    fn sprouts_run_from_ring_to_center() {
        let mut r = response();
        r.update(0.3);
        let ring = VesselConfig::default().sprout_ring_radius;
        for s in r.sprouts() {
            let root = s.curve[0];
            let tip = s.curve[s.curve.len() - 1];
            assert!((Vec3::new(root.x, 0.0, root.z).length() - ring).abs() < 1e-4);
            assert!(tip.length() < 1e-5);
        }
    }

    #[test]
    fn clipping_planes_reach_late_sprouts() {
        let mut r = response();
        r.set_clipping_planes(&[ClippingPlane::new(Vec3::X, 0.0)]);
        r.update(0.35);
        for s in r.sprouts() {
            assert_eq!(s.mesh.drawable.clipping_planes().len(), 1);
        }
    }

    #[test]
    fn dispose_releases_sprouts() {
        let mut r = response();
        r.update(0.4);
        r.dispose();
        r.dispose();
        assert!(r.is_disposed());
        assert!(r.sprouts().is_empty());
        r.update(0.5);
        assert!(!r.sprouts_built());
    }
}
