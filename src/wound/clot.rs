//! Clot/scab overlay drawn over the wound opening.

use crate::render::{ClippingPlane, MeshBuffer};
use anyhow::Result;
use glam::Vec3;
use healing_common::{color_from_array, color_ramp, ease_out_cubic, window, ClotConfig, Color};
use log::debug;
use rand::rngs::StdRng;
use rand::Rng;
use std::f32::consts::TAU;

const DISC_SEGMENTS: u32 = 32;
/// Disc is stretched along the wound's length axis.
const LENGTH_STRETCH: f32 = 1.8;
/// Fraction of the disc lost while it detaches.
const SHRINK: f32 = 0.4;
const HIDDEN_BELOW: f32 = 1e-3;

const CLOT_FRESH: [f32; 3] = [0.55, 0.08, 0.06];
const CLOT_DARK: [f32; 3] = [0.30, 0.06, 0.04];
const CLOT_SCAB: [f32; 3] = [0.35, 0.20, 0.12];
const CLOT_DRIED: [f32; 3] = [0.55, 0.42, 0.30];

#[derive(Debug)]
pub struct ClotOverlay {
    config: ClotConfig,
    anchor: Vec3,
    disc: MeshBuffer,
    /// RGBA8 noise texture, `texture_size²` texels, alpha falling off toward the rim.
    texture: Vec<u8>,
    stops: [(f32, Color); 4],
    opacity: f32,
    disposed: bool,
}

impl ClotOverlay {
    /// Builds the disc and its noise texture, anchored at the wound's surface center.
    pub fn new(config: &ClotConfig, anchor: Vec3, rng: &mut StdRng) -> Result<Self> {
        if config.radius <= 0.0 {
            anyhow::bail!("clot radius must be positive.");
        }
        if config.texture_size == 0 {
            anyhow::bail!("clot texture_size must be at least 1.");
        }

        let (positions, indices) = build_disc(config.radius);
        let stops = [
            (config.fade_in_start_t, color_from_array(CLOT_FRESH)),
            (0.15, color_from_array(CLOT_DARK)),
            (0.40, color_from_array(CLOT_SCAB)),
            (config.fade_out_start_t.max(0.40) + 0.30, color_from_array(CLOT_DRIED)),
        ];
        let mut disc = MeshBuffer::new("clot_overlay", positions, indices, stops[0].1);
        disc.drawable.offset = anchor;
        disc.drawable.scale = Vec3::new(1.0, 1.0, LENGTH_STRETCH);
        disc.drawable.visible = false;
        disc.drawable.opacity = 0.0;

        let texture = noise_texture(config.texture_size as usize, rng);
        debug!("Built clot overlay with {}x{} texture.", config.texture_size, config.texture_size);

        Ok(Self {
            config: config.clone(),
            anchor,
            disc,
            texture,
            stops,
            opacity: 0.0,
            disposed: false,
        })
    }

    pub fn update(&mut self, t: f32) {
        if self.disposed {
            return;
        }
        let c = &self.config;
        let fade_in = ease_out_cubic(window(t, c.fade_in_start_t, c.fade_in_end_t));
        let fade_out = ease_out_cubic(window(t, c.fade_out_start_t, c.fade_out_end_t));

        self.opacity = fade_in * (1.0 - fade_out);
        let shrink = 1.0 - SHRINK * fade_out;
        let d = &mut self.disc.drawable;
        d.opacity = self.opacity;
        d.visible = self.opacity > HIDDEN_BELOW;
        d.color = color_ramp(&self.stops, t);
        d.scale = Vec3::new(shrink, 1.0, shrink * LENGTH_STRETCH);
        d.offset = self.anchor + Vec3::new(0.0, c.lift * fade_out, 0.0);
    }

    /// Moves the overlay, e.g. when the wound center shifts during contraction.
    pub fn set_anchor(&mut self, anchor: Vec3) {
        self.anchor = anchor;
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn is_visible(&self) -> bool {
        self.disc.drawable.visible
    }

    /// Current world radius across the wound.
    pub fn radius(&self) -> f32 {
        self.config.radius * self.disc.drawable.scale.x
    }

    pub fn disc(&self) -> &MeshBuffer {
        &self.disc
    }

    pub fn texture(&self) -> &[u8] {
        &self.texture
    }

    pub fn texture_size(&self) -> u32 {
        self.config.texture_size
    }

    pub fn set_clipping_planes(&mut self, planes: &[ClippingPlane]) {
        self.disc.drawable.set_clipping_planes(planes);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disc.release();
        self.texture = Vec::new();
        self.opacity = 0.0;
        self.disposed = true;
    }
}

fn build_disc(radius: f32) -> (Vec<Vec3>, Vec<u32>) {
    let mut positions = Vec::with_capacity(DISC_SEGMENTS as usize + 1);
    positions.push(Vec3::ZERO);
    for i in 0..DISC_SEGMENTS {
        let a = i as f32 / DISC_SEGMENTS as f32 * TAU;
        positions.push(Vec3::new(a.cos() * radius, 0.0, a.sin() * radius));
    }
    let mut indices = Vec::with_capacity(DISC_SEGMENTS as usize * 3);
    for i in 0..DISC_SEGMENTS {
        let a = 1 + i;
        let b = 1 + (i + 1) % DISC_SEGMENTS;
        // winding keeps the face pointing up
        indices.extend_from_slice(&[0, b, a]);
    }
    (positions, indices)
}

// Grainy dark blotches with a soft radial alpha edge.
fn noise_texture(size: usize, rng: &mut StdRng) -> Vec<u8> {
    let mut texels = Vec::with_capacity(size * size * 4);
    let half = size as f32 * 0.5;
    for y in 0..size {
        for x in 0..size {
            let dx = (x as f32 + 0.5 - half) / half;
            let dy = (y as f32 + 0.5 - half) / half;
            let r = (dx * dx + dy * dy).sqrt();
            let grain: f32 = rng.random_range(0.55..1.0);
            let edge = (1.0 - r).clamp(0.0, 1.0);
            let alpha = (edge * 2.0).min(1.0) * rng.random_range(0.8f32..1.0);
            let shade = (grain * 255.0) as u8;
            texels.extend_from_slice(&[shade, shade, shade, (alpha * 255.0) as u8]);
        }
    }
    texels
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn overlay() -> ClotOverlay {
        let mut rng = StdRng::seed_from_u64(7);
        ClotOverlay::new(&ClotConfig::default(), Vec3::ZERO, &mut rng).unwrap()
    }

    #[test]
    fn hidden_at_start_and_after_shedding() {
        let mut c = overlay();
        c.update(0.0);
        assert!(!c.is_visible());
        assert_eq!(c.opacity(), 0.0);
        c.update(0.75);
        assert!(!c.is_visible());
        c.update(1.0);
        assert!(!c.is_visible());
    }

    #[test]
    fn fully_formed_between_fades() {
        let mut c = overlay();
        c.update(0.2);
        assert!(c.is_visible());
        assert!((c.opacity() - 1.0).abs() < 1e-6);
        assert!((c.radius() - ClotConfig::default().radius).abs() < 1e-6);
    }

    #[test]
    fn mostly_faded_mid_proliferation() {
        let mut c = overlay();
        c.update(0.5);
        assert!(c.opacity() < 0.3, "opacity {}", c.opacity());
        assert!(c.radius() < ClotConfig::default().radius);
        assert!(c.disc().drawable.offset.y > 0.0);
    }

    #[test]
    fn scrubbing_back_restores_state() {
        let mut c = overlay();
        c.update(0.2);
        let (op, color) = (c.opacity(), c.disc().drawable.color);
        c.update(0.7);
        c.update(0.2);
        assert_eq!(c.opacity(), op);
        assert_eq!(c.disc().drawable.color, color);
    }

    #[test]
    fn texture_has_soft_edge() {
        let c = overlay();
        let size = c.texture_size() as usize;
        assert_eq!(c.texture().len(), size * size * 4);
        let corner_alpha = c.texture()[3];
        let center = (size / 2 * size + size / 2) * 4;
        assert_eq!(corner_alpha, 0);
        assert!(c.texture()[center + 3] > 150);
    }

    #[test]
    fn disc_faces_up() {
        let c = overlay();
        assert!(c.disc().normal(0).unwrap().y > 0.99);
    }
}
