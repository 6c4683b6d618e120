//! Per-species spawn rules and steering.
//!
//! Behaviors carry no state of their own beyond constants; anything that must
//! persist between frames (a macrophage's patrol target) lives on the agent.

use super::{LifecyclePhase, ParticleAgent};
use crate::render::Aabb;
use glam::Vec3;
use healing_common::vecmath::{angle_to_horizontal, clamp_horizontal_speed, horizontal_angle};
use healing_common::SpawnRule;
use rand::Rng;

/// Velocities are tuned per 1/60 s frame; `dt` is rescaled to that unit.
pub const REFERENCE_FPS: f32 = 60.0;

const PLATELET_RIM_GAIN: f32 = 0.02;
const PLATELET_JITTER: f32 = 0.0005;
const PLATELET_DAMPING: f32 = 0.98;

const NEUTROPHIL_GAIN: f32 = 0.0006;
const NEUTROPHIL_ARRIVAL_RADIUS: f32 = 0.1;
const NEUTROPHIL_PATROL_JITTER: f32 = 0.002;
const NEUTROPHIL_MAX_SPEED: f32 = 0.015;

const MACROPHAGE_GAIN: f32 = 0.0003;
const MACROPHAGE_ARRIVAL_RADIUS: f32 = 0.1;
const MACROPHAGE_OSCILLATION: f32 = 0.0002;
const MACROPHAGE_DAMPING: f32 = 0.92;
const MACROPHAGE_MAX_SPEED: f32 = 0.008;

const FIBROBLAST_GAIN: f32 = 0.0002;
const FIBROBLAST_DAMPING: f32 = 0.95;
const FIBROBLAST_MAX_SPEED: f32 = 0.005;

const MYOFIBROBLAST_GAIN: f32 = 0.0004;
const MYOFIBROBLAST_DAMPING: f32 = 0.9;
const MYOFIBROBLAST_MAX_SPEED: f32 = 0.004;

/// Wound-relative frame every behavior reads from. Rebuilt by the pool each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnContext {
    pub center: Vec3,
    /// Current spawn bounds of the wound.
    pub region: Aabb,
    /// Radius of the ring platelets aggregate on.
    pub rim_radius: f32,
}

impl SpawnContext {
    pub fn floor_y(&self) -> f32 {
        self.region.min.y
    }

    pub fn surface_y(&self) -> f32 {
        self.region.max.y
    }
}

/// The closed set of simulated cell types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Species {
    Platelet,
    Neutrophil,
    Macrophage,
    /// Remodeling-stage species; not part of the default composition.
    Fibroblast,
    Myofibroblast,
}

impl Species {
    pub const ALL: [Species; 5] = [
        Species::Platelet,
        Species::Neutrophil,
        Species::Macrophage,
        Species::Fibroblast,
        Species::Myofibroblast,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Species::Platelet => "platelet",
            Species::Neutrophil => "neutrophil",
            Species::Macrophage => "macrophage",
            Species::Fibroblast => "fibroblast",
            Species::Myofibroblast => "myofibroblast",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Species::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn default_spawn_rule(self) -> SpawnRule {
        match self {
            Species::Platelet => SpawnRule::WoundBounds,
            Species::Neutrophil => SpawnRule::Ring { inner: 1.2, outer: 1.7, below: 0.5, above: 0.3 },
            Species::Macrophage => SpawnRule::Ring { inner: 1.0, outer: 1.3, below: 0.5, above: 0.3 },
            Species::Fibroblast | Species::Myofibroblast => SpawnRule::WoundEdges,
        }
    }

    /// Picks a spawn point for a newly activated agent.
    pub fn spawn_position<R: Rng + ?Sized>(self, rule: &SpawnRule, ctx: &SpawnContext, rng: &mut R) -> Vec3 {
        match *rule {
            SpawnRule::WoundBounds => random_in_box(&ctx.region, rng),
            SpawnRule::Ring { inner, outer, below, above } => {
                let theta = rng.random_range(0.0..std::f32::consts::TAU);
                let radius = sample_range(rng, inner, outer);
                let mut p = ctx.center + angle_to_horizontal(theta) * radius;
                p.y = ctx.floor_y() + sample_range(rng, -below, above);
                p
            }
            SpawnRule::WoundEdges => {
                let half_w = ctx.region.size().x * 0.5;
                let side = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
                let x = ctx.center.x + side * half_w * sample_range(rng, 0.9, 1.1);
                let z = sample_range(rng, ctx.region.min.z, ctx.region.max.z);
                let depth = ctx.region.size().y;
                let y = ctx.surface_y() - sample_range(rng, 0.0, depth * 0.5);
                Vec3::new(x, y, z)
            }
        }
    }

    /// Persistent per-agent target assigned at spawn, for species that patrol.
    pub fn initial_target<R: Rng + ?Sized>(self, ctx: &SpawnContext, rng: &mut R) -> Option<Vec3> {
        match self {
            Species::Macrophage => Some(random_in_box(&ctx.region, rng)),
            _ => None,
        }
    }

    /// Updates velocity and position for one frame.
    pub fn steer<R: Rng + ?Sized>(self, agent: &mut ParticleAgent, ctx: &SpawnContext, dt: f32, rng: &mut R) {
        let k = dt * REFERENCE_FPS;
        match self {
            Species::Platelet => steer_platelet(agent, ctx, k, rng),
            Species::Neutrophil => steer_neutrophil(agent, ctx, k, rng),
            Species::Macrophage => steer_macrophage(agent, ctx, k, rng),
            Species::Fibroblast => steer_fibroblast(agent, ctx, k, rng, FIBROBLAST_GAIN, FIBROBLAST_DAMPING, FIBROBLAST_MAX_SPEED),
            Species::Myofibroblast => {
                steer_fibroblast(agent, ctx, k, rng, MYOFIBROBLAST_GAIN, MYOFIBROBLAST_DAMPING, MYOFIBROBLAST_MAX_SPEED);
                // Contractile cells also draw toward the wound center lengthwise.
                let dz = ctx.center.z - agent.position.z;
                agent.velocity.z += dz * MYOFIBROBLAST_GAIN * 0.5 * k;
            }
        }
    }
}

fn sample_range<R: Rng + ?Sized>(rng: &mut R, lo: f32, hi: f32) -> f32 {
    if hi > lo { rng.random_range(lo..hi) } else { lo }
}

fn random_in_box<R: Rng + ?Sized>(b: &Aabb, rng: &mut R) -> Vec3 {
    Vec3::new(
        sample_range(rng, b.min.x, b.max.x),
        sample_range(rng, b.min.y, b.max.y),
        sample_range(rng, b.min.z, b.max.z),
    )
}

fn jitter<R: Rng + ?Sized>(rng: &mut R, amount: f32) -> Vec3 {
    Vec3::new(
        rng.random_range(-0.5..0.5),
        rng.random_range(-0.5..0.5),
        rng.random_range(-0.5..0.5),
    ) * amount
}

// Drift to the nearest point of the rim ring, at the agent's own angle around the center.
fn steer_platelet<R: Rng + ?Sized>(agent: &mut ParticleAgent, ctx: &SpawnContext, k: f32, rng: &mut R) {
    let theta = horizontal_angle(agent.position - ctx.center);
    let mut rim = ctx.center + angle_to_horizontal(theta) * ctx.rim_radius;
    rim.y = ctx.surface_y();
    agent.target_position = Some(rim);

    agent.velocity += (rim - agent.position) * PLATELET_RIM_GAIN * k + jitter(rng, PLATELET_JITTER) * k;
    agent.velocity *= PLATELET_DAMPING;
    agent.position += agent.velocity * k;
}

// Chemotaxis toward the wound center, then a random-walk patrol once there.
fn steer_neutrophil<R: Rng + ?Sized>(agent: &mut ParticleAgent, ctx: &SpawnContext, k: f32, rng: &mut R) {
    let to_center = ctx.center - agent.position;
    if to_center.length() > NEUTROPHIL_ARRIVAL_RADIUS {
        agent.velocity += to_center.normalize_or_zero() * NEUTROPHIL_GAIN * k;
    } else {
        agent.velocity += jitter(rng, NEUTROPHIL_PATROL_JITTER) * k;
    }
    agent.velocity = agent.velocity.clamp_length_max(NEUTROPHIL_MAX_SPEED);
    agent.position += agent.velocity * k;

    let lo = ctx.floor_y() - 0.5;
    let hi = ctx.surface_y() + 0.3;
    if agent.position.y < lo || agent.position.y > hi {
        agent.position.y = agent.position.y.clamp(lo, hi);
        agent.velocity.y = 0.0;
    }
}

// Debris clearance: walk to a patrol point in the bed, pick a new one on arrival.
fn steer_macrophage<R: Rng + ?Sized>(agent: &mut ParticleAgent, ctx: &SpawnContext, k: f32, rng: &mut R) {
    let target = match agent.target_position {
        Some(t) if t.distance(agent.position) >= MACROPHAGE_ARRIVAL_RADIUS => t,
        _ => {
            let t = random_in_box(&ctx.region, rng);
            agent.target_position = Some(t);
            t
        }
    };

    agent.velocity += (target - agent.position).normalize_or_zero() * MACROPHAGE_GAIN * k;
    let phase = agent.slot as f32 * 0.7;
    agent.velocity.y += (agent.life * 1.5 + phase).sin() * MACROPHAGE_OSCILLATION * k;
    agent.velocity *= MACROPHAGE_DAMPING;
    agent.velocity = agent.velocity.clamp_length_max(MACROPHAGE_MAX_SPEED);
    agent.position += agent.velocity * k;
}

// Edge-to-midline migration shared by both remodeling species.
fn steer_fibroblast<R: Rng + ?Sized>(
    agent: &mut ParticleAgent,
    ctx: &SpawnContext,
    k: f32,
    rng: &mut R,
    gain: f32,
    damping: f32,
    max_speed: f32,
) {
    let dx = ctx.center.x - agent.position.x;
    agent.velocity.x += dx * gain * k;
    agent.velocity.z += rng.random_range(-0.5..0.5) * gain * k;
    agent.velocity *= damping;
    agent.velocity = clamp_horizontal_speed(agent.velocity, max_speed);
    agent.position += agent.velocity * k;
    agent.position.y = agent.position.y.clamp(ctx.floor_y(), ctx.surface_y());
    if agent.phase == LifecyclePhase::Fading {
        agent.velocity *= 0.5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ctx() -> SpawnContext {
        SpawnContext {
            center: Vec3::new(0.0, -0.25, 0.0),
            region: Aabb::new(Vec3::new(-0.4, -0.5, -1.0), Vec3::new(0.4, 0.0, 1.0)),
            rim_radius: 0.35,
        }
    }

    fn agent_at(p: Vec3) -> ParticleAgent {
        let mut a = ParticleAgent::inactive(3);
        a.active = true;
        a.position = p;
        a.phase = LifecyclePhase::Active;
        a
    }

    #[test]
    fn ids_round_trip() {
        for s in Species::ALL {
            assert_eq!(Species::from_id(s.id()), Some(s));
        }
        assert_eq!(Species::from_id("mast_cell"), None);
    }

    #[test]
    fn platelets_spawn_inside_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let c = ctx();
        for _ in 0..200 {
            let p = Species::Platelet.spawn_position(&SpawnRule::WoundBounds, &c, &mut rng);
            assert!(c.region.contains(p));
        }
    }

    #[test]
    fn neutrophils_spawn_on_outer_ring() {
        let mut rng = StdRng::seed_from_u64(11);
        let c = ctx();
        let rule = Species::Neutrophil.default_spawn_rule();
        for _ in 0..200 {
            let p = Species::Neutrophil.spawn_position(&rule, &c, &mut rng);
            let r = Vec3::new(p.x - c.center.x, 0.0, p.z - c.center.z).length();
            assert!((1.2 - 1e-4..=1.7 + 1e-4).contains(&r), "radius {}", r);
            assert!(p.y >= c.floor_y() - 0.5 - 1e-5 && p.y <= c.floor_y() + 0.3 + 1e-5);
        }
    }

    #[test]
    fn platelet_heads_for_rim_point_at_its_own_angle() {
        let mut rng = StdRng::seed_from_u64(1);
        let c = ctx();
        let mut a = agent_at(Vec3::new(0.05, -0.3, 0.05));
        for _ in 0..600 {
            Species::Platelet.steer(&mut a, &c, 1.0 / 60.0, &mut rng);
        }
        let r = Vec3::new(a.position.x, 0.0, a.position.z).length();
        assert!((r - c.rim_radius).abs() < 0.05, "settled at radius {}", r);
        // stays on the +x/+z side it started on
        assert!(a.position.x > 0.0 && a.position.z > 0.0);
    }

    #[test]
    fn neutrophil_speed_is_capped_and_it_approaches_center() {
        let mut rng = StdRng::seed_from_u64(2);
        let c = ctx();
        let mut a = agent_at(Vec3::new(1.5, -0.5, 0.0));
        let start = a.position.distance(c.center);
        for _ in 0..300 {
            Species::Neutrophil.steer(&mut a, &c, 1.0 / 60.0, &mut rng);
            assert!(a.velocity.length() <= NEUTROPHIL_MAX_SPEED + 1e-6);
            assert!(a.position.y >= c.floor_y() - 0.5 - 1e-5 && a.position.y <= c.surface_y() + 0.3 + 1e-5);
        }
        assert!(a.position.distance(c.center) < start);
    }

    #[test]
    fn macrophage_keeps_target_until_arrival() {
        let mut rng = StdRng::seed_from_u64(3);
        let c = ctx();
        let mut a = agent_at(Vec3::new(1.2, -0.4, 0.0));
        a.target_position = Some(Vec3::new(0.0, -0.4, 0.0));
        Species::Macrophage.steer(&mut a, &c, 1.0 / 60.0, &mut rng);
        assert_eq!(a.target_position, Some(Vec3::new(0.0, -0.4, 0.0)));
        assert!(a.velocity.length() <= MACROPHAGE_MAX_SPEED + 1e-6);

        a.position = Vec3::new(0.02, -0.4, 0.0);
        Species::Macrophage.steer(&mut a, &c, 1.0 / 60.0, &mut rng);
        let new_target = a.target_position.unwrap();
        assert_ne!(new_target, Vec3::new(0.0, -0.4, 0.0));
        assert!(c.region.contains(new_target));
    }

    #[test]
    fn macrophage_bobs_vertically_while_patrolling() {
        let mut rng = StdRng::seed_from_u64(6);
        let c = ctx();
        let start = Vec3::new(-0.3, -0.25, 0.0);
        let mut a = agent_at(start);
        a.target_position = Some(Vec3::new(0.3, -0.25, 0.0));
        let dt = 1.0 / 60.0;
        let (mut lo, mut hi) = (0.0f32, 0.0f32);
        for _ in 0..360 {
            a.life += dt;
            // Level with the target, so the pull toward it has no vertical part.
            a.position = start;
            Species::Macrophage.steer(&mut a, &c, dt, &mut rng);
            lo = lo.min(a.velocity.y);
            hi = hi.max(a.velocity.y);
        }
        assert!(hi > 0.001 && lo < -0.001, "velocity.y stayed in [{}, {}]", lo, hi);
        assert!(a.velocity.length() <= MACROPHAGE_MAX_SPEED + 1e-6);
        assert_eq!(a.target_position, Some(Vec3::new(0.3, -0.25, 0.0)));
    }

    #[test]
    fn macrophages_are_slower_than_neutrophils() {
        let mut rng = StdRng::seed_from_u64(4);
        let c = ctx();
        let mut n = agent_at(Vec3::new(1.5, -0.5, 0.0));
        let mut m = agent_at(Vec3::new(1.5, -0.5, 0.0));
        m.target_position = Some(c.center);
        for _ in 0..20 {
            Species::Neutrophil.steer(&mut n, &c, 1.0 / 60.0, &mut rng);
            Species::Macrophage.steer(&mut m, &c, 1.0 / 60.0, &mut rng);
        }
        assert!(m.velocity.length() < n.velocity.length());
    }

    #[test]
    fn fibroblasts_move_toward_midline() {
        let mut rng = StdRng::seed_from_u64(5);
        let c = ctx();
        for species in [Species::Fibroblast, Species::Myofibroblast] {
            let rule = species.default_spawn_rule();
            let p = species.spawn_position(&rule, &c, &mut rng);
            let mut a = agent_at(p);
            let start = (a.position.x - c.center.x).abs();
            for _ in 0..600 {
                species.steer(&mut a, &c, 1.0 / 60.0, &mut rng);
            }
            assert!((a.position.x - c.center.x).abs() < start);
        }
    }
}
