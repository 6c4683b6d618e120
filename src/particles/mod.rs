//! Fixed-capacity agent pools, one per species.
//!
//! A pool owns an arena of [`ParticleAgent`] slots, reuses them by index and
//! never allocates after construction. Population follows the species'
//! envelope in `t`; movement is delegated to [`Species::steer`].

pub mod species;

use crate::render::{Aabb, ClippingPlane, InstanceBuffer};
use anyhow::Result;
use glam::Vec3;
use healing_common::{color_from_array, ease_in_out_cubic, ease_out_cubic, SpawnRule, SpeciesConfig};
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, UnitBall};

pub use species::{SpawnContext, Species};

/// Life-seconds over which a new agent scales in.
const SPAWN_RAMP_SECONDS: f32 = 0.3;
/// Fraction of `max_life` a fading agent takes to shrink out.
const FADE_FRACTION: f32 = 0.2;
const INITIAL_SPEED: f32 = 0.002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Spawning,
    Active,
    Fading,
}

/// One pooled agent slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleAgent {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Seconds since activation.
    pub life: f32,
    /// Lifetime scale in [0.8, 1.2); sets the fade window.
    pub max_life: f32,
    pub active: bool,
    pub target_position: Option<Vec3>,
    pub phase: LifecyclePhase,
    /// `life` at the moment the agent started fading.
    pub fade_started_at: f32,
    /// Lifecycle scale when fading began; the shrink starts here.
    pub fade_start_scale: f32,
    /// Index of this agent in its pool.
    pub slot: usize,
}

impl ParticleAgent {
    pub fn inactive(slot: usize) -> Self {
        ParticleAgent {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            life: 0.0,
            max_life: 1.0,
            active: false,
            target_position: None,
            phase: LifecyclePhase::Spawning,
            fade_started_at: 0.0,
            fade_start_scale: 1.0,
            slot,
        }
    }

    pub fn fade_duration(&self) -> f32 {
        self.max_life * FADE_FRACTION
    }

    pub fn time_fading(&self) -> f32 {
        (self.life - self.fade_started_at).max(0.0)
    }

    /// Visible scale factor (0..1) from the lifecycle alone.
    pub fn lifecycle_scale(&self) -> f32 {
        match self.phase {
            LifecyclePhase::Spawning => (self.life / SPAWN_RAMP_SECONDS).min(1.0),
            LifecyclePhase::Active => 1.0,
            LifecyclePhase::Fading => {
                self.fade_start_scale * (1.0 - self.time_fading() / self.fade_duration()).max(0.0)
            }
        }
    }
}

/// Population envelope: 0 before arrival, eased rise to the peak, plateau,
/// then an eased decline that completes in half the remaining span.
pub fn target_count(config: &SpeciesConfig, t: f32) -> usize {
    let max = config.max_count as f32;
    let count = if t < config.arrival_t {
        0.0
    } else if t < config.peak_t {
        let x = (t - config.arrival_t) / (config.peak_t - config.arrival_t);
        (max * ease_out_cubic(x)).floor()
    } else if t < config.decline_t {
        max
    } else {
        let span = 1.0 - config.decline_t;
        let x = if span > 0.0 { (2.0 * (t - config.decline_t) / span).min(1.0) } else { 1.0 };
        (max * (1.0 - ease_in_out_cubic(x))).floor()
    };
    (count.max(0.0) as usize).min(config.max_count)
}

/// Fixed-capacity pool of agents for one species.
#[derive(Debug)]
pub struct ParticlePool {
    species: Species,
    config: SpeciesConfig,
    spawn_rule: SpawnRule,
    agents: Vec<ParticleAgent>,
    active_count: usize,
    context: SpawnContext,
    instances: InstanceBuffer,
    rng: StdRng,
    disposed: bool,
}

impl ParticlePool {
    /// Creates a pool with every slot inactive.
    ///
    /// Fails if the species entry is malformed; a bad envelope would otherwise
    /// skew the population curve with no visible error.
    pub fn new(species: Species, config: &SpeciesConfig, context: SpawnContext, rng: StdRng) -> Result<Self> {
        config.validate(species.id())?;
        let capacity = config.max_count;
        let agents = (0..capacity).map(ParticleAgent::inactive).collect();
        let spawn_rule = config.spawn.unwrap_or_else(|| species.default_spawn_rule());
        debug!("Created {} pool with {} slots ({:?}).", species.id(), capacity, spawn_rule);

        Ok(Self {
            species,
            config: config.clone(),
            spawn_rule,
            agents,
            active_count: 0,
            context,
            instances: InstanceBuffer::new(species.id(), capacity, color_from_array(config.color)),
            rng,
            disposed: false,
        })
    }

    pub fn species(&self) -> Species {
        self.species
    }

    pub fn config(&self) -> &SpeciesConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.agents.len()
    }

    /// Number of occupied slots, fading agents included.
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn target_count(&self, t: f32) -> usize {
        target_count(&self.config, t)
    }

    pub fn agents(&self) -> &[ParticleAgent] {
        &self.agents
    }

    pub fn active_agents(&self) -> impl Iterator<Item = &ParticleAgent> {
        self.agents.iter().filter(|a| a.active)
    }

    pub fn context(&self) -> &SpawnContext {
        &self.context
    }

    pub fn set_spawn_region(&mut self, region: Aabb) {
        self.context.region = region;
    }

    pub fn set_wound_center(&mut self, center: Vec3) {
        self.context.center = center;
    }

    pub fn set_clipping_planes(&mut self, planes: &[ClippingPlane]) {
        self.instances.drawable.set_clipping_planes(planes);
    }

    pub fn instances(&self) -> &InstanceBuffer {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut InstanceBuffer {
        &mut self.instances
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Advances the pool one frame at timeline progress `t`.
    ///
    /// With `dt == 0` (a scrub with no time passing) agents that are fading
    /// are removed at once, so the pool lands on `target_count(t)` in one call.
    pub fn update(&mut self, t: f32, dt: f32) {
        if self.disposed {
            return;
        }
        let target = self.target_count(t);
        let settled = self.agents.iter().filter(|a| a.active && a.phase != LifecyclePhase::Fading).count();

        if settled < target {
            self.spawn(target - settled);
        } else if settled > target {
            self.begin_fading(settled - target);
        }

        let jump = dt <= 0.0;
        let mut touched = false;
        let size = self.config.size;
        for i in 0..self.agents.len() {
            if !self.agents[i].active {
                continue;
            }
            touched = true;
            let agent = &mut self.agents[i];
            agent.life += dt;
            self.species.steer(agent, &self.context, dt, &mut self.rng);

            if agent.phase == LifecyclePhase::Fading && (jump || agent.time_fading() > agent.fade_duration()) {
                agent.active = false;
                agent.target_position = None;
                self.active_count -= 1;
                self.instances.set_transform(i, agent.position, 0.0);
                continue;
            }
            if agent.phase == LifecyclePhase::Spawning && agent.life >= SPAWN_RAMP_SECONDS {
                agent.phase = LifecyclePhase::Active;
            }
            let scale = size * agent.lifecycle_scale();
            self.instances.set_transform(i, agent.position, scale);
        }

        if touched {
            self.instances.mark_dirty();
        }
    }

    // Linear scan for free slots. A full pool is a silent no-op.
    fn spawn(&mut self, wanted: usize) {
        let mut spawned = 0;
        for i in 0..self.agents.len() {
            if spawned == wanted {
                break;
            }
            if self.agents[i].active {
                continue;
            }
            let position = self.species.spawn_position(&self.spawn_rule, &self.context, &mut self.rng);
            let target_position = self.species.initial_target(&self.context, &mut self.rng);
            let dir: [f32; 3] = UnitBall.sample(&mut self.rng);
            let max_life = self.rng.random_range(0.8..1.2);

            let agent = &mut self.agents[i];
            agent.position = position;
            agent.velocity = Vec3::from_array(dir) * INITIAL_SPEED;
            agent.life = 0.0;
            agent.max_life = max_life;
            agent.active = true;
            agent.target_position = target_position;
            agent.phase = LifecyclePhase::Spawning;
            agent.fade_started_at = 0.0;
            agent.fade_start_scale = 1.0;
            self.instances.set_transform(i, position, 0.0);
            spawned += 1;
        }
        self.active_count += spawned;
        if spawned < wanted {
            trace!("{} pool full: wanted {}, spawned {}.", self.species.id(), wanted, spawned);
        }
    }

    // Marks agents as fading, scanning from the end of the pool.
    fn begin_fading(&mut self, excess: usize) {
        let mut marked = 0;
        for agent in self.agents.iter_mut().rev() {
            if marked == excess {
                break;
            }
            if agent.active && agent.phase != LifecyclePhase::Fading {
                agent.fade_start_scale = agent.lifecycle_scale();
                agent.phase = LifecyclePhase::Fading;
                agent.fade_started_at = agent.life;
                marked += 1;
            }
        }
        trace!("{} pool: {} agent(s) started fading.", self.species.id(), marked);
    }

    /// Releases the agent arena and instance storage. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.agents = Vec::new();
        self.active_count = 0;
        self.instances.release();
        self.disposed = true;
        debug!("Disposed {} pool.", self.species.id());
    }
}
