use crate::particles::{ParticlePool, SpawnContext, Species};
use crate::render::ClippingPlane;
use crate::timeline::{EventKey, SubscriptionId, TimelineController, TimelineEvent};
use crate::vessels::{VesselHandle, VesselResponse};
use crate::wound::{ClotOverlay, WoundGeometry};
use anyhow::Result;
use healing_common::{HealingConfig, SimParams, Snapshot, SpeciesSnapshot};
use log::{debug, info, trace};
use rand::prelude::*;

/// Offsets the configured seed per component so pools don't share a stream.
const CLOT_SEED_OFFSET: u64 = 100;
const VESSEL_SEED_OFFSET: u64 = 101;

/// Owns every component of the healing process and runs them in a fixed order each frame.
///
/// Order per frame: timeline → wound geometry (+ clot) → particle pools → vessels.
/// Every component derives its state from `t`; only agent motion integrates `dt`.
pub struct HealingSimulation {
    /// The configuration the simulation was built from. Immutable after construction.
    config: HealingConfig,
    timeline: TimelineController,
    wound: WoundGeometry,
    clot: ClotOverlay,
    /// One pool per enabled species, in [`Species::ALL`] order.
    pools: Vec<ParticlePool>,
    vessels: VesselResponse,
    /// Stores collected snapshots at record intervals.
    recorded_snapshots: Vec<Snapshot>,
    disposed: bool,
}

impl std::fmt::Debug for HealingSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealingSimulation")
            .field("timeline", &self.timeline)
            .field("pools", &self.pools.iter().map(|p| p.species().id()).collect::<Vec<_>>())
            .field("vessels", &self.vessels)
            .field("disposed", &self.disposed)
            .finish()
    }
}

fn component_rng(seed: Option<u64>, offset: u64) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s.wrapping_add(offset)),
        None => StdRng::from_os_rng(),
    }
}

impl HealingSimulation {
    /// Validates the configuration and builds every component at `t = 0`.
    pub fn new(config: HealingConfig) -> Result<Self> {
        config.validate()?;
        let seed = config.playback.seed;

        let timeline = TimelineController::new(&config.timeline)?;
        let wound = WoundGeometry::new(&config.wound)?;
        let clot = ClotOverlay::new(&config.clot, wound.surface_position(), &mut component_rng(seed, CLOT_SEED_OFFSET))?;

        let context = SpawnContext {
            center: wound.wound_center(),
            region: wound.current_spawn_bounds(0.0),
            rim_radius: config.wound.platelet_rim_radius,
        };
        let mut pools = Vec::new();
        for (i, species) in Species::ALL.iter().enumerate() {
            let Some(species_config) = config.species.get(species.id()) else { continue };
            if !species_config.enabled {
                debug!("Species '{}' disabled; no pool created.", species.id());
                continue;
            }
            pools.push(ParticlePool::new(*species, species_config, context, component_rng(seed, i as u64))?);
        }

        let vessels = VesselResponse::new(
            &config.vessels,
            wound.wound_center(),
            wound.wound_radius(),
            component_rng(seed, VESSEL_SEED_OFFSET),
        );

        info!(
            "Healing simulation ready: {} pools ({} agent slots), {} phases, {} milestones.",
            pools.len(),
            pools.iter().map(ParticlePool::capacity).sum::<usize>(),
            timeline.phases().len(),
            timeline.milestones().len()
        );

        let mut sim = Self {
            config,
            timeline,
            wound,
            clot,
            pools,
            vessels,
            recorded_snapshots: Vec::new(),
            disposed: false,
        };
        sim.wound.update_contraction(0.0);
        sim.clot.update(0.0);
        Ok(sim)
    }

    /// Advances one frame: `t` is timeline progress, `dt` the (already clamped) frame time in seconds.
    pub fn tick(&mut self, t: f32, dt: f32) {
        if self.disposed {
            return;
        }

        // --- 1. Timeline ---
        self.timeline.set_progress(t);
        let t = self.timeline.progress();

        // --- 2. Wound geometry and clot ---
        self.wound.update_contraction(t);
        self.clot.update(t);
        let region = self.wound.current_spawn_bounds(t);
        let center = self.wound.wound_center();

        // --- 3. Particle pools ---
        for pool in &mut self.pools {
            pool.set_spawn_region(region);
            pool.set_wound_center(center);
            pool.update(t, dt);
        }

        // --- 4. Vessels ---
        self.vessels.update(t);

        trace!("tick t={:.4} dt={:.4} active={}", t, dt, self.total_active());
    }

    /// Jumps to `t` without advancing agent motion. Pools settle to their
    /// target count at once: agents past the target are removed, not faded.
    pub fn set_progress(&mut self, t: f32) {
        self.tick(t, 0.0);
    }

    pub fn subscribe<F>(&mut self, key: EventKey, callback: F) -> SubscriptionId
    where
        F: FnMut(f32, &TimelineEvent) + 'static,
    {
        self.timeline.subscribe(key, callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.timeline.unsubscribe(id)
    }

    /// Registers host-owned vessels, measured against the wound as it is now.
    pub fn register_vessels(&mut self, handles: &[VesselHandle]) {
        self.vessels.set_wound(self.wound.wound_center(), self.wound.wound_radius());
        self.vessels.register_vessels(handles);
    }

    /// Fans the planes out to every drawable the simulation owns.
    pub fn set_clipping_planes(&mut self, planes: &[ClippingPlane]) {
        self.wound.set_clipping_planes(planes);
        self.clot.set_clipping_planes(planes);
        for pool in &mut self.pools {
            pool.set_clipping_planes(planes);
        }
        self.vessels.set_clipping_planes(planes);
    }

    /// Captures the current state. `time` is wall-clock playback time in seconds.
    pub fn snapshot(&self, time: f32, include_positions: bool) -> Snapshot {
        let t = self.timeline.progress();
        let species = self
            .pools
            .iter()
            .map(|pool| SpeciesSnapshot {
                species: pool.species().id().to_string(),
                active: pool.active_count() as u32,
                target: pool.target_count(t) as u32,
                positions: include_positions
                    .then(|| pool.active_agents().map(|a| (a.position.x, a.position.y, a.position.z)).collect()),
            })
            .collect();

        let bounds = self.wound.wound_bounds();
        let size = bounds.size();
        let center = bounds.center();

        Snapshot {
            time,
            progress: t,
            phase: self.timeline.current_phase().id.clone(),
            phase_progress: self.timeline.phase_progress(),
            fired_events: self.timeline.fired_events().into_iter().map(|m| m.id.clone()).collect(),
            species,
            wound_center: (center.x, center.y, center.z),
            wound_width: size.x,
            wound_depth: size.y,
            wound_length: size.z,
            clot_opacity: self.clot.opacity(),
            clot_radius: self.clot.radius(),
            dilation_factor: self.vessels.dilation(),
            visible_sprouts: self.vessels.visible_sprout_count() as u32,
        }
    }

    /// Records a snapshot into the internal buffer.
    pub fn record_snapshot(&mut self, time: f32) {
        let snapshot = self.snapshot(time, self.config.output.save_positions_in_snapshot);
        debug!(
            "Recorded snapshot at {:.2}s (t={:.3}, phase '{}', {} active agents)",
            time,
            snapshot.progress,
            snapshot.phase,
            snapshot.total_active()
        );
        self.recorded_snapshots.push(snapshot);
    }

    pub fn get_recorded_snapshots(&self) -> &Vec<Snapshot> {
        &self.recorded_snapshots
    }

    pub fn total_active(&self) -> usize {
        self.pools.iter().map(ParticlePool::active_count).sum()
    }

    pub fn config(&self) -> &HealingConfig {
        &self.config
    }

    pub fn params(&self) -> SimParams {
        self.config.get_sim_params()
    }

    pub fn timeline(&self) -> &TimelineController {
        &self.timeline
    }

    pub fn wound(&self) -> &WoundGeometry {
        &self.wound
    }

    pub fn clot(&self) -> &ClotOverlay {
        &self.clot
    }

    pub fn pools(&self) -> &[ParticlePool] {
        &self.pools
    }

    pub fn pool(&self, species: Species) -> Option<&ParticlePool> {
        self.pools.iter().find(|p| p.species() == species)
    }

    pub fn vessels(&self) -> &VesselResponse {
        &self.vessels
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Releases every buffer synchronously. Further ticks are no-ops.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.wound.dispose();
        self.clot.dispose();
        for pool in &mut self.pools {
            pool.dispose();
        }
        self.vessels.dispose();
        self.disposed = true;
        info!("Healing simulation disposed.");
    }
}

impl Drop for HealingSimulation {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn seeded() -> HealingSimulation {
        let mut config = HealingConfig::default();
        config.playback.seed = Some(42);
        HealingSimulation::new(config).unwrap()
    }

    #[test]
    fn default_composition_has_three_pools() {
        let sim = seeded();
        let ids: Vec<_> = sim.pools().iter().map(|p| p.species()).collect();
        assert_eq!(ids, vec![Species::Platelet, Species::Neutrophil, Species::Macrophage]);
    }

    #[test]
    fn enabling_fibroblasts_adds_a_pool() {
        let mut config = HealingConfig::default();
        config.playback.seed = Some(1);
        if let Some(f) = config.species.get_mut("fibroblast") {
            f.enabled = true;
        }
        let sim = HealingSimulation::new(config).unwrap();
        assert!(sim.pool(Species::Fibroblast).is_some());
        assert!(sim.pool(Species::Myofibroblast).is_none());
    }

    #[test]
    fn missing_required_species_is_rejected() {
        let mut config = HealingConfig::default();
        config.species.remove("macrophage");
        assert!(HealingSimulation::new(config).is_err());
    }

    #[test]
    fn clipping_planes_reach_every_drawable() {
        let mut sim = seeded();
        sim.set_progress(0.4);
        sim.set_clipping_planes(&[ClippingPlane::new(Vec3::Z, 0.0)]);
        assert_eq!(sim.wound().cavity().drawable.clipping_planes().len(), 1);
        assert_eq!(sim.wound().rim().drawable.clipping_planes().len(), 1);
        assert_eq!(sim.clot().disc().drawable.clipping_planes().len(), 1);
        for pool in sim.pools() {
            assert_eq!(pool.instances().drawable.clipping_planes().len(), 1);
        }
        for sprout in sim.vessels().sprouts() {
            assert_eq!(sprout.mesh.drawable.clipping_planes().len(), 1);
        }
    }

    #[test]
    fn snapshot_reflects_components() {
        let mut sim = seeded();
        sim.set_progress(0.2);
        let snap = sim.snapshot(1.0, true);
        assert_eq!(snap.phase, "inflammatory");
        assert_eq!(snap.species.len(), 3);
        for s in &snap.species {
            assert_eq!(s.positions.as_ref().map(Vec::len), Some(s.active as usize));
        }
        assert!(snap.fired_events.contains(&"macrophage_arrival".to_string()));
        assert!((snap.wound_width - sim.wound().current_width(0.2)).abs() < 1e-4);
        assert_eq!(snap.dilation_factor, 1.5);

        let without = sim.snapshot(1.0, false);
        assert!(without.species.iter().all(|s| s.positions.is_none()));
    }

    #[test]
    fn record_snapshot_buffers() {
        let mut sim = seeded();
        sim.record_snapshot(0.0);
        sim.tick(0.1, 1.0 / 60.0);
        sim.record_snapshot(1.0 / 60.0);
        assert_eq!(sim.get_recorded_snapshots().len(), 2);
    }

    #[test]
    fn dispose_is_idempotent_and_stops_ticks() {
        let mut sim = seeded();
        sim.set_progress(0.4);
        sim.dispose();
        sim.dispose();
        assert!(sim.is_disposed());
        assert!(sim.wound().is_disposed());
        assert!(sim.clot().is_disposed());
        assert!(sim.pools().iter().all(ParticlePool::is_disposed));
        assert!(sim.vessels().is_disposed());
        sim.tick(0.9, 1.0 / 60.0);
        assert_eq!(sim.timeline().progress(), 0.4);
    }
}
