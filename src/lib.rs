//! Scrubbable simulation core for cutaneous wound healing.
//!
//! Everything is driven by a single progress scalar `t ∈ [0, 1]` plus a frame
//! `dt`. See [`simulation::HealingSimulation`] for the per-frame order.

pub mod particles;
pub mod playback;
pub mod render;
pub mod simulation;
pub mod timeline;
pub mod vessels;
pub mod wound;

pub use particles::{ParticleAgent, ParticlePool, Species};
pub use simulation::HealingSimulation;
pub use timeline::{EventKey, SubscriptionId, TimelineController, TimelineEvent};
pub use vessels::{Vessel, VesselHandle, VesselResponse};
pub use wound::{ClotOverlay, WoundGeometry};
