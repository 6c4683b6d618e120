pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    ClotConfig, HealingConfig, MilestoneEvent, OutputConfig, Phase, PlaybackConfig, SpawnRule,
    SpeciesConfig, TimelineConfig, VesselConfig, WoundConfig, REQUIRED_SPECIES,
};
pub use sim_params::SimParams;
pub use snapshot::{Snapshot, SpeciesSnapshot};
pub use vecmath::{clamp, clamp01, color_from_array, color_ramp, ease_in_out_cubic, ease_out_cubic, lerp, lerp_color, window, Color};
