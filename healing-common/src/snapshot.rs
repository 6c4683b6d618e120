use serde::{Serialize, Deserialize};

/// Population state of one species at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpeciesSnapshot {
    pub species: String,
    pub active: u32,
    pub target: u32,
    /// Positions of active agents, only when `output.save_positions_in_snapshot` is set.
    /// Always serialized (even as `None`) so the non-self-describing bincode stream stays readable.
    pub positions: Option<Vec<(f32, f32, f32)>>,
}

/// A snapshot of the simulation state at one rendered frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Wall-clock playback time in seconds.
    pub time: f32,
    /// Timeline progress in [0, 1].
    pub progress: f32,
    pub phase: String,
    pub phase_progress: f32,
    pub fired_events: Vec<String>,
    pub species: Vec<SpeciesSnapshot>,
    pub wound_center: (f32, f32, f32),
    pub wound_width: f32,
    pub wound_depth: f32,
    pub wound_length: f32,
    pub clot_opacity: f32,
    pub clot_radius: f32,
    pub dilation_factor: f32,
    pub visible_sprouts: u32,
}

impl Snapshot {
    /// Total number of active agents across all species.
    pub fn total_active(&self) -> u32 {
        self.species.iter().map(|s| s.active).sum()
    }
}
