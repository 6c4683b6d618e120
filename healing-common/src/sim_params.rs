use serde::{Deserialize, Serialize};

/// Playback parameters derived from the configuration, used by the frame loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    pub dt: f32,           // Seconds per rendered frame
    pub max_frame_dt: f32, // Upper bound applied to dt before it reaches the core
    pub duration_s: f32,   // Length of the scrub script
    pub total_frames: u32,
    pub record_interval_frames: u32,
}
