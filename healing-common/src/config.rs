use serde::{Deserialize, Serialize};
use anyhow::{Context, Result};
use crate::sim_params::SimParams;
use std::collections::BTreeMap;
use std::path::Path;

/// Species ids the default composition requires. A config without them is rejected at load time.
pub const REQUIRED_SPECIES: [&str; 3] = ["platelet", "neutrophil", "macrophage"];

/// A named sub-interval of the timeline.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Phase {
    pub id: String,
    pub t_start: f32,
    pub t_end: f32,
    #[serde(default)]
    pub label: String,
}

/// A discrete occurrence bound to a progress threshold.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct MilestoneEvent {
    pub id: String,
    pub t: f32,
    #[serde(default)]
    pub label: String,
}

// Phase and milestone tables, loaded from [timeline]
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimelineConfig {
    pub phases: Vec<Phase>,
    pub milestones: Vec<MilestoneEvent>,
}

/// Where a species places newly activated agents.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SpawnRule {
    /// Uniformly inside the wound's current spawn bounds.
    WoundBounds,
    /// On a horizontal ring around the wound center, inside a height band relative to the wound floor.
    Ring { inner: f32, outer: f32, below: f32, above: f32 },
    /// Along the two long edges of the wound.
    WoundEdges,
}

/// Static per-species table entry. Immutable for the session.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SpeciesConfig {
    pub max_count: usize,
    pub size: f32,
    pub color: [f32; 3],
    pub arrival_t: f32,
    pub peak_t: f32,
    pub decline_t: f32,
    #[serde(default)]
    pub spawn: Option<SpawnRule>, // None = the species' own default rule
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SpeciesConfig {
    /// Checks the population envelope. Called for every entry at load time.
    pub fn validate(&self, id: &str) -> Result<()> {
        if self.max_count == 0 {
            anyhow::bail!("species '{}': max_count must be greater than 0.", id);
        }
        if !(self.size > 0.0) {
            anyhow::bail!("species '{}': size must be positive.", id);
        }
        let ordered = 0.0 <= self.arrival_t
            && self.arrival_t < self.peak_t
            && self.peak_t <= self.decline_t
            && self.decline_t < 1.0;
        if !ordered {
            anyhow::bail!(
                "species '{}': expected 0 <= arrival_t < peak_t <= decline_t < 1, got {} / {} / {}.",
                id, self.arrival_t, self.peak_t, self.decline_t
            );
        }
        if self.color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            anyhow::bail!("species '{}': color components must lie in 0..1.", id);
        }
        Ok(())
    }
}

// Procedural cavity dimensions and contraction window, loaded from [wound]
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct WoundConfig {
    pub position: [f32; 3],
    pub length: f32,
    pub initial_width: f32,
    pub initial_depth: f32,
    pub final_width: f32,
    pub final_depth: f32,
    pub segments: u32,
    pub radial_segments: u32,
    /// Fraction of the half-width (0..1) rounded off at the bottom of the V.
    pub bottom_rounding: f32,
    pub rim_width: f32,
    pub contraction_start_t: f32,
    pub contraction_complete_t: f32,
    /// Radius of the ring platelets aggregate on.
    pub platelet_rim_radius: f32,
}

impl Default for WoundConfig {
    fn default() -> Self {
        WoundConfig {
            position: [0.0, 0.0, 0.0],
            length: 2.0,
            initial_width: 0.8,
            initial_depth: 0.5,
            final_width: 0.12,
            final_depth: 0.04,
            segments: 32,
            radial_segments: 16,
            bottom_rounding: 0.25,
            rim_width: 0.08,
            contraction_start_t: 0.35,
            contraction_complete_t: 0.85,
            platelet_rim_radius: 0.35,
        }
    }
}

// Clot/scab overlay timing, loaded from [clot]
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ClotConfig {
    pub radius: f32,
    pub texture_size: u32,
    pub fade_in_start_t: f32,
    pub fade_in_end_t: f32,
    pub fade_out_start_t: f32,
    pub fade_out_end_t: f32,
    /// Height the scab lifts by as it detaches.
    pub lift: f32,
}

impl Default for ClotConfig {
    fn default() -> Self {
        ClotConfig {
            radius: 0.55,
            texture_size: 64,
            fade_in_start_t: 0.02,
            fade_in_end_t: 0.08,
            fade_out_start_t: 0.30,
            fade_out_end_t: 0.75,
            lift: 0.06,
        }
    }
}

// Vessel response parameters, loaded from [vessels]
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct VesselConfig {
    pub max_dilation: f32,
    pub dilated_color: [f32; 3],
    pub color_blend: f32,
    /// A vessel is "near" when closer than `near_factor * wound_radius`.
    pub near_factor: f32,
    pub angiogenesis_start_t: f32,
    pub regression_start_t: f32,
    pub regression_duration: f32,
    pub sprout_count: u32,
    pub sprout_ring_radius: f32,
    pub sprout_radius: f32,
    pub sprout_curve_samples: u32,
    pub sprout_radial_segments: u32,
    pub sprout_stagger: f32,
    pub sprout_growth_duration: f32,
    pub sprout_color: [f32; 3],
}

impl Default for VesselConfig {
    fn default() -> Self {
        VesselConfig {
            max_dilation: 1.5,
            dilated_color: [0.85, 0.12, 0.15],
            color_blend: 0.6,
            near_factor: 3.0,
            angiogenesis_start_t: 0.30,
            regression_start_t: 0.66,
            regression_duration: 0.20,
            sprout_count: 8,
            sprout_ring_radius: 1.4,
            sprout_radius: 0.015,
            sprout_curve_samples: 24,
            sprout_radial_segments: 6,
            sprout_stagger: 0.015,
            sprout_growth_duration: 0.15,
            sprout_color: [0.75, 0.1, 0.12],
        }
    }
}

// Headless playback settings, loaded from [playback]
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct PlaybackConfig {
    pub fps: f32,
    pub max_frame_dt: f32,
    pub record_interval_s: f32,
    pub seed: Option<u64>,
    /// Scrub script as `[seconds, progress]` keyframes; progress is linearly interpolated between them.
    pub keyframes: Vec<[f32; 2]>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        PlaybackConfig {
            fps: 60.0,
            max_frame_dt: 0.1,
            record_interval_s: 0.25,
            seed: None,
            keyframes: vec![[0.0, 0.0], [30.0, 1.0]],
        }
    }
}

// Configuration for output settings, loaded from [output]
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub base_filename: String,
    pub save_stats: bool,
    pub save_population_csv: bool,
    pub save_positions_in_snapshot: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            base_filename: "wound_healing".to_string(),
            save_stats: true,
            save_population_csv: true,
            save_positions_in_snapshot: true,
            format: Some("bincode".to_string()),
        }
    }
}

// Main configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HealingConfig {
    #[serde(default = "default_timeline")]
    pub timeline: TimelineConfig,
    pub species: BTreeMap<String, SpeciesConfig>,
    #[serde(default)]
    pub wound: WoundConfig,
    #[serde(default)]
    pub clot: ClotConfig,
    #[serde(default)]
    pub vessels: VesselConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for HealingConfig {
    fn default() -> Self {
        HealingConfig {
            timeline: default_timeline(),
            species: default_species_table(),
            wound: WoundConfig::default(),
            clot: ClotConfig::default(),
            vessels: VesselConfig::default(),
            playback: PlaybackConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

fn phase(id: &str, t_start: f32, t_end: f32, label: &str) -> Phase {
    Phase { id: id.to_string(), t_start, t_end, label: label.to_string() }
}

fn milestone(id: &str, t: f32, label: &str) -> MilestoneEvent {
    MilestoneEvent { id: id.to_string(), t, label: label.to_string() }
}

fn default_timeline() -> TimelineConfig {
    TimelineConfig {
        phases: vec![
            phase("hemostasis", 0.0, 0.10, "Hemostasis"),
            phase("inflammatory", 0.10, 0.35, "Inflammation"),
            phase("proliferative", 0.35, 0.70, "Proliferation"),
            phase("remodeling", 0.70, 1.0, "Remodeling"),
        ],
        milestones: vec![
            milestone("clot_formed", 0.05, "Fibrin clot stabilizes the wound"),
            milestone("neutrophil_influx", 0.08, "Neutrophils arrive"),
            milestone("macrophage_arrival", 0.18, "Macrophages take over debris clearance"),
            milestone("angiogenesis", 0.30, "New capillaries sprout"),
            milestone("contraction_start", 0.35, "Wound edges begin to contract"),
            milestone("granulation", 0.45, "Granulation tissue fills the bed"),
            milestone("reepithelialization", 0.60, "Epidermis closes over the wound"),
            milestone("vessel_regression", 0.66, "Excess capillaries regress"),
            milestone("scab_shed", 0.75, "Scab detaches"),
            milestone("scar_maturation", 0.90, "Scar matures"),
        ],
    }
}

fn species(
    max_count: usize,
    size: f32,
    color: [f32; 3],
    arrival_t: f32,
    peak_t: f32,
    decline_t: f32,
    enabled: bool,
) -> SpeciesConfig {
    SpeciesConfig { max_count, size, color, arrival_t, peak_t, decline_t, spawn: None, enabled }
}

/// Built-in species table. The remodeling species are present but disabled.
pub fn default_species_table() -> BTreeMap<String, SpeciesConfig> {
    let mut table = BTreeMap::new();
    table.insert("platelet".to_string(), species(300, 0.02, [0.80, 0.25, 0.30], 0.005, 0.03, 0.12, true));
    table.insert("neutrophil".to_string(), species(150, 0.045, [0.90, 0.85, 0.60], 0.05, 0.15, 0.30, true));
    table.insert("macrophage".to_string(), species(80, 0.07, [0.45, 0.55, 0.85], 0.15, 0.35, 0.60, true));
    table.insert("fibroblast".to_string(), species(120, 0.05, [0.55, 0.80, 0.55], 0.35, 0.55, 0.85, false));
    table.insert("myofibroblast".to_string(), species(60, 0.05, [0.35, 0.65, 0.40], 0.45, 0.65, 0.90, false));
    table
}

impl HealingConfig {
    /// Loads the configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read config file '{}'", path_ref.display()))?;
        let config = Self::from_toml_str(&config_str)
            .with_context(|| format!("Invalid config '{}'", path_ref.display()))?;
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: HealingConfig = toml::from_str(config_str).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects tables that would silently corrupt the simulation.
    pub fn validate(&self) -> Result<()> {
        for id in REQUIRED_SPECIES {
            if !self.species.contains_key(id) {
                anyhow::bail!("species table is missing required entry '{}'.", id);
            }
        }
        for (id, entry) in &self.species {
            entry.validate(id)?;
        }

        let w = &self.wound;
        if w.length <= 0.0 || w.initial_width <= 0.0 || w.initial_depth <= 0.0 {
            anyhow::bail!("wound length, initial_width and initial_depth must be positive.");
        }
        if w.final_width <= 0.0 || w.final_depth <= 0.0 {
            anyhow::bail!("wound final_width and final_depth must be positive.");
        }
        if w.segments < 2 || w.radial_segments < 2 {
            anyhow::bail!("wound segments and radial_segments must be at least 2.");
        }
        if w.segments % 2 != 0 || w.radial_segments % 2 != 0 {
            // the widest cross-section and the midline must land on vertex rows
            anyhow::bail!("wound segments and radial_segments must be even.");
        }
        if !(0.0..1.0).contains(&w.bottom_rounding) {
            anyhow::bail!("wound bottom_rounding must lie in [0, 1).");
        }
        if w.contraction_complete_t <= w.contraction_start_t || w.contraction_complete_t > 1.0 {
            anyhow::bail!("wound contraction window must satisfy start < complete <= 1.");
        }

        let c = &self.clot;
        if !(c.fade_in_start_t <= c.fade_in_end_t
            && c.fade_in_end_t <= c.fade_out_start_t
            && c.fade_out_start_t < c.fade_out_end_t)
        {
            anyhow::bail!("clot fade windows must be ordered fade_in_start <= fade_in_end <= fade_out_start < fade_out_end.");
        }

        if self.vessels.sprout_curve_samples < 2 || self.vessels.sprout_radial_segments < 3 {
            anyhow::bail!("sprout_curve_samples must be >= 2 and sprout_radial_segments >= 3.");
        }

        if self.playback.fps <= 0.0 {
            anyhow::bail!("playback fps must be positive.");
        }
        if self.playback.keyframes.is_empty() {
            anyhow::bail!("playback needs at least one keyframe.");
        }
        if self.playback.keyframes.windows(2).any(|k| k[1][0] < k[0][0]) {
            anyhow::bail!("playback keyframes must be ordered by time.");
        }
        Ok(())
    }

    /// Converts the configuration into the derived parameters the playback loop uses.
    pub fn get_sim_params(&self) -> SimParams {
        let fps = self.playback.fps;
        let dt = 1.0 / fps;
        let duration_s = self
            .playback
            .keyframes
            .last()
            .map(|k| k[0])
            .unwrap_or(0.0)
            .max(0.0);
        let total_frames = (duration_s * fps).ceil() as u32 + 1;
        let record_interval_frames = (self.playback.record_interval_s * fps).round().max(1.0) as u32;

        SimParams {
            dt,
            max_frame_dt: self.playback.max_frame_dt,
            duration_s,
            total_frames,
            record_interval_frames,
        }
    }
}
