//! Headless playback helpers: the scrub script and snapshot writers used by the driver binary.

use anyhow::{Context, Result};
use healing_common::{PlaybackConfig, Snapshot};
use log::warn;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Piecewise-linear `(seconds, t)` script the driver plays back.
#[derive(Debug, Clone)]
pub struct ScrubScript {
    keyframes: Vec<[f32; 2]>,
}

impl ScrubScript {
    pub fn new(keyframes: Vec<[f32; 2]>) -> Self {
        ScrubScript { keyframes }
    }

    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self::new(config.keyframes.clone())
    }

    pub fn duration(&self) -> f32 {
        self.keyframes.last().map(|k| k[0]).unwrap_or(0.0)
    }

    /// Progress at wall-clock `seconds`, held constant outside the script.
    pub fn progress_at(&self, seconds: f32) -> f32 {
        let (Some(first), Some(last)) = (self.keyframes.first(), self.keyframes.last()) else {
            return 0.0;
        };
        if seconds <= first[0] {
            return first[1];
        }
        if seconds >= last[0] {
            return last[1];
        }
        for pair in self.keyframes.windows(2) {
            let ([s0, t0], [s1, t1]) = (pair[0], pair[1]);
            if seconds <= s1 {
                if s1 - s0 <= f32::EPSILON {
                    return t1;
                }
                return t0 + (t1 - t0) * (seconds - s0) / (s1 - s0);
            }
        }
        last[1]
    }
}

/// Bounds a frame's `dt` before it reaches the core, so a stalled frame can't teleport agents.
pub fn clamp_dt(dt: f32, max_frame_dt: f32) -> f32 {
    if !dt.is_finite() || dt < 0.0 {
        return 0.0;
    }
    if dt > max_frame_dt {
        warn!("Clamping frame dt {:.3}s to {:.3}s", dt, max_frame_dt);
    }
    dt.min(max_frame_dt)
}

/// File extension used for each supported output format.
pub fn extension_for(format: &str) -> &'static str {
    match format {
        "bincode" => "bin",
        "messagepack" => "msgpack",
        _ => "json",
    }
}

/// Writes all snapshots as `<base>_snapshots.<ext>`. Unknown formats fall back to JSON.
///
/// The bincode layout is a `u32` snapshot count followed by one record per snapshot,
/// so readers can stream frames without loading the whole file.
pub fn write_snapshots(snapshots: &[Snapshot], base_filename: &str, format: &str) -> Result<PathBuf> {
    let format = match format {
        "json" | "bincode" | "messagepack" => format,
        other => {
            warn!("Unknown output format: {}. Using JSON instead.", other);
            "json"
        }
    };
    let path = PathBuf::from(format!("{}_snapshots.{}", base_filename, extension_for(format)));
    let file = File::create(&path).with_context(|| format!("creating snapshot file '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);

    match format {
        "bincode" => {
            let count = u32::try_from(snapshots.len()).context("too many snapshots for the bincode header")?;
            bincode::serialize_into(&mut writer, &count)?;
            for snapshot in snapshots {
                bincode::serialize_into(&mut writer, snapshot)?;
            }
        }
        "messagepack" => {
            rmp_serde::encode::write(&mut writer, snapshots)?;
        }
        _ => {
            serde_json::to_writer(&mut writer, snapshots)?;
        }
    }
    writer.flush()?;
    Ok(path)
}

/// One row per snapshot: time, progress, phase, per-species active/target, then wound and vessel metrics.
pub fn write_population_csv<P: AsRef<Path>>(snapshots: &[Snapshot], path: P) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())
        .with_context(|| format!("creating CSV file '{}'", path.as_ref().display()))?;

    let species: Vec<String> = snapshots
        .first()
        .map(|s| s.species.iter().map(|sp| sp.species.clone()).collect())
        .unwrap_or_default();

    let mut header = vec!["time_s".to_string(), "t".to_string(), "phase".to_string()];
    for id in &species {
        header.push(format!("{}_active", id));
        header.push(format!("{}_target", id));
    }
    header.extend(
        ["wound_width", "wound_depth", "clot_opacity", "dilation_factor", "visible_sprouts"].map(String::from),
    );
    writer.write_record(&header)?;

    for snap in snapshots {
        let mut row = vec![format!("{:.3}", snap.time), format!("{:.4}", snap.progress), snap.phase.clone()];
        for id in &species {
            let entry = snap.species.iter().find(|s| &s.species == id);
            row.push(entry.map(|s| s.active).unwrap_or(0).to_string());
            row.push(entry.map(|s| s.target).unwrap_or(0).to_string());
        }
        row.push(format!("{:.4}", snap.wound_width));
        row.push(format!("{:.4}", snap.wound_depth));
        row.push(format!("{:.4}", snap.clot_opacity));
        row.push(format!("{:.4}", snap.dilation_factor));
        row.push(snap.visible_sprouts.to_string());
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use healing_common::SpeciesSnapshot;
    use std::io::BufReader;

    fn snapshot(time: f32, progress: f32) -> Snapshot {
        Snapshot {
            time,
            progress,
            phase: "hemostasis".to_string(),
            phase_progress: 0.5,
            fired_events: vec!["clot_formed".to_string()],
            species: vec![SpeciesSnapshot {
                species: "platelet".to_string(),
                active: 12,
                target: 20,
                positions: None,
            }],
            wound_center: (0.0, -0.25, 0.0),
            wound_width: 0.8,
            wound_depth: 0.5,
            wound_length: 2.0,
            clot_opacity: 0.4,
            clot_radius: 0.55,
            dilation_factor: 1.3,
            visible_sprouts: 0,
        }
    }

    fn temp_base(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("{}_{}", name, std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn scrub_script_interpolates_and_holds() {
        let script = ScrubScript::new(vec![[0.0, 0.0], [10.0, 1.0], [15.0, 0.2]]);
        assert_eq!(script.progress_at(-1.0), 0.0);
        assert!((script.progress_at(5.0) - 0.5).abs() < 1e-6);
        assert!((script.progress_at(12.5) - 0.6).abs() < 1e-6);
        assert_eq!(script.progress_at(20.0), 0.2);
        assert_eq!(script.duration(), 15.0);
        assert_eq!(ScrubScript::new(Vec::new()).progress_at(3.0), 0.0);
    }

    #[test]
    fn dt_is_clamped() {
        assert_eq!(clamp_dt(0.5, 0.1), 0.1);
        assert_eq!(clamp_dt(0.01, 0.1), 0.01);
        assert_eq!(clamp_dt(f32::NAN, 0.1), 0.0);
        assert_eq!(clamp_dt(-1.0, 0.1), 0.0);
    }

    #[test]
    fn bincode_stream_has_count_header() {
        let base = temp_base("healing_bincode_test");
        let snaps = vec![snapshot(0.0, 0.0), snapshot(0.25, 0.01)];
        let path = write_snapshots(&snaps, &base, "bincode").unwrap();
        let mut reader = BufReader::new(File::open(&path).unwrap());
        let count: u32 = bincode::deserialize_from(&mut reader).unwrap();
        assert_eq!(count, 2);
        let second: Snapshot = {
            let _first: Snapshot = bincode::deserialize_from(&mut reader).unwrap();
            bincode::deserialize_from(&mut reader).unwrap()
        };
        assert_eq!(second.time, 0.25);
        assert_eq!(second.species[0].active, 12);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn unknown_format_falls_back_to_json() {
        let base = temp_base("healing_json_test");
        let path = write_snapshots(&[snapshot(0.0, 0.0)], &base, "yaml").unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("json"));
        let parsed: Vec<Snapshot> = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(parsed.len(), 1);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn population_csv_has_species_columns() {
        let path = PathBuf::from(format!("{}.csv", temp_base("healing_csv_test")));
        write_population_csv(&[snapshot(0.0, 0.0), snapshot(1.0, 0.1)], &path).unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert!(headers.iter().any(|h| h == "platelet_active"));
        assert_eq!(reader.records().count(), 2);
        std::fs::remove_file(path).ok();
    }
}
