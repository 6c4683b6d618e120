use anyhow::Result;
use healing_common::HealingConfig;
use log::{debug, error, info, trace, warn};
use std::time::Instant;
use wound_healing_engine::playback::{clamp_dt, write_population_csv, write_snapshots, ScrubScript};
use wound_healing_engine::{EventKey, HealingSimulation, TimelineEvent};

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting Wound Healing Engine (headless playback)...");

    // --- Load Configuration ---
    let config = HealingConfig::load("config.toml")?;
    let script = ScrubScript::from_config(&config.playback);

    // --- Initialize Simulation ---
    let mut sim = HealingSimulation::new(config)?;
    let params = sim.params();
    debug!("Playback Parameters: {:#?}", params);

    // --- Notifications: log phases and milestones as they happen ---
    sim.subscribe(EventKey::PhaseChange, |t, event| {
        if let TimelineEvent::PhaseChange { phase } = event {
            info!("Phase -> {} ({}) at t={:.3}", phase.label, phase.id, t);
        }
    });
    sim.subscribe(EventKey::AnyMilestone, |t, event| {
        if let TimelineEvent::Milestone { event } = event {
            info!("Milestone: {} ({}) at t={:.3}", event.label, event.id, t);
        }
    });

    if params.max_frame_dt < params.dt {
        warn!(
            "max_frame_dt ({:.3}s) is smaller than the frame time ({:.3}s); agents will move in slow motion.",
            params.max_frame_dt, params.dt
        );
    }
    info!(
        "Playing {:.1}s scrub script: {} frames at {:.0} fps, recording every {} frames.",
        params.duration_s,
        params.total_frames,
        1.0 / params.dt,
        params.record_interval_frames
    );

    // --- Playback Loop ---
    let start_time = Instant::now();
    let mut previous_print_time = start_time;
    let print_interval_secs = 5.0;

    for frame in 0..params.total_frames {
        let seconds = frame as f32 * params.dt;
        let t = script.progress_at(seconds);
        // The first frame only establishes state.
        let dt = if frame == 0 { 0.0 } else { clamp_dt(params.dt, params.max_frame_dt) };

        let frame_start = Instant::now();
        sim.tick(t, dt);
        let frame_duration = frame_start.elapsed();

        let is_record_frame = frame % params.record_interval_frames == 0;
        let is_last_frame = frame + 1 == params.total_frames;
        if is_record_frame || is_last_frame {
            sim.record_snapshot(seconds);
        }

        let now = Instant::now();
        if now.duration_since(previous_print_time).as_secs_f64() >= print_interval_secs || is_last_frame {
            info!(
                "Frame [{}/{}] ({:.2}s, t={:.3}) | Phase: {} | Active agents: {} | Elapsed: {:.2} s",
                frame + 1,
                params.total_frames,
                seconds,
                sim.timeline().progress(),
                sim.timeline().current_phase().id,
                sim.total_active(),
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = now;
        } else {
            trace!(
                "Frame [{}/{}] completed in {:.3} ms",
                frame + 1,
                params.total_frames,
                frame_duration.as_secs_f64() * 1000.0
            );
        }
    }

    info!("Playback finished in {:.3} seconds.", start_time.elapsed().as_secs_f64());

    // --- Save Recorded Data ---
    let output = sim.config().output.clone();
    let snapshots = sim.get_recorded_snapshots();
    if output.save_stats {
        let format = output.format.as_deref().unwrap_or("json");
        match write_snapshots(snapshots, &output.base_filename, format) {
            Ok(path) => info!("{} snapshots saved to {}", snapshots.len(), path.display()),
            Err(e) => error!("Error saving snapshots: {:#}", e),
        }
    } else {
        info!("Skipping saving snapshots as per config (save_stats is false).");
    }

    if output.save_population_csv {
        let filename = format!("{}_population.csv", output.base_filename);
        match write_population_csv(snapshots, &filename) {
            Ok(()) => info!("Population table saved to {}", filename),
            Err(e) => error!("Error saving CSV file '{}': {:#}", filename, e),
        }
    } else {
        info!("Skipping population CSV as per config.");
    }

    sim.dispose();
    info!("Simulation Complete.");
    Ok(())
}
