use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use healing_common::{color_from_array, lerp_color, HealingConfig, Snapshot};
use image::{ImageBuffer, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_ellipse_mut, draw_filled_rect_mut, draw_hollow_ellipse_mut, Blend};
use imageproc::rect::Rect;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn, LevelFilter};
use palette::{FromColor, Hsv, Srgb};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Command-line arguments for the visualizer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input snapshot file path (.bin)
    #[arg(short, long)]
    input: PathBuf,

    /// Directory the PNG frames are written to
    #[arg(short, long, default_value = "frames")]
    output_dir: PathBuf,

    /// Width of the output frames in pixels
    #[arg(long, default_value_t = 768)]
    width: u32,

    /// Height of the output frames in pixels (square if not provided)
    #[arg(long)]
    height: Option<u32>,

    /// Optional path to the config.toml file for species colors and sizes
    #[arg(long)]
    config: Option<PathBuf>,

    /// Side length of the world region shown, in scene units
    #[arg(long, default_value_t = 4.0)]
    world_extent: f32,

    /// Background color name
    #[arg(long, default_value = "skin")]
    bg_color: String,
}

// Color definitions for named colors (RGBA format)
const COLOR_MAP: &[(&str, [u8; 4])] = &[
    ("black", [0, 0, 0, 255]),
    ("white", [255, 255, 255, 255]),
    ("skin", [236, 200, 180, 255]),
    ("gray", [128, 128, 128, 255]),
];

const WOUND_FRESH: [f32; 3] = [0.70, 0.05, 0.08];
const WOUND_SCAR: [f32; 3] = [0.88, 0.72, 0.68];
const CLOT_COLOR: [u8; 3] = [90, 25, 15];
const AGENT_RADIUS_PX: i32 = 2;
const PROGRESS_BAR_PX: u32 = 6;

/// Everything a frame needs besides the snapshot itself.
struct FrameStyle {
    width: u32,
    height: u32,
    pixels_per_unit: f32,
    bg_color: [u8; 4],
    species_colors: BTreeMap<String, [u8; 4]>,
}

impl FrameStyle {
    /// Maps scene `(x, z)` to pixel coordinates, scene origin at the image center.
    fn to_px(&self, x: f32, z: f32) -> (i32, i32) {
        let px = self.width as f32 * 0.5 + x * self.pixels_per_unit;
        let py = self.height as f32 * 0.5 + z * self.pixels_per_unit;
        (px.round() as i32, py.round() as i32)
    }

    fn len_px(&self, len: f32) -> i32 {
        (len * self.pixels_per_unit).round().max(1.0) as i32
    }
}

/// Parse a color name to RGBA values
fn parse_color(color_name: &str) -> [u8; 4] {
    for &(name, color) in COLOR_MAP {
        if name.eq_ignore_ascii_case(color_name) {
            return color;
        }
    }
    warn!("Color '{}' not recognized, using white.", color_name);
    [255, 255, 255, 255]
}

fn to_rgba8(c: Srgb<f32>, alpha: u8) -> [u8; 4] {
    let c: Srgb<u8> = c.into_format();
    [c.red, c.green, c.blue, alpha]
}

/// Evenly spaced hues for species without a configured color.
fn fallback_color(index: usize, count: usize) -> [u8; 4] {
    let hue = index as f32 / count.max(1) as f32 * 360.0;
    to_rgba8(Srgb::from_color(Hsv::new(hue, 0.7, 0.85)), 255)
}

/// Species colors from the config when given, otherwise from the snapshot's species list.
fn species_colors(config: Option<&HealingConfig>, first: &Snapshot) -> BTreeMap<String, [u8; 4]> {
    let count = first.species.len();
    first
        .species
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let color = config
                .and_then(|c| c.species.get(&s.species))
                .map(|entry| to_rgba8(color_from_array(entry.color), 255))
                .unwrap_or_else(|| fallback_color(i, count));
            (s.species.clone(), color)
        })
        .collect()
}

/// Reads the `u32` count header followed by that many bincode records.
fn read_snapshots(path: &Path) -> Result<Vec<Snapshot>> {
    let input_file = File::open(path).with_context(|| format!("Failed to open input file: {}", path.display()))?;
    let mut reader = BufReader::new(input_file);

    let snapshot_count: u32 =
        bincode::deserialize_from(&mut reader).context("Failed to read snapshot count from header")?;
    info!("Found {} snapshots in the file", snapshot_count);

    let mut snapshots = Vec::with_capacity(snapshot_count as usize);
    for i in 0..snapshot_count {
        let snapshot: Snapshot =
            bincode::deserialize_from(&mut reader).with_context(|| format!("Error deserializing snapshot {}", i))?;
        snapshots.push(snapshot);
    }
    Ok(snapshots)
}

/// Runs translucent drawing through an alpha-blending canvas.
fn blended(image: RgbaImage, draw: impl FnOnce(&mut Blend<RgbaImage>)) -> RgbaImage {
    let mut canvas = Blend(image);
    draw(&mut canvas);
    canvas.0
}

/// Draws one top-down frame: vessel halo, wound opening, clot, agents, progress bar.
fn draw_frame(snapshot: &Snapshot, style: &FrameStyle) -> RgbaImage {
    let mut image = ImageBuffer::from_pixel(style.width, style.height, Rgba(style.bg_color));

    let (cx, _, cz) = snapshot.wound_center;
    let center = style.to_px(cx, cz);

    // --- Vessel halo, stronger while dilated ---
    let dilation = (snapshot.dilation_factor - 1.0).max(0.0);
    if dilation > 0.0 {
        let alpha = (dilation * 2.0).min(1.0) * 120.0;
        let halo = Rgba([200, 40, 50, alpha as u8]);
        let rx = style.len_px(snapshot.wound_width * 0.5 + 0.4);
        let rz = style.len_px(snapshot.wound_length * 0.5 + 0.4);
        image = blended(image, |canvas| {
            for ring in 0..3 {
                draw_hollow_ellipse_mut(canvas, center, rx + ring, rz + ring, halo);
            }
        });
    }

    // --- Wound opening ---
    let wound_color = lerp_color(color_from_array(WOUND_FRESH), color_from_array(WOUND_SCAR), snapshot.progress);
    draw_filled_ellipse_mut(
        &mut image,
        center,
        style.len_px(snapshot.wound_width * 0.5),
        style.len_px(snapshot.wound_length * 0.5),
        Rgba(to_rgba8(wound_color, 255)),
    );

    // --- Clot overlay ---
    if snapshot.clot_opacity > 0.0 {
        let alpha = (snapshot.clot_opacity.clamp(0.0, 1.0) * 220.0) as u8;
        let [r, g, b] = CLOT_COLOR;
        let (rx, rz) = (style.len_px(snapshot.clot_radius), style.len_px(snapshot.clot_radius * 1.8));
        image = blended(image, |canvas| {
            draw_filled_ellipse_mut(canvas, center, rx, rz, Rgba([r, g, b, alpha]));
        });
    }

    // --- Agents ---
    for species in &snapshot.species {
        let color = style.species_colors.get(&species.species).copied().unwrap_or([0, 0, 0, 255]);
        if let Some(positions) = &species.positions {
            for &(x, _, z) in positions {
                let (px, py) = style.to_px(x, z);
                if px >= 0 && px < style.width as i32 && py >= 0 && py < style.height as i32 {
                    draw_filled_circle_mut(&mut image, (px, py), AGENT_RADIUS_PX, Rgba(color));
                }
            }
        }
    }

    // --- Progress bar along the bottom edge ---
    let filled = (snapshot.progress.clamp(0.0, 1.0) * style.width as f32) as u32;
    if filled > 0 && style.height > PROGRESS_BAR_PX {
        let rect = Rect::at(0, (style.height - PROGRESS_BAR_PX) as i32).of_size(filled, PROGRESS_BAR_PX);
        draw_filled_rect_mut(&mut image, rect, Rgba([40, 40, 40, 255]));
    }

    image
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logger
    Builder::from_default_env().filter(None, LevelFilter::Info).init();

    run_with_args(args)
}

fn run_with_args(args: Args) -> Result<()> {
    info!("Starting Healing Visualizer...");
    info!("Input file: {}", args.input.display());
    info!("Output directory: {}", args.output_dir.display());

    let config = match &args.config {
        Some(path) => match HealingConfig::load(path) {
            Ok(config) => {
                info!("Loaded species colors from {}", path.display());
                Some(config)
            }
            Err(e) => {
                warn!("Failed to load config file '{}': {}. Using default colors.", path.display(), e);
                None
            }
        },
        None => None,
    };

    let snapshots = read_snapshots(&args.input)?;
    let Some(first) = snapshots.first() else {
        warn!("Input file contains no snapshots. Exiting.");
        return Ok(());
    };
    if snapshots.iter().all(|s| s.species.iter().all(|sp| sp.positions.is_none())) {
        warn!("No snapshots contain agent positions; frames will show the wound only.");
    }

    // --- Calculate Output Dimensions and Scale ---
    let width = args.width;
    let height = args.height.unwrap_or(width);
    let pixels_per_unit = width.min(height) as f32 / args.world_extent.max(1e-3);
    let style = FrameStyle {
        width,
        height,
        pixels_per_unit,
        bg_color: parse_color(&args.bg_color),
        species_colors: species_colors(config.as_ref(), first),
    };
    info!("Frame dimensions: {}x{} px ({:.1} px per unit)", width, height, pixels_per_unit);
    debug!("Species colors: {:?}", style.species_colors);

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create output directory {}", args.output_dir.display()))?;

    // Set up progress bar
    let progress_bar = ProgressBar::new(snapshots.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({percent}%) [{eta}]")?
            .progress_chars("#>-"),
    );

    let start_time = Instant::now();
    snapshots.par_iter().enumerate().try_for_each(|(i, snapshot)| -> Result<()> {
        let image = draw_frame(snapshot, &style);
        let path = args.output_dir.join(format!("frame_{:05}.png", i));
        image.save(&path).with_context(|| format!("Failed to write {}", path.display()))?;
        progress_bar.inc(1);
        Ok(())
    })?;
    progress_bar.finish_with_message("done");

    let duration = start_time.elapsed();
    info!(
        "Rendered {} frames in {:.2?} ({:.1} frames per second)",
        snapshots.len(),
        duration,
        snapshots.len() as f64 / duration.as_secs_f64().max(1e-9)
    );
    Ok(())
}

// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use healing_common::SpeciesSnapshot;
    use std::io::{BufWriter, Write};

    fn snapshot(progress: f32) -> Snapshot {
        Snapshot {
            time: 0.0,
            progress,
            phase: "inflammatory".to_string(),
            phase_progress: 0.1,
            fired_events: Vec::new(),
            species: vec![SpeciesSnapshot {
                species: "neutrophil".to_string(),
                active: 1,
                target: 1,
                positions: Some(vec![(1.0, -0.2, 1.0)]),
            }],
            wound_center: (0.0, -0.25, 0.0),
            wound_width: 0.8,
            wound_depth: 0.5,
            wound_length: 2.0,
            clot_opacity: 0.0,
            clot_radius: 0.55,
            dilation_factor: 1.0,
            visible_sprouts: 0,
        }
    }

    fn style() -> FrameStyle {
        FrameStyle {
            width: 200,
            height: 200,
            pixels_per_unit: 50.0,
            bg_color: parse_color("white"),
            species_colors: BTreeMap::from([("neutrophil".to_string(), [0, 0, 255, 255])]),
        }
    }

    #[test]
    fn frame_shows_wound_and_agents() {
        let image = draw_frame(&snapshot(0.0), &style());
        assert_eq!(image.dimensions(), (200, 200));
        assert_eq!(image.get_pixel(150, 150).0, [0, 0, 255, 255]);
        let wound = image.get_pixel(100, 100).0;
        assert!(wound[0] > 150 && wound[1] < 40, "wound pixel {:?}", wound);
        assert_eq!(image.get_pixel(5, 5).0, [255, 255, 255, 255]);
    }

    #[test]
    fn progress_bar_tracks_t() {
        let image = draw_frame(&snapshot(0.5), &style());
        assert_eq!(image.get_pixel(50, 198).0, [40, 40, 40, 255]);
        assert_eq!(image.get_pixel(150, 198).0, [255, 255, 255, 255]);
    }

    #[test]
    fn unknown_color_falls_back_to_white() {
        assert_eq!(parse_color("chartreuse"), [255, 255, 255, 255]);
        assert_eq!(parse_color("SKIN"), [236, 200, 180, 255]);
    }

    #[test]
    fn reads_count_prefixed_stream() {
        let path = std::env::temp_dir().join(format!("healing_vis_{}.bin", std::process::id()));
        {
            let mut writer = BufWriter::new(File::create(&path).unwrap());
            bincode::serialize_into(&mut writer, &2u32).unwrap();
            bincode::serialize_into(&mut writer, &snapshot(0.1)).unwrap();
            bincode::serialize_into(&mut writer, &snapshot(0.2)).unwrap();
            writer.flush().unwrap();
        }
        let snaps = read_snapshots(&path).unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[1].progress, 0.2);
        fs::remove_file(path).ok();
    }

    #[test]
    fn config_colors_take_precedence() {
        let config = HealingConfig::default();
        let colors = species_colors(Some(&config), &snapshot(0.0));
        let expected = to_rgba8(color_from_array(config.species["neutrophil"].color), 255);
        assert_eq!(colors["neutrophil"], expected);
    }
}
