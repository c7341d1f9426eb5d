//! Gridflow CLI - headless grid simulation runner.
//!
//! Runs one of the built-in scenarios (dye, fluid, erosion, waves) for a number of ticks,
//! optionally writing display frames as PNG and final field snapshots as RAW.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

use gridflow::device::{create_device, Backend};
use gridflow::export::{export_field_raw, PngFrameSink, R16Channel, RawFormat};
use gridflow::grid::ScratchSlot;
use gridflow::scheduler::{
    DepthCapture, DiscardSink, DisplaySink, FlatSeabed, FrameScheduler, IdleControl, OrbitingBrush,
    ScenarioKind, SessionIo, ShelvingSeabed,
};
use gridflow::simulation::SimulationConfig;

/// Headless grid simulation runner.
#[derive(Parser)]
#[command(name = "gridflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario for a fixed number of ticks.
    Run {
        /// Scenario to run.
        #[arg(short, long, value_enum, default_value_t = ScenarioKind::Fluid)]
        scenario: ScenarioKind,

        /// JSON configuration file; defaults are used when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured compute backend.
        #[arg(short, long, value_enum)]
        backend: Option<Backend>,

        /// Override the configured grid resolution.
        #[arg(short, long)]
        resolution: Option<u32>,

        /// Number of ticks to run.
        #[arg(short, long, default_value = "240")]
        ticks: u64,

        /// Drive the brush along a scripted orbit instead of leaving it released.
        #[arg(long)]
        brush: bool,

        /// Capture a seabed that shelves up to a beach (waves scenario).
        #[arg(long)]
        shelving: bool,

        /// Directory for display frames as PNG.
        #[arg(long)]
        frames: Option<PathBuf>,

        /// Write every n-th presented frame.
        #[arg(long, default_value = "10")]
        every: u64,

        /// Directory for final field snapshots.
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Snapshot format.
        #[arg(long, value_enum, default_value_t = RawFormat::R32Float)]
        snapshot_format: RawFormat,
    },

    /// Write the default configuration as JSON.
    Config {
        /// Output file.
        #[arg(short, long, default_value = "gridflow.json")]
        output: PathBuf,
    },

    /// Display buffer sizes for a scenario and resolution.
    Info {
        #[arg(short, long, value_enum, default_value_t = ScenarioKind::Fluid)]
        scenario: ScenarioKind,

        /// Grid resolution in cells per side.
        #[arg(short, long, default_value = "256")]
        resolution: u32,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scenario,
            config,
            backend,
            resolution,
            ticks,
            brush,
            shelving,
            frames,
            every,
            snapshot,
            snapshot_format,
        } => {
            let mut config = match config {
                Some(path) => SimulationConfig::load_json(&path).unwrap_or_else(|e| {
                    eprintln!("Error loading config {}: {}", path.display(), e);
                    std::process::exit(1);
                }),
                None => SimulationConfig::default(),
            };
            if let Some(backend) = backend {
                config.backend = backend;
            }
            if let Some(resolution) = resolution {
                config.resolution = resolution;
                config.display_resolution = resolution;
            }
            run_scenario(
                scenario,
                config,
                ticks,
                brush,
                shelving,
                frames.as_deref(),
                every,
                snapshot.as_deref(),
                snapshot_format,
            );
        }
        Commands::Config { output } => {
            SimulationConfig::default().save_json(&output).unwrap_or_else(|e| {
                eprintln!("Error writing config: {}", e);
                std::process::exit(1);
            });
            println!("Wrote default configuration to {}", output.display());
        }
        Commands::Info { scenario, resolution } => {
            run_info(scenario, resolution);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_scenario(
    kind: ScenarioKind,
    config: SimulationConfig,
    ticks: u64,
    brush: bool,
    shelving: bool,
    frames: Option<&Path>,
    every: u64,
    snapshot: Option<&Path>,
    snapshot_format: RawFormat,
) {
    let scenario = kind.scenario();

    println!("Gridflow - Grid Simulation Runner");
    println!("=================================");
    println!("Scenario: {}", scenario.name);
    println!("Resolution: {}x{}", config.resolution, config.resolution);
    println!("Ticks: {}", ticks);

    let device = create_device(config.backend).unwrap_or_else(|e| {
        eprintln!("Error creating compute device: {}", e);
        std::process::exit(1);
    });
    println!("Backend: {}", device.backend_name());

    let sink: Box<dyn DisplaySink> = match frames {
        Some(dir) => Box::new(PngFrameSink::new(dir, scenario.name, every).unwrap_or_else(|e| {
            eprintln!("Error creating frame directory: {}", e);
            std::process::exit(1);
        })),
        None => Box::new(DiscardSink),
    };
    let depth: Box<dyn DepthCapture> = if shelving {
        Box::new(ShelvingSeabed {
            shore_depth: 0.0,
            deep_depth: config.waves.max_visibility,
        })
    } else {
        Box::new(FlatSeabed {
            depth: config.waves.max_visibility,
        })
    };
    let io = SessionIo {
        control: if brush {
            Box::new(OrbitingBrush::new(scenario.brush_mode))
        } else {
            Box::new(IdleControl)
        },
        depth,
        sink,
    };

    let start = Instant::now();
    let mut scheduler = FrameScheduler::new(device, config, scenario, io).unwrap_or_else(|e| {
        eprintln!("Error starting session: {}", e);
        std::process::exit(1);
    });

    let report_every = (ticks / 10).max(1);
    scheduler
        .run_with_callbacks(ticks, |report| {
            if (report.tick + 1) % report_every == 0 {
                println!(
                    "  [{}/{}] t={:.3}s, {} dispatches",
                    report.tick + 1,
                    ticks,
                    report.time,
                    report.dispatches
                );
            }
        })
        .unwrap_or_else(|e| {
            eprintln!("Error during tick {}: {}", scheduler.ticks(), e);
            std::process::exit(1);
        });

    println!("Ran {} ticks in {:.2?}", scheduler.ticks(), start.elapsed());
    println!("Frames presented: {}", scheduler.frames_presented());

    if let Some(dir) = snapshot {
        std::fs::create_dir_all(dir).unwrap_or_else(|e| {
            eprintln!("Error creating snapshot directory: {}", e);
            std::process::exit(1);
        });
        let fields = scheduler.scenario().fields.clone();
        let name = scheduler.scenario().name;
        for kind in fields {
            let data = scheduler.field_snapshot(kind).unwrap_or_else(|e| {
                eprintln!("Error reading {} field: {}", kind, e);
                std::process::exit(1);
            });
            let channel = value_range(&data, kind.component_count());
            let path = dir.join(format!("{}_{}.raw", name, kind.name()));
            export_field_raw(&data, kind.component_count(), &path, snapshot_format, channel).unwrap_or_else(|e| {
                eprintln!("Error exporting {}: {}", path.display(), e);
                std::process::exit(1);
            });
            println!("  Exported {}", path.display());
        }
    }

    scheduler.teardown();
}

/// First-component range of a snapshot, widened when the field is constant.
fn value_range(data: &[f32], components: u32) -> R16Channel {
    let (min_v, max_v) = data
        .iter()
        .step_by(components.max(1) as usize)
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let min_value = if min_v.is_finite() { min_v } else { 0.0 };
    let max_value = if max_v.is_finite() && max_v > min_value { max_v } else { min_value + 1e-6 };
    R16Channel {
        component: 0,
        min_value,
        max_value,
    }
}

fn run_info(kind: ScenarioKind, resolution: u32) {
    if let Err(e) = SimulationConfig::with_resolution(resolution) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    let scenario = kind.scenario();
    let cells = (resolution as u64) * (resolution as u64);
    let mb = |bytes: u64| bytes as f64 / 1024.0 / 1024.0;

    println!("Gridflow - Scenario Info");
    println!("========================");
    println!();
    println!("Scenario: {}", scenario.name);
    println!("Resolution: {}x{} ({} cells)", resolution, resolution, cells);
    println!();
    println!("Fields:");
    let mut total = 0u64;
    for kind in &scenario.fields {
        let bytes = cells * kind.component_count() as u64 * 4;
        total += bytes;
        println!(
            "  {:<12} {} comps {:>12} bytes ({:.2} MB)",
            kind.name(),
            kind.component_count(),
            bytes,
            mb(bytes)
        );
    }
    let scratch = cells * ScratchSlot::COMPONENTS as u64 * 4 * ScratchSlot::ALL.len() as u64;
    let display = cells * 4 * 4;
    total += scratch + display;
    println!("  {:<12}         {:>12} bytes ({:.2} MB)", "scratch", scratch, mb(scratch));
    println!("  {:<12}         {:>12} bytes ({:.2} MB)", "display", display, mb(display));
    println!("  {:<12}         {:>12} bytes ({:.2} MB)", "total", total, mb(total));
    println!();
    println!("Stages per tick:");
    for stage in &scenario.stages {
        println!("  {}", stage);
    }
    if !scenario.init.is_empty() {
        println!("Init stages:");
        for stage in &scenario.init {
            println!("  {}", stage);
        }
    }
}
