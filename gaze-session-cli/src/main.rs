//! Gaze Session Tracker CLI
//!
//! Command-line front end for the gaze-session-core library. It adds:
//! - Replay of recorded detector output (JSON Lines)
//! - Zone mapping from face position and head pose
//! - Console and JSON analytics reports

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

mod config;
mod detector;
mod pipeline;
mod registry;
mod sinks;
mod zones;

/// Gaze Session Tracker - Turn face detections into visitor sessions
#[derive(Parser, Debug)]
#[command(name = "gaze-session-cli")]
#[command(about = "Track visitors across frames and report where they looked", long_about = None)]
#[command(version)]
struct Args {
    /// Path to a detection log (JSON Lines, one frame per line)
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write JSON analytics to this directory (enables JSON output)
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Frame rate of the recording, overrides [system] fps
    #[arg(long, value_name = "FPS")]
    fps: Option<f64>,

    /// Maximum number of frames to read (for testing)
    #[arg(long, value_name = "COUNT")]
    max_frames: Option<u64>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut app_config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => config::AppConfig::default(),
    };

    init_logging(args.verbose, args.quiet, app_config.system.log_level.as_deref());

    log::info!("Gaze Session Tracker CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using tracker library v{}", gaze_session_core::VERSION);
    if let Some(path) = &args.config {
        log::info!("Configuration loaded from {:?}", path);
    }

    apply_overrides(&mut app_config, &args);
    app_config.validate().context("Invalid configuration")?;

    match &args.input {
        Some(input) => track_mode(input, &app_config, args.max_frames),
        None => {
            println!("Gaze Session Tracker - No input specified");
            println!("\nQuick Start:");
            println!("  gaze-session-cli --input detections.jsonl");
            println!("  gaze-session-cli --input detections.jsonl --output-dir analytics_output");
            println!("\nWith a configuration file:");
            println!("  gaze-session-cli --input detections.jsonl --config config.toml");
            println!("\nUse --help for more options");
            Ok(())
        }
    }
}

/// Command-line flags win over the configuration file
fn apply_overrides(app_config: &mut config::AppConfig, args: &Args) {
    if let Some(fps) = args.fps {
        log::debug!("Overriding fps: {} -> {}", app_config.system.fps, fps);
        app_config.system.fps = fps;
    }
    if let Some(dir) = &args.output_dir {
        app_config.analytics.json_output = true;
        app_config.analytics.json_output_dir = dir.clone();
    }
}

/// Replay a detection log through the tracker and print the summary
fn track_mode(input: &PathBuf, app_config: &config::AppConfig, max_frames: Option<u64>) -> Result<()> {
    println!("═══════════════════════════════════════════════");
    println!("  Gaze Session Tracker");
    println!("═══════════════════════════════════════════════\n");

    let writer = sinks::build_writer(&app_config.analytics)?;
    let mut pipeline = pipeline::Pipeline::new(app_config, writer, max_frames)?;

    let frames = detector::read_frames(input)?;
    let aggregate = pipeline
        .run(frames)
        .with_context(|| format!("Failed to process {:?}", input))?;

    let stats = pipeline.tracking_stats();
    println!("\n═══════════════════════════════════════════════");
    println!("  Summary");
    println!("═══════════════════════════════════════════════");
    println!("  Frames read:       {}", pipeline.frames_read());
    println!("  Frames processed:  {}", stats.frames_processed);
    println!("  Faces tracked:     {}", stats.total_tracked);
    println!("  Sessions:          {}", aggregate.total_sessions);
    println!("  Discarded:         {}", stats.discarded);
    println!("  Time tracked:      {:.2}s", aggregate.total_time_tracked);
    if !aggregate.conversion_zones.is_empty() {
        println!("  Top zones:         {}", aggregate.conversion_zones.join(", "));
    }
    if app_config.analytics.json_output {
        println!("  JSON output:       {:?}", app_config.analytics.json_output_dir);
    }

    Ok(())
}

/// Initialize logging based on verbosity level
///
/// `-v`/`-q` win; without them the configured level is used, then `info`.
fn init_logging(verbose: u8, quiet: bool, configured: Option<&str>) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => configured
                .and_then(|name| name.parse().ok())
                .unwrap_or(LevelFilter::Info),
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
