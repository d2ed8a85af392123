//! # Face Swap - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Costruzione del `JobConfig`, immutabile per tutta la run
//! - Applicazione del resource governor e avvio della pipeline
//! - Interruzione con Ctrl-C: la pipeline viene droppata e i processi figli
//!   terminati
//!
//! ## Esempio di utilizzo:
//! ```bash
//! face-swap -f face.jpg -t clip.mp4 --cpu-cores 8 --restore --interpolate 2
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use face_swap_pipeline::{
    GpuVendor, InterpolationSettings, JobConfig, Pipeline, ResourceGovernor, RestorationSettings, ToolConfig,
};

#[derive(Parser)]
#[command(name = "face-swap")]
#[command(about = "Swap a face into every frame of a video or into an image")]
struct Args {
    /// Image containing the face to use
    #[arg(short = 'f', long = "face")]
    face: PathBuf,

    /// Video or image whose face is replaced
    #[arg(short = 't', long = "target")]
    target: PathBuf,

    /// Output file (default: swapped-<target name> beside the target)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep the original frame rate instead of capping it at 30 fps
    #[arg(long)]
    keep_fps: bool,

    /// Keep the run directory with the frames
    #[arg(long)]
    keep_frames: bool,

    /// Swap every face in each frame
    #[arg(long)]
    all_faces: bool,

    /// Maximum memory in GB
    #[arg(long)]
    max_memory: Option<u64>,

    /// Number of CPU workers (default: half the available cores)
    #[arg(long)]
    cpu_cores: Option<usize>,

    /// Accelerator vendor
    #[arg(long, value_enum)]
    gpu_vendor: Option<GpuVendor>,

    /// Threads per accelerator worker
    #[arg(long, default_value = "8")]
    gpu_threads: usize,

    /// Extract one frame every N
    #[arg(long, default_value = "0")]
    frame_skip: u32,

    /// Run resolution restoration on the swapped frames
    #[arg(long)]
    restore: bool,

    /// Restoration balance between quality (0.0) and fidelity (1.0)
    #[arg(long, default_value = "0.7")]
    restore_fidelity: f32,

    /// Restoration background upscale factor
    #[arg(long, default_value = "1")]
    restore_upscale: f32,

    /// Interpolation passes (each doubles the frames)
    #[arg(long)]
    interpolate: Option<u32>,

    /// JSON file with the external tool commands
    #[arg(long)]
    tools_config: Option<PathBuf>,

    /// Emit JSON events on stdout instead of progress bars
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stderr keeps stdout clean for JSON events
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let tools = match args.tools_config {
        Some(ref path) => {
            if !path.exists() {
                warn!("Tools config {} not found, using defaults", path.display());
            }
            ToolConfig::from_file(path).await?
        }
        None => ToolConfig::default(),
    };

    let defaults = JobConfig::default();
    let job = JobConfig {
        source_face: args.face,
        target: args.target,
        output: args.output,
        keep_fps: args.keep_fps,
        keep_frames: args.keep_frames,
        all_faces: args.all_faces,
        max_memory_gb: args.max_memory,
        cpu_cores: args.cpu_cores.unwrap_or(defaults.cpu_cores),
        gpu_vendor: args.gpu_vendor,
        gpu_threads: args.gpu_threads,
        frame_skip: args.frame_skip,
        restoration: args.restore.then_some(RestorationSettings {
            fidelity: args.restore_fidelity,
            upscale: args.restore_upscale,
        }),
        interpolation: args.interpolate.map(|times| InterpolationSettings { times }),
        json_output: args.json,
        tools,
        ..defaults
    };

    job.validate()?;
    let plan = ResourceGovernor::apply(&job)?;
    let pipeline = Pipeline::new(job, plan)?;

    tokio::select! {
        result = pipeline.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping workers");
            return Err(anyhow::anyhow!("interrupted"));
        }
    }

    Ok(())
}
