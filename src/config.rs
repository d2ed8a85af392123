//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione di un job di face swap.
//!
//! ## Responsabilità:
//! - Definisce `JobConfig`, immutabile per tutta la durata di una run
//! - Definisce `ToolConfig` con i comandi dei tool esterni (worker di swap,
//!   restoration, interpolation) caricabile da file JSON
//! - Fornisce validazione robusta dei parametri di input
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri del job:
//! - `source_face` / `target` / `output`: path di input e output
//! - `keep_fps`: non normalizza il frame rate (default: false, cap a 30 fps)
//! - `keep_frames`: non cancella la run directory alla fine
//! - `frame_skip`: estrae un frame ogni N (0 o 1 = tutti i frame)
//! - `cpu_cores` / `gpu_vendor` / `gpu_threads`: piano di esecuzione
//! - `restoration` / `interpolation`: stage di post-processing opzionali
//!
//! Nessun componente legge stato globale: il job viene costruito una volta
//! in `main.rs` e passato per riferimento a tutti gli stage.
//!
//! ## Esempio:
//! ```rust,ignore
//! let job = JobConfig {
//!     source_face: "face.jpg".into(),
//!     target: "clip.mp4".into(),
//!     cpu_cores: 8,
//!     ..Default::default()
//! };
//! job.validate()?;
//! ```

use crate::utils::to_string_vec;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Frame rate above which targets are re-encoded unless `keep_fps` is set
pub const DEFAULT_TARGET_FPS: u32 = 30;

/// Accelerator vendor for the per-frame transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Apple,
    Amd,
    Intel,
    Nvidia,
}

impl GpuVendor {
    /// Execution provider name forwarded to the transform worker
    pub fn execution_provider(&self) -> &'static str {
        match self {
            Self::Apple => "coreml",
            Self::Amd => "rocm",
            Self::Intel => "openvino",
            Self::Nvidia => "cuda",
        }
    }
}

/// Resolution restoration parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RestorationSettings {
    /// Balance between quality (0.0) and fidelity (1.0)
    pub fidelity: f32,
    /// Background upscale factor
    pub upscale: f32,
}

impl Default for RestorationSettings {
    fn default() -> Self {
        Self {
            fidelity: 0.7,
            upscale: 1.0,
        }
    }
}

/// Frame interpolation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpolationSettings {
    /// Recursive interpolation passes; each pass doubles the frame gaps
    pub times: u32,
}

impl Default for InterpolationSettings {
    fn default() -> Self {
        Self { times: 2 }
    }
}

/// Command template for an external batch tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCommand {
    /// Program followed by its arguments; `{input}`, `{output}` and stage
    /// parameters such as `{fidelity}` are substituted before spawning
    pub command: Vec<String>,
    /// Working directory for the tool (None = inherit)
    pub working_dir: Option<PathBuf>,
    /// Subdirectory of `{output}` the tool writes its frames into; they are
    /// moved up into `{output}` after the run (None = `{output}` itself)
    #[serde(default)]
    pub result_subdir: Option<PathBuf>,
}

/// External tool configuration, loadable from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Per-chunk transform worker (program + leading arguments)
    pub transform_command: Vec<String>,
    /// Resolution restoration tool
    pub restoration: StageCommand,
    /// Frame interpolation tool
    pub interpolation: StageCommand,
    /// x264 CRF used when assembling frames (lower = better)
    pub video_crf: u8,
    /// AAC bitrate for the re-muxed audio track
    pub audio_bitrate: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            transform_command: to_string_vec(["face-swap-worker"]),
            restoration: StageCommand {
                command: to_string_vec([
                    "python", "inference_codeformer.py",
                    "-w", "{fidelity}",
                    "--input_path", "{input}",
                    "--output_path", "{output}",
                    "--bg_upsampler", "realesrgan",
                    "--face_upsample",
                    "-s", "{upscale}",
                ]),
                working_dir: None,
                // CodeFormer always writes into <output_path>/final_results
                result_subdir: Some(PathBuf::from("final_results")),
            },
            interpolation: StageCommand {
                command: to_string_vec([
                    "python", "-m", "eval.interpolator_cli",
                    "--pattern", "{input}",
                    "--model_path", "pretrained_models/film_net/Style/saved_model",
                    "--times_to_interpolate", "{times}",
                ]),
                working_dir: None,
                result_subdir: None,
            },
            video_crf: 7,
            audio_bitrate: "128k".to_string(),
        }
    }
}

impl ToolConfig {
    /// Load tool configuration from file (missing file = defaults)
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: ToolConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save tool configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.transform_command.is_empty() {
            return Err(anyhow::anyhow!("Transform command must not be empty"));
        }
        if self.restoration.command.is_empty() || self.interpolation.command.is_empty() {
            return Err(anyhow::anyhow!("Post-process stage commands must not be empty"));
        }
        if self.video_crf > 51 {
            return Err(anyhow::anyhow!("Video CRF must be between 0 and 51"));
        }
        Ok(())
    }
}

/// Parameters of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Image containing the face to swap in
    pub source_face: PathBuf,
    /// Video or image whose faces are replaced
    pub target: PathBuf,
    /// Output file (None = `swapped-<target name>` beside the target)
    pub output: Option<PathBuf>,
    /// Keep the native frame rate instead of capping it
    pub keep_fps: bool,
    /// Keep the run directory after the run
    pub keep_frames: bool,
    /// Swap every face in a frame, not only the first one
    pub all_faces: bool,
    /// Memory ceiling in GB
    pub max_memory_gb: Option<u64>,
    /// CPU workers for the transform fan-out
    pub cpu_cores: usize,
    /// Accelerator vendor (None = CPU execution)
    pub gpu_vendor: Option<GpuVendor>,
    /// Threads per accelerator worker
    pub gpu_threads: usize,
    /// Extract one frame every N (0 or 1 = every frame)
    pub frame_skip: u32,
    /// Frame rate cap applied unless `keep_fps` is set
    pub target_fps: u32,
    pub restoration: Option<RestorationSettings>,
    pub interpolation: Option<InterpolationSettings>,
    /// Emit JSON events on stdout instead of progress bars
    pub json_output: bool,
    pub tools: ToolConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            source_face: PathBuf::new(),
            target: PathBuf::new(),
            output: None,
            keep_fps: false,
            keep_frames: false,
            all_faces: false,
            max_memory_gb: None,
            cpu_cores: (cores / 2).max(1),
            gpu_vendor: None,
            gpu_threads: 8,
            frame_skip: 0,
            target_fps: DEFAULT_TARGET_FPS,
            restoration: None,
            interpolation: None,
            json_output: false,
            tools: ToolConfig::default(),
        }
    }
}

impl JobConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.cpu_cores == 0 {
            return Err(anyhow::anyhow!("Number of CPU cores must be greater than 0"));
        }

        if self.gpu_threads == 0 {
            return Err(anyhow::anyhow!("Number of GPU threads must be greater than 0"));
        }

        if self.target_fps == 0 {
            return Err(anyhow::anyhow!("Target frame rate must be greater than 0"));
        }

        if self.max_memory_gb == Some(0) {
            return Err(anyhow::anyhow!("Max memory must be at least 1 GB"));
        }

        if let Some(restoration) = self.restoration {
            if !(0.0..=1.0).contains(&restoration.fidelity) {
                return Err(anyhow::anyhow!("Restoration fidelity must be between 0.0 and 1.0"));
            }
            if restoration.upscale <= 0.0 {
                return Err(anyhow::anyhow!("Restoration upscale must be greater than 0"));
            }
        }

        if let Some(interpolation) = self.interpolation {
            if interpolation.times == 0 || interpolation.times > 8 {
                return Err(anyhow::anyhow!("Interpolation times must be between 1 and 8"));
            }
        }

        self.tools.validate()
    }

    /// Skip interval, if skip extraction is enabled
    pub fn skip_interval(&self) -> Option<u32> {
        (self.frame_skip > 1).then_some(self.frame_skip)
    }

    /// Final output path
    pub fn output_path(&self) -> PathBuf {
        if let Some(ref output) = self.output {
            return output.clone();
        }
        let name = self
            .target
            .file_name()
            .unwrap_or_default()
            .to_string_lossy();
        self.target.with_file_name(format!("swapped-{}", name))
    }

}
