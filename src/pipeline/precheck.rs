//! # Precheck Module
//!
//! Precondizioni fatali verificate prima che qualunque stage parta:
//! - ffmpeg / ffprobe disponibili
//! - face e target esistenti, face leggibile come immagine
//! - output diverso dal target
//! - tooling dell'acceleratore richiesto presente
//! - almeno un volto rilevato nella face

use crate::config::{GpuVendor, JobConfig};
use crate::error::PipelineError;
use crate::file_manager::FileManager;
use crate::platform::PlatformCommands;
use crate::transform::FrameTransform;
use anyhow::Result;
use std::path::Path;
use tracing::debug;

pub struct Precheck;

impl Precheck {
    /// Run every precondition check in order
    pub async fn run(job: &JobConfig, transform: &dyn FrameTransform) -> Result<()> {
        Self::check_tools()?;
        Self::check_inputs(job)?;
        Self::check_accelerator(job.gpu_vendor).await?;
        Self::check_face(&job.source_face, transform).await?;
        debug!("Prechecks passed");
        Ok(())
    }

    pub fn check_tools() -> Result<()> {
        PlatformCommands::instance().verify_required_tools()
    }

    /// Face and target exist, the face is an image, and output != target
    pub fn check_inputs(job: &JobConfig) -> Result<()> {
        if !job.source_face.is_file() {
            return Err(PipelineError::Precondition(format!(
                "face image not found: {}",
                job.source_face.display()
            ))
            .into());
        }

        image::image_dimensions(&job.source_face).map_err(|e| {
            PipelineError::Precondition(format!("cannot read face image {}: {}", job.source_face.display(), e))
        })?;

        if !job.target.is_file() {
            return Err(PipelineError::Precondition(format!("target not found: {}", job.target.display())).into());
        }

        if !FileManager::is_image(&job.target) && !FileManager::is_video(&job.target) {
            return Err(PipelineError::Precondition(format!(
                "unsupported target format: {}",
                job.target.display()
            ))
            .into());
        }

        if job.output_path() == job.target {
            return Err(PipelineError::Precondition("output must differ from the target".to_string()).into());
        }

        Ok(())
    }

    /// The tooling behind the requested accelerator is installed
    pub async fn check_accelerator(vendor: Option<GpuVendor>) -> Result<()> {
        let commands = PlatformCommands::instance();
        match vendor {
            Some(GpuVendor::Nvidia) if !commands.is_command_available("nvidia-smi").await => {
                Err(PipelineError::MissingDependency(
                    "--gpu-vendor nvidia requires CUDA drivers (nvidia-smi not found)".to_string(),
                )
                .into())
            }
            Some(GpuVendor::Amd) if !commands.is_command_available("rocm-smi").await => {
                Err(PipelineError::MissingDependency(
                    "--gpu-vendor amd requires ROCm (rocm-smi not found)".to_string(),
                )
                .into())
            }
            Some(GpuVendor::Apple) if !cfg!(target_os = "macos") => Err(PipelineError::MissingDependency(
                "--gpu-vendor apple requires macOS with CoreML".to_string(),
            )
            .into()),
            _ => Ok(()),
        }
    }

    pub async fn check_face(source_face: &Path, transform: &dyn FrameTransform) -> Result<()> {
        if !transform.source_has_face(source_face).await? {
            return Err(PipelineError::NoFaceDetected(source_face.display().to_string()).into());
        }
        Ok(())
    }
}
