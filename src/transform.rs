//! # Per-frame Transform Module
//!
//! The face swap itself is an external capability. The pipeline only needs
//! two things from it, expressed by [`FrameTransform`]:
//! - does the source image contain a usable face
//! - rewrite a list of frame files in place
//!
//! [`CommandTransform`] is the production implementation: every call spawns
//! the configured worker command over a frame list file, so each pool unit
//! runs in its own process.
//!
//! Worker command line:
//! ```text
//! <command...> --face <image> --check-face
//! <command...> --face <image> --frames-list <file> [--all-faces]
//!              --execution-provider <cpu|cuda|...> [--gpu-threads <n>]
//! ```

use crate::governor::ExecutionPlan;
use crate::platform::ToolCommand;
use anyhow::Result;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Opaque face swap over frame files
#[async_trait]
pub trait FrameTransform: Send + Sync {
    /// True when a face is detected in the source image
    async fn source_has_face(&self, source_face: &Path) -> Result<bool>;

    /// Rewrite every frame in `frames` in place
    async fn transform_frames(&self, source_face: &Path, frames: &[PathBuf]) -> Result<()>;
}

/// Runs the configured worker command as a child process per call
pub struct CommandTransform {
    command: Vec<String>,
    all_faces: bool,
    execution_provider: String,
    accelerator_threads: Option<usize>,
    envs: Vec<(String, String)>,
    list_dir: PathBuf,
}

impl CommandTransform {
    /// `list_dir` holds the temporary frame list files handed to workers
    pub fn new(command: Vec<String>, all_faces: bool, plan: &ExecutionPlan, list_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            all_faces,
            execution_provider: plan.execution_provider.to_string(),
            accelerator_threads: plan.accelerator_threads,
            envs: plan.child_env.clone(),
            list_dir: list_dir.into(),
        }
    }

    fn base_command(&self, source_face: &Path) -> Result<ToolCommand> {
        Ok(ToolCommand::from_argv("transform", &self.command)?
            .envs(&self.envs)
            .args(["--face".to_string(), source_face.display().to_string()]))
    }

    /// Write the frame list for one unit of work
    fn write_frame_list(&self, frames: &[PathBuf]) -> Result<tempfile::NamedTempFile> {
        std::fs::create_dir_all(&self.list_dir)?;
        let mut list = tempfile::Builder::new()
            .prefix("chunk-")
            .suffix(".txt")
            .tempfile_in(&self.list_dir)?;
        for frame in frames {
            writeln!(list, "{}", frame.display())?;
        }
        list.flush()?;
        Ok(list)
    }
}

#[async_trait]
impl FrameTransform for CommandTransform {
    async fn source_has_face(&self, source_face: &Path) -> Result<bool> {
        self.base_command(source_face)?
            .args(["--check-face"])
            .status_ok()
            .await
    }

    async fn transform_frames(&self, source_face: &Path, frames: &[PathBuf]) -> Result<()> {
        // Removed when dropped, after the worker has exited
        let list = self.write_frame_list(frames)?;

        let mut cmd = self.base_command(source_face)?
            .args(["--frames-list".to_string(), list.path().display().to_string()])
            .args(["--execution-provider".to_string(), self.execution_provider.clone()]);
        if self.all_faces {
            cmd = cmd.args(["--all-faces"]);
        }
        if let Some(threads) = self.accelerator_threads {
            cmd = cmd.args(["--gpu-threads".to_string(), threads.to_string()]);
        }

        debug!("Transforming {} frames via {}", frames.len(), list.path().display());
        cmd.output().await?;
        Ok(())
    }
}
