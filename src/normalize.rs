//! # Frame Rate Normalizer Module
//!
//! Limita il lavoro per-frame: un target sopra il cap (default 30 fps) viene
//! ricodificato esattamente al cap dentro la run directory. Altrimenti, o con
//! `keep_fps`, il target viene copiato invariato così gli stage successivi
//! lavorano sempre su un file nella run directory.
//!
//! Dopo la normalizzazione il frame rate "esatto" usato per riassemblare è
//! quello normalizzato, non l'originale.

use crate::args;
use crate::config::JobConfig;
use crate::error::PipelineError;
use crate::platform;
use crate::probe::{FrameRate, MediaInfo};
use crate::run_dir::RunDirectory;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Video the rest of the pipeline works on
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSource {
    pub video: PathBuf,
    /// Exact rate frames will be extracted at
    pub frame_rate: FrameRate,
    /// True when the video was re-encoded
    pub normalized: bool,
}

/// Caps a video's frame rate
pub struct FrameRateNormalizer {
    target_fps: u32,
    keep_fps: bool,
    video_crf: u8,
}

impl FrameRateNormalizer {
    pub fn new(target_fps: u32, keep_fps: bool, video_crf: u8) -> Self {
        Self {
            target_fps,
            keep_fps,
            video_crf,
        }
    }

    pub fn from_job(job: &JobConfig) -> Self {
        Self::new(job.target_fps, job.keep_fps, job.tools.video_crf)
    }

    /// Whether a video at `rate` gets re-encoded
    pub fn needs_reencode(&self, rate: FrameRate) -> bool {
        !self.keep_fps && rate.as_f64() > self.target_fps as f64
    }

    /// Place the target (or its normalized copy) in the run directory
    pub async fn normalize(
        &self,
        target: &Path,
        info: &MediaInfo,
        run_dir: &RunDirectory,
    ) -> Result<NormalizedSource> {
        let native_rate = info
            .frame_rate
            .ok_or_else(|| PipelineError::FFmpeg(format!("unknown frame rate for {}", target.display())))?;

        if !self.needs_reencode(native_rate) {
            let copy = run_dir.source_copy(target);
            debug!("Using source at native {} fps: {}", native_rate, copy.display());
            tokio::fs::copy(target, &copy).await?;
            return Ok(NormalizedSource {
                video: copy,
                frame_rate: native_rate,
                normalized: false,
            });
        }

        let output = run_dir.normalized_video();
        info!(
            "🎞️ Re-encoding {} from {:.2} fps to {} fps",
            target.file_name().unwrap_or_default().to_string_lossy(),
            native_rate.as_f64(),
            self.target_fps
        );

        platform::ffmpeg()
            .args(args![
                "-i", target.display(),
                "-filter:v", format!("fps=fps={}", self.target_fps),
                "-c:v", "libx264",
                "-crf", self.video_crf,
                "-pix_fmt", "yuv420p",
                "-an",
                output.display(),
            ])
            .output()
            .await?;

        Ok(NormalizedSource {
            video: output,
            frame_rate: FrameRate::whole(self.target_fps),
            normalized: true,
        })
    }
}
