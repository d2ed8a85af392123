//! # Video Assembler Module
//!
//! Ricompone i frame in un video e ci rimette l'audio del target originale.
//!
//! ## Assemble:
//! - i frame vengono ordinati per indice numerico e scritti in una lista
//!   esplicita per il concat demuxer di ffmpeg, quindi la numerazione sparsa
//!   dello skip mode non è un problema
//! - encoding libx264 / yuv420p al frame rate richiesto, CRF configurabile
//! - il numero di frame in uscita è esattamente quello in ingresso
//!
//! ## Remux:
//! - video copiato (`-c:v copy`), audio dal target PRIMA della
//!   normalizzazione, ricodificato AAC
//! - target senza audio: il video assemblato viene spostato così com'è

use crate::args;
use crate::config::ToolConfig;
use crate::error::PipelineError;
use crate::file_manager::FileManager;
use crate::frames::{Frame, FrameSequence};
use crate::platform;
use crate::probe::FrameRate;
use anyhow::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Frame rate of the assembled video that keeps the source duration.
///
/// Skip extraction keeps one frame in `interval`, and interpolation
/// multiplies the kept frames, so the rate scales by both.
pub fn output_frame_rate(
    exact: FrameRate,
    skip_interval: Option<u32>,
    kept_frames: usize,
    final_frames: usize,
) -> Result<FrameRate> {
    let interval = skip_interval.unwrap_or(1).max(1) as u64;
    if kept_frames == 0 || final_frames == 0 {
        return Err(PipelineError::Validation("cannot derive a frame rate from zero frames".to_string()).into());
    }
    exact
        .scaled(final_frames as u64, kept_frames as u64 * interval)
        .ok_or_else(|| PipelineError::Validation(format!("invalid output frame rate from {}", exact)).into())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Quote a path for a concat demuxer `file` directive
fn concat_entry(path: &Path) -> String {
    format!("file '{}'", path.display().to_string().replace('\'', "'\\''"))
}

/// ffmpeg-backed frame assembly and audio remux
#[derive(Debug, Clone)]
pub struct VideoAssembler {
    crf: u8,
    audio_bitrate: String,
}

impl VideoAssembler {
    pub fn new(crf: u8, audio_bitrate: impl Into<String>) -> Self {
        Self {
            crf,
            audio_bitrate: audio_bitrate.into(),
        }
    }

    pub fn from_tools(tools: &ToolConfig) -> Self {
        Self::new(tools.video_crf, tools.audio_bitrate.clone())
    }

    /// Encode `frames` at `fps` into `output`
    pub async fn assemble(&self, frames: &[PathBuf], fps: FrameRate, output: &Path) -> Result<PathBuf> {
        let sequence = FrameSequence::from_frames(
            frames
                .iter()
                .filter_map(|path| {
                    let frame = Frame::from_path(path.clone());
                    if frame.is_none() {
                        warn!("Skipping frame without index: {}", path.display());
                    }
                    frame
                })
                .collect(),
        );
        if sequence.is_empty() {
            return Err(PipelineError::Validation("no frames to assemble".to_string()).into());
        }

        let list_dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&list_dir).await?;
        let list = self.write_concat_list(&sequence, fps, &list_dir)?;

        debug!("Assembling {} frames at {} fps into {}", sequence.len(), fps, output.display());
        platform::ffmpeg()
            .args(args![
                "-f", "concat",
                "-safe", 0,
                "-i", list.path().display(),
                "-frames:v", sequence.len(),
                "-r", fps,
                "-vsync", "cfr",
                "-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2",
                "-c:v", "libx264",
                "-crf", self.crf,
                "-pix_fmt", "yuv420p",
                output.display(),
            ])
            .output()
            .await?;

        info!("🎬 Assembled {} frames at {:.3} fps", sequence.len(), fps.as_f64());
        Ok(output.to_path_buf())
    }

    fn write_concat_list(&self, sequence: &FrameSequence, fps: FrameRate, dir: &Path) -> Result<tempfile::NamedTempFile> {
        let frame_duration = fps.den() as f64 / fps.num() as f64;
        let mut list = tempfile::Builder::new()
            .prefix(".frames-")
            .suffix(".txt")
            .tempfile_in(dir)?;

        writeln!(list, "ffconcat version 1.0")?;
        for frame in sequence.frames() {
            let path = absolute(&frame.path)?;
            writeln!(list, "{}", concat_entry(&path))?;
            writeln!(list, "duration {:.9}", frame_duration)?;
        }
        // The last entry's duration only applies when the file is repeated
        if let Some(last) = sequence.frames().last() {
            writeln!(list, "{}", concat_entry(&absolute(&last.path)?))?;
        }
        list.flush()?;
        Ok(list)
    }

    /// Mux the audio of `original_target` with `video` into `output`.
    ///
    /// Without an audio track in the target the video is moved as-is.
    pub async fn remux_audio(&self, video: &Path, original_target: &Path, has_audio: bool, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        if !has_audio {
            info!("Target has no audio track, keeping video only");
            FileManager::move_file(video, output).await?;
            return Ok(());
        }

        platform::ffmpeg()
            .args(args![
                "-i", video.display(),
                "-i", original_target.display(),
                "-map", "0:v:0",
                "-map", "1:a:0",
                "-c:v", "copy",
                "-c:a", "aac",
                "-b:a", self.audio_bitrate,
                output.display(),
            ])
            .output()
            .await?;

        debug!("Muxed audio from {} into {}", original_target.display(), output.display());
        Ok(())
    }
}
