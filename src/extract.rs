//! # Frame Extractor Module
//!
//! Decompone un video in una sequenza di PNG numerati nella root della run
//! directory.
//!
//! ## Modalità:
//! - **Full**: ogni frame, indici da 1, ordine di decodifica preservato
//! - **Skip (K)**: solo i frame `n = 0, K, 2K, ...`; ogni file porta l'indice
//!   ORIGINALE `(j - 1) * K + 1`, quindi la sequenza è volutamente sparsa
//!   (`ceil(C / K)` frame per un video di C frame)
//!
//! Nessun retry per frame: un frame non decodificato lascia un buco nella
//! numerazione, tollerato a valle perché tutti lavorano su liste esplicite.

use crate::args;
use crate::file_manager::FileManager;
use crate::frames::{ffmpeg_frame_pattern, Frame, FrameSequence};
use crate::platform;
use crate::run_dir::RunDirectory;
use anyhow::Result;
use std::path::Path;
use tracing::{debug, info, warn};

/// Original 1-based frame index of the `compact_index`-th kept frame
pub fn original_index(compact_index: u64, interval: u32) -> u64 {
    compact_index.saturating_sub(1) * interval as u64 + 1
}

/// Number of frames skip extraction keeps from a `frame_count`-frame video
pub fn expected_skip_count(frame_count: u64, interval: u32) -> u64 {
    let interval = interval.max(1) as u64;
    (frame_count + interval - 1) / interval
}

/// ffmpeg-backed frame decomposition
pub struct FrameExtractor;

impl FrameExtractor {
    /// Extract frames of `video` into the run directory root
    pub async fn extract(video: &Path, run_dir: &RunDirectory, skip_interval: Option<u32>) -> Result<FrameSequence> {
        let removed = FileManager::remove_frames(run_dir.root()).await?;
        if removed > 0 {
            warn!("Removed {} stale frames from {}", removed, run_dir.root().display());
        }

        let sequence = match skip_interval {
            Some(interval) if interval > 1 => Self::extract_skip(video, run_dir, interval).await?,
            _ => Self::extract_all(video, run_dir.root()).await?,
        };

        if sequence.is_empty() {
            return Err(anyhow::anyhow!("No frames extracted from {}", video.display()));
        }

        if !sequence.is_contiguous() {
            let gaps = sequence.gaps();
            debug!("Frame sequence is sparse: {} gaps", gaps.len());
        }

        info!("Extracted {} frames from {}", sequence.len(), video.display());
        Ok(sequence)
    }

    async fn decode(video: &Path, output_dir: &Path, filter: Option<String>) -> Result<()> {
        let mut args = args!["-i", video.display()];
        if let Some(filter) = filter {
            args.extend(args!["-vf", filter]);
        }
        args.extend(args![
            "-vsync", "passthrough",
            "-pix_fmt", "rgb24",
            "-start_number", 1,
            output_dir.join(ffmpeg_frame_pattern()).display(),
        ]);

        platform::ffmpeg().args(args).output().await?;
        Ok(())
    }

    async fn extract_all(video: &Path, dir: &Path) -> Result<FrameSequence> {
        Self::decode(video, dir, None).await?;
        FrameSequence::scan(dir)
    }

    async fn extract_skip(video: &Path, run_dir: &RunDirectory, interval: u32) -> Result<FrameSequence> {
        let staging = run_dir.staging_dir();
        if staging.exists() {
            tokio::fs::remove_dir_all(&staging).await?;
        }
        tokio::fs::create_dir_all(&staging).await?;

        Self::decode(video, &staging, Some(format!("select=not(mod(n\\,{}))", interval))).await?;

        // Staged frames are numbered 1..=kept; rename to original positions
        let staged = FrameSequence::scan(&staging)?;
        for frame in staged.frames() {
            let index = original_index(frame.index, interval);
            let dest = run_dir.root().join(Frame::file_name(index));
            tokio::fs::rename(&frame.path, &dest).await?;
        }
        tokio::fs::remove_dir_all(&staging).await?;

        debug!("Skip extraction kept {} frames (every {}th)", staged.len(), interval);
        FrameSequence::scan(run_dir.root())
    }
}
