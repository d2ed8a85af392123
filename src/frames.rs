//! # Frames Module
//!
//! A `Frame` is one still image on disk whose position in the video is the
//! integer index encoded in its file name. A `FrameSequence` is the ordered
//! set of frames of one directory.
//!
//! Ordering always comes from the parsed index, never from directory listing
//! order or lexical sorting: `frame_10.png` comes after `frame_9.png`.
//!
//! Indices are contiguous after full extraction. Skip extraction keeps the
//! original frame index in the name, so its sequences are sparse on purpose;
//! consumers work from explicit path lists and never assume contiguity.

use crate::file_manager::{FileManager, FRAME_EXTENSION};
use anyhow::Result;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Digits in extracted frame names (`000001.png`)
pub const FRAME_INDEX_WIDTH: usize = 6;

/// ffmpeg image2 output pattern matching [`Frame::file_name`]
pub fn ffmpeg_frame_pattern() -> String {
    format!("%0{}d.{}", FRAME_INDEX_WIDTH, FRAME_EXTENSION)
}

/// One extracted still image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: u64,
    pub path: PathBuf,
}

impl Frame {
    /// Canonical file name for a frame index
    pub fn file_name(index: u64) -> String {
        format!("{:0width$}.{}", index, FRAME_EXTENSION, width = FRAME_INDEX_WIDTH)
    }

    /// Parse the index from the trailing digits of the file stem.
    ///
    /// Accepts `000042.png` as well as tool output such as `frame_042.png`.
    pub fn parse_index(path: &Path) -> Option<u64> {
        let stem = path.file_stem()?.to_str()?;
        let digits_start = stem
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit())
            .last()
            .map(|(i, _)| i)?;
        stem[digits_start..].parse().ok()
    }

    pub fn from_path(path: PathBuf) -> Option<Self> {
        Self::parse_index(&path).map(|index| Self { index, path })
    }
}

/// Ordered frames of one directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSequence {
    frames: Vec<Frame>,
}

impl FrameSequence {
    /// Build from arbitrary frames; sorts by index
    pub fn from_frames(mut frames: Vec<Frame>) -> Self {
        frames.sort_by_key(|f| f.index);
        Self { frames }
    }

    /// Scan a directory for frame images, ordered by parsed index.
    ///
    /// Files whose names carry no index are ignored with a warning.
    pub fn scan(dir: &Path) -> Result<Self> {
        let frames = FileManager::list_frame_files(dir)?
            .into_iter()
            .filter_map(|path| {
                let frame = Frame::from_path(path.clone());
                if frame.is_none() {
                    warn!("Ignoring frame without index: {}", path.display());
                }
                frame
            })
            .collect();
        Ok(Self::from_frames(frames))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.frames.iter().map(|f| f.path.clone()).collect()
    }

    pub fn indices(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.index).collect()
    }

    /// True when indices increase by exactly one
    pub fn is_contiguous(&self) -> bool {
        self.frames.windows(2).all(|w| w[1].index == w[0].index + 1)
    }

    /// Missing index ranges between the first and last frame
    pub fn gaps(&self) -> Vec<Range<u64>> {
        self.frames
            .windows(2)
            .filter(|w| w[1].index > w[0].index + 1)
            .map(|w| (w[0].index + 1)..w[1].index)
            .collect()
    }
}
