//! # File Management Module
//!
//! Questo modulo gestisce le operazioni sui file usate come "IPC" tra gli stage.
//!
//! ## Responsabilità:
//! - Determinazione formato file (immagine vs video)
//! - Elenco dei frame (`*.png`) in una directory, non ricorsivo
//! - Spostamento e copia di frame tra le directory di stage
//! - Rimozione della run directory a fine job
//! - Formattazione human-readable delle dimensioni
//!
//! ## Formati supportati:
//! - **Immagini**: JPG, JPEG, PNG, WebP
//! - **Video**: MP4, MOV, AVI, MKV, WebM
//!
//! Tutte le operazioni sono sincrone rispetto allo stage che le invoca:
//! uno stage termina completamente prima che il successivo inizi.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

/// Extension of every frame image exchanged between stages
pub const FRAME_EXTENSION: &str = "png";

/// File operations shared by the pipeline stages
pub struct FileManager;

impl FileManager {
    fn has_extension(path: &Path, extensions: &[&str]) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .map(|ext| extensions.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Check if a file is an image
    pub fn is_image(path: &Path) -> bool {
        Self::has_extension(path, &["jpg", "jpeg", "png", "webp"])
    }

    /// Check if a file is a video
    pub fn is_video(path: &Path) -> bool {
        Self::has_extension(path, &["mp4", "mov", "avi", "mkv", "webm"])
    }

    /// Check if a path is a frame image
    pub fn is_frame_file(path: &Path) -> bool {
        Self::has_extension(path, &[FRAME_EXTENSION])
    }

    fn list_files(dir: &Path, keep: fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if keep(entry.path()) {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }

    /// All frame images directly inside `dir`, in no particular order
    pub fn list_frame_files(dir: &Path) -> Result<Vec<PathBuf>> {
        Self::list_files(dir, Self::is_frame_file)
    }

    /// Images of any supported format directly inside `dir`, sorted by name
    pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Self::list_files(dir, Self::is_image)?;
        files.sort();
        Ok(files)
    }

    /// Move every frame from `from` into `to`, keeping file names
    pub async fn move_frames(from: &Path, to: &Path) -> Result<usize> {
        fs::create_dir_all(to).await?;
        let files = Self::list_frame_files(from)?;
        for file in &files {
            let dest = to.join(file.file_name().unwrap_or_default());
            debug!("Moving frame {} -> {}", file.display(), dest.display());
            fs::rename(file, &dest).await?;
        }
        Ok(files.len())
    }

    /// Copy every frame from `from` into `to`, keeping file names
    pub async fn copy_frames(from: &Path, to: &Path) -> Result<usize> {
        fs::create_dir_all(to).await?;
        let files = Self::list_frame_files(from)?;
        for file in &files {
            let dest = to.join(file.file_name().unwrap_or_default());
            fs::copy(file, &dest).await?;
        }
        debug!("Copied {} frames {} -> {}", files.len(), from.display(), to.display());
        Ok(files.len())
    }

    /// Delete every frame directly inside `dir`
    pub async fn remove_frames(dir: &Path) -> Result<usize> {
        let files = Self::list_frame_files(dir)?;
        for file in &files {
            fs::remove_file(file).await?;
        }
        Ok(files.len())
    }

    /// Move a file, falling back to copy + delete across filesystems
    pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        if fs::rename(from, to).await.is_err() {
            fs::copy(from, to).await?;
            fs::remove_file(from).await?;
        }
        Ok(())
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}
