//! # Run Directory Module
//!
//! Centralizza il layout della run directory, l'unica superficie di
//! coordinamento tra gli stage. Nessuno stato in memoria attraversa i
//! confini tra stage o processi.
//!
//! ## Layout (versione [`LAYOUT_VERSION`]):
//! ```text
//! <target_dir>/<target_stem>/
//!   000001.png ...                    frame sequence (root)
//!   run.json                          manifest
//!   source.<ext> | normalized.mp4     copia del target usata dagli stage
//!   lowres.mp4                        anteprima prima della restoration
//!   assembled.mp4                     video ricodificato senza audio
//!   swapped_lowres/                   frame dopo lo swap, prima del post-processing
//!   final_results/                    frame restaurati
//!   final_results/interpolated_frames/ frame interpolati
//!   .chunks/                          liste di frame per i worker
//!   .staging/                         estrazione skip-mode
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Version of the directory contract below; bump on any layout change
pub const LAYOUT_VERSION: u32 = 1;

pub const MANIFEST_FILE: &str = "run.json";
pub const NORMALIZED_VIDEO: &str = "normalized.mp4";
pub const ASSEMBLED_VIDEO: &str = "assembled.mp4";
pub const LOWRES_PREVIEW: &str = "lowres.mp4";
pub const LOWRES_DIR: &str = "swapped_lowres";
pub const FINAL_RESULTS_DIR: &str = "final_results";
pub const INTERPOLATED_DIR: &str = "interpolated_frames";
pub const CHUNKS_DIR: &str = ".chunks";
pub const STAGING_DIR: &str = ".staging";

/// Staged frame directories produced by the post-process stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDir {
    /// Frames straight out of the transform
    Root,
    /// Transform output moved aside before post-processing
    Lowres,
    /// Restoration output
    FinalResults,
    /// Interpolation output
    Interpolated,
}

/// Persisted description of a run, written when the directory is prepared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub layout_version: u32,
    pub target: PathBuf,
    pub source_face: PathBuf,
    /// Exact frame rate the frames were extracted at, as `num/den`
    pub frame_rate: Option<String>,
    pub skip_interval: Option<u32>,
    pub created_at: u64,
}

/// Per-job working directory named after the target's base name
#[derive(Debug, Clone)]
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    /// `<target_dir>/<target_stem>`
    pub fn for_target(target: &Path) -> Result<Self> {
        let stem = target
            .file_stem()
            .ok_or_else(|| anyhow::anyhow!("Invalid target name: {}", target.display()))?;
        let root = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(stem),
            _ => PathBuf::from(stem),
        };
        Ok(Self { root })
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory; an existing one is reused as-is
    pub async fn prepare(&self) -> Result<()> {
        if self.root.exists() {
            debug!("Reusing existing run directory: {}", self.root.display());
            if let Some(manifest) = self.read_manifest().await? {
                if manifest.layout_version != LAYOUT_VERSION {
                    warn!(
                        "Run directory {} uses layout v{}, expected v{}",
                        self.root.display(),
                        manifest.layout_version,
                        LAYOUT_VERSION
                    );
                }
            }
        }
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage_dir(&self, stage: StageDir) -> PathBuf {
        match stage {
            StageDir::Root => self.root.clone(),
            StageDir::Lowres => self.root.join(LOWRES_DIR),
            StageDir::FinalResults => self.root.join(FINAL_RESULTS_DIR),
            StageDir::Interpolated => self.root.join(FINAL_RESULTS_DIR).join(INTERPOLATED_DIR),
        }
    }

    /// Unmodified copy of the target, keeping its extension
    pub fn source_copy(&self, target: &Path) -> PathBuf {
        match target.extension() {
            Some(ext) => self.root.join(format!("source.{}", ext.to_string_lossy())),
            None => self.root.join("source"),
        }
    }

    pub fn normalized_video(&self) -> PathBuf {
        self.root.join(NORMALIZED_VIDEO)
    }

    pub fn assembled_video(&self) -> PathBuf {
        self.root.join(ASSEMBLED_VIDEO)
    }

    pub fn lowres_preview(&self) -> PathBuf {
        self.root.join(LOWRES_PREVIEW)
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.root.join(CHUNKS_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub async fn write_manifest(&self, manifest: &RunManifest) -> Result<()> {
        let content = serde_json::to_string_pretty(manifest)?;
        tokio::fs::write(self.manifest_path(), content).await?;
        Ok(())
    }

    pub async fn read_manifest(&self) -> Result<Option<RunManifest>> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content).ok())
    }

    /// Delete the whole run directory
    pub async fn remove(&self) -> Result<()> {
        if self.root.exists() {
            tokio::fs::remove_dir_all(&self.root).await?;
            debug!("Removed run directory: {}", self.root.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_named_after_target() {
        let run_dir = RunDirectory::for_target(Path::new("/videos/clip.mp4")).unwrap();
        assert_eq!(run_dir.root(), Path::new("/videos/clip"));

        let run_dir = RunDirectory::for_target(Path::new("clip.mp4")).unwrap();
        assert_eq!(run_dir.root(), Path::new("clip"));
    }

    #[test]
    fn test_stage_dirs() {
        let run_dir = RunDirectory::at("/run");
        assert_eq!(run_dir.stage_dir(StageDir::Root), PathBuf::from("/run"));
        assert_eq!(run_dir.stage_dir(StageDir::Lowres), PathBuf::from("/run/swapped_lowres"));
        assert_eq!(run_dir.stage_dir(StageDir::FinalResults), PathBuf::from("/run/final_results"));
        assert_eq!(
            run_dir.stage_dir(StageDir::Interpolated),
            PathBuf::from("/run/final_results/interpolated_frames")
        );
        assert_eq!(run_dir.source_copy(Path::new("/x/clip.MOV")), PathBuf::from("/run/source.MOV"));
    }

    #[tokio::test]
    async fn test_manifest_roundtrip_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let run_dir = RunDirectory::at(temp_dir.path().join("clip"));
        run_dir.prepare().await.unwrap();
        assert!(run_dir.read_manifest().await.unwrap().is_none());

        let manifest = RunManifest {
            layout_version: LAYOUT_VERSION,
            target: PathBuf::from("clip.mp4"),
            source_face: PathBuf::from("face.jpg"),
            frame_rate: Some("30000/1001".to_string()),
            skip_interval: None,
            created_at: 0,
        };
        run_dir.write_manifest(&manifest).await.unwrap();
        assert_eq!(run_dir.read_manifest().await.unwrap(), Some(manifest));

        // Reusing an existing directory is allowed
        run_dir.prepare().await.unwrap();

        run_dir.remove().await.unwrap();
        assert!(!run_dir.root().exists());
    }
}
