//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom della pipeline.
//!
//! ## Responsabilità:
//! - Definisce `PipelineError` per categorizzare tutti gli errori possibili
//! - Identifica lo stage della pipeline che ha fallito (`PipelineStage`)
//! - Integra con `thiserror` per automatic error conversion
//! - Si converte in `anyhow::Error` per la propagazione con `?`
//!
//! ## Categorie di errori:
//! - **Precondizioni**: `Precondition`, `NoFaceDetected`, `MissingDependency`, `Validation`
//!   (fatali, prima che qualunque stage parta)
//! - **Stage**: `FFmpeg`, `ToolFailed`, `WorkerFailures`, `Stage`
//!   (fatali, riportano lo stage che ha fallito)
//! - **I/O**: `Io`
//!
//! I buchi nella numerazione dei frame (skip mode) NON sono errori.
//!
//! ## Esempio:
//! ```rust,ignore
//! if !face.exists() {
//!     return Err(PipelineError::Precondition("face image not found".to_string()).into());
//! }
//! ```

use std::fmt;

/// Named stages of one pipeline run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Probe,
    Normalize,
    Extract,
    Transform,
    Preview,
    Restore,
    Interpolate,
    Assemble,
    Remux,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::Normalize => "normalize",
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::Preview => "preview",
            Self::Restore => "restore",
            Self::Interpolate => "interpolate",
            Self::Assemble => "assemble",
            Self::Remux => "remux",
        }
    }

    /// Human readable status line shown while the stage runs
    pub fn status_message(&self) -> &'static str {
        match self {
            Self::Probe => "detecting video's FPS...",
            Self::Normalize => "normalizing frame rate...",
            Self::Extract => "extracting frames...",
            Self::Transform => "swapping in progress...",
            Self::Preview => "creating lowres video...",
            Self::Restore => "restoring resolution...",
            Self::Interpolate => "frame interpolation...",
            Self::Assemble => "creating video...",
            Self::Remux => "adding audio...",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Custom error types for the swap pipeline
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    FFmpeg(String),

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Dependency missing: {0}")]
    MissingDependency(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("No face detected in source image: {0}")]
    NoFaceDetected(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{failed} of {total} chunks failed ({aborted} aborted): {first_error}")]
    WorkerFailures {
        failed: usize,
        aborted: usize,
        total: usize,
        first_error: String,
    },

    #[error("stage '{stage}' failed: {detail}")]
    Stage {
        stage: PipelineStage,
        detail: String,
    },
}

impl PipelineError {
    /// Wrap any error as a failure of `stage`, keeping the full cause chain in the message
    pub fn stage(stage: PipelineStage, err: &anyhow::Error) -> Self {
        Self::Stage {
            stage,
            detail: format!("{:#}", err),
        }
    }

    /// The failing stage, if this error was raised by one
    pub fn failed_stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
