//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato in JSON per chi pilota la
//! pipeline da un altro processo (una UI, uno script).
//!
//! ## Responsabilità:
//! - Emette un messaggio JSON per riga su stdout
//! - Fornisce un'interfaccia standardizzata per comunicazione inter-processo
//!
//! ## Tipi di messaggi:
//! - `start`: inizio della run, con i parametri principali del job
//! - `stage`: uno stage della pipeline è iniziato
//! - `chunk_complete`: un'unità di lavoro del transform è terminata
//! - `complete`: output scritto
//! - `error`: run fallita, con lo stage se noto

use crate::config::{GpuVendor, JobConfig};
use crate::error::PipelineStage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage {
    /// Inizio della run
    Start {
        source_face: PathBuf,
        target: PathBuf,
        output: PathBuf,
        config: JsonConfig,
    },

    /// Inizio di uno stage
    Stage { stage: String, message: String },

    /// Fine di un chunk del transform
    ChunkComplete {
        done: usize,
        total: usize,
        percentage: f64,
    },

    /// Run completata
    Complete {
        output: PathBuf,
        frames: usize,
        frame_rate: Option<String>,
        duration_seconds: f64,
    },

    /// Errore fatale
    Error {
        message: String,
        stage: Option<String>,
    },
}

/// Parametri del job riportati nel messaggio `start`
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonConfig {
    pub workers: usize,
    pub gpu_vendor: Option<GpuVendor>,
    pub frame_skip: u32,
    pub keep_fps: bool,
    pub restoration: bool,
    pub interpolation: bool,
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn start(job: &JobConfig, workers: usize) -> Self {
        Self::Start {
            source_face: job.source_face.clone(),
            target: job.target.clone(),
            output: job.output_path(),
            config: JsonConfig {
                workers,
                gpu_vendor: job.gpu_vendor,
                frame_skip: job.frame_skip,
                keep_fps: job.keep_fps,
                restoration: job.restoration.is_some(),
                interpolation: job.interpolation.is_some(),
            },
        }
    }

    pub fn stage(stage: PipelineStage) -> Self {
        Self::Stage {
            stage: stage.as_str().to_string(),
            message: stage.status_message().to_string(),
        }
    }

    pub fn chunk_complete(done: usize, total: usize) -> Self {
        let percentage = if total > 0 {
            (done as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        Self::ChunkComplete { done, total, percentage }
    }

    pub fn complete(output: PathBuf, frames: usize, frame_rate: Option<String>, duration_seconds: f64) -> Self {
        Self::Complete {
            output,
            frames,
            frame_rate,
            duration_seconds,
        }
    }

    /// Crea un messaggio di errore, con lo stage se l'errore ne porta uno
    pub fn error(err: &anyhow::Error) -> Self {
        let stage = err
            .downcast_ref::<crate::error::PipelineError>()
            .and_then(|e| e.failed_stage())
            .map(|s| s.as_str().to_string());
        Self::Error {
            message: format!("{:#}", err),
            stage,
        }
    }
}
