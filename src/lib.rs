//! # Face Swap Pipeline Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare della pipeline
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per altri consumatori
//!
//! ## Architettura dei moduli:
//! - `config`: `JobConfig` immutabile e `ToolConfig` dei tool esterni
//! - `error`: Tipi di errore custom e stage della pipeline
//! - `probe`: Frame rate e numero di frame via ffprobe
//! - `normalize`: Cap del frame rate
//! - `extract`: Estrazione dei frame (completa o skip)
//! - `transform`: Interfaccia del face swap per-frame
//! - `pool`: Partizionamento e worker pool fail-fast
//! - `postprocess`: Restoration e interpolation come stage pluggabili
//! - `assemble`: Encoding dei frame e remux dell'audio
//! - `governor`: Limite di memoria e piano di esecuzione
//! - `run_dir`: Layout della run directory
//! - `pipeline`: Orchestratore, precheck e status reporting
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use face_swap_pipeline::{JobConfig, Pipeline, ResourceGovernor};
//!
//! let job = JobConfig {
//!     source_face: "face.jpg".into(),
//!     target: "clip.mp4".into(),
//!     ..Default::default()
//! };
//! let plan = ResourceGovernor::apply(&job)?;
//! let report = Pipeline::new(job, plan)?.run().await?;
//! ```

pub mod assemble;
pub mod config;
pub mod error;
pub mod extract;
pub mod file_manager;
pub mod frames;
pub mod governor;
pub mod json_output;
pub mod normalize;
pub mod pipeline;
pub mod platform;
pub mod pool;
pub mod postprocess;
pub mod probe;
pub mod progress;
pub mod run_dir;
pub mod tool_resolver;
pub mod transform;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{GpuVendor, InterpolationSettings, JobConfig, RestorationSettings, ToolConfig};
pub use error::{PipelineError, PipelineStage};
pub use governor::{ExecutionPlan, ResourceGovernor};
pub use pipeline::{Pipeline, RunReport};
pub use transform::{CommandTransform, FrameTransform};
