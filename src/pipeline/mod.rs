//! # Pipeline Module
//!
//! Separa le responsabilità della run in sottomoduli:
//! - `orchestrator`: sequenza degli stage con barriere complete
//! - `precheck`: precondizioni fatali, verificate prima di ogni stage
//! - `status`: progress bar oppure eventi JSON

pub mod orchestrator;
pub mod precheck;
pub mod status;

pub use orchestrator::{Pipeline, RunReport};
pub use precheck::Precheck;
pub use status::StatusReporter;
