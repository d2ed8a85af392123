//! # Status Reporting Module
//!
//! Unifica progress bar e output JSON in un singolo reporter thread-safe,
//! chiamato dal coordinatore a ogni stage e a ogni chunk completato.

use crate::json_output::JsonMessage;
use crate::progress::{ProgressManager, RunSummary};
use crate::error::PipelineStage;
use indicatif::ProgressBar;
use std::sync::Mutex;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Terminal,
    Json,
    Silent,
}

/// Reports stage transitions and chunk progress
pub struct StatusReporter {
    mode: Mode,
    spinner: Mutex<Option<ProgressBar>>,
    bar: Mutex<Option<ProgressManager>>,
}

impl StatusReporter {
    pub fn new(json_output: bool) -> Self {
        Self::with_mode(if json_output { Mode::Json } else { Mode::Terminal })
    }

    /// No terminal or JSON output, log lines only
    pub fn silent() -> Self {
        Self::with_mode(Mode::Silent)
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            spinner: Mutex::new(None),
            bar: Mutex::new(None),
        }
    }

    pub fn is_json(&self) -> bool {
        self.mode == Mode::Json
    }

    pub fn emit(&self, message: JsonMessage) {
        if self.mode == Mode::Json {
            message.emit();
        }
    }

    fn clear_indicators(&self) {
        if let Ok(mut spinner) = self.spinner.lock() {
            if let Some(spinner) = spinner.take() {
                spinner.finish_and_clear();
            }
        }
        if let Ok(mut bar) = self.bar.lock() {
            if let Some(bar) = bar.take() {
                bar.clear();
            }
        }
    }

    /// A stage has started
    pub fn stage(&self, stage: PipelineStage) {
        info!("{}", stage.status_message());
        self.clear_indicators();
        match self.mode {
            Mode::Json => JsonMessage::stage(stage).emit(),
            Mode::Terminal => {
                if let Ok(mut spinner) = self.spinner.lock() {
                    *spinner = Some(ProgressManager::spinner(stage.status_message()));
                }
            }
            Mode::Silent => {}
        }
    }

    /// `done` of `total` transform units finished
    pub fn chunk(&self, done: usize, total: usize) {
        match self.mode {
            Mode::Json => JsonMessage::chunk_complete(done, total).emit(),
            Mode::Terminal => {
                if let Ok(mut spinner) = self.spinner.lock() {
                    if let Some(spinner) = spinner.take() {
                        spinner.finish_and_clear();
                    }
                }
                if let Ok(mut bar) = self.bar.lock() {
                    let bar = bar.get_or_insert_with(|| ProgressManager::new(total as u64));
                    bar.set_position(done as u64, total as u64);
                    bar.set_message(PipelineStage::Transform.status_message());
                }
            }
            Mode::Silent => {}
        }
    }

    pub fn finish(&self, summary: &RunSummary) {
        self.clear_indicators();
        info!("swap successful! {}", summary.format_summary());
    }

    pub fn fail(&self, err: &anyhow::Error) {
        self.clear_indicators();
        error!("{:#}", err);
        self.emit(JsonMessage::error(err));
    }
}
