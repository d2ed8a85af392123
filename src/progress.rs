//! # Progress Tracking Module
//!
//! Questo modulo gestisce il feedback visuale durante una run.
//!
//! ## Responsabilità:
//! - Progress bar con `indicatif` sulle unità di lavoro del transform
//! - Spinner per gli stage sequenziali (estrazione, encoding, tool esterni)
//! - Riepilogo finale della run
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:02:15] [========================================] 4/4 (100%) swapping in progress...
//! ```

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar over work units
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    pub fn new(total_units: u64) -> Self {
        let bar = ProgressBar::new(total_units);

        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Set absolute progress
    pub fn set_position(&self, done: u64, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(done);
    }

    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    /// Remove the bar from the terminal
    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }

    /// Create a spinner for indeterminate progress
    pub fn spinner(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();

        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }

        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));

        spinner
    }
}

/// Totals of one completed run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
    pub frames: usize,
    pub units: usize,
    pub frame_rate: Option<String>,
    pub output_size: u64,
    pub elapsed_seconds: f64,
}

impl RunSummary {
    pub fn format_summary(&self) -> String {
        format!(
            "Frames: {} | Work units: {} | Frame rate: {} | Output: {} | Time: {:.1}s",
            self.frames,
            self.units,
            self.frame_rate.as_deref().unwrap_or("n/a"),
            crate::file_manager::FileManager::format_size(self.output_size),
            self.elapsed_seconds
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_format() {
        let summary = RunSummary {
            frames: 90,
            units: 4,
            frame_rate: Some("30/1".to_string()),
            output_size: 2048,
            elapsed_seconds: 12.34,
        };
        let text = summary.format_summary();
        assert!(text.contains("Frames: 90"));
        assert!(text.contains("30/1"));
        assert!(text.contains("12.3s"));

        assert!(RunSummary::default().format_summary().contains("n/a"));
    }

    #[test]
    fn test_progress_position() {
        let progress = ProgressManager::new(1);
        progress.set_position(2, 4);
        progress.set_message("swapping");
        progress.clear();
    }
}
