//! # Post-Process Stage Orchestrator
//!
//! Esegue gli stage opzionali sui frame già swappati, comunicando solo
//! tramite directory della run directory.
//!
//! ## Coreografia (ogni passo termina prima del successivo):
//! 1. anteprima low-res (`lowres.mp4`) dai frame correnti, se abilitata
//! 2. restoration: input = root, output = `final_results/`
//! 3. i frame della root vengono spostati in `swapped_lowres/`
//! 4. senza restoration, `swapped_lowres/` viene copiata in `final_results/`
//! 5. interpolation: input = `final_results/`, output =
//!    `final_results/interpolated_frames/`
//! 6. i frame finali (interpolati, altrimenti restaurati) tornano nella root
//!
//! Dopo l'interpolazione il numero di frame cambia: i frame finali vengono
//! rinumerati da 1 quando tornano nella root.
//!
//! Gli stage sono pluggabili tramite [`BatchStage`]; l'implementazione di
//! default [`CommandStage`] lancia un template di comando configurabile.
//!
//! Per i target immagine solo la restoration viene eseguita, su una singola
//! immagine isolata in `.staging/` ([`PostProcessor::restore_image`]).

use crate::config::{InterpolationSettings, JobConfig, RestorationSettings, StageCommand};
use crate::error::{PipelineError, PipelineStage};
use crate::file_manager::FileManager;
use crate::frames::{Frame, FrameSequence};
use crate::assemble::VideoAssembler;
use crate::platform::ToolCommand;
use crate::probe::FrameRate;
use crate::run_dir::{RunDirectory, StageDir};
use crate::utils::substitute_placeholders;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Named parameters substituted into a stage's command template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageParams(Vec<(String, String)>);

impl StageParams {
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.push((key.to_string(), value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Placeholder values for a template, including `{input}` and `{output}`
    pub fn placeholders(&self, input: &Path, output: &Path) -> Vec<(&str, String)> {
        let mut values = vec![
            ("input", input.display().to_string()),
            ("output", output.display().to_string()),
        ];
        values.extend(self.0.iter().map(|(k, v)| (k.as_str(), v.clone())));
        values
    }
}

impl From<RestorationSettings> for StageParams {
    fn from(settings: RestorationSettings) -> Self {
        Self::default()
            .with("fidelity", settings.fidelity)
            .with("upscale", settings.upscale)
    }
}

impl From<InterpolationSettings> for StageParams {
    fn from(settings: InterpolationSettings) -> Self {
        Self::default().with("times", settings.times)
    }
}

/// External batch tool over a directory of frames
#[async_trait]
pub trait BatchStage: Send + Sync {
    fn name(&self) -> &str;

    /// Process every frame in `input`, writing results to `output`.
    /// A nonzero exit is an error.
    async fn run(&self, input: &Path, output: &Path, params: &StageParams) -> Result<()>;
}

/// Batch stage backed by a command template
pub struct CommandStage {
    name: String,
    command: StageCommand,
    envs: Vec<(String, String)>,
}

impl CommandStage {
    pub fn new(name: impl Into<String>, command: StageCommand, envs: Vec<(String, String)>) -> Self {
        Self {
            name: name.into(),
            command,
            envs,
        }
    }

    /// Command line for one run, placeholders substituted
    pub fn argv(&self, input: &Path, output: &Path, params: &StageParams) -> Vec<String> {
        substitute_placeholders(&self.command.command, &params.placeholders(input, output))
    }
}

#[async_trait]
impl BatchStage for CommandStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &Path, output: &Path, params: &StageParams) -> Result<()> {
        tokio::fs::create_dir_all(output).await?;
        ToolCommand::from_argv(self.name.clone(), &self.argv(input, output, params))?
            .envs(&self.envs)
            .current_dir(self.command.working_dir.as_deref())
            .output()
            .await?;

        if let Some(ref subdir) = self.command.result_subdir {
            let nested = output.join(subdir);
            if nested.is_dir() {
                let moved = FileManager::move_frames(&nested, output).await?;
                debug!("Moved {} {} frames up from {}", moved, self.name, nested.display());
            }
        }
        Ok(())
    }
}

/// Runs the optional stages in their fixed order
pub struct PostProcessor {
    restoration: Option<(Arc<dyn BatchStage>, StageParams)>,
    interpolation: Option<(Arc<dyn BatchStage>, StageParams)>,
    preview: Option<VideoAssembler>,
}

impl PostProcessor {
    pub fn new() -> Self {
        Self {
            restoration: None,
            interpolation: None,
            preview: None,
        }
    }

    /// Stages configured by the job, as command stages.
    ///
    /// The low-res preview is produced whenever restoration runs.
    pub fn from_job(job: &JobConfig, envs: &[(String, String)]) -> Self {
        let mut processor = Self::new();
        if let Some(settings) = job.restoration {
            let stage = CommandStage::new("restoration", job.tools.restoration.clone(), envs.to_vec());
            processor = processor
                .with_restoration(Arc::new(stage), settings.into())
                .with_preview(VideoAssembler::from_tools(&job.tools));
        }
        if let Some(settings) = job.interpolation {
            let stage = CommandStage::new("interpolation", job.tools.interpolation.clone(), envs.to_vec());
            processor = processor.with_interpolation(Arc::new(stage), settings.into());
        }
        processor
    }

    pub fn with_restoration(mut self, stage: Arc<dyn BatchStage>, params: StageParams) -> Self {
        self.restoration = Some((stage, params));
        self
    }

    pub fn with_interpolation(mut self, stage: Arc<dyn BatchStage>, params: StageParams) -> Self {
        self.interpolation = Some((stage, params));
        self
    }

    pub fn with_preview(mut self, assembler: VideoAssembler) -> Self {
        self.preview = Some(assembler);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.restoration.is_some() || self.interpolation.is_some()
    }

    pub fn restores(&self) -> bool {
        self.restoration.is_some()
    }

    /// Restore a single image in place.
    ///
    /// The image is staged alone under `.staging/`, restored into
    /// `final_results/`, and the result written back over `target_image`
    /// in its own format. Without a restoration stage this is a no-op.
    pub async fn restore_image(&self, target_image: &Path, run_dir: &RunDirectory) -> Result<()> {
        let Some((ref stage, ref params)) = self.restoration else {
            return Ok(());
        };

        let input = run_dir.staging_dir();
        let output = run_dir.stage_dir(StageDir::FinalResults);
        for dir in [&input, &output] {
            if dir.exists() {
                tokio::fs::remove_dir_all(dir).await?;
            }
            tokio::fs::create_dir_all(dir).await?;
        }

        let file_name = target_image
            .file_name()
            .ok_or_else(|| PipelineError::Validation(format!("not an image file: {}", target_image.display())))?;
        tokio::fs::copy(target_image, input.join(file_name)).await?;

        info!("Running {} on {}", stage.name(), target_image.display());
        stage
            .run(&input, &output, params)
            .await
            .map_err(|e| PipelineError::stage(PipelineStage::Restore, &e))?;

        let restored = FileManager::list_image_files(&output)?.into_iter().next().ok_or_else(|| {
            let err = anyhow::anyhow!("{} produced no image in {}", stage.name(), output.display());
            PipelineError::stage(PipelineStage::Restore, &err)
        })?;
        Self::write_back(&restored, target_image).await
    }

    /// Overwrite `dest` with `restored`, re-encoding when the formats differ
    async fn write_back(restored: &Path, dest: &Path) -> Result<()> {
        let extension = |path: &Path| path.extension().map(|ext| ext.to_ascii_lowercase());
        if extension(restored) == extension(dest) {
            tokio::fs::copy(restored, dest).await?;
            return Ok(());
        }

        debug!("Converting {} to {}", restored.display(), dest.display());
        let (restored, dest) = (restored.to_path_buf(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || -> Result<()> {
            let decoded = image::open(&restored)?;
            image::DynamicImage::ImageRgb8(decoded.to_rgb8()).save(&dest)?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    /// Run the choreography over the frames in the run root and return the
    /// final frames, back in the root.
    ///
    /// `frame_rate` is the rate the preview is assembled at; `on_stage` is
    /// called as each stage starts.
    pub async fn run(
        &self,
        run_dir: &RunDirectory,
        frame_rate: FrameRate,
        on_stage: &(dyn Fn(PipelineStage) + Send + Sync),
    ) -> Result<FrameSequence> {
        let root = run_dir.stage_dir(StageDir::Root);
        let lowres = run_dir.stage_dir(StageDir::Lowres);
        let final_results = run_dir.stage_dir(StageDir::FinalResults);
        let interpolated = run_dir.stage_dir(StageDir::Interpolated);

        // A reused run directory may hold frames from an earlier run
        for dir in [&lowres, &final_results, &interpolated] {
            let removed = FileManager::remove_frames(dir).await?;
            if removed > 0 {
                debug!("Cleared {} stale frames from {}", removed, dir.display());
            }
        }

        if let Some(ref assembler) = self.preview {
            on_stage(PipelineStage::Preview);
            let frames = FrameSequence::scan(&root)?.paths();
            assembler
                .assemble(&frames, frame_rate, &run_dir.lowres_preview())
                .await
                .map_err(|e| PipelineError::stage(PipelineStage::Preview, &e))?;
        }

        let restored = match self.restoration {
            Some((ref stage, ref params)) => {
                on_stage(PipelineStage::Restore);
                Self::run_stage(PipelineStage::Restore, stage.as_ref(), &root, &final_results, params).await?;
                true
            }
            None => false,
        };

        let moved = FileManager::move_frames(&root, &lowres).await?;
        debug!("Moved {} swapped frames to {}", moved, lowres.display());

        if !restored {
            FileManager::copy_frames(&lowres, &final_results).await?;
        }

        let interpolated_run = match self.interpolation {
            Some((ref stage, ref params)) => {
                on_stage(PipelineStage::Interpolate);
                Self::run_stage(PipelineStage::Interpolate, stage.as_ref(), &final_results, &interpolated, params)
                    .await?;
                true
            }
            None => false,
        };

        let source = if interpolated_run { &interpolated } else { &final_results };
        let final_frames = Self::copy_back(source, &root, interpolated_run).await?;
        info!("✨ Post-processing produced {} frames", final_frames.len());
        Ok(final_frames)
    }

    async fn run_stage(
        pipeline_stage: PipelineStage,
        stage: &dyn BatchStage,
        input: &Path,
        output: &Path,
        params: &StageParams,
    ) -> Result<()> {
        info!("Running {} on {}", stage.name(), input.display());
        stage
            .run(input, output, params)
            .await
            .map_err(|e| PipelineError::stage(pipeline_stage, &e))?;

        if FileManager::list_frame_files(output)?.is_empty() {
            let err = anyhow::anyhow!("{} produced no frames in {}", stage.name(), output.display());
            return Err(PipelineError::stage(pipeline_stage, &err).into());
        }
        Ok(())
    }

    /// Copy the final frames into the run root under canonical names
    async fn copy_back(from: &Path, root: &Path, renumber: bool) -> Result<FrameSequence> {
        let sequence = FrameSequence::scan(from)?;
        let mut copied = Vec::with_capacity(sequence.len());
        for (position, frame) in sequence.frames().iter().enumerate() {
            let index = if renumber { position as u64 + 1 } else { frame.index };
            let path = root.join(Frame::file_name(index));
            tokio::fs::copy(&frame.path, &path).await?;
            copied.push(Frame { index, path });
        }
        Ok(FrameSequence::from_frames(copied))
    }
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new()
    }
}
