//! # Pipeline Orchestrator
//!
//! Questo è il coordinatore di una run di face swap.
//!
//! ## Flusso (video):
//! 1. Precheck (fatali, nessuno stage è ancora partito)
//! 2. Probe del target
//! 3. Normalizzazione del frame rate (oppure copia nella run directory)
//! 4. Estrazione dei frame (completa o skip)
//! 5. Transform distribuito sul worker pool
//! 6. Post-processing opzionale (anteprima, restoration, interpolation)
//! 7. Assemblaggio al frame rate che preserva la durata della sorgente
//! 8. Remux dell'audio del target originale, pulizia della run directory
//!
//! Ogni stage termina completamente prima del successivo e l'unico canale
//! di comunicazione è il filesystem. Un errore in uno stage riporta il nome
//! dello stage; nessun output parziale viene assemblato.
//!
//! ## Flusso (immagine):
//! Il target viene copiato nell'output e trasformato con una sola chiamata.
//! Con la restoration attiva l'output passa anche dallo stage di restoration,
//! isolato nella run directory.

use crate::assemble::{output_frame_rate, VideoAssembler};
use crate::config::JobConfig;
use crate::error::{PipelineError, PipelineStage};
use crate::extract::FrameExtractor;
use crate::file_manager::FileManager;
use crate::governor::ExecutionPlan;
use crate::json_output::JsonMessage;
use crate::normalize::FrameRateNormalizer;
use crate::pipeline::{Precheck, StatusReporter};
use crate::pool::WorkerPool;
use crate::postprocess::PostProcessor;
use crate::probe::{FrameRate, MediaProber};
use crate::progress::RunSummary;
use crate::run_dir::{RunDirectory, RunManifest, LAYOUT_VERSION};
use crate::transform::{CommandTransform, FrameTransform};
use anyhow::Result;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// What a successful run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub output: PathBuf,
    /// Frames in the output (1 for image targets)
    pub frames: usize,
    /// Output frame rate (None for image targets)
    pub frame_rate: Option<FrameRate>,
    /// Transform units executed
    pub units: usize,
}

/// Keeps an error that already names its stage, otherwise names `stage`
fn in_stage(stage: PipelineStage, err: anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::Stage { .. }) => err,
        _ => PipelineError::stage(stage, &err).into(),
    }
}

/// One face swap run over one target
pub struct Pipeline {
    job: JobConfig,
    plan: ExecutionPlan,
    run_dir: RunDirectory,
    transform: Arc<dyn FrameTransform>,
    post_processor: PostProcessor,
    assembler: VideoAssembler,
    status: StatusReporter,
}

impl Pipeline {
    /// Pipeline with the command-backed transform and stages of `job`
    pub fn new(job: JobConfig, plan: ExecutionPlan) -> Result<Self> {
        job.validate()
            .map_err(|e| PipelineError::Validation(format!("{:#}", e)))?;

        let run_dir = RunDirectory::for_target(&job.target)?;
        let transform = CommandTransform::new(
            job.tools.transform_command.clone(),
            job.all_faces,
            &plan,
            run_dir.chunks_dir(),
        );

        Ok(Self {
            post_processor: PostProcessor::from_job(&job, &plan.child_env),
            assembler: VideoAssembler::from_tools(&job.tools),
            status: StatusReporter::new(job.json_output),
            transform: Arc::new(transform),
            run_dir,
            job,
            plan,
        })
    }

    pub fn with_transform(mut self, transform: Arc<dyn FrameTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_post_processor(mut self, post_processor: PostProcessor) -> Self {
        self.post_processor = post_processor;
        self
    }

    pub fn with_status(mut self, status: StatusReporter) -> Self {
        self.status = status;
        self
    }

    pub fn run_dir(&self) -> &RunDirectory {
        &self.run_dir
    }

    /// Run every stage; the error of a failed stage names it
    pub async fn run(&self) -> Result<RunReport> {
        let started = Instant::now();
        self.status.emit(JsonMessage::start(&self.job, self.plan.workers));

        let result = self.run_inner().await;
        match result {
            Ok(ref report) => {
                let summary = RunSummary {
                    frames: report.frames,
                    units: report.units,
                    frame_rate: report.frame_rate.map(|r| r.to_string()),
                    output_size: std::fs::metadata(&report.output).map(|m| m.len()).unwrap_or(0),
                    elapsed_seconds: started.elapsed().as_secs_f64(),
                };
                self.status.finish(&summary);
                self.status.emit(JsonMessage::complete(
                    report.output.clone(),
                    report.frames,
                    summary.frame_rate.clone(),
                    summary.elapsed_seconds,
                ));
                info!("Output saved as: {}", report.output.display());
            }
            Err(ref e) => self.status.fail(e),
        }
        result
    }

    async fn run_inner(&self) -> Result<RunReport> {
        Precheck::run(&self.job, self.transform.as_ref()).await?;

        if FileManager::is_image(&self.job.target) {
            self.run_image().await
        } else {
            self.run_video().await
        }
    }

    /// Announce `stage`, run it, and name it in any error
    async fn stage<T, F>(&self, stage: PipelineStage, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.status.stage(stage);
        work.await.map_err(|e| in_stage(stage, e))
    }

    async fn run_image(&self) -> Result<RunReport> {
        let output = self.job.output_path();
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::copy(&self.job.target, &output).await?;

        let frames = [output.clone()];
        self.stage(
            PipelineStage::Transform,
            self.transform.transform_frames(&self.job.source_face, &frames),
        )
        .await?;

        if self.post_processor.restores() {
            self.run_dir.prepare().await?;
            self.stage(
                PipelineStage::Restore,
                self.post_processor.restore_image(&output, &self.run_dir),
            )
            .await?;
            if !self.job.keep_frames {
                self.run_dir.remove().await?;
            }
        }

        Ok(RunReport {
            output,
            frames: 1,
            frame_rate: None,
            units: 1,
        })
    }

    async fn run_video(&self) -> Result<RunReport> {
        let job = &self.job;
        let run_dir = &self.run_dir;
        let skip = job.skip_interval();
        run_dir.prepare().await?;

        let info = self.stage(PipelineStage::Probe, MediaProber::probe(&job.target)).await?;

        let source = self
            .stage(
                PipelineStage::Normalize,
                FrameRateNormalizer::from_job(job).normalize(&job.target, &info, run_dir),
            )
            .await?;

        run_dir
            .write_manifest(&RunManifest {
                layout_version: LAYOUT_VERSION,
                target: job.target.clone(),
                source_face: job.source_face.clone(),
                frame_rate: Some(source.frame_rate.to_string()),
                skip_interval: skip,
                created_at: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
            })
            .await?;

        let sequence = self
            .stage(PipelineStage::Extract, FrameExtractor::extract(&source.video, run_dir, skip))
            .await?;
        let kept = sequence.len();

        let pool = WorkerPool::new(self.transform.clone(), self.plan.workers, self.plan.forced_single);
        let on_unit = |done: usize, total: usize| self.status.chunk(done, total);
        let distribution = self
            .stage(
                PipelineStage::Transform,
                pool.distribute(&job.source_face, &sequence.paths(), &on_unit),
            )
            .await?;

        let final_frames = if self.post_processor.is_enabled() {
            // The preview plays at the rate that keeps the source duration
            let preview_rate = output_frame_rate(source.frame_rate, skip, kept, kept)?;
            let on_stage = |stage: PipelineStage| self.status.stage(stage);
            let fallback_stage = if job.restoration.is_some() {
                PipelineStage::Restore
            } else {
                PipelineStage::Interpolate
            };
            self.post_processor
                .run(run_dir, preview_rate, &on_stage)
                .await
                .map_err(|e| in_stage(fallback_stage, e))?
        } else {
            sequence
        };

        let fps = output_frame_rate(source.frame_rate, skip, kept, final_frames.len())?;
        debug!(
            "Output rate {} from {} extracted and {} final frames",
            fps,
            kept,
            final_frames.len()
        );

        let assembled = self
            .stage(
                PipelineStage::Assemble,
                self.assembler.assemble(&final_frames.paths(), fps, &run_dir.assembled_video()),
            )
            .await?;

        let output = job.output_path();
        self.stage(
            PipelineStage::Remux,
            self.assembler.remux_audio(&assembled, &job.target, info.has_audio, &output),
        )
        .await?;

        if job.keep_frames {
            info!("Keeping frames in {}", run_dir.root().display());
        } else {
            run_dir.remove().await?;
        }

        Ok(RunReport {
            output,
            frames: final_frames.len(),
            frame_rate: Some(fps),
            units: distribution.units,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InterpolationSettings, RestorationSettings};
    use crate::frames::FrameSequence;
    use crate::run_dir::StageDir;
    use crate::test_support::{self, CopyStage, RecordingTransform};
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        job: JobConfig,
    }

    async fn fixture(fps: u32, seconds: f64, audio: bool) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let face = temp_dir.path().join("face.png");
        test_support::write_face(&face);
        let target = temp_dir.path().join("clip.mp4");
        test_support::make_video(&target, fps, seconds, audio).await.unwrap();
        let job = JobConfig {
            source_face: face,
            target,
            cpu_cores: 4,
            ..Default::default()
        };
        Fixture { _temp_dir: temp_dir, job }
    }

    fn pipeline(job: JobConfig, transform: Arc<RecordingTransform>) -> Pipeline {
        let plan = ExecutionPlan::cpu(job.cpu_cores);
        Pipeline::new(job, plan)
            .unwrap()
            .with_transform(transform)
            .with_status(StatusReporter::silent())
    }

    #[test]
    fn test_in_stage_keeps_existing_stage() {
        let inner: anyhow::Error = PipelineError::stage(PipelineStage::Restore, &anyhow::anyhow!("boom")).into();
        let err = in_stage(PipelineStage::Interpolate, inner);
        let stage = err.downcast_ref::<PipelineError>().and_then(|e| e.failed_stage());
        assert_eq!(stage, Some(PipelineStage::Restore));

        let err = in_stage(PipelineStage::Extract, anyhow::anyhow!("no frames"));
        let stage = err.downcast_ref::<PipelineError>().and_then(|e| e.failed_stage());
        assert_eq!(stage, Some(PipelineStage::Extract));
    }

    #[test]
    fn test_invalid_job_is_rejected() {
        let job = JobConfig {
            target: "clip.mp4".into(),
            cpu_cores: 0,
            ..Default::default()
        };
        assert!(Pipeline::new(job, ExecutionPlan::cpu(1)).is_err());
    }

    #[tokio::test]
    async fn test_end_to_end_video_with_audio() {
        if !test_support::ffmpeg_available().await {
            return;
        }
        let fixture = fixture(30, 3.0, true).await;
        let transform = Arc::new(RecordingTransform::default());
        let pipeline = pipeline(fixture.job.clone(), transform.clone());
        let run_root = pipeline.run_dir().root().to_path_buf();

        let report = pipeline.run().await.unwrap();

        assert_eq!(report.output, fixture.job.target.with_file_name("swapped-clip.mp4"));
        assert_eq!(report.frames, 90);
        assert_eq!(report.frame_rate, Some(FrameRate::whole(30)));
        assert!(report.units > 1);
        let transformed: usize = transform.calls().iter().map(Vec::len).sum();
        assert_eq!(transformed, 90);

        let info = MediaProber::probe(&report.output).await.unwrap();
        assert!((info.frame_count as i64 - 90).abs() <= 1);
        assert!((info.fps() - 30.0).abs() < 0.01);
        assert!(info.has_audio);
        assert!(!run_root.exists());
    }

    #[tokio::test]
    async fn test_skip_mode_keeps_duration_and_frames() {
        if !test_support::ffmpeg_available().await {
            return;
        }
        let mut fixture = fixture(30, 3.0, false).await;
        fixture.job.frame_skip = 3;
        fixture.job.keep_frames = true;
        let pipeline = pipeline(fixture.job.clone(), Arc::new(RecordingTransform::default()));

        let report = pipeline.run().await.unwrap();

        assert_eq!(report.frames, 30);
        assert_eq!(report.frame_rate, Some(FrameRate::whole(10)));
        let info = MediaProber::probe(&report.output).await.unwrap();
        assert!((info.duration - 3.0).abs() < 0.15);
        assert!(!info.has_audio);

        // Kept run directory still describes the run
        let manifest = pipeline.run_dir().read_manifest().await.unwrap().unwrap();
        assert_eq!(manifest.skip_interval, Some(3));
        assert_eq!(manifest.frame_rate.as_deref(), Some("30/1"));
        let frames = FrameSequence::scan(pipeline.run_dir().root()).unwrap();
        assert_eq!(frames.indices()[..3], [1, 4, 7]);

        // Re-assembling the kept frames gives the same count and rate
        let again = pipeline.run_dir().root().join("again.mp4");
        VideoAssembler::new(23, "128k")
            .assemble(&frames.paths(), report.frame_rate.unwrap(), &again)
            .await
            .unwrap();
        let reassembled = MediaProber::probe(&again).await.unwrap();
        assert_eq!(reassembled.frame_count, info.frame_count);
        assert!((reassembled.fps() - info.fps()).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_post_processing_stages_run_in_order() {
        if !test_support::ffmpeg_available().await {
            return;
        }
        let mut fixture = fixture(10, 1.0, false).await;
        fixture.job.keep_frames = true;
        fixture.job.restoration = Some(RestorationSettings::default());
        fixture.job.interpolation = Some(InterpolationSettings::default());
        let restore = Arc::new(CopyStage::new("restoration"));
        let interpolate = Arc::new(CopyStage::new("interpolation"));
        let post = PostProcessor::new()
            .with_restoration(restore.clone(), RestorationSettings::default().into())
            .with_interpolation(interpolate.clone(), InterpolationSettings::default().into());
        let pipeline = pipeline(fixture.job.clone(), Arc::new(RecordingTransform::default()))
            .with_post_processor(post);

        let report = pipeline.run().await.unwrap();

        let run_dir = pipeline.run_dir();
        assert_eq!(report.frames, 10);
        assert_eq!(restore.runs()[0].1, run_dir.stage_dir(StageDir::FinalResults));
        assert_eq!(interpolate.runs()[0].0, run_dir.stage_dir(StageDir::FinalResults));
        assert_eq!(interpolate.runs()[0].1, run_dir.stage_dir(StageDir::Interpolated));
        assert_eq!(FrameSequence::scan(&run_dir.stage_dir(StageDir::Lowres)).unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_worker_failure_fails_transform_stage() {
        if !test_support::ffmpeg_available().await {
            return;
        }
        let fixture = fixture(30, 1.0, false).await;
        let bad_frame = fixture
            .job
            .target
            .with_file_name("clip")
            .join(crate::frames::Frame::file_name(1));
        let transform = Arc::new(RecordingTransform::default().failing_on(bad_frame));
        let pipeline = pipeline(fixture.job.clone(), transform);

        let err = pipeline.run().await.unwrap_err();
        let pipeline_err = err.downcast_ref::<PipelineError>().unwrap();
        assert_eq!(pipeline_err.failed_stage(), Some(PipelineStage::Transform));
        assert!(err.to_string().contains("chunks failed"));
        assert!(!fixture.job.output_path().exists());
    }

    #[tokio::test]
    async fn test_no_face_fails_before_any_stage() {
        if !test_support::ffmpeg_available().await {
            return;
        }
        let fixture = fixture(10, 1.0, false).await;
        let pipeline = pipeline(fixture.job.clone(), Arc::new(RecordingTransform::default().without_face()));

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NoFaceDetected(_))
        ));
        assert!(!pipeline.run_dir().root().exists());
    }

    #[tokio::test]
    async fn test_image_target_single_call() {
        if !test_support::ffmpeg_available().await {
            return;
        }
        let temp_dir = TempDir::new().unwrap();
        let face = temp_dir.path().join("face.png");
        test_support::write_face(&face);
        let target = temp_dir.path().join("photo.png");
        test_support::write_face(&target);
        let job = JobConfig {
            source_face: face,
            target: target.clone(),
            ..Default::default()
        };
        let transform = Arc::new(RecordingTransform::default());

        let report = pipeline(job, transform.clone()).run().await.unwrap();

        let output = temp_dir.path().join("swapped-photo.png");
        assert_eq!(report.output, output);
        assert_eq!(report.frame_rate, None);
        assert_eq!(transform.calls(), vec![vec![output.clone()]]);
        assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&target).unwrap());
    }

    #[tokio::test]
    async fn test_image_target_runs_restoration() {
        if !test_support::ffmpeg_available().await {
            return;
        }
        let temp_dir = TempDir::new().unwrap();
        let face = temp_dir.path().join("face.png");
        test_support::write_face(&face);
        let target = temp_dir.path().join("photo.png");
        test_support::write_face(&target);
        let job = JobConfig {
            source_face: face,
            target,
            restoration: Some(RestorationSettings::default()),
            ..Default::default()
        };
        let restore = Arc::new(CopyStage::new("restoration"));
        let post = PostProcessor::new().with_restoration(restore.clone(), RestorationSettings::default().into());
        let pipeline = pipeline(job, Arc::new(RecordingTransform::default())).with_post_processor(post);

        let report = pipeline.run().await.unwrap();

        assert_eq!(report.output, temp_dir.path().join("swapped-photo.png"));
        let runs = restore.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, pipeline.run_dir().staging_dir());
        assert_eq!(runs[0].2.get("fidelity"), Some("0.7"));
        assert_eq!(image::image_dimensions(&report.output).unwrap(), (32, 32));
        assert!(!pipeline.run_dir().root().exists());
    }
}
