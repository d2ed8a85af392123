//! # Work Partitioner / Worker Pool Module
//!
//! Distribuisce la frame sequence sulle unità di lavoro del transform.
//!
//! ## Partizionamento:
//! - `workers ≤ 1` o acceleratore → una sola chiamata sincrona, nessun pool
//! - `chunk_size = len / workers`; se `chunk_size ≤ 2` → chiamata singola
//! - altrimenti chunk contigui di `chunk_size` frame (l'ultimo più corto),
//!   eseguiti al massimo `workers` alla volta
//!
//! ## Politica di errore (fail-fast):
//! Il primo chunk che fallisce interrompe tutti gli altri: i task vengono
//! abortiti e i loro processi figli terminati (`kill_on_drop`). L'errore
//! riporta quanti chunk sono falliti, quanti sono stati abortiti e il totale.
//! Nessun retry.
//!
//! La chiamata ritorna solo quando tutte le unità sono terminate (barriera).

use crate::error::PipelineError;
use crate::transform::FrameTransform;
use anyhow::Result;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Chunks at or below this size are not worth a pool
pub const MIN_POOLED_CHUNK: usize = 2;

/// How a frame sequence is split across workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partition {
    /// One synchronous call over the whole sequence
    Single,
    /// Disjoint contiguous ranges covering the sequence
    Chunks(Vec<Range<usize>>),
}

/// Split `len` frames for `workers` workers
pub fn partition(len: usize, workers: usize, forced_single: bool) -> Partition {
    if workers <= 1 || forced_single {
        return Partition::Single;
    }

    let chunk_size = len / workers;
    if chunk_size <= MIN_POOLED_CHUNK {
        return Partition::Single;
    }

    let chunks = (0..len)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(len))
        .collect();
    Partition::Chunks(chunks)
}

/// Outcome of a successful distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributionReport {
    pub units: usize,
    pub frames: usize,
    pub pooled: bool,
}

/// Bounded fan-out of the frame transform
pub struct WorkerPool {
    transform: Arc<dyn FrameTransform>,
    workers: usize,
    forced_single: bool,
}

impl WorkerPool {
    pub fn new(transform: Arc<dyn FrameTransform>, workers: usize, forced_single: bool) -> Self {
        Self {
            transform,
            workers,
            forced_single,
        }
    }

    /// Transform every frame, calling `on_unit(done, total)` as units finish
    pub async fn distribute(
        &self,
        source_face: &Path,
        frames: &[PathBuf],
        on_unit: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<DistributionReport> {
        let chunks = match partition(frames.len(), self.workers, self.forced_single) {
            Partition::Single => {
                debug!("Transforming {} frames in a single call", frames.len());
                self.transform.transform_frames(source_face, frames).await?;
                on_unit(1, 1);
                return Ok(DistributionReport {
                    units: 1,
                    frames: frames.len(),
                    pooled: false,
                });
            }
            Partition::Chunks(chunks) => chunks,
        };

        let total = chunks.len();
        info!("Transforming {} frames in {} chunks on {} workers", frames.len(), total, self.workers);

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for range in chunks {
            let semaphore = semaphore.clone();
            let transform = self.transform.clone();
            let source_face = source_face.to_path_buf();
            let chunk = frames[range.clone()].to_vec();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await?;
                debug!("Chunk {:?} started", range);
                transform
                    .transform_frames(&source_face, &chunk)
                    .await
                    .map_err(|e| e.context(format!("chunk of frames {}..{}", range.start, range.end)))
            });
        }

        let mut done = 0;
        let mut first_error: Option<String> = None;
        let mut failed = 0;
        let mut aborted = 0;

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(join_error) if join_error.is_cancelled() => {
                    aborted += 1;
                    continue;
                }
                Err(join_error) => Err(anyhow::anyhow!("worker panicked: {}", join_error)),
            };

            match outcome {
                // Units still finishing after the abort report no progress
                Ok(()) if first_error.is_some() => {}
                Ok(()) => {
                    done += 1;
                    on_unit(done, total);
                }
                Err(e) => {
                    failed += 1;
                    if first_error.is_none() {
                        error!("Chunk failed, aborting remaining work: {:#}", e);
                        first_error = Some(format!("{:#}", e));
                        tasks.abort_all();
                    }
                }
            }
        }

        if let Some(first_error) = first_error {
            return Err(PipelineError::WorkerFailures {
                failed,
                aborted,
                total,
                first_error,
            }
            .into());
        }

        Ok(DistributionReport {
            units: total,
            frames: frames.len(),
            pooled: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingTransform;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    fn frame_paths(count: usize) -> Vec<PathBuf> {
        (1..=count as u64)
            .map(|i| PathBuf::from(crate::frames::Frame::file_name(i)))
            .collect()
    }

    fn noop(_: usize, _: usize) {}

    #[test]
    fn test_partition_covers_sequence_exactly() {
        for len in [0usize, 1, 7, 9, 10, 30, 31, 90, 101, 997] {
            for workers in 1..=12 {
                if let Partition::Chunks(chunks) = partition(len, workers, false) {
                    assert!(len / workers > MIN_POOLED_CHUNK);
                    let mut expected_start = 0;
                    for chunk in &chunks {
                        assert_eq!(chunk.start, expected_start, "gap or overlap for {} / {}", len, workers);
                        assert!(!chunk.is_empty());
                        expected_start = chunk.end;
                    }
                    assert_eq!(expected_start, len);
                }
            }
        }
    }

    #[test]
    fn test_partition_single_cases() {
        assert_eq!(partition(100, 1, false), Partition::Single);
        assert_eq!(partition(100, 0, false), Partition::Single);
        assert_eq!(partition(100, 8, true), Partition::Single);
        // 8 / 4 = 2 is not worth a pool
        assert_eq!(partition(8, 4, false), Partition::Single);
        assert_eq!(partition(12, 4, false), Partition::Chunks(vec![0..3, 3..6, 6..9, 9..12]));
    }

    #[test]
    fn test_partition_remainder_chunk() {
        let Partition::Chunks(chunks) = partition(14, 4, false) else {
            panic!("expected chunks");
        };
        assert_eq!(chunks, vec![0..3, 3..6, 6..9, 9..12, 12..14]);
    }

    #[tokio::test]
    async fn test_single_call_when_workers_le_one() {
        let transform = Arc::new(RecordingTransform::default());
        let pool = WorkerPool::new(transform.clone(), 1, false);
        let frames = frame_paths(50);

        let report = pool.distribute(Path::new("face.jpg"), &frames, &noop).await.unwrap();
        assert!(!report.pooled);
        assert_eq!(report.units, 1);
        assert_eq!(transform.calls(), vec![frames]);
    }

    #[tokio::test]
    async fn test_pooled_run_transforms_every_frame_once() {
        let transform = Arc::new(RecordingTransform::default().with_delay_ms(5));
        let pool = WorkerPool::new(transform.clone(), 3, false);
        let frames = frame_paths(31);

        let progress = Mutex::new(Vec::new());
        let on_unit = |done: usize, total: usize| progress.lock().unwrap().push((done, total));
        let report = pool.distribute(Path::new("face.jpg"), &frames, &on_unit).await.unwrap();

        assert!(report.pooled);
        assert_eq!(report.units, 4);
        let mut seen: Vec<PathBuf> = transform.calls().into_iter().flatten().collect();
        seen.sort();
        assert_eq!(seen, frames);
        assert!(transform.max_in_flight() <= 3);
        assert_eq!(progress.lock().unwrap().last(), Some(&(4, 4)));
    }

    #[tokio::test]
    async fn test_failing_chunk_aborts_run() {
        let frames = frame_paths(40);
        let transform = Arc::new(
            RecordingTransform::default()
                .with_delay_ms(50)
                .failing_on(frames[0].clone()),
        );
        let pool = WorkerPool::new(transform, 2, false);

        let err = pool.distribute(Path::new("face.jpg"), &frames, &noop).await.unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::WorkerFailures { failed, aborted, total, first_error }) => {
                assert_eq!(*total, 2);
                assert!(*failed >= 1);
                assert!(failed + aborted <= *total);
                assert!(first_error.contains("000001.png"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    /// Fails its chunk quickly; other chunks block the thread, so an abort
    /// cannot stop them before they finish
    struct BlockingTransform {
        fail_on: PathBuf,
    }

    #[async_trait]
    impl FrameTransform for BlockingTransform {
        async fn source_has_face(&self, _source_face: &Path) -> Result<bool> {
            Ok(true)
        }

        async fn transform_frames(&self, _source_face: &Path, frames: &[PathBuf]) -> Result<()> {
            if frames.contains(&self.fail_on) {
                tokio::time::sleep(Duration::from_millis(20)).await;
                return Err(anyhow::anyhow!("transform failed"));
            }
            std::thread::sleep(Duration::from_millis(150));
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_no_progress_after_failure() {
        let frames = frame_paths(6);
        let transform = Arc::new(BlockingTransform {
            fail_on: frames[0].clone(),
        });
        let pool = WorkerPool::new(transform, 2, false);

        let progress = Mutex::new(Vec::new());
        let on_unit = |done: usize, total: usize| progress.lock().unwrap().push((done, total));
        let err = pool.distribute(Path::new("face.jpg"), &frames, &on_unit).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::WorkerFailures { failed: 1, total: 2, .. })
        ));
        assert!(progress.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_call_failure_propagates() {
        let frames = frame_paths(3);
        let transform = Arc::new(RecordingTransform::default().failing_on(frames[1].clone()));
        let pool = WorkerPool::new(transform, 8, false);
        assert!(pool.distribute(Path::new("face.jpg"), &frames, &noop).await.is_err());
    }
}
